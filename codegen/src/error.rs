//! Error types for code generation and code object dispatch.

use snafu::Snafu;

pub type Result<T, E = Error> = std::result::Result<T, E>;

#[derive(Debug, Snafu)]
#[snafu(visibility(pub))]
pub enum Error {
    /// Argument list length differs from the compiled parameter list.
    #[snafu(display("argument count mismatch: parameter list has {expected}, call supplied {actual}"))]
    ArgumentCountMismatch { expected: usize, actual: usize },

    /// Argument kind differs from the parameter declared at this position.
    #[snafu(display("argument {index} does not match the parameter kind fixed at compile time"))]
    ArgumentKindMismatch { index: usize },

    /// JIT compilation failed.
    #[snafu(display("JIT compilation failed: {reason}"))]
    JitCompilation { reason: String },

    /// Evaluation of the statement tree failed.
    #[snafu(display("execution failed: {reason}"))]
    Execution { reason: String },
}
