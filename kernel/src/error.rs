use snafu::Snafu;

use crate::backend::BackendKind;
use crate::value::DeviceKind;

pub type Result<T, E = Error> = std::result::Result<T, E>;

/// Errors are fatal to kernel construction or to the current execution call.
/// There is no partial-failure or retry semantics.
#[derive(Debug, Snafu)]
#[snafu(visibility(pub))]
pub enum Error {
    /// Subgraph input type other than tensor, int, or float.
    #[snafu(display("unsupported input type for value {name}"))]
    UnsupportedInputType { name: String },

    /// Operator identifier outside the dispatch table, or an operand form
    /// the table cannot lower.
    #[snafu(display("unhandled operator: {op}"))]
    UnhandledOperator { op: String },

    /// No tensor among the runtime arguments at first call.
    #[snafu(display("no tensor inputs"))]
    NoTensorInput,

    /// Fewer values on the stack than the kernel's declared input count.
    #[snafu(display("kernel takes {expected} inputs but the stack holds {actual}"))]
    StackUnderflow { expected: usize, actual: usize },

    /// Device kind the backend map does not cover.
    #[snafu(display("unsupported device: {device}"))]
    UnsupportedDevice { device: DeviceKind },

    /// A later call observed a device different from the one bound at the
    /// first call. The kernel never recompiles.
    #[snafu(display("kernel is bound to {bound} but was invoked on {actual}"))]
    BackendMismatch { bound: DeviceKind, actual: DeviceKind },

    /// Configured parallel loop level other than 2 or 3.
    #[snafu(display("invalid loop level {level}, expected 2 or 3"))]
    InvalidLoopLevel { level: u32 },

    /// The bound backend could not compile or run the lowered program.
    #[snafu(display("backend {backend} failed to dispatch: {reason}"))]
    BackendDispatchFailure { backend: BackendKind, reason: String },

    /// An output dimension resolved to neither a literal nor a size bound
    /// from a runtime tensor argument.
    #[snafu(display("output dimension of {output} is neither literal nor a bound size"))]
    UnresolvedOutputDim { output: String },
}
