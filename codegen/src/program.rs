//! The backend contract: lowered program in, callable code object out.

use std::sync::Arc;

use fuze_ir::{Arena, BufId, ScalarType, StmtRef, VarId};

use crate::Result;

/// One entry of the ordered parameter list fixed at compile time.
///
/// The runtime call argument list must follow this list exactly: a pointer
/// for every buffer parameter, a 32-bit literal for every scalar parameter.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Param {
    /// Base pointer of an input or output buffer.
    Buffer(BufId),
    /// Scalar literal bound to a symbolic variable (size, stride, or
    /// scalar input).
    Scalar(VarId),
}

/// One raw call argument.
#[derive(Debug, Clone, Copy)]
pub enum CallArg {
    Ptr(*mut u8),
    Int(i32),
    Float(f32),
}

/// A lowered kernel handed to a backend.
///
/// The arena is frozen at compile time and shared between the owning kernel
/// instance and the code object built from this program.
#[derive(Debug, Clone)]
pub struct Program {
    pub name: String,
    pub arena: Arc<Arena>,
    pub root: StmtRef,
    pub params: Vec<Param>,
}

impl Program {
    /// Element type of the value a parameter carries at call time.
    pub fn param_dtype(&self, param: Param) -> ScalarType {
        match param {
            Param::Buffer(b) => self.arena.buf(b).dtype,
            Param::Scalar(v) => self.arena.var(v).dtype,
        }
    }
}

/// An executable artifact produced by a backend.
pub trait CodeObject {
    /// Invoke with raw arguments matching the compiled parameter list in
    /// order and in count.
    fn call(&self, args: &[CallArg]) -> Result<()>;

    /// Backend-qualified kernel name for diagnostics.
    fn name(&self) -> &str;
}
