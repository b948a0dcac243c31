//! Code object backends for fuze kernels.
//!
//! A backend consumes a lowered [`Program`] (frozen arena + statement root +
//! ordered parameter list) and returns a [`CodeObject`]: something that can
//! be called with an ordered list of raw arguments matching the parameter
//! list exactly, in order and in count.
//!
//! Three backends exist:
//!
//! - [`eval`] - portable tree-walking evaluator, always available
//! - [`grid`] - parallel-grid evaluator for block/thread shaped programs
//! - `cranelift` - native CPU JIT, compiled in with the `cranelift` feature

pub mod error;
pub mod eval;
pub mod grid;
pub mod program;

#[cfg(feature = "cranelift")]
pub mod cranelift;


#[cfg(feature = "cranelift")]
pub use cranelift::CraneliftObject;
pub use error::{Error, Result};
pub use eval::EvalObject;
pub use grid::GridObject;
pub use program::{CallArg, CodeObject, Param, Program};
