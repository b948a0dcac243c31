//! Arena-owned scalar IR for fused elementwise kernels.
//!
//! One [`Arena`] holds every node a kernel instance ever creates: scalar
//! expressions, statements, symbolic variables, buffers, and symbolic
//! tensors. Nodes reference each other through `u32` handle newtypes
//! ([`ExprRef`], [`StmtRef`], [`VarId`], [`BufId`], [`TensorId`]), so the
//! graph is a DAG with a single owner and no reference cycles by
//! construction. No node outlives the arena, and the arena lives exactly as
//! long as its kernel instance.
//!
//! # Module Organization
//!
//! - [`arena`] - the arena and handle types
//! - [`expr`] - scalar expression nodes and operator enums
//! - [`stmt`] - statement nodes (loop nests, stores, guards)
//! - [`rewrite`] - bottom-up rewriting, substitution, and call inlining

pub mod arena;
pub mod expr;
pub mod rewrite;
pub mod stmt;


pub use arena::{Arena, BufDecl, BufId, ExprRef, StmtRef, TensorDef, TensorId, VarDecl, VarId};
pub use expr::{BinaryOp, CompareOp, Expr, ExprKind, IntrinsicOp};
pub use rewrite::{inline_calls, rewrite_expr, substitute};
pub use stmt::{LoopKind, Stmt};

pub use fuze_dtype::ScalarType;
