//! Statement nodes: the lowered, executable side of the IR.

use crate::arena::{BufId, ExprRef, StmtRef, VarId};

/// Execution role of a loop axis.
///
/// Serial loops run as plain counted loops on every backend. The grid kinds
/// are produced by the parallel split and tell a grid backend which axis
/// maps to its block and thread dimensions; a non-grid backend runs them
/// serially with identical semantics.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoopKind {
    Serial,
    GridBlock,
    GridThread,
}

/// A statement node.
#[derive(Debug, Clone, PartialEq)]
pub enum Stmt {
    /// Write `value` to `buf[index]`.
    Store { buf: BufId, index: ExprRef, value: ExprRef },
    /// Counted loop binding `var` over `0..extent`.
    For { var: VarId, extent: ExprRef, kind: LoopKind, body: StmtRef },
    /// Guard produced by masked loop splitting.
    If { cond: ExprRef, body: StmtRef },
    /// Ordered sequence of statements, one per kernel output.
    Block(Vec<StmtRef>),
}
