//! Parallel-grid code object.
//!
//! Consumes programs whose loops were flattened and split into block and
//! thread dimensions. A real device compiler is an external collaborator
//! behind the same [`CodeObject`](crate::CodeObject) contract; this backend
//! resolves the launch configuration from the grid-kind loops and executes
//! them host-side, so grid-shaped programs stay runnable everywhere.

use tracing::trace;

use fuze_ir::{LoopKind, Stmt, StmtRef};

use crate::eval::Frame;
use crate::program::{CallArg, CodeObject, Program};
use crate::Result;

/// Code object for grid-shaped (block/thread split) programs.
pub struct GridObject {
    program: Program,
    name: String,
    /// Static (blocks, threads) extents per split output, for diagnostics.
    launch: Vec<(i64, i64)>,
}

impl GridObject {
    pub fn build(program: Program) -> Self {
        let name = format!("{}.grid", program.name);
        let launch = launch_dims(&program);
        Self { program, name, launch }
    }

    /// Static launch configuration, one `(blocks, threads)` pair per output
    /// loop nest that was split. Untiled (dynamic-shape) outputs do not
    /// appear here.
    pub fn launch(&self) -> &[(i64, i64)] {
        &self.launch
    }
}

impl CodeObject for GridObject {
    fn call(&self, args: &[CallArg]) -> Result<()> {
        trace!(name = %self.name, launch = ?self.launch, "launching grid program");
        let mut frame = Frame::bind(&self.program, args)?;
        frame.exec(self.program.root)
    }

    fn name(&self) -> &str {
        &self.name
    }
}

/// Collect the literal extents of block/thread loop pairs.
fn launch_dims(program: &Program) -> Vec<(i64, i64)> {
    let mut out = Vec::new();
    collect(program, program.root, None, &mut out);
    out
}

fn collect(program: &Program, s: StmtRef, enclosing_block: Option<i64>, out: &mut Vec<(i64, i64)>) {
    let arena = program.arena.as_ref();
    match arena.stmt(s) {
        Stmt::Block(stmts) => {
            for &st in stmts {
                collect(program, st, enclosing_block, out);
            }
        }
        Stmt::For { extent, kind, body, .. } => {
            let literal = arena.as_int_imm(*extent).map(i64::from);
            match (kind, literal) {
                (LoopKind::GridBlock, Some(n)) => collect(program, *body, Some(n), out),
                (LoopKind::GridThread, Some(n)) => {
                    out.push((enclosing_block.unwrap_or(1), n));
                    collect(program, *body, None, out);
                }
                _ => collect(program, *body, enclosing_block, out),
            }
        }
        Stmt::If { body, .. } => collect(program, *body, enclosing_block, out),
        Stmt::Store { .. } => {}
    }
}
