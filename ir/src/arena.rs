//! The expression/statement arena and its handle types.
//!
//! The arena is append-only: rewrites create new nodes and never mutate or
//! free existing ones. Handles are plain `u32` indices, cheap to copy and
//! meaningless outside their owning arena.

use smallvec::SmallVec;

use fuze_dtype::ScalarType;

use crate::expr::{BinaryOp, CompareOp, Expr, ExprKind, IntrinsicOp};
use crate::stmt::{LoopKind, Stmt};

macro_rules! handle {
    ($(#[$doc:meta])* $name:ident) => {
        $(#[$doc])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
        pub struct $name(u32);

        impl $name {
            #[inline]
            pub(crate) fn new(index: usize) -> Self {
                Self(index as u32)
            }

            #[inline]
            pub fn index(self) -> usize {
                self.0 as usize
            }
        }
    };
}

handle!(
    /// Handle to an expression node.
    ExprRef
);
handle!(
    /// Handle to a statement node.
    StmtRef
);
handle!(
    /// Handle to a symbolic variable.
    VarId
);
handle!(
    /// Handle to a symbolic buffer.
    BufId
);
handle!(
    /// Handle to a symbolic tensor.
    TensorId
);

/// A named, typed symbolic scalar placeholder.
#[derive(Debug, Clone)]
pub struct VarDecl {
    pub name: String,
    pub dtype: ScalarType,
}

/// A named base pointer with an element type.
#[derive(Debug, Clone)]
pub struct BufDecl {
    pub name: String,
    pub dtype: ScalarType,
}

/// A symbolic tensor: a named parametric function from axis variables to a
/// scalar expression.
///
/// Invariant: `dims.len() == axes.len()`, one axis variable per dimension,
/// and axis variables are unique within the owning arena.
#[derive(Debug, Clone)]
pub struct TensorDef {
    pub name: String,
    pub dims: SmallVec<[ExprRef; 4]>,
    pub axes: SmallVec<[VarId; 4]>,
    pub body: ExprRef,
}

impl TensorDef {
    pub fn rank(&self) -> usize {
        self.dims.len()
    }
}

/// Owner of every IR node created during kernel construction and lowering.
#[derive(Debug, Default)]
pub struct Arena {
    exprs: Vec<Expr>,
    stmts: Vec<Stmt>,
    vars: Vec<VarDecl>,
    bufs: Vec<BufDecl>,
    tensors: Vec<TensorDef>,
}

impl Arena {
    pub fn new() -> Self {
        Self::default()
    }

    // ------------------------------------------------------------------
    // Declarations
    // ------------------------------------------------------------------

    pub fn new_var(&mut self, name: impl Into<String>, dtype: ScalarType) -> VarId {
        self.vars.push(VarDecl { name: name.into(), dtype });
        VarId::new(self.vars.len() - 1)
    }

    pub fn new_buf(&mut self, name: impl Into<String>, dtype: ScalarType) -> BufId {
        self.bufs.push(BufDecl { name: name.into(), dtype });
        BufId::new(self.bufs.len() - 1)
    }

    pub fn new_tensor(&mut self, def: TensorDef) -> TensorId {
        debug_assert_eq!(def.dims.len(), def.axes.len(), "tensor rank must match its axis list");
        self.tensors.push(def);
        TensorId::new(self.tensors.len() - 1)
    }

    // ------------------------------------------------------------------
    // Node access
    // ------------------------------------------------------------------

    pub fn expr(&self, e: ExprRef) -> &Expr {
        &self.exprs[e.index()]
    }

    pub fn dtype(&self, e: ExprRef) -> ScalarType {
        self.exprs[e.index()].dtype
    }

    pub fn stmt(&self, s: StmtRef) -> &Stmt {
        &self.stmts[s.index()]
    }

    pub fn var(&self, v: VarId) -> &VarDecl {
        &self.vars[v.index()]
    }

    pub fn buf(&self, b: BufId) -> &BufDecl {
        &self.bufs[b.index()]
    }

    pub fn tensor(&self, t: TensorId) -> &TensorDef {
        &self.tensors[t.index()]
    }

    pub fn tensor_count(&self) -> usize {
        self.tensors.len()
    }

    pub fn var_count(&self) -> usize {
        self.vars.len()
    }

    pub fn buf_count(&self) -> usize {
        self.bufs.len()
    }

    /// Literal value of an integer immediate node, if it is one.
    pub fn as_int_imm(&self, e: ExprRef) -> Option<i32> {
        match self.expr(e).kind {
            ExprKind::IntImm(v) => Some(v),
            _ => None,
        }
    }

    /// Literal value of a floating immediate node, if it is one.
    pub fn as_float_imm(&self, e: ExprRef) -> Option<f32> {
        match self.expr(e).kind {
            ExprKind::FloatImm(v) => Some(v),
            _ => None,
        }
    }

    /// True when the node is the integer literal one. Broadcasting treats
    /// such dimensions as expandable.
    pub fn is_one(&self, e: ExprRef) -> bool {
        self.as_int_imm(e) == Some(1)
    }

    // ------------------------------------------------------------------
    // Expression constructors
    // ------------------------------------------------------------------

    fn push(&mut self, kind: ExprKind, dtype: ScalarType) -> ExprRef {
        self.exprs.push(Expr { kind, dtype });
        ExprRef::new(self.exprs.len() - 1)
    }

    pub fn int_imm(&mut self, value: i32) -> ExprRef {
        self.push(ExprKind::IntImm(value), ScalarType::Int32)
    }

    pub fn float_imm(&mut self, value: f32) -> ExprRef {
        self.push(ExprKind::FloatImm(value), ScalarType::Float32)
    }

    /// Zero literal of the given type (`Bool` zero is an integer zero cast).
    pub fn zero(&mut self, dtype: ScalarType) -> ExprRef {
        match dtype {
            ScalarType::Float32 => self.float_imm(0.0),
            ScalarType::Int32 => self.int_imm(0),
            ScalarType::Bool => {
                let z = self.int_imm(0);
                self.cast(z, ScalarType::Bool)
            }
        }
    }

    pub fn var_expr(&mut self, v: VarId) -> ExprRef {
        let dtype = self.var(v).dtype;
        self.push(ExprKind::Var(v), dtype)
    }

    /// Conversion to `dtype`; returns the operand unchanged when the type
    /// already matches.
    pub fn cast(&mut self, src: ExprRef, dtype: ScalarType) -> ExprRef {
        if self.dtype(src) == dtype {
            return src;
        }
        self.push(ExprKind::Cast(src), dtype)
    }

    /// Binary operator; operands must share a type (the builder promotes
    /// before constructing bodies, index arithmetic is uniformly `Int32`).
    pub fn binary(&mut self, op: BinaryOp, lhs: ExprRef, rhs: ExprRef) -> ExprRef {
        let dtype = self.dtype(lhs).promote(self.dtype(rhs));
        self.push(ExprKind::Binary { op, lhs, rhs }, dtype)
    }

    pub fn add(&mut self, lhs: ExprRef, rhs: ExprRef) -> ExprRef {
        self.binary(BinaryOp::Add, lhs, rhs)
    }

    pub fn sub(&mut self, lhs: ExprRef, rhs: ExprRef) -> ExprRef {
        self.binary(BinaryOp::Sub, lhs, rhs)
    }

    pub fn mul(&mut self, lhs: ExprRef, rhs: ExprRef) -> ExprRef {
        self.binary(BinaryOp::Mul, lhs, rhs)
    }

    pub fn div(&mut self, lhs: ExprRef, rhs: ExprRef) -> ExprRef {
        self.binary(BinaryOp::Div, lhs, rhs)
    }

    pub fn compare(&mut self, op: CompareOp, lhs: ExprRef, rhs: ExprRef) -> ExprRef {
        self.push(ExprKind::Compare { op, lhs, rhs }, ScalarType::Bool)
    }

    pub fn select(&mut self, cond: ExprRef, on_true: ExprRef, on_false: ExprRef) -> ExprRef {
        let dtype = self.dtype(on_true);
        self.push(ExprKind::Select { cond, on_true, on_false }, dtype)
    }

    /// Math primitive. `Abs` and the rounding family keep the operand type;
    /// everything else is floating-valued.
    pub fn intrinsic(&mut self, op: IntrinsicOp, args: impl IntoIterator<Item = ExprRef>) -> ExprRef {
        let args: SmallVec<[ExprRef; 2]> = args.into_iter().collect();
        debug_assert_eq!(args.len(), op.arity(), "intrinsic arity mismatch");
        let dtype = match op {
            IntrinsicOp::Abs
            | IntrinsicOp::Ceil
            | IntrinsicOp::Floor
            | IntrinsicOp::Round
            | IntrinsicOp::Trunc => self.dtype(args[0]),
            _ => ScalarType::Float32,
        };
        self.push(ExprKind::Intrinsic { op, args }, dtype)
    }

    pub fn load(&mut self, buf: BufId, index: ExprRef) -> ExprRef {
        let dtype = self.buf(buf).dtype;
        self.push(ExprKind::Load { buf, index }, dtype)
    }

    /// Invoke a symbolic tensor at the given axis coordinates.
    pub fn call(&mut self, tensor: TensorId, args: impl IntoIterator<Item = ExprRef>) -> ExprRef {
        let args: SmallVec<[ExprRef; 4]> = args.into_iter().collect();
        debug_assert_eq!(args.len(), self.tensor(tensor).rank(), "call arity must match tensor rank");
        let dtype = self.dtype(self.tensor(tensor).body);
        self.push(ExprKind::Call { tensor, args }, dtype)
    }

    // ------------------------------------------------------------------
    // Statement constructors
    // ------------------------------------------------------------------

    fn push_stmt(&mut self, stmt: Stmt) -> StmtRef {
        self.stmts.push(stmt);
        StmtRef::new(self.stmts.len() - 1)
    }

    pub fn store(&mut self, buf: BufId, index: ExprRef, value: ExprRef) -> StmtRef {
        self.push_stmt(Stmt::Store { buf, index, value })
    }

    pub fn for_loop(&mut self, var: VarId, extent: ExprRef, kind: LoopKind, body: StmtRef) -> StmtRef {
        self.push_stmt(Stmt::For { var, extent, kind, body })
    }

    pub fn if_then(&mut self, cond: ExprRef, body: StmtRef) -> StmtRef {
        self.push_stmt(Stmt::If { cond, body })
    }

    pub fn block(&mut self, stmts: Vec<StmtRef>) -> StmtRef {
        self.push_stmt(Stmt::Block(stmts))
    }
}
