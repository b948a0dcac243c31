//! Scalar expression nodes.
//!
//! Every expression carries its element type, computed once when the node is
//! created by the [`Arena`](crate::Arena) constructors. Index arithmetic is
//! `Int32`; comparison nodes are `Bool`.

use smallvec::SmallVec;

use fuze_dtype::ScalarType;

use crate::arena::{BufId, ExprRef, TensorId, VarId};

/// An expression node: operator kind plus resolved element type.
#[derive(Debug, Clone, PartialEq)]
pub struct Expr {
    pub kind: ExprKind,
    pub dtype: ScalarType,
}

/// Expression operator kinds.
#[derive(Debug, Clone, PartialEq)]
pub enum ExprKind {
    /// Integer literal.
    IntImm(i32),
    /// Floating literal.
    FloatImm(f32),
    /// Reference to a symbolic variable (axis, size, stride, or scalar input).
    Var(VarId),
    /// Element type conversion; the target type is the node's `dtype`.
    Cast(ExprRef),
    /// Arithmetic or min/max binary operator over same-typed operands.
    Binary { op: BinaryOp, lhs: ExprRef, rhs: ExprRef },
    /// Comparison; always `Bool`-typed.
    Compare { op: CompareOp, lhs: ExprRef, rhs: ExprRef },
    /// Conditional selection between two same-typed branches.
    Select { cond: ExprRef, on_true: ExprRef, on_false: ExprRef },
    /// Scalar math primitive (transcendental, rounding, pow, fmod).
    Intrinsic { op: IntrinsicOp, args: SmallVec<[ExprRef; 2]> },
    /// Read one element of a buffer at a linear index.
    Load { buf: BufId, index: ExprRef },
    /// Invocation of a symbolic tensor at explicit axis coordinates.
    ///
    /// Calls only exist during construction and lowering; inlining and the
    /// output-buffer rewrite eliminate every call before code generation.
    Call { tensor: TensorId, args: SmallVec<[ExprRef; 4]> },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BinaryOp {
    Add,
    Sub,
    Mul,
    Div,
    /// Remainder; used for index decomposition on integers.
    Mod,
    Min,
    Max,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CompareOp {
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
}

/// Scalar math primitives with direct backend equivalents.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum IntrinsicOp {
    Sin,
    Cos,
    Tan,
    Asin,
    Acos,
    Atan,
    Atan2,
    Sinh,
    Cosh,
    Tanh,
    Exp,
    Expm1,
    Log,
    Log2,
    Log10,
    Erf,
    Erfc,
    Lgamma,
    Sqrt,
    Rsqrt,
    Abs,
    Ceil,
    Floor,
    Round,
    Trunc,
    Pow,
    Fmod,
}

impl IntrinsicOp {
    /// Number of operands the primitive takes.
    pub const fn arity(self) -> usize {
        match self {
            Self::Atan2 | Self::Pow | Self::Fmod => 2,
            _ => 1,
        }
    }
}
