//! Scalar element types for the fuze kernel compiler.
//!
//! Fused kernels operate on a deliberately small closed set of element
//! types: `Bool` (comparison results), `Int32`, and `Float32`. Implicit
//! promotion follows the "any float wins" rule: mixing an integer operand
//! with a floating one promotes the integers to `Float32` before the
//! operator body runs.


/// Scalar element type of a buffer, variable, or expression node.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[derive(strum::Display, strum::EnumIter)]
pub enum ScalarType {
    /// Boolean, produced by comparison operators. One byte in memory.
    Bool,
    /// 32-bit signed integer.
    Int32,
    /// 32-bit IEEE float.
    Float32,
}

impl ScalarType {
    /// Size of one element in bytes.
    pub const fn bytes(self) -> usize {
        match self {
            Self::Bool => 1,
            Self::Int32 => 4,
            Self::Float32 => 4,
        }
    }

    pub const fn is_int(self) -> bool {
        matches!(self, Self::Int32)
    }

    pub const fn is_float(self) -> bool {
        matches!(self, Self::Float32)
    }

    /// Common type of two operands under implicit promotion.
    ///
    /// Any floating operand promotes the pair to `Float32`; `Bool` promotes
    /// to the other operand's type (comparisons feed arithmetic as 0/1).
    pub fn promote(self, other: Self) -> Self {
        match (self, other) {
            (Self::Float32, _) | (_, Self::Float32) => Self::Float32,
            (Self::Int32, _) | (_, Self::Int32) => Self::Int32,
            (Self::Bool, Self::Bool) => Self::Bool,
        }
    }

    /// Common type of a whole operand list, `None` when empty.
    pub fn promote_all(types: impl IntoIterator<Item = Self>) -> Option<Self> {
        types.into_iter().reduce(Self::promote)
    }
}
