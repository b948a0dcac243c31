//! Arena construction and typing tests.

use fuze_dtype::ScalarType;
use test_case::test_case;

use crate::{Arena, BinaryOp, CompareOp, ExprKind, IntrinsicOp};

#[test]
fn imm_types() {
    let mut a = Arena::new();
    let i = a.int_imm(3);
    let f = a.float_imm(1.5);
    assert_eq!(a.dtype(i), ScalarType::Int32);
    assert_eq!(a.dtype(f), ScalarType::Float32);
    assert_eq!(a.as_int_imm(i), Some(3));
    assert_eq!(a.as_float_imm(f), Some(1.5));
    assert_eq!(a.as_int_imm(f), None);
}

#[test]
fn cast_is_identity_on_same_type() {
    let mut a = Arena::new();
    let f = a.float_imm(2.0);
    assert_eq!(a.cast(f, ScalarType::Float32), f);
    let c = a.cast(f, ScalarType::Int32);
    assert_ne!(c, f);
    assert_eq!(a.dtype(c), ScalarType::Int32);
}

#[test]
fn binary_promotes_mixed_operands() {
    let mut a = Arena::new();
    let i = a.int_imm(3);
    let f = a.float_imm(1.5);
    let s = a.binary(BinaryOp::Add, i, f);
    assert_eq!(a.dtype(s), ScalarType::Float32);
}

#[test]
fn compare_is_bool() {
    let mut a = Arena::new();
    let x = a.int_imm(1);
    let y = a.int_imm(2);
    let c = a.compare(CompareOp::Lt, x, y);
    assert_eq!(a.dtype(c), ScalarType::Bool);
}

#[test_case(IntrinsicOp::Abs, ScalarType::Int32 => ScalarType::Int32 ; "abs keeps int")]
#[test_case(IntrinsicOp::Floor, ScalarType::Int32 => ScalarType::Int32 ; "floor keeps int")]
#[test_case(IntrinsicOp::Ceil, ScalarType::Float32 => ScalarType::Float32 ; "ceil keeps float")]
#[test_case(IntrinsicOp::Sqrt, ScalarType::Int32 => ScalarType::Float32 ; "sqrt promotes")]
#[test_case(IntrinsicOp::Exp, ScalarType::Int32 => ScalarType::Float32 ; "exp promotes")]
fn intrinsic_types(op: IntrinsicOp, operand: ScalarType) -> ScalarType {
    let mut a = Arena::new();
    let x = match operand {
        ScalarType::Float32 => a.float_imm(0.5),
        _ => a.int_imm(-4),
    };
    let e = a.intrinsic(op, [x]);
    a.dtype(e)
}

#[test]
fn load_takes_buffer_type() {
    let mut a = Arena::new();
    let buf = a.new_buf("t0", ScalarType::Float32);
    let idx = a.int_imm(0);
    let ld = a.load(buf, idx);
    assert_eq!(a.dtype(ld), ScalarType::Float32);
    assert!(matches!(a.expr(ld).kind, ExprKind::Load { .. }));
}

#[test]
fn var_expr_takes_decl_type() {
    let mut a = Arena::new();
    let v = a.new_var("size_0", ScalarType::Int32);
    let e = a.var_expr(v);
    assert_eq!(a.dtype(e), ScalarType::Int32);
    assert_eq!(a.var(v).name, "size_0");
}
