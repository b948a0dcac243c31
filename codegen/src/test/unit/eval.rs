use std::sync::Arc;

use fuze_dtype::ScalarType;
use fuze_ir::{Arena, BinaryOp, CompareOp, IntrinsicOp, LoopKind};
use test_case::test_case;

use crate::{CallArg, CodeObject, Error, EvalObject, Param, Program};

fn program(arena: Arena, root: fuze_ir::StmtRef, params: Vec<Param>) -> Program {
    Program { name: "k".into(), arena: Arc::new(arena), root, params }
}

#[test]
fn fill_loop_writes_every_element() {
    let mut a = Arena::new();
    let out = a.new_buf("out", ScalarType::Int32);
    let i = a.new_var("i", ScalarType::Int32);

    let iv = a.var_expr(i);
    let two = a.int_imm(2);
    let value = a.mul(iv, two);
    let store = a.store(out, iv, value);
    let extent = a.int_imm(4);
    let root = a.for_loop(i, extent, LoopKind::Serial, store);

    let obj = EvalObject::build(program(a, root, vec![Param::Buffer(out)]));
    let mut data = vec![0i32; 4];
    obj.call(&[CallArg::Ptr(data.as_mut_ptr() as *mut u8)]).unwrap();
    assert_eq!(data, vec![0, 2, 4, 6]);
}

#[test]
fn elementwise_add_over_two_inputs() {
    let mut a = Arena::new();
    let lhs = a.new_buf("lhs", ScalarType::Float32);
    let rhs = a.new_buf("rhs", ScalarType::Float32);
    let out = a.new_buf("out", ScalarType::Float32);
    let i = a.new_var("i", ScalarType::Int32);

    let iv = a.var_expr(i);
    let l = a.load(lhs, iv);
    let r = a.load(rhs, iv);
    let sum = a.add(l, r);
    let store = a.store(out, iv, sum);
    let extent = a.int_imm(3);
    let root = a.for_loop(i, extent, LoopKind::Serial, store);

    let obj = EvalObject::build(program(
        a,
        root,
        vec![Param::Buffer(lhs), Param::Buffer(rhs), Param::Buffer(out)],
    ));
    let mut x = vec![1.0f32, 2.0, 3.0];
    let mut y = vec![10.0f32, 20.0, 30.0];
    let mut z = vec![0.0f32; 3];
    obj.call(&[
        CallArg::Ptr(x.as_mut_ptr() as *mut u8),
        CallArg::Ptr(y.as_mut_ptr() as *mut u8),
        CallArg::Ptr(z.as_mut_ptr() as *mut u8),
    ])
    .unwrap();
    assert_eq!(z, vec![11.0, 22.0, 33.0]);
}

#[test]
fn guard_masks_trailing_iterations() {
    // Two-level split of a 5-element output: 2 blocks of 3 with a bounds
    // guard on the fused index.
    let mut a = Arena::new();
    let out = a.new_buf("out", ScalarType::Int32);
    let outer = a.new_var("outer", ScalarType::Int32);
    let inner = a.new_var("inner", ScalarType::Int32);

    let ov = a.var_expr(outer);
    let iv = a.var_expr(inner);
    let three = a.int_imm(3);
    let scaled = a.mul(ov, three);
    let idx = a.add(scaled, iv);
    let one = a.int_imm(1);
    let value = a.add(idx, one);
    let store = a.store(out, idx, value);
    let five = a.int_imm(5);
    let in_bounds = a.compare(CompareOp::Lt, idx, five);
    let guarded = a.if_then(in_bounds, store);
    let inner_extent = a.int_imm(3);
    let inner_loop = a.for_loop(inner, inner_extent, LoopKind::Serial, guarded);
    let outer_extent = a.int_imm(2);
    let root = a.for_loop(outer, outer_extent, LoopKind::Serial, inner_loop);

    let obj = EvalObject::build(program(a, root, vec![Param::Buffer(out)]));
    let mut data = vec![0i32; 5];
    obj.call(&[CallArg::Ptr(data.as_mut_ptr() as *mut u8)]).unwrap();
    assert_eq!(data, vec![1, 2, 3, 4, 5]);
}

#[test]
fn scalar_parameter_drives_the_extent() {
    let mut a = Arena::new();
    let out = a.new_buf("out", ScalarType::Int32);
    let n = a.new_var("n", ScalarType::Int32);
    let i = a.new_var("i", ScalarType::Int32);

    let iv = a.var_expr(i);
    let store = a.store(out, iv, iv);
    let extent = a.var_expr(n);
    let root = a.for_loop(i, extent, LoopKind::Serial, store);

    let obj = EvalObject::build(program(a, root, vec![Param::Buffer(out), Param::Scalar(n)]));

    let mut data = vec![-1i32; 4];
    obj.call(&[CallArg::Ptr(data.as_mut_ptr() as *mut u8), CallArg::Int(2)]).unwrap();
    assert_eq!(data, vec![0, 1, -1, -1]);

    let mut data = vec![-1i32; 4];
    obj.call(&[CallArg::Ptr(data.as_mut_ptr() as *mut u8), CallArg::Int(4)]).unwrap();
    assert_eq!(data, vec![0, 1, 2, 3]);
}

#[test_case(BinaryOp::Add => 10 ; "add")]
#[test_case(BinaryOp::Sub => 4 ; "sub")]
#[test_case(BinaryOp::Mul => 21 ; "mul")]
#[test_case(BinaryOp::Div => 2 ; "div truncates")]
#[test_case(BinaryOp::Mod => 1 ; "modulo")]
#[test_case(BinaryOp::Min => 3 ; "min")]
#[test_case(BinaryOp::Max => 7 ; "max")]
fn integer_binary_ops(op: BinaryOp) -> i32 {
    let mut a = Arena::new();
    let out = a.new_buf("out", ScalarType::Int32);
    let lhs = a.int_imm(7);
    let rhs = a.int_imm(3);
    let value = a.binary(op, lhs, rhs);
    let zero = a.int_imm(0);
    let root = a.store(out, zero, value);

    let obj = EvalObject::build(program(a, root, vec![Param::Buffer(out)]));
    let mut data = vec![0i32; 1];
    obj.call(&[CallArg::Ptr(data.as_mut_ptr() as *mut u8)]).unwrap();
    data[0]
}

#[test]
fn intrinsics_keep_integers_integral() {
    let mut a = Arena::new();
    let out = a.new_buf("out", ScalarType::Int32);
    let i = a.new_var("i", ScalarType::Int32);

    let iv = a.var_expr(i);
    let two = a.int_imm(2);
    let shifted = a.sub(iv, two);
    let value = a.intrinsic(IntrinsicOp::Abs, [shifted]);
    let store = a.store(out, iv, value);
    let extent = a.int_imm(4);
    let root = a.for_loop(i, extent, LoopKind::Serial, store);

    let obj = EvalObject::build(program(a, root, vec![Param::Buffer(out)]));
    let mut data = vec![0i32; 4];
    obj.call(&[CallArg::Ptr(data.as_mut_ptr() as *mut u8)]).unwrap();
    assert_eq!(data, vec![2, 1, 0, 1]);
}

#[test]
fn float_intrinsic_matches_std() {
    let mut a = Arena::new();
    let inp = a.new_buf("inp", ScalarType::Float32);
    let out = a.new_buf("out", ScalarType::Float32);
    let i = a.new_var("i", ScalarType::Int32);

    let iv = a.var_expr(i);
    let x = a.load(inp, iv);
    let value = a.intrinsic(IntrinsicOp::Tanh, [x]);
    let store = a.store(out, iv, value);
    let extent = a.int_imm(3);
    let root = a.for_loop(i, extent, LoopKind::Serial, store);

    let obj = EvalObject::build(program(a, root, vec![Param::Buffer(inp), Param::Buffer(out)]));
    let mut x = vec![-1.0f32, 0.0, 0.5];
    let mut y = vec![0.0f32; 3];
    obj.call(&[CallArg::Ptr(x.as_mut_ptr() as *mut u8), CallArg::Ptr(y.as_mut_ptr() as *mut u8)])
        .unwrap();
    for (got, src) in y.iter().zip(&x) {
        assert!((got - src.tanh()).abs() < 1e-6);
    }
}

#[test]
fn argument_count_is_checked() {
    let mut a = Arena::new();
    let out = a.new_buf("out", ScalarType::Int32);
    let zero = a.int_imm(0);
    let root = a.store(out, zero, zero);

    let obj = EvalObject::build(program(a, root, vec![Param::Buffer(out)]));
    let err = obj.call(&[]).unwrap_err();
    assert!(matches!(err, Error::ArgumentCountMismatch { expected: 1, actual: 0 }));
}

#[test]
fn argument_kind_is_checked() {
    let mut a = Arena::new();
    let out = a.new_buf("out", ScalarType::Int32);
    let zero = a.int_imm(0);
    let root = a.store(out, zero, zero);

    let obj = EvalObject::build(program(a, root, vec![Param::Buffer(out)]));
    let err = obj.call(&[CallArg::Int(7)]).unwrap_err();
    assert!(matches!(err, Error::ArgumentKindMismatch { index: 0 }));
}

#[test]
fn integer_division_by_zero_fails() {
    let mut a = Arena::new();
    let out = a.new_buf("out", ScalarType::Int32);
    let one = a.int_imm(1);
    let zero = a.int_imm(0);
    let quotient = a.binary(BinaryOp::Div, one, zero);
    let root = a.store(out, zero, quotient);

    let obj = EvalObject::build(program(a, root, vec![Param::Buffer(out)]));
    let mut data = vec![0i32; 1];
    let err = obj.call(&[CallArg::Ptr(data.as_mut_ptr() as *mut u8)]).unwrap_err();
    assert!(matches!(err, Error::Execution { .. }));
}
