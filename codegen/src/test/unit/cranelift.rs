use std::sync::Arc;

use fuze_dtype::ScalarType;
use fuze_ir::{Arena, IntrinsicOp, LoopKind};

use crate::{CallArg, CodeObject, CraneliftObject, Param, Program};

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

    let obj = CraneliftObject::build(program(a, root, vec![Param::Buffer(out)])).unwrap();
    let mut data = vec![0i32; 4];
    obj.call(&[CallArg::Ptr(data.as_mut_ptr() as *mut u8)]).unwrap();
    assert_eq!(data, vec![0, 2, 4, 6]);
}

#[test]
fn float_scalar_parameter_scales_the_input() {
    let mut a = Arena::new();
    let inp = a.new_buf("inp", ScalarType::Float32);
    let out = a.new_buf("out", ScalarType::Float32);
    let scale = a.new_var("scale", ScalarType::Float32);
    let i = a.new_var("i", ScalarType::Int32);

    let iv = a.var_expr(i);
    let x = a.load(inp, iv);
    let s = a.var_expr(scale);
    let value = a.mul(x, s);
    let store = a.store(out, iv, value);
    let extent = a.int_imm(3);
    let root = a.for_loop(i, extent, LoopKind::Serial, store);

    let obj = CraneliftObject::build(program(
        a,
        root,
        vec![Param::Buffer(inp), Param::Scalar(scale), Param::Buffer(out)],
    ))
    .unwrap();
    let mut x = vec![1.0f32, 2.0, 3.0];
    let mut y = vec![0.0f32; 3];
    obj.call(&[
        CallArg::Ptr(x.as_mut_ptr() as *mut u8),
        CallArg::Float(2.5),
        CallArg::Ptr(y.as_mut_ptr() as *mut u8),
    ])
    .unwrap();
    assert_eq!(y, vec![2.5, 5.0, 7.5]);
}

#[test]
fn libcall_intrinsic_matches_std() {
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

    let obj = CraneliftObject::build(program(
        a,
        root,
        vec![Param::Buffer(inp), Param::Buffer(out)],
    ))
    .unwrap();
    let mut x = vec![-1.0f32, 0.0, 0.5];
    let mut y = vec![0.0f32; 3];
    obj.call(&[CallArg::Ptr(x.as_mut_ptr() as *mut u8), CallArg::Ptr(y.as_mut_ptr() as *mut u8)])
        .unwrap();
    for (got, src) in y.iter().zip(&x) {
        assert!((got - src.tanh()).abs() < 1e-6);
    }
}
