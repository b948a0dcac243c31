use std::sync::Arc;

use fuze_dtype::ScalarType;
use fuze_ir::{Arena, LoopKind};

use crate::{CallArg, CodeObject, GridObject, Param, Program};

#[test]
fn block_thread_pairs_resolve_the_launch() {
    // 2 blocks x 3 threads over a 6-element output.
    let mut a = Arena::new();
    let out = a.new_buf("out", ScalarType::Int32);
    let block = a.new_var("blockIdx", ScalarType::Int32);
    let thread = a.new_var("threadIdx", ScalarType::Int32);

    let bv = a.var_expr(block);
    let tv = a.var_expr(thread);
    let three = a.int_imm(3);
    let scaled = a.mul(bv, three);
    let idx = a.add(scaled, tv);
    let store = a.store(out, idx, idx);
    let thread_extent = a.int_imm(3);
    let threads = a.for_loop(thread, thread_extent, LoopKind::GridThread, store);
    let block_extent = a.int_imm(2);
    let root = a.for_loop(block, block_extent, LoopKind::GridBlock, threads);

    let obj = GridObject::build(Program {
        name: "k".into(),
        arena: Arc::new(a),
        root,
        params: vec![Param::Buffer(out)],
    });
    assert_eq!(obj.launch(), &[(2, 3)]);

    let mut data = vec![-1i32; 6];
    obj.call(&[CallArg::Ptr(data.as_mut_ptr() as *mut u8)]).unwrap();
    assert_eq!(data, vec![0, 1, 2, 3, 4, 5]);
}

#[test]
fn dynamic_extents_stay_out_of_the_launch() {
    let mut a = Arena::new();
    let out = a.new_buf("out", ScalarType::Int32);
    let n = a.new_var("n", ScalarType::Int32);
    let i = a.new_var("i", ScalarType::Int32);

    let iv = a.var_expr(i);
    let store = a.store(out, iv, iv);
    let extent = a.var_expr(n);
    let root = a.for_loop(i, extent, LoopKind::Serial, store);

    let obj = GridObject::build(Program {
        name: "k".into(),
        arena: Arc::new(a),
        root,
        params: vec![Param::Buffer(out), Param::Scalar(n)],
    });
    assert!(obj.launch().is_empty());

    let mut data = vec![-1i32; 3];
    obj.call(&[CallArg::Ptr(data.as_mut_ptr() as *mut u8), CallArg::Int(3)]).unwrap();
    assert_eq!(data, vec![0, 1, 2]);
}
