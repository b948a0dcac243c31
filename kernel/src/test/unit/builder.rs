use fuze_dtype::ScalarType;
use fuze_ir::{Arena, BinaryOp, ExprKind, IntrinsicOp};
use test_case::test_case;

use crate::builder::{pow_literal, KernelBuilder};
use crate::graph::{ConstAttr, Dim, Subgraph, TensorType, ValueType};

fn tensor(dtype: ScalarType, sizes: &[i64]) -> ValueType {
    ValueType::Tensor(TensorType::contiguous(dtype, sizes.iter().map(|&s| Dim::Static(s))))
}

fn built(graph: &Subgraph) -> KernelBuilder<'_> {
    let mut builder = KernelBuilder::new(graph);
    for &input in graph.inputs() {
        builder.bind_input(input).unwrap();
    }
    for node in graph.nodes() {
        builder.build_node(node).unwrap();
    }
    builder
}

#[test]
fn broadcast_aligns_trailing_dims() {
    let mut graph = Subgraph::new();
    let a = graph.add_input("a", tensor(ScalarType::Float32, &[3, 1, 5]));
    let b = graph.add_input("b", tensor(ScalarType::Float32, &[4, 5]));
    let prod = graph.add_op("aten::mul", [a, b], tensor(ScalarType::Float32, &[3, 4, 5]));
    graph.mark_output(prod);

    let builder = built(&graph);
    let def = builder.arena.tensor(builder.tensors[&prod]);
    let dims: Vec<i32> = def.dims.iter().map(|&d| builder.arena.as_int_imm(d).unwrap()).collect();
    assert_eq!(dims, vec![3, 4, 5]);
}

#[test]
fn mixed_operands_promote_to_float() {
    let mut graph = Subgraph::new();
    let a = graph.add_input("a", tensor(ScalarType::Int32, &[4]));
    let b = graph.add_input("b", tensor(ScalarType::Float32, &[4]));
    let prod = graph.add_op("aten::mul", [a, b], tensor(ScalarType::Float32, &[4]));
    graph.mark_output(prod);

    let builder = built(&graph);
    let def = builder.arena.tensor(builder.tensors[&prod]);
    assert_eq!(builder.arena.dtype(def.body), ScalarType::Float32);
}

#[test]
fn float_body_demotes_to_declared_int_output() {
    let mut graph = Subgraph::new();
    let a = graph.add_input("a", tensor(ScalarType::Int32, &[4]));
    let b = graph.add_input("b", tensor(ScalarType::Float32, &[4]));
    let prod = graph.add_op("aten::mul", [a, b], tensor(ScalarType::Int32, &[4]));
    graph.mark_output(prod);

    let builder = built(&graph);
    let def = builder.arena.tensor(builder.tensors[&prod]);
    assert_eq!(builder.arena.dtype(def.body), ScalarType::Int32);
    assert!(matches!(builder.arena.expr(def.body).kind, ExprKind::Cast(_)));
}

#[test]
fn comparison_yields_bool_tensor() {
    let mut graph = Subgraph::new();
    let a = graph.add_input("a", tensor(ScalarType::Float32, &[4]));
    let b = graph.add_input("b", tensor(ScalarType::Float32, &[4]));
    let mask = graph.add_op("aten::lt", [a, b], tensor(ScalarType::Bool, &[4]));
    graph.mark_output(mask);

    let builder = built(&graph);
    let def = builder.arena.tensor(builder.tensors[&mask]);
    assert_eq!(builder.arena.dtype(def.body), ScalarType::Bool);
}

#[test]
fn clamp_with_absent_bound_elides_comparison() {
    let mut graph = Subgraph::new();
    let a = graph.add_input("a", tensor(ScalarType::Float32, &[4]));
    let lo = graph.constant(ConstAttr::Float(0.0));
    let hi = graph.constant(ConstAttr::None);
    let clamped = graph.add_op("aten::clamp", [a, lo, hi], tensor(ScalarType::Float32, &[4]));
    graph.mark_output(clamped);

    let builder = built(&graph);
    let def = builder.arena.tensor(builder.tensors[&clamped]);
    // Only the lower bound survives, as a max.
    assert!(matches!(
        builder.arena.expr(def.body).kind,
        ExprKind::Binary { op: BinaryOp::Max, .. }
    ));
}

#[test]
fn unknown_operator_is_rejected() {
    let mut graph = Subgraph::new();
    let a = graph.add_input("a", tensor(ScalarType::Float32, &[4]));
    let out = graph.add_op("aten::conv2d", [a], tensor(ScalarType::Float32, &[4]));
    graph.mark_output(out);

    let mut builder = KernelBuilder::new(&graph);
    for &input in graph.inputs() {
        builder.bind_input(input).unwrap();
    }
    let err = builder.build_node(&graph.nodes()[0]).unwrap_err();
    assert!(err.to_string().contains("aten::conv2d"));
}

#[test]
fn squared_literal_lowers_to_multiply() {
    let mut arena = Arena::new();
    let x = arena.new_var("x", ScalarType::Float32);
    let xe = arena.var_expr(x);
    let reduced = pow_literal(&mut arena, xe, 2.0, true).unwrap();
    assert!(matches!(arena.expr(reduced).kind, ExprKind::Binary { op: BinaryOp::Mul, .. }));
}

#[test]
fn half_literal_lowers_to_sqrt_for_float_exponents_only() {
    let mut arena = Arena::new();
    let x = arena.new_var("x", ScalarType::Float32);
    let xe = arena.var_expr(x);
    let root = pow_literal(&mut arena, xe, 0.5, true).unwrap();
    assert!(matches!(
        arena.expr(root).kind,
        ExprKind::Intrinsic { op: IntrinsicOp::Sqrt, .. }
    ));
    assert!(pow_literal(&mut arena, xe, 0.5, false).is_none());
}

#[test_case(5.0 ; "large exponent")]
#[test_case(1.5 ; "fractional exponent")]
#[test_case(-3.0 ; "negative cube")]
fn irreducible_exponents_fall_back(exponent: f32) {
    let mut arena = Arena::new();
    let x = arena.new_var("x", ScalarType::Float32);
    let xe = arena.var_expr(x);
    assert!(pow_literal(&mut arena, xe, exponent, true).is_none());
}

#[test]
fn scalar_operand_broadcasts_as_rank_one() {
    let mut graph = Subgraph::new();
    let a = graph.add_input("a", tensor(ScalarType::Float32, &[2, 3]));
    let s = graph.add_input("s", ValueType::Float);
    let prod = graph.add_op("aten::mul", [a, s], tensor(ScalarType::Float32, &[2, 3]));
    graph.mark_output(prod);

    let builder = built(&graph);
    let def = builder.arena.tensor(builder.tensors[&prod]);
    let dims: Vec<i32> = def.dims.iter().map(|&d| builder.arena.as_int_imm(d).unwrap()).collect();
    assert_eq!(dims, vec![2, 3]);
}

#[test]
fn list_input_is_rejected() {
    let mut graph = Subgraph::new();
    graph.add_input("xs", ValueType::List);
    let mut builder = KernelBuilder::new(&graph);
    assert!(builder.bind_input(graph.inputs()[0]).is_err());
}
