//! Expression building: operator nodes to symbolic tensors.
//!
//! Nodes are translated one at a time in subgraph order. Each producing
//! operator yields a symbolic tensor whose shape is the trailing-aligned
//! broadcast of its operand shapes and whose body is a scalar expression
//! over per-axis operand expressions, with implicit any-float promotion
//! applied before the operator body and a narrowing cast back to the
//! declared output type after it.

use std::collections::HashMap;

use smallvec::SmallVec;

use fuze_dtype::ScalarType;
use fuze_ir::{Arena, BinaryOp, CompareOp, ExprRef, IntrinsicOp, TensorDef, TensorId, VarId};

use crate::binder::KernelArg;
use crate::error::{Result, UnhandledOperatorSnafu};
use crate::graph::{ConstAttr, Node, Subgraph, ValueId, ValueType};

/// The supported operator table. Parsing an identifier outside this set is
/// the `UnhandledOperator` construction error.
#[derive(Debug, Clone, Copy, PartialEq, Eq, strum::EnumString, strum::Display)]
pub(crate) enum OpKind {
    #[strum(serialize = "prim::Constant")]
    Constant,
    #[strum(serialize = "prim::ListConstruct")]
    ListConstruct,
    #[strum(serialize = "prim::ConstantChunk")]
    ConstantChunk,
    #[strum(serialize = "aten::add")]
    Add,
    #[strum(serialize = "aten::sub")]
    Sub,
    #[strum(serialize = "aten::mul")]
    Mul,
    #[strum(serialize = "aten::div")]
    Div,
    #[strum(serialize = "aten::addcmul")]
    Addcmul,
    #[strum(serialize = "aten::_cast_Float")]
    CastFloat,
    #[strum(serialize = "aten::eq")]
    Eq,
    #[strum(serialize = "aten::ne")]
    Ne,
    #[strum(serialize = "aten::ge")]
    Ge,
    #[strum(serialize = "aten::gt")]
    Gt,
    #[strum(serialize = "aten::le")]
    Le,
    #[strum(serialize = "aten::lt")]
    Lt,
    #[strum(serialize = "aten::min")]
    Min,
    #[strum(serialize = "aten::max")]
    Max,
    #[strum(serialize = "aten::clamp")]
    Clamp,
    #[strum(serialize = "aten::sigmoid")]
    Sigmoid,
    #[strum(serialize = "aten::reciprocal")]
    Reciprocal,
    #[strum(serialize = "aten::neg")]
    Neg,
    #[strum(serialize = "aten::relu")]
    Relu,
    #[strum(serialize = "aten::threshold")]
    Threshold,
    #[strum(serialize = "aten::log")]
    Log,
    #[strum(serialize = "aten::log10")]
    Log10,
    #[strum(serialize = "aten::log2")]
    Log2,
    #[strum(serialize = "aten::exp")]
    Exp,
    #[strum(serialize = "aten::expm1")]
    Expm1,
    #[strum(serialize = "aten::erf")]
    Erf,
    #[strum(serialize = "aten::erfc")]
    Erfc,
    #[strum(serialize = "aten::cos")]
    Cos,
    #[strum(serialize = "aten::sin")]
    Sin,
    #[strum(serialize = "aten::tan")]
    Tan,
    #[strum(serialize = "aten::acos")]
    Acos,
    #[strum(serialize = "aten::asin")]
    Asin,
    #[strum(serialize = "aten::atan")]
    Atan,
    #[strum(serialize = "aten::atan2")]
    Atan2,
    #[strum(serialize = "aten::cosh")]
    Cosh,
    #[strum(serialize = "aten::sinh")]
    Sinh,
    #[strum(serialize = "aten::tanh")]
    Tanh,
    #[strum(serialize = "aten::sqrt")]
    Sqrt,
    #[strum(serialize = "aten::rsqrt")]
    Rsqrt,
    #[strum(serialize = "aten::abs")]
    Abs,
    #[strum(serialize = "aten::ceil")]
    Ceil,
    #[strum(serialize = "aten::floor")]
    Floor,
    #[strum(serialize = "aten::round")]
    Round,
    #[strum(serialize = "aten::trunc")]
    Trunc,
    #[strum(serialize = "aten::frac")]
    Frac,
    #[strum(serialize = "aten::lgamma")]
    Lgamma,
    #[strum(serialize = "aten::pow")]
    Pow,
    #[strum(serialize = "aten::fmod")]
    Fmod,
    #[strum(serialize = "aten::remainder")]
    Remainder,
    #[strum(serialize = "aten::lerp")]
    Lerp,
    #[strum(serialize = "aten::type_as")]
    TypeAs,
    #[strum(serialize = "aten::cat")]
    Cat,
    #[strum(serialize = "aten::slice")]
    Slice,
    #[strum(serialize = "aten::unsqueeze")]
    Unsqueeze,
    #[strum(serialize = "aten::_sigmoid_backward")]
    SigmoidBackward,
    #[strum(serialize = "aten::_tanh_backward")]
    TanhBackward,
}

/// Per-kernel construction state: the arena, value bindings, and the
/// ordered kernel argument list.
pub(crate) struct KernelBuilder<'g> {
    pub graph: &'g Subgraph,
    pub arena: Arena,
    /// Tensor-valued bindings, graph value to symbolic tensor.
    pub tensors: HashMap<ValueId, TensorId>,
    /// Scalar input bindings, graph value to variable expression.
    pub scalars: HashMap<ValueId, ExprRef>,
    pub args: Vec<KernelArg>,
    axis_seq: usize,
    tensor_seq: usize,
}

impl<'g> KernelBuilder<'g> {
    pub(crate) fn new(graph: &'g Subgraph) -> Self {
        Self {
            graph,
            arena: Arena::new(),
            tensors: HashMap::new(),
            scalars: HashMap::new(),
            args: Vec::new(),
            axis_seq: 0,
            tensor_seq: 0,
        }
    }

    pub(crate) fn build_node(&mut self, node: &Node) -> Result<()> {
        let kind: OpKind = node
            .op
            .parse()
            .map_err(|_| UnhandledOperatorSnafu { op: node.op.clone() }.build())?;
        match kind {
            // Consumed inline where referenced, never materialized.
            OpKind::Constant | OpKind::ListConstruct => Ok(()),

            OpKind::Add => self.with_alpha(node, BinaryOp::Add),
            OpKind::Sub => self.with_alpha(node, BinaryOp::Sub),
            OpKind::Mul => self.binary(node, BinaryOp::Mul),
            OpKind::Div => self.binary(node, BinaryOp::Div),
            OpKind::Min => self.binary(node, BinaryOp::Min),
            OpKind::Max => self.binary(node, BinaryOp::Max),
            OpKind::Addcmul => {
                self.emit(node, &node.inputs, |ar, inp| {
                    let prod = ar.mul(inp[1], inp[2]);
                    let scaled = ar.mul(inp[3], prod);
                    ar.add(inp[0], scaled)
                })
            }

            OpKind::Eq => self.comparison(node, CompareOp::Eq),
            OpKind::Ne => self.comparison(node, CompareOp::Ne),
            OpKind::Ge => self.comparison(node, CompareOp::Ge),
            OpKind::Gt => self.comparison(node, CompareOp::Gt),
            OpKind::Le => self.comparison(node, CompareOp::Le),
            OpKind::Lt => self.comparison(node, CompareOp::Lt),

            OpKind::Clamp => self.build_clamp(node),
            OpKind::Threshold => {
                self.emit(node, &node.inputs, |ar, inp| {
                    let over = ar.compare(CompareOp::Gt, inp[0], inp[1]);
                    ar.select(over, inp[0], inp[2])
                })
            }

            OpKind::CastFloat => self.emit(node, &[node.inputs[0]], |ar, inp| {
                ar.cast(inp[0], ScalarType::Float32)
            }),
            OpKind::TypeAs => self.emit(node, &node.inputs, |ar, inp| {
                let target = ar.dtype(inp[1]);
                ar.cast(inp[0], target)
            }),

            OpKind::Sigmoid => self.emit(node, &[node.inputs[0]], |ar, inp| {
                let one = ar.float_imm(1.0);
                let zero = ar.float_imm(-0.0);
                let negated = ar.sub(zero, inp[0]);
                let e = ar.intrinsic(IntrinsicOp::Exp, [negated]);
                let denom = ar.add(one, e);
                ar.div(one, denom)
            }),
            OpKind::Reciprocal => self.emit(node, &[node.inputs[0]], |ar, inp| {
                let one = ar.float_imm(1.0);
                ar.div(one, inp[0])
            }),
            OpKind::Neg => self.emit(node, &[node.inputs[0]], |ar, inp| {
                let zero = ar.zero(ar.dtype(inp[0]));
                ar.sub(zero, inp[0])
            }),
            OpKind::Relu => self.emit(node, &[node.inputs[0]], |ar, inp| {
                let zero = ar.zero(ar.dtype(inp[0]));
                ar.binary(BinaryOp::Max, inp[0], zero)
            }),
            OpKind::Frac => self.emit(node, &[node.inputs[0]], |ar, inp| {
                let fl = ar.intrinsic(IntrinsicOp::Floor, [inp[0]]);
                ar.sub(inp[0], fl)
            }),

            OpKind::Log => self.unary_intrinsic(node, IntrinsicOp::Log),
            OpKind::Log10 => self.unary_intrinsic(node, IntrinsicOp::Log10),
            OpKind::Log2 => self.unary_intrinsic(node, IntrinsicOp::Log2),
            OpKind::Exp => self.unary_intrinsic(node, IntrinsicOp::Exp),
            OpKind::Expm1 => self.unary_intrinsic(node, IntrinsicOp::Expm1),
            OpKind::Erf => self.unary_intrinsic(node, IntrinsicOp::Erf),
            OpKind::Erfc => self.unary_intrinsic(node, IntrinsicOp::Erfc),
            OpKind::Cos => self.unary_intrinsic(node, IntrinsicOp::Cos),
            OpKind::Sin => self.unary_intrinsic(node, IntrinsicOp::Sin),
            OpKind::Tan => self.unary_intrinsic(node, IntrinsicOp::Tan),
            OpKind::Acos => self.unary_intrinsic(node, IntrinsicOp::Acos),
            OpKind::Asin => self.unary_intrinsic(node, IntrinsicOp::Asin),
            OpKind::Atan => self.unary_intrinsic(node, IntrinsicOp::Atan),
            OpKind::Cosh => self.unary_intrinsic(node, IntrinsicOp::Cosh),
            OpKind::Sinh => self.unary_intrinsic(node, IntrinsicOp::Sinh),
            OpKind::Tanh => self.unary_intrinsic(node, IntrinsicOp::Tanh),
            OpKind::Sqrt => self.unary_intrinsic(node, IntrinsicOp::Sqrt),
            OpKind::Rsqrt => self.unary_intrinsic(node, IntrinsicOp::Rsqrt),
            OpKind::Abs => self.unary_intrinsic(node, IntrinsicOp::Abs),
            OpKind::Ceil => self.unary_intrinsic(node, IntrinsicOp::Ceil),
            OpKind::Floor => self.unary_intrinsic(node, IntrinsicOp::Floor),
            OpKind::Round => self.unary_intrinsic(node, IntrinsicOp::Round),
            OpKind::Trunc => self.unary_intrinsic(node, IntrinsicOp::Trunc),
            OpKind::Lgamma => self.unary_intrinsic(node, IntrinsicOp::Lgamma),

            OpKind::Atan2 => self.emit(node, &node.inputs, |ar, inp| {
                ar.intrinsic(IntrinsicOp::Atan2, [inp[0], inp[1]])
            }),
            OpKind::Fmod => self.emit(node, &node.inputs, |ar, inp| {
                ar.intrinsic(IntrinsicOp::Fmod, [inp[0], inp[1]])
            }),
            // C-style two-step modulo, sign matching the divisor.
            OpKind::Remainder => self.emit(node, &node.inputs, |ar, inp| {
                let inner = ar.intrinsic(IntrinsicOp::Fmod, [inp[0], inp[1]]);
                let shifted = ar.add(inp[1], inner);
                ar.intrinsic(IntrinsicOp::Fmod, [shifted, inp[1]])
            }),
            OpKind::Pow => self.build_pow(node),
            OpKind::Lerp => self.emit(node, &node.inputs, |ar, inp| {
                let span = ar.sub(inp[1], inp[0]);
                let scaled = ar.mul(inp[2], span);
                ar.add(inp[0], scaled)
            }),

            OpKind::SigmoidBackward => self.emit(node, &node.inputs, |ar, inp| {
                let one = ar.float_imm(1.0);
                let complement = ar.sub(one, inp[1]);
                let grad = ar.mul(inp[0], inp[1]);
                ar.mul(grad, complement)
            }),
            OpKind::TanhBackward => self.emit(node, &node.inputs, |ar, inp| {
                let one = ar.float_imm(1.0);
                let squared = ar.mul(inp[1], inp[1]);
                let complement = ar.sub(one, squared);
                ar.mul(inp[0], complement)
            }),

            OpKind::Cat => self.build_cat(node),
            OpKind::Slice => self.build_slice(node),
            OpKind::Unsqueeze => self.build_unsqueeze(node),
            OpKind::ConstantChunk => self.build_chunk(node),
        }
    }

    // ------------------------------------------------------------------
    // Generic elementwise computation
    // ------------------------------------------------------------------

    /// Build one symbolic tensor for `node.outputs[0]`: broadcast the
    /// operand shapes, bind fresh axes, evaluate every operand at those
    /// axes, promote, apply `body`, and demote to the declared output type.
    fn compute<F>(&mut self, node: &Node, operands: &[ValueId], body: F) -> Result<TensorId>
    where
        F: FnOnce(&mut Arena, &[ExprRef]) -> ExprRef,
    {
        let out = node.outputs[0];
        let mut shape = self.value_shape(operands[0]);
        for &operand in &operands[1..] {
            let other = self.value_shape(operand);
            shape = self.broadcast_shapes(&shape, &other);
        }

        let (axes, axis_exprs) = self.fresh_axes(shape.len());
        let mut inputs = Vec::with_capacity(operands.len());
        for &operand in operands {
            inputs.push(self.operand_expr(operand, &axis_exprs)?);
        }
        self.promote(&mut inputs);

        let mut expr = body(&mut self.arena, &inputs);
        if let Some(declared) = self.declared_dtype(out) {
            if self.arena.dtype(expr).is_float() && declared.is_int() {
                expr = self.arena.cast(expr, declared);
            }
        }

        let name = self.tensor_name(&node.op);
        Ok(self.arena.new_tensor(TensorDef { name, dims: shape, axes, body: expr }))
    }

    fn emit<F>(&mut self, node: &Node, operands: &[ValueId], body: F) -> Result<()>
    where
        F: FnOnce(&mut Arena, &[ExprRef]) -> ExprRef,
    {
        let tensor = self.compute(node, operands, body)?;
        self.tensors.insert(node.outputs[0], tensor);
        Ok(())
    }

    fn binary(&mut self, node: &Node, op: BinaryOp) -> Result<()> {
        self.emit(node, &node.inputs, move |ar, inp| ar.binary(op, inp[0], inp[1]))
    }

    /// `lhs op alpha*rhs`, the weighted add/subtract family.
    fn with_alpha(&mut self, node: &Node, op: BinaryOp) -> Result<()> {
        self.emit(node, &node.inputs, move |ar, inp| {
            let scaled = ar.mul(inp[2], inp[1]);
            ar.binary(op, inp[0], scaled)
        })
    }

    fn comparison(&mut self, node: &Node, op: CompareOp) -> Result<()> {
        self.emit(node, &node.inputs, move |ar, inp| ar.compare(op, inp[0], inp[1]))
    }

    fn unary_intrinsic(&mut self, node: &Node, op: IntrinsicOp) -> Result<()> {
        self.emit(node, &[node.inputs[0]], move |ar, inp| ar.intrinsic(op, [inp[0]]))
    }

    fn build_clamp(&mut self, node: &Node) -> Result<()> {
        let (input, lo, hi) = (node.inputs[0], node.inputs[1], node.inputs[2]);
        // Absent bounds elide the comparison entirely.
        match (self.is_none_constant(lo), self.is_none_constant(hi)) {
            (true, true) => self.emit(node, &[input], |_, inp| inp[0]),
            (true, false) => self.emit(node, &[input, hi], |ar, inp| {
                ar.binary(BinaryOp::Min, inp[0], inp[1])
            }),
            (false, true) => self.emit(node, &[input, lo], |ar, inp| {
                ar.binary(BinaryOp::Max, inp[0], inp[1])
            }),
            (false, false) => self.emit(node, &[input, lo, hi], |ar, inp| {
                let capped = ar.binary(BinaryOp::Min, inp[0], inp[2]);
                ar.binary(BinaryOp::Max, capped, inp[1])
            }),
        }
    }

    fn build_pow(&mut self, node: &Node) -> Result<()> {
        let exponent = self.const_attr(node.inputs[1]);
        self.emit(node, &node.inputs, move |ar, inp| {
            let lhs = inp[0];
            let reduced = match exponent {
                Some(ConstAttr::Float(f)) => pow_literal(ar, lhs, f as f32, true),
                // An integer literal reaches the body cast to float; the
                // root forms do not apply to it.
                Some(ConstAttr::Int(i)) => pow_literal(ar, lhs, i as f32, false),
                _ => None,
            };
            match reduced {
                Some(expr) => expr,
                None => ar.intrinsic(IntrinsicOp::Pow, [lhs, inp[1]]),
            }
        })
    }

    // ------------------------------------------------------------------
    // Structural operators (index remapping, no new storage)
    // ------------------------------------------------------------------

    fn build_cat(&mut self, node: &Node) -> Result<()> {
        let graph = self.graph;
        let out = node.outputs[0];
        let items: SmallVec<[ValueId; 4]> = match graph.producer(node.inputs[0]) {
            Some((list, _)) if list.op == "prim::ListConstruct" => list.inputs.clone(),
            _ => return UnhandledOperatorSnafu { op: node.op.clone() }.fail(),
        };
        let dim = self.static_int(node.inputs[1]).ok_or_else(|| {
            UnhandledOperatorSnafu { op: node.op.clone() }.build()
        })? as usize;

        let dims = self.declared_dims(out)?;
        let (axes, axis_exprs) = self.fresh_axes(dims.len());

        // Nested conditional over ordered segments by cumulative offset
        // along the concatenation axis.
        let mut shifted = axis_exprs.clone();
        let mut expr = self.operand_expr(items[0], &shifted)?;
        let mut offset = self.tensor_dim_literal(items[0], dim)?;
        for &item in &items[1..] {
            let boundary = self.arena.int_imm(offset as i32);
            shifted[dim] = self.arena.sub(axis_exprs[dim], boundary);
            let segment = self.operand_expr(item, &shifted)?;
            let before = self.arena.compare(CompareOp::Lt, axis_exprs[dim], boundary);
            expr = self.arena.select(before, expr, segment);
            offset += self.tensor_dim_literal(item, dim)?;
        }

        let name = self.tensor_name(&node.op);
        let tensor = self.arena.new_tensor(TensorDef { name, dims, axes, body: expr });
        self.tensors.insert(out, tensor);
        Ok(())
    }

    fn build_slice(&mut self, node: &Node) -> Result<()> {
        let out = node.outputs[0];
        let dim = self.static_int(node.inputs[1]).ok_or_else(|| {
            UnhandledOperatorSnafu { op: node.op.clone() }.build()
        })? as usize;
        let start = self.constant_expr(node.inputs[2])?;
        let step = self.constant_expr(node.inputs[4])?;

        let dims = self.declared_dims(out)?;
        let (axes, axis_exprs) = self.fresh_axes(dims.len());
        let mut remapped = axis_exprs.clone();
        let scaled = self.arena.mul(step, axis_exprs[dim]);
        remapped[dim] = self.arena.add(scaled, start);
        let expr = self.operand_expr(node.inputs[0], &remapped)?;

        let name = self.tensor_name(&node.op);
        let tensor = self.arena.new_tensor(TensorDef { name, dims, axes, body: expr });
        self.tensors.insert(out, tensor);
        Ok(())
    }

    fn build_unsqueeze(&mut self, node: &Node) -> Result<()> {
        let out = node.outputs[0];
        let dims = self.declared_dims(out)?;
        let (axes, axis_exprs) = self.fresh_axes(dims.len());

        let mut dim = self.static_int(node.inputs[1]).ok_or_else(|| {
            UnhandledOperatorSnafu { op: node.op.clone() }.build()
        })?;
        if dim < 0 {
            dim += axis_exprs.len() as i64 - 1;
        }

        // The inserted axis has extent one; dropping it from the index list
        // recovers the operand's coordinates.
        let mut remapped = axis_exprs.clone();
        remapped.remove(dim as usize);
        let expr = self.operand_expr(node.inputs[0], &remapped)?;

        let name = self.tensor_name(&node.op);
        let tensor = self.arena.new_tensor(TensorDef { name, dims, axes, body: expr });
        self.tensors.insert(out, tensor);
        Ok(())
    }

    fn build_chunk(&mut self, node: &Node) -> Result<()> {
        let dim = node.attrs.dim.ok_or_else(|| {
            UnhandledOperatorSnafu { op: node.op.clone() }.build()
        })? as usize;
        for (piece, &out) in node.outputs.iter().enumerate() {
            let dims = self.declared_dims(out)?;
            let step = self.arena.as_int_imm(dims[dim]).ok_or_else(|| {
                UnhandledOperatorSnafu { op: node.op.clone() }.build()
            })? as i64;

            let (axes, axis_exprs) = self.fresh_axes(dims.len());
            let mut remapped = axis_exprs.clone();
            let offset = self.arena.int_imm((piece as i64 * step) as i32);
            remapped[dim] = self.arena.add(axis_exprs[dim], offset);
            let expr = self.operand_expr(node.inputs[0], &remapped)?;

            let name = self.tensor_name(&node.op);
            let tensor = self.arena.new_tensor(TensorDef { name, dims, axes, body: expr });
            self.tensors.insert(out, tensor);
        }
        Ok(())
    }

    // ------------------------------------------------------------------
    // Operand resolution
    // ------------------------------------------------------------------

    /// Shape of a value: its tensor dims, or `{1}` for scalars (a rank-1
    /// broadcast constant).
    fn value_shape(&mut self, value: ValueId) -> SmallVec<[ExprRef; 4]> {
        match self.tensors.get(&value) {
            Some(&t) => self.arena.tensor(t).dims.clone(),
            None => {
                let one = self.arena.int_imm(1);
                smallvec::smallvec![one]
            }
        }
    }

    /// Trailing-aligned broadcast of two shapes. A literal one is replaced
    /// by the other operand's size at that position.
    fn broadcast_shapes(&mut self, a: &[ExprRef], b: &[ExprRef]) -> SmallVec<[ExprRef; 4]> {
        let mut out: SmallVec<[ExprRef; 4]> = SmallVec::new();
        let mut left = a.iter().rev();
        let mut right = b.iter().rev();
        loop {
            match (left.next(), right.next()) {
                (None, None) => break,
                (Some(&x), None) => out.push(x),
                (None, Some(&y)) => out.push(y),
                (Some(&x), Some(&y)) => out.push(if self.arena.is_one(x) { y } else { x }),
            }
        }
        out.reverse();
        out
    }

    /// Evaluate an operand at the given output axes: a tensor is called at
    /// the trailing axes (broadcast dimensions index at zero), anything
    /// else resolves to a scalar expression.
    fn operand_expr(&mut self, value: ValueId, axes: &[ExprRef]) -> Result<ExprRef> {
        let Some(&tensor) = self.tensors.get(&value) else {
            return self.constant_expr(value);
        };
        let dims = self.arena.tensor(tensor).dims.clone();
        let trailing = &axes[axes.len() - dims.len()..];
        let mut call_args: SmallVec<[ExprRef; 4]> = SmallVec::with_capacity(dims.len());
        for (&dim, &axis) in dims.iter().zip(trailing) {
            call_args.push(if self.arena.is_one(dim) { self.arena.int_imm(0) } else { axis });
        }
        Ok(self.arena.call(tensor, call_args))
    }

    /// Scalar expression for a non-tensor value: a bound scalar input or a
    /// constant node payload. A `None` payload resolves to a zero literal;
    /// operators that accept absence check [`Self::is_none_constant`]
    /// before ever asking for the expression.
    fn constant_expr(&mut self, value: ValueId) -> Result<ExprRef> {
        if let Some(&expr) = self.scalars.get(&value) {
            return Ok(expr);
        }
        match self.const_attr(value) {
            Some(ConstAttr::Int(v)) => Ok(self.arena.int_imm(v as i32)),
            Some(ConstAttr::Float(v)) => Ok(self.arena.float_imm(v as f32)),
            Some(ConstAttr::None) => Ok(self.arena.int_imm(0)),
            None => UnhandledOperatorSnafu { op: self.graph.value(value).name.clone() }.fail(),
        }
    }

    fn const_attr(&self, value: ValueId) -> Option<ConstAttr> {
        let (node, _) = self.graph.producer(value)?;
        node.attrs.value
    }

    fn static_int(&self, value: ValueId) -> Option<i64> {
        match self.const_attr(value) {
            Some(ConstAttr::Int(v)) => Some(v),
            _ => None,
        }
    }

    fn is_none_constant(&self, value: ValueId) -> bool {
        matches!(self.const_attr(value), Some(ConstAttr::None))
    }

    /// Cast every integer operand to float when any operand is floating.
    fn promote(&mut self, inputs: &mut [ExprRef]) {
        let any_float = inputs.iter().any(|&e| self.arena.dtype(e).is_float());
        if !any_float {
            return;
        }
        for input in inputs.iter_mut() {
            if self.arena.dtype(*input).is_int() {
                *input = self.arena.cast(*input, ScalarType::Float32);
            }
        }
    }

    fn declared_dtype(&self, value: ValueId) -> Option<ScalarType> {
        match &self.graph.value(value).ty {
            ValueType::Tensor(tt) => Some(tt.dtype),
            _ => None,
        }
    }

    /// Declared output dims as literals. Structural operators remap indices
    /// of a fixed-size space and require static shapes.
    fn declared_dims(&mut self, value: ValueId) -> Result<SmallVec<[ExprRef; 4]>> {
        let graph = self.graph;
        let decl = graph.value(value);
        let ValueType::Tensor(tt) = &decl.ty else {
            return UnhandledOperatorSnafu { op: decl.name.clone() }.fail();
        };
        tt.dims
            .iter()
            .map(|d| match d {
                crate::graph::Dim::Static(s) => Ok(self.arena.int_imm(*s as i32)),
                crate::graph::Dim::Dynamic => {
                    UnhandledOperatorSnafu { op: format!("{} over a dynamic shape", decl.name) }.fail()
                }
            })
            .collect()
    }

    /// Literal extent of one dimension of a bound tensor value.
    fn tensor_dim_literal(&self, value: ValueId, dim: usize) -> Result<i64> {
        let tensor = self.tensors.get(&value).ok_or_else(|| {
            UnhandledOperatorSnafu { op: self.graph.value(value).name.clone() }.build()
        })?;
        let extent = self.arena.tensor(*tensor).dims[dim];
        self.arena.as_int_imm(extent).map(i64::from).ok_or_else(|| {
            UnhandledOperatorSnafu { op: self.graph.value(value).name.clone() }.build()
        })
    }

    pub(crate) fn fresh_axes(&mut self, count: usize) -> (SmallVec<[VarId; 4]>, Vec<ExprRef>) {
        let mut axes: SmallVec<[VarId; 4]> = SmallVec::with_capacity(count);
        let mut exprs = Vec::with_capacity(count);
        for _ in 0..count {
            let var = self.arena.new_var(format!("i{}", self.axis_seq), ScalarType::Int32);
            self.axis_seq += 1;
            axes.push(var);
            exprs.push(self.arena.var_expr(var));
        }
        (axes, exprs)
    }

    fn tensor_name(&mut self, op: &str) -> String {
        let name = format!("{}_{}", op.replace("::", "_"), self.tensor_seq);
        self.tensor_seq += 1;
        name
    }
}

/// Strength reduction for a literal exponent. The square-root forms apply
/// only to true floating literals, not to integer literals cast to float.
pub(crate) fn pow_literal(ar: &mut Arena, lhs: ExprRef, imm: f32, allow_roots: bool) -> Option<ExprRef> {
    if imm == 1.0 {
        Some(lhs)
    } else if imm == 2.0 {
        Some(ar.mul(lhs, lhs))
    } else if imm == 3.0 {
        let squared = ar.mul(lhs, lhs);
        Some(ar.mul(squared, lhs))
    } else if imm == 4.0 {
        let squared = ar.mul(lhs, lhs);
        Some(ar.mul(squared, squared))
    } else if imm == 0.5 && allow_roots {
        Some(ar.intrinsic(IntrinsicOp::Sqrt, [lhs]))
    } else if imm == 0.0 {
        Some(ar.float_imm(1.0))
    } else if imm == -0.5 && allow_roots {
        Some(ar.intrinsic(IntrinsicOp::Rsqrt, [lhs]))
    } else if imm == -1.0 {
        let one = ar.float_imm(1.0);
        Some(ar.div(one, lhs))
    } else if imm == -2.0 {
        let one = ar.float_imm(1.0);
        let squared = ar.mul(lhs, lhs);
        Some(ar.div(one, squared))
    } else {
        None
    }
}
