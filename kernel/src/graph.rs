//! The fused subgraph consumed by kernel construction.
//!
//! The subgraph is an opaque read-only input: an ordered list of typed
//! values, operator nodes carrying a stable string identifier and static
//! attributes, and an ordered output list. The builder methods exist so
//! front ends (and tests) can assemble one; kernel construction never
//! mutates a subgraph.

use std::collections::HashMap;

use smallvec::SmallVec;

use fuze_dtype::ScalarType;

/// Handle to one value in a subgraph.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ValueId(u32);

impl ValueId {
    pub fn index(self) -> usize {
        self.0 as usize
    }
}

/// One declared dimension of a tensor-typed value.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Dim {
    /// Statically known size.
    Static(i64),
    /// Unknown until runtime; binds a fresh symbolic size variable.
    Dynamic,
}

/// Declared type of a tensor-valued subgraph value.
#[derive(Debug, Clone)]
pub struct TensorType {
    pub dtype: ScalarType,
    pub dims: SmallVec<[Dim; 4]>,
    /// Per-dimension contiguity. A non-contiguous axis binds a symbolic
    /// stride variable instead of a derived stride.
    pub contiguity: SmallVec<[bool; 4]>,
}

impl TensorType {
    /// Contiguous tensor with the given dims.
    pub fn contiguous(dtype: ScalarType, dims: impl IntoIterator<Item = Dim>) -> Self {
        let dims: SmallVec<[Dim; 4]> = dims.into_iter().collect();
        let contiguity = dims.iter().map(|_| true).collect();
        Self { dtype, dims, contiguity }
    }

    pub fn rank(&self) -> usize {
        self.dims.len()
    }
}

/// Declared type of a subgraph value.
#[derive(Debug, Clone)]
pub enum ValueType {
    Tensor(TensorType),
    Int,
    Float,
    /// Aggregate produced by list construction; consumed inline where
    /// referenced, never materialized.
    List,
}

/// Constant payload of a constant node.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum ConstAttr {
    Int(i64),
    Float(f64),
    /// Semantic absence (e.g. an omitted clamp bound).
    None,
}

/// Static attributes attached to a node.
#[derive(Debug, Clone, Default)]
pub struct NodeAttrs {
    /// Payload of a constant node.
    pub value: Option<ConstAttr>,
    /// Chunk axis of a constant-chunk node.
    pub dim: Option<i64>,
    /// Piece count of a constant-chunk node.
    pub chunks: Option<i64>,
}

/// One operator node.
#[derive(Debug, Clone)]
pub struct Node {
    /// Stable operator identifier, e.g. `aten::add`.
    pub op: String,
    pub inputs: SmallVec<[ValueId; 4]>,
    pub outputs: SmallVec<[ValueId; 1]>,
    pub attrs: NodeAttrs,
}

#[derive(Debug, Clone)]
pub struct ValueDecl {
    pub name: String,
    pub ty: ValueType,
}

/// A fragment of a computation graph selected for fused compilation.
#[derive(Debug, Default)]
pub struct Subgraph {
    values: Vec<ValueDecl>,
    inputs: Vec<ValueId>,
    nodes: Vec<Node>,
    outputs: Vec<ValueId>,
    /// value -> (node index, output offset within that node)
    producers: HashMap<ValueId, (usize, usize)>,
}

impl Subgraph {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_input(&mut self, name: impl Into<String>, ty: ValueType) -> ValueId {
        let id = self.add_value(name, ty);
        self.inputs.push(id);
        id
    }

    fn add_value(&mut self, name: impl Into<String>, ty: ValueType) -> ValueId {
        self.values.push(ValueDecl { name: name.into(), ty });
        ValueId((self.values.len() - 1) as u32)
    }

    /// Append a single-output node and return its output value.
    pub fn add_op(
        &mut self,
        op: &str,
        inputs: impl IntoIterator<Item = ValueId>,
        output_ty: ValueType,
    ) -> ValueId {
        self.add_node(op, inputs, [output_ty], NodeAttrs::default())[0]
    }

    /// Append a node with explicit attributes; returns its output values.
    pub fn add_node(
        &mut self,
        op: &str,
        inputs: impl IntoIterator<Item = ValueId>,
        output_tys: impl IntoIterator<Item = ValueType>,
        attrs: NodeAttrs,
    ) -> Vec<ValueId> {
        let index = self.nodes.len();
        let outputs: Vec<ValueId> = output_tys
            .into_iter()
            .enumerate()
            .map(|(offset, ty)| {
                let id = self.add_value(format!("{}.{}.{}", op, index, offset), ty);
                self.producers.insert(id, (index, offset));
                id
            })
            .collect();
        self.nodes.push(Node {
            op: op.to_string(),
            inputs: inputs.into_iter().collect(),
            outputs: outputs.iter().copied().collect(),
            attrs,
        });
        outputs
    }

    /// Append a constant node carrying `attr`.
    pub fn constant(&mut self, attr: ConstAttr) -> ValueId {
        let ty = match attr {
            ConstAttr::Int(_) | ConstAttr::None => ValueType::Int,
            ConstAttr::Float(_) => ValueType::Float,
        };
        self.add_node(
            "prim::Constant",
            [],
            [ty],
            NodeAttrs { value: Some(attr), ..NodeAttrs::default() },
        )[0]
    }

    /// Append a list-construction node over `items`.
    pub fn list(&mut self, items: impl IntoIterator<Item = ValueId>) -> ValueId {
        self.add_op("prim::ListConstruct", items, ValueType::List)
    }

    pub fn mark_output(&mut self, value: ValueId) {
        self.outputs.push(value);
    }

    pub fn inputs(&self) -> &[ValueId] {
        &self.inputs
    }

    pub fn outputs(&self) -> &[ValueId] {
        &self.outputs
    }

    pub fn nodes(&self) -> &[Node] {
        &self.nodes
    }

    pub fn value(&self, id: ValueId) -> &ValueDecl {
        &self.values[id.index()]
    }

    /// The node producing `id` and the output offset within it, if any.
    pub fn producer(&self, id: ValueId) -> Option<(&Node, usize)> {
        self.producers.get(&id).map(|&(n, offset)| (&self.nodes[n], offset))
    }
}
