//! The fused kernel: compile once, run many times over a value stack.
//!
//! Construction walks the subgraph eagerly into symbolic tensor
//! expressions. Lowering and backend compilation are deferred to the first
//! `run`, which fixes the backend from the device of the first tensor
//! argument. Every later run must present tensors on the same device.

use std::collections::HashMap;

use tracing::debug;

use fuze_codegen::CallArg;
use fuze_ir::{Arena, TensorId, VarId};

use crate::backend::{backend_for, BackendKind, BoundBackend};
use crate::binder::KernelArg;
use crate::builder::KernelBuilder;
use crate::error::{
    BackendDispatchFailureSnafu, BackendMismatchSnafu, NoTensorInputSnafu, Result,
    StackUnderflowSnafu, UnhandledOperatorSnafu, UnresolvedOutputDimSnafu,
    UnsupportedInputTypeSnafu,
};
use crate::graph::Subgraph;
use crate::lower::{self, OutputDim};
use crate::options::LoweringOptions;
use crate::value::{Tensor, Value};

/// Symbolic form of the kernel before the first run binds a backend.
pub(crate) struct Construction {
    arena: Arena,
    outputs: Vec<TensorId>,
}

enum BackendState {
    Uninitialized(Construction),
    Bound(BoundBackend),
    Failed,
}

/// A compiled fusion group.
///
/// `run` consumes the top `n_inputs` values of the stack in declaration
/// order and replaces them with one tensor per subgraph output.
pub struct Kernel {
    n_inputs: usize,
    args: Vec<KernelArg>,
    options: LoweringOptions,
    state: BackendState,
}

impl Kernel {
    pub fn new(graph: &Subgraph) -> Result<Self> {
        Self::with_options(graph, LoweringOptions::default())
    }

    pub fn with_options(graph: &Subgraph, options: LoweringOptions) -> Result<Self> {
        let mut builder = KernelBuilder::new(graph);
        for &input in graph.inputs() {
            builder.bind_input(input)?;
        }
        for node in graph.nodes() {
            builder.build_node(node)?;
        }

        let mut outputs = Vec::with_capacity(graph.outputs().len());
        for &value in graph.outputs() {
            let Some(&tensor) = builder.tensors.get(&value) else {
                let name = &graph.value(value).name;
                return UnhandledOperatorSnafu { op: format!("non-tensor output {name}") }.fail();
            };
            outputs.push(tensor);
        }
        debug!(
            inputs = graph.inputs().len(),
            nodes = graph.nodes().len(),
            outputs = outputs.len(),
            "constructed kernel"
        );

        Ok(Self {
            n_inputs: graph.inputs().len(),
            args: builder.args,
            options,
            state: BackendState::Uninitialized(Construction { arena: builder.arena, outputs }),
        })
    }

    /// Execute over the top of the stack, popping the inputs and pushing
    /// the outputs.
    pub fn run(&mut self, stack: &mut Vec<Value>) -> Result<()> {
        if stack.len() < self.n_inputs {
            return StackUnderflowSnafu { expected: self.n_inputs, actual: stack.len() }.fail();
        }
        let start = stack.len() - self.n_inputs;
        let device = stack[start..]
            .iter()
            .find_map(Value::device)
            .ok_or_else(|| NoTensorInputSnafu.build())?;

        // One-shot binding. A failed compilation attempt is permanent.
        if let BackendState::Uninitialized(_) = self.state {
            let state = std::mem::replace(&mut self.state, BackendState::Failed);
            let BackendState::Uninitialized(construction) = state else { unreachable!() };
            let backend = backend_for(device);
            let lowered = lower::lower(
                construction.arena,
                &construction.outputs,
                &self.args,
                backend == BackendKind::Grid,
                &self.options,
            )?;
            self.state = BackendState::Bound(BoundBackend::bind(lowered, device, backend)?);
        }

        let bound = match &self.state {
            BackendState::Bound(bound) => bound,
            BackendState::Uninitialized(_) | BackendState::Failed => {
                return BackendDispatchFailureSnafu {
                    backend: backend_for(device),
                    reason: "a previous compilation attempt failed".to_string(),
                }
                .fail()
            }
        };
        if bound.device != device {
            return BackendMismatchSnafu { bound: bound.device, actual: device }.fail();
        }

        let mut call_args = Vec::new();
        let mut size_bindings: HashMap<VarId, i32> = HashMap::new();
        for (position, (arg, value)) in self.args.iter().zip(&stack[start..]).enumerate() {
            match (arg, value) {
                (KernelArg::Scalar { .. }, Value::Int(v)) => call_args.push(CallArg::Int(*v)),
                (KernelArg::Scalar { .. }, Value::Float(v)) => call_args.push(CallArg::Float(*v)),
                (KernelArg::Buffer { sizes, strides, .. }, Value::Tensor(tensor)) => {
                    call_args.push(CallArg::Ptr(tensor.data_ptr()));
                    for &(dim, var) in sizes {
                        let size = tensor.size(dim) as i32;
                        size_bindings.insert(var, size);
                        call_args.push(CallArg::Int(size));
                    }
                    for &(dim, _) in strides {
                        call_args.push(CallArg::Int(tensor.stride(dim) as i32));
                    }
                }
                _ => {
                    return UnsupportedInputTypeSnafu { name: format!("argument {position}") }.fail()
                }
            }
        }

        // Allocate every output before taking pointers so the argument
        // list never aliases a moved buffer.
        let mut allocated = Vec::with_capacity(bound.outputs.len());
        for spec in &bound.outputs {
            let mut sizes = Vec::with_capacity(spec.dims.len());
            for dim in &spec.dims {
                let size = match *dim {
                    OutputDim::Literal(v) => v,
                    OutputDim::Var(var) => match size_bindings.get(&var) {
                        Some(&v) => v as i64,
                        None => {
                            return UnresolvedOutputDimSnafu { output: spec.name.clone() }.fail()
                        }
                    },
                };
                sizes.push(size);
            }
            let bytes = sizes.iter().product::<i64>() as usize * spec.dtype.bytes();
            allocated.push((spec.dtype, sizes, vec![0u8; bytes]));
        }
        for (_, _, raw) in &mut allocated {
            call_args.push(CallArg::Ptr(raw.as_mut_ptr()));
        }

        bound.code.call(&call_args).map_err(|e| {
            BackendDispatchFailureSnafu { backend: bound.backend, reason: e.to_string() }.build()
        })?;

        stack.truncate(start);
        for (dtype, sizes, raw) in allocated {
            stack.push(Value::Tensor(Tensor::from_raw(device, dtype, &sizes, raw)));
        }
        Ok(())
    }

    /// The backend this kernel is bound to, once the first run has fixed
    /// it.
    pub fn backend(&self) -> Option<BackendKind> {
        match &self.state {
            BackendState::Bound(bound) => Some(bound.backend),
            _ => None,
        }
    }
}
