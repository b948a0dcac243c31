//! Symbolic value binding: subgraph inputs to symbolic buffers and scalars.
//!
//! Each tensor input becomes a symbolic buffer plus an index expression
//! accumulated innermost-first: `stride = 1`, then per axis from the last
//! dimension outward `index += axis * stride; stride *= size`. Contiguous
//! strides are derived from sizes; a non-contiguous axis binds a fresh
//! symbolic stride variable registered as its own kernel argument entry.

use fuze_dtype::ScalarType;
use fuze_ir::{BufId, ExprRef, TensorDef, VarId};

use crate::builder::KernelBuilder;
use crate::error::{Result, UnsupportedInputTypeSnafu};
use crate::graph::{Dim, TensorType, ValueId, ValueType};

/// One entry of the kernel argument list. Argument order fixed at
/// construction is the exact order runtime call arguments must follow.
#[derive(Debug, Clone)]
pub(crate) enum KernelArg {
    Buffer {
        buf: BufId,
        /// (dimension, size variable) pairs in registration order.
        sizes: Vec<(usize, VarId)>,
        /// (dimension, stride variable) pairs in registration order.
        strides: Vec<(usize, VarId)>,
    },
    Scalar { var: VarId },
}

impl KernelBuilder<'_> {
    pub(crate) fn bind_input(&mut self, input: ValueId) -> Result<()> {
        let graph = self.graph;
        let decl = graph.value(input);
        match &decl.ty {
            ValueType::Tensor(tt) => self.bind_tensor(input, &decl.name, tt),
            ValueType::Int => {
                let var = self.arena.new_var(format!("v_{}", decl.name), ScalarType::Int32);
                let expr = self.arena.var_expr(var);
                self.scalars.insert(input, expr);
                self.args.push(KernelArg::Scalar { var });
                Ok(())
            }
            ValueType::Float => {
                let var = self.arena.new_var(format!("v_{}", decl.name), ScalarType::Float32);
                let expr = self.arena.var_expr(var);
                self.scalars.insert(input, expr);
                self.args.push(KernelArg::Scalar { var });
                Ok(())
            }
            ValueType::List => UnsupportedInputTypeSnafu { name: decl.name.clone() }.fail(),
        }
    }

    fn bind_tensor(&mut self, input: ValueId, name: &str, tt: &TensorType) -> Result<()> {
        let rank = tt.rank();
        let buf = self.arena.new_buf(format!("t_{name}"), tt.dtype);

        // Resolve dims: literals for static sizes, fresh variables for
        // dynamic ones.
        let mut dims: Vec<ExprRef> = Vec::with_capacity(rank);
        let mut dim_vars: Vec<Option<VarId>> = Vec::with_capacity(rank);
        for (position, dim) in tt.dims.iter().enumerate() {
            match dim {
                Dim::Static(size) => {
                    dims.push(self.arena.int_imm(*size as i32));
                    dim_vars.push(None);
                }
                Dim::Dynamic => {
                    let var = self.arena.new_var(format!("size_{name}_{position}"), ScalarType::Int32);
                    dims.push(self.arena.var_expr(var));
                    dim_vars.push(Some(var));
                }
            }
        }

        let (axes, axis_exprs) = self.fresh_axes(rank);

        let mut sizes = Vec::new();
        let mut strides = Vec::new();
        let mut stride = self.arena.int_imm(1);
        let mut index = self.arena.int_imm(0);
        for position in (0..rank).rev() {
            if !tt.contiguity[position] {
                let var = self.arena.new_var(format!("stride_{name}_{position}"), ScalarType::Int32);
                strides.push((position, var));
                stride = self.arena.var_expr(var);
            }
            if let Some(var) = dim_vars[position] {
                sizes.push((position, var));
            }
            let term = self.arena.mul(axis_exprs[position], stride);
            index = self.arena.add(index, term);
            stride = self.arena.mul(stride, dims[position]);
        }

        let body = self.arena.load(buf, index);
        let tensor = self.arena.new_tensor(TensorDef {
            name: format!("t_{name}"),
            dims: dims.into_iter().collect(),
            axes,
            body,
        });
        self.tensors.insert(input, tensor);
        self.args.push(KernelArg::Buffer { buf, sizes, strides });
        Ok(())
    }
}
