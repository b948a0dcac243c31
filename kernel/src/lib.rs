//! Fusion of elementwise tensor operator subgraphs into single compiled
//! kernels.
//!
//! A [`Subgraph`] describes a chain of broadcastable elementwise operators
//! (plus the shape-rearranging `cat`, `slice`, `unsqueeze` and chunk forms)
//! over typed, shaped input values. [`Kernel::new`] walks it eagerly into
//! one symbolic expression per output; the first [`Kernel::run`] lowers
//! that expression to a loop nest, picks a backend from the device of the
//! tensor arguments, compiles, and executes. Later runs reuse the compiled
//! artifact.
//!
//! ```
//! use fuze_kernel::{ConstAttr, DeviceKind, Kernel, Subgraph, Tensor, TensorType, Value, ValueType};
//! use fuze_kernel::{Dim, ScalarType};
//!
//! let mut graph = Subgraph::new();
//! let ty = TensorType::contiguous(ScalarType::Float32, [Dim::Static(4)]);
//! let a = graph.add_input("a", ValueType::Tensor(ty.clone()));
//! let b = graph.add_input("b", ValueType::Tensor(ty.clone()));
//! let one = graph.constant(ConstAttr::Int(1));
//! let sum = graph.add_op("aten::add", [a, b, one], ValueType::Tensor(ty.clone()));
//! let out = graph.add_op("aten::relu", [sum], ValueType::Tensor(ty));
//! graph.mark_output(out);
//!
//! let mut kernel = Kernel::new(&graph)?;
//! let mut stack = vec![
//!     Value::Tensor(Tensor::from_f32(DeviceKind::Cpu, &[4], vec![1.0, -2.0, 3.0, -4.0])),
//!     Value::Tensor(Tensor::from_f32(DeviceKind::Cpu, &[4], vec![0.5, 0.5, -8.0, 0.5])),
//! ];
//! kernel.run(&mut stack)?;
//! let Value::Tensor(out) = &stack[0] else { panic!() };
//! assert_eq!(out.to_f32_vec(), vec![1.5, 0.0, 0.0, 0.0]);
//! # Ok::<(), fuze_kernel::Error>(())
//! ```

pub mod backend;
pub mod error;
pub mod graph;
pub mod kernel;
pub mod options;
pub mod value;

mod binder;
mod builder;
mod lower;


pub use fuze_dtype::ScalarType;

pub use backend::BackendKind;
pub use error::{Error, Result};
pub use graph::{ConstAttr, Dim, Node, NodeAttrs, Subgraph, TensorType, ValueId, ValueType};
pub use kernel::Kernel;
pub use options::LoweringOptions;
pub use value::{DeviceKind, Tensor, Value};
