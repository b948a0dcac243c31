//! Backend selection and binding.
//!
//! The backend is chosen once, from the device of the first tensor argument
//! of the first invocation, and the lowered program is compiled for it at
//! that point. GPU tensors take the grid launcher; CPU tensors take the
//! native JIT when it is compiled in and the tree-walking evaluator
//! otherwise.

use tracing::debug;

use fuze_codegen::{CodeObject, EvalObject, GridObject};

use crate::error::{BackendDispatchFailureSnafu, Result};
use crate::lower::{Lowered, OutputSpec};
use crate::value::DeviceKind;

/// Code generation strategies a kernel can bind to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, strum::Display)]
pub enum BackendKind {
    /// Tree-walking interpreter over the lowered program.
    Evaluator,
    /// Ahead-of-time native code via Cranelift.
    Native,
    /// Flattened grid schedule executed block by block, thread by thread.
    Grid,
}

pub(crate) fn backend_for(device: DeviceKind) -> BackendKind {
    match device {
        DeviceKind::Gpu => BackendKind::Grid,
        #[cfg(feature = "cranelift")]
        DeviceKind::Cpu => BackendKind::Native,
        #[cfg(not(feature = "cranelift"))]
        DeviceKind::Cpu => BackendKind::Evaluator,
    }
}

/// A kernel bound to one device and backend, holding the compiled artifact
/// and the output shape recipes.
pub(crate) struct BoundBackend {
    pub device: DeviceKind,
    pub backend: BackendKind,
    pub code: Box<dyn CodeObject>,
    pub outputs: Vec<OutputSpec>,
}

impl BoundBackend {
    pub fn bind(lowered: Lowered, device: DeviceKind, backend: BackendKind) -> Result<Self> {
        let Lowered { program, outputs } = lowered;
        debug!(%device, %backend, name = %program.name, "binding kernel backend");
        let code: Box<dyn CodeObject> = match backend {
            BackendKind::Evaluator => Box::new(EvalObject::build(program)),
            BackendKind::Grid => Box::new(GridObject::build(program)),
            #[cfg(feature = "cranelift")]
            BackendKind::Native => {
                let object = fuze_codegen::CraneliftObject::build(program).map_err(|e| {
                    BackendDispatchFailureSnafu { backend, reason: e.to_string() }.build()
                })?;
                Box::new(object)
            }
            #[cfg(not(feature = "cranelift"))]
            BackendKind::Native => {
                return BackendDispatchFailureSnafu {
                    backend,
                    reason: "native backend not compiled in".to_string(),
                }
                .fail()
            }
        };
        Ok(Self { device, backend, code, outputs })
    }
}
