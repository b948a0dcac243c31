//! Tuning knobs for the parallel lowering path.

use crate::error::{InvalidLoopLevelSnafu, Result};

/// Parallel-backend loop restructuring options, read at lowering time.
/// Unset fields fall back to fixed defaults.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct LoweringOptions {
    /// Split depth of the flattened index space: 2 or 3.
    pub loop_levels: Option<u32>,
    /// Grid block count, three-level split only.
    pub block_count: Option<u32>,
    /// Threads per block.
    pub block_size: Option<u32>,
}

/// Split strategy after defaults are applied.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Tiling {
    /// Blocks of `block_size` threads over the flat index.
    TwoLevel { block_size: u32 },
    /// Serial outer loop over tiles of `block_count * block_size`, each
    /// tile a full grid launch.
    ThreeLevel { block_count: u32, block_size: u32 },
}

impl LoweringOptions {
    pub(crate) fn resolve(&self) -> Result<Tiling> {
        match self.loop_levels.unwrap_or(2) {
            2 => Ok(Tiling::TwoLevel { block_size: self.block_size.unwrap_or(512) }),
            3 => Ok(Tiling::ThreeLevel {
                block_count: self.block_count.unwrap_or(1280),
                block_size: self.block_size.unwrap_or(256),
            }),
            level => InvalidLoopLevelSnafu { level }.fail(),
        }
    }
}
