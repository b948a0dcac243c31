//! Lowering and schedule assembly.
//!
//! One schedule covers all output tensors: every intermediate is inlined by
//! pure substitution, and a surviving call to another output loads from
//! that output's buffer instead. The parallel backend additionally flattens
//! each output's index space into a single linear index and splits it into
//! grid block and thread dimensions; dynamic output dims fall through to an
//! untiled flat loop.

use std::collections::{HashMap, HashSet};

use smallvec::SmallVec;
use tracing::debug;

use fuze_codegen::{Param, Program};
use fuze_dtype::ScalarType;
use fuze_ir::{
    inline_calls, rewrite_expr, substitute, Arena, BinaryOp, BufId, CompareOp, ExprKind, ExprRef,
    LoopKind, StmtRef, TensorId, VarId,
};

use crate::binder::KernelArg;
use crate::error::{Result, UnresolvedOutputDimSnafu};
use crate::options::{LoweringOptions, Tiling};

/// One output's shape recipe for the runtime invoker: per dimension either
/// a literal or a size variable resolved from the call's bindings.
#[derive(Debug, Clone, Copy)]
pub(crate) enum OutputDim {
    Literal(i64),
    Var(VarId),
}

#[derive(Debug, Clone)]
pub(crate) struct OutputSpec {
    pub name: String,
    pub dtype: ScalarType,
    pub dims: SmallVec<[OutputDim; 4]>,
}

pub(crate) struct Lowered {
    pub program: Program,
    pub outputs: Vec<OutputSpec>,
}

pub(crate) fn lower(
    mut arena: Arena,
    outputs: &[TensorId],
    args: &[KernelArg],
    parallel: bool,
    options: &LoweringOptions,
) -> Result<Lowered> {
    // Resolve the split strategy up front so a bad loop level fails before
    // any code is generated.
    let tiling = if parallel { Some(options.resolve()?) } else { None };

    let output_set: HashSet<TensorId> = outputs.iter().copied().collect();

    // One buffer per output, shared by stores here and by cross-output
    // loads.
    let mut out_bufs: HashMap<TensorId, BufId> = HashMap::new();
    let mut specs = Vec::with_capacity(outputs.len());
    for &tensor in outputs {
        let def = arena.tensor(tensor);
        let name = def.name.clone();
        let body = def.body;
        let dims = def.dims.clone();
        let dtype = arena.dtype(body);
        let buf = arena.new_buf(format!("{name}_out"), dtype);
        out_bufs.insert(tensor, buf);
        specs.push(OutputSpec { name: name.clone(), dtype, dims: output_dims(&arena, &name, &dims)? });
    }

    // Emit nests in arena construction order, which is topological over the
    // source nodes: an output consumed by another output is written before
    // any cross-output load reads its buffer, whatever the declaration
    // order. Parameter and result order stay declaration order.
    let mut ordered: Vec<TensorId> = outputs.to_vec();
    ordered.sort_by_key(|t| t.index());

    let mut nests = Vec::with_capacity(ordered.len());
    for &tensor in &ordered {
        let def = arena.tensor(tensor).clone();
        let mut body = inline_calls(&mut arena, def.body, |t| !output_set.contains(&t));
        body = load_cross_output_calls(&mut arena, body, &out_bufs);
        let buf = out_bufs[&tensor];
        nests.push(assemble_output(&mut arena, &def.name, buf, &def.axes, &def.dims, body, tiling));
    }

    let root = arena.block(nests);
    let params = param_list(args, outputs, &out_bufs);
    debug!(outputs = outputs.len(), params = params.len(), parallel, "lowered kernel schedule");

    let program = Program { name: "fused_kernel".into(), arena: arena.into(), root, params };
    Ok(Lowered { program, outputs: specs })
}

/// Replace calls that survived inlining (references to other outputs) with
/// loads from the producing output's buffer.
fn load_cross_output_calls(arena: &mut Arena, root: ExprRef, out_bufs: &HashMap<TensorId, BufId>) -> ExprRef {
    rewrite_expr(arena, root, &mut |a, e| {
        let ExprKind::Call { tensor, ref args } = a.expr(e).kind else {
            return None;
        };
        let buf = *out_bufs.get(&tensor)?;
        let args: SmallVec<[ExprRef; 4]> = args.clone();
        let dims = a.tensor(tensor).dims.clone();
        let index = row_major_index(a, &dims, &args);
        Some(a.load(buf, index))
    })
}

/// Row-major linear index, accumulated innermost-first.
fn row_major_index(arena: &mut Arena, dims: &[ExprRef], coords: &[ExprRef]) -> ExprRef {
    let mut index = arena.int_imm(0);
    let mut stride = arena.int_imm(1);
    for position in (0..dims.len()).rev() {
        let term = arena.mul(coords[position], stride);
        index = arena.add(index, term);
        stride = arena.mul(stride, dims[position]);
    }
    index
}

/// Build one output's loop nest: a plain multi-dimensional serial nest, or
/// the flattened (and, for static shapes, block/thread split) parallel
/// form.
fn assemble_output(
    arena: &mut Arena,
    name: &str,
    buf: BufId,
    axes: &[VarId],
    dims: &[ExprRef],
    body: ExprRef,
    tiling: Option<Tiling>,
) -> StmtRef {
    let Some(tiling) = tiling else {
        // Serial: store at the row-major index, loop innermost-last.
        let coords: Vec<ExprRef> = axes.iter().map(|&v| arena.var_expr(v)).collect();
        let index = row_major_index(arena, dims, &coords);
        let mut stmt = arena.store(buf, index, body);
        for position in (0..dims.len()).rev() {
            stmt = arena.for_loop(axes[position], dims[position], LoopKind::Serial, stmt);
        }
        return stmt;
    };

    let static_extent = dims
        .iter()
        .try_fold(1i64, |n, &d| arena.as_int_imm(d).map(|v| n * v as i64));

    match static_extent {
        // Dynamic dims disable the split; the flat loop still applies.
        None => {
            let flat = arena.new_var(format!("{name}_flat"), ScalarType::Int32);
            let flat_expr = arena.var_expr(flat);
            let body = decompose_axes(arena, axes, dims, body, flat_expr);
            let store = arena.store(buf, flat_expr, body);
            let mut total = dims[0];
            for &d in &dims[1..] {
                total = arena.mul(total, d);
            }
            arena.for_loop(flat, total, LoopKind::Serial, store)
        }
        Some(n) => match tiling {
            Tiling::TwoLevel { block_size } => {
                let bs = block_size as i64;
                let outer = arena.new_var(format!("{name}_outer"), ScalarType::Int32);
                let inner = arena.new_var(format!("{name}_inner"), ScalarType::Int32);
                let outer_expr = arena.var_expr(outer);
                let inner_expr = arena.var_expr(inner);
                let bs_imm = arena.int_imm(bs as i32);
                let scaled = arena.mul(outer_expr, bs_imm);
                let flat = arena.add(scaled, inner_expr);

                let body = decompose_axes(arena, axes, dims, body, flat);
                let mut stmt = arena.store(buf, flat, body);
                if n % bs != 0 {
                    let n_imm = arena.int_imm(n as i32);
                    let in_bounds = arena.compare(CompareOp::Lt, flat, n_imm);
                    stmt = arena.if_then(in_bounds, stmt);
                }
                let bs_extent = arena.int_imm(bs as i32);
                stmt = arena.for_loop(inner, bs_extent, LoopKind::GridThread, stmt);
                let outer_extent = arena.int_imm((n as u64).div_ceil(bs as u64) as i32);
                arena.for_loop(outer, outer_extent, LoopKind::GridBlock, stmt)
            }
            Tiling::ThreeLevel { block_count, block_size } => {
                let bc = block_count as i64;
                let bs = block_size as i64;
                let tile = bc * bs;
                let outer = arena.new_var(format!("{name}_outer"), ScalarType::Int32);
                let block = arena.new_var(format!("{name}_block"), ScalarType::Int32);
                let thread = arena.new_var(format!("{name}_thread"), ScalarType::Int32);
                let outer_expr = arena.var_expr(outer);
                let block_expr = arena.var_expr(block);
                let thread_expr = arena.var_expr(thread);
                let tile_imm = arena.int_imm(tile as i32);
                let bs_imm = arena.int_imm(bs as i32);
                let outer_off = arena.mul(outer_expr, tile_imm);
                let block_off = arena.mul(block_expr, bs_imm);
                let within = arena.add(block_off, thread_expr);
                let flat = arena.add(outer_off, within);

                let body = decompose_axes(arena, axes, dims, body, flat);
                let mut stmt = arena.store(buf, flat, body);
                if n % tile != 0 {
                    let n_imm = arena.int_imm(n as i32);
                    let in_bounds = arena.compare(CompareOp::Lt, flat, n_imm);
                    stmt = arena.if_then(in_bounds, stmt);
                }
                let bs_extent = arena.int_imm(bs as i32);
                stmt = arena.for_loop(thread, bs_extent, LoopKind::GridThread, stmt);
                let bc_extent = arena.int_imm(bc as i32);
                stmt = arena.for_loop(block, bc_extent, LoopKind::GridBlock, stmt);
                let outer_extent = arena.int_imm((n as u64).div_ceil(tile as u64) as i32);
                arena.for_loop(outer, outer_extent, LoopKind::Serial, stmt)
            }
        },
    }
}

/// Substitute each axis variable with its modulo/divide decomposition of
/// the flat index, innermost dimension outward.
fn decompose_axes(arena: &mut Arena, axes: &[VarId], dims: &[ExprRef], body: ExprRef, flat: ExprRef) -> ExprRef {
    let mut map: HashMap<VarId, ExprRef> = HashMap::new();
    let mut value = flat;
    for position in (0..dims.len()).rev() {
        let coord = if position > 0 {
            arena.binary(BinaryOp::Mod, value, dims[position])
        } else {
            value
        };
        map.insert(axes[position], coord);
        value = arena.div(value, dims[position]);
    }
    substitute(arena, body, &map)
}

fn output_dims(arena: &Arena, name: &str, dims: &[ExprRef]) -> Result<SmallVec<[OutputDim; 4]>> {
    dims.iter()
        .map(|&d| {
            if let Some(v) = arena.as_int_imm(d) {
                return Ok(OutputDim::Literal(v as i64));
            }
            match arena.expr(d).kind {
                ExprKind::Var(v) => Ok(OutputDim::Var(v)),
                _ => UnresolvedOutputDimSnafu { output: name.to_string() }.fail(),
            }
        })
        .collect()
}

/// The ordered parameter list: per kernel argument the buffer, then its
/// size variables in registration order, then its stride variables; then
/// one buffer per output tensor.
fn param_list(args: &[KernelArg], outputs: &[TensorId], out_bufs: &HashMap<TensorId, BufId>) -> Vec<Param> {
    let mut params = Vec::new();
    for arg in args {
        match arg {
            KernelArg::Buffer { buf, sizes, strides } => {
                params.push(Param::Buffer(*buf));
                for &(_, var) in sizes {
                    params.push(Param::Scalar(var));
                }
                for &(_, var) in strides {
                    params.push(Param::Scalar(var));
                }
            }
            KernelArg::Scalar { var } => params.push(Param::Scalar(*var)),
        }
    }
    for tensor in outputs {
        params.push(Param::Buffer(out_bufs[tensor]));
    }
    params
}
