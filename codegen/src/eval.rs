//! Portable statement-tree evaluator.
//!
//! The evaluator is the always-available CPU backend: it walks the lowered
//! statement IR directly, binding loop variables as it goes and reading and
//! writing buffer elements through the raw pointers supplied at call time.
//! Grid-kind loops run serially with identical semantics.

use fuze_dtype::ScalarType;
use fuze_ir::{Arena, BinaryOp, CompareOp, ExprKind, ExprRef, IntrinsicOp, Stmt, StmtRef, VarId};

use crate::error::{ArgumentCountMismatchSnafu, ArgumentKindMismatchSnafu, Error, Result};
use crate::program::{CallArg, CodeObject, Param, Program};

/// Code object backed by the evaluator.
pub struct EvalObject {
    program: Program,
    name: String,
}

impl EvalObject {
    pub fn build(program: Program) -> Self {
        let name = format!("{}.eval", program.name);
        Self { program, name }
    }
}

impl CodeObject for EvalObject {
    fn call(&self, args: &[CallArg]) -> Result<()> {
        let mut frame = Frame::bind(&self.program, args)?;
        frame.exec(self.program.root)
    }

    fn name(&self) -> &str {
        &self.name
    }
}

/// A scalar value during evaluation. Integers widen to `i64` internally and
/// narrow back to 32 bits at stores.
#[derive(Debug, Clone, Copy, PartialEq)]
pub(crate) enum Imm {
    Int(i64),
    Float(f32),
    Bool(bool),
}

impl Imm {
    fn as_float(self) -> f32 {
        match self {
            Self::Int(v) => v as f32,
            Self::Float(v) => v,
            Self::Bool(v) => v as u8 as f32,
        }
    }

    fn as_int(self) -> i64 {
        match self {
            Self::Int(v) => v,
            // C-style narrowing: truncate toward zero.
            Self::Float(v) => v as i64,
            Self::Bool(v) => v as i64,
        }
    }

    fn as_bool(self) -> bool {
        match self {
            Self::Int(v) => v != 0,
            Self::Float(v) => v != 0.0,
            Self::Bool(v) => v,
        }
    }

    fn convert(self, dtype: ScalarType) -> Imm {
        match dtype {
            ScalarType::Int32 => Self::Int(self.as_int()),
            ScalarType::Float32 => Self::Float(self.as_float()),
            ScalarType::Bool => Self::Bool(self.as_bool()),
        }
    }
}

/// One call's evaluation state: pointer and scalar bindings plus the loop
/// variable environment. Rebuilt fresh on every call.
pub(crate) struct Frame<'p> {
    arena: &'p Arena,
    bufs: Vec<Option<*mut u8>>,
    vars: Vec<Option<Imm>>,
}

impl<'p> Frame<'p> {
    /// Check the argument list against the parameter list and bind it.
    pub(crate) fn bind(program: &'p Program, args: &[CallArg]) -> Result<Self> {
        snafu::ensure!(
            args.len() == program.params.len(),
            ArgumentCountMismatchSnafu { expected: program.params.len(), actual: args.len() }
        );

        let arena = program.arena.as_ref();
        let mut bufs = vec![None; arena.buf_count()];
        let mut vars = vec![None; arena.var_count()];
        for (index, (param, arg)) in program.params.iter().zip(args).enumerate() {
            match (param, arg) {
                (Param::Buffer(b), CallArg::Ptr(p)) => bufs[b.index()] = Some(*p),
                (Param::Scalar(v), CallArg::Int(value)) => vars[v.index()] = Some(Imm::Int(*value as i64)),
                (Param::Scalar(v), CallArg::Float(value)) => vars[v.index()] = Some(Imm::Float(*value)),
                _ => return ArgumentKindMismatchSnafu { index }.fail(),
            }
        }
        Ok(Self { arena, bufs, vars })
    }

    pub(crate) fn exec(&mut self, s: StmtRef) -> Result<()> {
        match self.arena.stmt(s).clone() {
            Stmt::Block(stmts) => {
                for st in stmts {
                    self.exec(st)?;
                }
                Ok(())
            }
            Stmt::For { var, extent, body, .. } => {
                let extent = self.eval(extent)?.as_int();
                for i in 0..extent {
                    self.vars[var.index()] = Some(Imm::Int(i));
                    self.exec(body)?;
                }
                Ok(())
            }
            Stmt::If { cond, body } => {
                if self.eval(cond)?.as_bool() {
                    self.exec(body)?;
                }
                Ok(())
            }
            Stmt::Store { buf, index, value } => {
                let index = self.eval(index)?.as_int();
                let dtype = self.arena.buf(buf).dtype;
                let value = self.eval(value)?.convert(dtype);
                let ptr = self.buf_ptr(buf)?;
                // Invariant: the caller sized every buffer to its resolved
                // shape, and loop extents are those same shapes.
                unsafe {
                    let at = ptr.add(index as usize * dtype.bytes());
                    match value {
                        Imm::Int(v) => (at as *mut i32).write_unaligned(v as i32),
                        Imm::Float(v) => (at as *mut f32).write_unaligned(v),
                        Imm::Bool(v) => at.write(v as u8),
                    }
                }
                Ok(())
            }
        }
    }

    fn buf_ptr(&self, buf: fuze_ir::BufId) -> Result<*mut u8> {
        self.bufs[buf.index()].ok_or_else(|| Error::Execution {
            reason: format!("buffer {} has no bound pointer", self.arena.buf(buf).name),
        })
    }

    fn var_value(&self, var: VarId) -> Result<Imm> {
        self.vars[var.index()].ok_or_else(|| Error::Execution {
            reason: format!("variable {} is unbound", self.arena.var(var).name),
        })
    }

    fn eval(&mut self, e: ExprRef) -> Result<Imm> {
        let dtype = self.arena.dtype(e);
        match self.arena.expr(e).kind.clone() {
            ExprKind::IntImm(v) => Ok(Imm::Int(v as i64)),
            ExprKind::FloatImm(v) => Ok(Imm::Float(v)),
            ExprKind::Var(v) => self.var_value(v),
            ExprKind::Cast(src) => Ok(self.eval(src)?.convert(dtype)),
            ExprKind::Binary { op, lhs, rhs } => {
                let l = self.eval(lhs)?;
                let r = self.eval(rhs)?;
                binary(op, l.convert(dtype), r.convert(dtype))
            }
            ExprKind::Compare { op, lhs, rhs } => {
                let l = self.eval(lhs)?;
                let r = self.eval(rhs)?;
                Ok(Imm::Bool(compare(op, l, r)))
            }
            ExprKind::Select { cond, on_true, on_false } => {
                if self.eval(cond)?.as_bool() {
                    self.eval(on_true)
                } else {
                    self.eval(on_false)
                }
            }
            ExprKind::Intrinsic { op, args } => {
                let mut vals = [Imm::Int(0); 2];
                for (slot, &arg) in vals.iter_mut().zip(args.iter()) {
                    *slot = self.eval(arg)?;
                }
                Ok(intrinsic(op, vals[0], vals[1]))
            }
            ExprKind::Load { buf, index } => {
                let index = self.eval(index)?.as_int();
                let dtype = self.arena.buf(buf).dtype;
                let ptr = self.buf_ptr(buf)?;
                unsafe {
                    let at = ptr.add(index as usize * dtype.bytes());
                    Ok(match dtype {
                        ScalarType::Int32 => Imm::Int((at as *const i32).read_unaligned() as i64),
                        ScalarType::Float32 => Imm::Float((at as *const f32).read_unaligned()),
                        ScalarType::Bool => Imm::Bool(at.read() != 0),
                    })
                }
            }
            ExprKind::Call { tensor, .. } => Err(Error::Execution {
                reason: format!(
                    "tensor call to {} survived lowering; inlining must eliminate calls",
                    self.arena.tensor(tensor).name
                ),
            }),
        }
    }
}

fn binary(op: BinaryOp, lhs: Imm, rhs: Imm) -> Result<Imm> {
    match (lhs, rhs) {
        (Imm::Float(a), Imm::Float(b)) => Ok(Imm::Float(match op {
            BinaryOp::Add => a + b,
            BinaryOp::Sub => a - b,
            BinaryOp::Mul => a * b,
            BinaryOp::Div => a / b,
            BinaryOp::Mod => a % b,
            BinaryOp::Min => a.min(b),
            BinaryOp::Max => a.max(b),
        })),
        (a, b) => {
            let (a, b) = (a.as_int(), b.as_int());
            if matches!(op, BinaryOp::Div | BinaryOp::Mod) && b == 0 {
                return Err(Error::Execution { reason: "integer division by zero".into() });
            }
            Ok(Imm::Int(match op {
                BinaryOp::Add => a + b,
                BinaryOp::Sub => a - b,
                BinaryOp::Mul => a * b,
                BinaryOp::Div => a / b,
                BinaryOp::Mod => a % b,
                BinaryOp::Min => a.min(b),
                BinaryOp::Max => a.max(b),
            }))
        }
    }
}

fn compare(op: CompareOp, lhs: Imm, rhs: Imm) -> bool {
    if matches!(lhs, Imm::Float(_)) || matches!(rhs, Imm::Float(_)) {
        let (a, b) = (lhs.as_float(), rhs.as_float());
        match op {
            CompareOp::Eq => a == b,
            CompareOp::Ne => a != b,
            CompareOp::Lt => a < b,
            CompareOp::Le => a <= b,
            CompareOp::Gt => a > b,
            CompareOp::Ge => a >= b,
        }
    } else {
        let (a, b) = (lhs.as_int(), rhs.as_int());
        match op {
            CompareOp::Eq => a == b,
            CompareOp::Ne => a != b,
            CompareOp::Lt => a < b,
            CompareOp::Le => a <= b,
            CompareOp::Gt => a > b,
            CompareOp::Ge => a >= b,
        }
    }
}

fn intrinsic(op: IntrinsicOp, a: Imm, b: Imm) -> Imm {
    // Abs and the rounding family keep integer operands integral.
    if let Imm::Int(v) = a {
        match op {
            IntrinsicOp::Abs => return Imm::Int(v.abs()),
            IntrinsicOp::Ceil | IntrinsicOp::Floor | IntrinsicOp::Round | IntrinsicOp::Trunc => {
                return Imm::Int(v);
            }
            _ => {}
        }
    }

    let x = a.as_float();
    let y = b.as_float();
    Imm::Float(match op {
        IntrinsicOp::Sin => x.sin(),
        IntrinsicOp::Cos => x.cos(),
        IntrinsicOp::Tan => x.tan(),
        IntrinsicOp::Asin => x.asin(),
        IntrinsicOp::Acos => x.acos(),
        IntrinsicOp::Atan => x.atan(),
        IntrinsicOp::Atan2 => x.atan2(y),
        IntrinsicOp::Sinh => x.sinh(),
        IntrinsicOp::Cosh => x.cosh(),
        IntrinsicOp::Tanh => x.tanh(),
        IntrinsicOp::Exp => x.exp(),
        IntrinsicOp::Expm1 => x.exp_m1(),
        IntrinsicOp::Log => x.ln(),
        IntrinsicOp::Log2 => x.log2(),
        IntrinsicOp::Log10 => x.log10(),
        IntrinsicOp::Erf => libm::erff(x),
        IntrinsicOp::Erfc => libm::erfcf(x),
        IntrinsicOp::Lgamma => libm::lgammaf_r(x).0,
        IntrinsicOp::Sqrt => x.sqrt(),
        IntrinsicOp::Rsqrt => x.sqrt().recip(),
        IntrinsicOp::Abs => x.abs(),
        IntrinsicOp::Ceil => x.ceil(),
        IntrinsicOp::Floor => x.floor(),
        IntrinsicOp::Round => x.round(),
        IntrinsicOp::Trunc => x.trunc(),
        IntrinsicOp::Pow => x.powf(y),
        IntrinsicOp::Fmod => x % y,
    })
}
