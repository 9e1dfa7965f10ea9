//! High-level instruction definitions.

use smallvec::SmallVec;

use crate::function::BlockId;
use crate::operand::{Operand, VarId};

/// Arithmetic opcodes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArithOp {
    Add,
    And,
    Or,
    Xor,
    Sub,
    Mul,
    Shl,
    Lshr,
    Ashr,
    Udiv,
    Sdiv,
    Urem,
    Srem,
    Fadd,
    Fsub,
    Fmul,
    Fdiv,
    Frem,
}

impl ArithOp {
    /// Whether operand order is irrelevant. Floating-point ops are not
    /// commutative here (NaN payloads and signed zeros).
    pub fn is_commutative(self) -> bool {
        matches!(
            self,
            ArithOp::Add | ArithOp::Mul | ArithOp::And | ArithOp::Or | ArithOp::Xor
        )
    }
}

/// Cast opcodes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CastOp {
    Sext,
    Zext,
    Trunc,
    Fptrunc,
    Fpext,
    Fptosi,
    Fptoui,
    Sitofp,
    Uitofp,
    Bitcast,
}

/// Integer comparison predicates.
///
/// The discriminants index the backend condition tables; keep the order
/// stable.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(usize)]
pub enum ICond {
    Eq = 0,
    Ne,
    Ugt,
    Uge,
    Ult,
    Ule,
    Sgt,
    Sge,
    Slt,
    Sle,
}

pub const NUM_ICONDS: usize = 10;

/// Floating-point comparison predicates, in table order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(usize)]
pub enum FCond {
    False = 0,
    Oeq,
    Ogt,
    Oge,
    Olt,
    Ole,
    One,
    Ord,
    Ueq,
    Ugt,
    Uge,
    Ult,
    Ule,
    Une,
    Uno,
    True,
}

pub const NUM_FCONDS: usize = 16;

/// Intrinsic identifiers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IntrinsicOp {
    AtomicCmpxchg,
    AtomicFence,
    AtomicFenceAll,
    AtomicIsLockFree,
    AtomicLoad,
    AtomicRmw,
    AtomicStore,
    Bswap,
    Ctlz,
    Ctpop,
    Cttz,
    Longjmp,
    Memcpy,
    Memmove,
    Memset,
    ReadThreadPointer,
    Setjmp,
    Sqrt,
    Stackrestore,
    Stacksave,
    Trap,
    /// Unrecognized intrinsic; lowering it is an error.
    Unknown,
}

/// Atomic read-modify-write sub-operations, with their wire encoding.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AtomicRmwOp {
    Add = 1,
    Sub = 2,
    Or = 3,
    And = 4,
    Xor = 5,
    Exchange = 6,
}

impl AtomicRmwOp {
    pub fn from_encoding(value: u64) -> Option<AtomicRmwOp> {
        Some(match value {
            1 => AtomicRmwOp::Add,
            2 => AtomicRmwOp::Sub,
            3 => AtomicRmwOp::Or,
            4 => AtomicRmwOp::And,
            5 => AtomicRmwOp::Xor,
            6 => AtomicRmwOp::Exchange,
            _ => return None,
        })
    }
}

/// The only memory ordering the atomics accept (sequentially consistent).
pub const MEMORY_ORDER_SEQ_CST: u64 = 6;

/// An instruction in the high-level stream.
#[derive(Debug, Clone)]
pub struct Inst {
    pub kind: InstKind,
    pub dest: Option<VarId>,
    /// Lowering may delete an instruction it fused into a neighbour.
    pub deleted: bool,
    /// Variables whose live range ends at this instruction, from the
    /// externally-computed liveness pass. Empty when liveness has not run.
    pub kills: SmallVec<[VarId; 2]>,
}

impl Inst {
    pub fn new(kind: InstKind, dest: Option<VarId>) -> Self {
        Self { kind, dest, deleted: false, kills: SmallVec::new() }
    }

    /// Whether `var`'s live range ends here. Conservatively false when
    /// liveness has not been computed.
    pub fn is_last_use(&self, var: VarId) -> bool {
        self.kills.contains(&var)
    }
}

/// Instruction opcodes with their operands.
#[derive(Debug, Clone)]
pub enum InstKind {
    Alloca { size: Operand, align: u32 },
    Arith { op: ArithOp, a: Operand, b: Operand },
    Assign { src: Operand },
    /// Conditional (`cond` set) or unconditional branch.
    Br { cond: Option<Operand>, true_target: BlockId, false_target: Option<BlockId> },
    Call { target: Operand, args: Vec<Operand>, has_side_effects: bool },
    Cast { op: CastOp, src: Operand },
    ExtractElement { vec: Operand, index: Operand },
    Fcmp { cond: FCond, a: Operand, b: Operand },
    Icmp { cond: ICond, a: Operand, b: Operand },
    InsertElement { vec: Operand, elem: Operand, index: Operand },
    IntrinsicCall { op: IntrinsicOp, args: Vec<Operand>, has_side_effects: bool },
    Load { addr: Operand },
    /// Phis are placed by the middle end; reaching one here is an error.
    Phi,
    Ret { value: Option<Operand> },
    Select { cond: Operand, true_value: Operand, false_value: Operand },
    Store { value: Operand, addr: Operand },
    Switch { value: Operand, cases: Vec<(i64, BlockId)>, default: BlockId },
    Unreachable,
}

impl InstKind {
    /// Whether a conditional branch; used by the fusion peepholes.
    pub fn is_conditional_br(&self) -> bool {
        matches!(self, InstKind::Br { cond: Some(_), .. })
    }
}
