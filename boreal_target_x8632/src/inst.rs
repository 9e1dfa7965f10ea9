//! x86-32 machine instruction definitions.
//!
//! Lowering appends `MInst`s at the insertion cursor; registers are still
//! symbolic (`VarId`) until the allocator or the Om1 colourer pins them.
//! The Fake* pseudo instructions model implicit definitions and intra-block
//! liveness and emit no text.

use boreal_ir::{BlockId, MemOperand, Operand, VarId};
use smallvec::SmallVec;

use crate::cond::{BrCond, CmppsCond};

/// Branch target: an intra-block local label or a basic block.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Target {
    Label(u32),
    Block(BlockId),
}

/// One lowered basic block.
#[derive(Debug)]
pub struct MBlock {
    pub block: BlockId,
    pub insts: Vec<MInst>,
}

/// How an instruction touches a variable.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VarRole {
    Def,
    Use,
    UseDef,
}

/// A machine-level x86-32 instruction.
#[derive(Debug, Clone)]
pub enum MInst {
    /// `mov` (or `movss`/`movsd` for scalar fp destinations).
    Mov { dst: VarId, src: Operand },
    /// Vector register/memory move (`movups`).
    Movp { dst: VarId, src: Operand },
    /// 8-byte move through an xmm register (`movq`).
    Movq { dst: VarId, src: Operand },
    /// GPR <-> xmm lane 0 move (`movd`).
    Movd { dst: VarId, src: Operand },
    /// Binary low-lane merge (`movss xmm, xmm`); dst keeps its upper lanes.
    Movss { dst: VarId, src: VarId },
    Movzx { dst: VarId, src: Operand },
    Movsx { dst: VarId, src: Operand },
    Lea { dst: VarId, src: Operand },
    /// Store to memory (`mov [..], r/imm`, or `movss`/`movsd`).
    Store { value: Operand, addr: Operand },
    /// 16-byte vector store (`movups [..], xmm`).
    Storep { value: VarId, addr: Operand },
    /// 8-byte store from an xmm register (`movq [..], xmm`).
    Storeq { value: VarId, addr: Operand },

    Add { dst: VarId, src: Operand },
    Adc { dst: VarId, src: Operand },
    Sub { dst: VarId, src: Operand },
    Sbb { dst: VarId, src: Operand },
    And { dst: VarId, src: Operand },
    Or { dst: VarId, src: Operand },
    Xor { dst: VarId, src: Operand },
    Imul { dst: VarId, src: Operand },
    /// Widening unsigned multiply: `mul src2` with `src1` in eax and the
    /// product in edx:eax. The edx half is modeled by a following FakeDef.
    Mul { dst: VarId, src1: VarId, src2: Operand },
    /// Unsigned divide: quotient/remainder land in `dst`/`other` (eax/edx,
    /// or al/ah for 8-bit).
    Div { dst: VarId, divisor: Operand, other: VarId },
    Idiv { dst: VarId, divisor: Operand, other: VarId },
    /// Sign extension of eax into edx:eax (`cbw`/`cwd`/`cdq` by width).
    Cbwdq { dst: VarId, src: VarId },
    Neg { dst: VarId },
    Shl { dst: VarId, amount: Operand },
    Shr { dst: VarId, amount: Operand },
    Sar { dst: VarId, amount: Operand },
    Shld { dst: VarId, src: VarId, amount: Operand },
    Shrd { dst: VarId, src: VarId, amount: Operand },
    Rol { dst: VarId, amount: Operand },
    Bswap { dst: VarId },
    Bsf { dst: VarId, src: Operand },
    Bsr { dst: VarId, src: Operand },
    Cmov { cond: BrCond, dst: VarId, src: Operand },

    Cmp { a: Operand, b: Operand },
    Test { a: Operand, b: Operand },
    /// `ucomiss`/`ucomisd` by operand type.
    Ucomiss { a: VarId, b: Operand },

    /// `addss`/`addsd` by destination type; likewise for the others.
    Addss { dst: VarId, src: Operand },
    Subss { dst: VarId, src: Operand },
    Mulss { dst: VarId, src: Operand },
    Divss { dst: VarId, src: Operand },
    Sqrtss { dst: VarId, src: Operand },
    /// Scalar/vector conversion; mnemonic derived from both operand types,
    /// with a `t` infix for truncating integer conversions.
    Cvt { dst: VarId, src: Operand, trunc: bool },
    /// x87 load; the emitter shuffles xmm-resident sources through memory.
    Fld { src: Operand },
    /// x87 pop into a variable, via memory when the dest lives in an xmm.
    Fstp { dst: VarId },

    Padd { dst: VarId, src: Operand },
    Psub { dst: VarId, src: Operand },
    Pand { dst: VarId, src: Operand },
    Pandn { dst: VarId, src: Operand },
    Por { dst: VarId, src: Operand },
    Pxor { dst: VarId, src: Operand },
    /// Type-specific packed multiply (`pmullw`/`pmulld`).
    Pmull { dst: VarId, src: Operand },
    Pmuludq { dst: VarId, src: Operand },
    Pcmpeq { dst: VarId, src: Operand },
    Pcmpgt { dst: VarId, src: Operand },
    Psll { dst: VarId, amount: Operand },
    Psra { dst: VarId, amount: Operand },
    Pshufd { dst: VarId, src: Operand, mask: u8 },
    Shufps { dst: VarId, src: Operand, mask: u8 },
    Cmpps { dst: VarId, src: Operand, pred: CmppsCond },
    Addps { dst: VarId, src: Operand },
    Subps { dst: VarId, src: Operand },
    Mulps { dst: VarId, src: Operand },
    Divps { dst: VarId, src: Operand },
    /// `pextrb`/`pextrw`/`pextrd` by lane width.
    Pextr { dst: VarId, src: VarId, lane: u8 },
    Pinsr { dst: VarId, src: Operand, lane: u8 },
    Insertps { dst: VarId, src: Operand, mask: u8 },
    /// Variable blend; the mask must be pinned to xmm0.
    Blendvps { dst: VarId, src: Operand, mask: VarId },
    Pblendvb { dst: VarId, src: Operand, mask: VarId },

    Cmpxchg { addr: MemOperand, eax: VarId, desired: VarId, locked: bool },
    Cmpxchg8b {
        addr: MemOperand,
        edx: VarId,
        eax: VarId,
        ecx: VarId,
        ebx: VarId,
        locked: bool,
    },
    Xadd { addr: MemOperand, val: VarId, locked: bool },
    Xchg { addr: MemOperand, val: VarId },
    Mfence,

    /// Intra-block local label.
    Label { id: u32 },
    /// Conditional (`cond` set) or unconditional jump. A conditional jump
    /// with a `target_false` lowers an IR two-way branch.
    Br { cond: Option<BrCond>, target: Target, target_false: Option<Target> },
    Call { dest: Option<VarId>, target: Operand },
    Ret { src: Option<VarId> },
    Push { src: VarId },
    Pop { dst: VarId },
    /// Pre-call `sub esp, amount`; the emitter folds `amount` into the
    /// frame offsets of esp-relative variables until the call.
    AdjustStack { amount: u32 },
    Ud2,
    Nop { variant: u32 },

    /// Models an implicit definition (e.g. edx after `mul`); emits nothing.
    FakeDef { dst: VarId, src: Option<VarId> },
    /// Keeps a value live across intra-block control flow; emits nothing.
    FakeUse { var: VarId },
    /// Kills the scratch registers at a call site; emits nothing.
    FakeKill { killed: Vec<VarId> },
}

fn operand_vars(op: &Operand, f: &mut dyn FnMut(VarId, VarRole)) {
    match op {
        Operand::Var(v) => f(*v, VarRole::Use),
        Operand::Mem(mem) => mem_vars(mem, f),
        Operand::Split { var, .. } => f(*var, VarRole::Use),
        _ => {}
    }
}

fn mem_vars(mem: &MemOperand, f: &mut dyn FnMut(VarId, VarRole)) {
    if let Some(base) = mem.base {
        f(base, VarRole::Use);
    }
    if let Some(index) = mem.index {
        f(index, VarRole::Use);
    }
}

impl MInst {
    /// Visit every variable the instruction touches, with its role. The
    /// Fake* pseudo instructions participate so that live ranges stay
    /// honest; `FakeKill` deliberately reports nothing (the colourer must
    /// not blacklist scratch registers across calls).
    pub fn for_each_var(&self, f: &mut dyn FnMut(VarId, VarRole)) {
        use MInst::*;
        match self {
            Mov { dst, src }
            | Movp { dst, src }
            | Movq { dst, src }
            | Movd { dst, src }
            | Movzx { dst, src }
            | Movsx { dst, src }
            | Lea { dst, src }
            | Cvt { dst, src, .. }
            | Bsf { dst, src }
            | Bsr { dst, src }
            | Sqrtss { dst, src }
            | Pshufd { dst, src, .. } => {
                f(*dst, VarRole::Def);
                operand_vars(src, f);
            }
            Movss { dst, src } => {
                f(*dst, VarRole::UseDef);
                f(*src, VarRole::Use);
            }
            Store { value, addr } => {
                operand_vars(value, f);
                operand_vars(addr, f);
            }
            Storep { value, addr } | Storeq { value, addr } => {
                f(*value, VarRole::Use);
                operand_vars(addr, f);
            }
            Add { dst, src }
            | Adc { dst, src }
            | Sub { dst, src }
            | Sbb { dst, src }
            | And { dst, src }
            | Or { dst, src }
            | Xor { dst, src }
            | Imul { dst, src }
            | Cmov { dst, src, .. }
            | Addss { dst, src }
            | Subss { dst, src }
            | Mulss { dst, src }
            | Divss { dst, src }
            | Padd { dst, src }
            | Psub { dst, src }
            | Pand { dst, src }
            | Pandn { dst, src }
            | Por { dst, src }
            | Pxor { dst, src }
            | Pmull { dst, src }
            | Pmuludq { dst, src }
            | Pcmpeq { dst, src }
            | Pcmpgt { dst, src }
            | Shufps { dst, src, .. }
            | Cmpps { dst, src, .. }
            | Addps { dst, src }
            | Subps { dst, src }
            | Mulps { dst, src }
            | Divps { dst, src }
            | Pinsr { dst, src, .. }
            | Insertps { dst, src, .. } => {
                f(*dst, VarRole::UseDef);
                operand_vars(src, f);
            }
            Blendvps { dst, src, mask } | Pblendvb { dst, src, mask } => {
                f(*dst, VarRole::UseDef);
                operand_vars(src, f);
                f(*mask, VarRole::Use);
            }
            Mul { dst, src1, src2 } => {
                f(*dst, VarRole::Def);
                f(*src1, VarRole::Use);
                operand_vars(src2, f);
            }
            Div { dst, divisor, other } | Idiv { dst, divisor, other } => {
                f(*dst, VarRole::UseDef);
                operand_vars(divisor, f);
                f(*other, VarRole::UseDef);
            }
            Cbwdq { dst, src } => {
                f(*dst, VarRole::Def);
                f(*src, VarRole::Use);
            }
            Neg { dst } | Bswap { dst } => f(*dst, VarRole::UseDef),
            Shl { dst, amount }
            | Shr { dst, amount }
            | Sar { dst, amount }
            | Rol { dst, amount }
            | Psll { dst, amount }
            | Psra { dst, amount } => {
                f(*dst, VarRole::UseDef);
                operand_vars(amount, f);
            }
            Shld { dst, src, amount } | Shrd { dst, src, amount } => {
                f(*dst, VarRole::UseDef);
                f(*src, VarRole::Use);
                operand_vars(amount, f);
            }
            Cmp { a, b } | Test { a, b } => {
                operand_vars(a, f);
                operand_vars(b, f);
            }
            Ucomiss { a, b } => {
                f(*a, VarRole::Use);
                operand_vars(b, f);
            }
            Pextr { dst, src, .. } => {
                f(*dst, VarRole::Def);
                f(*src, VarRole::Use);
            }
            Fld { src } => operand_vars(src, f),
            Fstp { dst } => f(*dst, VarRole::Def),
            Cmpxchg { addr, eax, desired, .. } => {
                mem_vars(addr, f);
                f(*eax, VarRole::UseDef);
                f(*desired, VarRole::Use);
            }
            Cmpxchg8b { addr, edx, eax, ecx, ebx, .. } => {
                mem_vars(addr, f);
                f(*edx, VarRole::UseDef);
                f(*eax, VarRole::UseDef);
                f(*ecx, VarRole::Use);
                f(*ebx, VarRole::Use);
            }
            Xadd { addr, val, .. } | Xchg { addr, val } => {
                mem_vars(addr, f);
                f(*val, VarRole::UseDef);
            }
            Call { dest, target } => {
                if let Some(dest) = dest {
                    f(*dest, VarRole::Def);
                }
                operand_vars(target, f);
            }
            Ret { src } => {
                if let Some(src) = src {
                    f(*src, VarRole::Use);
                }
            }
            Push { src } => f(*src, VarRole::Use),
            Pop { dst } => f(*dst, VarRole::Def),
            FakeDef { dst, src } => {
                f(*dst, VarRole::Def);
                if let Some(src) = src {
                    f(*src, VarRole::Use);
                }
            }
            FakeUse { var } => f(*var, VarRole::Use),
            FakeKill { .. } => {}
            Mfence | Label { .. } | Br { .. } | AdjustStack { .. } | Ud2 | Nop { .. } => {}
        }
    }

    /// Collected variables, for passes that want a list.
    pub fn vars(&self) -> SmallVec<[(VarId, VarRole); 6]> {
        let mut out = SmallVec::new();
        self.for_each_var(&mut |v, role| out.push((v, role)));
        out
    }

    /// Whether this is a pseudo instruction the emitter elides.
    pub fn is_fake(&self) -> bool {
        matches!(
            self,
            MInst::FakeDef { .. } | MInst::FakeUse { .. } | MInst::FakeKill { .. }
        )
    }
}
