//! Per-function lowering engine.
//!
//! `TargetX8632` walks the high-level instruction stream in IR order and
//! appends machine instructions at the insertion cursor. Registers stay
//! symbolic; the register allocator (external) or the Om1 colourer pins
//! them, and the frame builder gives everything else a stack slot.

mod arith;
mod call;
mod cast;
mod cmp;
mod intrin;
mod mem;
mod vector;

pub(crate) use call::MAX_XMM_ARGS;

use bitflags::bitflags;

use boreal_ir::{
    BlockId, CodegenError, Function, GlobalContext, Inst, InstKind, InstructionSet, MemOffset,
    MemOperand, OptLevel, Operand, RegWeight, SegmentReg, Type, VarId,
};

use crate::cond::BrCond;
use crate::inst::{MBlock, MInst, Target};
use crate::post::post_lower;
use crate::reg::{Reg, RegSet, NUM_REGS};

bitflags! {
    /// Operand forms a target instruction accepts.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct LegalMask: u8 {
        const REG = 1 << 0;
        const MEM = 1 << 1;
        const IMM = 1 << 2;
        const RELOC = 1 << 3;
    }
}

impl LegalMask {
    pub const ALL: LegalMask = LegalMask::all();
    pub const REG_MEM: LegalMask = LegalMask::REG.union(LegalMask::MEM);
    pub const REG_IMM: LegalMask = LegalMask::REG.union(LegalMask::IMM);
}

/// The x86-32 lowering engine for one function.
pub struct TargetX8632<'a> {
    pub(crate) func: &'a mut Function,
    pub(crate) ctx: &'a mut GlobalContext,
    pub(crate) instruction_set: InstructionSet,
    opt_level: OptLevel,

    /// Lowered machine code, one entry per basic block.
    pub(crate) mblocks: Vec<MBlock>,

    // Current-block lowering state.
    pub(crate) cur_block: BlockId,
    cur_insts: Vec<Inst>,
    pub(crate) cur_idx: usize,
    pub(crate) out: Vec<MInst>,

    next_label: u32,
    phys_regs: [Option<VarId>; NUM_REGS],

    // Frame state, filled in by lowering and consumed by the frame builder.
    pub(crate) is_ebp_based_frame: bool,
    pub(crate) needs_stack_alignment: bool,
    pub(crate) spill_area_size_bytes: u32,
    pub(crate) regs_used: RegSet,
    pub(crate) has_computed_frame: bool,
}

impl<'a> TargetX8632<'a> {
    pub fn new(func: &'a mut Function, ctx: &'a mut GlobalContext) -> Self {
        let instruction_set = ctx.opts.instruction_set;
        let opt_level = ctx.opts.opt_level;
        Self {
            func,
            ctx,
            instruction_set,
            opt_level,
            mblocks: Vec::new(),
            cur_block: BlockId(0),
            cur_insts: Vec::new(),
            cur_idx: 0,
            out: Vec::new(),
            next_label: 0,
            phys_regs: [None; NUM_REGS],
            is_ebp_based_frame: false,
            needs_stack_alignment: false,
            spill_area_size_bytes: 0,
            regs_used: RegSet::EMPTY,
            has_computed_frame: false,
        }
    }

    pub fn opt_level(&self) -> OptLevel {
        self.opt_level
    }

    /// The lowered machine code, one entry per basic block.
    pub fn lowered_blocks(&self) -> &[MBlock] {
        &self.mblocks
    }

    /// Run the full pipeline for the configured optimisation level. For O2
    /// the external register allocator is expected to run between
    /// `gen_code` and `gen_frame`; `translate` sequences the stages without
    /// it, which is the complete pipeline for Om1.
    pub fn translate(&mut self) -> Result<(), CodegenError> {
        match self.opt_level {
            OptLevel::O2 => self.translate_o2(),
            OptLevel::Om1 => self.translate_om1(),
        }
    }

    fn translate_o2(&mut self) -> Result<(), CodegenError> {
        self.do_address_opt();
        log::debug!("after x86 address mode opt");
        self.lower_arguments();
        self.gen_code()?;
        log::debug!("after initial x8632 codegen");
        self.gen_frame()?;
        log::debug!("after stack frame mapping");
        self.maybe_insert_nops();
        Ok(())
    }

    fn translate_om1(&mut self) -> Result<(), CodegenError> {
        self.lower_arguments();
        self.gen_code()?;
        log::debug!("after initial x8632 codegen");
        self.gen_frame()?;
        log::debug!("after stack frame mapping");
        self.maybe_insert_nops();
        Ok(())
    }

    /// Lower every block's high-level instructions to machine instructions.
    pub fn gen_code(&mut self) -> Result<(), CodegenError> {
        for b in 0..self.func.blocks.len() {
            let block = BlockId(b as u32);
            self.cur_block = block;
            self.cur_insts = std::mem::take(&mut self.func.blocks[b].insts);
            self.cur_idx = 0;
            while self.cur_idx < self.cur_insts.len() {
                if !self.cur_insts[self.cur_idx].deleted && !self.func.has_error() {
                    let inst = self.cur_insts[self.cur_idx].clone();
                    if let Err(e) = self.lower_inst(&inst) {
                        self.func.set_error(e);
                    }
                }
                self.cur_idx += 1;
            }
            if self.opt_level == OptLevel::Om1 {
                post_lower(self.func, &self.out, self.is_ebp_based_frame);
            }
            let insts = std::mem::take(&mut self.out);
            self.mblocks.push(MBlock { block, insts });
        }
        match self.func.error() {
            Some(e) => Err(e.clone()),
            None => Ok(()),
        }
    }

    fn lower_inst(&mut self, inst: &Inst) -> Result<(), CodegenError> {
        match &inst.kind {
            InstKind::Alloca { size, align } => self.lower_alloca(inst.dest, *size, *align),
            InstKind::Arith { op, a, b } => self.lower_arithmetic(inst.dest, *op, *a, *b),
            InstKind::Assign { src } => self.lower_assign(inst.dest, *src),
            InstKind::Br { cond, true_target, false_target } => {
                self.lower_br(*cond, *true_target, *false_target)
            }
            InstKind::Call { target, args, has_side_effects } => {
                self.lower_call(inst.dest, *target, args, *has_side_effects)
            }
            InstKind::Cast { op, src } => self.lower_cast(inst.dest, *op, *src),
            InstKind::ExtractElement { vec, index } => {
                self.lower_extract_element(inst.dest, *vec, *index)
            }
            InstKind::Fcmp { cond, a, b } => self.lower_fcmp(inst.dest, *cond, *a, *b),
            InstKind::Icmp { cond, a, b } => self.lower_icmp(inst.dest, *cond, *a, *b),
            InstKind::InsertElement { vec, elem, index } => {
                self.lower_insert_element(inst.dest, *vec, *elem, *index)
            }
            InstKind::IntrinsicCall { op, args, has_side_effects } => {
                self.lower_intrinsic_call(inst.dest, *op, args, *has_side_effects)
            }
            InstKind::Load { addr } => self.lower_load(inst.dest, *addr),
            InstKind::Phi => Err(CodegenError::PhiInInstStream),
            InstKind::Ret { value } => self.lower_ret(*value),
            InstKind::Select { cond, true_value, false_value } => {
                self.lower_select(inst.dest, *cond, *true_value, *false_value)
            }
            InstKind::Store { value, addr } => self.lower_store(*value, *addr),
            InstKind::Switch { value, cases, default } => {
                self.lower_switch(*value, cases, *default)
            }
            InstKind::Unreachable => self.lower_unreachable(),
        }
    }

    /// The first four vector arguments, regardless of position, are passed
    /// in xmm0..xmm3. Replace each in the argument list with a home
    /// register and copy it to the original variable at function entry.
    pub fn lower_arguments(&mut self) {
        let mut num_xmm_args = 0;
        let mut entry_copies = Vec::new();
        for i in 0..self.func.args.len() {
            if num_xmm_args >= MAX_XMM_ARGS {
                break;
            }
            let arg = self.func.args[i];
            let ty = self.func.var(arg).ty;
            if !ty.is_vector() {
                continue;
            }
            let name = format!("home_reg:{}", self.func.var(arg).name);
            let reg_arg = self.func.make_named_variable(ty, None, name);
            self.func.var_mut(reg_arg).set_reg_num(Reg::xmm(num_xmm_args as u8).num());
            self.func.var_mut(reg_arg).is_arg = true;
            self.func.var_mut(arg).is_arg = false;
            self.func.args[i] = reg_arg;
            num_xmm_args += 1;
            entry_copies.push(Inst::new(
                InstKind::Assign { src: Operand::Var(reg_arg) },
                Some(arg),
            ));
        }
        if !entry_copies.is_empty() && !self.func.blocks.is_empty() {
            let entry = &mut self.func.blocks[0].insts;
            entry_copies.reverse();
            for copy in entry_copies {
                entry.insert(0, copy);
            }
        }
    }

    fn maybe_insert_nops(&mut self) {
        const NOP_VARIANTS: u32 = 5;
        if !self.ctx.opts.do_nop_insertion {
            return;
        }
        let probability = self.ctx.opts.nop_probability;
        for mb in &mut self.mblocks {
            let mut i = 0;
            while i < mb.insts.len() {
                if self.ctx.random_probability() < probability {
                    let variant = self.ctx.random_below(NOP_VARIANTS);
                    mb.insts.insert(i, MInst::Nop { variant });
                    i += 1;
                }
                i += 1;
            }
        }
    }

    // --- Cursor ---

    /// Index of the next non-deleted high-level instruction, for the
    /// fusion peepholes.
    pub(crate) fn next_inst_index(&self, from: usize) -> Option<usize> {
        let mut i = from + 1;
        while i < self.cur_insts.len() {
            if !self.cur_insts[i].deleted {
                return Some(i);
            }
            i += 1;
        }
        None
    }

    pub(crate) fn inst_at(&self, idx: usize) -> &Inst {
        &self.cur_insts[idx]
    }

    pub(crate) fn delete_inst(&mut self, idx: usize) {
        self.cur_insts[idx].deleted = true;
    }

    /// A fresh intra-block label number.
    pub(crate) fn make_label(&mut self) -> u32 {
        let id = self.next_label;
        self.next_label += 1;
        id
    }

    // --- Variables and registers ---

    /// A new infinite-weight temporary, or one pinned to `reg`.
    pub(crate) fn make_reg(&mut self, ty: Type, reg: Option<Reg>) -> VarId {
        // There are no 64-bit integer registers on x86-32.
        debug_assert!(ty != Type::I64);
        let var = self.func.make_variable(ty, Some(self.cur_block));
        match reg {
            Some(r) => self.func.var_mut(var).set_reg_num(r.num()),
            None => self.func.var_mut(var).set_weight_infinite(),
        }
        var
    }

    /// The variable permanently pinned to a physical register.
    pub(crate) fn get_phys_reg(&mut self, reg: Reg) -> VarId {
        let slot = reg.num() as usize;
        if let Some(var) = self.phys_regs[slot] {
            return var;
        }
        // Multi-block lifetime.
        let var = self.func.make_named_variable(Type::I32, None, reg.name().to_string());
        self.func.var_mut(var).set_reg_num(reg.num());
        self.phys_regs[slot] = Some(var);
        var
    }

    pub(crate) fn frame_or_stack_reg(&self) -> Reg {
        if self.is_ebp_based_frame {
            Reg::Ebp
        } else {
            Reg::Esp
        }
    }

    // --- 64-bit split ---

    /// Materialize the lo/hi i32 children of an i64 (or f64) variable.
    /// Idempotent with stable identity.
    pub(crate) fn split64(&mut self, var: VarId) {
        match self.func.var(var).ty {
            Type::I64 | Type::F64 => {}
            _ => return,
        }
        if self.func.var(var).lo.is_some() {
            debug_assert!(self.func.var(var).hi.is_some());
            return;
        }
        debug_assert!(self.func.var(var).hi.is_none());
        let name = self.func.var(var).name.clone();
        let block = Some(self.cur_block);
        let lo = self.func.make_named_variable(Type::I32, block, format!("{name}__lo"));
        let hi = self.func.make_named_variable(Type::I32, block, format!("{name}__hi"));
        self.func.var_mut(var).lo = Some(lo);
        self.func.var_mut(var).hi = Some(hi);
        if self.func.var(var).is_arg {
            self.func.var_mut(lo).is_arg = true;
            self.func.var_mut(hi).is_arg = true;
        }
    }

    /// The 32-bit view of the low half of an i64 operand.
    pub(crate) fn lo_operand(&mut self, operand: Operand) -> Operand {
        debug_assert!(self.func.operand_ty(&operand) == Type::I64);
        match operand {
            Operand::Var(var) => {
                self.split64(var);
                Operand::Var(self.func.var(var).lo.unwrap_or(var))
            }
            Operand::ConstInt { value, .. } => {
                Operand::const_int(Type::I32, value & 0xffff_ffff)
            }
            Operand::Mem(mem) => Operand::Mem(mem.with_type(Type::I32)),
            _ => unreachable!("unsupported operand kind for lo split"),
        }
    }

    /// The 32-bit view of the high half of an i64 operand; memory forms
    /// shift their displacement by +4 (including relocatable offsets).
    pub(crate) fn hi_operand(&mut self, operand: Operand) -> Operand {
        debug_assert!(self.func.operand_ty(&operand) == Type::I64);
        match operand {
            Operand::Var(var) => {
                self.split64(var);
                Operand::Var(self.func.var(var).hi.unwrap_or(var))
            }
            Operand::ConstInt { value, .. } => {
                Operand::const_int(Type::I32, ((value as u64) >> 32) as i64)
            }
            Operand::Mem(mem) => {
                let offset = match mem.offset {
                    None => Some(MemOffset::Imm(4)),
                    Some(off) => Some(off.plus(4)),
                };
                Operand::Mem(MemOperand { ty: Type::I32, offset, ..mem })
            }
            _ => unreachable!("unsupported operand kind for hi split"),
        }
    }

    // --- Operand legalisation ---

    /// Copy `src` into a fresh register-bound variable of its own type.
    pub(crate) fn copy_to_reg(&mut self, src: Operand, reg: Option<Reg>) -> VarId {
        let ty = self.func.operand_ty(&src);
        let dst = self.make_reg(ty, reg);
        if ty.is_vector() {
            self.push(MInst::Movp { dst, src });
        } else {
            self.push(MInst::Mov { dst, src });
        }
        dst
    }

    /// Coerce `from` into a form in `allowed`. `fixed_reg` pins the result
    /// to one physical register (and implies a register-only mask).
    pub(crate) fn legalize(
        &mut self,
        from: Operand,
        allowed: LegalMask,
        allow_overlap: bool,
        fixed_reg: Option<Reg>,
    ) -> Operand {
        // Every call site admits a register.
        debug_assert!(allowed.contains(LegalMask::REG));
        debug_assert!(fixed_reg.is_none() || allowed == LegalMask::REG);
        match from {
            Operand::Mem(mem) => {
                // Base and index components must be in physical registers
                // before anything else can look at the operand.
                let reg_base = mem.base.map(|b| self.legalize_to_var(Operand::Var(b), true, None));
                let reg_index =
                    mem.index.map(|i| self.legalize_to_var(Operand::Var(i), true, None));
                let mut from = from;
                if reg_base != mem.base || reg_index != mem.index {
                    from = Operand::Mem(MemOperand {
                        base: reg_base,
                        index: reg_index,
                        ..mem
                    });
                }
                if !allowed.contains(LegalMask::MEM) {
                    return Operand::Var(self.copy_to_reg(from, fixed_reg));
                }
                from
            }
            Operand::Var(var) => {
                // A variable is acceptable as-is when it is guaranteed a
                // physical register: pre-colored, or infinite weight.
                let v = self.func.var(var);
                let must_have_register = v.has_reg() || v.weight == RegWeight::Inf;
                let wrong_reg = match fixed_reg {
                    Some(r) => v.reg_num != Some(r.num()),
                    None => false,
                };
                if (!allowed.contains(LegalMask::MEM) && !must_have_register) || wrong_reg {
                    let reg = self.copy_to_reg(from, fixed_reg);
                    if fixed_reg.is_none() {
                        self.func.var_mut(reg).set_preferred_register(var, allow_overlap);
                    }
                    return Operand::Var(reg);
                }
                from
            }
            Operand::Split { .. } => from,
            _ => {
                // The remaining operand kinds are all constants.
                let mut from = from;
                if let Operand::Undef { ty } = from {
                    // Lower undef to zero: uninitialized registers would
                    // make the output less predictable.
                    if ty.is_vector() {
                        return Operand::Var(self.make_vector_of_zeros(ty, None));
                    }
                    from = Operand::zero(ty);
                }
                let needs_reg = !allowed.contains(LegalMask::IMM)
                    || (!allowed.contains(LegalMask::RELOC)
                        && matches!(from, Operand::ConstReloc { .. }))
                    || (!allowed.contains(LegalMask::MEM)
                        && matches!(from, Operand::ConstF32 { .. } | Operand::ConstF64 { .. }));
                if needs_reg {
                    return Operand::Var(self.copy_to_reg(from, fixed_reg));
                }
                from
            }
        }
    }

    pub(crate) fn legalize_default(&mut self, from: Operand) -> Operand {
        self.legalize(from, LegalMask::ALL, false, None)
    }

    /// Legalize and force the result into a variable.
    pub(crate) fn legalize_to_var(
        &mut self,
        from: Operand,
        allow_overlap: bool,
        fixed_reg: Option<Reg>,
    ) -> VarId {
        match self.legalize(from, LegalMask::REG, allow_overlap, fixed_reg) {
            Operand::Var(v) => v,
            _ => unreachable!("legalize(REG) must produce a variable"),
        }
    }

    /// View `operand` as a memory reference of type `ty`, legalized.
    pub(crate) fn form_memory_operand(&mut self, operand: Operand, ty: Type) -> MemOperand {
        let mem = match operand {
            Operand::Mem(mem) => mem,
            Operand::Var(base) => {
                MemOperand::new(ty, Some(base), None, None, 0, SegmentReg::Default)
            }
            Operand::ConstInt { value, .. } => MemOperand::new(
                ty,
                None,
                Some(MemOffset::Imm(value as i32)),
                None,
                0,
                SegmentReg::Default,
            ),
            Operand::ConstReloc { name, offset, .. } => MemOperand::new(
                ty,
                None,
                Some(MemOffset::Reloc(name, offset)),
                None,
                0,
                SegmentReg::Default,
            ),
            _ => unreachable!("operand cannot form a memory reference"),
        };
        match self.legalize_default(Operand::Mem(mem)) {
            Operand::Mem(mem) => mem,
            _ => unreachable!("legalizing a memory operand yields memory"),
        }
    }

    // --- Vector constant materialisation ---
    //
    // There is no support for loading vector constants, so these values
    // are initialized with register operations. The FakeDef before each
    // first use keeps the live range from being overestimated.

    pub(crate) fn make_vector_of_zeros(&mut self, ty: Type, reg: Option<Reg>) -> VarId {
        let zeros = self.make_reg(ty, reg);
        self.push(MInst::FakeDef { dst: zeros, src: None });
        self.push(MInst::Pxor { dst: zeros, src: Operand::Var(zeros) });
        zeros
    }

    pub(crate) fn make_vector_of_minus_ones(&mut self, ty: Type, reg: Option<Reg>) -> VarId {
        let minus_ones = self.make_reg(ty, reg);
        self.push(MInst::FakeDef { dst: minus_ones, src: None });
        self.push(MInst::Pcmpeq { dst: minus_ones, src: Operand::Var(minus_ones) });
        minus_ones
    }

    pub(crate) fn make_vector_of_ones(&mut self, ty: Type, reg: Option<Reg>) -> VarId {
        let dest = self.make_vector_of_zeros(ty, reg);
        let minus_ones = self.make_vector_of_minus_ones(ty, None);
        self.push(MInst::Psub { dst: dest, src: Operand::Var(minus_ones) });
        dest
    }

    /// A vector with only the sign bit set in every lane.
    pub(crate) fn make_vector_of_high_order_bits(&mut self, ty: Type, reg: Option<Reg>) -> VarId {
        debug_assert!(matches!(ty, Type::V4I32 | Type::V4F32 | Type::V8I16 | Type::V16I8));
        if ty == Type::V16I8 {
            // SSE has no left shift for vectors of 8-bit lanes.
            const HIGH_ORDER_BITS_MASK: i64 = 0x8080_8080;
            let mask = Operand::const_int(Type::I32, HIGH_ORDER_BITS_MASK);
            let reg_var = self.make_reg(ty, reg);
            let mask_rm = self.legalize(mask, LegalMask::REG_MEM, false, None);
            self.push(MInst::Movd { dst: reg_var, src: mask_rm });
            self.push(MInst::Pshufd { dst: reg_var, src: Operand::Var(reg_var), mask: 0 });
            reg_var
        } else {
            let ones = self.make_vector_of_ones(ty, reg);
            let shift = ty.element_type().width_in_bytes() * 8 - 1;
            self.push(MInst::Psll {
                dst: ones,
                amount: Operand::const_int(Type::I8, shift as i64),
            });
            ones
        }
    }

    /// A memory operand addressing `offset` bytes into a stack slot.
    /// The slot's address is not known until the frame is built, so it is
    /// computed with a `lea`.
    pub(crate) fn memory_operand_for_stack_slot(
        &mut self,
        ty: Type,
        slot: VarId,
        offset: u32,
    ) -> MemOperand {
        debug_assert!(self.func.var(slot).weight == RegWeight::Zero);
        debug_assert!(!self.func.var(slot).has_reg());
        let loc = self.make_reg(Type::I32, None);
        self.push(MInst::Lea { dst: loc, src: Operand::Var(slot) });
        MemOperand::new(
            ty,
            Some(loc),
            Some(MemOffset::Imm(offset as i32)),
            None,
            0,
            SegmentReg::Default,
        )
    }

    // --- Small lowerings ---

    pub(crate) fn lower_assign(
        &mut self,
        dest: Option<VarId>,
        src: Operand,
    ) -> Result<(), CodegenError> {
        let dest = dest.expect("assign has a destination");
        debug_assert!(self.func.var(dest).ty == self.func.operand_ty(&src));
        if self.func.var(dest).ty == Type::I64 {
            let src = self.legalize_default(src);
            let src_lo = self.lo_operand(src);
            let src_hi = self.hi_operand(src);
            let dest_lo = self.lo_var(dest);
            let dest_hi = self.hi_var(dest);
            let t_lo = self.mov(&mut None, src_lo);
            self.mov(&mut Some(dest_lo), Operand::Var(t_lo));
            let t_hi = self.mov(&mut None, src_hi);
            self.mov(&mut Some(dest_hi), Operand::Var(t_hi));
        } else {
            const ALLOW_OVERLAP: bool = true;
            // RI is either a physical register or an immediate.
            let ri = self.legalize(src, LegalMask::REG_IMM, ALLOW_OVERLAP, None);
            if self.func.var(dest).ty.is_vector() {
                self.push(MInst::Movp { dst: dest, src: ri });
            } else {
                self.mov(&mut Some(dest), ri);
            }
        }
        Ok(())
    }

    pub(crate) fn lower_unreachable(&mut self) -> Result<(), CodegenError> {
        self.lower_helper_call("ice_unreachable", None, &[])
    }

    /// Lower a call to a named runtime helper. Helper names are never
    /// mangled.
    pub(crate) fn lower_helper_call(
        &mut self,
        name: &str,
        dest: Option<VarId>,
        args: &[Operand],
    ) -> Result<(), CodegenError> {
        let sym = self.ctx.intern(name);
        let target =
            Operand::ConstReloc { ty: Type::I32, name: sym, offset: 0, suppress_mangling: true };
        self.lower_call(dest, target, args, true)
    }

    // --- Destination halves ---

    pub(crate) fn lo_var(&mut self, var: VarId) -> VarId {
        match self.lo_operand(Operand::Var(var)) {
            Operand::Var(v) => v,
            _ => unreachable!("lo of a variable is a variable"),
        }
    }

    pub(crate) fn hi_var(&mut self, var: VarId) -> VarId {
        match self.hi_operand(Operand::Var(var)) {
            Operand::Var(v) => v,
            _ => unreachable!("hi of a variable is a variable"),
        }
    }

    // --- Instruction emitters ---
    //
    // Each helper appends one machine instruction at the cursor. The mov
    // family takes its destination by mutable reference: a `None` sentinel
    // makes the emitter fabricate a fresh infinite-weight temporary and
    // store it back, so the lowering reads as straight-line
    // pseudo-assembly and the allocator sees fresh-copy-per-def form. The
    // concrete destination is also returned for convenience.

    pub(crate) fn push(&mut self, inst: MInst) {
        self.out.push(inst);
    }

    fn ensure_dest(&mut self, dest: &mut Option<VarId>, ty: Type, reg: Option<Reg>) -> VarId {
        match *dest {
            Some(dst) => dst,
            None => {
                let dst = self.make_reg(ty, reg);
                *dest = Some(dst);
                dst
            }
        }
    }

    /// `mov` (`movss`/`movsd` for scalar fp).
    pub(crate) fn mov(&mut self, dest: &mut Option<VarId>, src: Operand) -> VarId {
        let ty = self.func.operand_ty(&src);
        let dst = self.ensure_dest(dest, ty, None);
        self.push(MInst::Mov { dst, src });
        dst
    }

    /// `mov` with the fabricated destination pinned to `reg`.
    pub(crate) fn mov_fixed(
        &mut self,
        dest: &mut Option<VarId>,
        src: Operand,
        reg: Reg,
    ) -> VarId {
        let ty = self.func.operand_ty(&src);
        let dst = self.ensure_dest(dest, ty, Some(reg));
        self.push(MInst::Mov { dst, src });
        dst
    }

    pub(crate) fn movzx(&mut self, dst: VarId, src: Operand) {
        self.push(MInst::Movzx { dst, src });
    }

    pub(crate) fn movsx(&mut self, dst: VarId, src: Operand) {
        self.push(MInst::Movsx { dst, src });
    }

    pub(crate) fn add(&mut self, dst: VarId, src: Operand) {
        self.push(MInst::Add { dst, src });
    }

    pub(crate) fn adc(&mut self, dst: VarId, src: Operand) {
        self.push(MInst::Adc { dst, src });
    }

    pub(crate) fn sub(&mut self, dst: VarId, src: Operand) {
        self.push(MInst::Sub { dst, src });
    }

    pub(crate) fn sbb(&mut self, dst: VarId, src: Operand) {
        self.push(MInst::Sbb { dst, src });
    }

    pub(crate) fn and(&mut self, dst: VarId, src: Operand) {
        self.push(MInst::And { dst, src });
    }

    pub(crate) fn or(&mut self, dst: VarId, src: Operand) {
        self.push(MInst::Or { dst, src });
    }

    pub(crate) fn xor(&mut self, dst: VarId, src: Operand) {
        self.push(MInst::Xor { dst, src });
    }

    pub(crate) fn cmp(&mut self, a: Operand, b: Operand) {
        self.push(MInst::Cmp { a, b });
    }

    pub(crate) fn test(&mut self, a: Operand, b: Operand) {
        self.push(MInst::Test { a, b });
    }

    pub(crate) fn store(&mut self, value: Operand, addr: Operand) {
        self.push(MInst::Store { value, addr });
    }

    pub(crate) fn br_label(&mut self, cond: BrCond, label: u32) {
        self.push(MInst::Br {
            cond: Some(cond),
            target: Target::Label(label),
            target_false: None,
        });
    }

    pub(crate) fn br_blocks(&mut self, cond: BrCond, t: BlockId, f: BlockId) {
        self.push(MInst::Br {
            cond: Some(cond),
            target: Target::Block(t),
            target_false: Some(Target::Block(f)),
        });
    }

    pub(crate) fn br_uncond(&mut self, target: BlockId) {
        self.push(MInst::Br { cond: None, target: Target::Block(target), target_false: None });
    }

    pub(crate) fn place_label(&mut self, id: u32) {
        self.push(MInst::Label { id });
    }

    pub(crate) fn fake_def(&mut self, dst: VarId, src: Option<VarId>) {
        self.push(MInst::FakeDef { dst, src });
    }

    pub(crate) fn fake_use(&mut self, var: VarId) {
        self.push(MInst::FakeUse { var });
    }
}
