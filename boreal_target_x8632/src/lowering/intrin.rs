//! Intrinsic lowering: atomics, bit manipulation, memory helpers.

use boreal_ir::{
    AtomicRmwOp, CastOp, CodegenError, ICond, InstKind, IntrinsicOp, MemOffset, MemOperand,
    OptLevel, Operand, SegmentReg, Type, VarId, MEMORY_ORDER_SEQ_CST,
};

use crate::cond::BrCond;
use crate::inst::{MInst, VarRole};
use crate::lowering::{LegalMask, TargetX8632};
use crate::reg::Reg;

/// A two-address binary emitter used when expanding an atomic RMW as a
/// cmpxchg loop.
type LowerBinOp<'b> = fn(&mut TargetX8632<'b>, VarId, Operand);

fn memory_order_valid(order: Operand) -> bool {
    order.as_const_int() == Some(MEMORY_ORDER_SEQ_CST as i64)
}

impl<'b> TargetX8632<'b> {
    pub(crate) fn lower_intrinsic_call(
        &mut self,
        dest: Option<VarId>,
        op: IntrinsicOp,
        args: &[Operand],
        _has_side_effects: bool,
    ) -> Result<(), CodegenError> {
        match op {
            IntrinsicOp::AtomicCmpxchg => {
                if !memory_order_valid(args[3]) || !memory_order_valid(args[4]) {
                    return Err(CodegenError::InvalidMemoryOrder("AtomicCmpxchg"));
                }
                let dest_prev = dest.expect("cmpxchg has a destination");
                let ptr = args[0];
                let expected = args[1];
                let desired = args[2];
                if self.try_optimized_cmpxchg_cmp_br(dest_prev, ptr, expected, desired)? {
                    return Ok(());
                }
                self.lower_atomic_cmpxchg(dest_prev, ptr, expected, desired)
            }
            IntrinsicOp::AtomicFence => {
                if !memory_order_valid(args[0]) {
                    return Err(CodegenError::InvalidMemoryOrder("AtomicFence"));
                }
                self.push(MInst::Mfence);
                Ok(())
            }
            IntrinsicOp::AtomicFenceAll => {
                // FenceAll blocks motion of all loads and stores across the
                // fence, atomic or not; mfence is coarsely marked as having
                // side effects, which covers it.
                self.push(MInst::Mfence);
                Ok(())
            }
            IntrinsicOp::AtomicIsLockFree => {
                // x86 is lock free for 8/16/32/64 bit accesses. cmpxchg16b
                // does not exist in 32-bit mode, so larger sizes report 0.
                let dest = dest.expect("is-lock-free has a destination");
                let Some(byte_size) = args[0].as_const_int() else {
                    return Err(CodegenError::NonConstantLockFreeSize);
                };
                let result = match byte_size {
                    1 | 2 | 4 | 8 => 1,
                    _ => 0,
                };
                self.mov(&mut Some(dest), Operand::const_i32(result));
                Ok(())
            }
            IntrinsicOp::AtomicLoad => {
                // The memory address is required to be naturally aligned,
                // so ordinary loads are atomic.
                if !memory_order_valid(args[1]) {
                    return Err(CodegenError::InvalidMemoryOrder("AtomicLoad"));
                }
                let dest = dest.expect("atomic load has a destination");
                if self.func.var(dest).ty == Type::I64 {
                    // Do the load through an xmm register with a single
                    // movq rather than splitting it in two.
                    let t = self.make_reg(Type::F64, None);
                    let addr = self.form_memory_operand(args[0], Type::F64);
                    self.push(MInst::Movq { dst: t, src: Operand::Mem(addr) });
                    self.lower_cast(Some(dest), CastOp::Bitcast, Operand::Var(t))?;
                    // Keep the load alive when the value goes unused.
                    let dest_lo = self.lo_var(dest);
                    let dest_hi = self.hi_var(dest);
                    self.fake_use(dest_lo);
                    self.fake_use(dest_hi);
                    return Ok(());
                }
                self.lower_load(Some(dest), args[0])?;
                // The load may have fused with an arithmetic instruction,
                // so put the keep-alive FakeUse on the last-emitted dest.
                if let Some(var) = self.last_emitted_dest() {
                    self.fake_use(var);
                }
                Ok(())
            }
            IntrinsicOp::AtomicRmw => {
                if !memory_order_valid(args[3]) {
                    return Err(CodegenError::InvalidMemoryOrder("AtomicRMW"));
                }
                let operation = args[0]
                    .as_const_int()
                    .and_then(|v| AtomicRmwOp::from_encoding(v as u64))
                    .ok_or(CodegenError::UnknownAtomicRmwOp)?;
                let dest = dest.expect("atomic rmw has a destination");
                self.lower_atomic_rmw(dest, operation, args[1], args[2])
            }
            IntrinsicOp::AtomicStore => {
                if !memory_order_valid(args[2]) {
                    return Err(CodegenError::InvalidMemoryOrder("AtomicStore"));
                }
                // Naturally-aligned ordinary stores are atomic; add a
                // fence after the store to make it visible.
                let value = args[0];
                let ptr = args[1];
                if self.func.operand_ty(&value) == Type::I64 {
                    // A single movq through an xmm register instead of a
                    // split store.
                    let t = self.make_reg(Type::F64, None);
                    self.lower_cast(Some(t), CastOp::Bitcast, value)?;
                    let addr = self.form_memory_operand(ptr, Type::F64);
                    self.push(MInst::Storeq { value: t, addr: Operand::Mem(addr) });
                    self.push(MInst::Mfence);
                    return Ok(());
                }
                self.lower_store(value, ptr)?;
                self.push(MInst::Mfence);
                Ok(())
            }
            IntrinsicOp::Bswap => self.lower_bswap(dest, args[0]),
            IntrinsicOp::Ctpop => {
                let dest = dest.expect("ctpop has a destination");
                let val = args[0];
                let helper = if self.func.operand_ty(&val) == Type::I64 {
                    "__popcountdi2"
                } else {
                    "__popcountsi2"
                };
                self.lower_helper_call(helper, Some(dest), &[val])?;
                // The helpers return 32-bit values; clear the upper half of
                // an i64 dest in case the caller's IR doesn't.
                if self.func.operand_ty(&val) == Type::I64 {
                    let dest_hi = self.hi_var(dest);
                    self.mov(&mut Some(dest_hi), Operand::zero(Type::I32));
                }
                Ok(())
            }
            IntrinsicOp::Ctlz => {
                // The "is zero undef" parameter is ignored; the result is
                // always well defined.
                let val = self.legalize_default(args[0]);
                let ty = self.func.operand_ty(&val);
                let (first_val, second_val) = if ty == Type::I64 {
                    (self.lo_operand(val), Some(self.hi_operand(val)))
                } else {
                    (val, None)
                };
                let dest = dest.expect("ctlz has a destination");
                self.lower_count_zeros(false, ty, dest, first_val, second_val)
            }
            IntrinsicOp::Cttz => {
                let val = self.legalize_default(args[0]);
                let ty = self.func.operand_ty(&val);
                let (first_val, second_val) = if ty == Type::I64 {
                    (self.hi_operand(val), Some(self.lo_operand(val)))
                } else {
                    (val, None)
                };
                let dest = dest.expect("cttz has a destination");
                self.lower_count_zeros(true, ty, dest, first_val, second_val)
            }
            IntrinsicOp::Longjmp => self.lower_helper_call("longjmp", None, &args[0..2]),
            IntrinsicOp::Memcpy => {
                // An inline sequence is possible for known small lengths,
                // but the helper is always correct.
                self.lower_helper_call("memcpy", None, &args[0..3])
            }
            IntrinsicOp::Memmove => self.lower_helper_call("memmove", None, &args[0..3]),
            IntrinsicOp::Memset => {
                // The value operand is an i8; widen it to a full stack
                // slot, arguments being at least 32 bits wide.
                debug_assert!(self.func.operand_ty(&args[1]) == Type::I8);
                let val_ext = self.func.make_variable(Type::I32, Some(self.cur_block));
                self.lower_cast(Some(val_ext), CastOp::Zext, args[1])?;
                self.lower_helper_call(
                    "memset",
                    None,
                    &[args[0], Operand::Var(val_ext), args[2]],
                )
            }
            IntrinsicOp::ReadThreadPointer => {
                if self.ctx.opts.use_sandboxing {
                    let src = Operand::Mem(MemOperand::new(
                        Type::I32,
                        None,
                        Some(MemOffset::Imm(0)),
                        None,
                        0,
                        SegmentReg::Gs,
                    ));
                    let dest = dest.expect("thread-pointer read has a destination");
                    let t = self.mov(&mut None, src);
                    self.mov(&mut Some(dest), Operand::Var(t));
                    Ok(())
                } else {
                    self.lower_helper_call("__nacl_read_tp", dest, &[])
                }
            }
            IntrinsicOp::Setjmp => self.lower_helper_call("setjmp", dest, &args[0..1]),
            IntrinsicOp::Sqrt => {
                let src = self.legalize_default(args[0]);
                let dest = dest.expect("sqrt has a destination");
                let ty = self.func.var(dest).ty;
                let t = self.make_reg(ty, None);
                self.push(MInst::Sqrtss { dst: t, src });
                self.mov(&mut Some(dest), Operand::Var(t));
                Ok(())
            }
            IntrinsicOp::Stacksave => {
                let esp = self.get_phys_reg(Reg::Esp);
                let dest = dest.expect("stacksave has a destination");
                self.mov(&mut Some(dest), Operand::Var(esp));
                Ok(())
            }
            IntrinsicOp::Stackrestore => {
                let esp = self.get_phys_reg(Reg::Esp);
                self.mov(&mut Some(esp), args[0]);
                Ok(())
            }
            IntrinsicOp::Trap => {
                self.push(MInst::Ud2);
                Ok(())
            }
            IntrinsicOp::Unknown => Err(CodegenError::UnknownIntrinsic),
        }
    }

    /// The destination variable written by the most recently emitted
    /// machine instruction.
    fn last_emitted_dest(&self) -> Option<VarId> {
        let last = self.out.last()?;
        let mut dest = None;
        last.for_each_var(&mut |var, role| {
            if dest.is_none() && matches!(role, VarRole::Def | VarRole::UseDef) {
                dest = Some(var);
            }
        });
        dest
    }

    fn lower_bswap(&mut self, dest: Option<VarId>, val: Operand) -> Result<(), CodegenError> {
        let dest = dest.expect("bswap has a destination");
        // bswap only works on 32-bit register operands; use rotate left
        // for the 16-bit form.
        match self.func.operand_ty(&val) {
            Type::I64 => {
                let val_lo = self.lo_operand(val);
                let val_hi = self.hi_operand(val);
                let t_lo = self.legalize_to_var(val_lo, false, None);
                let t_hi = self.legalize_to_var(val_hi, false, None);
                let dest_lo = self.lo_var(dest);
                let dest_hi = self.hi_var(dest);
                self.push(MInst::Bswap { dst: t_lo });
                self.push(MInst::Bswap { dst: t_hi });
                self.mov(&mut Some(dest_lo), Operand::Var(t_hi));
                self.mov(&mut Some(dest_hi), Operand::Var(t_lo));
            }
            Type::I32 => {
                let t = self.legalize_to_var(val, false, None);
                self.push(MInst::Bswap { dst: t });
                self.mov(&mut Some(dest), Operand::Var(t));
            }
            _ => {
                debug_assert!(self.func.operand_ty(&val) == Type::I16);
                let val = self.legalize_default(val);
                let eight = Operand::const_int(Type::I16, 8);
                let t = self.mov(&mut None, val);
                self.push(MInst::Rol { dst: t, amount: eight });
                self.mov(&mut Some(dest), Operand::Var(t));
            }
        }
        Ok(())
    }

    fn lower_atomic_cmpxchg(
        &mut self,
        dest_prev: VarId,
        ptr: Operand,
        expected: Operand,
        desired: Operand,
    ) -> Result<(), CodegenError> {
        if self.func.operand_ty(&expected) == Type::I64 {
            // Reserve the pre-colored registers first, before any more
            // infinite-weight variables come out of the memory-operand
            // legalization.
            let t_edx = self.make_reg(Type::I32, Some(Reg::Edx));
            let t_eax = self.make_reg(Type::I32, Some(Reg::Eax));
            let t_ecx = self.make_reg(Type::I32, Some(Reg::Ecx));
            let t_ebx = self.make_reg(Type::I32, Some(Reg::Ebx));
            let expected_lo = self.lo_operand(expected);
            let expected_hi = self.hi_operand(expected);
            let desired_lo = self.lo_operand(desired);
            let desired_hi = self.hi_operand(desired);
            self.mov(&mut Some(t_eax), expected_lo);
            self.mov(&mut Some(t_edx), expected_hi);
            self.mov(&mut Some(t_ebx), desired_lo);
            self.mov(&mut Some(t_ecx), desired_hi);
            let addr = self.form_memory_operand(ptr, Type::I64);
            self.push(MInst::Cmpxchg8b {
                addr,
                edx: t_edx,
                eax: t_eax,
                ecx: t_ecx,
                ebx: t_ebx,
                locked: true,
            });
            let dest_lo = self.lo_var(dest_prev);
            let dest_hi = self.hi_var(dest_prev);
            self.mov(&mut Some(dest_lo), Operand::Var(t_eax));
            self.mov(&mut Some(dest_hi), Operand::Var(t_edx));
            return Ok(());
        }
        let ty = self.func.operand_ty(&expected);
        let t_eax = self.make_reg(ty, Some(Reg::Eax));
        self.mov(&mut Some(t_eax), expected);
        let addr = self.form_memory_operand(ptr, ty);
        let desired_reg = self.legalize_to_var(desired, false, None);
        self.push(MInst::Cmpxchg { addr, eax: t_eax, desired: desired_reg, locked: true });
        self.mov(&mut Some(dest_prev), Operand::Var(t_eax));
        Ok(())
    }

    /// Fuse the common pattern
    ///
    /// ```text
    /// %x = cmpxchg(ptr, %expected, ...)
    /// [%y_phi = ...] // phi-placed assignments
    /// %p = icmp eq %x, %expected
    /// br %p, %l1, %l2
    /// ```
    ///
    /// into the cmpxchg followed directly by `je %l1, %l2`.
    fn try_optimized_cmpxchg_cmp_br(
        &mut self,
        dest: VarId,
        ptr: Operand,
        expected: Operand,
        desired: Operand,
    ) -> Result<bool, CodegenError> {
        if self.opt_level() == OptLevel::Om1 {
            return Ok(false);
        }
        // Peek ahead: skip phi-placed assignments (a backward branch for a
        // loop puts them right before the compare+branch).
        let mut phi_assign_idxs = Vec::new();
        let mut scan = self.cur_idx;
        let cmp_idx = loop {
            let Some(next_idx) = self.next_inst_index(scan) else {
                return Ok(false);
            };
            match &self.inst_at(next_idx).kind {
                InstKind::Assign { .. } => {
                    if self.inst_at(next_idx).dest == Some(dest) {
                        return Ok(false);
                    }
                    phi_assign_idxs.push(next_idx);
                    scan = next_idx;
                }
                InstKind::Icmp { .. } => break next_idx,
                _ => return Ok(false),
            }
        };
        let (cond, a, b) = match &self.inst_at(cmp_idx).kind {
            InstKind::Icmp { cond, a, b } => (*cond, *a, *b),
            _ => return Ok(false),
        };
        let cmp_dest = self.inst_at(cmp_idx).dest;
        let dest_op = Operand::Var(dest);
        if !(cond == ICond::Eq
            && ((a == dest_op && b == expected) || (b == dest_op && a == expected)))
        {
            return Ok(false);
        }
        let Some(br_idx) = self.next_inst_index(cmp_idx) else {
            return Ok(false);
        };
        let (br_cond, true_target, false_target) = match &self.inst_at(br_idx).kind {
            InstKind::Br {
                cond: Some(br_cond),
                true_target,
                false_target: Some(false_target),
            } => (*br_cond, *true_target, *false_target),
            _ => return Ok(false),
        };
        let Some(cmp_dest) = cmp_dest else {
            return Ok(false);
        };
        if br_cond != Operand::Var(cmp_dest) || !self.inst_at(br_idx).is_last_use(cmp_dest) {
            return Ok(false);
        }

        self.lower_atomic_cmpxchg(dest, ptr, expected, desired)?;
        // Lower the phi assignments now, keeping their placement before
        // the branch.
        for idx in phi_assign_idxs {
            let inst = self.inst_at(idx).clone();
            self.delete_inst(idx);
            if let InstKind::Assign { src } = inst.kind {
                self.lower_assign(inst.dest, src)?;
            }
        }
        self.br_blocks(BrCond::E, true_target, false_target);
        // Skip the old compare and branch.
        self.delete_inst(cmp_idx);
        self.delete_inst(br_idx);
        Ok(true)
    }

    fn lower_atomic_rmw(
        &mut self,
        dest: VarId,
        operation: AtomicRmwOp,
        ptr: Operand,
        val: Operand,
    ) -> Result<(), CodegenError> {
        let ty = self.func.var(dest).ty;
        let (op_lo, op_hi): (Option<LowerBinOp<'b>>, Option<LowerBinOp<'b>>) = match operation {
            AtomicRmwOp::Add => {
                if ty != Type::I64 {
                    let addr = self.form_memory_operand(ptr, ty);
                    let t = self.mov(&mut None, val);
                    self.push(MInst::Xadd { addr, val: t, locked: true });
                    self.mov(&mut Some(dest), Operand::Var(t));
                    return Ok(());
                }
                (Some(TargetX8632::add as LowerBinOp<'b>), Some(TargetX8632::adc as LowerBinOp<'b>))
            }
            AtomicRmwOp::Sub => {
                if ty != Type::I64 {
                    // Subtraction is negate-and-xadd.
                    let addr = self.form_memory_operand(ptr, ty);
                    let t = self.mov(&mut None, val);
                    self.push(MInst::Neg { dst: t });
                    self.push(MInst::Xadd { addr, val: t, locked: true });
                    self.mov(&mut Some(dest), Operand::Var(t));
                    return Ok(());
                }
                (Some(TargetX8632::sub as LowerBinOp<'b>), Some(TargetX8632::sbb as LowerBinOp<'b>))
            }
            AtomicRmwOp::Or => {
                (Some(TargetX8632::or as LowerBinOp<'b>), Some(TargetX8632::or as LowerBinOp<'b>))
            }
            AtomicRmwOp::And => {
                (Some(TargetX8632::and as LowerBinOp<'b>), Some(TargetX8632::and as LowerBinOp<'b>))
            }
            AtomicRmwOp::Xor => {
                (Some(TargetX8632::xor as LowerBinOp<'b>), Some(TargetX8632::xor as LowerBinOp<'b>))
            }
            AtomicRmwOp::Exchange => {
                if ty != Type::I64 {
                    let addr = self.form_memory_operand(ptr, ty);
                    let t = self.mov(&mut None, val);
                    self.push(MInst::Xchg { addr, val: t });
                    self.mov(&mut Some(dest), Operand::Var(t));
                    return Ok(());
                }
                // The cmpxchg8b loop still applies, but the value only
                // needs moving into ecx:ebx, with no combining op.
                (None, None)
            }
        };
        self.expand_atomic_rmw_as_cmpxchg(op_lo, op_hi, dest, ptr, val);
        Ok(())
    }

    /// Expand a read-modify-write operation as a cmpxchg loop.
    ///
    /// For 64-bit:
    ///   mov     eax, [ptr]
    ///   mov     edx, [ptr + 4]
    /// .LABEL:
    ///   mov     ebx, eax
    ///   <op_lo> ebx, <val_lo>
    ///   mov     ecx, edx
    ///   <op_hi> ecx, <val_hi>
    ///   lock cmpxchg8b [ptr]
    ///   jne     .LABEL
    ///   mov     <dest_lo>, eax
    ///   mov     <dest_hi>, edx
    ///
    /// For 32-bit:
    ///   mov     eax, [ptr]
    /// .LABEL:
    ///   mov     <reg>, eax
    ///   op      <reg>, [val]
    ///   lock cmpxchg [ptr], <reg>
    ///   jne     .LABEL
    ///   mov     <dest>, eax
    ///
    /// With both ops `None`, the value is just moved into place (xchg).
    fn expand_atomic_rmw_as_cmpxchg(
        &mut self,
        op_lo: Option<LowerBinOp<'b>>,
        op_hi: Option<LowerBinOp<'b>>,
        dest: VarId,
        ptr: Operand,
        val: Operand,
    ) {
        let val = self.legalize_default(val);
        let ty = self.func.operand_ty(&val);
        if ty == Type::I64 {
            let t_edx = self.make_reg(Type::I32, Some(Reg::Edx));
            let t_eax = self.make_reg(Type::I32, Some(Reg::Eax));
            let addr = self.form_memory_operand(ptr, ty);
            let addr_lo = self.lo_operand(Operand::Mem(addr));
            let addr_hi = self.hi_operand(Operand::Mem(addr));
            self.mov(&mut Some(t_eax), addr_lo);
            self.mov(&mut Some(t_edx), addr_hi);
            let t_ecx = self.make_reg(Type::I32, Some(Reg::Ecx));
            let t_ebx = self.make_reg(Type::I32, Some(Reg::Ebx));
            let label = self.make_label();
            let val_lo = self.lo_operand(val);
            let val_hi = self.hi_operand(val);
            let is_xchg8b = op_lo.is_none() && op_hi.is_none();
            match (op_lo, op_hi) {
                (Some(op_lo), Some(op_hi)) => {
                    self.place_label(label);
                    self.mov(&mut Some(t_ebx), Operand::Var(t_eax));
                    op_lo(self, t_ebx, val_lo);
                    self.mov(&mut Some(t_ecx), Operand::Var(t_edx));
                    op_hi(self, t_ecx, val_hi);
                }
                _ => {
                    // xchg needs no combining op; load the value into
                    // ecx:ebx before the loop.
                    self.mov(&mut Some(t_ebx), val_lo);
                    self.mov(&mut Some(t_ecx), val_hi);
                    self.place_label(label);
                }
            }
            self.push(MInst::Cmpxchg8b {
                addr,
                edx: t_edx,
                eax: t_eax,
                ecx: t_ecx,
                ebx: t_ebx,
                locked: true,
            });
            self.br_label(BrCond::Ne, label);
            if !is_xchg8b {
                // The value is re-read by each loop iteration; extend its
                // halves' live ranges to the loop's end.
                if val.as_var().is_some() {
                    if let (Operand::Var(val_lo), Operand::Var(val_hi)) = (val_lo, val_hi) {
                        self.fake_use(val_lo);
                        self.fake_use(val_hi);
                    }
                }
            } else {
                self.fake_use(t_ebx);
                self.fake_use(t_ecx);
            }
            // The address base is also reused in the loop.
            if let Some(base) = addr.base {
                self.fake_use(base);
            }
            let dest_lo = self.lo_var(dest);
            let dest_hi = self.hi_var(dest);
            self.mov(&mut Some(dest_lo), Operand::Var(t_eax));
            self.mov(&mut Some(dest_hi), Operand::Var(t_edx));
            return;
        }
        let addr = self.form_memory_operand(ptr, ty);
        let t_eax = self.make_reg(ty, Some(Reg::Eax));
        self.mov(&mut Some(t_eax), Operand::Mem(addr));
        let label = self.make_label();
        self.place_label(label);
        // The combining temporary must be a different register than eax,
        // so create it explicitly.
        let t = self.make_reg(ty, None);
        self.mov(&mut Some(t), Operand::Var(t_eax));
        if let Some(op_lo) = op_lo {
            op_lo(self, t, val);
        }
        self.push(MInst::Cmpxchg { addr, eax: t_eax, desired: t, locked: true });
        self.br_label(BrCond::Ne, label);
        // The value and address base are re-read by the loop.
        if let Some(val_var) = val.as_var() {
            self.fake_use(val_var);
        }
        if let Some(base) = addr.base {
            self.fake_use(base);
        }
        self.mov(&mut Some(dest), Operand::Var(t_eax));
    }

    /// Count leading or trailing zeros.
    ///
    ///   bsr t, <val>          (bsf for cttz)
    ///   mov t_dest, 63        (32 for cttz)
    ///   cmovne t_dest, t
    ///   xor t_dest, 31        (ctlz only: bit position -> zero count)
    ///   mov <dest>, t_dest
    ///
    /// bsf/bsr leave the destination undefined on zero input, hence the
    /// cmov from a constant. For i64, speculate on the first half and cmov
    /// in the 32-adjusted result when the second half decides.
    fn lower_count_zeros(
        &mut self,
        cttz: bool,
        ty: Type,
        dest: VarId,
        first_val: Operand,
        second_val: Option<Operand>,
    ) -> Result<(), CodegenError> {
        debug_assert!(ty == Type::I32 || ty == Type::I64);
        let t = self.make_reg(Type::I32, None);
        let first_val_rm = self.legalize(first_val, LegalMask::REG_MEM, false, None);
        if cttz {
            self.push(MInst::Bsf { dst: t, src: first_val_rm });
        } else {
            self.push(MInst::Bsr { dst: t, src: first_val_rm });
        }
        let t_dest = self.make_reg(Type::I32, None);
        let thirty_two = Operand::const_int(Type::I32, 32);
        let thirty_one = Operand::const_int(Type::I32, 31);
        if cttz {
            self.mov(&mut Some(t_dest), thirty_two);
        } else {
            let sixty_three = Operand::const_int(Type::I32, 63);
            self.mov(&mut Some(t_dest), sixty_three);
        }
        self.push(MInst::Cmov { cond: BrCond::Ne, dst: t_dest, src: Operand::Var(t) });
        if !cttz {
            self.xor(t_dest, thirty_one);
        }
        if ty == Type::I32 {
            self.mov(&mut Some(dest), Operand::Var(t_dest));
            return Ok(());
        }
        self.add(t_dest, thirty_two);
        let dest_lo = self.lo_var(dest);
        let dest_hi = self.hi_var(dest);
        // The second half is tested, so it needs a register.
        let second_val = second_val.expect("i64 count-zeros has a second half");
        let second_var = self.legalize_to_var(second_val, false, None);
        let t_dest2 = self.make_reg(Type::I32, None);
        if cttz {
            self.push(MInst::Bsf { dst: t_dest2, src: Operand::Var(second_var) });
        } else {
            self.push(MInst::Bsr { dst: t_dest2, src: Operand::Var(second_var) });
            self.xor(t_dest2, thirty_one);
        }
        self.test(Operand::Var(second_var), Operand::Var(second_var));
        self.push(MInst::Cmov { cond: BrCond::E, dst: t_dest2, src: Operand::Var(t_dest) });
        self.mov(&mut Some(dest_lo), Operand::Var(t_dest2));
        self.mov(&mut Some(dest_hi), Operand::zero(Type::I32));
        Ok(())
    }
}
