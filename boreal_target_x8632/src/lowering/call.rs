//! Call-site marshalling and return lowering.

use boreal_ir::{CodegenError, MemOperand, Operand, Type, VarId};

use crate::frame::apply_stack_alignment;
use crate::inst::MInst;
use crate::lowering::TargetX8632;
use crate::reg::{register_set, Reg, RegSetMask};

/// The maximum number of arguments passed in XMM registers.
pub(crate) const MAX_XMM_ARGS: usize = 4;

impl TargetX8632<'_> {
    /// x86-32 calling convention:
    ///
    /// * The stack is 16-byte aligned at the point before the call.
    ///
    /// * The first four arguments of vector type, regardless of their
    ///   position relative to the other arguments, are placed in
    ///   xmm0 - xmm3.
    ///
    /// * Other arguments are pushed onto the stack in right-to-left order,
    ///   so the left-most argument ends up at the lowest address.
    ///
    /// * Stack arguments of vector type are aligned to the next multiple
    ///   of 16 bytes; other stack arguments are 4-byte aligned.
    pub(crate) fn lower_call(
        &mut self,
        dest: Option<VarId>,
        target: Operand,
        args: &[Operand],
        has_side_effects: bool,
    ) -> Result<(), CodegenError> {
        self.needs_stack_alignment = true;

        // Classify each argument operand by where it is passed.
        let mut xmm_args = Vec::new();
        let mut stack_args = Vec::new();
        let mut stack_arg_locations = Vec::new();
        let mut parameter_area_size_bytes: u32 = 0;
        for arg in args {
            let ty = self.func.operand_ty(arg);
            // Argument widths are at least 32 bits.
            debug_assert!(
                matches!(ty, Type::I32 | Type::F32 | Type::I64 | Type::F64) || ty.is_vector()
            );
            if ty.is_vector() && xmm_args.len() < MAX_XMM_ARGS {
                xmm_args.push(*arg);
            } else {
                stack_args.push(*arg);
                if ty.is_vector() {
                    parameter_area_size_bytes = apply_stack_alignment(parameter_area_size_bytes);
                }
                let esp = self.get_phys_reg(Reg::Esp);
                stack_arg_locations
                    .push(MemOperand::base_offset(ty, esp, parameter_area_size_bytes as i32));
                parameter_area_size_bytes += ty.width_on_stack();
            }
        }

        // Adjust the parameter area so that the stack stays aligned; it is
        // assumed aligned at the start of the calling sequence.
        parameter_area_size_bytes = apply_stack_alignment(parameter_area_size_bytes);

        // A single stack adjustment covers the whole argument area.
        if parameter_area_size_bytes > 0 {
            self.push(MInst::AdjustStack { amount: parameter_area_size_bytes });
        }

        // Copy stack arguments to their locations in the parameter area.
        for (arg, loc) in stack_args.iter().zip(stack_arg_locations.iter()) {
            self.lower_store(*arg, Operand::Mem(*loc))?;
        }

        // Copy register arguments into their registers, with a FakeUse of
        // each so they are not dead-code eliminated by the FakeKill of the
        // scratch registers after the call.
        for (i, arg) in xmm_args.iter().enumerate() {
            let reg = self.legalize_to_var(*arg, false, Some(Reg::xmm(i as u8)));
            self.fake_use(reg);
        }

        // The return register doubles as the low half for i64.
        let mut return_reg: Option<VarId> = None;
        let mut return_reg_hi: Option<VarId> = None;
        if let Some(dest) = dest {
            match self.func.var(dest).ty {
                Type::Void => {}
                Type::I1 | Type::I8 | Type::I16 | Type::I32 => {
                    let ty = self.func.var(dest).ty;
                    return_reg = Some(self.make_reg(ty, Some(Reg::Eax)));
                }
                Type::I64 => {
                    return_reg = Some(self.make_reg(Type::I32, Some(Reg::Eax)));
                    return_reg_hi = Some(self.make_reg(Type::I32, Some(Reg::Edx)));
                }
                Type::F32 | Type::F64 => {
                    // The result comes back in st(0); capture it with fstp
                    // below.
                }
                _ => {
                    let ty = self.func.var(dest).ty;
                    return_reg = Some(self.make_reg(ty, Some(Reg::Xmm0)));
                }
            }
        }

        let call_target = self.legalize_default(target);
        self.push(MInst::Call { dest: return_reg, target: call_target });
        if let Some(hi) = return_reg_hi {
            self.fake_def(hi, None);
        }

        // Undo the stack adjustment; the call's emission resets the
        // emitter-side offset tracking.
        if parameter_area_size_bytes > 0 {
            let esp = self.get_phys_reg(Reg::Esp);
            self.add(esp, Operand::const_i32(parameter_area_size_bytes as i32));
        }

        // Kill all scratch registers.
        let mut killed = Vec::new();
        for reg in register_set(RegSetMask::CALLER_SAVE, RegSetMask::NONE).iter() {
            killed.push(self.get_phys_reg(reg));
        }
        self.push(MInst::FakeKill { killed });

        // Keep the call live when it has side effects.
        if has_side_effects {
            if let Some(ret) = return_reg {
                self.fake_use(ret);
            }
        }

        let Some(dest) = dest else {
            return Ok(());
        };

        // Assign the result of the call to dest.
        if let Some(ret) = return_reg {
            if let Some(ret_hi) = return_reg_hi {
                debug_assert!(self.func.var(dest).ty == Type::I64);
                self.split64(dest);
                let dest_lo = self.lo_var(dest);
                let dest_hi = self.hi_var(dest);
                self.func.var_mut(dest_lo).set_preferred_register(ret, false);
                self.func.var_mut(dest_hi).set_preferred_register(ret_hi, false);
                self.mov(&mut Some(dest_lo), Operand::Var(ret));
                self.mov(&mut Some(dest_hi), Operand::Var(ret_hi));
            } else {
                self.func.var_mut(dest).set_preferred_register(ret, false);
                if self.func.var(dest).ty.is_vector() {
                    self.push(MInst::Movp { dst: dest, src: Operand::Var(ret) });
                } else {
                    self.mov(&mut Some(dest), Operand::Var(ret));
                }
            }
        } else if matches!(self.func.var(dest).ty, Type::F32 | Type::F64) {
            // An FP function returns its result in st(0); if dest ends up
            // in an xmm register the fstp emission routes through a
            // temporary stack slot. The FakeUse keeps the pop alive even
            // when dest is otherwise unused.
            self.push(MInst::Fstp { dst: dest });
            self.fake_use(dest);
        }
        Ok(())
    }

    pub(crate) fn lower_ret(&mut self, value: Option<Operand>) -> Result<(), CodegenError> {
        let mut reg: Option<VarId> = None;
        if let Some(value) = value {
            let src0 = self.legalize_default(value);
            match self.func.operand_ty(&src0) {
                Type::I64 => {
                    let src_lo = self.lo_operand(src0);
                    let src_hi = self.hi_operand(src0);
                    let eax = self.legalize_to_var(src_lo, false, Some(Reg::Eax));
                    let edx = self.legalize_to_var(src_hi, false, Some(Reg::Edx));
                    reg = Some(eax);
                    self.fake_use(edx);
                }
                Type::F32 | Type::F64 => {
                    self.push(MInst::Fld { src: src0 });
                }
                ty if ty.is_vector() => {
                    reg = Some(self.legalize_to_var(src0, false, Some(Reg::Xmm0)));
                }
                _ => {
                    reg = Some(self.mov_fixed(&mut None, src0, Reg::Eax));
                }
            }
        }
        self.push(MInst::Ret { src: reg });
        // A fake use of esp keeps it alive for the whole function, so
        // post-call esp adjustments are not dead-code eliminated.
        let esp = self.get_phys_reg(Reg::Esp);
        self.fake_use(esp);
        Ok(())
    }
}
