//! Cast lowering: integer width changes, fp conversions and bitcasts.

use boreal_ir::{CastOp, CodegenError, Half, Operand, RegWeight, Type, VarId};

use crate::inst::MInst;
use crate::lowering::{LegalMask, TargetX8632};

impl TargetX8632<'_> {
    pub(crate) fn lower_cast(
        &mut self,
        dest: Option<VarId>,
        op: CastOp,
        src: Operand,
    ) -> Result<(), CodegenError> {
        let dest = dest.expect("cast has a destination");
        match op {
            CastOp::Sext => self.lower_sext(dest, src),
            CastOp::Zext => self.lower_zext(dest, src),
            CastOp::Trunc => self.lower_trunc(dest, src),
            CastOp::Fptrunc | CastOp::Fpext => {
                let src_rm = self.legalize(src, LegalMask::REG_MEM, false, None);
                // t1 = cvt src; dest = t1
                let dest_ty = self.func.var(dest).ty;
                let t = self.make_reg(dest_ty, None);
                self.push(MInst::Cvt { dst: t, src: src_rm, trunc: false });
                self.mov(&mut Some(dest), Operand::Var(t));
                Ok(())
            }
            CastOp::Fptosi => self.lower_fptosi(dest, src),
            CastOp::Fptoui => self.lower_fptoui(dest, src),
            CastOp::Sitofp => self.lower_sitofp(dest, src),
            CastOp::Uitofp => self.lower_uitofp(dest, src),
            CastOp::Bitcast => self.lower_bitcast(dest, src),
        }
    }

    fn lower_sext(&mut self, dest: VarId, src: Operand) -> Result<(), CodegenError> {
        // The relevant x86 instructions don't allow an immediate operand.
        let src_rm = self.legalize(src, LegalMask::REG_MEM, false, None);
        let dest_ty = self.func.var(dest).ty;
        let src_ty = self.func.operand_ty(&src_rm);
        if dest_ty.is_vector() {
            if dest_ty == Type::V16I8 {
                // onemask = materialize(1,1,...); dst = (src & onemask) > 0
                let one_mask = self.make_vector_of_ones(dest_ty, None);
                let t = self.make_reg(dest_ty, None);
                self.push(MInst::Movp { dst: t, src: src_rm });
                self.push(MInst::Pand { dst: t, src: Operand::Var(one_mask) });
                let zeros = self.make_vector_of_zeros(dest_ty, None);
                self.push(MInst::Pcmpgt { dst: t, src: Operand::Var(zeros) });
                self.push(MInst::Movp { dst: dest, src: Operand::Var(t) });
            } else {
                // width = width(elty) - 1; dest = (src << width) >> width
                let shift = dest_ty.element_type().width_in_bytes() * 8 - 1;
                let shift = Operand::const_int(Type::I8, shift as i64);
                let t = self.make_reg(dest_ty, None);
                self.push(MInst::Movp { dst: t, src: src_rm });
                self.push(MInst::Psll { dst: t, amount: shift });
                self.push(MInst::Psra { dst: t, amount: shift });
                self.push(MInst::Movp { dst: dest, src: Operand::Var(t) });
            }
        } else if dest_ty == Type::I64 {
            // t1=movsx src; t2=t1; t2=sar t2, 31; dst.lo=t1; dst.hi=t2
            let shift = Operand::const_int(Type::I32, 31);
            let dest_lo = self.lo_var(dest);
            let dest_hi = self.hi_var(dest);
            let t_lo = self.make_reg(Type::I32, None);
            if src_ty == Type::I32 {
                self.mov(&mut Some(t_lo), src_rm);
            } else if src_ty == Type::I1 {
                self.movzx(t_lo, src_rm);
                self.push(MInst::Shl { dst: t_lo, amount: shift });
                self.push(MInst::Sar { dst: t_lo, amount: shift });
            } else {
                self.movsx(t_lo, src_rm);
            }
            self.mov(&mut Some(dest_lo), Operand::Var(t_lo));
            let t_hi = self.mov(&mut None, Operand::Var(t_lo));
            if src_ty != Type::I1 {
                // For i1, the sar is already done above.
                self.push(MInst::Sar { dst: t_hi, amount: shift });
            }
            self.mov(&mut Some(dest_hi), Operand::Var(t_hi));
        } else if src_ty == Type::I1 {
            // t1 = src
            // shl t1, dst_bitwidth - 1
            // sar t1, dst_bitwidth - 1
            // dst = t1
            let dest_bits = dest_ty.width_in_bytes() * 8;
            let shift = Operand::const_int(Type::I32, dest_bits as i64 - 1);
            let t = self.make_reg(dest_ty, None);
            if dest_ty.width_in_bytes() <= src_ty.width_in_bytes() {
                self.mov(&mut Some(t), src_rm);
            } else {
                // Widen the source; movzx or movsx would both do, the
                // following shl/sar overwrite the bits.
                self.movzx(t, src_rm);
            }
            self.push(MInst::Shl { dst: t, amount: shift });
            self.push(MInst::Sar { dst: t, amount: shift });
            self.mov(&mut Some(dest), Operand::Var(t));
        } else {
            // t1 = movsx src; dst = t1
            let t = self.make_reg(dest_ty, None);
            self.movsx(t, src_rm);
            self.mov(&mut Some(dest), Operand::Var(t));
        }
        Ok(())
    }

    fn lower_zext(&mut self, dest: VarId, src: Operand) -> Result<(), CodegenError> {
        let src_rm = self.legalize(src, LegalMask::REG_MEM, false, None);
        let dest_ty = self.func.var(dest).ty;
        let src_ty = self.func.operand_ty(&src_rm);
        if dest_ty.is_vector() {
            // onemask = materialize(1,1,...); dest = onemask & src
            let one_mask = self.make_vector_of_ones(dest_ty, None);
            let t = self.make_reg(dest_ty, None);
            self.push(MInst::Movp { dst: t, src: src_rm });
            self.push(MInst::Pand { dst: t, src: Operand::Var(one_mask) });
            self.push(MInst::Movp { dst: dest, src: Operand::Var(t) });
        } else if dest_ty == Type::I64 {
            // t1=movzx src; dst.lo=t1; dst.hi=0
            let zero = Operand::zero(Type::I32);
            let dest_lo = self.lo_var(dest);
            let dest_hi = self.hi_var(dest);
            let tmp = self.make_reg(Type::I32, None);
            if src_ty == Type::I32 {
                self.mov(&mut Some(tmp), src_rm);
            } else {
                self.movzx(tmp, src_rm);
            }
            if src_ty == Type::I1 {
                let one = Operand::const_int(Type::I32, 1);
                self.and(tmp, one);
            }
            self.mov(&mut Some(dest_lo), Operand::Var(tmp));
            self.mov(&mut Some(dest_hi), zero);
        } else if src_ty == Type::I1 {
            // t = src; t &= 1; dest = t
            let one = Operand::const_int(Type::I32, 1);
            let t = self.make_reg(Type::I32, None);
            self.movzx(t, src_rm);
            self.and(t, one);
            self.mov(&mut Some(dest), Operand::Var(t));
        } else {
            // t1 = movzx src; dst = t1
            let t = self.make_reg(dest_ty, None);
            self.movzx(t, src_rm);
            self.mov(&mut Some(dest), Operand::Var(t));
        }
        Ok(())
    }

    fn lower_trunc(&mut self, dest: VarId, src: Operand) -> Result<(), CodegenError> {
        let dest_ty = self.func.var(dest).ty;
        if dest_ty.is_vector() {
            // onemask = materialize(1,1,...); dst = src & onemask
            let src_rm = self.legalize(src, LegalMask::REG_MEM, false, None);
            let src_ty = self.func.operand_ty(&src_rm);
            let one_mask = self.make_vector_of_ones(src_ty, None);
            let t = self.make_reg(dest_ty, None);
            self.push(MInst::Movp { dst: t, src: src_rm });
            self.push(MInst::Pand { dst: t, src: Operand::Var(one_mask) });
            self.push(MInst::Movp { dst: dest, src: Operand::Var(t) });
        } else {
            let mut src = src;
            if self.func.operand_ty(&src) == Type::I64 {
                src = self.lo_operand(src);
            }
            let src_rm = self.legalize(src, LegalMask::REG_MEM, false, None);
            // t1 = trunc src; dest = t1
            let t = self.mov(&mut None, src_rm);
            if dest_ty == Type::I1 {
                self.and(t, Operand::const_int(Type::I1, 1));
            }
            self.mov(&mut Some(dest), Operand::Var(t));
        }
        Ok(())
    }

    fn lower_fptosi(&mut self, dest: VarId, src: Operand) -> Result<(), CodegenError> {
        let dest_ty = self.func.var(dest).ty;
        if dest_ty.is_vector() {
            debug_assert!(dest_ty == Type::V4I32);
            debug_assert!(self.func.operand_ty(&src) == Type::V4F32);
            let src_rm = self.legalize(src, LegalMask::REG_MEM, false, None);
            let t = self.make_reg(dest_ty, None);
            self.push(MInst::Cvt { dst: t, src: src_rm, trunc: true });
            self.push(MInst::Movp { dst: dest, src: Operand::Var(t) });
        } else if dest_ty == Type::I64 {
            // SSE2 has no way to convert from xmm registers to the edx:eax
            // pair, so use a helper.
            self.split64(dest);
            let src_ty = self.func.operand_ty(&src);
            let helper = if src_ty == Type::F32 { "cvtftosi64" } else { "cvtdtosi64" };
            self.lower_helper_call(helper, Some(dest), &[src])?;
        } else {
            let src_rm = self.legalize(src, LegalMask::REG_MEM, false, None);
            // t1.i32 = cvt src; t2.dest_type = t1; dest = t2.dest_type
            let t_1 = self.make_reg(Type::I32, None);
            let t_2 = self.make_reg(dest_ty, None);
            self.push(MInst::Cvt { dst: t_1, src: src_rm, trunc: true });
            // t_1 and t_2 may have different integer types.
            self.mov(&mut Some(t_2), Operand::Var(t_1));
            if dest_ty == Type::I1 {
                self.and(t_2, Operand::const_int(Type::I1, 1));
            }
            self.mov(&mut Some(dest), Operand::Var(t_2));
            self.func.var_mut(t_2).set_preferred_register(t_1, true);
        }
        Ok(())
    }

    fn lower_fptoui(&mut self, dest: VarId, src: Operand) -> Result<(), CodegenError> {
        let dest_ty = self.func.var(dest).ty;
        if dest_ty.is_vector() {
            debug_assert!(dest_ty == Type::V4I32);
            debug_assert!(self.func.operand_ty(&src) == Type::V4F32);
            self.lower_helper_call("Sz_fptoui_v4f32", Some(dest), &[src])?;
        } else if dest_ty == Type::I64 || dest_ty == Type::I32 {
            self.split64(dest);
            let src_ty = self.func.operand_ty(&src);
            // Possibilities are cvtftoui32, cvtdtoui32, cvtftoui64,
            // cvtdtoui64.
            let dst_str = if dest_ty == Type::I64 { "64" } else { "32" };
            let src_str = if src_ty == Type::F32 { "f" } else { "d" };
            let helper = format!("cvt{src_str}toui{dst_str}");
            self.lower_helper_call(&helper, Some(dest), &[src])?;
        } else {
            let src_rm = self.legalize(src, LegalMask::REG_MEM, false, None);
            let t_1 = self.make_reg(Type::I32, None);
            let t_2 = self.make_reg(dest_ty, None);
            self.push(MInst::Cvt { dst: t_1, src: src_rm, trunc: true });
            self.mov(&mut Some(t_2), Operand::Var(t_1));
            if dest_ty == Type::I1 {
                self.and(t_2, Operand::const_int(Type::I1, 1));
            }
            self.mov(&mut Some(dest), Operand::Var(t_2));
            self.func.var_mut(t_2).set_preferred_register(t_1, true);
        }
        Ok(())
    }

    fn lower_sitofp(&mut self, dest: VarId, src: Operand) -> Result<(), CodegenError> {
        let dest_ty = self.func.var(dest).ty;
        let src_ty = self.func.operand_ty(&src);
        if dest_ty.is_vector() {
            debug_assert!(dest_ty == Type::V4F32);
            debug_assert!(src_ty == Type::V4I32);
            let src_rm = self.legalize(src, LegalMask::REG_MEM, false, None);
            let t = self.make_reg(dest_ty, None);
            self.push(MInst::Cvt { dst: t, src: src_rm, trunc: false });
            self.push(MInst::Movp { dst: dest, src: Operand::Var(t) });
        } else if src_ty == Type::I64 {
            let helper = if dest_ty == Type::F32 { "cvtsi64tof" } else { "cvtsi64tod" };
            self.lower_helper_call(helper, Some(dest), &[src])?;
        } else {
            let src_rm = self.legalize(src, LegalMask::REG_MEM, false, None);
            // Sign-extend the operand:
            // t1.i32 = movsx src; t2 = cvt t1.i32; dest = t2
            let t_1 = self.make_reg(Type::I32, None);
            let t_2 = self.make_reg(dest_ty, None);
            if src_ty == Type::I32 {
                self.mov(&mut Some(t_1), src_rm);
            } else {
                self.movsx(t_1, src_rm);
            }
            self.push(MInst::Cvt { dst: t_2, src: Operand::Var(t_1), trunc: false });
            self.mov(&mut Some(dest), Operand::Var(t_2));
        }
        Ok(())
    }

    fn lower_uitofp(&mut self, dest: VarId, src: Operand) -> Result<(), CodegenError> {
        let dest_ty = self.func.var(dest).ty;
        let src_ty = self.func.operand_ty(&src);
        if src_ty.is_vector() {
            debug_assert!(dest_ty == Type::V4F32);
            debug_assert!(src_ty == Type::V4I32);
            self.lower_helper_call("Sz_uitofp_v4i32", Some(dest), &[src])?;
        } else if src_ty == Type::I64 || src_ty == Type::I32 {
            // Possibilities are cvtui32tof, cvtui32tod, cvtui64tof,
            // cvtui64tod.
            let src_str = if src_ty == Type::I64 { "64" } else { "32" };
            let dst_str = if dest_ty == Type::F32 { "f" } else { "d" };
            let helper = format!("cvtui{src_str}to{dst_str}");
            self.lower_helper_call(&helper, Some(dest), &[src])?;
        } else {
            let src_rm = self.legalize(src, LegalMask::REG_MEM, false, None);
            // Zero-extend the operand:
            // t1.i32 = movzx src; t2 = cvt t1.i32; dest = t2
            let t_1 = self.make_reg(Type::I32, None);
            let t_2 = self.make_reg(dest_ty, None);
            if src_ty == Type::I32 {
                self.mov(&mut Some(t_1), src_rm);
            } else {
                self.movzx(t_1, src_rm);
            }
            self.push(MInst::Cvt { dst: t_2, src: Operand::Var(t_1), trunc: false });
            self.mov(&mut Some(dest), Operand::Var(t_2));
        }
        Ok(())
    }

    fn lower_bitcast(&mut self, dest: VarId, src: Operand) -> Result<(), CodegenError> {
        let dest_ty = self.func.var(dest).ty;
        let src_ty = self.func.operand_ty(&src);
        if dest_ty == src_ty {
            return self.lower_assign(Some(dest), src);
        }
        match dest_ty {
            Type::I8 => {
                debug_assert!(src_ty == Type::V8I1);
                self.lower_helper_call("Sz_bitcast_v8i1_to_i8", Some(dest), &[src])?;
            }
            Type::I16 => {
                debug_assert!(src_ty == Type::V16I1);
                self.lower_helper_call("Sz_bitcast_v16i1_to_i16", Some(dest), &[src])?;
            }
            Type::I32 | Type::F32 => {
                let src_rm = self.legalize(src, LegalMask::REG_MEM, false, None);
                let src_ty = self.func.operand_ty(&src_rm);
                debug_assert!(
                    (dest_ty == Type::I32 && src_ty == Type::F32)
                        || (dest_ty == Type::F32 && src_ty == Type::I32)
                );
                // a.i32 = bitcast b.f32 ==>
                //   t.f32 = b.f32
                //   s.f32 = spill t.f32
                //   a.i32 = s.f32
                let spill = self.func.make_variable(src_ty, Some(self.cur_block));
                self.func.var_mut(spill).weight = RegWeight::Zero;
                self.func.var_mut(spill).set_preferred_register(dest, true);
                let t = self.mov(&mut None, src_rm);
                self.mov(&mut Some(spill), Operand::Var(t));
                self.mov(&mut Some(dest), Operand::Var(spill));
            }
            Type::I64 => {
                let src_rm = self.legalize(src, LegalMask::REG_MEM, false, None);
                debug_assert!(self.func.operand_ty(&src_rm) == Type::F64);
                // a.i64 = bitcast b.f64 ==>
                //   s.f64 = spill b.f64
                //   t_lo.i32 = lo(s.f64)
                //   a_lo.i32 = t_lo.i32
                //   t_hi.i32 = hi(s.f64)
                //   a_hi.i32 = t_hi.i32
                let spill = self.func.make_variable(Type::F64, Some(self.cur_block));
                self.func.var_mut(spill).weight = RegWeight::Zero;
                if let Some(src_var) = src_rm.as_var() {
                    self.func.var_mut(spill).set_preferred_register(src_var, true);
                }
                self.push(MInst::Movq { dst: spill, src: src_rm });

                let dest_lo = self.lo_var(dest);
                let dest_hi = self.hi_var(dest);
                let t_lo = self.make_reg(Type::I32, None);
                let t_hi = self.make_reg(Type::I32, None);
                let spill_lo = Operand::Split { var: spill, half: Half::Lo };
                let spill_hi = Operand::Split { var: spill, half: Half::Hi };

                self.mov(&mut Some(t_lo), spill_lo);
                self.mov(&mut Some(dest_lo), Operand::Var(t_lo));
                self.mov(&mut Some(t_hi), spill_hi);
                self.mov(&mut Some(dest_hi), Operand::Var(t_hi));
            }
            Type::F64 => {
                let src = self.legalize_default(src);
                debug_assert!(self.func.operand_ty(&src) == Type::I64);
                // a.f64 = bitcast b.i64 ==>
                //   t_lo.i32 = b_lo.i32
                //   FakeDef(s.f64)
                //   lo(s.f64) = t_lo.i32
                //   t_hi.i32 = b_hi.i32
                //   hi(s.f64) = t_hi.i32
                //   a.f64 = s.f64
                let spill = self.func.make_variable(Type::F64, Some(self.cur_block));
                self.func.var_mut(spill).weight = RegWeight::Zero;
                self.func.var_mut(spill).set_preferred_register(dest, true);

                let spill_lo = Operand::Split { var: spill, half: Half::Lo };
                let spill_hi = Operand::Split { var: spill, half: Half::Hi };
                let src_lo = self.lo_operand(src);
                let src_hi = self.hi_operand(src);
                let t_lo = self.mov(&mut None, src_lo);
                // The spill is written after this point, but the split
                // views count as uses, so define it first.
                self.fake_def(spill, None);
                self.store(Operand::Var(t_lo), spill_lo);
                let t_hi = self.mov(&mut None, src_hi);
                self.store(Operand::Var(t_hi), spill_hi);
                self.push(MInst::Movq { dst: dest, src: Operand::Var(spill) });
            }
            Type::V8I1 => {
                debug_assert!(src_ty == Type::I8);
                // Arguments are required to be at least 32 bits wide.
                let src_as_i32 = self.func.make_variable(Type::I32, Some(self.cur_block));
                self.lower_cast(Some(src_as_i32), CastOp::Zext, src)?;
                self.lower_helper_call(
                    "Sz_bitcast_i8_to_v8i1",
                    Some(dest),
                    &[Operand::Var(src_as_i32)],
                )?;
            }
            Type::V16I1 => {
                debug_assert!(src_ty == Type::I16);
                let src_as_i32 = self.func.make_variable(Type::I32, Some(self.cur_block));
                self.lower_cast(Some(src_as_i32), CastOp::Zext, src)?;
                self.lower_helper_call(
                    "Sz_bitcast_i16_to_v16i1",
                    Some(dest),
                    &[Operand::Var(src_as_i32)],
                )?;
            }
            Type::V8I16 | Type::V16I8 | Type::V4I32 | Type::V4F32 => {
                let src_var = self.legalize_to_var(src, false, None);
                self.push(MInst::Movp { dst: dest, src: Operand::Var(src_var) });
            }
            _ => return Err(CodegenError::UnsupportedCast),
        }
        Ok(())
    }
}
