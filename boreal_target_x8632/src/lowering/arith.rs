//! Arithmetic lowering: i64 expansion, vector ops, scalar ops.

use boreal_ir::{ArithOp, CodegenError, InstructionSet, Operand, Type, VarId};

use crate::cond::BrCond;
use crate::inst::MInst;
use crate::lowering::{LegalMask, TargetX8632};
use crate::reg::Reg;

impl TargetX8632<'_> {
    pub(crate) fn lower_arithmetic(
        &mut self,
        dest: Option<VarId>,
        op: ArithOp,
        src0: Operand,
        src1: Operand,
    ) -> Result<(), CodegenError> {
        let dest = dest.expect("arithmetic has a destination");
        let orig_src0 = src0;
        let orig_src1 = src1;
        let src0 = self.legalize_default(src0);
        let src1 = self.legalize_default(src1);
        let dest_ty = self.func.var(dest).ty;
        if dest_ty == Type::I64 {
            self.lower_arithmetic_i64(dest, op, src0, src1, orig_src0, orig_src1)
        } else if dest_ty.is_vector() {
            self.lower_arithmetic_vector(dest, op, src0, src1)
        } else {
            self.lower_arithmetic_scalar(dest, op, src0, src1)
        }
    }

    fn lower_arithmetic_i64(
        &mut self,
        dest: VarId,
        op: ArithOp,
        src0: Operand,
        src1: Operand,
        orig_src0: Operand,
        orig_src1: Operand,
    ) -> Result<(), CodegenError> {
        let dest_lo = self.lo_var(dest);
        let dest_hi = self.hi_var(dest);
        let src0_lo = self.lo_operand(src0);
        let src0_hi = self.hi_operand(src0);
        let src1_lo = self.lo_operand(src1);
        let src1_hi = self.hi_operand(src1);
        match op {
            ArithOp::Add | ArithOp::And | ArithOp::Or | ArithOp::Xor | ArithOp::Sub => {
                let t_lo = self.mov(&mut None, src0_lo);
                match op {
                    ArithOp::Add => self.add(t_lo, src1_lo),
                    ArithOp::And => self.and(t_lo, src1_lo),
                    ArithOp::Or => self.or(t_lo, src1_lo),
                    ArithOp::Xor => self.xor(t_lo, src1_lo),
                    _ => self.sub(t_lo, src1_lo),
                }
                self.mov(&mut Some(dest_lo), Operand::Var(t_lo));
                let t_hi = self.mov(&mut None, src0_hi);
                match op {
                    ArithOp::Add => self.adc(t_hi, src1_hi),
                    ArithOp::And => self.and(t_hi, src1_hi),
                    ArithOp::Or => self.or(t_hi, src1_hi),
                    ArithOp::Xor => self.xor(t_hi, src1_hi),
                    _ => self.sbb(t_hi, src1_hi),
                }
                self.mov(&mut Some(dest_hi), Operand::Var(t_hi));
            }
            ArithOp::Mul => {
                // gcc does the following:
                // a=b*c ==>
                //   t1 = b.hi; t1 *=(imul) c.lo
                //   t2 = c.hi; t2 *=(imul) b.lo
                //   t3:eax = b.lo
                //   t4.hi:edx,t4.lo:eax = t3:eax *(mul) c.lo
                //   a.lo = t4.lo
                //   t4.hi += t1
                //   t4.hi += t2
                //   a.hi = t4.hi
                // The mul instruction cannot take an immediate operand.
                let src1_lo = self.legalize(src1_lo, LegalMask::REG_MEM, false, None);
                let t_4lo = self.make_reg(Type::I32, Some(Reg::Eax));
                let t_4hi = self.make_reg(Type::I32, Some(Reg::Edx));
                let t_1 = self.mov(&mut None, src0_hi);
                self.push(MInst::Imul { dst: t_1, src: src1_lo });
                let t_2 = self.mov(&mut None, src1_hi);
                self.push(MInst::Imul { dst: t_2, src: src0_lo });
                let t_3 = self.mov_fixed(&mut None, src0_lo, Reg::Eax);
                self.push(MInst::Mul { dst: t_4lo, src1: t_3, src2: src1_lo });
                // mul produces two dest registers, edx:eax; fake-define the
                // edx half.
                self.fake_def(t_4hi, Some(t_4lo));
                self.mov(&mut Some(dest_lo), Operand::Var(t_4lo));
                self.add(t_4hi, Operand::Var(t_1));
                self.add(t_4hi, Operand::Var(t_2));
                self.mov(&mut Some(dest_hi), Operand::Var(t_4hi));
            }
            ArithOp::Shl => {
                // a=b<<c ==>
                //   t1:ecx = c.lo & 0xff
                //   t2 = b.lo
                //   t3 = b.hi
                //   t3 = shld t3, t2, t1
                //   t2 = shl t2, t1
                //   test t1, 0x20
                //   je L1
                //   use(t3)
                //   t3 = t2
                //   t2 = 0
                // L1:
                //   a.lo = t2
                //   a.hi = t3
                let bit_test = Operand::const_int(Type::I32, 0x20);
                let zero = Operand::zero(Type::I32);
                let label = self.make_label();
                let t_1 = self.mov_fixed(&mut None, src1_lo, Reg::Ecx);
                let t_2 = self.mov(&mut None, src0_lo);
                let t_3 = self.mov(&mut None, src0_hi);
                self.push(MInst::Shld { dst: t_3, src: t_2, amount: Operand::Var(t_1) });
                self.push(MInst::Shl { dst: t_2, amount: Operand::Var(t_1) });
                self.test(Operand::Var(t_1), bit_test);
                self.br_label(BrCond::E, label);
                // The intra-block branch needs a fake use of t_3 so its
                // earlier definition is not dead-code eliminated in the
                // presence of the later one.
                self.fake_use(t_3);
                self.mov(&mut Some(t_3), Operand::Var(t_2));
                self.mov(&mut Some(t_2), zero);
                self.place_label(label);
                self.mov(&mut Some(dest_lo), Operand::Var(t_2));
                self.mov(&mut Some(dest_hi), Operand::Var(t_3));
            }
            ArithOp::Lshr => {
                // a=b>>c (unsigned) ==>
                //   t1:ecx = c.lo & 0xff
                //   t2 = b.lo
                //   t3 = b.hi
                //   t2 = shrd t2, t3, t1
                //   t3 = shr t3, t1
                //   test t1, 0x20
                //   je L1
                //   use(t2)
                //   t2 = t3
                //   t3 = 0
                // L1:
                let bit_test = Operand::const_int(Type::I32, 0x20);
                let zero = Operand::zero(Type::I32);
                let label = self.make_label();
                let t_1 = self.mov_fixed(&mut None, src1_lo, Reg::Ecx);
                let t_2 = self.mov(&mut None, src0_lo);
                let t_3 = self.mov(&mut None, src0_hi);
                self.push(MInst::Shrd { dst: t_2, src: t_3, amount: Operand::Var(t_1) });
                self.push(MInst::Shr { dst: t_3, amount: Operand::Var(t_1) });
                self.test(Operand::Var(t_1), bit_test);
                self.br_label(BrCond::E, label);
                self.fake_use(t_2);
                self.mov(&mut Some(t_2), Operand::Var(t_3));
                self.mov(&mut Some(t_3), zero);
                self.place_label(label);
                self.mov(&mut Some(dest_lo), Operand::Var(t_2));
                self.mov(&mut Some(dest_hi), Operand::Var(t_3));
            }
            ArithOp::Ashr => {
                // a=b>>c (signed) ==>
                //   t1:ecx = c.lo & 0xff
                //   t2 = b.lo
                //   t3 = b.hi
                //   t2 = shrd t2, t3, t1
                //   t3 = sar t3, t1
                //   test t1, 0x20
                //   je L1
                //   use(t2)
                //   t2 = t3
                //   t3 = sar t3, 0x1f
                // L1:
                let bit_test = Operand::const_int(Type::I32, 0x20);
                let sign_extend = Operand::const_int(Type::I32, 0x1f);
                let label = self.make_label();
                let t_1 = self.mov_fixed(&mut None, src1_lo, Reg::Ecx);
                let t_2 = self.mov(&mut None, src0_lo);
                let t_3 = self.mov(&mut None, src0_hi);
                self.push(MInst::Shrd { dst: t_2, src: t_3, amount: Operand::Var(t_1) });
                self.push(MInst::Sar { dst: t_3, amount: Operand::Var(t_1) });
                self.test(Operand::Var(t_1), bit_test);
                self.br_label(BrCond::E, label);
                self.fake_use(t_2);
                self.mov(&mut Some(t_2), Operand::Var(t_3));
                self.push(MInst::Sar { dst: t_3, amount: sign_extend });
                self.place_label(label);
                self.mov(&mut Some(dest_lo), Operand::Var(t_2));
                self.mov(&mut Some(dest_hi), Operand::Var(t_3));
            }
            ArithOp::Udiv => {
                self.lower_helper_call("__udivdi3", Some(dest), &[orig_src0, orig_src1])?
            }
            ArithOp::Sdiv => {
                self.lower_helper_call("__divdi3", Some(dest), &[orig_src0, orig_src1])?
            }
            ArithOp::Urem => {
                self.lower_helper_call("__umoddi3", Some(dest), &[orig_src0, orig_src1])?
            }
            ArithOp::Srem => {
                self.lower_helper_call("__moddi3", Some(dest), &[orig_src0, orig_src1])?
            }
            ArithOp::Fadd | ArithOp::Fsub | ArithOp::Fmul | ArithOp::Fdiv | ArithOp::Frem => {
                return Err(CodegenError::InvalidArithmeticType);
            }
        }
        Ok(())
    }

    fn lower_arithmetic_vector(
        &mut self,
        dest: VarId,
        op: ArithOp,
        src0: Operand,
        src1: Operand,
    ) -> Result<(), CodegenError> {
        let ty = self.func.var(dest).ty;
        match op {
            ArithOp::Add
            | ArithOp::And
            | ArithOp::Or
            | ArithOp::Xor
            | ArithOp::Sub
            | ArithOp::Fadd
            | ArithOp::Fsub
            | ArithOp::Fmul
            | ArithOp::Fdiv => {
                let t = self.make_reg(ty, None);
                self.push(MInst::Movp { dst: t, src: src0 });
                let inst = match op {
                    ArithOp::Add => MInst::Padd { dst: t, src: src1 },
                    ArithOp::And => MInst::Pand { dst: t, src: src1 },
                    ArithOp::Or => MInst::Por { dst: t, src: src1 },
                    ArithOp::Xor => MInst::Pxor { dst: t, src: src1 },
                    ArithOp::Sub => MInst::Psub { dst: t, src: src1 },
                    ArithOp::Fadd => MInst::Addps { dst: t, src: src1 },
                    ArithOp::Fsub => MInst::Subps { dst: t, src: src1 },
                    ArithOp::Fmul => MInst::Mulps { dst: t, src: src1 },
                    _ => MInst::Divps { dst: t, src: src1 },
                };
                self.push(inst);
                self.push(MInst::Movp { dst: dest, src: Operand::Var(t) });
            }
            ArithOp::Mul => {
                let types_are_valid_for_pmull = ty == Type::V4I32 || ty == Type::V8I16;
                let instruction_set_is_valid_for_pmull =
                    ty == Type::V8I16 || self.instruction_set >= InstructionSet::Sse41;
                if types_are_valid_for_pmull && instruction_set_is_valid_for_pmull {
                    let t = self.make_reg(ty, None);
                    self.push(MInst::Movp { dst: t, src: src0 });
                    self.push(MInst::Pmull { dst: t, src: src1 });
                    self.push(MInst::Movp { dst: dest, src: Operand::Var(t) });
                } else if ty == Type::V4I32 {
                    // Lowering sequence:
                    // Note: The mask arguments have index 0 on the left.
                    //
                    // movaps  T1, Src0
                    // pshufd  T2, Src0, {1,0,3,0}
                    // pshufd  T3, Src1, {1,0,3,0}
                    // # T1 = {Src0[0] * Src1[0], Src0[2] * Src1[2]}
                    // pmuludq T1, Src1
                    // # T2 = {Src0[1] * Src1[1], Src0[3] * Src1[3]}
                    // pmuludq T2, T3
                    // # T1 = {lo(T1[0]), lo(T1[2]), lo(T2[0]), lo(T2[2])}
                    // shufps  T1, T2, {0,2,0,2}
                    // pshufd  T4, T1, {0,2,1,3}
                    // movaps  Dest, T4
                    const MASK_1030: u8 = 0x31;
                    const MASK_0202: u8 = 0x88;
                    const MASK_0213: u8 = 0xd8;
                    let t1 = self.make_reg(Type::V4I32, None);
                    let t2 = self.make_reg(Type::V4I32, None);
                    let t3 = self.make_reg(Type::V4I32, None);
                    let t4 = self.make_reg(Type::V4I32, None);
                    self.push(MInst::Movp { dst: t1, src: src0 });
                    self.push(MInst::Pshufd { dst: t2, src: src0, mask: MASK_1030 });
                    self.push(MInst::Pshufd { dst: t3, src: src1, mask: MASK_1030 });
                    self.push(MInst::Pmuludq { dst: t1, src: src1 });
                    self.push(MInst::Pmuludq { dst: t2, src: Operand::Var(t3) });
                    self.push(MInst::Shufps { dst: t1, src: Operand::Var(t2), mask: MASK_0202 });
                    self.push(MInst::Pshufd { dst: t4, src: Operand::Var(t1), mask: MASK_0213 });
                    self.push(MInst::Movp { dst: dest, src: Operand::Var(t4) });
                } else {
                    debug_assert!(ty == Type::V16I8);
                    self.scalarize_arithmetic(op, dest, src0, src1)?;
                }
            }
            ArithOp::Shl
            | ArithOp::Lshr
            | ArithOp::Ashr
            | ArithOp::Udiv
            | ArithOp::Urem
            | ArithOp::Sdiv
            | ArithOp::Srem
            | ArithOp::Frem => self.scalarize_arithmetic(op, dest, src0, src1)?,
        }
        Ok(())
    }

    /// Expand a vector operation into per-lane extract / scalar op /
    /// insert steps.
    pub(crate) fn scalarize_arithmetic(
        &mut self,
        op: ArithOp,
        dest: VarId,
        src0: Operand,
        src1: Operand,
    ) -> Result<(), CodegenError> {
        let ty = self.func.var(dest).ty;
        debug_assert!(ty.is_vector());
        let element_ty = ty.element_type();
        let num_elements = ty.num_elements();

        let mut t = Operand::Undef { ty };
        for i in 0..num_elements {
            let index = Operand::const_int(Type::I32, i as i64);

            let op0 = self.func.make_variable(element_ty, Some(self.cur_block));
            self.lower_extract_element(Some(op0), src0, index)?;
            let op1 = self.func.make_variable(element_ty, Some(self.cur_block));
            self.lower_extract_element(Some(op1), src1, index)?;

            let res = self.func.make_variable(element_ty, Some(self.cur_block));
            self.lower_arithmetic(Some(res), op, Operand::Var(op0), Operand::Var(op1))?;

            let dest_t = self.func.make_variable(ty, Some(self.cur_block));
            self.lower_insert_element(Some(dest_t), t, Operand::Var(res), index)?;
            t = Operand::Var(dest_t);
        }
        self.lower_assign(Some(dest), t)
    }

    fn lower_arithmetic_scalar(
        &mut self,
        dest: VarId,
        op: ArithOp,
        src0: Operand,
        mut src1: Operand,
    ) -> Result<(), CodegenError> {
        let dest_ty = self.func.var(dest).ty;
        match op {
            ArithOp::Add | ArithOp::And | ArithOp::Or | ArithOp::Xor | ArithOp::Sub => {
                let t = self.mov(&mut None, src0);
                match op {
                    ArithOp::Add => self.add(t, src1),
                    ArithOp::And => self.and(t, src1),
                    ArithOp::Or => self.or(t, src1),
                    ArithOp::Xor => self.xor(t, src1),
                    _ => self.sub(t, src1),
                }
                self.mov(&mut Some(dest), Operand::Var(t));
            }
            ArithOp::Mul => {
                // The 8-bit version of imul only allows the form
                // "imul r/m8" with the other factor in al.
                let t = if dest_ty == Type::I8 {
                    self.mov_fixed(&mut None, src0, Reg::Eax)
                } else {
                    self.mov(&mut None, src0)
                };
                self.push(MInst::Imul { dst: t, src: src1 });
                self.mov(&mut Some(dest), Operand::Var(t));
            }
            ArithOp::Shl | ArithOp::Lshr | ArithOp::Ashr => {
                let t = self.mov(&mut None, src0);
                if !src1.is_constant() {
                    src1 = Operand::Var(self.legalize_to_var(src1, false, Some(Reg::Ecx)));
                }
                let inst = match op {
                    ArithOp::Shl => MInst::Shl { dst: t, amount: src1 },
                    ArithOp::Lshr => MInst::Shr { dst: t, amount: src1 },
                    _ => MInst::Sar { dst: t, amount: src1 },
                };
                self.push(inst);
                self.mov(&mut Some(dest), Operand::Var(t));
            }
            ArithOp::Udiv => {
                // div and idiv are the few arithmetic operators that do not
                // allow immediates as the operand.
                let src1 = self.legalize(src1, LegalMask::REG_MEM, false, None);
                if dest_ty == Type::I8 {
                    let zero = Operand::zero(Type::I8);
                    let t = self.mov_fixed(&mut None, src0, Reg::Eax);
                    let t_ah = self.mov_fixed(&mut None, zero, Reg::Ah);
                    self.push(MInst::Div { dst: t, divisor: src1, other: t_ah });
                    self.mov(&mut Some(dest), Operand::Var(t));
                } else {
                    let zero = Operand::zero(Type::I32);
                    let t = self.mov_fixed(&mut None, src0, Reg::Eax);
                    let t_edx = self.mov_fixed(&mut None, zero, Reg::Edx);
                    self.push(MInst::Div { dst: t, divisor: src1, other: t_edx });
                    self.mov(&mut Some(dest), Operand::Var(t));
                }
            }
            ArithOp::Sdiv => {
                let src1 = self.legalize(src1, LegalMask::REG_MEM, false, None);
                if dest_ty == Type::I8 {
                    let t = self.mov_fixed(&mut None, src0, Reg::Eax);
                    self.push(MInst::Cbwdq { dst: t, src: t });
                    self.push(MInst::Idiv { dst: t, divisor: src1, other: t });
                    self.mov(&mut Some(dest), Operand::Var(t));
                } else {
                    let t_edx = self.make_reg(Type::I32, Some(Reg::Edx));
                    let t = self.mov_fixed(&mut None, src0, Reg::Eax);
                    self.push(MInst::Cbwdq { dst: t_edx, src: t });
                    self.push(MInst::Idiv { dst: t, divisor: src1, other: t_edx });
                    self.mov(&mut Some(dest), Operand::Var(t));
                }
            }
            ArithOp::Urem => {
                let src1 = self.legalize(src1, LegalMask::REG_MEM, false, None);
                if dest_ty == Type::I8 {
                    let zero = Operand::zero(Type::I8);
                    let t = self.mov_fixed(&mut None, src0, Reg::Eax);
                    let t_ah = self.mov_fixed(&mut None, zero, Reg::Ah);
                    self.push(MInst::Div { dst: t_ah, divisor: src1, other: t });
                    self.mov(&mut Some(dest), Operand::Var(t_ah));
                } else {
                    let zero = Operand::zero(Type::I32);
                    let t_edx = self.mov_fixed(&mut None, zero, Reg::Edx);
                    let t = self.mov_fixed(&mut None, src0, Reg::Eax);
                    self.push(MInst::Div { dst: t_edx, divisor: src1, other: t });
                    self.mov(&mut Some(dest), Operand::Var(t_edx));
                }
            }
            ArithOp::Srem => {
                let src1 = self.legalize(src1, LegalMask::REG_MEM, false, None);
                if dest_ty == Type::I8 {
                    let t_ah = self.make_reg(Type::I8, Some(Reg::Ah));
                    let t = self.mov_fixed(&mut None, src0, Reg::Eax);
                    self.push(MInst::Cbwdq { dst: t, src: t });
                    self.fake_def(t_ah, None);
                    self.push(MInst::Idiv { dst: t_ah, divisor: src1, other: t });
                    self.mov(&mut Some(dest), Operand::Var(t_ah));
                } else {
                    let t_edx = self.make_reg(Type::I32, Some(Reg::Edx));
                    let t = self.mov_fixed(&mut None, src0, Reg::Eax);
                    self.push(MInst::Cbwdq { dst: t_edx, src: t });
                    self.push(MInst::Idiv { dst: t_edx, divisor: src1, other: t });
                    self.mov(&mut Some(dest), Operand::Var(t_edx));
                }
            }
            ArithOp::Fadd | ArithOp::Fsub | ArithOp::Fmul | ArithOp::Fdiv => {
                let t = self.mov(&mut None, src0);
                let inst = match op {
                    ArithOp::Fadd => MInst::Addss { dst: t, src: src1 },
                    ArithOp::Fsub => MInst::Subss { dst: t, src: src1 },
                    ArithOp::Fmul => MInst::Mulss { dst: t, src: src1 },
                    _ => MInst::Divss { dst: t, src: src1 },
                };
                self.push(inst);
                self.mov(&mut Some(dest), Operand::Var(t));
            }
            ArithOp::Frem => {
                let helper = if dest_ty == Type::F32 { "fmodf" } else { "fmod" };
                return self.lower_helper_call(helper, Some(dest), &[src0, src1]);
            }
        }
        Ok(())
    }
}
