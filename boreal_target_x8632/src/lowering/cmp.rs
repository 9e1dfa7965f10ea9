//! Compare, branch, select and switch lowering.

use boreal_ir::{BlockId, CastOp, CodegenError, FCond, ICond, InstKind, InstructionSet, Operand,
    Type, VarId};

use crate::cond::{BrCond, TABLE_FCMP, TABLE_ICMP32, TABLE_ICMP64};
use crate::inst::MInst;
use crate::lowering::{LegalMask, TargetX8632};
use crate::reg::Reg;

impl TargetX8632<'_> {
    pub(crate) fn lower_br(
        &mut self,
        cond: Option<Operand>,
        true_target: BlockId,
        false_target: Option<BlockId>,
    ) -> Result<(), CodegenError> {
        match cond {
            None => self.br_uncond(true_target),
            Some(cond) => {
                let false_target = match false_target {
                    Some(f) => f,
                    None => unreachable!("conditional branch without a false target"),
                };
                let src0 = self.legalize(cond, LegalMask::REG_MEM, false, None);
                let zero = Operand::zero(Type::I32);
                self.cmp(src0, zero);
                self.br_blocks(BrCond::Ne, true_target, false_target);
            }
        }
        Ok(())
    }

    pub(crate) fn lower_icmp(
        &mut self,
        dest: Option<VarId>,
        cond: ICond,
        a: Operand,
        b: Operand,
    ) -> Result<(), CodegenError> {
        let dest = dest.expect("icmp has a destination");
        let src0 = self.legalize_default(a);
        let src1 = self.legalize_default(b);

        if self.func.var(dest).ty.is_vector() {
            return self.lower_icmp_vector(dest, cond, src0, src1);
        }

        // If src1 is an immediate or known to be in a physical register,
        // src0 may be a memory operand; otherwise src0 must be copied into
        // a physical register.
        let is_src1_imm_or_reg = match src1 {
            _ if src1.is_constant() => true,
            Operand::Var(v) => self.func.var(v).has_reg(),
            _ => false,
        };
        let src0_mask = if is_src1_imm_or_reg { LegalMask::REG_MEM } else { LegalMask::REG };

        // Try to fuse a compare immediately followed by a conditional
        // branch, when the branch condition is the compare dest and this
        // branch is its only use.
        let src0_ty = self.func.operand_ty(&src0);
        if src0_ty != Type::I64 {
            if let Some(next_idx) = self.next_inst_index(self.cur_idx) {
                let mut fused_targets = None;
                let next = self.inst_at(next_idx);
                if let InstKind::Br {
                    cond: Some(br_cond),
                    true_target,
                    false_target: Some(false_target),
                } = &next.kind
                {
                    if *br_cond == Operand::Var(dest) && next.is_last_use(dest) {
                        fused_targets = Some((*true_target, *false_target));
                    }
                }
                if let Some((true_target, false_target)) = fused_targets {
                    self.delete_inst(next_idx);
                    let src0_rm = self.legalize(src0, src0_mask, true, None);
                    self.cmp(src0_rm, src1);
                    self.br_blocks(TABLE_ICMP32[cond as usize], true_target, false_target);
                    return Ok(());
                }
            }
        }

        // a=icmp cond, b, c ==>
        //   cmp b,c; a=1; br cond,L1; FakeUse(a); a=0; L1:
        let zero = Operand::zero(Type::I32);
        let one = Operand::const_int(Type::I32, 1);
        if src0_ty == Type::I64 {
            let src0_lo = self.lo_operand(src0);
            let src0_hi = self.hi_operand(src0);
            let src1_lo = self.lo_operand(src1);
            let src1_hi = self.hi_operand(src1);
            let src0_lo_rm = self.legalize(src0_lo, LegalMask::REG_MEM, false, None);
            let src0_hi_rm = self.legalize(src0_hi, LegalMask::REG_MEM, false, None);
            let src1_lo_ri = self.legalize(src1_lo, LegalMask::REG_IMM, false, None);
            let src1_hi_ri = self.legalize(src1_hi, LegalMask::REG_IMM, false, None);
            if cond == ICond::Eq || cond == ICond::Ne {
                let label = self.make_label();
                let initial = if cond == ICond::Eq { zero } else { one };
                let flipped = if cond == ICond::Eq { one } else { zero };
                self.mov(&mut Some(dest), initial);
                self.cmp(src0_lo_rm, src1_lo_ri);
                self.br_label(BrCond::Ne, label);
                self.cmp(src0_hi_rm, src1_hi_ri);
                self.br_label(BrCond::Ne, label);
                self.fake_use(dest);
                self.mov(&mut Some(dest), flipped);
                self.place_label(label);
            } else {
                let entry = &TABLE_ICMP64[cond as usize];
                let (c1, c2, c3) = match (entry.c1, entry.c2, entry.c3) {
                    (Some(c1), Some(c2), Some(c3)) => (c1, c2, c3),
                    _ => unreachable!("icmp64 table has no entry for eq/ne"),
                };
                let label_false = self.make_label();
                let label_true = self.make_label();
                self.mov(&mut Some(dest), one);
                self.cmp(src0_hi_rm, src1_hi_ri);
                self.br_label(c1, label_true);
                self.br_label(c2, label_false);
                self.cmp(src0_lo_rm, src1_lo_ri);
                self.br_label(c3, label_true);
                self.place_label(label_false);
                self.fake_use(dest);
                self.mov(&mut Some(dest), zero);
                self.place_label(label_true);
            }
            return Ok(());
        }

        // cmp b, c
        let src0_rm = self.legalize(src0, src0_mask, true, None);
        let label = self.make_label();
        self.cmp(src0_rm, src1);
        self.mov(&mut Some(dest), one);
        self.br_label(TABLE_ICMP32[cond as usize], label);
        self.fake_use(dest);
        self.mov(&mut Some(dest), zero);
        self.place_label(label);
        Ok(())
    }

    fn lower_icmp_vector(
        &mut self,
        dest: VarId,
        cond: ICond,
        mut src0: Operand,
        mut src1: Operand,
    ) -> Result<(), CodegenError> {
        let mut ty = self.func.operand_ty(&src0);

        // Promote i1 vectors to 128-bit integer vector types.
        if ty.element_type() == Type::I1 {
            let new_ty = match ty {
                Type::V4I1 => Type::V4I32,
                Type::V8I1 => Type::V8I16,
                Type::V16I1 => Type::V16I8,
                _ => unreachable!("unexpected i1 vector type"),
            };
            let new_src0 = self.func.make_variable(new_ty, Some(self.cur_block));
            let new_src1 = self.func.make_variable(new_ty, Some(self.cur_block));
            self.lower_cast(Some(new_src0), CastOp::Sext, src0)?;
            self.lower_cast(Some(new_src1), CastOp::Sext, src1)?;
            src0 = Operand::Var(new_src0);
            src1 = Operand::Var(new_src1);
            ty = new_ty;
        }

        let mut src0_rm = self.legalize(src0, LegalMask::REG_MEM, false, None);
        let mut src1_rm = self.legalize(src1, LegalMask::REG_MEM, false, None);

        // SSE2 only has signed comparison operations. Flip the high order
        // bit of both operands so signed compares order unsigned inputs.
        if matches!(cond, ICond::Ugt | ICond::Uge | ICond::Ult | ICond::Ule) {
            let high_order_bits = self.make_vector_of_high_order_bits(ty, None);
            let t0 = self.make_reg(ty, None);
            let t1 = self.make_reg(ty, None);
            self.push(MInst::Movp { dst: t0, src: src0_rm });
            self.push(MInst::Pxor { dst: t0, src: Operand::Var(high_order_bits) });
            self.push(MInst::Movp { dst: t1, src: src1_rm });
            self.push(MInst::Pxor { dst: t1, src: Operand::Var(high_order_bits) });
            src0_rm = Operand::Var(t0);
            src1_rm = Operand::Var(t1);
        }

        let t = self.make_reg(ty, None);
        match cond {
            ICond::Eq => {
                self.push(MInst::Movp { dst: t, src: src0_rm });
                self.push(MInst::Pcmpeq { dst: t, src: src1_rm });
            }
            ICond::Ne => {
                self.push(MInst::Movp { dst: t, src: src0_rm });
                self.push(MInst::Pcmpeq { dst: t, src: src1_rm });
                let minus_one = self.make_vector_of_minus_ones(ty, None);
                self.push(MInst::Pxor { dst: t, src: Operand::Var(minus_one) });
            }
            ICond::Ugt | ICond::Sgt => {
                self.push(MInst::Movp { dst: t, src: src0_rm });
                self.push(MInst::Pcmpgt { dst: t, src: src1_rm });
            }
            ICond::Uge | ICond::Sge => {
                // !(src1 > src0)
                self.push(MInst::Movp { dst: t, src: src1_rm });
                self.push(MInst::Pcmpgt { dst: t, src: src0_rm });
                let minus_one = self.make_vector_of_minus_ones(ty, None);
                self.push(MInst::Pxor { dst: t, src: Operand::Var(minus_one) });
            }
            ICond::Ult | ICond::Slt => {
                self.push(MInst::Movp { dst: t, src: src1_rm });
                self.push(MInst::Pcmpgt { dst: t, src: src0_rm });
            }
            ICond::Ule | ICond::Sle => {
                // !(src0 > src1)
                self.push(MInst::Movp { dst: t, src: src0_rm });
                self.push(MInst::Pcmpgt { dst: t, src: src1_rm });
                let minus_one = self.make_vector_of_minus_ones(ty, None);
                self.push(MInst::Pxor { dst: t, src: Operand::Var(minus_one) });
            }
        }
        self.push(MInst::Movp { dst: dest, src: Operand::Var(t) });
        self.eliminate_next_vector_sext(dest);
        Ok(())
    }

    pub(crate) fn lower_fcmp(
        &mut self,
        dest: Option<VarId>,
        cond: FCond,
        a: Operand,
        b: Operand,
    ) -> Result<(), CodegenError> {
        let dest = dest.expect("fcmp has a destination");
        let mut src0 = a;
        let mut src1 = b;
        let entry = &TABLE_FCMP[cond as usize];

        if self.func.var(dest).ty.is_vector() {
            if entry.swap_vector {
                std::mem::swap(&mut src0, &mut src1);
            }
            let t = if cond == FCond::True {
                // An all-ones mask needs an integer vector type.
                self.make_vector_of_minus_ones(Type::V4I32, None)
            } else if cond == FCond::False {
                self.make_vector_of_zeros(self.func.var(dest).ty, None)
            } else {
                let src0_rm = self.legalize(src0, LegalMask::REG_MEM, false, None);
                let src1_rm = self.legalize(src1, LegalMask::REG_MEM, false, None);
                let src_ty = self.func.operand_ty(&src0_rm);
                match cond {
                    FCond::One => {
                        // Check both unequal and ordered.
                        let t = self.make_reg(src_ty, None);
                        let t2 = self.make_reg(src_ty, None);
                        self.push(MInst::Movp { dst: t, src: src0_rm });
                        self.push(MInst::Cmpps {
                            dst: t,
                            src: src1_rm,
                            pred: crate::cond::CmppsCond::Neq,
                        });
                        self.push(MInst::Movp { dst: t2, src: src0_rm });
                        self.push(MInst::Cmpps {
                            dst: t2,
                            src: src1_rm,
                            pred: crate::cond::CmppsCond::Ord,
                        });
                        self.push(MInst::Pand { dst: t, src: Operand::Var(t2) });
                        t
                    }
                    FCond::Ueq => {
                        // Check both equal or unordered.
                        let t = self.make_reg(src_ty, None);
                        let t2 = self.make_reg(src_ty, None);
                        self.push(MInst::Movp { dst: t, src: src0_rm });
                        self.push(MInst::Cmpps {
                            dst: t,
                            src: src1_rm,
                            pred: crate::cond::CmppsCond::Eq,
                        });
                        self.push(MInst::Movp { dst: t2, src: src0_rm });
                        self.push(MInst::Cmpps {
                            dst: t2,
                            src: src1_rm,
                            pred: crate::cond::CmppsCond::Unord,
                        });
                        self.push(MInst::Por { dst: t, src: Operand::Var(t2) });
                        t
                    }
                    _ => {
                        let pred = match entry.predicate {
                            Some(pred) => pred,
                            None => unreachable!("vector fcmp predicate must be in the table"),
                        };
                        let t = self.make_reg(src_ty, None);
                        self.push(MInst::Movp { dst: t, src: src0_rm });
                        self.push(MInst::Cmpps { dst: t, src: src1_rm, pred });
                        t
                    }
                }
            };
            self.push(MInst::Movp { dst: dest, src: Operand::Var(t) });
            self.eliminate_next_vector_sext(dest);
            return Ok(());
        }

        // Lowering a = fcmp cond, b, c
        //   ucomiss b, c       /* only if C1 != None */
        //                      /* but swap b,c order if SwapOperands */
        //   mov a, <default>
        //   j<C1> label        /* only if C1 != None */
        //   j<C2> label        /* only if C2 != None */
        //   FakeUse(a)         /* only if C1 != None */
        //   mov a, !<default>  /* only if C1 != None */
        //   label:             /* only if C1 != None */
        if entry.swap_scalar {
            std::mem::swap(&mut src0, &mut src1);
        }
        if entry.c1.is_some() {
            let src0 = self.legalize_default(src0);
            let src1_rm = self.legalize(src1, LegalMask::REG_MEM, false, None);
            let t = self.mov(&mut None, src0);
            self.push(MInst::Ucomiss { a: t, b: src1_rm });
        }
        let default = Operand::const_int(Type::I32, entry.default as i64);
        self.mov(&mut Some(dest), default);
        if let Some(c1) = entry.c1 {
            let label = self.make_label();
            self.br_label(c1, label);
            if let Some(c2) = entry.c2 {
                self.br_label(c2, label);
            }
            self.fake_use(dest);
            let non_default = Operand::const_int(Type::I32, (entry.default == 0) as i64);
            self.mov(&mut Some(dest), non_default);
            self.place_label(label);
        }
        Ok(())
    }

    /// `%cmp = icmp/fcmp <n x ty> ...; %e = sext <n x i1> %cmp to <n x ty>`
    /// appears often in lowered C code. The compare result is already
    /// all-ones/all-zeros, so the sext reduces to a vector copy.
    pub(crate) fn eliminate_next_vector_sext(&mut self, sign_extended_result: VarId) {
        let Some(next_idx) = self.next_inst_index(self.cur_idx) else {
            return;
        };
        let next = self.inst_at(next_idx);
        let InstKind::Cast { op: CastOp::Sext, src } = &next.kind else {
            return;
        };
        if *src != Operand::Var(sign_extended_result) {
            return;
        }
        let Some(next_dest) = next.dest else {
            return;
        };
        self.delete_inst(next_idx);
        let src_var = self.legalize_to_var(Operand::Var(sign_extended_result), false, None);
        self.push(MInst::Movp { dst: next_dest, src: Operand::Var(src_var) });
    }

    pub(crate) fn lower_select(
        &mut self,
        dest: Option<VarId>,
        condition: Operand,
        src_t: Operand,
        src_f: Operand,
    ) -> Result<(), CodegenError> {
        let dest = dest.expect("select has a destination");
        let dest_ty = self.func.var(dest).ty;

        if dest_ty.is_vector() {
            let src_ty = self.func.operand_ty(&src_t);
            let t = self.make_reg(src_ty, None);
            let src_t_rm = self.legalize(src_t, LegalMask::REG_MEM, false, None);
            let src_f_rm = self.legalize(src_f, LegalMask::REG_MEM, false, None);
            if self.instruction_set >= InstructionSet::Sse41 {
                if matches!(src_ty, Type::V4I1 | Type::V4I32 | Type::V4F32) {
                    // Use blendvps: expand the condition to a sign mask in
                    // xmm0 first.
                    let condition_rm = self.legalize(condition, LegalMask::REG_MEM, false, None);
                    let xmm0 = self.make_reg(Type::V4I32, Some(Reg::Xmm0));
                    self.push(MInst::Movp { dst: xmm0, src: condition_rm });
                    self.push(MInst::Psll {
                        dst: xmm0,
                        amount: Operand::const_int(Type::I8, 31),
                    });
                    self.push(MInst::Movp { dst: t, src: src_f_rm });
                    self.push(MInst::Blendvps { dst: t, src: src_t_rm, mask: xmm0 });
                    self.push(MInst::Movp { dst: dest, src: Operand::Var(t) });
                } else {
                    debug_assert!(src_ty.num_elements() == 8 || src_ty.num_elements() == 16);
                    let cond_ty = self.func.operand_ty(&condition);
                    let sign_ext_ty =
                        if cond_ty == Type::V8I1 { Type::V8I16 } else { Type::V16I8 };
                    let xmm0 = self.make_reg(sign_ext_ty, Some(Reg::Xmm0));
                    self.lower_cast(Some(xmm0), CastOp::Sext, condition)?;
                    self.push(MInst::Movp { dst: t, src: src_f_rm });
                    self.push(MInst::Pblendvb { dst: t, src: src_t_rm, mask: xmm0 });
                    self.push(MInst::Movp { dst: dest, src: Operand::Var(t) });
                }
                return Ok(());
            }
            // Lower select without SSE4.1:
            // a=d?b:c ==>
            //   if elementtype(d) != i1:
            //      d=sext(d);
            //   a=(b&d)|(c&~d);
            let t2 = self.make_reg(src_ty, None);
            if src_ty == Type::V4F32 {
                // The sext operation takes only integer arguments.
                let t3 = self.func.make_variable(Type::V4I32, Some(self.cur_block));
                self.lower_cast(Some(t3), CastOp::Sext, condition)?;
                self.push(MInst::Movp { dst: t, src: Operand::Var(t3) });
            } else if src_ty.element_type() != Type::I1 {
                self.lower_cast(Some(t), CastOp::Sext, condition)?;
            } else {
                let condition_rm = self.legalize(condition, LegalMask::REG_MEM, false, None);
                self.push(MInst::Movp { dst: t, src: condition_rm });
            }
            self.push(MInst::Movp { dst: t2, src: Operand::Var(t) });
            self.push(MInst::Pand { dst: t, src: src_t_rm });
            self.push(MInst::Pandn { dst: t2, src: src_f_rm });
            self.push(MInst::Por { dst: t, src: Operand::Var(t2) });
            self.push(MInst::Movp { dst: dest, src: Operand::Var(t) });
            return Ok(());
        }

        // a=d?b:c ==> cmp d,0; a=b; jne L1; FakeUse(a); a=c; L1:
        let condition_rm = self.legalize(condition, LegalMask::REG_MEM, false, None);
        let zero = Operand::zero(Type::I32);
        let label = self.make_label();

        if dest_ty == Type::I64 {
            let dest_lo = self.lo_var(dest);
            let dest_hi = self.hi_var(dest);
            let src_t_lo = self.lo_operand(src_t);
            let src_t_hi = self.hi_operand(src_t);
            let src_lo_ri = self.legalize(src_t_lo, LegalMask::REG_IMM, true, None);
            let src_hi_ri = self.legalize(src_t_hi, LegalMask::REG_IMM, true, None);
            self.cmp(condition_rm, zero);
            self.mov(&mut Some(dest_lo), src_lo_ri);
            self.mov(&mut Some(dest_hi), src_hi_ri);
            self.br_label(BrCond::Ne, label);
            self.fake_use(dest_lo);
            self.fake_use(dest_hi);
            let src_f_lo = self.lo_operand(src_f);
            let src_f_hi = self.hi_operand(src_f);
            let src_lo_ri = self.legalize(src_f_lo, LegalMask::REG_IMM, true, None);
            let src_hi_ri = self.legalize(src_f_hi, LegalMask::REG_IMM, true, None);
            self.mov(&mut Some(dest_lo), src_lo_ri);
            self.mov(&mut Some(dest_hi), src_hi_ri);
        } else {
            self.cmp(condition_rm, zero);
            let src_t = self.legalize(src_t, LegalMask::REG_IMM, true, None);
            self.mov(&mut Some(dest), src_t);
            self.br_label(BrCond::Ne, label);
            self.fake_use(dest);
            let src_f = self.legalize(src_f, LegalMask::REG_IMM, true, None);
            self.mov(&mut Some(dest), src_f);
        }
        self.place_label(label);
        Ok(())
    }

    /// The most naive switch lowering:
    /// cmp a,val[0]; jeq label[0]; cmp a,val[1]; jeq label[1]; ... jmp default
    pub(crate) fn lower_switch(
        &mut self,
        value: Operand,
        cases: &[(i64, BlockId)],
        default: BlockId,
    ) -> Result<(), CodegenError> {
        // Be slightly less naive by forcing the comparison source into a
        // physical register when it has two or more uses.
        let src0 = if cases.len() >= 2 {
            Operand::Var(self.legalize_to_var(value, true, None))
        } else {
            self.legalize(value, LegalMask::REG_MEM, true, None)
        };
        for (value, target) in cases {
            let case_value = Operand::const_int(Type::I32, *value);
            self.cmp(src0, case_value);
            self.push(MInst::Br {
                cond: Some(BrCond::E),
                target: crate::inst::Target::Block(*target),
                target_false: None,
            });
        }
        self.br_uncond(default);
        Ok(())
    }
}
