//! Vector element extraction and insertion.

use boreal_ir::{CastOp, CodegenError, InstructionSet, Operand, RegWeight, Type, VarId};

use crate::cond::in_vector_element_type;
use crate::inst::MInst;
use crate::lowering::{LegalMask, TargetX8632};

fn constant_index(index: Operand) -> u32 {
    match index.as_const_int() {
        Some(value) => value as u32,
        None => unreachable!("vector element index must be a compile-time constant"),
    }
}

impl TargetX8632<'_> {
    pub(crate) fn lower_extract_element(
        &mut self,
        dest: Option<VarId>,
        source_vect: Operand,
        index: Operand,
    ) -> Result<(), CodegenError> {
        let dest = dest.expect("extractelement has a destination");
        let index = constant_index(index);
        let ty = self.func.operand_ty(&source_vect);
        debug_assert!(index < ty.num_elements());
        let element_ty = ty.element_type();
        let in_vector_element_ty = in_vector_element_type(ty);
        let mut extracted_element = self.make_reg(in_vector_element_ty, None);

        let can_use_pextr = ty == Type::V8I16
            || ty == Type::V8I1
            || self.instruction_set >= InstructionSet::Sse41;
        if can_use_pextr && ty != Type::V4F32 {
            // Use pextrb, pextrw, or pextrd.
            let source_vect_r = self.legalize_to_var(source_vect, false, None);
            self.push(MInst::Pextr {
                dst: extracted_element,
                src: source_vect_r,
                lane: index as u8,
            });
        } else if matches!(ty, Type::V4I32 | Type::V4F32 | Type::V4I1) {
            // Use pshufd and movd/movss.
            let t = if index != 0 {
                // The shuffle is only needed when the element is not
                // already at the lowest index.
                let t = self.make_reg(ty, None);
                let source_rm = self.legalize(source_vect, LegalMask::REG_MEM, false, None);
                self.push(MInst::Pshufd { dst: t, src: source_rm, mask: index as u8 });
                t
            } else {
                self.legalize_to_var(source_vect, false, None)
            };

            if in_vector_element_ty == Type::I32 {
                self.push(MInst::Movd { dst: extracted_element, src: Operand::Var(t) });
            } else {
                // movss merges into its destination's low lane, so it needs
                // a FakeDef to keep the live range analysis consistent.
                self.fake_def(extracted_element, None);
                self.push(MInst::Movss { dst: extracted_element, src: t });
            }
        } else {
            debug_assert!(ty == Type::V16I8 || ty == Type::V16I1);
            // Spill the value to a stack slot and do the extraction in
            // memory.
            let slot = self.func.make_variable(ty, Some(self.cur_block));
            self.func.var_mut(slot).weight = RegWeight::Zero;
            let source_vect_r = self.legalize_to_var(source_vect, false, None);
            self.push(MInst::Movp { dst: slot, src: Operand::Var(source_vect_r) });

            let offset = index * in_vector_element_ty.width_in_bytes();
            let loc = self.memory_operand_for_stack_slot(in_vector_element_ty, slot, offset);
            self.mov(&mut Some(extracted_element), Operand::Mem(loc));
        }

        if element_ty == Type::I1 {
            // Truncate extracted integers to i1s if necessary.
            let t = self.make_reg(Type::I1, None);
            self.lower_cast(Some(t), CastOp::Trunc, Operand::Var(extracted_element))?;
            extracted_element = t;
        }

        self.mov(&mut Some(dest), Operand::Var(extracted_element));
        Ok(())
    }

    pub(crate) fn lower_insert_element(
        &mut self,
        dest: Option<VarId>,
        source_vect: Operand,
        element: Operand,
        index: Operand,
    ) -> Result<(), CodegenError> {
        let dest = dest.expect("insertelement has a destination");
        let index = constant_index(index);
        let ty = self.func.operand_ty(&source_vect);
        debug_assert!(index < ty.num_elements());
        let element_ty = ty.element_type();
        let in_vector_element_ty = in_vector_element_type(ty);

        let mut element = element;
        if element_ty == Type::I1 {
            // Expand the element to the appropriate size for insertion.
            let expanded = self.func.make_variable(in_vector_element_ty, Some(self.cur_block));
            self.lower_cast(Some(expanded), CastOp::Zext, element)?;
            element = Operand::Var(expanded);
        }

        if ty == Type::V8I16
            || ty == Type::V8I1
            || self.instruction_set >= InstructionSet::Sse41
        {
            // Use insertps, pinsrb, pinsrw, or pinsrd.
            let element_rm = self.legalize(element, LegalMask::REG_MEM, false, None);
            let source_vect_rm = self.legalize(source_vect, LegalMask::REG_MEM, false, None);
            let t = self.make_reg(ty, None);
            self.push(MInst::Movp { dst: t, src: source_vect_rm });
            if ty == Type::V4F32 {
                self.push(MInst::Insertps { dst: t, src: element_rm, mask: (index as u8) << 4 });
            } else {
                self.push(MInst::Pinsr { dst: t, src: element_rm, lane: index as u8 });
            }
            self.push(MInst::Movp { dst: dest, src: Operand::Var(t) });
        } else if matches!(ty, Type::V4I32 | Type::V4F32 | Type::V4I1) {
            // Use shufps or movss.
            let source_vect_rm = self.legalize(source_vect, LegalMask::REG_MEM, false, None);
            let element_r = if in_vector_element_ty == Type::F32 {
                // The element is already in an XMM register.
                self.legalize_to_var(element, false, None)
            } else {
                // Copy an integer into an XMM register.
                let element_rm = self.legalize(element, LegalMask::REG_MEM, false, None);
                let element_r = self.make_reg(ty, None);
                self.push(MInst::Movd { dst: element_r, src: element_rm });
                element_r
            };

            if index == 0 {
                let t = self.make_reg(ty, None);
                self.push(MInst::Movp { dst: t, src: source_vect_rm });
                self.push(MInst::Movss { dst: t, src: element_r });
                self.push(MInst::Movp { dst: dest, src: Operand::Var(t) });
                return Ok(());
            }

            // shufps treats its operands as vectors of four doublewords:
            // the destination's two high doublewords are selected from the
            // source and the two low doublewords from the destination. An
            // insertelement is two shufps with appropriate masks; in all
            // cases below element_r[0] is inserted into source_vect:
            //
            // insertelement into index 1 (result in element_r):
            //   element_r := element_r[0, 0] source_vect_rm[0, 0]
            //   element_r := element_r[3, 0] source_vect_rm[2, 3]
            //
            // insertelement into index 2 (result in t):
            //   t := source_vect_rm
            //   element_r := element_r[0, 0] t[0, 3]
            //   t := t[0, 1] element_r[0, 3]
            //
            // insertelement into index 3 (result in t):
            //   t := source_vect_rm
            //   element_r := element_r[0, 0] t[0, 2]
            //   t := t[0, 1] element_r[3, 0]
            const MASK1: [u8; 3] = [0x00, 0xC0, 0x80];
            const MASK2: [u8; 3] = [0xE3, 0xC4, 0x34];
            let mask1 = MASK1[index as usize - 1];
            let mask2 = MASK2[index as usize - 1];

            if index == 1 {
                self.push(MInst::Shufps { dst: element_r, src: source_vect_rm, mask: mask1 });
                self.push(MInst::Shufps { dst: element_r, src: source_vect_rm, mask: mask2 });
                self.push(MInst::Movp { dst: dest, src: Operand::Var(element_r) });
            } else {
                let t = self.make_reg(ty, None);
                self.push(MInst::Movp { dst: t, src: source_vect_rm });
                self.push(MInst::Shufps { dst: element_r, src: Operand::Var(t), mask: mask1 });
                self.push(MInst::Shufps { dst: t, src: Operand::Var(element_r), mask: mask2 });
                self.push(MInst::Movp { dst: dest, src: Operand::Var(t) });
            }
        } else {
            debug_assert!(ty == Type::V16I8 || ty == Type::V16I1);
            // Spill the value to a stack slot and perform the insertion in
            // memory.
            let slot = self.func.make_variable(ty, Some(self.cur_block));
            self.func.var_mut(slot).weight = RegWeight::Zero;
            let source_vect_r = self.legalize_to_var(source_vect, false, None);
            self.push(MInst::Movp { dst: slot, src: Operand::Var(source_vect_r) });

            let offset = index * in_vector_element_ty.width_in_bytes();
            let loc = self.memory_operand_for_stack_slot(in_vector_element_ty, slot, offset);
            let element_r = self.legalize_to_var(element, false, None);
            self.store(Operand::Var(element_r), Operand::Mem(loc));

            let t = self.make_reg(ty, None);
            self.push(MInst::Movp { dst: t, src: Operand::Var(slot) });
            self.push(MInst::Movp { dst: dest, src: Operand::Var(t) });
        }
        Ok(())
    }
}
