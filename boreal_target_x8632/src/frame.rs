//! Stack-frame construction: prolog and epilog insertion.

use boreal_ir::{CodegenError, MemOperand, Operand, RegWeight, Type, VarId};

use crate::inst::MInst;
use crate::lowering::TargetX8632;
use crate::reg::{register_set, Reg, RegSetMask};

/// Size of the return address on the stack.
const RET_IP_SIZE_BYTES: u32 = 4;
/// Call-site stack alignment.
pub(crate) const STACK_ALIGNMENT_BYTES: u32 = 16;
/// log2 of the smallest and largest stack slot widths.
const LOG2_OF_MIN_STACK_SLOT_SIZE: u32 = 2;
const LOG2_OF_MAX_STACK_SLOT_SIZE: u32 = 4;

/// `value` rounded up to the next multiple of `alignment` (a power of 2).
pub(crate) fn apply_alignment(value: u32, alignment: u32) -> u32 {
    debug_assert!(alignment.is_power_of_two());
    (value + alignment - 1) & alignment.wrapping_neg()
}

/// `value` rounded up to the next multiple of the stack alignment.
pub(crate) fn apply_stack_alignment(value: u32) -> u32 {
    apply_alignment(value, STACK_ALIGNMENT_BYTES)
}

impl TargetX8632<'_> {
    /// Build the stack frame: assign spill slots and argument offsets,
    /// then wrap the code in a prolog and epilogs.
    pub fn gen_frame(&mut self) -> Result<(), CodegenError> {
        self.add_prolog();
        for bi in 0..self.mblocks.len() {
            self.add_epilog(bi);
        }
        Ok(())
    }

    /// Stack frame layout:
    ///
    /// ```text
    /// +------------------------+
    /// | 1. return address      |
    /// +------------------------+
    /// | 2. preserved registers |
    /// +------------------------+
    /// | 3. padding             |
    /// +------------------------+
    /// | 4. global spill area   |
    /// +------------------------+
    /// | 5. padding             |
    /// +------------------------+
    /// | 6. local spill area    |
    /// +------------------------+
    /// | 7. padding             |
    /// +------------------------+
    /// | 8. allocas             |
    /// +------------------------+
    /// ```
    fn add_prolog(&mut self) {
        // Without coalescing, each register-less variable gets its own
        // stack slot. With it, "global" (multi-block) variables still get
        // their own slots, but "local" slots are shared across basic
        // blocks, sized by the largest per-block demand. Coalescing is
        // unsound when the function calls a returns-twice function: blocks
        // may be revisited, and their locals are then live until the
        // second return.
        let simple_coalescing = !self.func.returns_twice;
        let mut in_args_size_bytes: u32 = 0;
        let mut preserved_regs_size_bytes: u32 = 0;
        self.spill_area_size_bytes = 0;
        debug_assert!(self.out.is_empty());

        let callee_saves = register_set(RegSetMask::CALLEE_SAVE, RegSetMask::NONE);

        let mut globals_size: u32 = 0;
        let mut locals_size: Vec<u32> = vec![0; self.func.blocks.len()];

        // Prepass: classify every variable and compute the used-register
        // set.
        self.regs_used = crate::reg::RegSet::EMPTY;
        let mut spilled_variables: Vec<VarId> = Vec::new();
        let mut variables_linked_to_spill_slots: Vec<VarId> = Vec::new();
        // Alignment of the locals sub-area, if it is separate.
        let mut locals_slots_alignment_bytes: u32 = 0;
        // The whole spill area gets the largest natural alignment of the
        // variables in it.
        let mut spill_area_alignment_bytes: u32 = 0;
        for i in 0..self.func.variables.len() {
            let id = VarId(i as u32);
            let var = self.func.var(id);
            if let Some(reg_num) = var.reg_num {
                self.regs_used.insert(Reg::from_num(reg_num));
                continue;
            }
            // An argument either does not need a slot (passed in a
            // register) or already has one (passed on the stack).
            if var.is_arg {
                continue;
            }
            // An unreferenced variable doesn't need a slot.
            if self.func.liveness_computed && var.live_range_empty {
                continue;
            }
            // A spill slot linked to a variable with a stack slot reuses
            // that slot.
            if var.weight == RegWeight::Zero {
                if let Some(hint) = var.pref_reg {
                    if hint.allow_overlap && !self.func.var(hint.var).has_reg() {
                        variables_linked_to_spill_slots.push(id);
                        continue;
                    }
                }
            }
            spilled_variables.push(id);
        }

        let sorted_spilled_variables = self.sort_by_alignment(spilled_variables);
        for &id in &sorted_spilled_variables {
            let increment = self.func.var(id).ty.width_on_stack();
            if spill_area_alignment_bytes == 0 {
                spill_area_alignment_bytes = increment;
            }
            if simple_coalescing {
                if self.func.var(id).multi_block {
                    globals_size += increment;
                } else {
                    let node_index =
                        self.func.var(id).local_use_block.map(|b| b.index()).unwrap_or(0);
                    locals_size[node_index] += increment;
                    if locals_size[node_index] > self.spill_area_size_bytes {
                        self.spill_area_size_bytes = locals_size[node_index];
                    }
                    if locals_slots_alignment_bytes == 0 {
                        locals_slots_alignment_bytes = increment;
                    }
                }
            } else {
                self.spill_area_size_bytes += increment;
            }
        }
        let locals_spill_area_size = self.spill_area_size_bytes;
        self.spill_area_size_bytes += globals_size;

        // Push preserved registers, in ascending register number.
        for reg in callee_saves.iter() {
            if self.regs_used.contains(reg) {
                preserved_regs_size_bytes += 4;
                let var = self.get_phys_reg(reg);
                self.push(MInst::Push { src: var });
            }
        }

        // Generate "push ebp; mov ebp, esp".
        if self.is_ebp_based_frame {
            debug_assert!(!self.regs_used.contains(Reg::Ebp));
            preserved_regs_size_bytes += 4;
            let ebp = self.get_phys_reg(Reg::Ebp);
            let esp = self.get_phys_reg(Reg::Esp);
            self.push(MInst::Push { src: ebp });
            self.mov(&mut Some(ebp), Operand::Var(esp));
        }

        // Region 3: align the variables area. This is the padding after
        // the preserved registers and before the spill areas.
        let mut spill_area_padding_bytes = 0;
        if spill_area_alignment_bytes > 0 {
            debug_assert!(spill_area_alignment_bytes <= STACK_ALIGNMENT_BYTES);
            let padding_start = RET_IP_SIZE_BYTES + preserved_regs_size_bytes;
            let spill_area_start = apply_alignment(padding_start, spill_area_alignment_bytes);
            spill_area_padding_bytes = spill_area_start - padding_start;
            self.spill_area_size_bytes += spill_area_padding_bytes;
        }

        // Region 5: when globals and locals areas are separate, align the
        // locals area by padding the end of the globals area.
        let mut globals_and_subsequent_padding = globals_size;
        if locals_slots_alignment_bytes > 0 {
            debug_assert!(locals_slots_alignment_bytes <= spill_area_alignment_bytes);
            globals_and_subsequent_padding =
                apply_alignment(globals_size, locals_slots_alignment_bytes);
            self.spill_area_size_bytes += globals_and_subsequent_padding - globals_size;
        }

        // Region 7: align esp for the 16-byte call-site contract.
        if self.needs_stack_alignment {
            let stack_offset = RET_IP_SIZE_BYTES + preserved_regs_size_bytes;
            let stack_size = apply_stack_alignment(stack_offset + self.spill_area_size_bytes);
            self.spill_area_size_bytes = stack_size - stack_offset;
        }

        // Generate "sub esp, SpillAreaSizeBytes".
        if self.spill_area_size_bytes > 0 {
            let esp = self.get_phys_reg(Reg::Esp);
            self.sub(esp, Operand::const_i32(self.spill_area_size_bytes as i32));
        }

        // Fill in stack offsets for stack args, and copy args into
        // registers for those that were register-allocated. Args are
        // pushed right to left, so arg[0] is closest to the frame pointer.
        let mut basic_frame_offset = preserved_regs_size_bytes + RET_IP_SIZE_BYTES;
        if !self.is_ebp_based_frame {
            basic_frame_offset += self.spill_area_size_bytes;
        }
        let mut num_xmm_args = 0;
        for i in 0..self.func.args.len() {
            let arg = self.func.args[i];
            // Skip arguments passed in registers.
            if self.func.var(arg).ty.is_vector() && num_xmm_args < super::lowering::MAX_XMM_ARGS {
                num_xmm_args += 1;
                continue;
            }
            self.finish_argument_lowering(arg, basic_frame_offset, &mut in_args_size_bytes);
        }

        // Fill in stack offsets for locals.
        let mut globals_space_used = spill_area_padding_bytes;
        locals_size.iter_mut().for_each(|s| *s = 0);
        let mut next_stack_offset = globals_space_used;
        for &id in &sorted_spilled_variables {
            let increment = self.func.var(id).ty.width_on_stack();
            if simple_coalescing {
                if self.func.var(id).multi_block {
                    globals_space_used += increment;
                    next_stack_offset = globals_space_used;
                } else {
                    let node_index =
                        self.func.var(id).local_use_block.map(|b| b.index()).unwrap_or(0);
                    locals_size[node_index] += increment;
                    next_stack_offset = spill_area_padding_bytes
                        + globals_and_subsequent_padding
                        + locals_size[node_index];
                }
            } else {
                next_stack_offset += increment;
            }
            let offset = if self.is_ebp_based_frame {
                -(next_stack_offset as i32)
            } else {
                (self.spill_area_size_bytes - next_stack_offset) as i32
            };
            self.func.var_mut(id).stack_offset = Some(offset);
        }
        self.has_computed_frame = true;

        // Variables linked to spilled variables reuse their slots.
        for id in variables_linked_to_spill_slots {
            if let Some(hint) = self.func.var(id).pref_reg {
                let linked_offset = self.func.var(hint.var).stack_offset;
                self.func.var_mut(id).stack_offset = linked_offset;
            }
        }

        log::debug!(
            "stack layout: in-args={} ret-addr={} preserved={} spill-padding={} globals={} \
             globals-locals-padding={} locals={} esp-adjustment={} ebp-based={}",
            in_args_size_bytes,
            RET_IP_SIZE_BYTES,
            preserved_regs_size_bytes,
            spill_area_padding_bytes,
            globals_size,
            globals_and_subsequent_padding - globals_size,
            locals_spill_area_size,
            self.spill_area_size_bytes,
            self.is_ebp_based_frame,
        );

        // Splice the prolog in front of the entry block.
        let prolog = std::mem::take(&mut self.out);
        if let Some(entry) = self.mblocks.first_mut() {
            entry.insts.splice(0..0, prolog);
        }
    }

    /// Assign a frame offset to a stack-passed argument, recursing into
    /// the lo/hi halves of an i64 argument (lo first, little-endian), and
    /// copy it into its register when it was register-allocated.
    fn finish_argument_lowering(
        &mut self,
        arg: VarId,
        basic_frame_offset: u32,
        in_args_size_bytes: &mut u32,
    ) {
        let ty = self.func.var(arg).ty;
        let lo = self.func.var(arg).lo;
        let hi = self.func.var(arg).hi;
        if let (Some(lo), Some(hi)) = (lo, hi) {
            if ty == Type::I64 {
                // The halves are i32, so this cannot recurse further.
                debug_assert!(self.func.var(lo).ty != Type::I64);
                debug_assert!(self.func.var(hi).ty != Type::I64);
                self.finish_argument_lowering(lo, basic_frame_offset, in_args_size_bytes);
                self.finish_argument_lowering(hi, basic_frame_offset, in_args_size_bytes);
                return;
            }
        }
        if ty.is_vector() {
            *in_args_size_bytes = apply_stack_alignment(*in_args_size_bytes);
        }
        let offset = (basic_frame_offset + *in_args_size_bytes) as i32;
        self.func.var_mut(arg).stack_offset = Some(offset);
        *in_args_size_bytes += ty.width_on_stack();
        if self.func.var(arg).has_reg() {
            debug_assert!(ty != Type::I64);
            let frame_ptr = self.get_phys_reg(self.frame_or_stack_reg());
            let mem = Operand::Mem(MemOperand::base_offset(ty, frame_ptr, offset));
            if ty.is_vector() {
                self.push(MInst::Movp { dst: arg, src: mem });
            } else {
                self.push(MInst::Mov { dst: arg, src: mem });
            }
        }
    }

    /// Sort spill variables into buckets by the log2 of their stack-slot
    /// width, largest alignment first.
    fn sort_by_alignment(&self, source: Vec<VarId>) -> Vec<VarId> {
        const NUM_BUCKETS: usize =
            (LOG2_OF_MAX_STACK_SLOT_SIZE - LOG2_OF_MIN_STACK_SLOT_SIZE + 1) as usize;
        let mut buckets: [Vec<VarId>; NUM_BUCKETS] = Default::default();
        for id in source {
            let natural_alignment = self.func.var(id).ty.width_on_stack();
            let log_alignment = natural_alignment.trailing_zeros();
            debug_assert!(log_alignment >= LOG2_OF_MIN_STACK_SLOT_SIZE);
            debug_assert!(log_alignment <= LOG2_OF_MAX_STACK_SLOT_SIZE);
            let bucket_index = (log_alignment - LOG2_OF_MIN_STACK_SLOT_SIZE) as usize;
            buckets[bucket_index].push(id);
        }
        let mut dest = Vec::new();
        for bucket in buckets.into_iter().rev() {
            dest.extend(bucket);
        }
        dest
    }

    /// Insert an epilog before the block's `ret`, when it has one.
    fn add_epilog(&mut self, block_index: usize) {
        let Some(ret_idx) = self.mblocks[block_index]
            .insts
            .iter()
            .rposition(|inst| matches!(inst, MInst::Ret { .. }))
        else {
            return;
        };

        debug_assert!(self.out.is_empty());
        let esp = self.get_phys_reg(Reg::Esp);
        if self.is_ebp_based_frame {
            let ebp = self.get_phys_reg(Reg::Ebp);
            self.mov(&mut Some(esp), Operand::Var(ebp));
            self.push(MInst::Pop { dst: ebp });
        } else if self.spill_area_size_bytes > 0 {
            // add esp, SpillAreaSizeBytes
            self.add(esp, Operand::const_i32(self.spill_area_size_bytes as i32));
        }

        // Pop preserved registers in reverse push order.
        let callee_saves = register_set(RegSetMask::CALLEE_SAVE, RegSetMask::NONE);
        let mut pops: Vec<Reg> = callee_saves.iter().collect();
        pops.reverse();
        for reg in pops {
            if reg == Reg::Ebp && self.is_ebp_based_frame {
                continue;
            }
            if self.regs_used.contains(reg) {
                let var = self.get_phys_reg(reg);
                self.push(MInst::Pop { dst: var });
            }
        }

        let epilog = std::mem::take(&mut self.out);
        self.mblocks[block_index].insts.splice(ret_idx..ret_idx, epilog);
    }
}
