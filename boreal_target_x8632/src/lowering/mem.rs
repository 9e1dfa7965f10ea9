//! Memory operations: load/store lowering, alloca, and the address-mode
//! optimiser that folds `base + index*scale + offset` into memory operands.

use boreal_ir::{
    ArithOp, CodegenError, Function, InstKind, MemOffset, MemOperand, Operand, SegmentReg, Type,
    VarId,
};

use crate::frame::apply_alignment;
use crate::inst::MInst;
use crate::lowering::{LegalMask, TargetX8632};
use crate::reg::Reg;

impl TargetX8632<'_> {
    pub(crate) fn lower_load(
        &mut self,
        dest: Option<VarId>,
        addr: Operand,
    ) -> Result<(), CodegenError> {
        // A load is an assign whose source is a memory operand; the
        // address-mode optimiser may already have built one.
        let dest = dest.expect("load has a destination");
        let ty = self.func.var(dest).ty;
        let mem = self.form_memory_operand(addr, ty);
        let src0 = Operand::Mem(mem);

        // Fuse this load with a following arithmetic instruction:
        //   a=[mem]; c=b+a ==> c=b+[mem]  (if last use of a and a not in b)
        //   a=[mem]; c=a+b ==> c=b+[mem]  (if commutative and the above)
        if let Some(next_idx) = self.next_inst_index(self.cur_idx) {
            let mut fused = None;
            let next = self.inst_at(next_idx);
            if let InstKind::Arith { op, a, b } = &next.kind {
                let (op, a, b) = (*op, *a, *b);
                let next_dest = next.dest;
                let last_use = next.is_last_use(dest);
                if b.as_var() == Some(dest) && last_use && a.as_var() != Some(dest) {
                    fused = Some((op, next_dest, a, src0));
                } else if a.as_var() == Some(dest)
                    && op.is_commutative()
                    && last_use
                    && b.as_var() != Some(dest)
                {
                    fused = Some((op, next_dest, b, src0));
                }
            }
            if let Some((op, fused_dest, src_a, src_b)) = fused {
                self.delete_inst(next_idx);
                return self.lower_arithmetic(fused_dest, op, src_a, src_b);
            }
        }

        self.lower_assign(Some(dest), src0)
    }

    pub(crate) fn lower_store(
        &mut self,
        value: Operand,
        addr: Operand,
    ) -> Result<(), CodegenError> {
        let value_ty = self.func.operand_ty(&value);
        let mem = self.form_memory_operand(addr, value_ty);
        let ty = mem.ty;

        if ty == Type::I64 {
            let value = self.legalize_default(value);
            let value_hi = self.hi_operand(value);
            let value_lo = self.lo_operand(value);
            let value_hi = self.legalize(value_hi, LegalMask::REG_IMM, true, None);
            let value_lo = self.legalize(value_lo, LegalMask::REG_IMM, true, None);
            let addr_hi = self.hi_operand(Operand::Mem(mem));
            let addr_lo = self.lo_operand(Operand::Mem(mem));
            self.store(value_hi, addr_hi);
            self.store(value_lo, addr_lo);
        } else if ty.is_vector() {
            let value = self.legalize_to_var(value, false, None);
            self.push(MInst::Storep { value, addr: Operand::Mem(mem) });
        } else {
            let value = self.legalize(value, LegalMask::REG_IMM, true, None);
            self.store(value, Operand::Mem(mem));
        }
        Ok(())
    }

    pub(crate) fn lower_alloca(
        &mut self,
        dest: Option<VarId>,
        size: Operand,
        align: u32,
    ) -> Result<(), CodegenError> {
        let dest = dest.expect("alloca has a destination");
        self.is_ebp_based_frame = true;
        // Conservatively require the stack to be aligned: the adjustments
        // below assume an aligned stack on entry and preserve it after.
        self.needs_stack_alignment = true;

        const STACK_ALIGNMENT: u32 = 16;
        let esp = self.get_phys_reg(Reg::Esp);
        let total_size = self.legalize_default(size);
        // For the default align=0, use the real value 1 to avoid the
        // bit-manipulation problems below.
        let alignment_param = align.max(1);
        debug_assert!(alignment_param.is_power_of_two());
        let alignment = alignment_param.max(STACK_ALIGNMENT);
        if alignment > STACK_ALIGNMENT {
            self.and(esp, Operand::const_i32(-(alignment as i32)));
        }
        if let Some(constant_size) = total_size.as_const_int() {
            let value = apply_alignment(constant_size as u32, alignment);
            self.sub(esp, Operand::const_i32(value as i32));
        } else {
            // Non-constant sizes are rounded up to the next multiple of
            // the alignment at runtime.
            let t = self.make_reg(Type::I32, None);
            self.mov(&mut Some(t), total_size);
            self.add(t, Operand::const_i32(alignment as i32 - 1));
            self.and(t, Operand::const_i32(-(alignment as i32)));
            self.sub(esp, Operand::Var(t));
        }
        self.mov(&mut Some(dest), Operand::Var(esp));
        Ok(())
    }

    /// Fold address expressions of loads and stores into memory operands
    /// before lowering.
    pub fn do_address_opt(&mut self) {
        let defs = collect_definitions(self.func);
        let mut rewrites = Vec::new();
        for (bi, block) in self.func.blocks.iter().enumerate() {
            for (ii, inst) in block.insts.iter().enumerate() {
                if inst.deleted {
                    continue;
                }
                let (addr, ty) = match &inst.kind {
                    InstKind::Load { addr } => match inst.dest {
                        Some(dest) => (*addr, self.func.var(dest).ty),
                        None => continue,
                    },
                    InstKind::Store { value, addr } => (*addr, self.func.operand_ty(value)),
                    _ => continue,
                };
                let Some(addr_var) = addr.as_var() else {
                    continue;
                };
                let mut base = Some(addr_var);
                let mut index = None;
                let mut shift: u8 = 0;
                let mut offset: i32 = 0;
                compute_address_opt(self.func, &defs, &mut base, &mut index, &mut shift, &mut offset);
                if let Some(base) = base {
                    if base != addr_var {
                        let mem = MemOperand::new(
                            ty,
                            Some(base),
                            Some(MemOffset::Imm(offset)),
                            index,
                            shift,
                            SegmentReg::Default,
                        );
                        rewrites.push((bi, ii, mem));
                    }
                }
            }
        }
        for (bi, ii, mem) in rewrites {
            let inst = &mut self.func.blocks[bi].insts[ii];
            match &mut inst.kind {
                InstKind::Load { addr } => *addr = Operand::Mem(mem),
                InstKind::Store { addr, .. } => *addr = Operand::Mem(mem),
                _ => {}
            }
        }
    }
}

/// Per-variable single definition, or `None` for multiple definitions.
fn collect_definitions(func: &Function) -> Vec<Option<(usize, usize)>> {
    let mut defs: Vec<Option<(usize, usize)>> = vec![None; func.variables.len()];
    let mut multi: Vec<bool> = vec![false; func.variables.len()];
    for (bi, block) in func.blocks.iter().enumerate() {
        for (ii, inst) in block.insts.iter().enumerate() {
            if inst.deleted {
                continue;
            }
            if let Some(dest) = inst.dest {
                if defs[dest.index()].is_some() {
                    multi[dest.index()] = true;
                }
                defs[dest.index()] = Some((bi, ii));
            }
        }
    }
    for (d, m) in defs.iter_mut().zip(multi) {
        if m {
            *d = None;
        }
    }
    defs
}

fn definition<'f>(
    func: &'f Function,
    defs: &[Option<(usize, usize)>],
    var: VarId,
) -> Option<&'f boreal_ir::Inst> {
    let (bi, ii) = defs[var.index()]?;
    Some(&func.blocks[bi].insts[ii])
}

fn log2_scale(mult: i64) -> u8 {
    match mult {
        1 => 0,
        2 => 1,
        4 => 2,
        8 => 3,
        _ => 4,
    }
}

/// Walk the definitions feeding `base`/`index`, folding copy chains into
/// the base, constant add/sub into the offset, and power-of-two multiplies
/// into the index scale. Scale is capped at 3 log units; offsets accumulate
/// as signed 32-bit. The walk stops at any non-foldable definition.
fn compute_address_opt(
    func: &Function,
    defs: &[Option<(usize, usize)>],
    base: &mut Option<VarId>,
    index: &mut Option<VarId>,
    shift: &mut u8,
    offset: &mut i32,
) {
    let Some(mut cur_base) = *base else {
        return;
    };
    // If the base is live across multiple blocks, don't go further:
    // folding would hoist computation into a single-block operand.
    if func.var(cur_base).multi_block {
        return;
    }

    loop {
        // Base is Base=Var ==> set Base=Var
        let base_inst = definition(func, defs, cur_base);
        if let Some(inst) = base_inst {
            if let InstKind::Assign { src } = &inst.kind {
                if let Some(src_var) = src.as_var() {
                    cur_base = src_var;
                    *base = Some(cur_base);
                    log::trace!("addr-opt: base through assign, base={cur_base:?}");
                    continue;
                }
            }

            // Index==None && Base is Base=Var1+Var2 ==>
            //   set Base=Var1, Index=Var2, Shift=0
            if index.is_none() {
                if let InstKind::Arith { op: ArithOp::Add, a, b } = &inst.kind {
                    if let (Some(var_a), Some(var_b)) = (a.as_var(), b.as_var()) {
                        cur_base = var_a;
                        *base = Some(cur_base);
                        *index = Some(var_b);
                        *shift = 0;
                        log::trace!("addr-opt: base split, base={cur_base:?} index={var_b:?}");
                        continue;
                    }
                }
            }
        }

        // Index is Index=Var*Const && log2(Const)+Shift<=3 ==>
        //   Index=Var, Shift+=log2(Const)
        if let Some(index_var) = *index {
            if let Some(inst) = definition(func, defs, index_var) {
                if let InstKind::Arith { op: ArithOp::Mul, a, b } = &inst.kind {
                    if let (Some(var_a), Some(mult)) = (a.as_var(), b.as_const_int()) {
                        if func.operand_ty(b) == Type::I32 {
                            let log_mult = log2_scale(mult);
                            if *shift + log_mult <= 3 {
                                *index = Some(var_a);
                                *shift += log_mult;
                                log::trace!(
                                    "addr-opt: index scaled, index={var_a:?} shift={shift}"
                                );
                                continue;
                            }
                        }
                    }
                }
            }
        }

        // Base is Base=Var+Const || Base=Const+Var ==> Base=Var, Offset+=Const
        // Base is Base=Var-Const ==> Base=Var, Offset-=Const
        if let Some(inst) = base_inst {
            if let InstKind::Arith { op: op @ (ArithOp::Add | ArithOp::Sub), a, b } = &inst.kind {
                let is_add = *op == ArithOp::Add;
                let (var, constant) = if let Some(var_a) = a.as_var() {
                    (Some(var_a), b.as_const_int())
                } else if is_add {
                    (b.as_var(), a.as_const_int())
                } else {
                    (None, None)
                };
                if let (Some(var), Some(constant)) = (var, constant) {
                    cur_base = var;
                    *base = Some(cur_base);
                    let delta = constant as i32;
                    *offset = if is_add {
                        offset.wrapping_add(delta)
                    } else {
                        offset.wrapping_sub(delta)
                    };
                    log::trace!("addr-opt: offset folded, base={cur_base:?} offset={offset}");
                    continue;
                }
            }
        }

        break;
    }
}
