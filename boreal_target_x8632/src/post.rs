//! Post-lowering register colouring for the Om1 fast path.
//!
//! Runs over one just-lowered block and gives every infinite-weight
//! variable a register, recycling registers at the holder's last use. The
//! full register allocator never runs on this path.

use std::collections::HashMap;

use boreal_ir::{Function, RegWeight, VarId};

use crate::inst::{MInst, VarRole};
use crate::reg::{register_set, registers_for_type, Reg, RegSetMask};

pub(crate) fn post_lower(func: &mut Function, insts: &[MInst], has_frame_pointer: bool) {
    let mut exclude = RegSetMask::STACK_PTR;
    if has_frame_pointer {
        exclude |= RegSetMask::FRAME_PTR;
    }
    let mut white_list = register_set(RegSetMask::ALL, exclude);

    // First pass: black-list the registers of pre-colored variables, and
    // record the last use of every variable so its register can return to
    // the free list. FakeKill is skipped: it only kills the scratch
    // registers at call sites, and black-listing those for the whole block
    // would starve the colourer. This relies on the lowering never keeping
    // an infinite-weight variable live across a call.
    let mut last_uses: HashMap<VarId, usize> = HashMap::new();
    for (i, inst) in insts.iter().enumerate() {
        if matches!(inst, MInst::FakeKill { .. }) {
            continue;
        }
        inst.for_each_var(&mut |var, role| {
            if matches!(role, VarRole::Use | VarRole::UseDef) {
                last_uses.insert(var, i);
                if let Some(reg_num) = func.var(var).reg_num {
                    white_list.remove(Reg::from_num(reg_num));
                }
            }
        });
    }

    // Second pass: colour infinite-weight variables. The first pass
    // ignored destinations, on the assumption that a pre-colored dest
    // shows up as a source of some later instruction.
    let mut available = white_list;
    for (i, inst) in insts.iter().enumerate() {
        if matches!(inst, MInst::FakeKill { .. }) {
            continue;
        }
        let mut freed = crate::reg::RegSet::EMPTY;
        inst.for_each_var(&mut |var, _role| {
            {
                let v = func.var(var);
                if !v.has_reg() && v.weight == RegWeight::Inf {
                    let candidates = available.intersect(registers_for_type(v.ty));
                    let reg = match candidates.first() {
                        Some(reg) => reg,
                        None => unreachable!("colourer ran out of {} registers", v.ty),
                    };
                    func.var_mut(var).set_reg_num(reg.num());
                    available.remove(reg);
                }
            }
            if let Some(reg_num) = func.var(var).reg_num {
                let reg = Reg::from_num(reg_num);
                debug_assert!(!available.contains(reg));
                if last_uses.get(&var) == Some(&i) && white_list.contains(reg) {
                    freed.insert(reg);
                }
            }
        });
        available = available.union(freed);
    }
}
