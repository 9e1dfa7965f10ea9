//! Tests for register definitions, condition tables, lowering sequences
//! and the frame builder.

use boreal_ir::{
    ArithOp, BlockId, CodegenError, FCond, Function, GlobalContext, ICond, Inst, InstKind,
    InstructionSet, IntrinsicOp, MemOffset, MemOperand, OptLevel, Operand, Options, SegmentReg,
    Type, VarId, MEMORY_ORDER_SEQ_CST,
};
use smallvec::smallvec;

use crate::cond::{BrCond, TABLE_FCMP, TABLE_ICMP32};
use crate::inst::MInst;
use crate::lowering::TargetX8632;
use crate::reg::{register_set, registers_for_type, Reg, RegSetMask};

#[test]
fn reg_names_by_type() {
    assert_eq!(Reg::Eax.name_for_type(Type::I8), "al");
    assert_eq!(Reg::Ecx.name_for_type(Type::I8), "cl");
    assert_eq!(Reg::Eax.name_for_type(Type::I16), "ax");
    assert_eq!(Reg::Edi.name_for_type(Type::I32), "edi");
    assert_eq!(Reg::Ah.name_for_type(Type::I8), "ah");
    assert_eq!(Reg::Xmm3.name_for_type(Type::V4F32), "xmm3");
}

#[test]
fn caller_and_callee_save_sets() {
    let scratch = register_set(RegSetMask::CALLER_SAVE, RegSetMask::NONE);
    assert!(scratch.contains(Reg::Eax));
    assert!(scratch.contains(Reg::Ecx));
    assert!(scratch.contains(Reg::Edx));
    assert!(scratch.contains(Reg::Xmm0));
    assert!(scratch.contains(Reg::Xmm7));
    assert!(!scratch.contains(Reg::Ebx));
    assert!(!scratch.contains(Reg::Esp));

    let preserved = register_set(RegSetMask::CALLEE_SAVE, RegSetMask::NONE);
    let expected: Vec<Reg> = vec![Reg::Ebx, Reg::Ebp, Reg::Esi, Reg::Edi];
    assert_eq!(preserved.iter().collect::<Vec<_>>(), expected);
}

#[test]
fn type_register_classes() {
    let i8_regs = registers_for_type(Type::I8);
    assert!(i8_regs.contains(Reg::Ah));
    assert!(i8_regs.contains(Reg::Eax));
    assert!(!i8_regs.contains(Reg::Esi));
    let int_regs = registers_for_type(Type::I32);
    assert!(int_regs.contains(Reg::Esi));
    assert!(!int_regs.contains(Reg::Ah));
    assert!(!int_regs.contains(Reg::Esp));
    let fp_regs = registers_for_type(Type::F64);
    assert!(fp_regs.contains(Reg::Xmm5));
    assert!(!fp_regs.contains(Reg::Eax));
}

#[test]
fn icmp_table_conditions() {
    assert_eq!(TABLE_ICMP32[ICond::Eq as usize], BrCond::E);
    assert_eq!(TABLE_ICMP32[ICond::Slt as usize], BrCond::L);
    assert_eq!(TABLE_ICMP32[ICond::Ult as usize], BrCond::B);
    assert_eq!(TABLE_ICMP32[ICond::Uge as usize], BrCond::Ae);
}

#[test]
fn fcmp_table_shape() {
    // Oeq needs two branches (ne and p) with a 0 default.
    let oeq = &TABLE_FCMP[FCond::Oeq as usize];
    assert_eq!(oeq.default, 0);
    assert_eq!(oeq.c1, Some(BrCond::Ne));
    assert_eq!(oeq.c2, Some(BrCond::P));
    // Olt swaps scalar operands and branches on "a".
    let olt = &TABLE_FCMP[FCond::Olt as usize];
    assert!(olt.swap_scalar);
    assert_eq!(olt.c1, Some(BrCond::A));
    // One and Ueq have no single cmpps predicate.
    assert!(TABLE_FCMP[FCond::One as usize].predicate.is_none());
    assert!(TABLE_FCMP[FCond::Ueq as usize].predicate.is_none());
    // True and False materialize constants without comparing.
    assert!(TABLE_FCMP[FCond::True as usize].c1.is_none());
    assert!(TABLE_FCMP[FCond::False as usize].c1.is_none());
}

// --- Lowering test scaffolding ---

fn make_context(opt_level: OptLevel, instruction_set: InstructionSet) -> GlobalContext {
    let opts = Options { opt_level, instruction_set, ..Options::default() };
    GlobalContext::new(opts)
}

fn make_function(ctx: &mut GlobalContext, name: &str, ret_ty: Type) -> Function {
    let sym = ctx.intern(name);
    let mut func = Function::new(sym, ret_ty);
    func.make_block("entry");
    func
}

fn entry(func: &Function) -> BlockId {
    let _ = func;
    BlockId(0)
}

/// All machine instructions of the lowered function, flattened.
fn lowered(target: &TargetX8632) -> Vec<MInst> {
    target.lowered_blocks().iter().flat_map(|mb| mb.insts.iter().cloned()).collect()
}

fn count_matching(insts: &[MInst], pred: impl Fn(&MInst) -> bool) -> usize {
    insts.iter().filter(|i| pred(i)).count()
}

fn reg_of(func: &Function, var: VarId) -> Option<u8> {
    func.var(var).reg_num
}

// --- Arithmetic lowering ---

#[test]
fn i64_add_uses_adc_on_high_half() {
    let mut ctx = make_context(OptLevel::O2, InstructionSet::Sse2);
    let mut func = make_function(&mut ctx, "add64", Type::I64);
    let a = func.make_arg(Type::I64, "a".into());
    let b = func.make_arg(Type::I64, "b".into());
    let r = func.make_variable(Type::I64, Some(entry(&func)));
    let bb = entry(&func);
    func.push_inst(
        bb,
        Inst::new(
            InstKind::Arith { op: ArithOp::Add, a: Operand::Var(a), b: Operand::Var(b) },
            Some(r),
        ),
    );
    func.push_inst(bb, Inst::new(InstKind::Ret { value: Some(Operand::Var(r)) }, None));

    let mut target = TargetX8632::new(&mut func, &mut ctx);
    target.gen_code().expect("lowering should succeed");
    let insts = lowered(&target);

    let add_pos = insts.iter().position(|i| matches!(i, MInst::Add { .. }));
    let adc_pos = insts.iter().position(|i| matches!(i, MInst::Adc { .. }));
    assert!(add_pos.is_some(), "low half should use add");
    assert!(adc_pos.is_some(), "high half should use adc");
    assert!(add_pos < adc_pos, "carry flows from low to high");
    // No emitted instruction names the i64 variable directly; only its
    // two i32 halves appear.
    for inst in &insts {
        inst.for_each_var(&mut |v, _| {
            assert_ne!(v, r, "i64 variable must be decomposed into halves");
        });
    }
}

#[test]
fn i64_shift_builds_shld_macro() {
    let mut ctx = make_context(OptLevel::O2, InstructionSet::Sse2);
    let mut func = make_function(&mut ctx, "shl64", Type::I64);
    let a = func.make_arg(Type::I64, "a".into());
    let b = func.make_arg(Type::I64, "b".into());
    let r = func.make_variable(Type::I64, Some(entry(&func)));
    let bb = entry(&func);
    func.push_inst(
        bb,
        Inst::new(
            InstKind::Arith { op: ArithOp::Shl, a: Operand::Var(a), b: Operand::Var(b) },
            Some(r),
        ),
    );
    func.push_inst(bb, Inst::new(InstKind::Ret { value: Some(Operand::Var(r)) }, None));

    let mut target = TargetX8632::new(&mut func, &mut ctx);
    target.gen_code().expect("lowering should succeed");
    let insts = lowered(&target);

    assert_eq!(count_matching(&insts, |i| matches!(i, MInst::Shld { .. })), 1);
    assert_eq!(count_matching(&insts, |i| matches!(i, MInst::Label { .. })), 1);
    // The 0x20 bit test selects the shift >= 32 case.
    assert!(insts.iter().any(|i| matches!(
        i,
        MInst::Test { b: Operand::ConstInt { value: 0x20, .. }, .. }
    )));
    // The shift count is pinned to ecx.
    let shld_amount_in_ecx = insts.iter().any(|i| match i {
        MInst::Shld { amount: Operand::Var(v), .. } => {
            reg_of(&func, *v) == Some(Reg::Ecx.num())
        }
        _ => false,
    });
    assert!(shld_amount_in_ecx, "i64 shift count must be in ecx");
}

#[test]
fn i64_divide_calls_runtime_helper() {
    let mut ctx = make_context(OptLevel::O2, InstructionSet::Sse2);
    let mut func = make_function(&mut ctx, "div64", Type::I64);
    let a = func.make_arg(Type::I64, "a".into());
    let b = func.make_arg(Type::I64, "b".into());
    let r = func.make_variable(Type::I64, Some(entry(&func)));
    let bb = entry(&func);
    func.push_inst(
        bb,
        Inst::new(
            InstKind::Arith { op: ArithOp::Sdiv, a: Operand::Var(a), b: Operand::Var(b) },
            Some(r),
        ),
    );
    func.push_inst(bb, Inst::new(InstKind::Ret { value: Some(Operand::Var(r)) }, None));

    let mut target = TargetX8632::new(&mut func, &mut ctx);
    target.gen_code().expect("lowering should succeed");
    let insts = lowered(&target);

    let helper_called = insts.iter().any(|i| match i {
        MInst::Call { target: Operand::ConstReloc { name, .. }, .. } => {
            ctx.resolve(*name) == "__divdi3"
        }
        _ => false,
    });
    assert!(helper_called, "sdiv i64 delegates to __divdi3");
}

#[test]
fn scalar_shift_count_goes_through_ecx() {
    let mut ctx = make_context(OptLevel::O2, InstructionSet::Sse2);
    let mut func = make_function(&mut ctx, "shl32", Type::I32);
    let a = func.make_arg(Type::I32, "a".into());
    let b = func.make_arg(Type::I32, "b".into());
    let r = func.make_variable(Type::I32, Some(entry(&func)));
    let bb = entry(&func);
    func.push_inst(
        bb,
        Inst::new(
            InstKind::Arith { op: ArithOp::Shl, a: Operand::Var(a), b: Operand::Var(b) },
            Some(r),
        ),
    );
    func.push_inst(bb, Inst::new(InstKind::Ret { value: Some(Operand::Var(r)) }, None));

    let mut target = TargetX8632::new(&mut func, &mut ctx);
    target.gen_code().expect("lowering should succeed");
    let insts = lowered(&target);

    let shl_in_cl = insts.iter().any(|i| match i {
        MInst::Shl { amount: Operand::Var(v), .. } => reg_of(&func, *v) == Some(Reg::Ecx.num()),
        _ => false,
    });
    assert!(shl_in_cl, "non-constant shift count must be legalized into ecx");
}

#[test]
fn scalar_shift_by_constant_stays_immediate() {
    let mut ctx = make_context(OptLevel::O2, InstructionSet::Sse2);
    let mut func = make_function(&mut ctx, "shl32c", Type::I32);
    let a = func.make_arg(Type::I32, "a".into());
    let r = func.make_variable(Type::I32, Some(entry(&func)));
    let bb = entry(&func);
    func.push_inst(
        bb,
        Inst::new(
            InstKind::Arith {
                op: ArithOp::Shl,
                a: Operand::Var(a),
                b: Operand::const_i32(5),
            },
            Some(r),
        ),
    );
    func.push_inst(bb, Inst::new(InstKind::Ret { value: Some(Operand::Var(r)) }, None));

    let mut target = TargetX8632::new(&mut func, &mut ctx);
    target.gen_code().expect("lowering should succeed");
    let insts = lowered(&target);
    assert!(insts.iter().any(|i| matches!(
        i,
        MInst::Shl { amount: Operand::ConstInt { value: 5, .. }, .. }
    )));
}

#[test]
fn unsigned_divide_zeroes_edx_first() {
    let mut ctx = make_context(OptLevel::O2, InstructionSet::Sse2);
    let mut func = make_function(&mut ctx, "udiv32", Type::I32);
    let a = func.make_arg(Type::I32, "a".into());
    let b = func.make_arg(Type::I32, "b".into());
    let r = func.make_variable(Type::I32, Some(entry(&func)));
    let bb = entry(&func);
    func.push_inst(
        bb,
        Inst::new(
            InstKind::Arith { op: ArithOp::Udiv, a: Operand::Var(a), b: Operand::Var(b) },
            Some(r),
        ),
    );
    func.push_inst(bb, Inst::new(InstKind::Ret { value: Some(Operand::Var(r)) }, None));

    let mut target = TargetX8632::new(&mut func, &mut ctx);
    target.gen_code().expect("lowering should succeed");
    let insts = lowered(&target);

    let div_pos = insts
        .iter()
        .position(|i| matches!(i, MInst::Div { .. }))
        .expect("udiv lowers to div");
    // The instruction immediately before div zeroes the edx temporary.
    let zero_edx = match &insts[div_pos - 1] {
        MInst::Mov { dst, src: Operand::ConstInt { value: 0, .. } } => {
            reg_of(&func, *dst) == Some(Reg::Edx.num())
        }
        _ => false,
    };
    assert!(zero_edx, "div must be preceded by a zero-mov into edx");
}

#[test]
fn signed_divide_sign_extends_with_cdq() {
    let mut ctx = make_context(OptLevel::O2, InstructionSet::Sse2);
    let mut func = make_function(&mut ctx, "sdiv32", Type::I32);
    let a = func.make_arg(Type::I32, "a".into());
    let b = func.make_arg(Type::I32, "b".into());
    let r = func.make_variable(Type::I32, Some(entry(&func)));
    let bb = entry(&func);
    func.push_inst(
        bb,
        Inst::new(
            InstKind::Arith { op: ArithOp::Sdiv, a: Operand::Var(a), b: Operand::Var(b) },
            Some(r),
        ),
    );
    func.push_inst(bb, Inst::new(InstKind::Ret { value: Some(Operand::Var(r)) }, None));

    let mut target = TargetX8632::new(&mut func, &mut ctx);
    target.gen_code().expect("lowering should succeed");
    let insts = lowered(&target);

    let idiv_pos = insts
        .iter()
        .position(|i| matches!(i, MInst::Idiv { .. }))
        .expect("sdiv lowers to idiv");
    assert!(
        matches!(insts[idiv_pos - 1], MInst::Cbwdq { .. }),
        "idiv must be preceded by sign extension into edx"
    );
}

#[test]
fn i8_mul_pins_eax() {
    let mut ctx = make_context(OptLevel::O2, InstructionSet::Sse2);
    let mut func = make_function(&mut ctx, "mul8", Type::I8);
    let bb = entry(&func);
    let a = func.make_variable(Type::I8, Some(bb));
    let b = func.make_variable(Type::I8, Some(bb));
    let r = func.make_variable(Type::I8, Some(bb));
    func.push_inst(
        bb,
        Inst::new(
            InstKind::Arith { op: ArithOp::Mul, a: Operand::Var(a), b: Operand::Var(b) },
            Some(r),
        ),
    );
    func.push_inst(bb, Inst::new(InstKind::Ret { value: None }, None));

    let mut target = TargetX8632::new(&mut func, &mut ctx);
    target.gen_code().expect("lowering should succeed");
    let insts = lowered(&target);

    let imul_dst_in_eax = insts.iter().any(|i| match i {
        MInst::Imul { dst, .. } => reg_of(&func, *dst) == Some(Reg::Eax.num()),
        _ => false,
    });
    assert!(imul_dst_in_eax, "8-bit imul operand must be pinned to eax");
}

#[test]
fn v4i32_mul_without_sse41_expands() {
    let mut ctx = make_context(OptLevel::O2, InstructionSet::Sse2);
    let mut func = make_function(&mut ctx, "mulv", Type::V4I32);
    let a = func.make_arg(Type::V4I32, "a".into());
    let b = func.make_arg(Type::V4I32, "b".into());
    let r = func.make_variable(Type::V4I32, Some(entry(&func)));
    let bb = entry(&func);
    func.push_inst(
        bb,
        Inst::new(
            InstKind::Arith { op: ArithOp::Mul, a: Operand::Var(a), b: Operand::Var(b) },
            Some(r),
        ),
    );
    func.push_inst(bb, Inst::new(InstKind::Ret { value: Some(Operand::Var(r)) }, None));

    let mut target = TargetX8632::new(&mut func, &mut ctx);
    target.gen_code().expect("lowering should succeed");
    let insts = lowered(&target);

    // movaps, pshufd 0x31, pshufd 0x31, pmuludq, pmuludq,
    // shufps 0x88, pshufd 0xd8, in that order.
    let mut order = Vec::new();
    for inst in &insts {
        match inst {
            MInst::Pshufd { mask, .. } => order.push(format!("pshufd:{mask:#x}")),
            MInst::Pmuludq { .. } => order.push("pmuludq".to_string()),
            MInst::Shufps { mask, .. } => order.push(format!("shufps:{mask:#x}")),
            _ => {}
        }
    }
    assert_eq!(
        order,
        vec![
            "pshufd:0x31",
            "pshufd:0x31",
            "pmuludq",
            "pmuludq",
            "shufps:0x88",
            "pshufd:0xd8"
        ]
    );
}

#[test]
fn v4i32_mul_with_sse41_uses_pmulld() {
    let mut ctx = make_context(OptLevel::O2, InstructionSet::Sse41);
    let mut func = make_function(&mut ctx, "mulv41", Type::V4I32);
    let a = func.make_arg(Type::V4I32, "a".into());
    let b = func.make_arg(Type::V4I32, "b".into());
    let r = func.make_variable(Type::V4I32, Some(entry(&func)));
    let bb = entry(&func);
    func.push_inst(
        bb,
        Inst::new(
            InstKind::Arith { op: ArithOp::Mul, a: Operand::Var(a), b: Operand::Var(b) },
            Some(r),
        ),
    );
    func.push_inst(bb, Inst::new(InstKind::Ret { value: Some(Operand::Var(r)) }, None));

    let mut target = TargetX8632::new(&mut func, &mut ctx);
    target.gen_code().expect("lowering should succeed");
    let insts = lowered(&target);
    assert_eq!(count_matching(&insts, |i| matches!(i, MInst::Pmull { .. })), 1);
    assert_eq!(count_matching(&insts, |i| matches!(i, MInst::Pmuludq { .. })), 0);
}

#[test]
fn split64_is_idempotent_with_stable_identity() {
    let mut ctx = make_context(OptLevel::O2, InstructionSet::Sse2);
    let mut func = make_function(&mut ctx, "split", Type::Void);
    let bb = entry(&func);
    let x = func.make_variable(Type::I64, Some(bb));
    func.push_inst(bb, Inst::new(InstKind::Ret { value: None }, None));

    let mut target = TargetX8632::new(&mut func, &mut ctx);
    target.split64(x);
    let lo1 = target.func.var(x).lo;
    let hi1 = target.func.var(x).hi;
    target.split64(x);
    assert_eq!(target.func.var(x).lo, lo1);
    assert_eq!(target.func.var(x).hi, hi1);
    let lo = lo1.expect("lo half exists");
    let hi = hi1.expect("hi half exists");
    assert_eq!(target.func.var(lo).ty, Type::I32);
    assert_eq!(target.func.var(hi).ty, Type::I32);
    // Constants and memory references split arithmetically.
    let c = Operand::const_int(Type::I64, 0x1_0000_0007);
    assert_eq!(target.lo_operand(c).as_const_int(), Some(7));
    assert_eq!(target.hi_operand(c).as_const_int(), Some(1));
    let mem = Operand::Mem(MemOperand::base_offset(Type::I64, x, 8));
    let hi_mem = target.hi_operand(mem);
    let Operand::Mem(hi_mem) = hi_mem else {
        panic!("hi of memory stays memory");
    };
    assert_eq!(hi_mem.offset, Some(MemOffset::Imm(12)));
    assert_eq!(hi_mem.ty, Type::I32);
}

#[test]
fn i64_store_writes_high_half_first() {
    let mut ctx = make_context(OptLevel::O2, InstructionSet::Sse2);
    let mut func = make_function(&mut ctx, "store64", Type::Void);
    let bb = entry(&func);
    let ptr = func.make_arg(Type::I32, "ptr".into());
    let v = func.make_arg(Type::I64, "v".into());
    func.push_inst(
        bb,
        Inst::new(InstKind::Store { value: Operand::Var(v), addr: Operand::Var(ptr) }, None),
    );
    func.push_inst(bb, Inst::new(InstKind::Ret { value: None }, None));

    let mut target = TargetX8632::new(&mut func, &mut ctx);
    target.gen_code().expect("lowering should succeed");
    let insts = lowered(&target);

    let offsets: Vec<i32> = insts
        .iter()
        .filter_map(|i| match i {
            MInst::Store { addr: Operand::Mem(mem), .. } => match mem.offset {
                Some(MemOffset::Imm(off)) => Some(off),
                None => Some(0),
                _ => None,
            },
            _ => None,
        })
        .collect();
    assert_eq!(offsets, vec![4, 0], "the high half stores before the low half");
}

// --- Compare lowering ---

#[test]
fn icmp_followed_by_branch_fuses() {
    let mut ctx = make_context(OptLevel::O2, InstructionSet::Sse2);
    let mut func = make_function(&mut ctx, "cmpbr", Type::Void);
    let bb = entry(&func);
    let then_bb = func.make_block("then");
    let else_bb = func.make_block("else");
    let x = func.make_arg(Type::I32, "x".into());
    let p = func.make_variable(Type::I1, Some(bb));
    func.push_inst(
        bb,
        Inst::new(
            InstKind::Icmp { cond: ICond::Slt, a: Operand::Var(x), b: Operand::const_i32(7) },
            Some(p),
        ),
    );
    let mut br = Inst::new(
        InstKind::Br {
            cond: Some(Operand::Var(p)),
            true_target: then_bb,
            false_target: Some(else_bb),
        },
        None,
    );
    // The branch is the last (and only) use of the compare result.
    br.kills = smallvec![p];
    func.push_inst(bb, br);
    func.push_inst(then_bb, Inst::new(InstKind::Ret { value: None }, None));
    func.push_inst(else_bb, Inst::new(InstKind::Ret { value: None }, None));
    func.liveness_computed = true;

    let mut target = TargetX8632::new(&mut func, &mut ctx);
    target.gen_code().expect("lowering should succeed");
    let insts = lowered(&target);

    // Fusion elides the 0/1 materialisation of %p entirely.
    assert_eq!(count_matching(&insts, |i| matches!(i, MInst::Mov { .. })), 0);
    assert_eq!(count_matching(&insts, |i| matches!(i, MInst::Cmp { .. })), 1);
    let fused_br = insts.iter().any(|i| {
        matches!(
            i,
            MInst::Br { cond: Some(BrCond::L), target_false: Some(_), .. }
        )
    });
    assert!(fused_br, "fused branch must use the compare's condition");
}

#[test]
fn icmp_without_branch_materialises_bool() {
    let mut ctx = make_context(OptLevel::O2, InstructionSet::Sse2);
    let mut func = make_function(&mut ctx, "cmp", Type::I1);
    let bb = entry(&func);
    let x = func.make_arg(Type::I32, "x".into());
    let p = func.make_variable(Type::I1, Some(bb));
    func.push_inst(
        bb,
        Inst::new(
            InstKind::Icmp { cond: ICond::Ult, a: Operand::Var(x), b: Operand::const_i32(7) },
            Some(p),
        ),
    );
    func.push_inst(bb, Inst::new(InstKind::Ret { value: Some(Operand::Var(p)) }, None));

    let mut target = TargetX8632::new(&mut func, &mut ctx);
    target.gen_code().expect("lowering should succeed");
    let insts = lowered(&target);

    // mov p, 1; cmp; jb L; FakeUse(p); mov p, 0; L:
    let one_movs = count_matching(&insts, |i| {
        matches!(i, MInst::Mov { dst, src: Operand::ConstInt { value: 1, .. } } if *dst == p)
    });
    let zero_movs = count_matching(&insts, |i| {
        matches!(i, MInst::Mov { dst, src: Operand::ConstInt { value: 0, .. } } if *dst == p)
    });
    assert_eq!(one_movs, 1);
    assert_eq!(zero_movs, 1);
    assert!(insts.iter().any(|i| matches!(i, MInst::FakeUse { var } if *var == p)));
}

#[test]
fn i64_icmp_compares_both_halves() {
    let mut ctx = make_context(OptLevel::O2, InstructionSet::Sse2);
    let mut func = make_function(&mut ctx, "cmp64", Type::I1);
    let bb = entry(&func);
    let x = func.make_arg(Type::I64, "x".into());
    let y = func.make_arg(Type::I64, "y".into());
    let p = func.make_variable(Type::I1, Some(bb));
    func.push_inst(
        bb,
        Inst::new(
            InstKind::Icmp { cond: ICond::Slt, a: Operand::Var(x), b: Operand::Var(y) },
            Some(p),
        ),
    );
    func.push_inst(bb, Inst::new(InstKind::Ret { value: Some(Operand::Var(p)) }, None));

    let mut target = TargetX8632::new(&mut func, &mut ctx);
    target.gen_code().expect("lowering should succeed");
    let insts = lowered(&target);

    assert_eq!(count_matching(&insts, |i| matches!(i, MInst::Cmp { .. })), 2);
    // Three conditional branches over two labels.
    let cond_brs = count_matching(&insts, |i| matches!(i, MInst::Br { cond: Some(_), .. }));
    assert_eq!(cond_brs, 3);
    assert_eq!(count_matching(&insts, |i| matches!(i, MInst::Label { .. })), 2);
}

#[test]
fn vector_fcmp_one_combines_two_cmpps() {
    let mut ctx = make_context(OptLevel::O2, InstructionSet::Sse2);
    let mut func = make_function(&mut ctx, "fcmpone", Type::V4I1);
    let bb = entry(&func);
    let a = func.make_arg(Type::V4F32, "a".into());
    let b = func.make_arg(Type::V4F32, "b".into());
    let p = func.make_variable(Type::V4I1, Some(bb));
    func.push_inst(
        bb,
        Inst::new(
            InstKind::Fcmp { cond: FCond::One, a: Operand::Var(a), b: Operand::Var(b) },
            Some(p),
        ),
    );
    func.push_inst(bb, Inst::new(InstKind::Ret { value: Some(Operand::Var(p)) }, None));

    let mut target = TargetX8632::new(&mut func, &mut ctx);
    target.gen_code().expect("lowering should succeed");
    let insts = lowered(&target);

    use crate::cond::CmppsCond;
    let preds: Vec<CmppsCond> = insts
        .iter()
        .filter_map(|i| match i {
            MInst::Cmpps { pred, .. } => Some(*pred),
            _ => None,
        })
        .collect();
    assert_eq!(preds, vec![CmppsCond::Neq, CmppsCond::Ord]);
    assert_eq!(count_matching(&insts, |i| matches!(i, MInst::Pand { .. })), 1);
}

#[test]
fn scalar_fcmp_oeq_uses_two_branches() {
    let mut ctx = make_context(OptLevel::O2, InstructionSet::Sse2);
    let mut func = make_function(&mut ctx, "fcmpeq", Type::I1);
    let bb = entry(&func);
    let a = func.make_arg(Type::F32, "a".into());
    let b = func.make_arg(Type::F32, "b".into());
    let p = func.make_variable(Type::I1, Some(bb));
    func.push_inst(
        bb,
        Inst::new(
            InstKind::Fcmp { cond: FCond::Oeq, a: Operand::Var(a), b: Operand::Var(b) },
            Some(p),
        ),
    );
    func.push_inst(bb, Inst::new(InstKind::Ret { value: Some(Operand::Var(p)) }, None));

    let mut target = TargetX8632::new(&mut func, &mut ctx);
    target.gen_code().expect("lowering should succeed");
    let insts = lowered(&target);

    assert_eq!(count_matching(&insts, |i| matches!(i, MInst::Ucomiss { .. })), 1);
    let cond_brs: Vec<BrCond> = insts
        .iter()
        .filter_map(|i| match i {
            MInst::Br { cond: Some(cc), .. } => Some(*cc),
            _ => None,
        })
        .collect();
    assert_eq!(cond_brs, vec![BrCond::Ne, BrCond::P]);
}

// --- Casts ---

#[test]
fn sext_i32_to_i64_duplicates_sign() {
    let mut ctx = make_context(OptLevel::O2, InstructionSet::Sse2);
    let mut func = make_function(&mut ctx, "sext", Type::I64);
    let bb = entry(&func);
    let a = func.make_arg(Type::I32, "a".into());
    let r = func.make_variable(Type::I64, Some(bb));
    func.push_inst(
        bb,
        Inst::new(
            InstKind::Cast { op: boreal_ir::CastOp::Sext, src: Operand::Var(a) },
            Some(r),
        ),
    );
    func.push_inst(bb, Inst::new(InstKind::Ret { value: Some(Operand::Var(r)) }, None));

    let mut target = TargetX8632::new(&mut func, &mut ctx);
    target.gen_code().expect("lowering should succeed");
    let insts = lowered(&target);

    // The high half is the low half shifted right by 31.
    assert!(insts.iter().any(|i| matches!(
        i,
        MInst::Sar { amount: Operand::ConstInt { value: 31, .. }, .. }
    )));
}

#[test]
fn trunc_i64_takes_low_half() {
    let mut ctx = make_context(OptLevel::O2, InstructionSet::Sse2);
    let mut func = make_function(&mut ctx, "trunc", Type::I32);
    let bb = entry(&func);
    let a = func.make_arg(Type::I64, "a".into());
    let r = func.make_variable(Type::I32, Some(bb));
    func.push_inst(
        bb,
        Inst::new(
            InstKind::Cast { op: boreal_ir::CastOp::Trunc, src: Operand::Var(a) },
            Some(r),
        ),
    );
    func.push_inst(bb, Inst::new(InstKind::Ret { value: Some(Operand::Var(r)) }, None));

    let mut target = TargetX8632::new(&mut func, &mut ctx);
    target.gen_code().expect("lowering should succeed");
    let insts = lowered(&target);

    let lo = func.var(a).lo.expect("argument was split");
    let uses_lo = insts.iter().any(|i| {
        let mut found = false;
        i.for_each_var(&mut |v, _| found |= v == lo);
        found
    });
    assert!(uses_lo, "trunc reads only the low half");
    let uses_hi = insts.iter().any(|i| {
        let mut found = false;
        if let Some(hi) = func.var(a).hi {
            i.for_each_var(&mut |v, _| found |= v == hi);
        }
        found
    });
    assert!(!uses_hi, "trunc must not read the high half");
}

#[test]
fn fptosi_i64_calls_helper() {
    let mut ctx = make_context(OptLevel::O2, InstructionSet::Sse2);
    let mut func = make_function(&mut ctx, "f2i", Type::I64);
    let bb = entry(&func);
    let a = func.make_arg(Type::F64, "a".into());
    let r = func.make_variable(Type::I64, Some(bb));
    func.push_inst(
        bb,
        Inst::new(
            InstKind::Cast { op: boreal_ir::CastOp::Fptosi, src: Operand::Var(a) },
            Some(r),
        ),
    );
    func.push_inst(bb, Inst::new(InstKind::Ret { value: Some(Operand::Var(r)) }, None));

    let mut target = TargetX8632::new(&mut func, &mut ctx);
    target.gen_code().expect("lowering should succeed");
    let insts = lowered(&target);

    let helper_called = insts.iter().any(|i| match i {
        MInst::Call { target: Operand::ConstReloc { name, .. }, .. } => {
            ctx.resolve(*name) == "cvtdtosi64"
        }
        _ => false,
    });
    assert!(helper_called);
}

// --- Calls ---

#[test]
fn call_adjusts_stack_and_kills_scratch_regs() {
    let mut ctx = make_context(OptLevel::O2, InstructionSet::Sse2);
    let callee = ctx.intern("callee");
    let mut func = make_function(&mut ctx, "caller", Type::I32);
    let bb = entry(&func);
    let a = func.make_arg(Type::I32, "a".into());
    let r = func.make_variable(Type::I32, Some(bb));
    func.push_inst(
        bb,
        Inst::new(
            InstKind::Call {
                target: Operand::sym(callee),
                args: vec![Operand::Var(a)],
                has_side_effects: true,
            },
            Some(r),
        ),
    );
    func.push_inst(bb, Inst::new(InstKind::Ret { value: Some(Operand::Var(r)) }, None));

    let mut target = TargetX8632::new(&mut func, &mut ctx);
    target.gen_code().expect("lowering should succeed");
    let insts = lowered(&target);

    // One i32 argument rounds the parameter area up to 16 bytes.
    assert!(insts.iter().any(|i| matches!(i, MInst::AdjustStack { amount: 16 })));
    let call_pos = insts.iter().position(|i| matches!(i, MInst::Call { .. })).unwrap();
    let kill_pos = insts.iter().position(|i| matches!(i, MInst::FakeKill { .. })).unwrap();
    assert!(kill_pos > call_pos, "scratch registers die at the call");
    assert!(insts[kill_pos].is_fake(), "the kill is a pseudo instruction");
    if let MInst::FakeKill { killed } = &insts[kill_pos] {
        // eax, ecx, edx and the eight xmm registers.
        assert_eq!(killed.len(), 11);
    }
    // The return value lands in eax.
    let ret_in_eax = insts.iter().any(|i| match i {
        MInst::Call { dest: Some(d), .. } => reg_of(&func, *d) == Some(Reg::Eax.num()),
        _ => false,
    });
    assert!(ret_in_eax);
}

#[test]
fn i64_return_uses_edx_eax_pair() {
    let mut ctx = make_context(OptLevel::O2, InstructionSet::Sse2);
    let callee = ctx.intern("callee64");
    let mut func = make_function(&mut ctx, "caller64", Type::I64);
    let bb = entry(&func);
    let r = func.make_variable(Type::I64, Some(bb));
    func.push_inst(
        bb,
        Inst::new(
            InstKind::Call {
                target: Operand::sym(callee),
                args: vec![],
                has_side_effects: true,
            },
            Some(r),
        ),
    );
    func.push_inst(bb, Inst::new(InstKind::Ret { value: Some(Operand::Var(r)) }, None));

    let mut target = TargetX8632::new(&mut func, &mut ctx);
    target.gen_code().expect("lowering should succeed");
    let insts = lowered(&target);

    // The call writes eax; the edx half is fake-defined right after.
    let call_pos = insts.iter().position(|i| matches!(i, MInst::Call { .. })).unwrap();
    let fake_def_edx = match &insts[call_pos + 1] {
        MInst::FakeDef { dst, .. } => reg_of(&func, *dst) == Some(Reg::Edx.num()),
        _ => false,
    };
    assert!(fake_def_edx, "the edx half of an i64 return is fake-defined");
}

#[test]
fn vector_args_go_to_xmm_registers() {
    let mut ctx = make_context(OptLevel::O2, InstructionSet::Sse2);
    let mut func = make_function(&mut ctx, "vecargs", Type::Void);
    let _a = func.make_arg(Type::V4I32, "a".into());
    let _n = func.make_arg(Type::I32, "n".into());
    let _b = func.make_arg(Type::V4F32, "b".into());
    let bb = entry(&func);
    func.push_inst(bb, Inst::new(InstKind::Ret { value: None }, None));

    let mut target = TargetX8632::new(&mut func, &mut ctx);
    target.lower_arguments();
    // Vector args were rewritten to home registers xmm0 and xmm1,
    // regardless of their position in the argument list.
    assert_eq!(reg_of(&target.func, target.func.args[0]), Some(Reg::Xmm0.num()));
    assert_eq!(reg_of(&target.func, target.func.args[2]), Some(Reg::Xmm1.num()));
    assert_eq!(reg_of(&target.func, target.func.args[1]), None);
}

// --- Intrinsics and atomics ---

fn seq_cst() -> Operand {
    Operand::const_i32(MEMORY_ORDER_SEQ_CST as i32)
}

#[test]
fn atomic_cmpxchg_i64_fuses_with_branch() {
    let mut ctx = make_context(OptLevel::O2, InstructionSet::Sse2);
    let mut func = make_function(&mut ctx, "casbr", Type::Void);
    let bb = entry(&func);
    let ok_bb = func.make_block("ok");
    let retry_bb = func.make_block("retry");
    let ptr = func.make_arg(Type::I32, "ptr".into());
    let expected = func.make_arg(Type::I64, "expected".into());
    let desired = func.make_arg(Type::I64, "desired".into());
    let old = func.make_variable(Type::I64, Some(bb));
    let p = func.make_variable(Type::I1, Some(bb));
    func.push_inst(
        bb,
        Inst::new(
            InstKind::IntrinsicCall {
                op: IntrinsicOp::AtomicCmpxchg,
                args: vec![
                    Operand::Var(ptr),
                    Operand::Var(expected),
                    Operand::Var(desired),
                    seq_cst(),
                    seq_cst(),
                ],
                has_side_effects: true,
            },
            Some(old),
        ),
    );
    func.push_inst(
        bb,
        Inst::new(
            InstKind::Icmp {
                cond: ICond::Eq,
                a: Operand::Var(old),
                b: Operand::Var(expected),
            },
            Some(p),
        ),
    );
    let mut br = Inst::new(
        InstKind::Br {
            cond: Some(Operand::Var(p)),
            true_target: ok_bb,
            false_target: Some(retry_bb),
        },
        None,
    );
    br.kills = smallvec![p];
    func.push_inst(bb, br);
    func.push_inst(ok_bb, Inst::new(InstKind::Ret { value: None }, None));
    func.push_inst(retry_bb, Inst::new(InstKind::Ret { value: None }, None));
    func.liveness_computed = true;

    let mut target = TargetX8632::new(&mut func, &mut ctx);
    target.gen_code().expect("lowering should succeed");
    let insts = lowered(&target);

    assert_eq!(count_matching(&insts, |i| matches!(i, MInst::Cmpxchg8b { .. })), 1);
    // The icmp and branch were folded away: no compare, and the branch
    // tests equality directly.
    assert_eq!(count_matching(&insts, |i| matches!(i, MInst::Cmp { .. })), 0);
    assert!(insts.iter().any(|i| matches!(
        i,
        MInst::Br { cond: Some(BrCond::E), target_false: Some(_), .. }
    )));
}

#[test]
fn atomic_rmw_add_uses_xadd() {
    let mut ctx = make_context(OptLevel::O2, InstructionSet::Sse2);
    let mut func = make_function(&mut ctx, "rmwadd", Type::I32);
    let bb = entry(&func);
    let ptr = func.make_arg(Type::I32, "ptr".into());
    let v = func.make_arg(Type::I32, "v".into());
    let old = func.make_variable(Type::I32, Some(bb));
    func.push_inst(
        bb,
        Inst::new(
            InstKind::IntrinsicCall {
                op: IntrinsicOp::AtomicRmw,
                args: vec![
                    Operand::const_i32(1), // add
                    Operand::Var(ptr),
                    Operand::Var(v),
                    seq_cst(),
                ],
                has_side_effects: true,
            },
            Some(old),
        ),
    );
    func.push_inst(bb, Inst::new(InstKind::Ret { value: Some(Operand::Var(old)) }, None));

    let mut target = TargetX8632::new(&mut func, &mut ctx);
    target.gen_code().expect("lowering should succeed");
    let insts = lowered(&target);
    assert!(insts.iter().any(|i| matches!(i, MInst::Xadd { locked: true, .. })));
}

#[test]
fn atomic_rmw_and_expands_to_cmpxchg_loop() {
    let mut ctx = make_context(OptLevel::O2, InstructionSet::Sse2);
    let mut func = make_function(&mut ctx, "rmwand", Type::I32);
    let bb = entry(&func);
    let ptr = func.make_arg(Type::I32, "ptr".into());
    let v = func.make_arg(Type::I32, "v".into());
    let old = func.make_variable(Type::I32, Some(bb));
    func.push_inst(
        bb,
        Inst::new(
            InstKind::IntrinsicCall {
                op: IntrinsicOp::AtomicRmw,
                args: vec![
                    Operand::const_i32(4), // and
                    Operand::Var(ptr),
                    Operand::Var(v),
                    seq_cst(),
                ],
                has_side_effects: true,
            },
            Some(old),
        ),
    );
    func.push_inst(bb, Inst::new(InstKind::Ret { value: Some(Operand::Var(old)) }, None));

    let mut target = TargetX8632::new(&mut func, &mut ctx);
    target.gen_code().expect("lowering should succeed");
    let insts = lowered(&target);
    assert!(insts.iter().any(|i| matches!(i, MInst::Cmpxchg { locked: true, .. })));
    assert!(insts.iter().any(|i| matches!(i, MInst::Label { .. })));
    assert!(insts
        .iter()
        .any(|i| matches!(i, MInst::Br { cond: Some(BrCond::Ne), .. })));
}

#[test]
fn atomic_store_emits_fence() {
    let mut ctx = make_context(OptLevel::O2, InstructionSet::Sse2);
    let mut func = make_function(&mut ctx, "astore", Type::Void);
    let bb = entry(&func);
    let ptr = func.make_arg(Type::I32, "ptr".into());
    let v = func.make_arg(Type::I32, "v".into());
    func.push_inst(
        bb,
        Inst::new(
            InstKind::IntrinsicCall {
                op: IntrinsicOp::AtomicStore,
                args: vec![Operand::Var(v), Operand::Var(ptr), seq_cst()],
                has_side_effects: true,
            },
            None,
        ),
    );
    func.push_inst(bb, Inst::new(InstKind::Ret { value: None }, None));

    let mut target = TargetX8632::new(&mut func, &mut ctx);
    target.gen_code().expect("lowering should succeed");
    let insts = lowered(&target);
    let store_pos = insts.iter().position(|i| matches!(i, MInst::Store { .. })).unwrap();
    let fence_pos = insts.iter().position(|i| matches!(i, MInst::Mfence)).unwrap();
    assert!(fence_pos > store_pos);
}

#[test]
fn invalid_memory_order_is_an_error() {
    let mut ctx = make_context(OptLevel::O2, InstructionSet::Sse2);
    let mut func = make_function(&mut ctx, "badorder", Type::Void);
    let bb = entry(&func);
    let ptr = func.make_arg(Type::I32, "ptr".into());
    let v = func.make_arg(Type::I32, "v".into());
    func.push_inst(
        bb,
        Inst::new(
            InstKind::IntrinsicCall {
                op: IntrinsicOp::AtomicStore,
                // Relaxed ordering is not accepted.
                args: vec![Operand::Var(v), Operand::Var(ptr), Operand::const_i32(2)],
                has_side_effects: true,
            },
            None,
        ),
    );
    func.push_inst(bb, Inst::new(InstKind::Ret { value: None }, None));

    let mut target = TargetX8632::new(&mut func, &mut ctx);
    let err = target.gen_code().unwrap_err();
    assert_eq!(err, CodegenError::InvalidMemoryOrder("AtomicStore"));
    assert!(target.func.has_error());
}

#[test]
fn ctlz_uses_bsr_with_zero_fixup() {
    let mut ctx = make_context(OptLevel::O2, InstructionSet::Sse2);
    let mut func = make_function(&mut ctx, "ctlz", Type::I32);
    let bb = entry(&func);
    let v = func.make_arg(Type::I32, "v".into());
    let r = func.make_variable(Type::I32, Some(bb));
    func.push_inst(
        bb,
        Inst::new(
            InstKind::IntrinsicCall {
                op: IntrinsicOp::Ctlz,
                args: vec![Operand::Var(v)],
                has_side_effects: false,
            },
            Some(r),
        ),
    );
    func.push_inst(bb, Inst::new(InstKind::Ret { value: Some(Operand::Var(r)) }, None));

    let mut target = TargetX8632::new(&mut func, &mut ctx);
    target.gen_code().expect("lowering should succeed");
    let insts = lowered(&target);
    assert!(insts.iter().any(|i| matches!(i, MInst::Bsr { .. })));
    assert!(insts
        .iter()
        .any(|i| matches!(i, MInst::Cmov { cond: BrCond::Ne, .. })));
    // The xor by 31 converts bit position to leading-zero count.
    assert!(insts.iter().any(|i| matches!(
        i,
        MInst::Xor { src: Operand::ConstInt { value: 31, .. }, .. }
    )));
}

#[test]
fn bswap_i16_uses_rol() {
    let mut ctx = make_context(OptLevel::O2, InstructionSet::Sse2);
    let mut func = make_function(&mut ctx, "bswap16", Type::I16);
    let bb = entry(&func);
    let v = func.make_variable(Type::I16, Some(bb));
    let r = func.make_variable(Type::I16, Some(bb));
    func.push_inst(
        bb,
        Inst::new(
            InstKind::IntrinsicCall {
                op: IntrinsicOp::Bswap,
                args: vec![Operand::Var(v)],
                has_side_effects: false,
            },
            Some(r),
        ),
    );
    func.push_inst(bb, Inst::new(InstKind::Ret { value: None }, None));

    let mut target = TargetX8632::new(&mut func, &mut ctx);
    target.gen_code().expect("lowering should succeed");
    let insts = lowered(&target);
    assert!(insts.iter().any(|i| matches!(
        i,
        MInst::Rol { amount: Operand::ConstInt { value: 8, .. }, .. }
    )));
}

// --- Address-mode optimisation ---

#[test]
fn address_opt_folds_offset_and_scale() {
    let mut ctx = make_context(OptLevel::O2, InstructionSet::Sse2);
    let mut func = make_function(&mut ctx, "addr", Type::I32);
    let bb = entry(&func);
    let base = func.make_variable(Type::I32, Some(bb));
    let index = func.make_variable(Type::I32, Some(bb));
    let scaled = func.make_variable(Type::I32, Some(bb));
    let sum = func.make_variable(Type::I32, Some(bb));
    let biased = func.make_variable(Type::I32, Some(bb));
    let r = func.make_variable(Type::I32, Some(bb));
    // scaled = index * 4; sum = base + scaled; biased = sum + 12; r = load biased
    func.push_inst(
        bb,
        Inst::new(
            InstKind::Arith {
                op: ArithOp::Mul,
                a: Operand::Var(index),
                b: Operand::const_i32(4),
            },
            Some(scaled),
        ),
    );
    func.push_inst(
        bb,
        Inst::new(
            InstKind::Arith {
                op: ArithOp::Add,
                a: Operand::Var(base),
                b: Operand::Var(scaled),
            },
            Some(sum),
        ),
    );
    func.push_inst(
        bb,
        Inst::new(
            InstKind::Arith {
                op: ArithOp::Add,
                a: Operand::Var(sum),
                b: Operand::const_i32(12),
            },
            Some(biased),
        ),
    );
    func.push_inst(bb, Inst::new(InstKind::Load { addr: Operand::Var(biased) }, Some(r)));
    func.push_inst(bb, Inst::new(InstKind::Ret { value: Some(Operand::Var(r)) }, None));

    let mut target = TargetX8632::new(&mut func, &mut ctx);
    target.do_address_opt();

    let load = target.func.blocks[0]
        .insts
        .iter()
        .find(|i| matches!(i.kind, InstKind::Load { .. }))
        .expect("load survives");
    let InstKind::Load { addr: Operand::Mem(mem) } = &load.kind else {
        panic!("load address should have been folded into a memory operand");
    };
    assert_eq!(mem.base, Some(base));
    assert_eq!(mem.index, Some(index));
    assert_eq!(mem.shift, 2);
    assert_eq!(mem.offset, Some(MemOffset::Imm(12)));
}

#[test]
fn address_opt_stops_at_multiblock_base() {
    let mut ctx = make_context(OptLevel::O2, InstructionSet::Sse2);
    let mut func = make_function(&mut ctx, "addrmb", Type::I32);
    let bb = entry(&func);
    // The address is an argument: multi-block life, nothing to fold.
    let p = func.make_arg(Type::I32, "p".into());
    let r = func.make_variable(Type::I32, Some(bb));
    func.push_inst(bb, Inst::new(InstKind::Load { addr: Operand::Var(p) }, Some(r)));
    func.push_inst(bb, Inst::new(InstKind::Ret { value: Some(Operand::Var(r)) }, None));

    let mut target = TargetX8632::new(&mut func, &mut ctx);
    target.do_address_opt();
    let load = &target.func.blocks[0].insts[0];
    assert!(matches!(load.kind, InstKind::Load { addr: Operand::Var(v) } if v == p));
}

// --- Frame construction ---

#[test]
fn frame_with_single_i64_spill_aligns_esp() {
    let mut ctx = make_context(OptLevel::O2, InstructionSet::Sse2);
    let mut func = make_function(&mut ctx, "frame64", Type::Void);
    let bb = entry(&func);
    let spill = func.make_variable(Type::I64, Some(bb));
    func.push_inst(bb, Inst::new(InstKind::Ret { value: None }, None));

    let mut target = TargetX8632::new(&mut func, &mut ctx);
    target.gen_code().expect("lowering should succeed");
    target.needs_stack_alignment = true;
    target.gen_frame().expect("frame construction should succeed");

    let entry_insts = &target.lowered_blocks()[0].insts;
    let esp_sub = entry_insts.iter().find_map(|i| match i {
        MInst::Sub { src: Operand::ConstInt { value, .. }, .. } => Some(*value),
        _ => None,
    });
    let esp_sub = esp_sub.expect("prolog subtracts from esp");
    // Return address (4) plus the adjustment must satisfy the 16-byte
    // call-site contract.
    assert_eq!((4 + esp_sub) % 16, 0);
    // The i64 slot itself is 8 bytes; padding covers the rest.
    assert!(esp_sub >= 8);
    // The epilog gives the same amount back before ret.
    let add_back = entry_insts.iter().find_map(|i| match i {
        MInst::Add { src: Operand::ConstInt { value, .. }, .. } => Some(*value),
        _ => None,
    });
    assert_eq!(add_back, Some(esp_sub));
    // The spilled variable received a stack slot and no register.
    assert!(target.func.var(spill).stack_offset.is_some());
    assert!(!target.func.var(spill).has_reg());
}

#[test]
fn frame_pushes_and_pops_used_preserved_registers() {
    let mut ctx = make_context(OptLevel::O2, InstructionSet::Sse2);
    let mut func = make_function(&mut ctx, "saves", Type::Void);
    let bb = entry(&func);
    // A variable pre-colored to esi forces a push/pop pair.
    let v = func.make_variable(Type::I32, Some(bb));
    func.var_mut(v).set_reg_num(Reg::Esi.num());
    func.push_inst(bb, Inst::new(InstKind::Ret { value: None }, None));

    let mut target = TargetX8632::new(&mut func, &mut ctx);
    target.gen_code().expect("lowering should succeed");
    target.gen_frame().expect("frame construction should succeed");

    let entry_insts = &target.lowered_blocks()[0].insts;
    let push_pos = entry_insts.iter().position(|i| match i {
        MInst::Push { src } => reg_of(&target.func, *src) == Some(Reg::Esi.num()),
        _ => false,
    });
    let pop_pos = entry_insts.iter().position(|i| match i {
        MInst::Pop { dst } => reg_of(&target.func, *dst) == Some(Reg::Esi.num()),
        _ => false,
    });
    let ret_pos = entry_insts.iter().position(|i| matches!(i, MInst::Ret { .. }));
    assert!(push_pos.is_some() && pop_pos.is_some());
    assert!(push_pos < pop_pos);
    assert!(pop_pos < ret_pos, "the epilog sits before ret");
}

#[test]
fn i64_argument_halves_are_laid_out_lo_then_hi() {
    let mut ctx = make_context(OptLevel::O2, InstructionSet::Sse2);
    let mut func = make_function(&mut ctx, "args64", Type::I64);
    let a = func.make_arg(Type::I64, "a".into());
    let r = func.make_variable(Type::I64, Some(entry(&func)));
    let bb = entry(&func);
    func.push_inst(bb, Inst::new(InstKind::Assign { src: Operand::Var(a) }, Some(r)));
    func.push_inst(bb, Inst::new(InstKind::Ret { value: Some(Operand::Var(r)) }, None));

    let mut target = TargetX8632::new(&mut func, &mut ctx);
    target.gen_code().expect("lowering should succeed");
    target.gen_frame().expect("frame construction should succeed");

    let lo = target.func.var(a).lo.expect("argument was split");
    let hi = target.func.var(a).hi.expect("argument was split");
    let lo_off = target.func.var(lo).stack_offset.expect("lo half has a frame slot");
    let hi_off = target.func.var(hi).stack_offset.expect("hi half has a frame slot");
    assert_eq!(hi_off - lo_off, 4, "little-endian: lo is below hi");
}

// --- Om1 colouring ---

#[test]
fn om1_gives_every_temporary_a_register() {
    let mut ctx = make_context(OptLevel::Om1, InstructionSet::Sse2);
    let mut func = make_function(&mut ctx, "om1add", Type::I32);
    let a = func.make_arg(Type::I32, "a".into());
    let b = func.make_arg(Type::I32, "b".into());
    let r = func.make_variable(Type::I32, Some(entry(&func)));
    let bb = entry(&func);
    func.push_inst(
        bb,
        Inst::new(
            InstKind::Arith { op: ArithOp::Add, a: Operand::Var(a), b: Operand::Var(b) },
            Some(r),
        ),
    );
    func.push_inst(bb, Inst::new(InstKind::Ret { value: Some(Operand::Var(r)) }, None));

    let mut target = TargetX8632::new(&mut func, &mut ctx);
    target.translate().expect("Om1 pipeline should succeed");

    // Every variable either has a register or a stack slot, never neither.
    for (i, var) in target.func.variables.iter().enumerate() {
        assert!(
            var.reg_num.is_some() || var.stack_offset.is_some(),
            "variable {i} ({}) has neither register nor slot",
            var.name
        );
    }

    let mut text = String::new();
    target.emit(&mut text).expect("emission should succeed");
    assert!(text.contains("\t.globl\tom1add"));
    assert!(text.contains("\tadd\t"));
    assert!(text.contains("\tret\n"));
    // The return register is eax.
    assert!(text.contains("mov\teax"));
}

#[test]
fn om1_skips_compare_branch_fusion() {
    let mut ctx = make_context(OptLevel::Om1, InstructionSet::Sse2);
    let mut func = make_function(&mut ctx, "om1cmp", Type::Void);
    let bb = entry(&func);
    let then_bb = func.make_block("then");
    let else_bb = func.make_block("else");
    let x = func.make_arg(Type::I32, "x".into());
    let p = func.make_variable(Type::I1, Some(bb));
    func.push_inst(
        bb,
        Inst::new(
            InstKind::Icmp { cond: ICond::Slt, a: Operand::Var(x), b: Operand::const_i32(7) },
            Some(p),
        ),
    );
    // No liveness: kills stay empty and fusion must not trigger.
    func.push_inst(
        bb,
        Inst::new(
            InstKind::Br {
                cond: Some(Operand::Var(p)),
                true_target: then_bb,
                false_target: Some(else_bb),
            },
            None,
        ),
    );
    func.push_inst(then_bb, Inst::new(InstKind::Ret { value: None }, None));
    func.push_inst(else_bb, Inst::new(InstKind::Ret { value: None }, None));

    let mut target = TargetX8632::new(&mut func, &mut ctx);
    target.gen_code().expect("lowering should succeed");
    let insts = lowered(&target);
    // The boolean is materialised (mov 1 / mov 0) and re-tested.
    assert_eq!(count_matching(&insts, |i| matches!(i, MInst::Cmp { .. })), 2);
}

// --- Emission details ---

#[test]
fn emitted_memory_operands_show_scale_and_segment() {
    let mut ctx = make_context(OptLevel::Om1, InstructionSet::Sse2);
    let mut func = make_function(&mut ctx, "tls", Type::I32);
    let bb = entry(&func);
    ctx.opts.use_sandboxing = true;
    let r = func.make_variable(Type::I32, Some(bb));
    func.push_inst(
        bb,
        Inst::new(
            InstKind::IntrinsicCall {
                op: IntrinsicOp::ReadThreadPointer,
                args: vec![],
                has_side_effects: false,
            },
            Some(r),
        ),
    );
    func.push_inst(bb, Inst::new(InstKind::Ret { value: Some(Operand::Var(r)) }, None));

    let mut target = TargetX8632::new(&mut func, &mut ctx);
    target.translate().expect("Om1 pipeline should succeed");
    let mut text = String::new();
    target.emit(&mut text).expect("emission should succeed");
    assert!(text.contains("gs:[0]"), "sandboxed TLS read uses the gs segment:\n{text}");
}

#[test]
fn float_constants_pool_and_emit_labels() {
    let mut ctx = make_context(OptLevel::Om1, InstructionSet::Sse2);
    let pi = ctx.get_const_f32(3.25);
    let mut func = make_function(&mut ctx, "fconst", Type::F32);
    let bb = entry(&func);
    let r = func.make_variable(Type::F32, Some(bb));
    func.push_inst(
        bb,
        Inst::new(
            InstKind::Arith {
                op: ArithOp::Fadd,
                a: pi,
                b: pi,
            },
            Some(r),
        ),
    );
    func.push_inst(bb, Inst::new(InstKind::Ret { value: Some(Operand::Var(r)) }, None));

    let mut target = TargetX8632::new(&mut func, &mut ctx);
    target.translate().expect("Om1 pipeline should succeed");
    let mut text = String::new();
    target.emit(&mut text).expect("emission should succeed");
    assert!(text.contains("dword ptr [L$f32$0]"), "{text}");

    let mut pool = String::new();
    crate::emit::emit_constant_pools(&ctx, &mut pool).unwrap();
    assert!(pool.contains("L$f32$0:"));
    assert!(pool.contains(".rodata.cst4"));
}

#[test]
fn memory_operand_requires_base_or_offset() {
    // Constructing a well-formed operand exercises the shift bound.
    let mem = MemOperand::new(
        Type::I32,
        Some(VarId(0)),
        Some(MemOffset::Imm(8)),
        Some(VarId(1)),
        3,
        SegmentReg::Default,
    );
    assert_eq!(mem.shift, 3);
    assert_eq!(mem.offset, Some(MemOffset::Imm(8)));
}
