//! Intel-syntax assembly text emission.
//!
//! The emitter is the only consumer of register and stack-offset
//! assignments: every variable prints as either its register name or a
//! `width ptr [frame_reg + offset]` reference. esp-relative offsets fold in
//! the outstanding pre-call stack adjustment.

use std::fmt::{self, Write};

use boreal_ir::{GlobalContext, Half, MemOffset, Operand, SegmentReg, Type, VarId};

use crate::cond::in_vector_element_type;
use crate::inst::{MInst, Target};
use crate::lowering::TargetX8632;
use crate::reg::Reg;

struct EmitState {
    /// Bytes subtracted from esp by pre-call `AdjustStack` instructions
    /// and not yet given back; added to esp-relative variable offsets.
    stack_adjustment: i32,
}

/// Operand width prefix for a type.
fn width_string(ty: Type) -> &'static str {
    match ty {
        Type::I1 | Type::I8 => "byte ptr",
        Type::I16 => "word ptr",
        Type::I32 | Type::F32 => "dword ptr",
        Type::I64 | Type::F64 => "qword ptr",
        _ => "xmmword ptr",
    }
}

/// Conversion-mnemonic fragment for a type (`cvtsi2ss` etc).
fn cvt_attr(ty: Type) -> &'static str {
    match ty {
        Type::I1 | Type::I8 | Type::I16 | Type::I32 => "si",
        Type::F32 => "ss",
        Type::F64 => "sd",
        Type::V4I32 => "dq",
        Type::V4F32 => "ps",
        _ => unreachable!("no conversion exists for this type"),
    }
}

/// `ss`/`sd` suffix for scalar fp instructions.
fn sdss_suffix(ty: Type) -> &'static str {
    if ty == Type::F64 {
        "sd"
    } else {
        "ss"
    }
}

/// Packed-instruction lane suffix (`paddb`/`paddw`/`paddd`).
fn pack_suffix(ty: Type) -> &'static str {
    match in_vector_element_type(ty) {
        Type::I8 => "b",
        Type::I16 => "w",
        _ => "d",
    }
}

impl TargetX8632<'_> {
    /// Emit the whole function as assembly text.
    pub fn emit(&self, w: &mut dyn Write) -> fmt::Result {
        let raw_name = self.ctx.resolve(self.func.name);
        let name = self.ctx.mangle_name(raw_name);
        writeln!(w, "\t.text")?;
        if self.func.internal {
            writeln!(w, "\t.local\t{name}")?;
        } else {
            writeln!(w, "\t.globl\t{name}")?;
        }
        writeln!(w, "\t.type\t{name},@function")?;
        writeln!(w, "{name}:")?;
        let mut st = EmitState { stack_adjustment: 0 };
        for (i, mb) in self.mblocks.iter().enumerate() {
            writeln!(w, "{}:", self.block_label(mb.block))?;
            let next_block = self.mblocks.get(i + 1).map(|m| m.block);
            for inst in &mb.insts {
                self.emit_inst(w, inst, &mut st, next_block)?;
            }
        }
        Ok(())
    }

    fn block_label(&self, block: boreal_ir::BlockId) -> String {
        let fn_name = self.ctx.resolve(self.func.name);
        format!(".L{fn_name}${}", self.func.blocks[block.index()].name)
    }

    fn local_label(&self, id: u32) -> String {
        let fn_name = self.ctx.resolve(self.func.name);
        format!(".L{fn_name}$l{id}")
    }

    fn target_label(&self, target: Target) -> String {
        match target {
            Target::Label(id) => self.local_label(id),
            Target::Block(block) => self.block_label(block),
        }
    }

    fn emit_var(&self, w: &mut dyn Write, var: VarId, st: &EmitState) -> fmt::Result {
        let v = self.func.var(var);
        if let Some(reg_num) = v.reg_num {
            return w.write_str(Reg::from_num(reg_num).name_for_type(v.ty));
        }
        debug_assert!(v.stack_offset.is_some());
        let mut offset = v.stack_offset.unwrap_or(0);
        if !self.is_ebp_based_frame {
            offset += st.stack_adjustment;
        }
        write!(w, "{} [{}", width_string(v.ty), self.frame_or_stack_reg().name())?;
        if offset != 0 {
            write!(w, "{offset:+}")?;
        }
        w.write_str("]")
    }

    fn emit_operand(&self, w: &mut dyn Write, op: &Operand, st: &EmitState) -> fmt::Result {
        match op {
            Operand::Var(var) => self.emit_var(w, *var, st),
            Operand::ConstInt { value, .. } => write!(w, "{value}"),
            Operand::ConstF32 { pool, .. } => write!(w, "dword ptr [L$f32${pool}]"),
            Operand::ConstF64 { pool, .. } => write!(w, "qword ptr [L$f64${pool}]"),
            Operand::ConstReloc { name, offset, suppress_mangling, .. } => {
                let raw = self.ctx.resolve(*name);
                if *suppress_mangling {
                    w.write_str(raw)?;
                } else {
                    w.write_str(&self.ctx.mangle_name(raw))?;
                }
                if *offset != 0 {
                    write!(w, "{offset:+}")?;
                }
                Ok(())
            }
            Operand::Undef { .. } => unreachable!("undef reached the emitter"),
            Operand::Mem(mem) => {
                write!(w, "{} ", width_string(mem.ty))?;
                if mem.segment == SegmentReg::Gs {
                    w.write_str("gs:")?;
                }
                w.write_str("[")?;
                let mut first = true;
                if let Some(base) = mem.base {
                    self.emit_var(w, base, st)?;
                    first = false;
                }
                if let Some(index) = mem.index {
                    if !first {
                        w.write_str("+")?;
                    }
                    self.emit_var(w, index, st)?;
                    write!(w, "*{}", 1u32 << mem.shift)?;
                    first = false;
                }
                match mem.offset {
                    Some(MemOffset::Imm(value)) => {
                        if first {
                            write!(w, "{value}")?;
                        } else if value != 0 {
                            write!(w, "{value:+}")?;
                        }
                    }
                    Some(MemOffset::Reloc(sym, addend)) => {
                        if !first {
                            w.write_str("+")?;
                        }
                        w.write_str(&self.ctx.mangle_name(self.ctx.resolve(sym)))?;
                        if addend != 0 {
                            write!(w, "{addend:+}")?;
                        }
                    }
                    None => {}
                }
                w.write_str("]")
            }
            Operand::Split { var, half } => {
                let v = self.func.var(*var);
                debug_assert!(!v.has_reg());
                let mut offset = v.stack_offset.unwrap_or(0);
                if *half == Half::Hi {
                    offset += 4;
                }
                if !self.is_ebp_based_frame {
                    offset += st.stack_adjustment;
                }
                write!(w, "dword ptr [{}", self.frame_or_stack_reg().name())?;
                if offset != 0 {
                    write!(w, "{offset:+}")?;
                }
                w.write_str("]")
            }
        }
    }

    /// Shift counts print as `cl` when they live in a register.
    fn emit_shift_amount(&self, w: &mut dyn Write, amount: &Operand, st: &EmitState) -> fmt::Result {
        match amount {
            Operand::Var(var) => {
                let v = self.func.var(*var);
                match v.reg_num {
                    Some(reg_num) => w.write_str(Reg::from_num(reg_num).name_for_type(Type::I8)),
                    None => self.emit_var(w, *var, st),
                }
            }
            _ => self.emit_operand(w, amount, st),
        }
    }

    fn emit_two(
        &self,
        w: &mut dyn Write,
        mnemonic: &str,
        dst: VarId,
        src: &Operand,
        st: &EmitState,
    ) -> fmt::Result {
        write!(w, "\t{mnemonic}\t")?;
        self.emit_var(w, dst, st)?;
        w.write_str(", ")?;
        self.emit_operand(w, src, st)?;
        w.write_str("\n")
    }

    fn var_ty(&self, var: VarId) -> Type {
        self.func.var(var).ty
    }

    fn in_xmm_reg(&self, var: VarId) -> bool {
        match self.func.var(var).reg_num {
            Some(reg_num) => reg_num >= Reg::Xmm0.num(),
            None => false,
        }
    }

    fn emit_inst(
        &self,
        w: &mut dyn Write,
        inst: &MInst,
        st: &mut EmitState,
        next_block: Option<boreal_ir::BlockId>,
    ) -> fmt::Result {
        use MInst::*;
        match inst {
            Mov { dst, src } => {
                let mnemonic = match self.var_ty(*dst) {
                    Type::F32 => "movss",
                    Type::F64 => "movsd",
                    _ => "mov",
                };
                self.emit_two(w, mnemonic, *dst, src, st)
            }
            Movp { dst, src } => self.emit_two(w, "movaps", *dst, src, st),
            Movq { dst, src } => self.emit_two(w, "movq", *dst, src, st),
            Movd { dst, src } => self.emit_two(w, "movd", *dst, src, st),
            Movss { dst, src } => self.emit_two(w, "movss", *dst, &Operand::Var(*src), st),
            Movzx { dst, src } => self.emit_two(w, "movzx", *dst, src, st),
            Movsx { dst, src } => self.emit_two(w, "movsx", *dst, src, st),
            Lea { dst, src } => self.emit_two(w, "lea", *dst, src, st),
            Store { value, addr } => {
                let mnemonic = match self.func.operand_ty(value) {
                    Type::F32 => "movss",
                    Type::F64 => "movsd",
                    _ => "mov",
                };
                write!(w, "\t{mnemonic}\t")?;
                self.emit_operand(w, addr, st)?;
                w.write_str(", ")?;
                self.emit_operand(w, value, st)?;
                w.write_str("\n")
            }
            Storep { value, addr } => {
                w.write_str("\tmovaps\t")?;
                self.emit_operand(w, addr, st)?;
                w.write_str(", ")?;
                self.emit_var(w, *value, st)?;
                w.write_str("\n")
            }
            Storeq { value, addr } => {
                w.write_str("\tmovq\t")?;
                self.emit_operand(w, addr, st)?;
                w.write_str(", ")?;
                self.emit_var(w, *value, st)?;
                w.write_str("\n")
            }
            Add { dst, src } => self.emit_two(w, "add", *dst, src, st),
            Adc { dst, src } => self.emit_two(w, "adc", *dst, src, st),
            Sub { dst, src } => self.emit_two(w, "sub", *dst, src, st),
            Sbb { dst, src } => self.emit_two(w, "sbb", *dst, src, st),
            And { dst, src } => self.emit_two(w, "and", *dst, src, st),
            Or { dst, src } => self.emit_two(w, "or", *dst, src, st),
            Xor { dst, src } => self.emit_two(w, "xor", *dst, src, st),
            Imul { dst, src } => {
                if self.var_ty(*dst) == Type::I8 {
                    // The 8-bit imul only has the single-operand form.
                    w.write_str("\timul\t")?;
                    self.emit_operand(w, src, st)?;
                    w.write_str("\n")
                } else {
                    self.emit_two(w, "imul", *dst, src, st)
                }
            }
            Mul { src2, .. } => {
                w.write_str("\tmul\t")?;
                self.emit_operand(w, src2, st)?;
                w.write_str("\n")
            }
            Div { divisor, .. } => {
                w.write_str("\tdiv\t")?;
                self.emit_operand(w, divisor, st)?;
                w.write_str("\n")
            }
            Idiv { divisor, .. } => {
                w.write_str("\tidiv\t")?;
                self.emit_operand(w, divisor, st)?;
                w.write_str("\n")
            }
            Cbwdq { src, .. } => match self.var_ty(*src) {
                Type::I8 => w.write_str("\tcbw\n"),
                Type::I16 => w.write_str("\tcwd\n"),
                _ => w.write_str("\tcdq\n"),
            },
            Neg { dst } => {
                w.write_str("\tneg\t")?;
                self.emit_var(w, *dst, st)?;
                w.write_str("\n")
            }
            Shl { dst, amount } | Shr { dst, amount } | Sar { dst, amount }
            | Rol { dst, amount } => {
                let mnemonic = match inst {
                    Shl { .. } => "shl",
                    Shr { .. } => "shr",
                    Sar { .. } => "sar",
                    _ => "rol",
                };
                write!(w, "\t{mnemonic}\t")?;
                self.emit_var(w, *dst, st)?;
                w.write_str(", ")?;
                self.emit_shift_amount(w, amount, st)?;
                w.write_str("\n")
            }
            Shld { dst, src, amount } | Shrd { dst, src, amount } => {
                let mnemonic = if matches!(inst, Shld { .. }) { "shld" } else { "shrd" };
                write!(w, "\t{mnemonic}\t")?;
                self.emit_var(w, *dst, st)?;
                w.write_str(", ")?;
                self.emit_var(w, *src, st)?;
                w.write_str(", ")?;
                self.emit_shift_amount(w, amount, st)?;
                w.write_str("\n")
            }
            Bswap { dst } => {
                w.write_str("\tbswap\t")?;
                self.emit_var(w, *dst, st)?;
                w.write_str("\n")
            }
            Bsf { dst, src } => self.emit_two(w, "bsf", *dst, src, st),
            Bsr { dst, src } => self.emit_two(w, "bsr", *dst, src, st),
            Cmov { cond, dst, src } => {
                let mnemonic = format!("cmov{}", cond.suffix());
                self.emit_two(w, &mnemonic, *dst, src, st)
            }
            Cmp { a, b } => {
                w.write_str("\tcmp\t")?;
                self.emit_operand(w, a, st)?;
                w.write_str(", ")?;
                self.emit_operand(w, b, st)?;
                w.write_str("\n")
            }
            Test { a, b } => {
                w.write_str("\ttest\t")?;
                self.emit_operand(w, a, st)?;
                w.write_str(", ")?;
                self.emit_operand(w, b, st)?;
                w.write_str("\n")
            }
            Ucomiss { a, b } => {
                write!(w, "\tucomi{}\t", sdss_suffix(self.var_ty(*a)))?;
                self.emit_var(w, *a, st)?;
                w.write_str(", ")?;
                self.emit_operand(w, b, st)?;
                w.write_str("\n")
            }
            Addss { dst, src } => {
                let mnemonic = format!("add{}", sdss_suffix(self.var_ty(*dst)));
                self.emit_two(w, &mnemonic, *dst, src, st)
            }
            Subss { dst, src } => {
                let mnemonic = format!("sub{}", sdss_suffix(self.var_ty(*dst)));
                self.emit_two(w, &mnemonic, *dst, src, st)
            }
            Mulss { dst, src } => {
                let mnemonic = format!("mul{}", sdss_suffix(self.var_ty(*dst)));
                self.emit_two(w, &mnemonic, *dst, src, st)
            }
            Divss { dst, src } => {
                let mnemonic = format!("div{}", sdss_suffix(self.var_ty(*dst)));
                self.emit_two(w, &mnemonic, *dst, src, st)
            }
            Sqrtss { dst, src } => {
                let mnemonic = format!("sqrt{}", sdss_suffix(self.var_ty(*dst)));
                self.emit_two(w, &mnemonic, *dst, src, st)
            }
            Cvt { dst, src, trunc } => {
                let src_ty = self.func.operand_ty(src);
                let dst_ty = self.var_ty(*dst);
                let t = if *trunc { "t" } else { "" };
                let mnemonic = format!("cvt{t}{}2{}", cvt_attr(src_ty), cvt_attr(dst_ty));
                self.emit_two(w, &mnemonic, *dst, src, st)
            }
            Fld { src } => {
                let ty = self.func.operand_ty(src);
                let width = ty.width_in_bytes();
                if let Some(var) = src.as_var() {
                    if self.in_xmm_reg(var) {
                        // The source lives in an xmm register; route it to
                        // the x87 stack through memory.
                        writeln!(w, "\tsub\tesp, {width}")?;
                        write!(w, "\tmov{}\t{} [esp], ", sdss_suffix(ty), width_string(ty))?;
                        self.emit_var(w, var, st)?;
                        w.write_str("\n")?;
                        writeln!(w, "\tfld\t{} [esp]", width_string(ty))?;
                        writeln!(w, "\tadd\tesp, {width}")?;
                        return Ok(());
                    }
                }
                w.write_str("\tfld\t")?;
                self.emit_operand(w, src, st)?;
                w.write_str("\n")
            }
            Fstp { dst } => {
                let ty = self.var_ty(*dst);
                let width = ty.width_in_bytes();
                if self.in_xmm_reg(*dst) {
                    // Pop st(0) into the xmm register through memory.
                    writeln!(w, "\tsub\tesp, {width}")?;
                    writeln!(w, "\tfstp\t{} [esp]", width_string(ty))?;
                    write!(w, "\tmov{}\t", sdss_suffix(ty))?;
                    self.emit_var(w, *dst, st)?;
                    writeln!(w, ", {} [esp]", width_string(ty))?;
                    writeln!(w, "\tadd\tesp, {width}")?;
                    return Ok(());
                }
                w.write_str("\tfstp\t")?;
                self.emit_var(w, *dst, st)?;
                w.write_str("\n")
            }
            Padd { dst, src } => {
                let mnemonic = format!("padd{}", pack_suffix(self.var_ty(*dst)));
                self.emit_two(w, &mnemonic, *dst, src, st)
            }
            Psub { dst, src } => {
                let mnemonic = format!("psub{}", pack_suffix(self.var_ty(*dst)));
                self.emit_two(w, &mnemonic, *dst, src, st)
            }
            Pand { dst, src } => self.emit_two(w, "pand", *dst, src, st),
            Pandn { dst, src } => self.emit_two(w, "pandn", *dst, src, st),
            Por { dst, src } => self.emit_two(w, "por", *dst, src, st),
            Pxor { dst, src } => self.emit_two(w, "pxor", *dst, src, st),
            Pmull { dst, src } => {
                let mnemonic = if self.var_ty(*dst) == Type::V8I16 { "pmullw" } else { "pmulld" };
                self.emit_two(w, mnemonic, *dst, src, st)
            }
            Pmuludq { dst, src } => self.emit_two(w, "pmuludq", *dst, src, st),
            Pcmpeq { dst, src } => {
                let mnemonic = format!("pcmpeq{}", pack_suffix(self.var_ty(*dst)));
                self.emit_two(w, &mnemonic, *dst, src, st)
            }
            Pcmpgt { dst, src } => {
                let mnemonic = format!("pcmpgt{}", pack_suffix(self.var_ty(*dst)));
                self.emit_two(w, &mnemonic, *dst, src, st)
            }
            Psll { dst, amount } => {
                let mnemonic = format!("psll{}", pack_suffix(self.var_ty(*dst)));
                self.emit_two(w, &mnemonic, *dst, amount, st)
            }
            Psra { dst, amount } => {
                let mnemonic = format!("psra{}", pack_suffix(self.var_ty(*dst)));
                self.emit_two(w, &mnemonic, *dst, amount, st)
            }
            Pshufd { dst, src, mask } => {
                write!(w, "\tpshufd\t")?;
                self.emit_var(w, *dst, st)?;
                w.write_str(", ")?;
                self.emit_operand(w, src, st)?;
                writeln!(w, ", {mask:#x}")
            }
            Shufps { dst, src, mask } => {
                write!(w, "\tshufps\t")?;
                self.emit_var(w, *dst, st)?;
                w.write_str(", ")?;
                self.emit_operand(w, src, st)?;
                writeln!(w, ", {mask:#x}")
            }
            Cmpps { dst, src, pred } => {
                let mnemonic = format!("cmp{}ps", pred.infix());
                self.emit_two(w, &mnemonic, *dst, src, st)
            }
            Addps { dst, src } => self.emit_two(w, "addps", *dst, src, st),
            Subps { dst, src } => self.emit_two(w, "subps", *dst, src, st),
            Mulps { dst, src } => self.emit_two(w, "mulps", *dst, src, st),
            Divps { dst, src } => self.emit_two(w, "divps", *dst, src, st),
            Pextr { dst, src, lane } => {
                let mnemonic = match in_vector_element_type(self.var_ty(*src)) {
                    Type::I8 => "pextrb",
                    Type::I16 => "pextrw",
                    _ => "pextrd",
                };
                write!(w, "\t{mnemonic}\t")?;
                self.emit_var(w, *dst, st)?;
                w.write_str(", ")?;
                self.emit_var(w, *src, st)?;
                writeln!(w, ", {lane}")
            }
            Pinsr { dst, src, lane } => {
                let mnemonic = match in_vector_element_type(self.var_ty(*dst)) {
                    Type::I8 => "pinsrb",
                    Type::I16 => "pinsrw",
                    _ => "pinsrd",
                };
                write!(w, "\t{mnemonic}\t")?;
                self.emit_var(w, *dst, st)?;
                w.write_str(", ")?;
                self.emit_operand(w, src, st)?;
                writeln!(w, ", {lane}")
            }
            Insertps { dst, src, mask } => {
                write!(w, "\tinsertps\t")?;
                self.emit_var(w, *dst, st)?;
                w.write_str(", ")?;
                self.emit_operand(w, src, st)?;
                writeln!(w, ", {mask:#x}")
            }
            Blendvps { dst, src, .. } => self.emit_two(w, "blendvps", *dst, src, st),
            Pblendvb { dst, src, .. } => self.emit_two(w, "pblendvb", *dst, src, st),
            Cmpxchg { addr, desired, locked, .. } => {
                if *locked {
                    w.write_str("\tlock ")?;
                } else {
                    w.write_str("\t")?;
                }
                w.write_str("cmpxchg\t")?;
                self.emit_operand(w, &Operand::Mem(*addr), st)?;
                w.write_str(", ")?;
                self.emit_var(w, *desired, st)?;
                w.write_str("\n")
            }
            Cmpxchg8b { addr, locked, .. } => {
                if *locked {
                    w.write_str("\tlock ")?;
                } else {
                    w.write_str("\t")?;
                }
                w.write_str("cmpxchg8b\t")?;
                self.emit_operand(w, &Operand::Mem(*addr), st)?;
                w.write_str("\n")
            }
            Xadd { addr, val, locked } => {
                if *locked {
                    w.write_str("\tlock ")?;
                } else {
                    w.write_str("\t")?;
                }
                w.write_str("xadd\t")?;
                self.emit_operand(w, &Operand::Mem(*addr), st)?;
                w.write_str(", ")?;
                self.emit_var(w, *val, st)?;
                w.write_str("\n")
            }
            Xchg { addr, val } => {
                w.write_str("\txchg\t")?;
                self.emit_operand(w, &Operand::Mem(*addr), st)?;
                w.write_str(", ")?;
                self.emit_var(w, *val, st)?;
                w.write_str("\n")
            }
            Mfence => w.write_str("\tmfence\n"),
            Label { id } => writeln!(w, "{}:", self.local_label(*id)),
            Br { cond, target, target_false } => {
                match cond {
                    None => writeln!(w, "\tjmp\t{}", self.target_label(*target))?,
                    Some(cc) => {
                        writeln!(w, "\tj{}\t{}", cc.suffix(), self.target_label(*target))?;
                        if let Some(false_target) = target_false {
                            let falls_through = matches!(
                                false_target,
                                Target::Block(b) if Some(*b) == next_block
                            );
                            if !falls_through {
                                writeln!(w, "\tjmp\t{}", self.target_label(*false_target))?;
                            }
                        }
                    }
                }
                Ok(())
            }
            Call { target, .. } => {
                w.write_str("\tcall\t")?;
                self.emit_operand(w, target, st)?;
                w.write_str("\n")?;
                // The post-call `add esp, N` restores esp immediately, and
                // no stack variable is referenced in between.
                st.stack_adjustment = 0;
                Ok(())
            }
            Ret { .. } => w.write_str("\tret\n"),
            Push { src } => {
                w.write_str("\tpush\t")?;
                self.emit_var(w, *src, st)?;
                w.write_str("\n")
            }
            Pop { dst } => {
                w.write_str("\tpop\t")?;
                self.emit_var(w, *dst, st)?;
                w.write_str("\n")
            }
            AdjustStack { amount } => {
                writeln!(w, "\tsub\tesp, {amount}")?;
                st.stack_adjustment += *amount as i32;
                Ok(())
            }
            Ud2 => w.write_str("\tud2\n"),
            Nop { .. } => w.write_str("\tnop\n"),
            FakeDef { .. } | FakeUse { .. } | FakeKill { .. } => Ok(()),
        }
    }
}

/// Emit the f32 and f64 constant pools as mergeable rodata sections.
pub fn emit_constant_pools(ctx: &GlobalContext, w: &mut dyn Write) -> fmt::Result {
    if !ctx.f32_pool().is_empty() {
        writeln!(w, "\t.section\t.rodata.cst4,\"aM\",@progbits,4")?;
        writeln!(w, "\t.align\t4")?;
        for (id, value) in ctx.f32_pool().iter().enumerate() {
            writeln!(w, "L$f32${id}:")?;
            writeln!(w, "\t.long\t{:#x}\t# float {value}", value.to_bits())?;
        }
    }
    if !ctx.f64_pool().is_empty() {
        writeln!(w, "\t.section\t.rodata.cst8,\"aM\",@progbits,8")?;
        writeln!(w, "\t.align\t8")?;
        for (id, value) in ctx.f64_pool().iter().enumerate() {
            writeln!(w, "L$f64${id}:")?;
            writeln!(w, "\t.quad\t{:#x}\t# double {value}", value.to_bits())?;
        }
    }
    // Integer constants embed as immediates and need no pool.
    Ok(())
}

/// Emit one global data definition.
pub fn lower_global_init(
    ctx: &GlobalContext,
    w: &mut dyn Write,
    name: &str,
    align: u32,
    is_internal: bool,
    is_const: bool,
    is_zero_initializer: bool,
    data: &[u8],
) -> fmt::Result {
    // constant:
    //   .section .rodata,"a",@progbits
    //   .align ALIGN
    //   .byte ...
    //   .size NAME, SIZE
    //
    // non-constant:
    //   .data
    //   (as above)
    //
    // zeroinitializer (constant):
    //   .align ALIGN
    //   .zero SIZE
    //   .size NAME, SIZE
    //
    // zeroinitializer (non-constant):
    //   .local NAME
    //   .comm NAME, SIZE, ALIGN
    let mangled = ctx.mangle_name(name);
    let size = data.len();
    if is_const {
        writeln!(w, "\t.section\t.rodata,\"a\",@progbits")?;
    } else {
        writeln!(w, "\t.type\t{mangled},@object")?;
        writeln!(w, "\t.data")?;
    }
    writeln!(w, "\t{}\t{mangled}", if is_internal { ".local" } else { ".global" })?;
    if is_zero_initializer {
        if is_const {
            writeln!(w, "\t.align\t{align}")?;
            writeln!(w, "{mangled}:")?;
            writeln!(w, "\t.zero\t{size}")?;
            writeln!(w, "\t.size\t{mangled}, {size}")?;
        } else {
            writeln!(w, "\t.comm\t{mangled}, {size}, {align}")?;
        }
    } else {
        writeln!(w, "\t.align\t{align}")?;
        writeln!(w, "{mangled}:")?;
        for byte in data {
            writeln!(w, "\t.byte\t{byte}")?;
        }
        writeln!(w, "\t.size\t{mangled}, {size}")?;
    }
    Ok(())
}
