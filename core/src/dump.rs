//! Instruction dump: human-readable, UAL-flavoured assembly text.

use std::fmt;
use std::io::Write;

use crate::ilist::InstrList;
use crate::instr::Instr;
use crate::opcode::Opcode;
use crate::operand::{AddrMode, MemRef, MemSize, Operand, Shift, ShiftKind};

fn shift_name(s: Shift) -> &'static str {
    match s.kind {
        ShiftKind::Lsl => "lsl",
        ShiftKind::Lsr => "lsr",
        ShiftKind::Asr => "asr",
        ShiftKind::Ror => "ror",
    }
}

fn fmt_imm(f: &mut fmt::Formatter<'_>, v: i32) -> fmt::Result {
    if (-4096..4096).contains(&v) {
        write!(f, "#{v}")
    } else {
        write!(f, "#0x{:x}", v as u32)
    }
}

fn fmt_mem(f: &mut fmt::Formatter<'_>, m: &MemRef) -> fmt::Result {
    if m.size == MemSize::RegList {
        f.write_str(m.base.name())?;
        if m.writeback() {
            f.write_str("!")?;
        }
        return Ok(());
    }
    write!(f, "[{}", m.base)?;
    if m.mode == AddrMode::PostIndex {
        f.write_str("]")?;
    }
    if let Some(idx) = m.index {
        write!(f, ", {idx}")?;
        if let Some(s) = m.shift {
            write!(f, ", {} #{}", shift_name(s), s.amount)?;
        }
    } else if m.disp != 0 || m.mode == AddrMode::PostIndex {
        f.write_str(", ")?;
        fmt_imm(f, m.disp)?;
    }
    match m.mode {
        AddrMode::Offset => f.write_str("]"),
        AddrMode::PreIndex => f.write_str("]!"),
        AddrMode::PostIndex => Ok(()),
    }
}

fn fmt_operand(f: &mut fmt::Formatter<'_>, op: &Operand) -> fmt::Result {
    match op {
        Operand::Reg(r) => f.write_str(r.name()),
        Operand::ShiftedReg(r, s) => {
            write!(f, "{r}, {} #{}", shift_name(*s), s.amount)
        }
        Operand::Imm(v) => fmt_imm(f, *v),
        Operand::Mem(m) => fmt_mem(f, m),
        Operand::PcRel(t) => write!(f, "0x{t:08x}"),
    }
}

fn fmt_list(f: &mut fmt::Formatter<'_>, ops: &[Operand]) -> fmt::Result {
    for (i, op) in ops.iter().enumerate() {
        if i > 0 {
            f.write_str(", ")?;
        }
        fmt_operand(f, op)?;
    }
    Ok(())
}

fn fmt_reg_list(f: &mut fmt::Formatter<'_>, ops: &[Operand]) -> fmt::Result {
    f.write_str("{")?;
    fmt_list(f, ops)?;
    f.write_str("}")
}

fn fmt_it(f: &mut fmt::Formatter<'_>, i: &Instr) -> fmt::Result {
    let conds = i.it_conds();
    f.write_str("it")?;
    for c in &conds[1..] {
        f.write_str(if *c == conds[0] { "t" } else { "e" })?;
    }
    write!(f, " {}", conds[0].name())
}

/// Format one instruction, e.g. `ldrne r2, [r10, #8]`.
pub fn fmt_instr(f: &mut fmt::Formatter<'_>, i: &Instr) -> fmt::Result {
    if i.opcode == Opcode::It {
        return fmt_it(f, i);
    }
    f.write_str(i.opcode.name())?;
    if let Some(c) = i.pred {
        f.write_str(c.name())?;
    }
    if i.srcs.is_empty() && i.dsts.is_empty() {
        return Ok(());
    }
    f.write_str(" ")?;
    match i.opcode {
        Opcode::Ldm | Opcode::Ldmib | Opcode::Ldmda | Opcode::Ldmdb => {
            fmt_operand(f, &i.srcs[0])?;
            f.write_str(", ")?;
            fmt_reg_list(f, &i.dsts)
        }
        Opcode::Stm | Opcode::Stmib | Opcode::Stmda | Opcode::Stmdb => {
            fmt_operand(f, &i.dsts[0])?;
            f.write_str(", ")?;
            fmt_reg_list(f, &i.srcs)
        }
        Opcode::Str | Opcode::Strb | Opcode::Strh | Opcode::Strd => {
            fmt_list(f, &i.srcs)?;
            f.write_str(", ")?;
            fmt_list(f, &i.dsts)
        }
        Opcode::Bl | Opcode::BlxInd => fmt_list(f, &i.srcs),
        Opcode::Mrc => {
            let imm = |n: usize| i.srcs[n].imm().unwrap_or(0);
            write!(f, "p{}, {}, ", imm(0), imm(1))?;
            fmt_list(f, &i.dsts)?;
            f.write_str(", ")?;
            fmt_list(f, &i.srcs[2..4])?;
            write!(f, ", {}", imm(4))
        }
        Opcode::Msr => {
            let fields = i.srcs[0].imm().unwrap_or(0);
            if fields == 0b1100 {
                f.write_str("cpsr_nzcvqg, ")?;
            } else {
                write!(f, "cpsr_{fields:x}, ")?;
            }
            fmt_list(f, &i.srcs[1..])
        }
        _ => {
            fmt_list(f, &i.dsts)?;
            if !i.dsts.is_empty() && !i.srcs.is_empty() {
                f.write_str(", ")?;
            }
            fmt_list(f, &i.srcs)
        }
    }
}

/// Dump an instruction list, one instruction per line. Application
/// instructions get a ` ---- 0x<pc>` header.
pub fn dump_ilist(
    ilist: &InstrList,
    w: &mut impl Write,
) -> std::io::Result<()> {
    for i in ilist.iter() {
        if i.is_app {
            if let Some(pc) = i.app_pc {
                writeln!(w, " ---- 0x{pc:08x}")?;
            }
        }
        writeln!(w, " {i}")?;
    }
    Ok(())
}

/// One line per instruction, without headers.
pub fn ilist_lines(ilist: &InstrList) -> Vec<String> {
    ilist.iter().map(|i| i.to_string()).collect()
}
