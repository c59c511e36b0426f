//! A32 instruction words for the fixed-shape code the linkage generator
//! writes directly into the cache. Everything is unconditional (`AL`)
//! except `b`.

use dbt_core::{Cond, Reg};

const COND_AL: u32 = 0xe << 28;

/// Opcode bits 27..24 of `b`.
pub const B_OPCODE: u32 = 0xa;

/// `b` displacement field width.
pub const B_DISP_MASK: u32 = 0x00ff_ffff;

/// Reach of `b`: a signed 24-bit word offset.
pub const B_MAX_DISP: i64 = (1 << 25) - 4;
pub const B_MIN_DISP: i64 = -(1 << 25);

/// Distance the PC reads ahead of an A32 instruction.
pub const PC_BIAS: i64 = 8;

#[inline]
fn rd(reg: Reg) -> u32 {
    assert!(reg.is_gpr(), "{reg} is not a core register");
    reg.num() as u32
}

/// `str rt, [rn, #off]` (positive 12-bit offset).
pub fn str_imm(rt: Reg, rn: Reg, off: u32) -> u32 {
    assert!(off <= 0xfff, "str offset {off:#x} out of range");
    COND_AL | 0x0580_0000 | rd(rn) << 16 | rd(rt) << 12 | off
}

/// `ldr rt, [rn, #off]` (positive 12-bit offset).
pub fn ldr_imm(rt: Reg, rn: Reg, off: u32) -> u32 {
    assert!(off <= 0xfff, "ldr offset {off:#x} out of range");
    COND_AL | 0x0590_0000 | rd(rn) << 16 | rd(rt) << 12 | off
}

/// `movw rd, #imm16`.
pub fn movw(d: Reg, imm: u16) -> u32 {
    let imm = imm as u32;
    COND_AL | 0x0300_0000 | ((imm & 0xf000) << 4) | rd(d) << 12 | (imm & 0xfff)
}

/// `movt rd, #imm16`.
pub fn movt(d: Reg, imm: u16) -> u32 {
    let imm = imm as u32;
    COND_AL | 0x0340_0000 | ((imm & 0xf000) << 4) | rd(d) << 12 | (imm & 0xfff)
}

/// `b<cond>` with a byte displacement relative to the branch's PC value
/// (its address + 8).
pub fn b(cond: Cond, disp: i32) -> u32 {
    assert!(disp & 3 == 0, "misaligned branch displacement {disp}");
    (cond.bits() as u32) << 28
        | B_OPCODE << 24
        | ((disp >> 2) as u32 & B_DISP_MASK)
}

/// Whether `word` is an A32 `b` (any condition, not `bl`).
pub fn is_branch(word: u32) -> bool {
    (word >> 24) & 0xf == B_OPCODE && word >> 28 != 0xf
}
