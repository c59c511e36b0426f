use crate::reg::Reg;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ShiftKind {
    Lsl,
    Lsr,
    Asr,
    Ror,
}

/// Immediate shift applied to a register operand or memory index.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Shift {
    pub kind: ShiftKind,
    pub amount: u8,
}

impl Shift {
    pub const fn lsl(amount: u8) -> Self {
        Self {
            kind: ShiftKind::Lsl,
            amount,
        }
    }

    pub fn apply(self, val: u32) -> u32 {
        let n = self.amount as u32;
        match self.kind {
            ShiftKind::Lsl => val.checked_shl(n).unwrap_or(0),
            ShiftKind::Lsr => val.checked_shr(n).unwrap_or(0),
            ShiftKind::Asr => ((val as i32) >> n.min(31)) as u32,
            ShiftKind::Ror => val.rotate_right(n),
        }
    }
}

/// Width of a memory access. `RegList` marks the memory operand of a block
/// transfer, whose size follows from the register list.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MemSize {
    Byte,
    Half,
    Word,
    Dword,
    RegList,
}

impl MemSize {
    pub const fn bytes(self) -> u32 {
        match self {
            MemSize::Byte => 1,
            MemSize::Half => 2,
            MemSize::Word => 4,
            MemSize::Dword => 8,
            MemSize::RegList => 0,
        }
    }
}

/// How a memory operand's displacement interacts with its base.
///
/// For block transfers `Offset` means no writeback and `PreIndex` means
/// writeback (`!`); the direction lives in the opcode.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AddrMode {
    Offset,
    PreIndex,
    PostIndex,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct MemRef {
    pub base: Reg,
    pub index: Option<Reg>,
    pub shift: Option<Shift>,
    pub disp: i32,
    pub size: MemSize,
    pub mode: AddrMode,
}

impl MemRef {
    /// `[base, #disp]` of the given width.
    pub const fn base_disp(base: Reg, disp: i32, size: MemSize) -> Self {
        Self {
            base,
            index: None,
            shift: None,
            disp,
            size,
            mode: AddrMode::Offset,
        }
    }

    /// `[base, index{, shift}]` of the given width.
    pub const fn base_index(
        base: Reg,
        index: Reg,
        shift: Option<Shift>,
        size: MemSize,
    ) -> Self {
        Self {
            base,
            index: Some(index),
            shift,
            disp: 0,
            size,
            mode: AddrMode::Offset,
        }
    }

    /// Memory operand of a block transfer on `base`.
    pub const fn reg_list(base: Reg, writeback: bool) -> Self {
        Self {
            base,
            index: None,
            shift: None,
            disp: 0,
            size: MemSize::RegList,
            mode: if writeback {
                AddrMode::PreIndex
            } else {
                AddrMode::Offset
            },
        }
    }

    pub const fn with_mode(mut self, mode: AddrMode) -> Self {
        self.mode = mode;
        self
    }

    pub const fn writeback(&self) -> bool {
        !matches!(self.mode, AddrMode::Offset)
    }

    pub fn uses_reg(&self, reg: Reg) -> bool {
        self.base == reg || self.index == Some(reg)
    }

    fn replace_reg(&mut self, from: Reg, to: Reg) -> bool {
        let mut hit = false;
        if self.base == from {
            self.base = to;
            hit = true;
        }
        if self.index == Some(from) {
            self.index = Some(to);
            hit = true;
        }
        hit
    }
}

/// Instruction operand.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Operand {
    Reg(Reg),
    ShiftedReg(Reg, Shift),
    Imm(i32),
    Mem(MemRef),
    /// Absolute application target of a PC-relative branch.
    PcRel(u32),
}

impl Operand {
    pub const fn reg(self) -> Option<Reg> {
        match self {
            Operand::Reg(r) => Some(r),
            _ => None,
        }
    }

    pub const fn imm(self) -> Option<i32> {
        match self {
            Operand::Imm(v) => Some(v),
            _ => None,
        }
    }

    pub const fn mem(self) -> Option<MemRef> {
        match self {
            Operand::Mem(m) => Some(m),
            _ => None,
        }
    }

    pub const fn is_reg(self, reg: Reg) -> bool {
        matches!(self, Operand::Reg(r) if r as u8 == reg as u8)
    }

    /// True when this operand names `reg` in any position, including the
    /// base or index of a memory reference.
    pub fn uses_reg(&self, reg: Reg) -> bool {
        match *self {
            Operand::Reg(r) | Operand::ShiftedReg(r, _) => r == reg,
            Operand::Mem(ref m) => m.uses_reg(reg),
            Operand::Imm(_) | Operand::PcRel(_) => false,
        }
    }

    /// Substitute every occurrence of `from`. Returns whether anything
    /// changed.
    pub fn replace_reg(&mut self, from: Reg, to: Reg) -> bool {
        match self {
            Operand::Reg(r) | Operand::ShiftedReg(r, _) => {
                if *r == from {
                    *r = to;
                    true
                } else {
                    false
                }
            }
            Operand::Mem(m) => m.replace_reg(from, to),
            Operand::Imm(_) | Operand::PcRel(_) => false,
        }
    }
}

impl From<Reg> for Operand {
    fn from(r: Reg) -> Self {
        Operand::Reg(r)
    }
}

impl From<MemRef> for Operand {
    fn from(m: MemRef) -> Self {
        Operand::Mem(m)
    }
}
