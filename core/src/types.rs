use crate::reg::Reg;

/// ARM condition codes.
///
/// The discriminant is the 4-bit architectural encoding, so the inverse of
/// any condition other than `Al` differs only in bit 0.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum Cond {
    Eq = 0,
    Ne = 1,
    Cs = 2,
    Cc = 3,
    Mi = 4,
    Pl = 5,
    Vs = 6,
    Vc = 7,
    Hi = 8,
    Ls = 9,
    Ge = 10,
    Lt = 11,
    Gt = 12,
    Le = 13,
    Al = 14,
}

impl Cond {
    pub const ALL: [Cond; 15] = [
        Cond::Eq,
        Cond::Ne,
        Cond::Cs,
        Cond::Cc,
        Cond::Mi,
        Cond::Pl,
        Cond::Vs,
        Cond::Vc,
        Cond::Hi,
        Cond::Ls,
        Cond::Ge,
        Cond::Lt,
        Cond::Gt,
        Cond::Le,
        Cond::Al,
    ];

    pub const fn from_bits(bits: u8) -> Option<Cond> {
        if bits < 15 {
            Some(Self::ALL[bits as usize])
        } else {
            None
        }
    }

    pub const fn bits(self) -> u8 {
        self as u8
    }

    /// Return the inverted condition. `Al` has no inverse.
    pub const fn invert(self) -> Cond {
        assert!(!matches!(self, Cond::Al), "AL has no inverse");
        Self::ALL[(self as u8 ^ 1) as usize]
    }

    pub const fn name(self) -> &'static str {
        match self {
            Cond::Eq => "eq",
            Cond::Ne => "ne",
            Cond::Cs => "cs",
            Cond::Cc => "cc",
            Cond::Mi => "mi",
            Cond::Pl => "pl",
            Cond::Vs => "vs",
            Cond::Vc => "vc",
            Cond::Hi => "hi",
            Cond::Ls => "ls",
            Cond::Ge => "ge",
            Cond::Lt => "lt",
            Cond::Gt => "gt",
            Cond::Le => "le",
            Cond::Al => "al",
        }
    }
}

/// Instruction-set encoding mode of a code region.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum IsaMode {
    /// A32.
    Arm,
    /// T32.
    Thumb,
}

impl IsaMode {
    /// Distance between an instruction's address and the value it observes
    /// when reading the PC.
    pub const fn pc_offset(self) -> u32 {
        match self {
            IsaMode::Arm => 8,
            IsaMode::Thumb => 4,
        }
    }

    /// Low bit to OR into a code address so that an interworking branch
    /// stays in this mode.
    pub const fn mode_bit(self) -> u32 {
        match self {
            IsaMode::Arm => 0,
            IsaMode::Thumb => 1,
        }
    }
}

/// Application-visible PC value for an instruction at `addr`.
pub const fn architectural_pc_for(addr: u32, mode: IsaMode) -> u32 {
    addr.wrapping_add(mode.pc_offset())
}

/// Base used by PC-relative memory accesses. Thumb word-aligns the PC.
pub const fn literal_base_for(addr: u32, mode: IsaMode) -> u32 {
    let pc = architectural_pc_for(addr, mode);
    match mode {
        IsaMode::Arm => pc,
        IsaMode::Thumb => pc & !3,
    }
}

/// Addressing mode of a block transfer (`ldm`/`stm` family).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BlockMode {
    /// Increment after.
    Ia,
    /// Increment before.
    Ib,
    /// Decrement after.
    Da,
    /// Decrement before.
    Db,
}

impl BlockMode {
    /// Offset from the base of the lowest-addressed word for an `n`-register
    /// transfer.
    pub const fn start_offset(self, n: u32) -> i32 {
        let n = n as i32;
        match self {
            BlockMode::Ia => 0,
            BlockMode::Ib => 4,
            BlockMode::Da => 4 - 4 * n,
            BlockMode::Db => -4 * n,
        }
    }

    /// Writeback delta applied to the base for an `n`-register transfer.
    pub const fn writeback_delta(self, n: u32) -> i32 {
        let n = n as i32;
        match self {
            BlockMode::Ia | BlockMode::Ib => 4 * n,
            BlockMode::Da | BlockMode::Db => -4 * n,
        }
    }

    pub const fn suffix(self) -> &'static str {
        match self {
            BlockMode::Ia => "",
            BlockMode::Ib => "ib",
            BlockMode::Da => "da",
            BlockMode::Db => "db",
        }
    }
}

/// Bitmask set of architectural registers.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct RegSet(u32);

impl RegSet {
    pub const EMPTY: RegSet = RegSet(0);

    pub const fn set(self, reg: Reg) -> Self {
        Self(self.0 | (1u32 << reg as u8))
    }

    pub const fn clear(self, reg: Reg) -> Self {
        Self(self.0 & !(1u32 << reg as u8))
    }

    pub const fn contains(self, reg: Reg) -> bool {
        self.0 & (1u32 << reg as u8) != 0
    }

    pub const fn is_empty(self) -> bool {
        self.0 == 0
    }

    pub const fn union(self, other: RegSet) -> Self {
        Self(self.0 | other.0)
    }

    pub const fn count(self) -> u32 {
        self.0.count_ones()
    }

    /// Registers in ascending architectural order.
    pub fn iter(self) -> impl Iterator<Item = Reg> {
        (0..32u8)
            .filter(move |&i| self.0 & (1u32 << i) != 0)
            .filter_map(Reg::from_u8)
    }
}

impl Default for RegSet {
    fn default() -> Self {
        Self::EMPTY
    }
}

impl FromIterator<Reg> for RegSet {
    fn from_iter<I: IntoIterator<Item = Reg>>(iter: I) -> Self {
        iter.into_iter().fold(RegSet::EMPTY, RegSet::set)
    }
}

impl std::fmt::Debug for RegSet {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "RegSet(0x{:08x})", self.0)
    }
}
