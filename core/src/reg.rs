/// ARM architectural registers.
///
/// `R0`..`R15` match the 4-bit register field of the encodings. The
/// remaining entries name the status register and the coprocessor
/// registers used to read the thread-ID register.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[repr(u8)]
pub enum Reg {
    R0 = 0,
    R1 = 1,
    R2 = 2,
    R3 = 3,
    R4 = 4,
    R5 = 5,
    R6 = 6,
    R7 = 7,
    R8 = 8,
    R9 = 9,
    R10 = 10,
    R11 = 11,
    R12 = 12,
    R13 = 13,
    R14 = 14,
    R15 = 15,
    Cpsr = 16,
    Cr0 = 17,
    Cr13 = 18,
}

/// Number of general-purpose registers, PC included.
pub const NUM_GPRS: usize = 16;

/// Register that receives the target of every mangled indirect transfer.
pub const IBL_TARGET_REG: Reg = Reg::R2;

/// Register holding the dcontext pointer inside the enter/return
/// sequences.
pub const REG_DCXT: Reg = Reg::R5;

impl Reg {
    pub const SP: Reg = Reg::R13;
    pub const LR: Reg = Reg::R14;
    pub const PC: Reg = Reg::R15;

    const ALL: [Reg; 19] = [
        Reg::R0,
        Reg::R1,
        Reg::R2,
        Reg::R3,
        Reg::R4,
        Reg::R5,
        Reg::R6,
        Reg::R7,
        Reg::R8,
        Reg::R9,
        Reg::R10,
        Reg::R11,
        Reg::R12,
        Reg::R13,
        Reg::R14,
        Reg::R15,
        Reg::Cpsr,
        Reg::Cr0,
        Reg::Cr13,
    ];

    pub const fn from_u8(v: u8) -> Option<Reg> {
        if (v as usize) < Self::ALL.len() {
            Some(Self::ALL[v as usize])
        } else {
            None
        }
    }

    /// General-purpose register `n` (0..=15).
    pub const fn gpr(n: u8) -> Reg {
        assert!(n < NUM_GPRS as u8, "not a general-purpose register");
        Self::ALL[n as usize]
    }

    pub const fn num(self) -> u8 {
        self as u8
    }

    pub const fn is_gpr(self) -> bool {
        (self as u8) < NUM_GPRS as u8
    }

    pub const fn name(self) -> &'static str {
        match self {
            Reg::R0 => "r0",
            Reg::R1 => "r1",
            Reg::R2 => "r2",
            Reg::R3 => "r3",
            Reg::R4 => "r4",
            Reg::R5 => "r5",
            Reg::R6 => "r6",
            Reg::R7 => "r7",
            Reg::R8 => "r8",
            Reg::R9 => "r9",
            Reg::R10 => "r10",
            Reg::R11 => "r11",
            Reg::R12 => "r12",
            Reg::R13 => "sp",
            Reg::R14 => "lr",
            Reg::R15 => "pc",
            Reg::Cpsr => "cpsr",
            Reg::Cr0 => "c0",
            Reg::Cr13 => "c13",
        }
    }
}

impl std::fmt::Display for Reg {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}
