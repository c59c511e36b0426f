use thiserror::Error;

use crate::reg::{Reg, NUM_GPRS};
use crate::types::IsaMode;

/// Named per-thread storage locations addressed off the runtime TLS base
/// held in the stolen register.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TlsSlot {
    /// Spill slot for scratch register `n` (0..=5).
    Reg(u8),
    /// Application value of the stolen register.
    Stolen,
    /// Current dcontext pointer.
    Dcontext,
    /// Address of the generic fcache-return routine.
    FcacheReturn,
    /// Branch target consumed by the tail of the enter sequence.
    FcacheTarget,
    /// Application's own content of the TLS swap slot.
    AppTlsSwap,
    /// Application value of the dcontext register across the return path.
    DcontextBaseSpill,
}

/// Number of numbered scratch slots.
pub const NUM_SCRATCH_SLOTS: u8 = 6;

/// Slot the exit stub spills `r0` to before loading the linkstub address.
pub const DIRECT_STUB_SPILL_SLOT: TlsSlot = TlsSlot::Reg(0);

/// Slot holding the application value of the branch-target register while
/// an indirect transfer is resolved.
pub const IBL_TARGET_SLOT: TlsSlot = TlsSlot::Reg(2);

impl TlsSlot {
    /// Byte offset from the runtime TLS base.
    pub const fn offset(self) -> u32 {
        match self {
            TlsSlot::Reg(n) => {
                assert!(n < NUM_SCRATCH_SLOTS, "scratch slot out of range");
                4 * n as u32
            }
            TlsSlot::Stolen => 0x18,
            TlsSlot::Dcontext => 0x1c,
            TlsSlot::FcacheReturn => 0x20,
            TlsSlot::FcacheTarget => 0x24,
            TlsSlot::AppTlsSwap => 0x28,
            TlsSlot::DcontextBaseSpill => 0x2c,
        }
    }

    /// Spill slot paired with scratch register `reg` (r0..r5).
    pub const fn for_scratch(reg: Reg) -> TlsSlot {
        assert!((reg as u8) < NUM_SCRATCH_SLOTS, "not a scratch register");
        TlsSlot::Reg(reg as u8)
    }
}

/// Offset inside the application's TLS block where the runtime stashes its
/// own TLS base while application code runs. Skips the dtv pointer.
pub const APP_TLS_SWAP_OFFSET: u32 = 4;

/// Coprocessor, opc1, CRn, CRm, opc2 of the user read-only thread-ID
/// register (`mrc p15, 0, rX, c13, c0, 3`).
pub const USR_TLS_COPROC: i32 = 15;
pub const USR_TLS_REG_OPCODE: i32 = 3;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConfigError {
    #[error("register {0} cannot be stolen (allowed: r8..r12)")]
    BadStolenReg(Reg),
}

/// Process-wide mangling configuration. Fixed once managed execution
/// starts and passed by reference to every mangling call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MangleConfig {
    stolen: Reg,
    isa: IsaMode,
}

impl MangleConfig {
    pub fn new(stolen: Reg, isa: IsaMode) -> Result<Self, ConfigError> {
        if !(Reg::R8..=Reg::R12).contains(&stolen) {
            return Err(ConfigError::BadStolenReg(stolen));
        }
        Ok(Self { stolen, isa })
    }

    #[inline]
    pub fn stolen_reg(&self) -> Reg {
        self.stolen
    }

    #[inline]
    pub fn isa(&self) -> IsaMode {
        self.isa
    }

    #[inline]
    pub fn is_thumb(&self) -> bool {
        self.isa == IsaMode::Thumb
    }

    /// Same configuration for a region encoded in `isa`.
    pub fn with_isa(self, isa: IsaMode) -> Self {
        Self { isa, ..self }
    }
}

impl Default for MangleConfig {
    fn default() -> Self {
        Self {
            stolen: Reg::R10,
            isa: IsaMode::Arm,
        }
    }
}

/// Layout of the per-thread saved context (dcontext) used by the
/// enter/return sequences.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DcontextLayout {
    /// Offset of the saved `r0`; `r1..r15` follow at 4-byte steps.
    pub r0_offset: u32,
    pub xflags_offset: u32,
    /// Linkstub of the exit taken most recently.
    pub last_exit_offset: u32,
    /// Application pc to start executing at on the next enter.
    pub next_tag_offset: u32,
}

impl DcontextLayout {
    pub const fn reg_offset(&self, reg: Reg) -> u32 {
        assert!(reg.is_gpr(), "no context slot for non-GPR");
        self.r0_offset + 4 * reg as u32
    }
}

impl Default for DcontextLayout {
    fn default() -> Self {
        let r0_offset = 0;
        let xflags_offset = r0_offset + 4 * NUM_GPRS as u32;
        Self {
            r0_offset,
            xflags_offset,
            last_exit_offset: xflags_offset + 4,
            next_tag_offset: xflags_offset + 8,
        }
    }
}
