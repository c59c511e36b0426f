//! Scratch register selection and per-instruction spill bookkeeping.

use dbt_core::{Instr, MangleConfig, Reg, RegSet, TlsSlot, IBL_TARGET_REG};

/// Candidate scratch registers, in preference order. Each owns the TLS
/// spill slot of the same number.
pub const SCRATCH_CANDIDATES: [Reg; 6] =
    [Reg::R0, Reg::R1, Reg::R2, Reg::R3, Reg::R4, Reg::R5];

/// A register picked for mangling scratch use.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ScratchReg {
    pub reg: Reg,
    pub slot: TlsSlot,
    /// The application value must be spilled before use and restored
    /// afterwards. `false` only when the instruction overwrites the
    /// register anyway.
    pub should_restore: bool,
}

fn candidates<'a>(
    cfg: &'a MangleConfig,
    instr: &'a Instr,
    avoid: RegSet,
) -> impl Iterator<Item = Reg> + 'a {
    let is_cti = instr.is_cti();
    SCRATCH_CANDIDATES.into_iter().filter(move |&r| {
        r < cfg.stolen_reg()
            && !avoid.contains(r)
            && !(is_cti && r == IBL_TARGET_REG)
    })
}

/// Pick a scratch register for `instr`, skipping `avoid`.
///
/// Prefers a register the instruction does not touch; falls back to one
/// it writes without reading.
pub fn try_pick_scratch(
    cfg: &MangleConfig,
    instr: &Instr,
    avoid: RegSet,
) -> Option<ScratchReg> {
    let make = |reg: Reg, should_restore| ScratchReg {
        reg,
        slot: TlsSlot::for_scratch(reg),
        should_restore,
    };
    if let Some(r) =
        candidates(cfg, instr, avoid).find(|&r| !instr.uses_reg(r))
    {
        return Some(make(r, true));
    }
    candidates(cfg, instr, avoid)
        .find(|&r| !instr.reads_reg(r))
        .map(|r| make(r, false))
}

/// [`try_pick_scratch`] for callers where exhaustion cannot happen for a
/// well-formed instruction.
pub fn pick_scratch(
    cfg: &MangleConfig,
    instr: &Instr,
    avoid: RegSet,
) -> ScratchReg {
    match try_pick_scratch(cfg, instr, avoid) {
        Some(sc) => sc,
        None => panic!("no scratch register available for `{instr}`"),
    }
}

/// First candidate outside `avoid`, regardless of how the instruction
/// uses it. Always spilled and restored.
pub fn pick_any_scratch(cfg: &MangleConfig, avoid: RegSet) -> ScratchReg {
    let reg = SCRATCH_CANDIDATES
        .into_iter()
        .find(|&r| r < cfg.stolen_reg() && !avoid.contains(r));
    match reg {
        Some(reg) => ScratchReg {
            reg,
            slot: TlsSlot::for_scratch(reg),
            should_restore: true,
        },
        None => panic!("scratch candidates exhausted by {avoid:?}"),
    }
}

/// Scratch registers claimed while mangling one instruction.
///
/// Each register is spilled at most once, and every spilled register is
/// restored once after the instruction, last spilled first.
#[derive(Debug, Default)]
pub struct SpillTracker {
    claimed: Vec<ScratchReg>,
}

impl SpillTracker {
    /// Record `sc`. Returns `true` when the caller must emit the spill.
    pub fn claim(&mut self, sc: ScratchReg) -> bool {
        if self.claimed.iter().any(|c| c.reg == sc.reg) {
            return false;
        }
        self.claimed.push(sc);
        sc.should_restore
    }

    /// Registers already holding mangling values.
    pub fn live(&self) -> RegSet {
        self.claimed.iter().map(|c| c.reg).collect()
    }

    /// Registers to restore after the instruction, in emission order.
    pub fn restores(&self) -> impl Iterator<Item = &ScratchReg> {
        self.claimed.iter().rev().filter(|c| c.should_restore)
    }
}
