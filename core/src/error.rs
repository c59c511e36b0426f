use thiserror::Error;

/// Instruction shapes the mangler recognizes but has no rewrite for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Error)]
pub enum InstrShape {
    #[error("blx with immediate target (mode switch)")]
    ModeSwitchCall,
    #[error("exception return")]
    ExceptionReturn,
    #[error("table branch using the stolen register")]
    TableBranchStolen,
    #[error("table branch indexed by pc")]
    TableBranchPcIndex,
    #[error("direct branch testing the stolen register")]
    DirectBranchStolen,
    #[error("indirect transfer to pc")]
    IndirectToPc,
    #[error("pc destination alongside a write to the branch-target register")]
    BranchTargetClobbered,
    #[error("register list based on the stolen register")]
    RegListStolenBase,
    #[error("register list based on pc")]
    RegListPcBase,
    #[error("register list containing its own writeback base")]
    RegListBaseInList,
    #[error("pc-relative operand outside a branch")]
    PcRelOperand,
    #[error("no free scratch register for stolen-register access")]
    NoStolenScratch,
    #[error("no free scratch register for register-list load")]
    NoListScratch,
    #[error("indirect exit stub")]
    IndirectExitStub,
    #[error("exit stub in a Thumb fragment")]
    ThumbExitStub,
}

/// Failure of a mangling pass. The pass leaves its input list untouched.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum MangleError {
    #[error("unsupported instruction for mangling at {pc:#010x}: {shape}")]
    Unsupported { pc: u32, shape: InstrShape },
}

impl MangleError {
    pub fn unsupported(pc: Option<u32>, shape: InstrShape) -> Self {
        MangleError::Unsupported {
            pc: pc.unwrap_or(0),
            shape,
        }
    }

    pub fn shape(&self) -> InstrShape {
        match self {
            MangleError::Unsupported { shape, .. } => *shape,
        }
    }
}
