pub mod config;
pub mod dump;
pub mod error;
pub mod ilist;
pub mod instr;
pub mod instr_create;
pub mod linkstub;
pub mod opcode;
pub mod operand;
pub mod reg;
pub mod types;

pub use config::{
    ConfigError, DcontextLayout, MangleConfig, TlsSlot, IBL_TARGET_SLOT,
};
pub use error::{InstrShape, MangleError};
pub use ilist::{InstrId, InstrList};
pub use instr::Instr;
pub use linkstub::{ExitTarget, IndirectKind, Linkstub};
pub use opcode::{OpDef, OpFlags, Opcode, OPCODE_DEFS};
pub use operand::{AddrMode, MemRef, MemSize, Operand, Shift, ShiftKind};
pub use reg::{Reg, IBL_TARGET_REG, NUM_GPRS, REG_DCXT};
pub use types::{
    architectural_pc_for, literal_base_for, BlockMode, Cond, IsaMode, RegSet,
};
