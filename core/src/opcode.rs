use crate::types::BlockMode;

/// Opcodes of the ARM instruction subset the mangler reasons about.
///
/// Operand layout per opcode (srcs / dsts):
/// - data processing: `dsts[0]` register, `srcs` are the inputs in
///   assembly order (register, shifted register, or immediate).
/// - `cmp`/`tst`: no dsts, two srcs.
/// - single loads: `dsts` registers, `srcs[0]` memory.
/// - single stores: `srcs` registers, `dsts[0]` memory.
/// - `ldm*`: `srcs[0]` register-list memory, `dsts` the list ascending.
/// - `stm*`: `dsts[0]` register-list memory, `srcs` the list ascending.
/// - `b`/`bl`/`blx`: `srcs[0]` pc-relative target; calls write `lr`.
/// - `blx`/`bx`/`bxj` by register: `srcs[0]` register.
/// - `cbz`/`cbnz`: `srcs[0]` target, `srcs[1]` register.
/// - `tbb`/`tbh`: `srcs[0]` memory `[base, index]`.
/// - `it`: `srcs[0]` firstcond, `srcs[1]` mask.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum Opcode {
    // -- Data movement --
    Mov = 0,
    Movs,
    Mvn,
    Movw,
    Movt,

    // -- Arithmetic / logic --
    Add,
    Adds,
    Sub,
    Subs,
    Rsb,
    And,
    Orr,
    Eor,
    Bic,
    Lsl,
    Lsr,
    Asr,
    Cmp,
    Tst,

    // -- System --
    Mrs,
    Msr,
    Mrc,

    // -- Single loads/stores --
    Ldr,
    Ldrb,
    Ldrh,
    Ldrd,
    Str,
    Strb,
    Strh,
    Strd,

    // -- Block transfers --
    Ldm,
    Ldmib,
    Ldmda,
    Ldmdb,
    Stm,
    Stmib,
    Stmda,
    Stmdb,

    // -- Control transfer --
    B,
    Bl,
    Blx,
    BlxInd,
    Bx,
    Bxj,
    Cbz,
    Cbnz,
    Tbb,
    Tbh,
    Rfe,
    Eret,
    Svc,

    // -- Markers --
    It,
    Nop,
    Label,

    Count,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OpFlags(u16);

impl OpFlags {
    pub const NONE: OpFlags = OpFlags(0);
    /// Reads memory.
    pub const LOAD: OpFlags = OpFlags(0x01);
    /// Writes memory.
    pub const STORE: OpFlags = OpFlags(0x02);
    /// Operates on a register list.
    pub const REG_LIST: OpFlags = OpFlags(0x04);
    /// Always a control transfer.
    pub const CTI: OpFlags = OpFlags(0x08);
    /// Target is encoded in the instruction.
    pub const DIRECT: OpFlags = OpFlags(0x10);
    /// Target comes from a register or memory.
    pub const INDIRECT: OpFlags = OpFlags(0x20);
    /// Writes the return address to `lr`.
    pub const CALL: OpFlags = OpFlags(0x40);
    /// Switches between ARM and Thumb.
    pub const MODE_SWITCH: OpFlags = OpFlags(0x80);
    /// Table branch.
    pub const TABLE: OpFlags = OpFlags(0x100);
    /// Exception return or other privileged transfer.
    pub const PRIVILEGED: OpFlags = OpFlags(0x200);
    pub const SYSCALL: OpFlags = OpFlags(0x400);
    /// Not a real instruction in the output stream (labels, IT markers).
    pub const MARKER: OpFlags = OpFlags(0x800);
    /// Updates the condition flags.
    pub const SETS_FLAGS: OpFlags = OpFlags(0x1000);
    /// Condition is part of the encoding, not an IT block.
    pub const COND_BRANCH: OpFlags = OpFlags(0x2000);

    pub const fn bits(self) -> u16 {
        self.0
    }

    pub const fn contains(self, other: OpFlags) -> bool {
        self.0 & other.0 == other.0
    }

    pub const fn union(self, other: OpFlags) -> Self {
        OpFlags(self.0 | other.0)
    }
}

/// Static opcode definition.
#[derive(Debug, Clone, Copy)]
pub struct OpDef {
    pub name: &'static str,
    pub flags: OpFlags,
}

const N: OpFlags = OpFlags::NONE;
const LD: OpFlags = OpFlags::LOAD;
const ST: OpFlags = OpFlags::STORE;
const SF: OpFlags = OpFlags::SETS_FLAGS;
const LDM: OpFlags = OpFlags(OpFlags::LOAD.0 | OpFlags::REG_LIST.0);
const STM: OpFlags = OpFlags(OpFlags::STORE.0 | OpFlags::REG_LIST.0);
const DIR: OpFlags = OpFlags(OpFlags::CTI.0 | OpFlags::DIRECT.0);
const IND: OpFlags = OpFlags(OpFlags::CTI.0 | OpFlags::INDIRECT.0);
const MK: OpFlags = OpFlags::MARKER;

const fn d(name: &'static str, flags: OpFlags) -> OpDef {
    OpDef { name, flags }
}

/// Opcode definition table, indexed by `Opcode as usize`.
pub static OPCODE_DEFS: [OpDef; Opcode::Count as usize] = [
    d("mov", N),
    d("movs", SF),
    d("mvn", N),
    d("movw", N),
    d("movt", N),
    d("add", N),
    d("adds", SF),
    d("sub", N),
    d("subs", SF),
    d("rsb", N),
    d("and", N),
    d("orr", N),
    d("eor", N),
    d("bic", N),
    d("lsl", N),
    d("lsr", N),
    d("asr", N),
    d("cmp", SF),
    d("tst", SF),
    d("mrs", N),
    d("msr", SF),
    d("mrc", N),
    d("ldr", LD),
    d("ldrb", LD),
    d("ldrh", LD),
    d("ldrd", LD),
    d("str", ST),
    d("strb", ST),
    d("strh", ST),
    d("strd", ST),
    d("ldm", LDM),
    d("ldmib", LDM),
    d("ldmda", LDM),
    d("ldmdb", LDM),
    d("stm", STM),
    d("stmib", STM),
    d("stmda", STM),
    d("stmdb", STM),
    d("b", DIR),
    d("bl", DIR.union(OpFlags::CALL)),
    d("blx", DIR.union(OpFlags::CALL).union(OpFlags::MODE_SWITCH)),
    d("blx", IND.union(OpFlags::CALL)),
    d("bx", IND),
    d("bxj", IND),
    d("cbz", DIR.union(OpFlags::COND_BRANCH)),
    d("cbnz", DIR.union(OpFlags::COND_BRANCH)),
    d("tbb", IND.union(OpFlags::TABLE).union(LD)),
    d("tbh", IND.union(OpFlags::TABLE).union(LD)),
    d("rfe", IND.union(OpFlags::PRIVILEGED).union(LD)),
    d("eret", IND.union(OpFlags::PRIVILEGED)),
    d("svc", OpFlags::SYSCALL),
    d("it", MK),
    d("nop", N),
    d("label", MK),
];

impl Opcode {
    /// Look up the static definition for this opcode.
    pub fn def(self) -> &'static OpDef {
        &OPCODE_DEFS[self as usize]
    }

    pub fn name(self) -> &'static str {
        self.def().name
    }

    pub fn flags(self) -> OpFlags {
        self.def().flags
    }

    pub const fn ldm(mode: BlockMode) -> Opcode {
        match mode {
            BlockMode::Ia => Opcode::Ldm,
            BlockMode::Ib => Opcode::Ldmib,
            BlockMode::Da => Opcode::Ldmda,
            BlockMode::Db => Opcode::Ldmdb,
        }
    }

    pub const fn stm(mode: BlockMode) -> Opcode {
        match mode {
            BlockMode::Ia => Opcode::Stm,
            BlockMode::Ib => Opcode::Stmib,
            BlockMode::Da => Opcode::Stmda,
            BlockMode::Db => Opcode::Stmdb,
        }
    }

    /// Addressing mode of a block transfer.
    pub const fn block_mode(self) -> Option<BlockMode> {
        match self {
            Opcode::Ldm | Opcode::Stm => Some(BlockMode::Ia),
            Opcode::Ldmib | Opcode::Stmib => Some(BlockMode::Ib),
            Opcode::Ldmda | Opcode::Stmda => Some(BlockMode::Da),
            Opcode::Ldmdb | Opcode::Stmdb => Some(BlockMode::Db),
            _ => None,
        }
    }

    pub fn is_load_multiple(self) -> bool {
        self.flags().contains(LDM)
    }

    pub fn is_store_multiple(self) -> bool {
        self.flags().contains(STM)
    }

    pub fn is_marker(self) -> bool {
        self.flags().contains(OpFlags::MARKER)
    }
}
