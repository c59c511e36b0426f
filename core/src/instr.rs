use crate::opcode::{OpFlags, Opcode};
use crate::operand::{MemRef, Operand};
use crate::reg::Reg;
use crate::types::{Cond, RegSet};

/// One instruction in an [`InstrList`](crate::ilist::InstrList).
///
/// Application instructions carry the address and length they were decoded
/// from plus their raw encoding. Any operand change drops `raw`, leaving the
/// instruction for the external encoder to re-encode.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Instr {
    pub opcode: Opcode,
    pub srcs: Vec<Operand>,
    pub dsts: Vec<Operand>,
    /// `None` means unconditional. `Some(Cond::Al)` is never stored.
    pub pred: Option<Cond>,
    pub raw: Option<Vec<u8>>,
    /// Application address this instruction translates.
    pub app_pc: Option<u32>,
    /// Length in bytes of the original application encoding.
    pub app_len: u8,
    /// Came from the traced application.
    pub is_app: bool,
    /// Synthesized by the runtime and never attributed to the application.
    pub is_meta: bool,
}

impl Instr {
    pub fn new(opcode: Opcode) -> Self {
        Self {
            opcode,
            srcs: Vec::new(),
            dsts: Vec::new(),
            pred: None,
            raw: None,
            app_pc: None,
            app_len: 0,
            is_app: false,
            is_meta: false,
        }
    }

    pub fn src(mut self, op: impl Into<Operand>) -> Self {
        self.srcs.push(op.into());
        self
    }

    pub fn dst(mut self, op: impl Into<Operand>) -> Self {
        self.dsts.push(op.into());
        self
    }

    /// Set the predicate, normalizing `AL` to unconditional.
    pub fn pred(mut self, pred: Option<Cond>) -> Self {
        self.set_pred(pred);
        self
    }

    /// Mark as an application instruction decoded at `pc`.
    pub fn app(mut self, pc: u32, len: u8) -> Self {
        self.is_app = true;
        self.is_meta = false;
        self.app_pc = Some(pc);
        self.app_len = len;
        self
    }

    pub fn with_raw(mut self, raw: Vec<u8>) -> Self {
        self.raw = Some(raw);
        self
    }

    pub fn set_pred(&mut self, pred: Option<Cond>) {
        self.pred = pred.filter(|&c| c != Cond::Al);
    }

    #[inline]
    pub fn is_predicated(&self) -> bool {
        self.pred.is_some()
    }

    /// Effective condition, `AL` when unconditional.
    #[inline]
    pub fn cond(&self) -> Cond {
        self.pred.unwrap_or(Cond::Al)
    }

    /// Address of the following application instruction.
    pub fn next_app_pc(&self) -> Option<u32> {
        self.app_pc.map(|pc| pc.wrapping_add(self.app_len as u32))
    }

    /// Drop the raw encoding after an operand change.
    #[inline]
    pub fn invalidate_raw(&mut self) {
        self.raw = None;
    }

    #[inline]
    pub fn flags(&self) -> OpFlags {
        self.opcode.flags()
    }

    pub fn is_label(&self) -> bool {
        self.opcode == Opcode::Label
    }

    pub fn is_block_marker(&self) -> bool {
        self.opcode == Opcode::It
    }

    /// Control transfer, including any instruction that writes the PC.
    pub fn is_cti(&self) -> bool {
        self.flags().contains(OpFlags::CTI) || self.writes_reg(Reg::PC)
    }

    /// Direct branch that ends a code region and is linked by the
    /// runtime (`b`, `cbz`, `cbnz`). Such branches never sit inside an IT
    /// block once mangled.
    pub fn is_exit_branch(&self) -> bool {
        matches!(self.opcode, Opcode::B | Opcode::Cbz | Opcode::Cbnz)
    }

    pub fn is_syscall(&self) -> bool {
        self.flags().contains(OpFlags::SYSCALL)
    }

    /// Memory operand of a block transfer.
    pub fn list_mem(&self) -> Option<MemRef> {
        if self.opcode.is_load_multiple() {
            self.srcs.first().and_then(|op| op.mem())
        } else if self.opcode.is_store_multiple() {
            self.dsts.first().and_then(|op| op.mem())
        } else {
            None
        }
    }

    /// Register list of a block transfer (empty otherwise).
    pub fn reg_list(&self) -> RegSet {
        let ops = if self.opcode.is_load_multiple() {
            &self.dsts
        } else if self.opcode.is_store_multiple() {
            &self.srcs
        } else {
            return RegSet::EMPTY;
        };
        ops.iter().filter_map(|op| op.reg()).collect()
    }

    /// Block transfer that reads its register list (`stm*`).
    pub fn reads_gpr_list(&self) -> bool {
        self.opcode.is_store_multiple()
    }

    /// Block transfer that writes its register list (`ldm*`).
    pub fn writes_gpr_list(&self) -> bool {
        self.opcode.is_load_multiple()
    }

    /// Whether executing this instruction reads `reg`.
    ///
    /// A predicated instruction reads every register it writes: when the
    /// condition fails the old value must survive.
    pub fn reads_reg(&self, reg: Reg) -> bool {
        if self.srcs.iter().any(|op| op.uses_reg(reg)) {
            return true;
        }
        for op in &self.dsts {
            match *op {
                Operand::Mem(ref m) if m.uses_reg(reg) => return true,
                Operand::ShiftedReg(r, _) if r == reg => return true,
                _ => {}
            }
        }
        // movt keeps the low half of its destination.
        if self.opcode == Opcode::Movt
            && self.dsts.first().is_some_and(|d| d.is_reg(reg))
        {
            return true;
        }
        self.is_predicated() && self.writes_reg(reg)
    }

    /// Whether executing this instruction writes `reg`, including base
    /// writeback.
    pub fn writes_reg(&self, reg: Reg) -> bool {
        let written = self.dsts.iter().any(|op| match *op {
            Operand::Reg(r) => r == reg,
            Operand::Mem(ref m) => m.writeback() && m.base == reg,
            _ => false,
        });
        written
            || self.srcs.iter().any(|op| match *op {
                Operand::Mem(ref m) => m.writeback() && m.base == reg,
                _ => false,
            })
    }

    pub fn uses_reg(&self, reg: Reg) -> bool {
        self.srcs.iter().chain(&self.dsts).any(|op| op.uses_reg(reg))
            || self.reads_reg(reg)
    }

    /// Reads the PC as a register or address operand. Pc-relative branch
    /// targets do not count.
    pub fn reads_pc(&self) -> bool {
        self.srcs.iter().any(|op| op.uses_reg(Reg::PC))
            || self.dsts.iter().any(|op| match *op {
                Operand::Mem(ref m) => m.uses_reg(Reg::PC),
                _ => false,
            })
    }

    #[inline]
    pub fn writes_pc(&self) -> bool {
        self.writes_reg(Reg::PC)
    }

    /// Replace `from` with `to` in source operands and in the address of
    /// memory destinations. Register destinations are untouched.
    pub fn replace_src_reg(&mut self, from: Reg, to: Reg) -> bool {
        let mut hit = false;
        for op in &mut self.srcs {
            hit |= op.replace_reg(from, to);
        }
        for op in &mut self.dsts {
            if let Operand::Mem(_) = op {
                hit |= op.replace_reg(from, to);
            }
        }
        if hit {
            self.invalidate_raw();
        }
        hit
    }

    /// Replace a register destination `from` with `to`.
    pub fn replace_dst_reg(&mut self, from: Reg, to: Reg) -> bool {
        let mut hit = false;
        for op in &mut self.dsts {
            if op.is_reg(from) {
                *op = Operand::Reg(to);
                hit = true;
            }
        }
        if hit {
            self.invalidate_raw();
        }
        hit
    }

    /// Runtime bookkeeping that moves values between registers and the
    /// stolen register's TLS area: spills, restores, and the swaps around
    /// a stolen-register access. These stay unconditional when the
    /// surrounding sequence is predicated.
    pub fn is_reg_spill_or_restore(&self, stolen: Reg) -> bool {
        self.is_meta && self.uses_reg(stolen)
    }

    /// Conditions of the slots covered by an IT marker, in order.
    pub fn it_conds(&self) -> Vec<Cond> {
        assert!(self.is_block_marker(), "not an IT block marker");
        let firstcond = self.srcs[0].imm().unwrap_or(0) as u8;
        let mask = self.srcs[1].imm().unwrap_or(0) as u8 & 0xf;
        assert!(mask != 0, "IT marker with empty mask");
        let count = 4 - mask.trailing_zeros() as usize;
        (0..count)
            .map(|i| {
                let bits = if i == 0 {
                    firstcond
                } else {
                    (firstcond & 0xe) | ((mask >> (4 - i)) & 1)
                };
                Cond::from_bits(bits).unwrap_or(Cond::Al)
            })
            .collect()
    }

    /// Number of instructions an IT marker covers.
    pub fn it_count(&self) -> usize {
        self.it_conds().len()
    }
}

impl std::fmt::Display for Instr {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        crate::dump::fmt_instr(f, self)
    }
}
