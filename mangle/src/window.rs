//! Mangling window: the slice of the list around one application
//! instruction that its rewrite may touch.

use dbt_core::{
    Cond, Instr, InstrId, InstrList, InstrShape, MangleConfig, MangleError,
    Reg, RegSet, TlsSlot,
};
use tracing::trace;

use crate::scratch::{self, ScratchReg, SpillTracker};

/// State for rewriting one instruction.
///
/// New code goes between `start` (exclusive, `None` = list head) and
/// `next` (exclusive, `None` = list end). Spills are placed right after
/// `start`, before any other mangling code; restores go right before
/// `next`, after all other post-instruction code.
pub(crate) struct Window<'a> {
    pub cfg: &'a MangleConfig,
    pub ilist: &'a mut InstrList,
    /// The instruction under rewrite; `None` once it has been removed.
    pub instr: Option<InstrId>,
    /// Copy of the instruction as decoded.
    pub orig: Instr,
    pub start: Option<InstrId>,
    pub next: Option<InstrId>,
    spill_cursor: Option<InstrId>,
    spills: SpillTracker,
}

impl<'a> Window<'a> {
    pub fn new(
        cfg: &'a MangleConfig,
        ilist: &'a mut InstrList,
        instr: InstrId,
        next: Option<InstrId>,
    ) -> Self {
        let start = ilist.prev(instr);
        let orig = ilist.clone_instr(instr);
        Self {
            cfg,
            ilist,
            instr: Some(instr),
            orig,
            start,
            next,
            spill_cursor: start,
            spills: SpillTracker::default(),
        }
    }

    #[inline]
    pub fn stolen(&self) -> Reg {
        self.cfg.stolen_reg()
    }

    /// Application address of the instruction.
    #[inline]
    pub fn pc(&self) -> u32 {
        self.orig.app_pc.unwrap_or(0)
    }

    #[inline]
    pub fn pred(&self) -> Option<Cond> {
        self.orig.pred
    }

    pub fn unsupported(&self, shape: InstrShape) -> MangleError {
        MangleError::unsupported(self.orig.app_pc, shape)
    }

    /// Current state of the instruction under rewrite.
    pub fn cur(&self) -> &Instr {
        match self.instr {
            Some(id) => self.ilist.get(id),
            None => &self.orig,
        }
    }

    pub fn cur_mut(&mut self) -> &mut Instr {
        let id = self.instr.expect("instruction already removed");
        self.ilist.get_mut(id)
    }

    /// Position that code "before the instruction" is inserted at.
    fn here(&self) -> Option<InstrId> {
        self.instr.or(self.next)
    }

    /// Insert runtime code immediately before the instruction.
    pub fn pre(&mut self, instr: Instr) -> InstrId {
        let pos = self.here();
        self.ilist.meta_insert_before(pos, instr)
    }

    /// Insert runtime code after the instruction and any post code
    /// already added.
    pub fn post(&mut self, instr: Instr) -> InstrId {
        self.ilist.meta_insert_before(self.next, instr)
    }

    pub fn pre_mov_immed(&mut self, val: u32, dst: Reg, pred: Option<Cond>) {
        let pos = self.here();
        self.ilist.insert_mov_immed(pos, val, dst, pred);
    }

    pub fn post_mov_immed(&mut self, val: u32, dst: Reg, pred: Option<Cond>) {
        self.ilist.insert_mov_immed(self.next, val, dst, pred);
    }

    /// Store `reg` to `slot` at the head of the window.
    pub fn spill_at_start(&mut self, reg: Reg, slot: TlsSlot) {
        let spill = Instr::save_to_tls(self.cfg, reg, slot);
        trace!(reg = reg.name(), offs = slot.offset(), "spill");
        let id = self.ilist.meta_insert_after(self.spill_cursor, spill);
        self.spill_cursor = Some(id);
    }

    /// Pick a scratch register, avoiding those already claimed, and spill it
    /// if needed.
    pub fn claim_scratch(&mut self, avoid: RegSet) -> ScratchReg {
        let avoid = avoid.union(self.spills.live());
        let sc = scratch::pick_scratch(self.cfg, self.cur(), avoid);
        self.claim(sc);
        sc
    }

    /// Pick without claiming; `None` on exhaustion.
    pub fn try_pick(&self, avoid: RegSet) -> Option<ScratchReg> {
        let avoid = avoid.union(self.spills.live());
        scratch::try_pick_scratch(self.cfg, self.cur(), avoid)
    }

    /// Claim `sc`, spilling it at the head of the window when required.
    pub fn claim(&mut self, sc: ScratchReg) {
        if self.spills.claim(sc) {
            self.spill_at_start(sc.reg, sc.slot);
        }
    }

    /// Registers claimed so far.
    pub fn claimed(&self) -> RegSet {
        self.spills.live()
    }

    pub fn remove_instr(&mut self) -> Instr {
        let id = self.instr.take().expect("instruction already removed");
        self.ilist.remove(id)
    }

    /// Emit the restores for every claimed scratch register.
    pub fn finish_spills(&mut self) {
        let restores: Vec<ScratchReg> =
            self.spills.restores().copied().collect();
        for sc in restores {
            trace!(reg = sc.reg.name(), offs = sc.slot.offset(), "restore");
            let fill = Instr::restore_from_tls(self.cfg, sc.reg, sc.slot);
            self.post(fill);
        }
    }

    /// First instruction of the window.
    pub fn first(&self) -> Option<InstrId> {
        self.ilist.next_from(self.start)
    }
}
