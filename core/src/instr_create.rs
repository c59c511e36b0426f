use crate::config::{MangleConfig, TlsSlot};
use crate::ilist::{InstrId, InstrList};
use crate::instr::Instr;
use crate::opcode::Opcode;
use crate::operand::{MemRef, MemSize, Operand, Shift};
use crate::reg::Reg;
use crate::types::{BlockMode, Cond};

impl Instr {
    // -- Internal helpers --

    fn binary(opc: Opcode, d: Reg, a: Reg, b: Operand) -> Self {
        Instr::new(opc).dst(d).src(a).src(b)
    }

    // -- Data movement --

    pub fn mov(d: Reg, s: Reg) -> Self {
        Instr::new(Opcode::Mov).dst(d).src(s)
    }

    pub fn mvn_imm(d: Reg, imm: u32) -> Self {
        Instr::new(Opcode::Mvn).dst(d).src(Operand::Imm(imm as i32))
    }

    pub fn movw(d: Reg, imm: u16) -> Self {
        Instr::new(Opcode::Movw).dst(d).src(Operand::Imm(imm as i32))
    }

    pub fn movt(d: Reg, imm: u16) -> Self {
        Instr::new(Opcode::Movt).dst(d).src(Operand::Imm(imm as i32))
    }

    // -- Arithmetic / logic --

    pub fn add_imm(d: Reg, a: Reg, imm: i32) -> Self {
        Self::binary(Opcode::Add, d, a, Operand::Imm(imm))
    }

    pub fn sub_imm(d: Reg, a: Reg, imm: i32) -> Self {
        Self::binary(Opcode::Sub, d, a, Operand::Imm(imm))
    }

    pub fn orr_imm(d: Reg, a: Reg, imm: i32) -> Self {
        Self::binary(Opcode::Orr, d, a, Operand::Imm(imm))
    }

    pub fn lsl_imm(d: Reg, a: Reg, imm: i32) -> Self {
        Self::binary(Opcode::Lsl, d, a, Operand::Imm(imm))
    }

    /// `add` or `sub` depending on the sign of `imm`.
    pub fn add_signed(d: Reg, a: Reg, imm: i32) -> Self {
        if imm < 0 {
            Self::sub_imm(d, a, -imm)
        } else {
            Self::add_imm(d, a, imm)
        }
    }

    // -- Memory --

    pub fn ldr(d: Reg, mem: MemRef) -> Self {
        Instr::new(Opcode::Ldr).dst(d).src(mem)
    }

    pub fn ldrb(d: Reg, mem: MemRef) -> Self {
        Instr::new(Opcode::Ldrb).dst(d).src(mem)
    }

    pub fn ldrh(d: Reg, mem: MemRef) -> Self {
        Instr::new(Opcode::Ldrh).dst(d).src(mem)
    }

    pub fn str(s: Reg, mem: MemRef) -> Self {
        Instr::new(Opcode::Str).src(s).dst(mem)
    }

    /// `ldm{mode} base{!}, {regs}`. `regs` is sorted ascending.
    pub fn ldm(
        mode: BlockMode,
        base: Reg,
        writeback: bool,
        regs: &[Reg],
    ) -> Self {
        let mut i = Instr::new(Opcode::ldm(mode))
            .src(MemRef::reg_list(base, writeback));
        let mut regs = regs.to_vec();
        regs.sort();
        i.dsts = regs.into_iter().map(Operand::Reg).collect();
        i
    }

    /// `stm{mode} base{!}, {regs}`. `regs` is sorted ascending.
    pub fn stm(
        mode: BlockMode,
        base: Reg,
        writeback: bool,
        regs: &[Reg],
    ) -> Self {
        let mut i = Instr::new(Opcode::stm(mode))
            .dst(MemRef::reg_list(base, writeback));
        let mut regs = regs.to_vec();
        regs.sort();
        i.srcs = regs.into_iter().map(Operand::Reg).collect();
        i
    }

    // -- Control transfer --

    pub fn b(target: u32) -> Self {
        Instr::new(Opcode::B).src(Operand::PcRel(target))
    }

    pub fn bl(target: u32) -> Self {
        Instr::new(Opcode::Bl)
            .dst(Reg::LR)
            .src(Operand::PcRel(target))
    }

    pub fn blx_ind(target: Reg) -> Self {
        Instr::new(Opcode::BlxInd).dst(Reg::LR).src(target)
    }

    pub fn bx(target: Reg) -> Self {
        Instr::new(Opcode::Bx).src(target)
    }

    /// `tbb [base, index]` / `tbh [base, index, lsl #1]`.
    pub fn table_branch(halfword: bool, base: Reg, index: Reg) -> Self {
        if halfword {
            Instr::new(Opcode::Tbh).src(MemRef::base_index(
                base,
                index,
                Some(Shift::lsl(1)),
                MemSize::Half,
            ))
        } else {
            Instr::new(Opcode::Tbb)
                .src(MemRef::base_index(base, index, None, MemSize::Byte))
        }
    }

    pub fn svc(imm: i32) -> Self {
        Instr::new(Opcode::Svc).src(Operand::Imm(imm))
    }

    // -- System --

    /// `mrc p<coproc>, <opc1>, d, c<crn>, c<crm>, <opc2>`.
    pub fn mrc(
        d: Reg,
        coproc: i32,
        opc1: i32,
        crn: Reg,
        crm: Reg,
        opc2: i32,
    ) -> Self {
        Instr::new(Opcode::Mrc)
            .dst(d)
            .src(Operand::Imm(coproc))
            .src(Operand::Imm(opc1))
            .src(crn)
            .src(crm)
            .src(Operand::Imm(opc2))
    }

    pub fn mrs(d: Reg) -> Self {
        Instr::new(Opcode::Mrs).dst(d).src(Reg::Cpsr)
    }

    /// `msr cpsr_<fields>, s`; `fields` is the 4-bit field mask.
    pub fn msr(fields: i32, s: Reg) -> Self {
        Instr::new(Opcode::Msr)
            .dst(Reg::Cpsr)
            .src(Operand::Imm(fields))
            .src(s)
    }

    pub fn nop() -> Self {
        Instr::new(Opcode::Nop)
    }

    pub fn label() -> Self {
        Instr::new(Opcode::Label)
    }

    // -- Predication --

    /// IT marker covering `conds`. Every entry must be the first condition
    /// or its inverse, and there are 1..=4 of them.
    pub fn it(conds: &[Cond]) -> Self {
        assert!(
            (1..=4).contains(&conds.len()),
            "IT block must cover 1..=4 instructions"
        );
        let first = conds[0];
        assert!(
            first != Cond::Al || conds.len() == 1,
            "IT block with AL must cover one instruction"
        );
        let mut mask = 1u8 << (4 - conds.len());
        for (i, &c) in conds.iter().enumerate().skip(1) {
            assert!(
                c == first || c == first.invert(),
                "IT slot condition {:?} does not match {:?}",
                c,
                first
            );
            mask |= (c.bits() & 1) << (4 - i);
        }
        Instr::new(Opcode::It)
            .src(Operand::Imm(first.bits() as i32))
            .src(Operand::Imm(mask as i32))
    }

    // -- TLS spill slots --

    /// `str reg, [stolen, #slot]`.
    pub fn save_to_tls(cfg: &MangleConfig, reg: Reg, slot: TlsSlot) -> Self {
        Self::str(reg, tls_mem(cfg, slot))
    }

    /// `ldr reg, [stolen, #slot]`.
    pub fn restore_from_tls(
        cfg: &MangleConfig,
        reg: Reg,
        slot: TlsSlot,
    ) -> Self {
        Self::ldr(reg, tls_mem(cfg, slot))
    }

    /// `str reg, [dcxt, #offs]`.
    pub fn save_to_dc(dcxt: Reg, reg: Reg, offs: i32) -> Self {
        Self::str(reg, MemRef::base_disp(dcxt, offs, MemSize::Word))
    }

    /// `ldr reg, [dcxt, #offs]`.
    pub fn restore_from_dc(dcxt: Reg, reg: Reg, offs: i32) -> Self {
        Self::ldr(reg, MemRef::base_disp(dcxt, offs, MemSize::Word))
    }
}

/// Word memory operand for `slot` off the runtime TLS base.
pub fn tls_mem(cfg: &MangleConfig, slot: TlsSlot) -> MemRef {
    MemRef::base_disp(cfg.stolen_reg(), slot.offset() as i32, MemSize::Word)
}

impl InstrList {
    /// Materialize `val` into `dst` before `pos` with runtime-synthesized
    /// instructions carrying `pred`.
    ///
    /// Uses a single `mvn` when the complement fits 12 bits, otherwise
    /// `movw` followed by `movt` when the high half is non-zero. Returns the
    /// first and last inserted ids.
    pub fn insert_mov_immed(
        &mut self,
        pos: Option<InstrId>,
        val: u32,
        dst: Reg,
        pred: Option<Cond>,
    ) -> (InstrId, InstrId) {
        if !val <= 0xfff {
            let id = self
                .meta_insert_before(pos, Instr::mvn_imm(dst, !val).pred(pred));
            return (id, id);
        }
        let first = self
            .meta_insert_before(pos, Instr::movw(dst, val as u16).pred(pred));
        let mut last = first;
        if val >> 16 != 0 {
            last = self.meta_insert_before(
                pos,
                Instr::movt(dst, (val >> 16) as u16).pred(pred),
            );
        }
        (first, last)
    }

    /// Jump to an absolute `target` from anywhere: load it into `scratch`
    /// and move that into the PC.
    pub fn insert_reachable_cti(
        &mut self,
        pos: Option<InstrId>,
        target: u32,
        scratch: Reg,
    ) -> InstrId {
        assert!(scratch != Reg::PC, "scratch must be a general register");
        self.insert_mov_immed(pos, target, scratch, None);
        self.meta_insert_before(pos, Instr::mov(Reg::PC, scratch))
    }
}
