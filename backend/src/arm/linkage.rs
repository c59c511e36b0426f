use dbt_core::config::{
    APP_TLS_SWAP_OFFSET, DIRECT_STUB_SPILL_SLOT, USR_TLS_COPROC,
    USR_TLS_REG_OPCODE,
};
use dbt_core::{
    BlockMode, Cond, DcontextLayout, Instr, InstrList, InstrShape, Linkstub,
    MangleConfig, MemRef, MemSize, Reg, TlsSlot, REG_DCXT,
};
use tracing::debug;

use super::encode;
use crate::code_buffer::CodeBuffer;
use crate::{CacheLinkage, LinkError};

/// Size of a direct exit stub: four A32 words.
pub const DIRECT_EXIT_STUB_SIZE: usize = 16;

/// `msr` field mask selecting the flags and GE bits.
const MSR_NZCVQG: i32 = 0b1100;

/// Everything the linkage generator needs to know about the runtime.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LinkageConfig {
    pub mangle: MangleConfig,
    pub dcontext: DcontextLayout,
    /// Runtime entry point the return sequence jumps to.
    pub dispatch_pc: u32,
}

impl LinkageConfig {
    pub fn new(mangle: MangleConfig, dispatch_pc: u32) -> Self {
        Self {
            mangle,
            dcontext: DcontextLayout::default(),
            dispatch_pc,
        }
    }
}

/// A32 code-cache linkage.
pub struct Arm32Linkage {
    cfg: LinkageConfig,
}

impl Arm32Linkage {
    pub fn new(cfg: LinkageConfig) -> Self {
        Self { cfg }
    }

    pub fn config(&self) -> &LinkageConfig {
        &self.cfg
    }

    #[inline]
    fn stolen(&self) -> Reg {
        self.cfg.mangle.stolen_reg()
    }

    fn dc_offset(&self, reg: Reg) -> i32 {
        self.cfg.dcontext.reg_offset(reg) as i32
    }

    fn tls(&self, reg: Reg, slot: TlsSlot) -> Instr {
        Instr::restore_from_tls(&self.cfg.mangle, reg, slot)
    }

    fn to_tls(&self, reg: Reg, slot: TlsSlot) -> Instr {
        Instr::save_to_tls(&self.cfg.mangle, reg, slot)
    }

    /// `mrc p15, 0, d, c13, c0, 3`: the application's TLS base.
    fn read_app_tls(d: Reg) -> Instr {
        Instr::mrc(
            d,
            USR_TLS_COPROC,
            0,
            Reg::Cr13,
            Reg::Cr0,
            USR_TLS_REG_OPCODE,
        )
    }

    fn app_tls_swap(base: Reg) -> MemRef {
        MemRef::base_disp(base, APP_TLS_SWAP_OFFSET as i32, MemSize::Word)
    }

    /// `r0..r14`, the registers a context switch saves and restores.
    fn context_regs() -> Vec<Reg> {
        (0..15).map(Reg::gpr).collect()
    }

    /// Append `ctx_op` with the dcontext register pointing at the saved
    /// `r0`, then point it back at the dcontext.
    fn at_reg_area(&self, ilist: &mut InstrList, ctx_op: Instr) {
        let off = self.cfg.dcontext.r0_offset as i32;
        if off != 0 {
            ilist.meta_append(Instr::add_imm(REG_DCXT, REG_DCXT, off));
        }
        ilist.meta_append(ctx_op);
        if off != 0 {
            ilist.meta_append(Instr::sub_imm(REG_DCXT, REG_DCXT, off));
        }
    }
}

impl CacheLinkage for Arm32Linkage {
    fn emit_fcache_enter(&self, ilist: &mut InstrList) {
        let dc = self.cfg.dcontext;
        let stolen = self.stolen();
        let dcxt = REG_DCXT;

        ilist.meta_append(Instr::mov(dcxt, Reg::R0));
        // Swap the runtime TLS base out of the application's TLS block.
        ilist.meta_append(Self::read_app_tls(Reg::R0));
        ilist.meta_append(Instr::ldr(stolen, Self::app_tls_swap(Reg::R0)));
        ilist.meta_append(self.tls(Reg::R1, TlsSlot::AppTlsSwap));
        ilist.meta_append(Instr::str(Reg::R1, Self::app_tls_swap(Reg::R0)));

        ilist.meta_append(Instr::restore_from_dc(
            dcxt,
            Reg::R0,
            dc.xflags_offset as i32,
        ));
        ilist.meta_append(Instr::msr(MSR_NZCVQG, Reg::R0));

        ilist.meta_append(Instr::restore_from_dc(
            dcxt,
            Reg::R0,
            dc.next_tag_offset as i32,
        ));
        ilist.meta_append(self.to_tls(Reg::R0, TlsSlot::FcacheTarget));

        // The application's stolen value lives in its TLS slot; the
        // register itself reloads as the TLS base.
        let stolen_off = self.dc_offset(stolen);
        ilist.meta_append(Instr::restore_from_dc(dcxt, Reg::R0, stolen_off));
        ilist.meta_append(self.to_tls(Reg::R0, TlsSlot::Stolen));
        ilist.meta_append(Instr::save_to_dc(dcxt, stolen, stolen_off));

        let ldm = Instr::ldm(BlockMode::Ia, dcxt, false, &Self::context_regs());
        let off = dc.r0_offset as i32;
        if off != 0 {
            ilist.meta_append(Instr::add_imm(dcxt, dcxt, off));
        }
        ilist.meta_append(ldm);
        ilist.meta_append(self.tls(Reg::PC, TlsSlot::FcacheTarget));
    }

    fn emit_fcache_return(&self, ilist: &mut InstrList) {
        let dc = self.cfg.dcontext;
        let stolen = self.stolen();
        let dcxt = REG_DCXT;

        ilist.meta_append(self.to_tls(dcxt, TlsSlot::DcontextBaseSpill));
        ilist.meta_append(self.tls(dcxt, TlsSlot::Dcontext));
        let stm = Instr::stm(BlockMode::Ia, dcxt, false, &Self::context_regs());
        self.at_reg_area(ilist, stm);

        // Slots that captured runtime values get the application's.
        let fixups = [
            (Reg::R0, DIRECT_STUB_SPILL_SLOT),
            (dcxt, TlsSlot::DcontextBaseSpill),
            (stolen, TlsSlot::Stolen),
        ];
        for (reg, slot) in fixups {
            ilist.meta_append(self.tls(Reg::R1, slot));
            ilist.meta_append(Instr::save_to_dc(
                dcxt,
                Reg::R1,
                self.dc_offset(reg),
            ));
        }

        // Steal the application's TLS swap slot again.
        ilist.meta_append(Self::read_app_tls(Reg::R1));
        ilist.meta_append(Instr::ldr(Reg::R2, Self::app_tls_swap(Reg::R1)));
        ilist.meta_append(self.to_tls(Reg::R2, TlsSlot::AppTlsSwap));
        ilist.meta_append(Instr::str(stolen, Self::app_tls_swap(Reg::R1)));

        ilist.meta_append(Instr::save_to_dc(
            dcxt,
            Reg::R0,
            dc.last_exit_offset as i32,
        ));
        ilist.meta_append(Instr::mrs(Reg::R0));
        ilist.meta_append(Instr::save_to_dc(
            dcxt,
            Reg::R0,
            dc.xflags_offset as i32,
        ));

        ilist.meta_append(Instr::mov(Reg::R0, dcxt));
        ilist.insert_reachable_cti(None, self.cfg.dispatch_pc, Reg::R1);
    }

    fn exit_stub_size(&self, ls: &Linkstub) -> usize {
        if ls.is_direct() {
            DIRECT_EXIT_STUB_SIZE
        } else {
            0
        }
    }

    /// Direct stub:
    ///
    /// ```text
    /// str  r0, [stolen, #slot0]
    /// movw r0, #lo(ls_addr)
    /// movt r0, #hi(ls_addr)
    /// ldr  pc, [stolen, #fcache_return]
    /// ```
    fn insert_exit_stub(
        &self,
        buf: &mut CodeBuffer,
        ls: &Linkstub,
        ls_addr: u32,
    ) -> Result<usize, LinkError> {
        if self.cfg.mangle.is_thumb() {
            return Err(LinkError::Unsupported(InstrShape::ThumbExitStub));
        }
        if !ls.is_direct() {
            return Err(LinkError::Unsupported(InstrShape::IndirectExitStub));
        }
        let stolen = self.stolen();
        let start = buf.offset();
        buf.emit_u32(encode::str_imm(
            Reg::R0,
            stolen,
            DIRECT_STUB_SPILL_SLOT.offset(),
        ));
        buf.emit_u32(encode::movw(Reg::R0, ls_addr as u16));
        buf.emit_u32(encode::movt(Reg::R0, (ls_addr >> 16) as u16));
        buf.emit_u32(encode::ldr_imm(
            Reg::PC,
            stolen,
            TlsSlot::FcacheReturn.offset(),
        ));
        debug_assert_eq!(buf.offset() - start, DIRECT_EXIT_STUB_SIZE);
        Ok(start)
    }

    fn emit_exit_branch(
        &self,
        buf: &mut CodeBuffer,
        target_offset: usize,
    ) -> usize {
        let off = buf.offset();
        let disp = branch_disp(off, target_offset);
        buf.emit_u32(encode::b(Cond::Al, disp));
        off
    }

    fn patch_branch(
        &self,
        buf: &CodeBuffer,
        branch_offset: usize,
        target_offset: usize,
    ) -> Result<(), LinkError> {
        let old = buf.read_u32(branch_offset);
        if !encode::is_branch(old) {
            return Err(LinkError::NotABranch(branch_offset));
        }
        let disp = branch_disp(branch_offset, target_offset);
        // Condition and opcode stay; only the displacement field moves.
        let new = (old & !encode::B_DISP_MASK)
            | ((disp >> 2) as u32 & encode::B_DISP_MASK);
        buf.patch_u32_atomic(branch_offset, new);
        debug!(branch_offset, target_offset, disp, "patched exit branch");
        Ok(())
    }
}

/// Byte displacement of an A32 branch at `from` to `to`.
fn branch_disp(from: usize, to: usize) -> i32 {
    let disp = to as i64 - (from as i64 + encode::PC_BIAS);
    assert!(disp & 3 == 0, "misaligned branch displacement {disp}");
    assert!(
        (encode::B_MIN_DISP..=encode::B_MAX_DISP).contains(&disp),
        "branch displacement {disp} out of range"
    );
    disp as i32
}
