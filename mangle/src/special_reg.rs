//! Virtualization of the stolen register and the PC.
//!
//! Inside the code cache the stolen register holds the runtime TLS base and
//! the PC holds a cache address. Application instructions that observe
//! either are rewritten so they see the application's values instead:
//!
//! 1. `stm` whose list holds the stolen register or the PC, or whose base
//!    is the stolen register: memory slots are patched after the store.
//! 2. `ldm` whose list holds the stolen register or the PC: split so no
//!    piece writes either register directly.
//! 3. Plain PC reads: the PC operand becomes a scratch register loaded
//!    with the application PC.
//! 4. Other stolen-register accesses: the instruction runs with the
//!    application value swapped into the stolen register.

use dbt_core::{
    architectural_pc_for, literal_base_for, AddrMode, BlockMode, Instr,
    InstrShape, MangleError, MemRef, MemSize, OpFlags, Opcode, Operand, Reg,
    RegSet, TlsSlot, IBL_TARGET_REG, IBL_TARGET_SLOT,
};
use tracing::debug;

use crate::cti;
use crate::scratch::{pick_any_scratch, ScratchReg, SCRATCH_CANDIDATES};
use crate::window::Window;

/// What the special-register pass did to the instruction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum SpecialOutcome {
    /// Nothing, or a rewrite that leaves control flow alone.
    Done,
    /// A register-list load had the PC in its list; the branch target now
    /// sits in the branch-target register and the load is gone.
    ListPcLoaded,
}

pub(crate) fn mangle_special_regs(
    w: &mut Window<'_>,
) -> Result<SpecialOutcome, MangleError> {
    let stolen = w.stolen();
    let instr = w.orig.clone();
    let list = instr.reg_list();

    if instr.reads_gpr_list() {
        let base_stolen = instr.list_mem().is_some_and(|m| m.base == stolen);
        if list.contains(stolen) || list.contains(Reg::PC) || base_stolen {
            mangle_gpr_list_read(w)?;
        }
        return Ok(SpecialOutcome::Done);
    }

    if instr.writes_gpr_list()
        && (list.contains(stolen) || list.contains(Reg::PC))
    {
        return mangle_gpr_list_write(w);
    }

    if !instr.flags().contains(OpFlags::CTI)
        && instr.srcs.iter().any(|op| matches!(op, Operand::PcRel(_)))
    {
        return Err(w.unsupported(InstrShape::PcRelOperand));
    }

    if instr.reads_pc() && !instr.flags().contains(OpFlags::TABLE) {
        mangle_pc_read(w);
    }

    if w.cur().uses_reg(stolen) && !cti::handles_stolen_target(w.cfg, &instr) {
        mangle_stolen_reg(w)?;
    }
    Ok(SpecialOutcome::Done)
}

fn list_parts(instr: &Instr) -> (MemRef, BlockMode, RegSet) {
    match (instr.list_mem(), instr.opcode.block_mode()) {
        (Some(m), Some(mode)) => (m, mode, instr.reg_list()),
        _ => unreachable!("not a block transfer: {instr}"),
    }
}

/// Offset of `reg`'s word from the base register's value after the
/// instruction (writeback applied).
fn slot_offset(m: &MemRef, mode: BlockMode, list: RegSet, reg: Reg) -> i32 {
    let n = list.count();
    let k = list.iter().take_while(|&r| r != reg).count() as i32;
    let delta = if m.writeback() {
        mode.writeback_delta(n)
    } else {
        0
    };
    mode.start_offset(n) + 4 * k - delta
}

fn word(base: Reg, disp: i32) -> MemRef {
    MemRef::base_disp(base, disp, MemSize::Word)
}

/// Rule 1: the store runs as-is (on a scratch base when the base is the
/// stolen register); afterwards every slot that captured a runtime value
/// is overwritten with the application value.
fn mangle_gpr_list_read(w: &mut Window<'_>) -> Result<(), MangleError> {
    let cfg = w.cfg;
    let stolen = w.stolen();
    let (m, mode, list) = list_parts(&w.orig);
    if m.base == Reg::PC {
        return Err(w.unsupported(InstrShape::RegListPcBase));
    }
    if m.writeback() && list.contains(m.base) {
        return Err(w.unsupported(InstrShape::RegListBaseInList));
    }
    debug!(pc = w.pc(), "mangling register-list store");
    let pred = w.pred();

    let mut base = m.base;
    let mut base_scratch = None;
    if m.base == stolen {
        let sc = match w.try_pick(RegSet::EMPTY) {
            Some(sc) if sc.should_restore => sc,
            _ => pick_any_scratch(cfg, w.claimed()),
        };
        w.claim(sc);
        w.pre(Instr::restore_from_tls(cfg, sc.reg, TlsSlot::Stolen));
        if let Some(Operand::Mem(mem)) = w.cur_mut().dsts.first_mut() {
            mem.base = sc.reg;
        }
        w.cur_mut().invalidate_raw();
        base = sc.reg;
        base_scratch = Some(sc);
    }

    let mut fixups: Vec<(Reg, Fixup)> = Vec::new();
    if list.contains(stolen) {
        fixups.push((stolen, Fixup::Tls(TlsSlot::Stolen)));
    }
    if let Some(sc) = base_scratch.filter(|sc| list.contains(sc.reg)) {
        fixups.push((sc.reg, Fixup::Tls(sc.slot)));
    }
    if list.contains(Reg::PC) {
        let pc = architectural_pc_for(w.pc(), cfg.isa());
        fixups.push((Reg::PC, Fixup::Imm(pc)));
    }

    if !fixups.is_empty() {
        let tmp = pick_any_scratch(cfg, w.claimed().set(base));
        w.claim(tmp);
        for (reg, fixup) in fixups {
            match fixup {
                Fixup::Tls(slot) => {
                    w.post(Instr::restore_from_tls(cfg, tmp.reg, slot));
                }
                Fixup::Imm(val) => w.post_mov_immed(val, tmp.reg, None),
            }
            let offs = slot_offset(&m, mode, list, reg);
            w.post(Instr::str(tmp.reg, word(base, offs)).pred(pred));
        }
    }

    // Writeback moved the application's stolen-register value.
    if m.base == stolen && m.writeback() {
        w.post(Instr::save_to_tls(cfg, base, TlsSlot::Stolen).pred(pred));
    }
    Ok(())
}

enum Fixup {
    Tls(TlsSlot),
    Imm(u32),
}

/// Rule 2: walk the list from the highest slot down with `ldmdb base!`
/// pieces, routing the stolen register through a scratch register into its
/// TLS slot, then load the PC slot into the branch-target register.
fn mangle_gpr_list_write(
    w: &mut Window<'_>,
) -> Result<SpecialOutcome, MangleError> {
    let cfg = w.cfg;
    let stolen = w.stolen();
    let (m, mode, list) = list_parts(&w.orig);
    if m.base == stolen {
        return Err(w.unsupported(InstrShape::RegListStolenBase));
    }
    if m.base == Reg::PC {
        return Err(w.unsupported(InstrShape::RegListPcBase));
    }
    if list.contains(m.base) {
        return Err(w.unsupported(InstrShape::RegListBaseInList));
    }
    debug!(pc = w.pc(), "mangling register-list load");
    let pred = w.pred();
    let base = m.base;
    let n = list.count();
    let start = mode.start_offset(n);
    let delta = if m.writeback() {
        mode.writeback_delta(n)
    } else {
        0
    };
    let walk: Vec<Reg> = list.clear(Reg::PC).iter().collect();

    let tmp = if list.contains(stolen) {
        let avoid = RegSet::EMPTY.set(base);
        let sc = match w.try_pick(avoid) {
            Some(sc) => sc,
            None => reloaded_scratch(w, list, avoid)?,
        };
        w.claim(sc);
        Some(sc)
    } else {
        None
    };

    // Point the base just past the highest walked slot.
    let top = start + 4 * walk.len() as i32;
    if top != 0 {
        w.pre(Instr::add_signed(base, base, top).pred(pred));
    }
    let mut run: Vec<Reg> = Vec::new();
    for &reg in walk.iter().rev() {
        if reg != stolen {
            run.push(reg);
            continue;
        }
        if !run.is_empty() {
            w.pre(Instr::ldm(BlockMode::Db, base, true, &run).pred(pred));
            run.clear();
        }
        let Some(sc) = tmp else {
            unreachable!("stolen register in list without a scratch");
        };
        let mem = word(base, -4).with_mode(AddrMode::PreIndex);
        w.pre(Instr::ldr(sc.reg, mem).pred(pred));
        w.pre(Instr::save_to_tls(cfg, sc.reg, TlsSlot::Stolen).pred(pred));
    }
    if !run.is_empty() {
        w.pre(Instr::ldm(BlockMode::Db, base, true, &run).pred(pred));
    }
    // The base now holds its original value plus `start`.
    if delta != start {
        w.pre(Instr::add_signed(base, base, delta - start).pred(pred));
    }

    let outcome = if list.contains(Reg::PC) {
        // The pieces above may have loaded the branch-target register, so
        // its spill must follow them.
        w.pre(Instr::save_to_tls(cfg, IBL_TARGET_REG, IBL_TARGET_SLOT));
        let offs = start + 4 * (n as i32 - 1) - delta;
        w.pre(Instr::ldr(IBL_TARGET_REG, word(base, offs)).pred(pred));
        SpecialOutcome::ListPcLoaded
    } else {
        SpecialOutcome::Done
    };
    w.remove_instr();
    Ok(outcome)
}

/// Scratch for a predicated `ldm` whose list covers every free candidate.
///
/// Those candidates count as read, since a failed predicate keeps their
/// values. A list register below the stolen one is loaded again after
/// the stolen piece under the same predicate, so it needs no restore.
fn reloaded_scratch(
    w: &Window<'_>,
    list: RegSet,
    avoid: RegSet,
) -> Result<ScratchReg, MangleError> {
    let avoid = avoid.union(w.claimed()).set(IBL_TARGET_REG);
    SCRATCH_CANDIDATES
        .into_iter()
        .find(|&r| r < w.stolen() && list.contains(r) && !avoid.contains(r))
        .map(|reg| ScratchReg {
            reg,
            slot: TlsSlot::for_scratch(reg),
            should_restore: false,
        })
        .ok_or_else(|| w.unsupported(InstrShape::NoListScratch))
}

/// Rule 3: substitute a scratch register holding the application PC.
fn mangle_pc_read(w: &mut Window<'_>) {
    let instr = w.cur();
    let mode = w.cfg.isa();
    // Literal loads and adr word-align the Thumb PC.
    let aligned = instr.srcs.iter().chain(&instr.dsts).any(|op| {
        matches!(op, Operand::Mem(m) if m.uses_reg(Reg::PC))
    }) || (matches!(instr.opcode, Opcode::Add | Opcode::Sub)
        && instr.srcs.iter().any(|op| op.imm().is_some()));
    let val = if aligned {
        literal_base_for(w.pc(), mode)
    } else {
        architectural_pc_for(w.pc(), mode)
    };
    debug!(pc = w.pc(), val, "mangling pc read");
    let sc = w.claim_scratch(RegSet::EMPTY);
    w.pre_mov_immed(val, sc.reg, None);
    w.cur_mut().replace_src_reg(Reg::PC, sc.reg);
}

/// Rule 4: swap the TLS base into a scratch register, run the instruction
/// on the application value, persist any write, swap back.
fn mangle_stolen_reg(w: &mut Window<'_>) -> Result<(), MangleError> {
    let cfg = w.cfg;
    let stolen = w.stolen();
    if w.orig.is_exit_branch() {
        return Err(w.unsupported(InstrShape::DirectBranchStolen));
    }
    let sc = match w.try_pick(RegSet::EMPTY) {
        Some(sc) if sc.should_restore => sc,
        _ => return Err(w.unsupported(InstrShape::NoStolenScratch)),
    };
    debug!(pc = w.pc(), scratch = sc.reg.name(), "mangling stolen reg");
    w.claim(sc);
    w.pre(Instr::mov(sc.reg, stolen));
    w.pre(Instr::restore_from_tls(cfg, stolen, TlsSlot::Stolen));
    if w.cur().writes_reg(stolen) {
        w.post(Instr::str(
            stolen,
            word(sc.reg, TlsSlot::Stolen.offset() as i32),
        ));
    }
    w.post(Instr::mov(stolen, sc.reg));
    Ok(())
}
