//! Control-transfer mangling.
//!
//! Every indirect transfer ends with its target in the branch-target
//! register and the original instruction gone (or redirected away from the
//! PC); the exit itself is emitted later from the returned linkstub.

use dbt_core::linkstub::lsflags;
use dbt_core::{
    architectural_pc_for, AddrMode, IndirectKind, Instr, InstrShape, IsaMode,
    Linkstub, MangleConfig, MangleError, MemRef, MemSize, Opcode,
    Operand, Reg, Shift, TlsSlot, IBL_TARGET_REG, IBL_TARGET_SLOT,
};
use tracing::debug;

use crate::special_reg::SpecialOutcome;
use crate::window::Window;

/// `mov pc, rN` with a plain register source.
fn is_mov_to_pc(instr: &Instr) -> bool {
    instr.opcode == Opcode::Mov
        && instr.dsts.first().is_some_and(|d| d.is_reg(Reg::PC))
        && matches!(instr.srcs.first(), Some(Operand::Reg(_)))
}

/// Target register of a branch-by-register form.
fn reg_target(instr: &Instr) -> Option<Reg> {
    match instr.opcode {
        Opcode::BlxInd | Opcode::Bx | Opcode::Bxj => instr.srcs[0].reg(),
        _ if is_mov_to_pc(instr) => instr.srcs[0].reg(),
        _ => None,
    }
}

/// Transfers whose only stolen-register use is the target operand; the
/// target is then read from its TLS slot instead of swapping.
pub(crate) fn handles_stolen_target(cfg: &MangleConfig, instr: &Instr) -> bool {
    reg_target(instr) == Some(cfg.stolen_reg())
}

/// Reject transfer shapes with no rewrite before any list surgery.
pub(crate) fn check_supported(w: &Window<'_>) -> Result<(), MangleError> {
    let instr = &w.orig;
    let stolen = w.stolen();
    match instr.opcode {
        Opcode::Blx => return Err(w.unsupported(InstrShape::ModeSwitchCall)),
        Opcode::Rfe | Opcode::Eret => {
            return Err(w.unsupported(InstrShape::ExceptionReturn));
        }
        Opcode::Movs | Opcode::Subs if instr.writes_pc() => {
            return Err(w.unsupported(InstrShape::ExceptionReturn));
        }
        Opcode::Tbb | Opcode::Tbh => {
            if instr.uses_reg(stolen) {
                return Err(w.unsupported(InstrShape::TableBranchStolen));
            }
            let index = instr.srcs[0].mem().and_then(|m| m.index);
            if index == Some(Reg::PC) {
                return Err(w.unsupported(InstrShape::TableBranchPcIndex));
            }
        }
        _ => {}
    }
    if reg_target(instr) == Some(Reg::PC) {
        return Err(w.unsupported(InstrShape::IndirectToPc));
    }
    if instr.is_exit_branch() && instr.uses_reg(stolen) {
        return Err(w.unsupported(InstrShape::DirectBranchStolen));
    }
    if instr.writes_pc()
        && !instr.writes_gpr_list()
        && reg_target(instr).is_none()
        && instr.writes_reg(IBL_TARGET_REG)
    {
        return Err(w.unsupported(InstrShape::BranchTargetClobbered));
    }
    Ok(())
}

/// Rewrite the control transfer in the window. Returns the exit it
/// produces, if any.
pub(crate) fn mangle_cti(
    w: &mut Window<'_>,
    special: SpecialOutcome,
) -> Result<Option<Linkstub>, MangleError> {
    let pc = w.pc();
    if special == SpecialOutcome::ListPcLoaded {
        let m = w.orig.list_mem();
        let kind = if m.is_some_and(|m| m.base == Reg::SP && m.writeback()) {
            IndirectKind::Return
        } else {
            IndirectKind::Jump
        };
        return Ok(Some(Linkstub::indirect(pc, kind)));
    }
    let instr = w.orig.clone();
    let ls = match instr.opcode {
        // Left in place; the exit is linked through its own target.
        Opcode::B | Opcode::Cbz | Opcode::Cbnz => {
            Some(Linkstub::direct(pc, direct_target(&instr)))
        }
        Opcode::Bl => Some(mangle_direct_call(w)),
        Opcode::BlxInd => Some(mangle_indirect_call(w)),
        Opcode::Bx | Opcode::Bxj => Some(mangle_indirect_jump(w)),
        Opcode::Tbb | Opcode::Tbh => Some(mangle_table_branch(w)),
        _ if is_mov_to_pc(&instr) => Some(mangle_indirect_jump(w)),
        _ if instr.writes_pc() => Some(mangle_pc_dst(w)),
        _ => None,
    };
    Ok(ls)
}

/// Return address of a call, with the mode bit in Thumb.
fn return_address(w: &Window<'_>) -> u32 {
    let next = w.orig.next_app_pc().unwrap_or(0);
    next | w.cfg.isa().mode_bit()
}

fn direct_target(instr: &Instr) -> u32 {
    match instr.srcs.first() {
        Some(Operand::PcRel(t)) => *t,
        _ => unreachable!("direct branch without a target: {instr}"),
    }
}

/// `lr <- return address`, plus a predicated `b target` when the call was
/// conditional. The call itself goes away.
fn mangle_direct_call(w: &mut Window<'_>) -> Linkstub {
    let pred = w.pred();
    let target = direct_target(&w.orig);
    let retaddr = return_address(w);
    debug!(pc = w.pc(), target, retaddr, "mangling direct call");
    w.pre_mov_immed(retaddr, Reg::LR, pred);
    if pred.is_some() {
        let app_pc = w.pc();
        let len = w.orig.app_len;
        let pos = w.instr;
        // Exit branch: attributed to the call, not runtime code.
        w.ilist
            .insert_before(pos, Instr::b(target).pred(pred).app(app_pc, len));
    }
    w.remove_instr();
    Linkstub::direct(w.pc(), target).with_flags(lsflags::LINK_CALL)
}

/// Copy the target register into the branch-target register. A stolen
/// target is read from its TLS slot.
fn load_reg_target(w: &mut Window<'_>, target: Reg) {
    let pred = w.pred();
    w.spill_at_start(IBL_TARGET_REG, IBL_TARGET_SLOT);
    if target == IBL_TARGET_REG {
        return;
    }
    let load = if target == w.stolen() {
        Instr::restore_from_tls(w.cfg, IBL_TARGET_REG, TlsSlot::Stolen)
    } else {
        Instr::mov(IBL_TARGET_REG, target)
    };
    w.pre(load.pred(pred));
}

fn mangle_indirect_call(w: &mut Window<'_>) -> Linkstub {
    let target = reg_target(&w.orig).unwrap_or(IBL_TARGET_REG);
    debug!(pc = w.pc(), target = target.name(), "mangling indirect call");
    load_reg_target(w, target);
    let retaddr = return_address(w);
    let pred = w.pred();
    w.pre_mov_immed(retaddr, Reg::LR, pred);
    w.remove_instr();
    Linkstub::indirect(w.pc(), IndirectKind::Call)
}

/// `bx rN`, `bxj rN`, `mov pc, rN`. Returns go through here too.
fn mangle_indirect_jump(w: &mut Window<'_>) -> Linkstub {
    let target = reg_target(w.cur()).unwrap_or(IBL_TARGET_REG);
    debug!(pc = w.pc(), target = target.name(), "mangling indirect jump");
    load_reg_target(w, target);
    w.remove_instr();
    let kind = if target == Reg::LR {
        IndirectKind::Return
    } else {
        IndirectKind::Jump
    };
    Linkstub::indirect(w.pc(), kind)
}

/// `r2 += pc` as one add per non-zero byte of the PC value.
fn add_pc_slices(w: &mut Window<'_>, pc: u32) {
    let pred = w.pred();
    for shift in (0..32).step_by(8) {
        let slice = pc & (0xff << shift);
        if slice != 0 {
            w.pre(
                Instr::add_imm(IBL_TARGET_REG, IBL_TARGET_REG, slice as i32)
                    .pred(pred),
            );
        }
    }
}

/// `tbb [base, index]` / `tbh [base, index, lsl #1]`: the target is
/// `pc + 2 * table[index]`, in Thumb.
fn mangle_table_branch(w: &mut Window<'_>) -> Linkstub {
    let pred = w.pred();
    let half = w.orig.opcode == Opcode::Tbh;
    let Some(m) = w.orig.srcs[0].mem() else {
        unreachable!("table branch without a table operand");
    };
    let index = m.index.unwrap_or(Reg::R0);
    let pc = architectural_pc_for(w.pc(), IsaMode::Thumb);
    debug!(pc = w.pc(), half, "mangling table branch");
    w.spill_at_start(IBL_TARGET_REG, IBL_TARGET_SLOT);
    let t = IBL_TARGET_REG;
    let size = if half { MemSize::Half } else { MemSize::Byte };
    let load = |mem: MemRef| {
        if half {
            Instr::ldrh(t, mem)
        } else {
            Instr::ldrb(t, mem)
        }
    };
    if m.base == Reg::PC {
        // Fold the constant table base into the index.
        if half {
            w.pre(Instr::lsl_imm(t, index, 1).pred(pred));
        } else if index != t {
            w.pre(Instr::mov(t, index).pred(pred));
        }
        add_pc_slices(w, pc);
        w.pre(load(MemRef::base_disp(t, 0, size)).pred(pred));
    } else {
        let shift = half.then(|| Shift::lsl(1));
        w.pre(load(MemRef::base_index(m.base, index, shift, size)).pred(pred));
    }
    w.pre(Instr::lsl_imm(t, t, 1).pred(pred));
    add_pc_slices(w, pc);
    w.pre(Instr::orr_imm(t, t, 1).pred(pred));
    w.remove_instr();
    Linkstub::indirect(w.pc(), IndirectKind::Jump)
}

/// Any other instruction writing the PC: write the branch-target register
/// instead and keep the rest of the instruction.
fn mangle_pc_dst(w: &mut Window<'_>) -> Linkstub {
    debug!(pc = w.pc(), "redirecting pc destination");
    w.spill_at_start(IBL_TARGET_REG, IBL_TARGET_SLOT);
    w.cur_mut().replace_dst_reg(Reg::PC, IBL_TARGET_REG);
    let kind = match w.cur().srcs.first().and_then(|op| op.mem()) {
        Some(m)
            if w.cur().opcode == Opcode::Ldr
                && m.base == Reg::SP
                && m.mode == AddrMode::PostIndex =>
        {
            IndirectKind::Return
        }
        _ => IndirectKind::Jump,
    };
    Linkstub::indirect(w.pc(), kind)
}

/// Whether the exit produced for `instr` needs a predicated fall-through.
pub(crate) fn needs_fallthrough(instr: &Instr, ls: &Linkstub) -> bool {
    ls.is_indirect() && instr.is_predicated()
}
