//! Application-instruction mangling for ARM.
//!
//! Rewrites a decoded instruction list so it can run from the code cache:
//! the stolen register and the PC read as the application expects, and
//! every control transfer is reduced to a direct exit or to a target in the
//! branch-target register.

mod cti;
pub mod predicate;
pub mod scratch;
mod special_reg;
mod syscall;
mod window;

use dbt_core::{
    Instr, InstrId, InstrList, Linkstub, MangleConfig, MangleError, Operand,
};
use tracing::debug;

use crate::window::Window;

pub use scratch::{pick_scratch, ScratchReg, SpillTracker};

/// Mangle every application instruction in `ilist`.
///
/// Returns one linkstub per exit, in list order. On error `ilist` is left
/// as it was.
pub fn mangle(
    cfg: &MangleConfig,
    ilist: &mut InstrList,
) -> Result<Vec<Linkstub>, MangleError> {
    let mut work = ilist.clone();
    let exits = mangle_list(cfg, &mut work)?;
    *ilist = work;
    Ok(exits)
}

fn mangle_list(
    cfg: &MangleConfig,
    ilist: &mut InstrList,
) -> Result<Vec<Linkstub>, MangleError> {
    let mut exits = Vec::new();
    let mut cur = ilist.first();
    while let Some(id) = cur {
        let instr = ilist.get(id);
        if !instr.is_app
            || instr.opcode.is_marker()
            || !needs_mangling(cfg, instr)
        {
            cur = ilist.next(id);
            continue;
        }
        let (ls, next) = mangle_instr(cfg, ilist, id)?;
        exits.extend(ls);
        cur = next;
    }
    Ok(exits)
}

/// Whether `instr` observes the stolen register or the PC, transfers
/// control, or traps.
pub fn needs_mangling(cfg: &MangleConfig, instr: &Instr) -> bool {
    instr.is_cti()
        || instr.reads_pc()
        || instr.uses_reg(cfg.stolen_reg())
        || instr.is_syscall()
        || instr.srcs.iter().any(|op| matches!(op, Operand::PcRel(_)))
}

/// Mangle one application instruction. Returns its exit, if any, and the
/// position to resume at.
fn mangle_instr(
    cfg: &MangleConfig,
    ilist: &mut InstrList,
    id: InstrId,
) -> Result<(Option<Linkstub>, Option<InstrId>), MangleError> {
    let in_block = cfg.is_thumb() && ilist.get(id).is_predicated();
    let next = if in_block {
        predicate::extract(ilist, id)
    } else {
        ilist.next(id)
    };

    let mut w = Window::new(cfg, ilist, id, next);
    debug!(pc = w.pc(), instr = %w.orig, "mangling");
    cti::check_supported(&w)?;
    let special = special_reg::mangle_special_regs(&mut w)?;
    if w.orig.is_syscall() {
        syscall::mangle_syscall(&mut w);
    }
    let mut ls = cti::mangle_cti(&mut w, special)?;
    w.finish_spills();
    let start = w.start;
    let orig = w.orig.clone();

    if let Some(ls) = ls.as_mut() {
        if cti::needs_fallthrough(&orig, ls) {
            predicate::add_predicated_fallthrough(
                cfg, ilist, &orig, start, next, ls,
            );
        }
    }
    if in_block {
        let first = ilist.next_from(start);
        predicate::reinstate(ilist, first, next);
    }
    Ok((ls, next))
}
