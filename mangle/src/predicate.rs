//! IT-block bookkeeping around mangled Thumb instructions.
//!
//! Mangling inserts unpredicated runtime code next to predicated
//! application instructions, which an IT block cannot hold. The
//! instruction is first pulled out of its block, mangled as if it stood
//! alone, and the blocks are then rebuilt over the result.

use dbt_core::linkstub::lsflags;
use dbt_core::{
    Cond, Instr, InstrId, InstrList, Linkstub, MangleConfig, IBL_TARGET_REG,
};
use tracing::trace;

/// Marker of the IT block covering `id` and the number of covered
/// instructions before it.
fn find_marker(ilist: &InstrList, id: InstrId) -> Option<(InstrId, usize)> {
    let mut prior = 0usize;
    let mut cur = ilist.prev(id);
    while let Some(p) = cur {
        let i = ilist.get(p);
        if i.is_block_marker() {
            return (prior < i.it_count()).then_some((p, prior));
        }
        if !i.is_label() {
            if !i.is_predicated() {
                return None;
            }
            prior += 1;
        }
        cur = ilist.prev(p);
    }
    None
}

/// Detach predicated `id` from its IT block.
///
/// The block is split into a marker for the instructions before `id` and a
/// marker for those after it, placed right after `id`. Returns the
/// position following `id` (the second marker when there is one).
///
/// Only a conditional exit branch may lack a block: Thumb encodes those
/// with their own condition field.
pub fn extract(ilist: &mut InstrList, id: InstrId) -> Option<InstrId> {
    let instr = ilist.get(id);
    if !instr.is_predicated() {
        return ilist.next(id);
    }
    let Some((marker, prior)) = find_marker(ilist, id) else {
        assert!(
            instr.is_exit_branch(),
            "predicated `{instr}` outside an IT block"
        );
        return ilist.next(id);
    };

    let conds = ilist.get(marker).it_conds();
    assert_eq!(
        instr.pred,
        Some(conds[prior]),
        "predicate of `{instr}` disagrees with its IT slot"
    );
    trace!(
        before = prior,
        after = conds.len() - prior - 1,
        "splitting IT block"
    );
    if prior > 0 {
        ilist.meta_insert_before(Some(marker), Instr::it(&conds[..prior]));
    }
    let after = &conds[prior + 1..];
    if !after.is_empty() {
        ilist.meta_insert_after(Some(id), Instr::it(after));
    }
    ilist.remove(marker);
    ilist.next(id)
}

/// Whether `instr` may sit inside an IT block.
fn blockable(instr: &Instr) -> bool {
    instr.is_predicated() && !instr.is_exit_branch() && !instr.is_label()
}

/// Rebuild IT blocks over `[first, end)`.
///
/// Runs of up to four predicated instructions whose conditions share the
/// first one's base condition get a marker in front. A control transfer
/// closes its block. Existing markers keep the instructions they cover.
pub fn reinstate(
    ilist: &mut InstrList,
    first: Option<InstrId>,
    end: Option<InstrId>,
) {
    let mut pending: Vec<InstrId> = Vec::new();
    let mut cur = first;
    while let Some(id) = cur {
        if Some(id) == end {
            break;
        }
        let instr = ilist.get(id);
        if instr.is_block_marker() {
            let mut covered = instr.it_count();
            flush(ilist, &mut pending);
            let mut p = ilist.next(id);
            while covered > 0 {
                let Some(c) = p else { break };
                if Some(c) == end {
                    break;
                }
                if !ilist.get(c).is_label() {
                    covered -= 1;
                }
                p = ilist.next(c);
            }
            cur = p;
            continue;
        }
        if !blockable(instr) {
            flush(ilist, &mut pending);
            cur = ilist.next(id);
            continue;
        }
        let cond = instr.cond();
        if let Some(&head) = pending.first() {
            let first_cond = ilist.get(head).cond();
            if pending.len() == 4
                || (cond != first_cond && cond != first_cond.invert())
            {
                flush(ilist, &mut pending);
            }
        }
        pending.push(id);
        if ilist.get(id).is_cti() {
            flush(ilist, &mut pending);
        }
        cur = ilist.next(id);
    }
    flush(ilist, &mut pending);
}

fn flush(ilist: &mut InstrList, pending: &mut Vec<InstrId>) {
    let Some(&head) = pending.first() else {
        return;
    };
    let conds: Vec<Cond> =
        pending.iter().map(|&id| ilist.get(id).cond()).collect();
    trace!(count = conds.len(), cond = conds[0].name(), "IT block");
    ilist.meta_insert_before(Some(head), Instr::it(&conds));
    pending.clear();
}

/// Emulate the not-taken path of a predicated indirect transfer.
///
/// Runtime code in `(start, next)` takes on the instruction's predicate,
/// except for spills and restores, which must run either way. The
/// fall-through address is then loaded into the branch-target register
/// under the inverse condition, so the exit that follows is unconditional.
pub fn add_predicated_fallthrough(
    cfg: &MangleConfig,
    ilist: &mut InstrList,
    orig: &Instr,
    start: Option<InstrId>,
    next: Option<InstrId>,
    ls: &mut Linkstub,
) {
    let Some(pred) = orig.pred else {
        return;
    };
    let stolen = cfg.stolen_reg();
    for id in ilist.range(ilist.next_from(start), next) {
        let i = ilist.get_mut(id);
        if i.is_meta
            && i.pred.is_none()
            && !i.is_label()
            && !i.is_reg_spill_or_restore(stolen)
        {
            i.set_pred(Some(pred));
        }
    }
    let fall = orig.next_app_pc().unwrap_or(0) | cfg.isa().mode_bit();
    trace!(fall, cond = pred.invert().name(), "predicated fall-through");
    ilist.insert_mov_immed(next, fall, IBL_TARGET_REG, Some(pred.invert()));
    ls.flags |= lsflags::LINK_PREDICATED_FALLTHROUGH;
}
