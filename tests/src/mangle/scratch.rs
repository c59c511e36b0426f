use dbt_core::{BlockMode, Instr, MemRef, MemSize, Reg, RegSet, TlsSlot};
use dbt_mangle::scratch::{pick_any_scratch, try_pick_scratch};
use dbt_mangle::{pick_scratch, ScratchReg, SpillTracker};

use super::arm_cfg;

fn sc(reg: Reg, should_restore: bool) -> ScratchReg {
    ScratchReg {
        reg,
        slot: TlsSlot::for_scratch(reg),
        should_restore,
    }
}

#[test]
fn prefers_lowest_untouched_register() {
    let cfg = arm_cfg();
    let i = Instr::add_imm(Reg::R4, Reg::R5, 1);
    assert_eq!(pick_scratch(&cfg, &i, RegSet::EMPTY), sc(Reg::R0, true));
    let i = Instr::mov(Reg::R0, Reg::R1);
    assert_eq!(pick_scratch(&cfg, &i, RegSet::EMPTY), sc(Reg::R2, true));
}

#[test]
fn honours_avoid_set() {
    let cfg = arm_cfg();
    let i = Instr::add_imm(Reg::R4, Reg::R5, 1);
    let avoid = RegSet::EMPTY.set(Reg::R0).set(Reg::R1);
    assert_eq!(pick_scratch(&cfg, &i, avoid), sc(Reg::R2, true));
}

#[test]
fn control_transfers_never_get_the_branch_target_register() {
    let cfg = arm_cfg();
    let i = Instr::bx(Reg::R0);
    let avoid = RegSet::EMPTY.set(Reg::R1);
    assert_eq!(pick_scratch(&cfg, &i, avoid), sc(Reg::R3, true));
}

#[test]
fn falls_back_to_a_written_register() {
    let cfg = arm_cfg();
    let regs = [Reg::R0, Reg::R1, Reg::R2, Reg::R3, Reg::R4, Reg::R5];
    let ldm = Instr::ldm(BlockMode::Ia, Reg::R6, false, &regs);
    assert_eq!(pick_scratch(&cfg, &ldm, RegSet::EMPTY), sc(Reg::R0, false));
}

#[test]
fn exhaustion_is_reported() {
    let cfg = arm_cfg();
    let regs = [Reg::R0, Reg::R1, Reg::R2, Reg::R3, Reg::R4, Reg::R5];
    let stm = Instr::stm(BlockMode::Ia, Reg::R6, false, &regs);
    assert_eq!(try_pick_scratch(&cfg, &stm, RegSet::EMPTY), None);
}

#[test]
#[should_panic(expected = "no scratch register available")]
fn pick_scratch_panics_on_exhaustion() {
    let cfg = arm_cfg();
    let regs = [Reg::R0, Reg::R1, Reg::R2, Reg::R3, Reg::R4, Reg::R5];
    let stm = Instr::stm(BlockMode::Ia, Reg::R6, false, &regs);
    pick_scratch(&cfg, &stm, RegSet::EMPTY);
}

#[test]
fn pick_any_ignores_operands() {
    let cfg = arm_cfg();
    let avoid = RegSet::EMPTY.set(Reg::R0);
    assert_eq!(pick_any_scratch(&cfg, avoid), sc(Reg::R1, true));
}

#[test]
fn written_register_with_memory_read_is_not_reused() {
    let cfg = arm_cfg();
    // ldr r0, [r0]: r0 is read as the base.
    let i = Instr::ldr(Reg::R0, MemRef::base_disp(Reg::R0, 0, MemSize::Word));
    assert_eq!(pick_scratch(&cfg, &i, RegSet::EMPTY), sc(Reg::R1, true));
}

#[test]
fn spill_tracker_spills_each_register_once() {
    let mut t = SpillTracker::default();
    assert!(t.claim(sc(Reg::R0, true)));
    assert!(!t.claim(sc(Reg::R0, true)));
    assert!(t.claim(sc(Reg::R3, true)));
    assert!(!t.claim(sc(Reg::R1, false)));
    assert!(t.live().contains(Reg::R1));

    let order: Vec<Reg> = t.restores().map(|s| s.reg).collect();
    assert_eq!(order, vec![Reg::R3, Reg::R0]);
}
