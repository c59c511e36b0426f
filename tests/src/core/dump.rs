use dbt_core::dump::{dump_ilist, ilist_lines};
use dbt_core::{
    AddrMode, BlockMode, Cond, Instr, InstrList, MangleConfig, MemRef,
    MemSize, Reg, TlsSlot,
};

#[test]
fn formats_memory_operands() {
    let word = |disp| MemRef::base_disp(Reg::SP, disp, MemSize::Word);
    assert_eq!(Instr::ldr(Reg::R0, word(0)).to_string(), "ldr r0, [sp]");
    assert_eq!(
        Instr::ldr(Reg::PC, word(4).with_mode(AddrMode::PostIndex))
            .to_string(),
        "ldr pc, [sp], #4"
    );
    assert_eq!(
        Instr::str(Reg::R1, word(-4).with_mode(AddrMode::PreIndex))
            .to_string(),
        "str r1, [sp, #-4]!"
    );
    assert_eq!(
        Instr::table_branch(true, Reg::R1, Reg::R2).to_string(),
        "tbh [r1, r2, lsl #1]"
    );
}

#[test]
fn formats_block_transfers() {
    let pop = Instr::ldm(BlockMode::Ia, Reg::SP, true, &[Reg::R4, Reg::PC]);
    assert_eq!(pop.to_string(), "ldm sp!, {r4, pc}");
    let push = Instr::stm(BlockMode::Db, Reg::SP, true, &[Reg::LR, Reg::R4]);
    assert_eq!(push.to_string(), "stmdb sp!, {r4, lr}");
}

#[test]
fn formats_predicates_and_tls_spills() {
    let cfg = MangleConfig::default();
    let i = Instr::restore_from_tls(&cfg, Reg::R2, TlsSlot::Reg(2))
        .pred(Some(Cond::Ne));
    assert_eq!(i.to_string(), "ldrne r2, [r10, #8]");
    assert_eq!(Instr::bl(0x8000).to_string(), "bl 0x00008000");
}

#[test]
fn dump_marks_application_instructions() {
    let mut il = InstrList::new();
    il.meta_append(Instr::nop());
    il.append(Instr::bx(Reg::LR).app(0x1000, 4));
    let mut out = Vec::new();
    dump_ilist(&il, &mut out).unwrap();
    let text = String::from_utf8(out).unwrap();
    assert_eq!(text, " nop\n ---- 0x00001000\n bx lr\n");
    assert_eq!(ilist_lines(&il), vec!["nop", "bx lr"]);
}
