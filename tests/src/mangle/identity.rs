use dbt_core::{
    AddrMode, BlockMode, Instr, InstrList, IsaMode, MemRef, MemSize, Reg,
};
use dbt_mangle::{mangle, needs_mangling};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use super::{app_list, arm_cfg, lines};

/// Registers that are neither the stolen register nor the pc.
const PLAIN: [Reg; 8] = [
    Reg::R0,
    Reg::R1,
    Reg::R2,
    Reg::R4,
    Reg::R7,
    Reg::R9,
    Reg::R12,
    Reg::LR,
];

fn pick(rng: &mut StdRng) -> Reg {
    PLAIN[rng.gen_range(0..PLAIN.len())]
}

fn random_plain(rng: &mut StdRng) -> Instr {
    let (d, s) = (pick(rng), pick(rng));
    let word = |disp| MemRef::base_disp(Reg::SP, disp, MemSize::Word);
    match rng.gen_range(0..6) {
        0 => Instr::mov(d, s),
        1 => Instr::add_imm(d, s, rng.gen_range(0..4096)),
        2 => Instr::ldr(d, word(4 * rng.gen_range(0..16))),
        3 => Instr::str(s, word(-4).with_mode(AddrMode::PreIndex)),
        4 => Instr::stm(BlockMode::Db, Reg::SP, true, &[d, s]),
        _ => Instr::ldm(BlockMode::Ia, s, false, &[d]),
    }
}

#[test]
fn plain_code_passes_through_untouched() {
    let cfg = arm_cfg();
    for seed in 0..32 {
        let mut rng = StdRng::seed_from_u64(seed);
        let instrs: Vec<Instr> =
            (0..20).map(|_| random_plain(&mut rng)).collect();
        assert!(instrs.iter().all(|i| !needs_mangling(&cfg, i)));
        let mut il = app_list(IsaMode::Arm, instrs);
        let before = lines(&il);
        let exits = mangle(&cfg, &mut il).unwrap();
        assert!(exits.is_empty());
        assert_eq!(lines(&il), before);
        assert!(il.iter().all(|i| i.is_app));
    }
}

#[test]
fn empty_list_mangles_to_nothing() {
    let mut il = InstrList::new();
    assert!(mangle(&arm_cfg(), &mut il).unwrap().is_empty());
    assert!(il.is_empty());
}
