use dbt_backend::arm::encode;
use dbt_backend::arm::linkage::DIRECT_EXIT_STUB_SIZE;
use dbt_backend::code_buffer::CodeBuffer;
use dbt_backend::{Arm32Linkage, CacheLinkage, LinkError, LinkageConfig};
use dbt_core::config::APP_TLS_SWAP_OFFSET;
use dbt_core::dump::ilist_lines;
use dbt_core::{
    Cond, DcontextLayout, IndirectKind, InstrList, InstrShape, IsaMode,
    Linkstub, MangleConfig, Reg, TlsSlot,
};

use crate::sim::{Flags, Machine, Stop, TLS_BASE};

const DISPATCH: u32 = 0x4000_1000;
const DCONTEXT: u32 = 0x6000_0000;
const APP_TLS: u32 = 0x5000_0000;

fn linkage() -> Arm32Linkage {
    Arm32Linkage::new(LinkageConfig::new(MangleConfig::default(), DISPATCH))
}

fn linkage_with(stolen: Reg) -> Arm32Linkage {
    let cfg = MangleConfig::new(stolen, IsaMode::Arm).unwrap();
    Arm32Linkage::new(LinkageConfig::new(cfg, DISPATCH))
}

fn words(buf: &CodeBuffer, at: usize, n: usize) -> Vec<u32> {
    (0..n).map(|i| buf.read_u32(at + 4 * i)).collect()
}

// ---------------------------------------------------------------
// Exit stubs
// ---------------------------------------------------------------

#[test]
fn test_direct_exit_stub() {
    let mut buf = CodeBuffer::new(4096).unwrap();
    buf.emit_u32(0);
    let ls = Linkstub::direct(0x1000, 0x2000);
    let at = linkage().insert_exit_stub(&mut buf, &ls, 0x1234_5678);
    assert_eq!(at, Ok(4));
    assert_eq!(buf.offset(), 4 + DIRECT_EXIT_STUB_SIZE);
    assert_eq!(
        words(&buf, 4, 4),
        vec![0xe58a0000, 0xe3050678, 0xe3410234, 0xe59af020]
    );
}

#[test]
fn test_direct_exit_stub_other_stolen_reg() {
    let mut buf = CodeBuffer::new(4096).unwrap();
    let ls = Linkstub::direct(0x1000, 0x2000);
    linkage_with(Reg::R12)
        .insert_exit_stub(&mut buf, &ls, 0x0000_0301)
        .unwrap();
    assert_eq!(
        words(&buf, 0, 4),
        vec![0xe58c0000, 0xe3000301, 0xe3400000, 0xe59cf020]
    );
}

#[test]
fn test_exit_stub_size() {
    let l = linkage();
    let direct = Linkstub::direct(0x1000, 0x2000);
    let indirect = Linkstub::indirect(0x1000, IndirectKind::Return);
    assert_eq!(l.exit_stub_size(&direct), DIRECT_EXIT_STUB_SIZE);
    assert_eq!(l.exit_stub_size(&indirect), 0);
}

#[test]
fn test_indirect_exit_stub_unsupported() {
    let mut buf = CodeBuffer::new(4096).unwrap();
    let ls = Linkstub::indirect(0x1000, IndirectKind::Jump);
    assert_eq!(
        linkage().insert_exit_stub(&mut buf, &ls, 0),
        Err(LinkError::Unsupported(InstrShape::IndirectExitStub))
    );
    assert_eq!(buf.offset(), 0);
}

#[test]
fn test_thumb_exit_stub_unsupported() {
    let cfg = MangleConfig::default().with_isa(IsaMode::Thumb);
    let l = Arm32Linkage::new(LinkageConfig::new(cfg, DISPATCH));
    let mut buf = CodeBuffer::new(4096).unwrap();
    let ls = Linkstub::direct(0x1000, 0x2000);
    let err = l.insert_exit_stub(&mut buf, &ls, 0).unwrap_err();
    assert_eq!(err, LinkError::Unsupported(InstrShape::ThumbExitStub));
    assert_eq!(buf.offset(), 0);
}

// ---------------------------------------------------------------
// Exit branches
// ---------------------------------------------------------------

#[test]
fn test_exit_branch_forward_and_back() {
    let l = linkage();
    let mut buf = CodeBuffer::new(4096).unwrap();
    assert_eq!(l.emit_exit_branch(&mut buf, 16), 0);
    assert_eq!(buf.read_u32(0), 0xea000002);

    buf.set_offset(0x40);
    assert_eq!(l.emit_exit_branch(&mut buf, 0), 0x40);
    assert_eq!(buf.read_u32(0x40), 0xeaffffee);
}

#[test]
fn test_patch_branch() {
    let l = linkage();
    let mut buf = CodeBuffer::new(4096).unwrap();
    l.emit_exit_branch(&mut buf, 4);
    assert_eq!(buf.read_u32(0), 0xeaffffff);

    l.patch_branch(&buf, 0, 0x100).unwrap();
    assert_eq!(buf.read_u32(0), 0xea00003e);
    l.patch_branch(&buf, 0, 4).unwrap();
    assert_eq!(buf.read_u32(0), 0xeaffffff);
}

#[test]
fn test_patch_branch_keeps_condition() {
    let mut buf = CodeBuffer::new(4096).unwrap();
    buf.emit_u32(encode::b(Cond::Eq, 0));
    linkage().patch_branch(&buf, 0, 0x100).unwrap();
    assert_eq!(buf.read_u32(0), 0x0a00003e);
}

#[test]
fn test_patch_non_branch() {
    let mut buf = CodeBuffer::new(4096).unwrap();
    buf.emit_u32(0);
    buf.emit_u32(0xe1a00000);
    assert_eq!(
        linkage().patch_branch(&buf, 4, 0x100),
        Err(LinkError::NotABranch(4))
    );
    assert_eq!(buf.read_u32(4), 0xe1a00000);
}

#[test]
#[should_panic(expected = "out of range")]
fn test_patch_branch_out_of_range() {
    let l = linkage();
    let mut buf = CodeBuffer::new(4096).unwrap();
    l.emit_exit_branch(&mut buf, 0);
    let _ = l.patch_branch(&buf, 0, (1 << 25) + 12);
}

#[test]
fn test_link_error_display() {
    assert_eq!(
        LinkError::NotABranch(0x40).to_string(),
        "word at offset 0x40 is not a direct branch"
    );
}

// ---------------------------------------------------------------
// Context switch sequences
// ---------------------------------------------------------------

fn enter_list(l: &Arm32Linkage) -> InstrList {
    let mut il = InstrList::new();
    l.emit_fcache_enter(&mut il);
    il
}

fn return_list(l: &Arm32Linkage) -> InstrList {
    let mut il = InstrList::new();
    l.emit_fcache_return(&mut il);
    il
}

fn dc_reg(dc: &DcontextLayout, r: usize) -> u32 {
    DCONTEXT + dc.r0_offset + 4 * r as u32
}

/// Runtime-side machine about to enter the cache: saved application
/// state in the dcontext, runtime TLS base parked in the application's
/// TLS block.
fn runtime_machine(dc: &DcontextLayout, next_tag: u32) -> Machine {
    let mut m = Machine::new(IsaMode::Arm);
    m.tpidruro = APP_TLS;
    m.set(Reg::R0, DCONTEXT);
    for r in 0..15 {
        m.write_u32(dc_reg(dc, r), 0x1000_0000 + 0x111 * r as u32);
    }
    m.write_u32(DCONTEXT + dc.xflags_offset, 0x6000_0000);
    m.write_u32(DCONTEXT + dc.next_tag_offset, next_tag);
    m.write_u32(APP_TLS + APP_TLS_SWAP_OFFSET, TLS_BASE);
    m.set_tls(TlsSlot::AppTlsSwap, 0xabcd_0123);
    m.set_tls(TlsSlot::Dcontext, DCONTEXT);
    m
}

#[test]
fn test_fcache_enter_restores_context() {
    let l = linkage();
    let dc = l.config().dcontext;
    let mut m = runtime_machine(&dc, 0x8000);
    let saved_r10 = m.read_u32(dc_reg(&dc, 10));

    assert_eq!(m.run(&enter_list(&l)), Stop::Branch(0x8000));

    for r in 0..15 {
        let expect = if r == 10 {
            TLS_BASE
        } else {
            0x1000_0000 + 0x111 * r as u32
        };
        assert_eq!(m.regs[r], expect, "r{r}");
    }
    assert_eq!(m.tls(TlsSlot::Stolen), saved_r10);
    assert_eq!(m.flags, Flags::from_word(0x6000_0000));
    assert_eq!(
        m.read_u32(APP_TLS + APP_TLS_SWAP_OFFSET),
        0xabcd_0123
    );
    assert_eq!(m.tls(TlsSlot::FcacheTarget), 0x8000);
}

#[test]
fn test_fcache_enter_with_offset_reg_area() {
    let mut cfg = LinkageConfig::new(MangleConfig::default(), DISPATCH);
    cfg.dcontext = DcontextLayout {
        r0_offset: 0x10,
        xflags_offset: 0x50,
        last_exit_offset: 0x54,
        next_tag_offset: 0x58,
    };
    let l = Arm32Linkage::new(cfg);
    let dc = cfg.dcontext;
    let mut m = runtime_machine(&dc, 0x9000);

    assert_eq!(m.run(&enter_list(&l)), Stop::Branch(0x9000));
    assert_eq!(m.reg(Reg::R0), 0x1000_0000);
    assert_eq!(m.reg(Reg::R5), 0x1000_0000 + 0x111 * 5);
    assert_eq!(m.reg(Reg::R10), TLS_BASE);
    assert_eq!(m.reg(Reg::LR), 0x1000_0000 + 0x111 * 14);
}

/// Machine sitting at the top of the return sequence, as left by a
/// direct exit stub.
fn exiting_machine(cfg: &MangleConfig, ls_addr: u32) -> Machine {
    let mut app = Machine::new(IsaMode::Arm);
    app.tpidruro = APP_TLS;
    for r in 0..15 {
        app.regs[r] = 0x2000_0000 + 0x10 * r as u32;
    }
    app.flags = Flags::from_word(0x9000_0000);
    let mut m = app.to_cache(cfg);
    m.set_tls(TlsSlot::Dcontext, DCONTEXT);
    m.write_u32(APP_TLS + APP_TLS_SWAP_OFFSET, 0x7777_0000);
    m.set_tls(TlsSlot::Reg(0), m.reg(Reg::R0));
    m.set(Reg::R0, ls_addr);
    m
}

#[test]
fn test_fcache_return_saves_context() {
    let l = linkage();
    let dc = l.config().dcontext;
    let mut m = exiting_machine(&l.config().mangle, 0x0000_0305);

    assert_eq!(m.run(&return_list(&l)), Stop::Branch(DISPATCH));

    for r in 0..15 {
        assert_eq!(
            m.read_u32(dc_reg(&dc, r)),
            0x2000_0000 + 0x10 * r as u32,
            "saved r{r}"
        );
    }
    assert_eq!(m.read_u32(DCONTEXT + dc.last_exit_offset), 0x305);
    assert_eq!(m.read_u32(DCONTEXT + dc.xflags_offset), 0x9000_0000);
    assert_eq!(m.tls(TlsSlot::AppTlsSwap), 0x7777_0000);
    assert_eq!(m.read_u32(APP_TLS + APP_TLS_SWAP_OFFSET), TLS_BASE);
    assert_eq!(m.reg(Reg::R0), DCONTEXT);
}

#[test]
fn test_return_then_enter_round_trip() {
    for stolen in [Reg::R8, Reg::R10, Reg::R12] {
        let l = linkage_with(stolen);
        let cfg = l.config().mangle;
        let dc = l.config().dcontext;
        let mut m = exiting_machine(&cfg, 0x42);
        let expect = {
            let mut regs = m.app_regs(&cfg);
            regs[0] = m.tls(TlsSlot::Reg(0));
            regs
        };

        assert_eq!(m.run(&return_list(&l)), Stop::Branch(DISPATCH));
        m.write_u32(DCONTEXT + dc.next_tag_offset, 0xa000);
        assert_eq!(m.run(&enter_list(&l)), Stop::Branch(0xa000));

        let regs = m.app_regs(&cfg);
        assert_eq!(regs[..15], expect[..15], "stolen {stolen}");
        assert_eq!(m.reg(stolen), TLS_BASE);
        assert_eq!(m.flags, Flags::from_word(0x9000_0000));
        assert_eq!(
            m.read_u32(APP_TLS + APP_TLS_SWAP_OFFSET),
            0x7777_0000
        );
    }
}

#[test]
fn test_fcache_return_ends_at_dispatch() {
    let lines = ilist_lines(&return_list(&linkage()));
    let tail: Vec<&str> =
        lines.iter().rev().take(3).rev().map(String::as_str).collect();
    assert_eq!(tail, ["movw r1, #0x1000", "movt r1, #0x4000", "mov pc, r1"]);
}
