//! System call mangling.

use dbt_core::{Instr, Reg, TlsSlot};
use tracing::debug;

use crate::window::Window;

/// Keep the TLS base in a callee-saved register across `svc`.
///
/// Any stolen register other than `r10` or `r11` is treated as clobbered
/// by the kernel: the TLS base rides in `r10` for the duration of the
/// call, with `r10`'s application value parked in scratch slot 0.
pub(crate) fn mangle_syscall(w: &mut Window<'_>) {
    let stolen = w.stolen();
    if matches!(stolen, Reg::R10 | Reg::R11) {
        return;
    }
    debug!(pc = w.pc(), stolen = stolen.name(), "mangling syscall");
    let cfg = w.cfg;
    let slot = TlsSlot::Reg(0);
    w.pre(Instr::save_to_tls(cfg, Reg::R10, slot));
    w.pre(Instr::mov(Reg::R10, stolen));
    w.post(Instr::mov(stolen, Reg::R10));
    w.post(Instr::restore_from_tls(cfg, Reg::R10, slot));
}
