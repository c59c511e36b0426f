//! Code-cache linkage: the context switches into and out of the cache,
//! per-exit stubs, and patching of exit branches for fragment linking.

pub mod arm;
pub mod code_buffer;

pub use arm::{Arm32Linkage, LinkageConfig};
pub use code_buffer::CodeBuffer;

use dbt_core::{InstrList, InstrShape, Linkstub};
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum LinkError {
    #[error("cannot generate linkage for {0}")]
    Unsupported(InstrShape),
    #[error("word at offset {0:#x} is not a direct branch")]
    NotABranch(usize),
}

/// Trait for the per-architecture linkage generator.
///
/// The enter and return sequences are produced as instruction lists for an
/// external encoder; stubs and exit branches have fixed shapes and are
/// written straight into the cache.
pub trait CacheLinkage {
    /// Switch from runtime to application state and jump to the fragment
    /// recorded in the dcontext. Expects the dcontext pointer in `r0`.
    fn emit_fcache_enter(&self, ilist: &mut InstrList);

    /// Save application state into the dcontext, record the exit taken
    /// (linkstub address in `r0`), and jump to the dispatcher.
    fn emit_fcache_return(&self, ilist: &mut InstrList);

    /// Size in bytes of the stub [`insert_exit_stub`] emits for `ls`.
    ///
    /// [`insert_exit_stub`]: CacheLinkage::insert_exit_stub
    fn exit_stub_size(&self, ls: &Linkstub) -> usize;

    /// Emit the exit stub for `ls` at the current offset. `ls_addr` is the
    /// value handed to the return sequence to identify the exit. Returns
    /// the stub's offset.
    fn insert_exit_stub(
        &self,
        buf: &mut CodeBuffer,
        ls: &Linkstub,
        ls_addr: u32,
    ) -> Result<usize, LinkError>;

    /// Emit a patchable unconditional branch to `target_offset`. Returns
    /// the branch's offset.
    fn emit_exit_branch(
        &self,
        buf: &mut CodeBuffer,
        target_offset: usize,
    ) -> usize;

    /// Retarget the exit branch at `branch_offset` to `target_offset`.
    ///
    /// Takes `&self` and `&CodeBuffer` so linking can happen while other
    /// threads execute the fragment.
    fn patch_branch(
        &self,
        buf: &CodeBuffer,
        branch_offset: usize,
        target_offset: usize,
    ) -> Result<(), LinkError>;
}
