//! Fragment lifecycle in the code cache.
//!
//! Fragments are emitted with every direct exit routed through its stub;
//! exits are then linked straight to target fragments as those appear, and
//! unlinked again when a target is evicted.

pub mod fragment_store;

pub use fragment_store::{Fragment, FragmentLinks, FragmentStore};

/// Exits per fragment addressable by an exit handle.
pub const MAX_EXITS: usize = 256;

/// Fragments addressable by an exit handle.
pub const MAX_FRAGMENTS: usize = 1 << 24;

/// Value a stub hands to the return sequence to identify its exit:
/// fragment index in the high bits, exit index in the low byte.
pub fn exit_handle(frag: usize, exit: usize) -> u32 {
    assert!(frag < MAX_FRAGMENTS, "fragment index {frag} out of range");
    assert!(exit < MAX_EXITS, "exit index {exit} out of range");
    ((frag as u32) << 8) | exit as u32
}

/// Inverse of [`exit_handle`].
pub fn decode_exit_handle(handle: u32) -> (usize, usize) {
    ((handle >> 8) as usize, (handle & 0xff) as usize)
}
