use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Mutex, MutexGuard};

use dbt_backend::code_buffer::CodeBuffer;
use dbt_backend::{CacheLinkage, LinkError};
use dbt_core::Linkstub;
use tracing::{debug, trace};

use crate::{decode_exit_handle, exit_handle, MAX_EXITS};

/// Link state of one fragment, guarded by the fragment's lock.
#[derive(Debug, Default)]
pub struct FragmentLinks {
    /// Exits in list order, with cache offsets filled in.
    pub exits: Vec<Linkstub>,
    /// Fragment each exit currently jumps to.
    pub exit_dest: Vec<Option<usize>>,
    /// Exits of other fragments linked to this one: (fragment, exit).
    pub incoming: Vec<(usize, usize)>,
}

/// A translated region in the code cache.
pub struct Fragment {
    /// Application address the fragment translates.
    pub tag: u32,
    /// Cache offset of the first instruction.
    pub start: usize,
    /// Bytes occupied, stubs included.
    pub size: usize,
    pub valid: AtomicBool,
    pub links: Mutex<FragmentLinks>,
}

/// Fragments and the tag lookup table.
///
/// Emission needs `&mut self`; linking, unlinking and eviction take
/// `&self` so they can run while other threads execute cached code.
pub struct FragmentStore {
    frags: Vec<Fragment>,
    map: Mutex<HashMap<u32, usize>>,
}

impl FragmentStore {
    pub fn new() -> Self {
        Self {
            frags: Vec::new(),
            map: Mutex::new(HashMap::new()),
        }
    }

    /// Emit a fragment and register it under `tag`.
    ///
    /// Layout: `body`, one exit branch per direct exit, then the stubs
    /// those branches initially target. Indirect exits get no branch;
    /// they leave through the branch-target register. On error the buffer
    /// is rewound and nothing is registered.
    pub fn add_fragment<L: CacheLinkage>(
        &mut self,
        buf: &mut CodeBuffer,
        linkage: &L,
        tag: u32,
        body: &[u8],
        exits: Vec<Linkstub>,
    ) -> Result<usize, LinkError> {
        assert!(exits.len() <= MAX_EXITS, "too many exits");
        let idx = self.frags.len();
        buf.align_to(4);
        let start = buf.offset();
        match Self::emit(buf, linkage, idx, body, exits) {
            Ok(exits) => {
                let n = exits.len();
                self.frags.push(Fragment {
                    tag,
                    start,
                    size: buf.offset() - start,
                    valid: AtomicBool::new(true),
                    links: Mutex::new(FragmentLinks {
                        exits,
                        exit_dest: vec![None; n],
                        incoming: Vec::new(),
                    }),
                });
                self.map.lock().unwrap().insert(tag, idx);
                debug!(idx, tag, start, "added fragment");
                Ok(idx)
            }
            Err(e) => {
                buf.set_offset(start);
                Err(e)
            }
        }
    }

    fn emit<L: CacheLinkage>(
        buf: &mut CodeBuffer,
        linkage: &L,
        idx: usize,
        body: &[u8],
        mut exits: Vec<Linkstub>,
    ) -> Result<Vec<Linkstub>, LinkError> {
        buf.emit_bytes(body);
        buf.align_to(4);

        let direct: Vec<usize> = (0..exits.len())
            .filter(|&i| exits[i].is_direct())
            .collect();
        let mut stub = buf.offset() + 4 * direct.len();
        for &i in &direct {
            let cti = linkage.emit_exit_branch(buf, stub);
            exits[i].cti_offset = Some(cti as u32);
            exits[i].stub_offset = Some(stub as u32);
            stub += linkage.exit_stub_size(&exits[i]);
        }
        for &i in &direct {
            let handle = exit_handle(idx, i);
            let at = linkage.insert_exit_stub(buf, &exits[i], handle)?;
            debug_assert_eq!(Some(at as u32), exits[i].stub_offset);
        }
        Ok(exits)
    }

    pub fn get(&self, idx: usize) -> &Fragment {
        &self.frags[idx]
    }

    pub fn len(&self) -> usize {
        self.frags.len()
    }

    pub fn is_empty(&self) -> bool {
        self.frags.is_empty()
    }

    /// Valid fragment for `tag`.
    pub fn lookup(&self, tag: u32) -> Option<usize> {
        let map = self.map.lock().unwrap();
        let idx = *map.get(&tag)?;
        self.frags[idx].valid.load(Ordering::Acquire).then_some(idx)
    }

    /// Fragment and exit named by a stub's exit handle.
    pub fn exit_for_handle(&self, handle: u32) -> Option<(usize, Linkstub)> {
        let (frag, exit) = decode_exit_handle(handle);
        let links = self.frags.get(frag)?.links.lock().unwrap();
        links.exits.get(exit).map(|ls| (frag, ls.clone()))
    }

    /// Lock the link state of both ends of an edge, lower index first.
    fn lock_edge(&self, src: usize, dst: usize) -> Edge<'_> {
        let lock = |i: usize| self.frags[i].links.lock().unwrap();
        if src == dst {
            return Edge {
                src: lock(src),
                dst: None,
            };
        }
        if src < dst {
            let src = lock(src);
            let dst = lock(dst);
            Edge { src, dst: Some(dst) }
        } else {
            let dst = lock(dst);
            let src = lock(src);
            Edge { src, dst: Some(dst) }
        }
    }

    /// Point exit `exit` of `src` straight at fragment `dst`.
    ///
    /// Returns `Ok(false)` without patching when `dst` has been evicted.
    /// The check runs under `dst`'s lock, so a concurrent eviction either
    /// finds the new edge in `incoming` or prevents it.
    pub fn link_exit<L: CacheLinkage>(
        &self,
        buf: &CodeBuffer,
        linkage: &L,
        src: usize,
        exit: usize,
        dst: usize,
    ) -> Result<bool, LinkError> {
        let dst_frag = &self.frags[dst];
        loop {
            let current = self.frags[src].links.lock().unwrap().exit_dest[exit];
            if current.is_some_and(|d| d != dst) {
                self.unlink_exit(buf, linkage, src, exit)?;
                continue;
            }
            let mut edge = self.lock_edge(src, dst);
            if edge.src.exit_dest[exit] != current {
                continue;
            }
            if !dst_frag.valid.load(Ordering::Acquire) {
                return Ok(false);
            }
            if current == Some(dst) {
                return Ok(true);
            }
            let ls = &edge.src.exits[exit];
            assert_eq!(
                ls.direct_target(),
                Some(dst_frag.tag),
                "exit target does not match fragment tag"
            );
            let Some(cti) = ls.cti_offset else {
                unreachable!("direct exit without a branch");
            };
            linkage.patch_branch(buf, cti as usize, dst_frag.start)?;
            edge.src.exits[exit].set_linked(true);
            edge.src.exit_dest[exit] = Some(dst);
            edge.dst().incoming.push((src, exit));
            debug!(src, exit, dst, "linked exit");
            return Ok(true);
        }
    }

    /// Send exit `exit` of `src` back through its stub.
    pub fn unlink_exit<L: CacheLinkage>(
        &self,
        buf: &CodeBuffer,
        linkage: &L,
        src: usize,
        exit: usize,
    ) -> Result<(), LinkError> {
        loop {
            let current = self.frags[src].links.lock().unwrap().exit_dest[exit];
            let Some(dst) = current else {
                return Ok(());
            };
            let mut edge = self.lock_edge(src, dst);
            if edge.src.exit_dest[exit] != current {
                continue;
            }
            edge.src.exit_dest[exit] = None;
            Self::reset_exit(buf, linkage, &mut edge.src.exits[exit])?;
            edge.dst()
                .incoming
                .retain(|&(s, e)| !(s == src && e == exit));
            debug!(src, exit, dst, "unlinked exit");
            return Ok(());
        }
    }

    fn reset_exit<L: CacheLinkage>(
        buf: &CodeBuffer,
        linkage: &L,
        ls: &mut Linkstub,
    ) -> Result<(), LinkError> {
        if let (Some(cti), Some(stub)) = (ls.cti_offset, ls.stub_offset) {
            linkage.patch_branch(buf, cti as usize, stub as usize)?;
        }
        ls.set_linked(false);
        Ok(())
    }

    /// Invalidate fragment `idx`: unlink every edge into and out of it and
    /// drop it from the lookup table.
    pub fn evict<L: CacheLinkage>(
        &self,
        buf: &CodeBuffer,
        linkage: &L,
        idx: usize,
    ) -> Result<(), LinkError> {
        let frag = &self.frags[idx];
        frag.valid.store(false, Ordering::Release);

        // 1. Incoming edges.
        let incoming =
            std::mem::take(&mut frag.links.lock().unwrap().incoming);
        for (src, exit) in incoming {
            let mut links = self.frags[src].links.lock().unwrap();
            if links.exit_dest[exit] == Some(idx) {
                links.exit_dest[exit] = None;
                Self::reset_exit(buf, linkage, &mut links.exits[exit])?;
                trace!(src, exit, "unlinked incoming edge");
            }
        }

        // 2. Outgoing edges.
        let n = frag.links.lock().unwrap().exits.len();
        for exit in 0..n {
            self.unlink_exit(buf, linkage, idx, exit)?;
        }

        // 3. Lookup table.
        let mut map = self.map.lock().unwrap();
        if map.get(&frag.tag) == Some(&idx) {
            map.remove(&frag.tag);
        }
        debug!(idx, tag = frag.tag, "evicted fragment");
        Ok(())
    }
}

/// Both ends of a link edge, locked. `dst` is `None` for a self-loop.
struct Edge<'a> {
    src: MutexGuard<'a, FragmentLinks>,
    dst: Option<MutexGuard<'a, FragmentLinks>>,
}

impl Edge<'_> {
    fn dst(&mut self) -> &mut FragmentLinks {
        match &mut self.dst {
            Some(dst) => &mut **dst,
            None => &mut *self.src,
        }
    }
}

impl Default for FragmentStore {
    fn default() -> Self {
        Self::new()
    }
}
