/// Kind of an indirect exit, selecting the branch-resolution routine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum IndirectKind {
    Call,
    Jump,
    Return,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ExitTarget {
    /// Application address known at translation time.
    Direct(u32),
    /// Target left in the branch-target register.
    Indirect(IndirectKind),
}

/// Linkstub flag bits.
pub mod lsflags {
    pub const LINK_DIRECT: u16 = 0x0001;
    pub const LINK_INDIRECT: u16 = 0x0002;
    /// Exit produced by a call (the return address is already in `lr`).
    pub const LINK_CALL: u16 = 0x0004;
    pub const LINK_RETURN: u16 = 0x0008;
    pub const LINK_JMP: u16 = 0x0010;
    /// Predicated indirect transfer whose not-taken path loads the
    /// fall-through address into the branch-target register.
    pub const LINK_PREDICATED_FALLTHROUGH: u16 = 0x0020;
    /// The exit branch currently jumps straight to the target fragment.
    pub const LINK_LINKED: u16 = 0x0040;
}

/// One exit point of a translated code region.
///
/// Created by the mangler for each control transfer it rewrites, filled in
/// with cache offsets when the fragment is emitted, and flipped between
/// linked and unlinked as target fragments come and go.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Linkstub {
    pub target: ExitTarget,
    pub flags: u16,
    /// Application address of the control transfer this exit replaces.
    pub app_pc: u32,
    /// Cache offset of the patchable exit branch.
    pub cti_offset: Option<u32>,
    /// Cache offset of the exit stub.
    pub stub_offset: Option<u32>,
}

impl Linkstub {
    pub fn direct(app_pc: u32, target: u32) -> Self {
        Self {
            target: ExitTarget::Direct(target),
            flags: lsflags::LINK_DIRECT,
            app_pc,
            cti_offset: None,
            stub_offset: None,
        }
    }

    pub fn indirect(app_pc: u32, kind: IndirectKind) -> Self {
        let kind_flag = match kind {
            IndirectKind::Call => lsflags::LINK_CALL,
            IndirectKind::Jump => lsflags::LINK_JMP,
            IndirectKind::Return => lsflags::LINK_RETURN,
        };
        Self {
            target: ExitTarget::Indirect(kind),
            flags: lsflags::LINK_INDIRECT | kind_flag,
            app_pc,
            cti_offset: None,
            stub_offset: None,
        }
    }

    pub fn with_flags(mut self, flags: u16) -> Self {
        self.flags |= flags;
        self
    }

    #[inline]
    pub fn is_direct(&self) -> bool {
        self.flags & lsflags::LINK_DIRECT != 0
    }

    #[inline]
    pub fn is_indirect(&self) -> bool {
        self.flags & lsflags::LINK_INDIRECT != 0
    }

    #[inline]
    pub fn is_call(&self) -> bool {
        self.flags & lsflags::LINK_CALL != 0
    }

    #[inline]
    pub fn is_linked(&self) -> bool {
        self.flags & lsflags::LINK_LINKED != 0
    }

    pub fn has_predicated_fallthrough(&self) -> bool {
        self.flags & lsflags::LINK_PREDICATED_FALLTHROUGH != 0
    }

    pub fn set_linked(&mut self, linked: bool) {
        if linked {
            self.flags |= lsflags::LINK_LINKED;
        } else {
            self.flags &= !lsflags::LINK_LINKED;
        }
    }

    /// Direct target address, if any.
    pub fn direct_target(&self) -> Option<u32> {
        match self.target {
            ExitTarget::Direct(pc) => Some(pc),
            ExitTarget::Indirect(_) => None,
        }
    }
}
