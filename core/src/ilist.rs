use crate::instr::Instr;

/// Stable handle of an instruction inside one [`InstrList`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct InstrId(pub u32);

#[derive(Debug, Clone)]
struct Node {
    instr: Option<Instr>,
    prev: Option<InstrId>,
    next: Option<InstrId>,
}

/// Ordered, mutable instruction sequence for one code region.
///
/// Nodes live in an arena and are linked through indices, so an `InstrId`
/// stays valid across any insertion. Removed nodes keep their slot; their
/// ids are never handed out again by the same list.
#[derive(Debug, Clone, Default)]
pub struct InstrList {
    nodes: Vec<Node>,
    first: Option<InstrId>,
    last: Option<InstrId>,
    len: usize,
}

impl InstrList {
    pub fn new() -> Self {
        Self {
            nodes: Vec::with_capacity(64),
            first: None,
            last: None,
            len: 0,
        }
    }

    #[inline]
    pub fn first(&self) -> Option<InstrId> {
        self.first
    }

    #[inline]
    pub fn last(&self) -> Option<InstrId> {
        self.last
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.len
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    fn node(&self, id: InstrId) -> &Node {
        let node = &self.nodes[id.0 as usize];
        assert!(node.instr.is_some(), "stale instruction id {:?}", id);
        node
    }

    fn node_mut(&mut self, id: InstrId) -> &mut Node {
        let node = &mut self.nodes[id.0 as usize];
        assert!(node.instr.is_some(), "stale instruction id {:?}", id);
        node
    }

    pub fn contains(&self, id: InstrId) -> bool {
        self.nodes
            .get(id.0 as usize)
            .is_some_and(|n| n.instr.is_some())
    }

    pub fn get(&self, id: InstrId) -> &Instr {
        match &self.node(id).instr {
            Some(i) => i,
            None => unreachable!(),
        }
    }

    pub fn get_mut(&mut self, id: InstrId) -> &mut Instr {
        match &mut self.node_mut(id).instr {
            Some(i) => i,
            None => unreachable!(),
        }
    }

    #[inline]
    pub fn next(&self, id: InstrId) -> Option<InstrId> {
        self.node(id).next
    }

    #[inline]
    pub fn prev(&self, id: InstrId) -> Option<InstrId> {
        self.node(id).prev
    }

    /// Position following `pos`, where `None` stands for the list head.
    pub fn next_from(&self, pos: Option<InstrId>) -> Option<InstrId> {
        match pos {
            Some(id) => self.next(id),
            None => self.first,
        }
    }

    fn alloc(&mut self, instr: Instr) -> InstrId {
        let id = InstrId(self.nodes.len() as u32);
        self.nodes.push(Node {
            instr: Some(instr),
            prev: None,
            next: None,
        });
        self.len += 1;
        id
    }

    fn link_between(
        &mut self,
        id: InstrId,
        prev: Option<InstrId>,
        next: Option<InstrId>,
    ) {
        {
            let n = &mut self.nodes[id.0 as usize];
            n.prev = prev;
            n.next = next;
        }
        match prev {
            Some(p) => self.node_mut(p).next = Some(id),
            None => self.first = Some(id),
        }
        match next {
            Some(n) => self.node_mut(n).prev = Some(id),
            None => self.last = Some(id),
        }
    }

    pub fn append(&mut self, instr: Instr) -> InstrId {
        self.insert_before(None, instr)
    }

    /// Insert before `pos`; `None` appends.
    pub fn insert_before(
        &mut self,
        pos: Option<InstrId>,
        instr: Instr,
    ) -> InstrId {
        let id = self.alloc(instr);
        let prev = match pos {
            Some(p) => self.prev(p),
            None => self.last,
        };
        self.link_between(id, prev, pos);
        id
    }

    /// Insert after `pos`; `None` prepends.
    pub fn insert_after(
        &mut self,
        pos: Option<InstrId>,
        instr: Instr,
    ) -> InstrId {
        let id = self.alloc(instr);
        let next = match pos {
            Some(p) => self.next(p),
            None => self.first,
        };
        self.link_between(id, pos, next);
        id
    }

    /// Insert a runtime-synthesized instruction before `pos`.
    pub fn meta_insert_before(
        &mut self,
        pos: Option<InstrId>,
        instr: Instr,
    ) -> InstrId {
        self.insert_before(pos, meta(instr))
    }

    /// Insert a runtime-synthesized instruction after `pos`.
    pub fn meta_insert_after(
        &mut self,
        pos: Option<InstrId>,
        instr: Instr,
    ) -> InstrId {
        self.insert_after(pos, meta(instr))
    }

    pub fn meta_append(&mut self, instr: Instr) -> InstrId {
        self.insert_before(None, meta(instr))
    }

    /// Unlink `id` and return its instruction.
    pub fn remove(&mut self, id: InstrId) -> Instr {
        let (prev, next) = {
            let n = self.node(id);
            (n.prev, n.next)
        };
        match prev {
            Some(p) => self.node_mut(p).next = next,
            None => self.first = next,
        }
        match next {
            Some(n) => self.node_mut(n).prev = prev,
            None => self.last = prev,
        }
        self.len -= 1;
        let node = &mut self.nodes[id.0 as usize];
        node.prev = None;
        node.next = None;
        match node.instr.take() {
            Some(i) => i,
            None => unreachable!(),
        }
    }

    /// Copy of the instruction at `id`, detached from the list.
    pub fn clone_instr(&self, id: InstrId) -> Instr {
        self.get(id).clone()
    }

    /// Ids in list order.
    pub fn ids(&self) -> Ids<'_> {
        Ids {
            list: self,
            cur: self.first,
        }
    }

    /// Instructions in list order.
    pub fn iter(&self) -> impl Iterator<Item = &Instr> {
        self.ids().map(move |id| self.get(id))
    }

    /// Ids in `[from, to)`; `to == None` runs to the end of the list.
    pub fn range(
        &self,
        from: Option<InstrId>,
        to: Option<InstrId>,
    ) -> Vec<InstrId> {
        let mut out = Vec::new();
        let mut cur = from;
        while let Some(id) = cur {
            if Some(id) == to {
                break;
            }
            out.push(id);
            cur = self.next(id);
        }
        out
    }
}

fn meta(mut instr: Instr) -> Instr {
    instr.is_meta = true;
    instr.is_app = false;
    instr
}

pub struct Ids<'a> {
    list: &'a InstrList,
    cur: Option<InstrId>,
}

impl Iterator for Ids<'_> {
    type Item = InstrId;

    fn next(&mut self) -> Option<InstrId> {
        let id = self.cur?;
        self.cur = self.list.next(id);
        Some(id)
    }
}

impl FromIterator<Instr> for InstrList {
    fn from_iter<I: IntoIterator<Item = Instr>>(iter: I) -> Self {
        let mut list = InstrList::new();
        for instr in iter {
            list.append(instr);
        }
        list
    }
}
