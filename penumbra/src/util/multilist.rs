//! Several doubly linked lists threaded through one fixed arena of nodes.
//!
//! Nodes are addressed by index and each node is a member of at most one list at
//! a time. The head of a list is its cold end, the tail its hot end.

#[derive(Debug, Copy, Clone, Default)]
struct Links {
    list: Option<usize>,
    prev: Option<usize>,
    next: Option<usize>,
}

#[derive(Debug, Copy, Clone, Default)]
struct Ends {
    head: Option<usize>,
    tail: Option<usize>,
    len: usize,
}

#[derive(Debug)]
pub struct MultiList {
    links: Vec<Links>,
    lists: Vec<Ends>,
}

impl MultiList {
    pub fn new(list_count: usize, node_count: usize) -> Self {
        Self {
            links: vec![Links::default(); node_count],
            lists: vec![Ends::default(); list_count],
        }
    }

    pub fn head(&self, list: usize) -> Option<usize> {
        self.lists[list].head
    }

    pub fn tail(&self, list: usize) -> Option<usize> {
        self.lists[list].tail
    }

    pub fn len(&self, list: usize) -> usize {
        self.lists[list].len
    }

    pub fn list_of(&self, node: usize) -> Option<usize> {
        self.links[node].list
    }

    pub fn link_to_head(&mut self, list: usize, node: usize) {
        debug_assert!(self.links[node].list.is_none(), "node {} is already linked", node);
        let old_head = self.lists[list].head;
        self.links[node] = Links {
            list: Some(list),
            prev: None,
            next: old_head,
        };
        match old_head {
            Some(old) => self.links[old].prev = Some(node),
            None => self.lists[list].tail = Some(node),
        }
        self.lists[list].head = Some(node);
        self.lists[list].len += 1;
    }

    pub fn link_to_tail(&mut self, list: usize, node: usize) {
        debug_assert!(self.links[node].list.is_none(), "node {} is already linked", node);
        let old_tail = self.lists[list].tail;
        self.links[node] = Links {
            list: Some(list),
            prev: old_tail,
            next: None,
        };
        match old_tail {
            Some(old) => self.links[old].next = Some(node),
            None => self.lists[list].head = Some(node),
        }
        self.lists[list].tail = Some(node);
        self.lists[list].len += 1;
    }

    pub fn unlink(&mut self, node: usize) {
        let Links { list, prev, next } = self.links[node];
        let Some(list) = list else {
            return;
        };
        match prev {
            Some(prev) => self.links[prev].next = next,
            None => self.lists[list].head = next,
        }
        match next {
            Some(next) => self.links[next].prev = prev,
            None => self.lists[list].tail = prev,
        }
        self.links[node] = Links::default();
        self.lists[list].len -= 1;
    }

    /// Moves a linked node to the hot end of the list it is in.
    pub fn move_to_tail(&mut self, node: usize) {
        if let Some(list) = self.links[node].list {
            self.unlink(node);
            self.link_to_tail(list, node);
        }
    }

    /// Moves a linked node to the cold end of the list it is in.
    pub fn move_to_head(&mut self, node: usize) {
        if let Some(list) = self.links[node].list {
            self.unlink(node);
            self.link_to_head(list, node);
        }
    }

    /// Walks a list from cold to hot.
    pub fn iter(&self, list: usize) -> impl Iterator<Item = usize> + '_ {
        std::iter::successors(self.lists[list].head, move |&node| self.links[node].next)
    }
}
