//! Doubly-linked lists threaded through a dense index arena
//!
//! Every node and every list head is an entry in one `Vec` of prev/next
//! index pairs. Lists are circular with a sentinel head, so linking and
//! unlinking never allocate and never need to know which list a node is in.
//!
//! ```text
//!   nodes 0..n (one per slot)          heads n.. (one per list)
//!   ┌────┬────┬────┬─────┬────┐        ┌────┬────┐
//!   │ 0  │ 1  │ 2  │ ... │n-1 │        │ H0 │ H1 │ ...
//!   └────┴────┴────┴─────┴────┘        └────┴────┘
//!   H0 <-> 2 <-> 0 <-> H0               (list H0 holds 2, then 0)
//! ```
//!
//! An unlinked node points at itself.

/// prev/next pair
#[derive(Debug, Clone, Copy)]
struct Link {
    prev: u32,
    next: u32,
}

impl Link {
    #[inline]
    const fn solo(idx: u32) -> Self {
        Self { prev: idx, next: idx }
    }
}

/// Handle to one list (its sentinel index)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ListHead(u32);

/// Arena of nodes plus any number of list heads.
#[derive(Debug)]
pub struct LinkArena {
    links: Vec<Link>,
    nodes: u32,
}

impl LinkArena {
    /// Create an arena with `nodes` unlinked nodes, indices `0..nodes`.
    pub fn new(nodes: usize) -> Self {
        let nodes = u32::try_from(nodes).unwrap_or(u32::MAX / 2);
        let links = (0..nodes).map(Link::solo).collect();
        Self { links, nodes }
    }

    /// Number of nodes (excluding list heads)
    #[inline]
    pub fn node_capacity(&self) -> usize {
        self.nodes as usize
    }

    /// Create a new, empty list.
    pub fn new_list(&mut self) -> ListHead {
        let idx = self.links.len() as u32;
        self.links.push(Link::solo(idx));
        ListHead(idx)
    }

    #[inline]
    pub fn is_empty(&self, head: ListHead) -> bool {
        self.links[head.0 as usize].next == head.0
    }

    /// Whether `node` currently belongs to some list
    #[inline]
    pub fn is_linked(&self, node: u32) -> bool {
        self.links[node as usize].next != node
    }

    /// Link `node` right after the head. A node already in a list is moved.
    pub fn push_front(&mut self, head: ListHead, node: u32) {
        assert!(node < self.nodes, "node {} outside arena of {}", node, self.nodes);
        self.unlink(node);

        let h = head.0;
        let first = self.links[h as usize].next;
        self.links[node as usize] = Link { prev: h, next: first };
        self.links[first as usize].prev = node;
        self.links[h as usize].next = node;
    }

    /// Unlink and return the first node of the list.
    pub fn pop_front(&mut self, head: ListHead) -> Option<u32> {
        if self.is_empty(head) {
            return None;
        }
        let node = self.links[head.0 as usize].next;
        self.unlink(node);
        Some(node)
    }

    /// Unlink `node` from whatever list holds it. Returns false if it was
    /// not linked.
    pub fn remove(&mut self, node: u32) -> bool {
        if node >= self.nodes || !self.is_linked(node) {
            return false;
        }
        self.unlink(node);
        true
    }

    /// Iterate front to back.
    pub fn iter(&self, head: ListHead) -> Iter<'_> {
        Iter {
            arena: self,
            head: head.0,
            cursor: self.links[head.0 as usize].next,
        }
    }

    pub fn len(&self, head: ListHead) -> usize {
        self.iter(head).count()
    }

    #[inline]
    fn unlink(&mut self, node: u32) {
        let Link { prev, next } = self.links[node as usize];
        self.links[prev as usize].next = next;
        self.links[next as usize].prev = prev;
        self.links[node as usize] = Link::solo(node);
    }
}

/// Front-to-back iterator over one list
pub struct Iter<'a> {
    arena: &'a LinkArena,
    head: u32,
    cursor: u32,
}

impl Iterator for Iter<'_> {
    type Item = u32;

    fn next(&mut self) -> Option<u32> {
        if self.cursor == self.head {
            return None;
        }
        let node = self.cursor;
        self.cursor = self.arena.links[node as usize].next;
        Some(node)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_push_pop_is_lifo() {
        let mut arena = LinkArena::new(8);
        let list = arena.new_list();
        assert!(arena.is_empty(list));

        arena.push_front(list, 1);
        arena.push_front(list, 5);
        arena.push_front(list, 3);
        assert_eq!(arena.iter(list).collect::<Vec<_>>(), vec![3, 5, 1]);

        assert_eq!(arena.pop_front(list), Some(3));
        assert_eq!(arena.pop_front(list), Some(5));
        assert_eq!(arena.pop_front(list), Some(1));
        assert_eq!(arena.pop_front(list), None);
        assert!(!arena.is_linked(3));
    }

    #[test]
    fn test_remove_anywhere() {
        let mut arena = LinkArena::new(8);
        let list = arena.new_list();
        for n in [0, 1, 2, 3] {
            arena.push_front(list, n);
        }

        assert!(arena.remove(2)); // middle
        assert!(arena.remove(3)); // front
        assert!(arena.remove(0)); // back
        assert!(!arena.remove(0));
        assert_eq!(arena.iter(list).collect::<Vec<_>>(), vec![1]);
        assert_eq!(arena.len(list), 1);
    }

    #[test]
    fn test_node_moves_between_lists() {
        let mut arena = LinkArena::new(4);
        let a = arena.new_list();
        let b = arena.new_list();

        arena.push_front(a, 2);
        arena.push_front(b, 2);
        assert!(arena.is_empty(a));
        assert_eq!(arena.iter(b).collect::<Vec<_>>(), vec![2]);
    }

    #[test]
    fn test_out_of_range_remove_is_noop() {
        let mut arena = LinkArena::new(4);
        let _ = arena.new_list();
        // index 4 is the head sentinel, not a node
        assert!(!arena.remove(4));
        assert!(!arena.remove(100));
    }
}
