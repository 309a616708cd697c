//! Connection bookkeeping: the per-fd slot table and the idle registry
//!
//! Every open connection owns a *connection slot* handed out by a
//! [`SlotAllocator`]. The [`FdTable`] maps a descriptor to its slot in O(1);
//! the slot indexes the connection's entry and its idle-list node in the
//! [`IdleRegistry`]'s [`LinkArena`]. Both tables are sized once, to the
//! descriptor limit, so linking and unlinking never allocate.
//!
//! A connection's node is linked iff the connection is idle in the pool.

use crate::error::{HttpError, HttpResult};
use crate::key::EndpointKey;

use fiber_core::{LinkArena, ListHead, SlotAllocator};

use std::collections::HashMap;
use std::os::fd::RawFd;

/// Index of one open connection
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ConnSlot(u32);

impl ConnSlot {
    const NONE: u32 = u32::MAX;

    #[inline]
    pub fn as_u32(self) -> u32 {
        self.0
    }
}

/// fd -> connection slot, one entry per possible descriptor
#[derive(Debug)]
pub struct FdTable {
    slots: Vec<u32>,
}

impl FdTable {
    pub fn new(limit: usize) -> Self {
        Self {
            slots: vec![ConnSlot::NONE; limit],
        }
    }

    #[inline]
    pub fn limit(&self) -> usize {
        self.slots.len()
    }

    fn index(&self, fd: RawFd) -> HttpResult<usize> {
        match usize::try_from(fd) {
            Ok(idx) if idx < self.slots.len() => Ok(idx),
            _ => Err(HttpError::FdOutOfRange { fd, limit: self.slots.len() }),
        }
    }

    pub fn slot_for(&self, fd: RawFd) -> HttpResult<Option<ConnSlot>> {
        let raw = self.slots[self.index(fd)?];
        Ok((raw != ConnSlot::NONE).then_some(ConnSlot(raw)))
    }

    pub fn bind(&mut self, fd: RawFd, slot: ConnSlot) -> HttpResult<()> {
        let idx = self.index(fd)?;
        self.slots[idx] = slot.0;
        Ok(())
    }

    pub fn unbind(&mut self, fd: RawFd) -> Option<ConnSlot> {
        let idx = self.index(fd).ok()?;
        let raw = std::mem::replace(&mut self.slots[idx], ConnSlot::NONE);
        (raw != ConnSlot::NONE).then_some(ConnSlot(raw))
    }
}

/// Endpoint -> list of idle connection slots, most recently idled first.
///
/// List entries are created on first use and never removed; an empty list
/// costs one arena entry.
#[derive(Debug)]
pub struct IdleRegistry {
    links: LinkArena,
    lists: HashMap<EndpointKey, ListHead>,
}

impl IdleRegistry {
    pub fn new(slots: usize) -> Self {
        Self {
            links: LinkArena::new(slots),
            lists: HashMap::new(),
        }
    }

    pub fn lookup(&self, key: &EndpointKey) -> Option<ListHead> {
        self.lists.get(key).copied()
    }

    pub fn insert_or_get(&mut self, key: EndpointKey) -> ListHead {
        let links = &mut self.links;
        *self.lists.entry(key).or_insert_with(|| links.new_list())
    }

    pub fn push_front(&mut self, key: EndpointKey, slot: ConnSlot) {
        let list = self.insert_or_get(key);
        self.links.push_front(list, slot.0);
    }

    pub fn pop_front(&mut self, key: &EndpointKey) -> Option<ConnSlot> {
        let list = self.lookup(key)?;
        self.links.pop_front(list).map(ConnSlot)
    }

    /// Unlink `slot` from whatever idle list holds it.
    pub fn remove(&mut self, slot: ConnSlot) -> bool {
        self.links.remove(slot.0)
    }

    pub fn is_idle(&self, slot: ConnSlot) -> bool {
        (slot.0 as usize) < self.links.node_capacity() && self.links.is_linked(slot.0)
    }

    /// Idle slots for `key`, front (next to be reused) first
    pub fn iter(&self, key: &EndpointKey) -> impl Iterator<Item = ConnSlot> + '_ {
        self.lookup(key)
            .into_iter()
            .flat_map(move |list| self.links.iter(list))
            .map(ConnSlot)
    }
}

#[derive(Debug, Clone, Copy)]
struct Conn {
    fd: RawFd,
    key: EndpointKey,
}

/// Every open connection of a client pool
#[derive(Debug)]
pub struct ConnTable {
    fds: FdTable,
    alloc: SlotAllocator,
    conns: Vec<Option<Conn>>,
    idle: IdleRegistry,
}

impl ConnTable {
    /// Size every table to `fd_limit` descriptors.
    pub fn new(fd_limit: usize) -> Self {
        Self {
            fds: FdTable::new(fd_limit),
            alloc: SlotAllocator::new(fd_limit),
            conns: Vec::new(),
            idle: IdleRegistry::new(fd_limit),
        }
    }

    pub fn fd_limit(&self) -> usize {
        self.fds.limit()
    }

    /// Track a newly dialed connection.
    pub fn open(&mut self, fd: RawFd, key: EndpointKey) -> HttpResult<ConnSlot> {
        if self.fds.slot_for(fd)?.is_some() {
            // stale entry for a reused descriptor number
            self.close(fd);
        }
        let slot = ConnSlot(self.alloc.allocate()?);
        let idx = slot.0 as usize;
        if idx >= self.conns.len() {
            self.conns.resize(idx + 1, None);
        }
        self.conns[idx] = Some(Conn { fd, key });
        self.fds.bind(fd, slot)?;
        Ok(slot)
    }

    /// Forget a connection: unlink it if idle and free its slot. The
    /// descriptor itself is closed by the caller.
    pub fn close(&mut self, fd: RawFd) -> Option<EndpointKey> {
        let slot = self.fds.unbind(fd)?;
        self.idle.remove(slot);
        let conn = self.conns.get_mut(slot.0 as usize)?.take();
        self.alloc.release(slot.0);
        conn.map(|c| c.key)
    }

    /// Push an open connection onto the front of its endpoint's idle list.
    pub fn park_idle(&mut self, fd: RawFd) -> HttpResult<()> {
        let slot = self.fds.slot_for(fd)?.ok_or(HttpError::UnknownConnection { fd })?;
        let key = self.conn(slot).map(|c| c.key).ok_or(HttpError::UnknownConnection { fd })?;
        self.idle.push_front(key, slot);
        Ok(())
    }

    /// Take the most recently idled connection for `key`.
    pub fn pop_idle(&mut self, key: &EndpointKey) -> Option<RawFd> {
        let slot = self.idle.pop_front(key)?;
        self.conn(slot).map(|c| c.fd)
    }

    pub fn is_idle(&self, fd: RawFd) -> bool {
        matches!(self.fds.slot_for(fd), Ok(Some(slot)) if self.idle.is_idle(slot))
    }

    pub fn key_of(&self, fd: RawFd) -> Option<EndpointKey> {
        let slot = self.fds.slot_for(fd).ok()??;
        self.conn(slot).map(|c| c.key)
    }

    /// Idle descriptors for `key`, next to be reused first
    pub fn idle_fds(&self, key: &EndpointKey) -> Vec<RawFd> {
        self.idle
            .iter(key)
            .filter_map(|slot| self.conn(slot).map(|c| c.fd))
            .collect()
    }

    pub fn idle_count(&self, key: &EndpointKey) -> usize {
        self.idle.iter(key).count()
    }

    /// Every idle descriptor across all endpoints
    pub fn all_idle_fds(&self) -> Vec<RawFd> {
        self.conns
            .iter()
            .enumerate()
            .filter_map(|(i, c)| (*c).filter(|_| self.idle.is_idle(ConnSlot(i as u32))))
            .map(|c| c.fd)
            .collect()
    }

    /// Open connections, idle or in use
    pub fn open_count(&self) -> usize {
        self.alloc.allocated_count() as usize
    }

    fn conn(&self, slot: ConnSlot) -> Option<Conn> {
        self.conns.get(slot.0 as usize).copied().flatten()
    }
}
