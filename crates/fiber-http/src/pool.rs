//! # Client pool - keep-alive connections served by fibers
//!
//! ```text
//!   acquire(addr, port)
//!      │ idle list non-empty? ── yes ──▶ pop front fd (no syscalls)
//!      │ no
//!      ▼
//!   dial: socket + SO_REUSEADDR + TCP_NODELAY + connect + epoll
//!      │
//!      ▼
//!   spawn request fiber, route fd events to it
//!      │
//!      ▼ (fiber)  write ─▶ read/frame ─▶ dispose
//!                                          ├─ persistent: fd -> watcher, push front of idle list
//!                                          └─ otherwise:  close fd
//! ```
//!
//! The idle watcher is one daemon fiber that receives the events of every
//! idle connection. "Became writable" is ignored. Any other event on an idle
//! connection means the peer is gone or misbehaving, so the connection is
//! unlinked and closed and never handed out again.

use crate::config::PoolConfig;
use crate::context::{RequestContext, RequestHandle};
use crate::error::{HttpError, HttpResult};
use crate::framing::{Response, ResponseFramer};
use crate::key::EndpointKey;
use crate::registry::ConnTable;
use crate::socket;
use crate::vmbuf::{Fill, Flush};

use fiber_core::FiberId;
use fiber_runtime::{Interest, Scheduler};

use std::cell::{Cell, RefCell};
use std::net::Ipv4Addr;
use std::os::fd::{AsRawFd, IntoRawFd, RawFd};
use std::rc::{Rc, Weak};

use tracing::{debug, trace, warn};

/// Pool of keep-alive HTTP/1.1 connections on one scheduler.
///
/// Cheap to clone; clones share the same connections.
#[derive(Clone)]
pub struct ClientPool {
    inner: Rc<PoolInner>,
}

struct PoolInner {
    sched: Rc<Scheduler>,
    config: PoolConfig,
    conns: RefCell<ConnTable>,
    watcher: Cell<FiberId>,
    shutdown: Cell<bool>,
}

impl ClientPool {
    /// Size the connection tables to the descriptor limit and start the
    /// idle watcher.
    pub fn new(sched: Rc<Scheduler>, config: PoolConfig) -> HttpResult<Self> {
        config.validate().map_err(HttpError::InvalidConfig)?;

        let limit = sched.fd_limit();
        let inner = Rc::new(PoolInner {
            sched: sched.clone(),
            config,
            conns: RefCell::new(ConnTable::new(limit)),
            watcher: Cell::new(FiberId::NONE),
            shutdown: Cell::new(false),
        });

        let weak = Rc::downgrade(&inner);
        let watcher = sched.spawn_daemon(move || idle_watcher(weak))?;
        inner.watcher.set(watcher);

        debug!(fd_limit = limit, watcher = %watcher, "client pool created");
        Ok(Self { inner })
    }

    pub fn scheduler(&self) -> &Rc<Scheduler> {
        &self.inner.sched
    }

    pub fn config(&self) -> &PoolConfig {
        &self.inner.config
    }

    /// Get a connection to `addr:port` bound to a new, queued request fiber.
    ///
    /// Reuses the most recently idled connection for the endpoint if there
    /// is one, otherwise dials. Fill the request through the returned
    /// handle before the scheduler next runs.
    pub fn acquire(&self, addr: Ipv4Addr, port: u16) -> HttpResult<RequestHandle> {
        let inner = &self.inner;
        if inner.shutdown.get() {
            return Err(HttpError::Shutdown);
        }

        let key = EndpointKey::new(addr, port);
        let idle = inner.conns.borrow_mut().pop_idle(&key);
        let (fd, reused) = match idle {
            Some(fd) => (fd, true),
            None => (inner.dial(key)?, false),
        };

        let ctx = Rc::new(RequestContext::new(key, fd, reused, &inner.config));
        let pool = inner.clone();
        let fiber_ctx = ctx.clone();
        let id = match inner.sched.spawn(move || request_fiber(pool, fiber_ctx)) {
            Ok(id) => id,
            Err(e) => {
                // a reused fd is still routed to the watcher
                let reparked = reused && inner.conns.borrow_mut().park_idle(fd).is_ok();
                if !reparked {
                    inner.discard(fd);
                }
                return Err(e.into());
            }
        };
        inner.sched.set_fd_fiber(fd, id)?;

        trace!(endpoint = %key, fd, reused, fiber = %id, "acquired");
        Ok(RequestHandle::new(ctx, inner.sched.clone()))
    }

    /// [`ClientPool::acquire`] and write `request` into the request buffer.
    pub fn request(&self, addr: Ipv4Addr, port: u16, request: &[u8]) -> HttpResult<RequestHandle> {
        let handle = self.acquire(addr, port)?;
        handle.append_request(request);
        Ok(handle)
    }

    pub fn idle_count(&self, key: &EndpointKey) -> usize {
        self.inner.conns.borrow().idle_count(key)
    }

    /// Idle descriptors for `key`, next to be handed out first
    pub fn idle_fds(&self, key: &EndpointKey) -> Vec<RawFd> {
        self.inner.conns.borrow().idle_fds(key)
    }

    /// Open connections, idle or serving a request
    pub fn open_connections(&self) -> usize {
        self.inner.conns.borrow().open_count()
    }

    pub fn is_shutdown(&self) -> bool {
        self.inner.shutdown.get()
    }

    /// Close every idle connection and stop the watcher. Requests in
    /// flight finish, but their connections are closed, not pooled.
    pub fn shutdown(&self) {
        self.inner.shutdown();
    }
}

impl PoolInner {
    fn dial(&self, key: EndpointKey) -> HttpResult<RawFd> {
        let sock = socket::dial(&key)?;
        let fd = sock.as_raw_fd();

        self.conns.borrow_mut().open(fd, key)?;
        if let Err(e) = self.sched.register(fd, Interest::BOTH) {
            self.conns.borrow_mut().close(fd);
            return Err(HttpError::Register(e));
        }

        debug!(endpoint = %key, fd, "dialed");
        // Owned by the connection table from here on
        Ok(sock.into_raw_fd())
    }

    /// Close a connection that will not be reused.
    fn discard(&self, fd: RawFd) {
        self.conns.borrow_mut().close(fd);
        if let Err(e) = self.sched.deregister(fd) {
            trace!(fd, error = %e, "deregister failed");
        }
        socket::close(fd);
    }

    /// Last step of every request, on every path: pool or close the
    /// connection, then publish the outcome.
    fn dispose(&self, ctx: &RequestContext, mut outcome: HttpResult<Response>) {
        let fd = ctx.fd();
        let keep = matches!(&outcome, Ok(r) if r.persistent) && !self.shutdown.get();

        let pooled = keep && {
            // Route further events to the watcher before the fd becomes idle.
            self.sched.set_fd_fiber(fd, self.watcher.get()).is_ok()
                && self.conns.borrow_mut().park_idle(fd).is_ok()
        };

        if pooled {
            trace!(endpoint = %ctx.key(), fd, "connection parked idle");
        } else {
            self.discard(fd);
            if let Ok(resp) = &mut outcome {
                resp.persistent = false;
            }
            match &outcome {
                Ok(_) => trace!(endpoint = %ctx.key(), fd, "connection closed"),
                Err(e) => warn!(endpoint = %ctx.key(), fd, error = %e, "request failed"),
            }
        }

        ctx.complete(&self.sched, outcome);
    }

    /// An event arrived for an idle connection.
    fn on_idle_event(&self, fd: RawFd, mask: u32) {
        if !self.conns.borrow().is_idle(fd) {
            return;
        }
        let endpoint = self.conns.borrow().key_of(fd);
        debug!(fd, endpoint = ?endpoint, mask = format_args!("{:#x}", mask), "reaping idle connection");
        self.discard(fd);
    }

    fn shutdown(&self) {
        if self.shutdown.replace(true) {
            return;
        }
        let idle = self.conns.borrow().all_idle_fds();
        for &fd in &idle {
            self.discard(fd);
        }
        self.sched.wake(self.watcher.get());
        debug!(closed = idle.len(), "client pool shut down");
    }
}

impl Drop for PoolInner {
    fn drop(&mut self) {
        self.shutdown();
    }
}

/// Body of every request fiber.
fn request_fiber(pool: Rc<PoolInner>, ctx: Rc<RequestContext>) {
    let mut guard = DisposeOnUnwind { pool: &pool, ctx: &ctx, armed: true };
    let outcome = exchange(&pool.sched, &ctx);
    guard.armed = false;
    pool.dispose(&ctx, outcome);
}

/// Write the request, then read until the framer has a full response.
fn exchange(sched: &Scheduler, ctx: &RequestContext) -> HttpResult<Response> {
    let fd = ctx.fd();

    loop {
        let flushed = ctx.request.borrow_mut().write_to(fd)?;
        match flushed {
            Flush::Done => break,
            Flush::Pending => sched.park()?,
        }
    }

    let head_request = ctx.request.borrow().data().starts_with(b"HEAD ");
    let mut framer = ResponseFramer::new(head_request);

    loop {
        let fill = ctx.response.borrow_mut().read_from(fd)?;
        let wire = ctx.response.borrow();
        match fill {
            Fill::Drained => {
                if let Some(resp) = framer.advance(wire.data())? {
                    return Ok(resp);
                }
            }
            Fill::Closed => {
                let mut resp = framer.finish(wire.data())?;
                // the peer is gone whatever the headers said
                resp.persistent = false;
                return Ok(resp);
            }
        }
        drop(wire);
        sched.park()?;
    }
}

/// Disposes of the connection if the request fiber unwinds.
struct DisposeOnUnwind<'a> {
    pool: &'a PoolInner,
    ctx: &'a RequestContext,
    armed: bool,
}

impl Drop for DisposeOnUnwind<'_> {
    fn drop(&mut self) {
        if self.armed {
            self.pool.dispose(self.ctx, Err(HttpError::Abandoned));
        }
    }
}

/// Daemon fiber receiving the events of every idle connection.
fn idle_watcher(pool: Weak<PoolInner>) {
    let Some(sched) = pool.upgrade().map(|p| p.sched.clone()) else {
        return;
    };

    loop {
        if sched.park().is_err() {
            return;
        }
        let Some(inner) = pool.upgrade() else {
            return;
        };
        if inner.shutdown.get() {
            return;
        }

        let event = sched.last_event();
        if event.is_none() || event.is_write_only() {
            continue;
        }
        inner.on_idle_event(event.fd, event.mask);
    }
}
