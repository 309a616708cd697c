//! Per-request state shared by the request fiber and the caller's handle

use crate::config::PoolConfig;
use crate::error::{HttpError, HttpResult};
use crate::framing::Response;
use crate::key::EndpointKey;
use crate::vmbuf::VmBuf;

use fiber_core::{FiberId, RuntimeError};
use fiber_runtime::Scheduler;

use std::borrow::Cow;
use std::cell::{Cell, Ref, RefCell, RefMut};
use std::os::fd::RawFd;
use std::rc::Rc;

/// One in-flight request: its connection, both buffers and the outcome.
///
/// The request fiber only borrows a buffer for the duration of one I/O
/// step, never across a suspension, so the caller can inspect them at any
/// time from the main context or another fiber.
#[derive(Debug)]
pub struct RequestContext {
    key: EndpointKey,
    fd: RawFd,
    reused: bool,
    pub(crate) request: RefCell<VmBuf>,
    pub(crate) response: RefCell<VmBuf>,
    persistent: Cell<bool>,
    complete: Cell<bool>,
    outcome: RefCell<Option<HttpResult<Response>>>,
    waiter: Cell<FiberId>,
}

impl RequestContext {
    pub(crate) fn new(key: EndpointKey, fd: RawFd, reused: bool, config: &PoolConfig) -> Self {
        Self {
            key,
            fd,
            reused,
            request: RefCell::new(VmBuf::with_capacity(config.request_capacity)),
            response: RefCell::new(VmBuf::with_capacity(config.response_capacity)),
            persistent: Cell::new(false),
            complete: Cell::new(false),
            outcome: RefCell::new(None),
            waiter: Cell::new(FiberId::NONE),
        }
    }

    #[inline]
    pub fn key(&self) -> EndpointKey {
        self.key
    }

    #[inline]
    pub fn fd(&self) -> RawFd {
        self.fd
    }

    #[inline]
    pub fn is_complete(&self) -> bool {
        self.complete.get()
    }

    /// Record the outcome and wake the fiber waiting on it. Returns false
    /// if an outcome was already recorded.
    pub(crate) fn complete(&self, sched: &Scheduler, outcome: HttpResult<Response>) -> bool {
        if self.complete.replace(true) {
            return false;
        }
        self.persistent.set(matches!(&outcome, Ok(r) if r.persistent));
        *self.outcome.borrow_mut() = Some(outcome);

        if let Some(waiter) = self.waiter.replace(FiberId::NONE).to_option() {
            sched.wake(waiter);
        }
        true
    }
}

/// Caller's handle to one request.
///
/// Returned by `ClientPool::acquire`; the request fiber is queued but has
/// not run yet, so the request can still be written with
/// [`RequestHandle::append_request`].
pub struct RequestHandle {
    ctx: Rc<RequestContext>,
    sched: Rc<Scheduler>,
}

impl RequestHandle {
    pub(crate) fn new(ctx: Rc<RequestContext>, sched: Rc<Scheduler>) -> Self {
        Self { ctx, sched }
    }

    pub fn key(&self) -> EndpointKey {
        self.ctx.key
    }

    /// Descriptor of the connection serving this request
    pub fn fd(&self) -> RawFd {
        self.ctx.fd
    }

    /// Whether the connection came from the idle pool
    pub fn is_reused(&self) -> bool {
        self.ctx.reused
    }

    pub fn request_mut(&self) -> RefMut<'_, VmBuf> {
        self.ctx.request.borrow_mut()
    }

    pub fn append_request(&self, bytes: &[u8]) {
        self.ctx.request.borrow_mut().append(bytes);
    }

    /// The request fiber has finished and disposed of the connection.
    pub fn is_complete(&self) -> bool {
        self.ctx.is_complete()
    }

    /// Connection went back to the idle pool (valid once complete)
    pub fn is_persistent(&self) -> bool {
        self.ctx.persistent.get()
    }

    /// Take the outcome, once. `None` while the request is in flight.
    pub fn take_outcome(&self) -> Option<HttpResult<Response>> {
        self.ctx.outcome.borrow_mut().take()
    }

    /// The framed response, if the request succeeded and the outcome has
    /// not been taken.
    pub fn response(&self) -> Option<Response> {
        match &*self.ctx.outcome.borrow() {
            Some(Ok(resp)) => Some(resp.clone()),
            _ => None,
        }
    }

    /// Park the calling fiber until the request completes.
    pub fn wait(&self) -> HttpResult<Response> {
        while !self.ctx.is_complete() {
            let me = self.sched.current().ok_or(RuntimeError::NotInFiber)?;
            self.ctx.waiter.set(me);
            self.sched.park()?;
        }
        self.take_outcome().unwrap_or_else(|| Err(HttpError::Abandoned))
    }

    /// Raw response bytes as received: status line, headers, CRLFCRLF, body.
    pub fn response_bytes(&self) -> Ref<'_, [u8]> {
        Ref::map(self.ctx.response.borrow(), |buf| buf.data())
    }

    /// Body of the successful response
    pub fn body(&self) -> Option<Vec<u8>> {
        let resp = self.response()?;
        let wire = self.response_bytes();
        let body: Cow<'_, [u8]> = resp.body(&wire);
        Some(body.into_owned())
    }
}

impl std::fmt::Debug for RequestHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RequestHandle")
            .field("key", &self.ctx.key)
            .field("fd", &self.ctx.fd)
            .field("reused", &self.ctx.reused)
            .field("complete", &self.ctx.is_complete())
            .finish()
    }
}
