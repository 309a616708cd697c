//! # fiber-http
//!
//! Outbound HTTP/1.1 client engine on single-threaded cooperative fibers.
//!
//! Each request runs in its own fiber bound to one connection. Finished
//! keep-alive connections go back to a per-endpoint idle list (most
//! recently idled first); a watcher fiber reaps idle connections the peer
//! has closed. Responses are framed by Content-Length, chunked encoding or
//! connection close, and the response buffer always holds the exact wire
//! bytes.
//!
//! ```rust,ignore
//! use fiber_http::{ClientPool, PoolConfig};
//! use fiber_runtime::{RuntimeConfig, Scheduler};
//! use std::net::Ipv4Addr;
//!
//! let sched = Scheduler::new(RuntimeConfig::from_env())?;
//! let pool = ClientPool::new(sched.clone(), PoolConfig::from_env())?;
//!
//! let req = pool.request(
//!     Ipv4Addr::LOCALHOST,
//!     8080,
//!     b"GET / HTTP/1.1\r\nHost: localhost\r\nConnection: keep-alive\r\n\r\n",
//! )?;
//! sched.run()?;
//! let resp = req.take_outcome().unwrap()?;
//! println!("{} ({} body bytes)", resp.status, resp.body_len());
//! ```
//!
//! TLS, HTTP/2, pipelining, redirects, DNS and timeouts are not provided.

pub mod config;
pub mod context;
pub mod error;
pub mod framing;
pub mod key;
pub mod pool;
pub mod registry;
pub mod socket;
pub mod vmbuf;

pub use config::PoolConfig;
pub use context::RequestHandle;
pub use error::{HttpError, HttpResult};
pub use framing::{Framing, Response, ResponseFramer};
pub use key::EndpointKey;
pub use pool::ClientPool;
pub use vmbuf::VmBuf;
