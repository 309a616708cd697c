//! End-to-end: the client pool against a threaded TCP server.

use fiber_http::{ClientPool, EndpointKey, Framing, HttpError, PoolConfig};
use fiber_runtime::{RuntimeConfig, RuntimeError, Scheduler};

use std::cell::{Cell, RefCell};
use std::io::{ErrorKind, Read, Write};
use std::net::{Ipv4Addr, TcpListener, TcpStream};
use std::os::fd::AsRawFd;
use std::rc::Rc;
use std::sync::mpsc;
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::Duration;

const GET: &[u8] = b"GET / HTTP/1.1\r\nHost: localhost\r\nConnection: keep-alive\r\n\r\n";
const OK_KEEP: &[u8] = b"HTTP/1.1 200 OK\r\nConnection: keep-alive\r\nContent-Length: 5\r\n\r\nHELLO";

// ═══════════════════════════════════════════════════════════════════
// Server side
// ═══════════════════════════════════════════════════════════════════

/// Read one request head. False on EOF.
fn read_request(stream: &mut TcpStream) -> bool {
    let mut buf = Vec::new();
    let mut chunk = [0u8; 1024];
    while !buf.windows(4).any(|w| w == b"\r\n\r\n") {
        match stream.read(&mut chunk) {
            Ok(0) | Err(_) => return false,
            Ok(n) => buf.extend_from_slice(&chunk[..n]),
        }
    }
    true
}

/// Accept connections forever, one thread per connection.
fn serve<F>(handler: F) -> u16
where
    F: Fn(TcpStream) + Send + Sync + 'static,
{
    let listener = TcpListener::bind("127.0.0.1:0").unwrap();
    let port = listener.local_addr().unwrap().port();
    let handler = Arc::new(handler);
    thread::spawn(move || {
        for stream in listener.incoming() {
            let Ok(stream) = stream else { return };
            let handler = handler.clone();
            thread::spawn(move || (*handler)(stream));
        }
    });
    port
}

/// Answer every request on a connection with `reply`.
fn serve_fixed(reply: &'static [u8]) -> u16 {
    serve(move |mut s| {
        while read_request(&mut s) {
            if s.write_all(reply).is_err() {
                return;
            }
        }
    })
}

// ═══════════════════════════════════════════════════════════════════
// Client side
// ═══════════════════════════════════════════════════════════════════

fn setup() -> (Rc<Scheduler>, ClientPool) {
    let config = RuntimeConfig::builtin().initial_fibers(4).grow_fibers(4).max_fibers(64);
    let sched = Scheduler::new(config).unwrap();
    let pool = ClientPool::new(sched.clone(), PoolConfig::from_env()).unwrap();
    (sched, pool)
}

fn key(port: u16) -> EndpointKey {
    EndpointKey::new(Ipv4Addr::LOCALHOST, port)
}

/// Turn the scheduler until `done` or give up.
fn turn_until(sched: &Scheduler, mut done: impl FnMut() -> bool) -> bool {
    for _ in 0..50 {
        if done() {
            return true;
        }
        sched.turn(Some(Duration::from_millis(100))).unwrap();
    }
    done()
}

#[test]
fn test_content_length_response_is_pooled_and_reused() {
    let port = serve_fixed(OK_KEEP);
    let (sched, pool) = setup();

    let first = pool.request(Ipv4Addr::LOCALHOST, port, GET).unwrap();
    assert!(!first.is_reused());
    sched.run().unwrap();

    let resp = first.response().unwrap();
    assert_eq!(resp.status, 200);
    assert_eq!(resp.framing, Framing::Length(5));
    assert!(resp.persistent);
    assert_eq!(first.body().unwrap(), b"HELLO");
    assert_eq!(&*first.response_bytes(), OK_KEEP);
    assert_eq!(pool.idle_fds(&key(port)), vec![first.fd()]);

    let second = pool.request(Ipv4Addr::LOCALHOST, port, GET).unwrap();
    assert!(second.is_reused());
    assert_eq!(second.fd(), first.fd());
    assert_eq!(pool.idle_count(&key(port)), 0);
    sched.run().unwrap();

    assert_eq!(second.take_outcome().unwrap().unwrap().status, 200);
    assert!(second.take_outcome().is_none());
    assert_eq!(pool.idle_count(&key(port)), 1);
    assert_eq!(pool.open_connections(), 1);
}

#[test]
fn test_idle_reuse_is_most_recent_first() {
    let port = serve_fixed(OK_KEEP);
    let (sched, pool) = setup();

    let handles: Vec<_> = (0..3)
        .map(|_| pool.request(Ipv4Addr::LOCALHOST, port, GET).unwrap())
        .collect();
    sched.run().unwrap();
    assert!(handles.iter().all(|h| h.is_persistent()));

    // Front of the list is the connection idled last
    let idle = pool.idle_fds(&key(port));
    assert_eq!(idle.len(), 3);

    let reused: Vec<_> = (0..3)
        .map(|_| pool.request(Ipv4Addr::LOCALHOST, port, GET).unwrap())
        .collect();
    let fds: Vec<_> = reused.iter().map(|h| h.fd()).collect();
    assert_eq!(fds, idle);
    assert!(reused.iter().all(|h| h.is_reused()));

    sched.run().unwrap();
    assert_eq!(pool.idle_count(&key(port)), 3);
}

#[test]
fn test_peer_closed_idle_connection_is_reaped() {
    let (close_tx, close_rx) = mpsc::channel::<()>();
    let close_rx = Arc::new(Mutex::new(close_rx));
    let port = serve(move |mut s| {
        if read_request(&mut s) {
            s.write_all(OK_KEEP).unwrap();
            let _ = close_rx.lock().unwrap().recv();
        }
    });
    let (sched, pool) = setup();

    let req = pool.request(Ipv4Addr::LOCALHOST, port, GET).unwrap();
    sched.run().unwrap();
    assert!(req.is_persistent());
    assert_eq!(pool.idle_count(&key(port)), 1);

    close_tx.send(()).unwrap();
    assert!(turn_until(&sched, || pool.idle_count(&key(port)) == 0));
    assert_eq!(pool.open_connections(), 0);

    let next = pool.acquire(Ipv4Addr::LOCALHOST, port).unwrap();
    assert!(!next.is_reused());
}

#[test]
fn test_missing_connection_header_closes() {
    let port = serve_fixed(b"HTTP/1.1 200 OK\r\nContent-Length: 2\r\n\r\nok");
    let (sched, pool) = setup();

    let req = pool.request(Ipv4Addr::LOCALHOST, port, GET).unwrap();
    sched.run().unwrap();

    let resp = req.response().unwrap();
    assert!(!resp.persistent);
    assert!(!req.is_persistent());
    assert_eq!(pool.idle_count(&key(port)), 0);
    assert_eq!(pool.open_connections(), 0);
}

#[test]
fn test_chunked_body_across_reads() {
    let port = serve(|mut s| {
        if !read_request(&mut s) {
            return;
        }
        let parts: [&[u8]; 4] = [
            b"HTTP/1.1 200 OK\r\nTransfer-Encoding: chunked\r\nConnection: keep-alive\r\n\r\n",
            b"3\r\nabc\r",
            b"\n2\r\nde\r\n",
            b"0\r\n\r\n",
        ];
        for part in parts {
            s.write_all(part).unwrap();
            thread::sleep(Duration::from_millis(20));
        }
        while read_request(&mut s) {}
    });
    let (sched, pool) = setup();

    let req = pool.request(Ipv4Addr::LOCALHOST, port, GET).unwrap();
    sched.run().unwrap();

    let resp = req.response().unwrap();
    assert_eq!(resp.framing, Framing::Chunked);
    assert_eq!(req.body().unwrap(), b"abcde");
    assert_eq!(resp.end, req.response_bytes().len());
    assert_eq!(pool.idle_count(&key(port)), 1);
}

#[test]
fn test_close_delimited_body() {
    let port = serve(|mut s| {
        if !read_request(&mut s) {
            return;
        }
        s.write_all(b"HTTP/1.1 200 OK\r\nConnection: keep-alive\r\n\r\nfirst ").unwrap();
        thread::sleep(Duration::from_millis(20));
        s.write_all(b"second ").unwrap();
        thread::sleep(Duration::from_millis(20));
        s.write_all(b"third").unwrap();
    });
    let (sched, pool) = setup();

    let req = pool.request(Ipv4Addr::LOCALHOST, port, GET).unwrap();
    sched.run().unwrap();

    let resp = req.response().unwrap();
    assert_eq!(resp.framing, Framing::CloseDelimited);
    assert_eq!(req.body().unwrap(), b"first second third");
    assert!(!resp.persistent);
    assert_eq!(pool.open_connections(), 0);
}

#[test]
fn test_no_content_completes_without_body() {
    const REPLY: &[u8] = b"HTTP/1.1 204 No Content\r\nConnection: keep-alive\r\n\r\n";
    let port = serve_fixed(REPLY);
    let (sched, pool) = setup();

    let req = pool.request(Ipv4Addr::LOCALHOST, port, GET).unwrap();
    sched.run().unwrap();

    let resp = req.response().unwrap();
    assert_eq!(resp.status, 204);
    assert_eq!(resp.body_len(), 0);
    assert_eq!(&*req.response_bytes(), REPLY);
    assert_eq!(req.response_bytes()[resp.header_len - 4], b'\r');
    assert_eq!(pool.idle_count(&key(port)), 1);
}

#[test]
fn test_truncated_body_is_an_error_and_closes() {
    let port = serve(|mut s| {
        if read_request(&mut s) {
            s.write_all(b"HTTP/1.1 200 OK\r\nConnection: keep-alive\r\nContent-Length: 10\r\n\r\nabc")
                .unwrap();
        }
    });
    let (sched, pool) = setup();

    let req = pool.request(Ipv4Addr::LOCALHOST, port, GET).unwrap();
    sched.run().unwrap();

    match req.take_outcome().unwrap() {
        Err(HttpError::TruncatedBody { expected: 10, received: 3 }) => {}
        other => panic!("unexpected outcome {:?}", other),
    }
    assert!(req.is_complete());
    assert_eq!(pool.open_connections(), 0);
}

#[test]
fn test_connection_refused_surfaces_on_request() {
    let port = {
        let l = TcpListener::bind("127.0.0.1:0").unwrap();
        l.local_addr().unwrap().port()
    };
    let (sched, pool) = setup();

    let req = pool.request(Ipv4Addr::LOCALHOST, port, GET).unwrap();
    sched.run().unwrap();

    assert!(matches!(req.take_outcome(), Some(Err(HttpError::Io(_)))));
    assert_eq!(pool.open_connections(), 0);
    assert_eq!(pool.idle_count(&key(port)), 0);
}

#[test]
fn test_wait_from_another_fiber() {
    let port = serve_fixed(OK_KEEP);
    let (sched, pool) = setup();
    let statuses = Rc::new(RefCell::new(Vec::new()));

    for _ in 0..4 {
        let pool = pool.clone();
        let statuses = statuses.clone();
        sched
            .spawn(move || {
                for _ in 0..3 {
                    let req = pool.request(Ipv4Addr::LOCALHOST, port, GET).unwrap();
                    let resp = req.wait().unwrap();
                    statuses.borrow_mut().push(resp.status);
                }
            })
            .unwrap();
    }
    sched.run().unwrap();

    assert_eq!(*statuses.borrow(), vec![200u16; 12]);
    assert!(pool.idle_count(&key(port)) <= 4);
}

#[test]
fn test_wait_outside_fiber_fails() {
    let port = serve_fixed(OK_KEEP);
    let (_sched, pool) = setup();
    let req = pool.request(Ipv4Addr::LOCALHOST, port, GET).unwrap();
    assert!(matches!(req.wait(), Err(HttpError::Runtime(_))));
}

#[test]
fn test_shutdown_closes_idle_and_refuses() {
    let port = serve_fixed(OK_KEEP);
    let (sched, pool) = setup();

    let _req = pool.request(Ipv4Addr::LOCALHOST, port, GET).unwrap();
    sched.run().unwrap();
    assert_eq!(pool.open_connections(), 1);

    pool.shutdown();
    assert!(pool.is_shutdown());
    assert_eq!(pool.open_connections(), 0);
    assert!(matches!(pool.acquire(Ipv4Addr::LOCALHOST, port), Err(HttpError::Shutdown)));

    // watcher exits on its next turn
    let exited = Rc::new(Cell::new(false));
    let e = exited.clone();
    sched.spawn(move || e.set(true)).unwrap();
    sched.run().unwrap();
    assert!(exited.get());
}

#[test]
fn test_writable_edge_keeps_idle_connection() {
    let (drain_tx, drain_rx) = mpsc::channel::<()>();
    let drain_rx = Arc::new(Mutex::new(drain_rx));
    let port = serve(move |mut s| {
        if !read_request(&mut s) {
            return;
        }
        s.write_all(OK_KEEP).unwrap();
        let rx = drain_rx.lock().unwrap();
        if rx.recv().is_err() {
            return;
        }
        // Drain the filler, then hold the connection open.
        s.set_read_timeout(Some(Duration::from_millis(200))).unwrap();
        let mut buf = [0u8; 64 * 1024];
        while let Ok(n) = s.read(&mut buf) {
            if n == 0 {
                return;
            }
        }
        let _ = rx.recv();
    });
    let (sched, pool) = setup();

    let req = pool.request(Ipv4Addr::LOCALHOST, port, GET).unwrap();
    sched.run().unwrap();
    let fd = req.fd();
    assert_eq!(pool.idle_fds(&key(port)), vec![fd]);

    // Fill the send path until it would block. Once the server drains it
    // the idle socket reports a writable-only edge.
    let filler = [b'x'; 64 * 1024];
    loop {
        let n = unsafe {
            libc::send(
                fd,
                filler.as_ptr() as *const libc::c_void,
                filler.len(),
                libc::MSG_NOSIGNAL,
            )
        };
        if n < 0 {
            assert_eq!(std::io::Error::last_os_error().kind(), ErrorKind::WouldBlock);
            break;
        }
    }
    drain_tx.send(()).unwrap();
    for _ in 0..5 {
        sched.turn(Some(Duration::from_millis(100))).unwrap();
    }

    assert_eq!(pool.idle_fds(&key(port)), vec![fd]);
    assert_eq!(pool.open_connections(), 1);
    drop(drain_tx);
}

#[test]
fn test_reused_connection_reset_is_closed() {
    let port = serve(|mut s| {
        if !read_request(&mut s) {
            return;
        }
        s.write_all(OK_KEEP).unwrap();
        if !read_request(&mut s) {
            return;
        }
        // Zero linger: dropping the stream sends RST
        let linger = libc::linger { l_onoff: 1, l_linger: 0 };
        unsafe {
            libc::setsockopt(
                s.as_raw_fd(),
                libc::SOL_SOCKET,
                libc::SO_LINGER,
                &linger as *const libc::linger as *const libc::c_void,
                std::mem::size_of::<libc::linger>() as libc::socklen_t,
            );
        }
    });
    let (sched, pool) = setup();

    let first = pool.request(Ipv4Addr::LOCALHOST, port, GET).unwrap();
    sched.run().unwrap();
    assert!(first.is_persistent());

    let second = pool.request(Ipv4Addr::LOCALHOST, port, GET).unwrap();
    assert!(second.is_reused());
    sched.run().unwrap();

    assert!(second.is_complete());
    assert!(second.take_outcome().unwrap().is_err());
    assert!(!second.is_persistent());
    assert_eq!(pool.idle_count(&key(port)), 0);
    assert_eq!(pool.open_connections(), 0);
}

#[test]
fn test_spawn_failure_keeps_reused_connection_idle() {
    let port = serve_fixed(OK_KEEP);
    let config = RuntimeConfig::builtin().initial_fibers(2).grow_fibers(1).max_fibers(2);
    let sched = Scheduler::new(config).unwrap();
    let pool = ClientPool::new(sched.clone(), PoolConfig::from_env()).unwrap();

    let req = pool.request(Ipv4Addr::LOCALHOST, port, GET).unwrap();
    sched.run().unwrap();
    let fd = req.fd();

    // The watcher and this fiber use up the fiber pool
    let s = sched.clone();
    sched.spawn_daemon(move || while s.park().is_ok() {}).unwrap();

    assert!(matches!(
        pool.acquire(Ipv4Addr::LOCALHOST, port),
        Err(HttpError::Runtime(RuntimeError::NoSlotsAvailable))
    ));
    assert_eq!(pool.idle_fds(&key(port)), vec![fd]);
    assert_eq!(pool.open_connections(), 1);
}
