//! Response framing throughput

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use fiber_http::ResponseFramer;

fn content_length_response(body: usize) -> Vec<u8> {
    let mut wire = format!(
        "HTTP/1.1 200 OK\r\nServer: bench\r\nContent-Type: text/plain\r\n\
         Connection: keep-alive\r\nContent-Length: {}\r\n\r\n",
        body
    )
    .into_bytes();
    wire.resize(wire.len() + body, b'x');
    wire
}

fn chunked_response(chunks: usize, chunk: usize) -> Vec<u8> {
    let mut wire = b"HTTP/1.1 200 OK\r\nTransfer-Encoding: chunked\r\nConnection: keep-alive\r\n\r\n".to_vec();
    for _ in 0..chunks {
        wire.extend_from_slice(format!("{:x}\r\n", chunk).as_bytes());
        wire.resize(wire.len() + chunk, b'y');
        wire.extend_from_slice(b"\r\n");
    }
    wire.extend_from_slice(b"0\r\n\r\n");
    wire
}

fn bench_content_length(c: &mut Criterion) {
    let mut group = c.benchmark_group("content_length");
    for body in [0usize, 512, 16 * 1024] {
        let wire = content_length_response(body);
        group.throughput(Throughput::Bytes(wire.len() as u64));
        group.bench_with_input(BenchmarkId::from_parameter(body), &wire, |b, wire| {
            b.iter(|| {
                let mut framer = ResponseFramer::new(false);
                black_box(framer.advance(black_box(wire)).ok().flatten())
            })
        });
    }
    group.finish();
}

fn bench_chunked(c: &mut Criterion) {
    let mut group = c.benchmark_group("chunked");
    for chunks in [1usize, 16, 128] {
        let wire = chunked_response(chunks, 256);
        group.throughput(Throughput::Bytes(wire.len() as u64));
        group.bench_with_input(BenchmarkId::from_parameter(chunks), &wire, |b, wire| {
            b.iter(|| {
                let mut framer = ResponseFramer::new(false);
                black_box(framer.advance(black_box(wire)).ok().flatten())
            })
        });
    }
    group.finish();
}

/// Response arriving a slice at a time, framed after every read
fn bench_incremental(c: &mut Criterion) {
    let wire = chunked_response(32, 1024);
    c.bench_function("chunked_incremental_1k_reads", |b| {
        b.iter(|| {
            let mut framer = ResponseFramer::new(false);
            let mut end = 0;
            loop {
                end = (end + 1024).min(wire.len());
                if let Ok(Some(resp)) = framer.advance(&wire[..end]) {
                    break black_box(resp);
                }
                if end == wire.len() {
                    unreachable!("complete response not framed");
                }
            }
        })
    });
}

criterion_group!(benches, bench_content_length, bench_chunked, bench_incremental);
criterion_main!(benches);
