use std::str::from_utf8;

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use loopserve_parser::method::Method;
use loopserve_parser::raw_request::RawRequest;

const METHODS: [&[u8]; 9] = [
    b"GET", b"PUT", b"POST", b"HEAD", b"TRACE", b"DELETE", b"CONNECT", b"OPTIONS", b"PATCH",
];

fn benchmark(c: &mut Criterion) {
    for method in METHODS {
        c.bench_with_input(
            BenchmarkId::new("method", from_utf8(method).unwrap()),
            black_box(&method),
            |b, i| {
                b.iter(|| {
                    let mut buf = RawRequest::new(i);
                    let token = buf.take_until(|b| b == b' ').unwrap_or(buf.remaining());
                    let _ = Method::from_bytes(token);
                })
            },
        );
    }
}

criterion_group!(benches, benchmark);
criterion_main!(benches);
