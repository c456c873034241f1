use std::sync::Arc;

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};

use cmpsvc_core::config::ReporterConfig;
use cmpsvc_core::wire::encode_request;
use cmpsvc_core::SecretKey;
use cmpsvc_executor::Comparator;
use cmpsvc_module::{Secretbox, SpinPolicy, ThroughputReporter};

fn frame(sb: &Secretbox, len: usize) -> Vec<u8> {
    let a = sb.seal_random(&vec![b'7'; len]).unwrap();
    let b = sb.seal_random(&vec![b'8'; len]).unwrap();
    let mut out = Vec::new();
    encode_request(&a.as_value().unwrap(), &b.as_value().unwrap(), &mut out).unwrap();
    out
}

fn bench_compare_frame(c: &mut Criterion) {
    let key = SecretKey::from_bytes([0x2a; 32]);
    let sb = Secretbox::new(&key);

    let mut group = c.benchmark_group("compare_frame");
    group.throughput(Throughput::Elements(1));
    for len in [16usize, 64, 256] {
        let f = frame(&sb, len);
        for (label, reporter) in [("sampled", ReporterConfig::default()), ("unsampled", ReporterConfig::disabled())] {
            let reporter = Arc::new(ThroughputReporter::new(reporter, SpinPolicy::default()));
            let mut cmp = Comparator::new(&key, reporter);
            group.bench_with_input(BenchmarkId::new(label, len), &f, |bencher, f| {
                bencher.iter(|| black_box(cmp.compare_frame(black_box(f)).unwrap()));
            });
        }
    }
    group.finish();
}

criterion_group!(benches, bench_compare_frame);
criterion_main!(benches);
