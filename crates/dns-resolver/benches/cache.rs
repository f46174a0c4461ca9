use bytes::Bytes;
use criterion::{criterion_group, criterion_main, BatchSize, BenchmarkId, Criterion, Throughput};
use std::net::Ipv4Addr;

use dns_resolver::cache::Cache;
use dns_types::protocol::types::*;

#[allow(non_snake_case)]
fn bench__insert__unique(c: &mut Criterion) {
    let mut group = c.benchmark_group("insert/unique");
    for size in [1, 100, 1000] {
        let rrs = make_rrs(size, 300);
        group.throughput(Throughput::Elements(size as u64));
        group.bench_with_input(BenchmarkId::from_parameter(size), &rrs, |b, rrs| {
            b.iter(|| build_cache(rrs));
        });
    }
    group.finish();
}

#[allow(non_snake_case)]
fn bench__insert__duplicate(c: &mut Criterion) {
    let mut group = c.benchmark_group("insert/duplicate");
    for size in [1, 100, 1000] {
        let rrs = vec![a_record("www.example.com.", 300); size];
        group.throughput(Throughput::Elements(size as u64));
        group.bench_with_input(BenchmarkId::from_parameter(size), &rrs, |b, rrs| {
            b.iter(|| build_cache(rrs));
        });
    }
    group.finish();
}

#[allow(non_snake_case)]
fn bench__get__hit(c: &mut Criterion) {
    let mut group = c.benchmark_group("get/hit");
    for size in [1, 100, 1000] {
        let rrs = make_rrs(size, 300);
        let cache = build_cache(&rrs);
        group.throughput(Throughput::Elements(size as u64));
        group.bench_with_input(BenchmarkId::from_parameter(size), &rrs, |b, rrs| {
            b.iter(|| {
                for rr in rrs {
                    cache.get(RecordType::A, &rr.name);
                }
            });
        });
    }
    group.finish();
}

#[allow(non_snake_case)]
fn bench__remove_expired(c: &mut Criterion) {
    let mut group = c.benchmark_group("remove_expired");
    for size in [1, 100, 1000] {
        let rrs = make_rrs(size, 0);
        group.throughput(Throughput::Elements(size as u64));
        group.bench_with_input(BenchmarkId::from_parameter(size), &rrs, |b, rrs| {
            b.iter_batched(
                || build_cache(rrs),
                |mut cache| cache.remove_expired(),
                BatchSize::SmallInput,
            );
        });
    }
    group.finish();
}

fn build_cache(rrs: &[ResourceRecord]) -> Cache {
    let mut cache = Cache::new();
    for rr in rrs {
        cache.insert(rr);
    }
    cache
}

fn make_rrs(size: usize, ttl: u32) -> Vec<ResourceRecord> {
    (0..size)
        .map(|i| a_record(&format!("host-{i}.example.com."), ttl))
        .collect()
}

fn a_record(name: &str, ttl: u32) -> ResourceRecord {
    ResourceRecord {
        name: DomainName::from_dotted_string(name).unwrap(),
        rtype: RecordType::A,
        rclass: RecordClass::IN,
        ttl,
        rdata: Bytes::copy_from_slice(&Ipv4Addr::new(1, 1, 1, 1).octets()),
    }
}

criterion_group!(
    benches,
    bench__insert__unique,
    bench__insert__duplicate,
    bench__get__hit,
    bench__remove_expired,
);
criterion_main!(benches);
