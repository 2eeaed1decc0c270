//! STUN codec and traversal decision benchmarks
//!
//! Benchmarks request encoding, response decoding and the pure decision paths
//! (advice table, punch candidate generation).
//!
//! Run with: `cargo bench --bench stun_codec`

use criterion::{BenchmarkId, Criterion, black_box, criterion_group, criterion_main};
use natlink_stun::{
    AddressAttribute, MappedAddress, TransactionId, decode_binding_response,
    encode_binding_request, encode_binding_success,
};
use natlink_traversal::punch::candidate_ports;
use natlink_traversal::{NatBehavior, NatType, recommend};
use std::net::{Ipv4Addr, SocketAddrV4};

/// Benchmark Binding Request encoding
fn bench_encode_request(c: &mut Criterion) {
    let tid = TransactionId::random();

    c.bench_function("encode_binding_request", |b| {
        b.iter(|| black_box(encode_binding_request(black_box(&tid))));
    });

    c.bench_function("transaction_id_random", |b| {
        b.iter(|| black_box(TransactionId::random()));
    });
}

/// Benchmark response decoding for both address attributes
fn bench_decode_response(c: &mut Criterion) {
    let mut group = c.benchmark_group("decode_binding_response");
    let tid = TransactionId::random();
    let mapped = MappedAddress::new(Ipv4Addr::new(192, 0, 2, 1), 32853);

    for (name, attr) in [
        ("xor_mapped", AddressAttribute::XorMapped),
        ("mapped", AddressAttribute::Mapped),
    ] {
        let response = encode_binding_success(&tid, mapped, attr);
        group.bench_with_input(BenchmarkId::from_parameter(name), &response, |b, response| {
            b.iter(|| black_box(decode_binding_response(black_box(response), &tid)));
        });
    }

    // Mismatch is the common rejection path for stray datagrams
    let foreign = encode_binding_success(&TransactionId::random(), mapped, AddressAttribute::XorMapped);
    group.bench_function("transaction_mismatch", |b| {
        b.iter(|| black_box(decode_binding_response(black_box(&foreign), &tid)));
    });

    group.finish();
}

/// Benchmark the advice table over every NAT pairing
fn bench_recommend(c: &mut Criterion) {
    let behaviors: Vec<NatBehavior> = NatType::ALL
        .iter()
        .map(|t| NatBehavior::from_nat_type(*t))
        .collect();

    c.bench_function("recommend_all_pairings", |b| {
        b.iter(|| {
            for local in &behaviors {
                for peer in &behaviors {
                    black_box(recommend(local, Some(peer)));
                }
            }
        });
    });
}

/// Benchmark candidate generation for symmetric port guessing
fn bench_candidate_ports(c: &mut Criterion) {
    let mut group = c.benchmark_group("candidate_ports");
    let peer = SocketAddrV4::new(Ipv4Addr::new(198, 51, 100, 1), 40000);

    for spread in [2i32, 8, 32] {
        let offsets: Vec<i32> = std::iter::once(0)
            .chain((1..=spread).flat_map(|o| [o, -o]))
            .collect();
        group.bench_with_input(BenchmarkId::from_parameter(spread), &offsets, |b, offsets| {
            b.iter(|| black_box(candidate_ports(black_box(peer), offsets)));
        });
    }

    group.finish();
}

criterion_group!(
    benches,
    bench_encode_request,
    bench_decode_response,
    bench_recommend,
    bench_candidate_ports
);
criterion_main!(benches);
