// Copyright (c) 2025 Dimitris Kafetzis
//
// Licensed under the MIT License.
// See LICENSE file in the project root for full license information.
//
// SPDX-License-Identifier: MIT

//! Benchmarks for the packet codec, registry moves and device placement.

use block_transport::{PacketCodec, PacketType};
use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use memory_manager::{
    Block, Capacity, DeviceBalancer, DeviceSpec, HierarchicalMemoryManager, Tier,
};
use resource_monitor::DeviceId;
use std::sync::Arc;

fn bench_packet_codec(c: &mut Criterion) {
    let mut group = c.benchmark_group("packet_codec");
    for size in [1024usize, 64 * 1024, 1024 * 1024] {
        let data = vec![0xA5u8; size];
        for secure in [false, true] {
            let codec = PacketCodec::new(secure);
            let label = if secure { "sha256" } else { "plain" };
            group.bench_with_input(BenchmarkId::new(format!("build/{label}"), size), &data, |b, data| {
                b.iter(|| codec.build(1, 2, black_box(data), PacketType::Data).unwrap())
            });
            let bytes = codec.build(1, 2, &data, PacketType::Data).unwrap();
            group.bench_with_input(BenchmarkId::new(format!("parse/{label}"), size), &bytes, |b, bytes| {
                b.iter(|| codec.parse(black_box(bytes)).unwrap())
            });
        }
    }
    group.finish();
}

fn bench_registry_migrate(c: &mut Criterion) {
    let registry = HierarchicalMemoryManager::default();
    let blocks: Vec<Block> = (0..256).map(|_| Block::new(16, Vec::new())).collect();
    for b in &blocks {
        registry.register(b, Tier::HostRam).unwrap();
    }

    c.bench_function("registry_migrate_round_trip", |b| {
        b.iter(|| {
            for block in &blocks {
                registry.migrate(block.id(), Tier::LocalDisk).unwrap();
                registry.migrate(block.id(), Tier::HostRam).unwrap();
            }
        })
    });
}

fn bench_device_allocation(c: &mut Criterion) {
    c.bench_function("allocate_with_eviction", |b| {
        b.iter_batched(
            || {
                let registry = Arc::new(HierarchicalMemoryManager::default());
                let balancer = DeviceBalancer::new(
                    Arc::clone(&registry),
                    [DeviceSpec::new(DeviceId(0), Capacity::from_gb(1), 16)],
                );
                let blocks: Vec<Block> = (0..64).map(|_| Block::new(32, Vec::new())).collect();
                (balancer, blocks)
            },
            |(balancer, blocks)| {
                for block in blocks {
                    balancer.allocate_block(block, DeviceId(0)).unwrap();
                }
            },
            criterion::BatchSize::SmallInput,
        )
    });
}

criterion_group!(
    benches,
    bench_packet_codec,
    bench_registry_migrate,
    bench_device_allocation
);
criterion_main!(benches);
