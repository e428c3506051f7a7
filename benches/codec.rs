//! Wire codec benchmarks.
//!
//! Measures the hot path of every inbound notification:
//! - Classifying a full status snapshot
//! - Classifying a partial intensity echo
//! - Merging an intensity into a snapshot
//!
//! Run with: cargo bench --bench codec
//! Results saved to: target/criterion/

use std::hint::black_box;

use criterion::{Criterion, criterion_group, criterion_main};
use openvibe_link::protocol::{decode, encode};
use openvibe_link::{Request, TransportKind};

// ============================================================================
// Fixtures
// ============================================================================

const STATUS: &[u8] = br#"{
    "intensity": 40,
    "batteryLevel": 87,
    "isCharging": false,
    "isBluetoothConnected": true,
    "isWifiConnected": true,
    "ipAddress": "10.0.0.5",
    "macAddress": "AA:BB:CC:DD:EE:FF",
    "firmwareVersion": "1.4.0",
    "deviceId": "abc",
    "transport": "WIFI"
}"#;

const INTENSITY: &[u8] = br#"{"requestType":"INTENSITY","intensity":42}"#;

// ============================================================================
// Benchmarks
// ============================================================================

fn bench_decode(c: &mut Criterion) {
    let mut group = c.benchmark_group("decode");

    group.bench_function("status", |b| b.iter(|| decode(black_box(STATUS))));
    group.bench_function("intensity", |b| b.iter(|| decode(black_box(INTENSITY))));

    group.finish();
}

fn bench_merge(c: &mut Criterion) {
    let status = decode(STATUS)
        .ok()
        .and_then(|inbound| inbound.as_status().cloned())
        .expect("fixture is a status");

    c.bench_function("merge_intensity", |b| {
        b.iter(|| black_box(&status).with_intensity(black_box(42)))
    });
}

fn bench_encode(c: &mut Criterion) {
    let request = Request::SwitchTransport {
        transport: TransportKind::Remote,
        server_address: Some("ws://relay.example:6969".into()),
    };

    c.bench_function("encode_switch", |b| b.iter(|| encode(black_box(&request))));
}

criterion_group!(benches, bench_decode, bench_merge, bench_encode);
criterion_main!(benches);
