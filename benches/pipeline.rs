//! Benchmarks for the decode and dispatch pipeline.
//!
//! `decode` measures the TLV decoder alone; `app_pipeline` drives the full
//! application loop through `run_with_io` with a fake scanner, the same way
//! the tests in app.rs do.

use criterion::{BenchmarkId, Criterion, Throughput, black_box, criterion_group, criterion_main};
use qingping_listener::app::{Options, Scanner, run_with_io};
use qingping_listener::{
    AdvertisementBuilder, AdvertisementPacket, Backend, ListenerRegistry, MacAddress,
    ManufacturerPayload, ScanError, SensorReading, decode, encode,
};
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use tokio::runtime::Runtime;

const TEST_MAC: MacAddress = MacAddress([0x58, 0x2D, 0x34, 0x10, 0x20, 0x30]);

/// Vendor id, frame type and all three sensor fields.
fn sensor_payload() -> Vec<u8> {
    encode(&SensorReading {
        temperature: Some(2150),
        humidity: Some(4500),
        battery: Some(87),
        rssi: None,
    })
}

/// The payload wrapped in a complete advertisement.
fn sensor_advertisement() -> Vec<u8> {
    let payload = sensor_payload();
    let vendor_id = u16::from_le_bytes([payload[0], payload[1]]);
    AdvertisementBuilder::new()
        .structure(0x01, &[&[0x06]])
        .manufacturer_data(vendor_id, &payload[2..])
        .build()
}

/// Replays raw advertisements on a spawned task, then drops the listeners.
struct FakeScanner {
    adverts: Vec<Vec<u8>>,
}

impl Scanner for FakeScanner {
    fn start_scan(
        &self,
        _backend: Backend,
        listeners: Arc<ListenerRegistry>,
    ) -> Pin<Box<dyn Future<Output = Result<(), ScanError>> + Send + '_>> {
        let adverts = self.adverts.clone();
        Box::pin(async move {
            tokio::spawn(async move {
                for raw in &adverts {
                    listeners.dispatch(&AdvertisementPacket::new(TEST_MAC, -61, raw));
                }
            });
            Ok(())
        })
    }
}

fn default_options() -> Options {
    Options {
        influxdb_measurement: "qingping_measurement".to_string(),
        macs: vec![],
        config: None,
        no_service_data: false,
        verbose: false,
        backend: Backend::default(),
    }
}

fn bench_decode(c: &mut Criterion) {
    let mut group = c.benchmark_group("decode");
    let payload = sensor_payload();

    group.throughput(Throughput::Elements(1));
    group.bench_function("sensor_frame", |b| {
        b.iter(|| {
            let reading = decode(&ManufacturerPayload::new(black_box(&payload)));
            black_box(reading)
        })
    });

    group.finish();
}

/// Benchmark batches through the full pipeline: dispatch -> decode -> format -> write
fn bench_app_pipeline(c: &mut Criterion) {
    let mut group = c.benchmark_group("app_pipeline");
    let rt = Runtime::new().unwrap();
    let advert = sensor_advertisement();

    // Batches stay within the observation channel buffer
    for batch_size in [1, 10, 100] {
        group.throughput(Throughput::Elements(batch_size as u64));
        group.bench_with_input(
            BenchmarkId::from_parameter(batch_size),
            &batch_size,
            |b, &size| {
                let adverts: Vec<Vec<u8>> = (0..size).map(|_| advert.clone()).collect();

                b.iter(|| {
                    let scanner = FakeScanner {
                        adverts: adverts.clone(),
                    };
                    let mut out = Vec::<u8>::with_capacity(128 * size);

                    rt.block_on(async {
                        run_with_io(default_options(), &scanner, &mut out)
                            .await
                            .unwrap();
                    });

                    black_box(out)
                })
            },
        );
    }

    group.finish();
}

criterion_group!(benches, bench_decode, bench_app_pipeline);
criterion_main!(benches);
