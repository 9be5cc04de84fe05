//! Performance benchmarks for the trip-speed mapper and reducer
//! Measures per-file parse throughput and the cost of chunked streaming reads

use criterion::{criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use futures::StreamExt;
use std::hint::black_box;
use std::time::Duration;
use tokio::runtime::Runtime;
use tripreduce::mapreduce::mapper::{map_bytes, map_stream};
use tripreduce::mapreduce::reducer::reduce;
use tripreduce::mapreduce::DayAggregate;

/// Generate a trip file with `rows` records spread over one week
fn create_trip_file(rows: usize) -> Vec<u8> {
    let mut content = String::from(
        "VendorID,tpep_pickup_datetime,tpep_dropoff_datetime,passenger_count,trip_distance,pickup_longitude,pickup_latitude,RatecodeID,store_and_fwd_flag,dropoff_longitude,dropoff_latitude,payment_type,fare_amount,extra,mta_tax,tip_amount,total_amount\n",
    );
    for i in 0..rows {
        let day = 1 + i % 7;
        let minutes = 5 + i % 50;
        content.push_str(&format!(
            "{},2017-01-{:02} 10:00:00,2017-01-{:02} 10:{:02}:00,1,{}.{},-73.99,40.73,1,N,-73.98,40.75,1,10.5,0.5,0.5,2.0,13.5\n",
            i % 3,
            day,
            day,
            minutes,
            1 + i % 9,
            i % 10
        ));
    }
    content.into_bytes()
}

fn bench_map_bytes(c: &mut Criterion) {
    let mut group = c.benchmark_group("map_bytes");

    for rows in &[1_000, 10_000, 100_000] {
        let content = create_trip_file(*rows);
        group.throughput(Throughput::Bytes(content.len() as u64));
        group.bench_with_input(BenchmarkId::new("rows", rows), &content, |b, content| {
            b.iter(|| black_box(map_bytes(black_box(content))));
        });
    }

    group.finish();
}

fn bench_map_stream_chunking(c: &mut Criterion) {
    let rt = Runtime::new().unwrap();
    let content = create_trip_file(50_000);
    let mut group = c.benchmark_group("map_stream");
    group.measurement_time(Duration::from_secs(10));
    group.throughput(Throughput::Bytes(content.len() as u64));

    for chunk_size in &[512, 8 * 1024, 256 * 1024] {
        group.bench_with_input(
            BenchmarkId::new("chunk_size", chunk_size),
            chunk_size,
            |b, &chunk_size| {
                b.to_async(&rt).iter(|| {
                    let chunks: Vec<_> = content
                        .chunks(chunk_size)
                        .map(|chunk| Ok(chunk.to_vec()))
                        .collect();
                    async move {
                        let stream = futures::stream::iter(chunks).boxed();
                        let accumulator = map_stream("bench://trips.csv", stream).await.unwrap();
                        black_box(accumulator.finish())
                    }
                });
            },
        );
    }

    group.finish();
}

fn bench_reduce(c: &mut Criterion) {
    let mut group = c.benchmark_group("reduce");

    for files in &[10, 1_000, 10_000] {
        let aggregates: Vec<DayAggregate> = (0..*files)
            .map(|i| DayAggregate([i as f64, 1.0, 2.0, 3.0, 4.0, 5.0, 6.5]))
            .collect();
        group.bench_with_input(BenchmarkId::new("files", files), &aggregates, |b, aggregates| {
            b.iter(|| black_box(reduce(black_box(aggregates)).unwrap()));
        });
    }

    group.finish();
}

criterion_group!(
    benches,
    bench_map_bytes,
    bench_map_stream_chunking,
    bench_reduce
);
criterion_main!(benches);
