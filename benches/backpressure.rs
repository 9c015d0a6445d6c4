use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use std::sync::Arc;
use std::thread;
use std::time::Duration;
use tick_pipeline::BoundedChannel;

const MESSAGES: u64 = 10_000;
const TIMEOUT: Duration = Duration::from_secs(5);

/// One producer, one consumer, varying capacity: small channels force the
/// producer to park on "not full" most of the time.
fn benchmark_channel_capacity(c: &mut Criterion) {
    let mut group = c.benchmark_group("bounded_channel_spsc_10000_msgs");
    for capacity in [1usize, 4, 100] {
        group.bench_with_input(BenchmarkId::from_parameter(capacity), &capacity, |b, &capacity| {
            b.iter(|| {
                let channel = Arc::new(BoundedChannel::new(capacity));
                let producer = {
                    let channel = Arc::clone(&channel);
                    thread::spawn(move || {
                        for i in 0..MESSAGES {
                            channel.push(black_box(i), TIMEOUT).expect("Push failed");
                        }
                    })
                };

                let mut sum = 0;
                for _ in 0..MESSAGES {
                    sum += channel.pop(TIMEOUT).expect("Pop failed");
                }
                producer.join().expect("Producer panicked");
                black_box(sum)
            });
        });
    }
    group.finish();
}

fn benchmark_slow_consumer(c: &mut Criterion) {
    c.bench_function("bounded_channel_slow_consumer_1000_msgs", |b| {
        b.iter(|| {
            let channel = Arc::new(BoundedChannel::new(16));
            let producer = {
                let channel = Arc::clone(&channel);
                thread::spawn(move || {
                    for i in 0..1000u64 {
                        channel.push(black_box(i), TIMEOUT).expect("Push failed");
                    }
                })
            };

            for _ in 0..1000 {
                let item = channel.pop(TIMEOUT).expect("Pop failed");
                if item % 100 == 0 {
                    thread::sleep(Duration::from_micros(100));
                }
            }
            producer.join().expect("Producer panicked");
            black_box(channel.push_waits())
        });
    });
}

criterion_group!(
    name = benches;
    config = Criterion::default()
        .measurement_time(Duration::from_secs(10))
        .sample_size(20);
    targets = benchmark_channel_capacity, benchmark_slow_consumer
);
criterion_main!(benches);
