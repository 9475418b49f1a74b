//! Reception-loop latency: submit a batch, spin up worker threads that
//! evaluate and return it, and time the broker's `receive` call across
//! population sizes. This is the hot path of every cycle — it runs once
//! per iteration no matter how cheap the fitness function is.

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use optimon_core::broker::{Broker, Command, WorkItem};
use optimon_core::candidate::Candidate;
use optimon_core::config::{BrokerConfig, Domain, Scale};
use optimon_core::param::adaptor::Adaptor;
use optimon_core::param::{Leaf, LeafValue, Tree};
use std::sync::atomic::AtomicBool;
use std::sync::Arc;
use std::thread;
use std::time::Duration;

fn make_candidate() -> Candidate {
    let mut tree = Tree::new();
    tree.push_leaf(Leaf::new(
        "x",
        LeafValue::ConstrainedDouble(0.0, Domain { min: -5.0, max: 5.0, scale: Scale::Linear }),
        Adaptor::gaussian(0.1),
    ));
    Candidate::new(tree, false)
}

fn bench_reception(c: &mut Criterion) {
    let mut group = c.benchmark_group("broker_reception");

    for population_size in [8usize, 64, 256].iter() {
        group.bench_with_input(
            BenchmarkId::new("receive", population_size),
            population_size,
            |b, &size| {
                let config = BrokerConfig { loop_time_ms: 1, first_timeout_ms: 5_000, ..Default::default() };
                let mut broker = Broker::new(&config);
                let pair = broker.buffer_pair();
                let cancel = Arc::new(AtomicBool::new(false));

                let worker_cancel = cancel.clone();
                let worker_pair = pair.clone();
                let worker = thread::spawn(move || {
                    while !worker_cancel.load(std::sync::atomic::Ordering::Relaxed) {
                        match worker_pair.outbound.pop_timeout(Duration::from_millis(5)) {
                            Some(mut item) => {
                                item.candidate.record_result(black_box(1.0), &[], 0.0);
                                if worker_pair.inbound.push_blocking(item, &worker_cancel).is_err() {
                                    break;
                                }
                            }
                            None => continue,
                        }
                    }
                });

                b.iter(|| {
                    let items: Vec<WorkItem> = (0..size)
                        .map(|_| WorkItem {
                            candidate: make_candidate(),
                            assigned_iteration: 0,
                            command: Command::EvaluateOnly,
                            is_parent: false,
                        })
                        .collect();
                    let iter_cancel = AtomicBool::new(false);
                    broker.submit(items, &iter_cancel);
                    black_box(broker.receive(0, size, &iter_cancel).unwrap());
                });

                cancel.store(true, std::sync::atomic::Ordering::Relaxed);
                let _ = worker.join();
            },
        );
    }

    group.finish();
}

criterion_group!(benches, bench_reception);
criterion_main!(benches);
