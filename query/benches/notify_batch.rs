use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use fibre_query::{ListenerRegistry, NotifyManager};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

type Listener = dyn Fn(usize) + Send + Sync;

fn registry_with(listeners: usize, hits: &Arc<AtomicUsize>) -> ListenerRegistry<Listener> {
  let registry = ListenerRegistry::<Listener>::new();
  for _ in 0..listeners {
    let hits = hits.clone();
    // Handles are dropped on purpose: dropping does not unsubscribe.
    let _ = registry.subscribe(Arc::new(move |n| {
      hits.fetch_add(n, Ordering::Relaxed);
    }));
  }
  registry
}

fn bench_notify(c: &mut Criterion) {
  let mut group = c.benchmark_group("notify");

  for &updates in &[16usize, 256, 4096] {
    group.throughput(Throughput::Elements(updates as u64));

    group.bench_with_input(BenchmarkId::new("unbatched", updates), &updates, |b, &updates| {
      let manager = NotifyManager::new();
      let hits = Arc::new(AtomicUsize::new(0));
      let registry = registry_with(4, &hits);
      b.iter(|| {
        for i in 0..updates {
          for listener in registry.listeners() {
            manager.schedule(move || listener(black_box(i)));
          }
        }
      });
    });

    group.bench_with_input(BenchmarkId::new("batched", updates), &updates, |b, &updates| {
      let manager = NotifyManager::new();
      let hits = Arc::new(AtomicUsize::new(0));
      let registry = registry_with(4, &hits);
      b.iter(|| {
        manager.batch(|| {
          for i in 0..updates {
            for listener in registry.listeners() {
              manager.schedule(move || listener(black_box(i)));
            }
          }
        });
      });
    });
  }

  group.finish();
}

fn bench_subscribe(c: &mut Criterion) {
  c.bench_function("registry/subscribe_unsubscribe", |b| {
    let registry = ListenerRegistry::<Listener>::new();
    let listener: Arc<Listener> = Arc::new(|_| {});
    b.iter(|| {
      let handle = registry.subscribe(listener.clone());
      handle.unsubscribe();
    });
  });
}

criterion_group!(benches, bench_notify, bench_subscribe);
criterion_main!(benches);
