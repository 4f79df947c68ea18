use criterion::{black_box, criterion_group, criterion_main, Criterion};
use std::path::PathBuf;
use tempfile::TempDir;
use thumbpool::cache::ThumbCache;
use thumbpool::pool::PoolManager;
use thumbpool::queue::RequestQueue;
use thumbpool::request::{Extra, Request};

fn media_urls(size: usize) -> Vec<String> {
    (0..size)
        .map(|i| format!("/media/Series/Show {}/Season 01/episode_{:04}.mkv", i % 10, i))
        .collect()
}

fn bench_queue_fill_and_drain(c: &mut Criterion) {
    let urls = media_urls(1000);

    c.bench_function("queue_1000_push_pop", |b| {
        b.iter(|| {
            let mut queue = RequestQueue::new();
            for url in &urls {
                queue.push(Request::new(
                    url.clone(),
                    PathBuf::from("/tmp/t.jpg"),
                    None,
                    None,
                    Extra::new(),
                ));
            }
            while let Some(request) = queue.pop_oldest() {
                black_box(request);
            }
        });
    });
}

fn bench_thumb_path(c: &mut Criterion) {
    let cache = ThumbCache::new(PathBuf::from("/var/cache/thumbpool"));
    let urls = media_urls(1000);

    c.bench_function("thumb_path_1000_urls", |b| {
        b.iter(|| {
            for url in &urls {
                black_box(cache.thumb_path_get(url));
            }
        });
    });
}

fn bench_generate_duplicates(c: &mut Criterion) {
    let temp_dir = TempDir::new().unwrap();
    let urls = media_urls(200);

    // No workers: everything stays queued, so repeats hit the dedup path
    c.bench_function("generate_200_urls_twice", |b| {
        b.iter(|| {
            let cache = ThumbCache::new(temp_dir.path().to_path_buf());
            let mut pool = PoolManager::new(cache, Vec::new());
            for url in urls.iter().chain(&urls) {
                black_box(pool.generate(url, None, None, Extra::new()));
            }
            pool.shutdown();
        });
    });
}

criterion_group!(
    benches,
    bench_queue_fill_and_drain,
    bench_thumb_path,
    bench_generate_duplicates
);
criterion_main!(benches);
