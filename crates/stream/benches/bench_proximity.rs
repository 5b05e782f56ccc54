use std::hint::black_box;
use std::sync::Arc;
use std::time::Instant;

use fogwar_common::{ActorId, ActorSample, HeightBounds, TilePosition};
use fogwar_kernel::{LayeredWorld, VisibilityStore};
use fogwar_stream::{ActorGrid, ProximityConfig, apply_delta, classify};

fn make_samples(actor_count: usize, spacing: f64) -> Vec<ActorSample> {
    let side = (actor_count as f64).sqrt().ceil() as usize;
    (0..actor_count)
        .map(|i| {
            let x = (i % side) as f64 * spacing;
            let z = (i / side) as f64 * spacing;
            ActorSample::at(ActorId::new(), x, z)
        })
        .collect()
}

fn make_store() -> VisibilityStore {
    let store = VisibilityStore::default();
    store.attach_world(Arc::new(LayeredWorld::new(HeightBounds::new(-64, 384), 0, 62)));
    store
}

fn bench_classify(actor_count: usize, iterations: usize) {
    let samples = make_samples(actor_count, 48.0);
    let grid = ActorGrid::from_samples(&samples);
    let store = make_store();
    let config = ProximityConfig::default();

    let start = Instant::now();
    for _ in 0..iterations {
        let _ = black_box(classify(&config, black_box(&grid), |tile| store.get_state(tile)));
    }
    let elapsed = start.elapsed();
    let per_iter = elapsed / iterations as u32;
    println!(
        "  classify ({actor_count} actors, {iterations} iters): {per_iter:?}/iter, total {elapsed:?}"
    );
}

fn bench_pass_with_capture(actor_count: usize, iterations: usize) {
    let store = make_store();
    let config = ProximityConfig::default();

    let start = Instant::now();
    for i in 0..iterations {
        // Move every actor one tile each pass so the ring keeps fogging.
        let samples: Vec<ActorSample> = make_samples(actor_count, 48.0)
            .into_iter()
            .map(|mut s| {
                s.position.x += (i * 16) as f64;
                s
            })
            .collect();
        let grid = ActorGrid::from_samples(&samples);
        let (delta, _) = classify(&config, &grid, |tile| store.get_state(tile));
        let _ = black_box(apply_delta(&store, &delta));
    }
    let elapsed = start.elapsed();
    let per_iter = elapsed / iterations as u32;
    println!(
        "  pass + capture ({actor_count} actors, {iterations} iters): {per_iter:?}/iter, total {elapsed:?}, {} tiles stored",
        store.len()
    );
}

fn bench_store_reads(tile_count: i32, iterations: usize) {
    let store = make_store();
    let config = ProximityConfig::default();
    let samples = make_samples((tile_count / 25).max(1) as usize, 80.0);
    let (delta, _) = classify(&config, &ActorGrid::from_samples(&samples), |tile| store.get_state(tile));
    apply_delta(&store, &delta);

    let start = Instant::now();
    for i in 0..iterations {
        let pos = TilePosition::new(i as i32 % tile_count, (i as i32 / tile_count) % tile_count);
        let _ = black_box(store.get_state(black_box(pos)));
    }
    let elapsed = start.elapsed();
    let per_iter = elapsed / iterations as u32;
    println!("  get_state ({iterations} iters): {per_iter:?}/iter, total {elapsed:?}");
}

fn main() {
    println!("=== Proximity Benchmarks ===\n");

    println!("Classify (read-only diff):");
    bench_classify(1, 10000);
    bench_classify(16, 1000);
    bench_classify(256, 100);

    println!("\nPass with snapshot capture:");
    bench_pass_with_capture(1, 50);
    bench_pass_with_capture(16, 10);

    println!("\nStore reads:");
    bench_store_reads(100, 1_000_000);

    println!("\n=== Done ===");
}
