//! Keyed Diff Benchmarks
//!
//! Measures the children diff on its own and the renderer patching a
//! `MemoryHost`, for lists that are reversed, shuffled or grown.

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use weft_core::render::{
    diff_keyed, h, longest_increasing_subsequence, DiffHandler, MemoryHost, NodeId, Renderer,
    VNode,
};

const SIZES: [usize; 3] = [100, 1_000, 10_000];

struct Noop;

impl DiffHandler<VNode<u32>> for Noop {
    type Error = ();

    fn patch(&mut self, _old: &VNode<u32>, _new: &mut VNode<u32>) -> Result<(), ()> {
        Ok(())
    }

    fn mount(&mut self, _node: &mut VNode<u32>, _anchor: Option<&VNode<u32>>) -> Result<(), ()> {
        Ok(())
    }

    fn move_before(&mut self, _node: &VNode<u32>, _anchor: Option<&VNode<u32>>) -> Result<(), ()> {
        Ok(())
    }

    fn unmount(&mut self, _node: &VNode<u32>) -> Result<(), ()> {
        Ok(())
    }
}

fn keyed<N>(keys: impl IntoIterator<Item = usize>) -> Vec<VNode<N>> {
    keys.into_iter().map(|key| h("li").key(key)).collect()
}

/// Deterministic shuffle so runs are comparable.
fn shuffled(len: usize) -> Vec<usize> {
    let mut keys: Vec<usize> = (0..len).collect();
    let mut state = 0x9e37_79b9_u64;
    for index in (1..len).rev() {
        state ^= state << 13;
        state ^= state >> 7;
        state ^= state << 17;
        keys.swap(index, (state % (index as u64 + 1)) as usize);
    }
    keys
}

fn bench_diff(c: &mut Criterion) {
    let mut group = c.benchmark_group("diff_keyed");

    for size in SIZES {
        let old: Vec<VNode<u32>> = keyed(0..size);

        group.bench_with_input(BenchmarkId::new("reverse", size), &size, |b, &size| {
            b.iter(|| {
                let mut new = keyed((0..size).rev());
                black_box(diff_keyed(&old, &mut new, &mut Noop))
            });
        });

        group.bench_with_input(BenchmarkId::new("shuffle", size), &size, |b, &size| {
            let order = shuffled(size);
            b.iter(|| {
                let mut new = keyed(order.iter().copied());
                black_box(diff_keyed(&old, &mut new, &mut Noop))
            });
        });

        group.bench_with_input(BenchmarkId::new("append", size), &size, |b, &size| {
            b.iter(|| {
                let mut new = keyed(0..size + size / 10);
                black_box(diff_keyed(&old, &mut new, &mut Noop))
            });
        });
    }

    group.finish();
}

fn bench_lis(c: &mut Criterion) {
    let mut group = c.benchmark_group("longest_increasing_subsequence");

    for size in SIZES {
        let values: Vec<usize> = shuffled(size).into_iter().map(|v| v + 1).collect();
        group.bench_with_input(BenchmarkId::from_parameter(size), &values, |b, values| {
            b.iter(|| black_box(longest_increasing_subsequence(values)));
        });
    }

    group.finish();
}

fn bench_render(c: &mut Criterion) {
    let mut group = c.benchmark_group("render_patch");

    for size in [100, 1_000] {
        group.bench_with_input(BenchmarkId::new("shuffle", size), &size, |b, &size| {
            let order = shuffled(size);
            b.iter(|| {
                let mut host = MemoryHost::new();
                let root = host.create_root();
                let mut renderer = Renderer::new(host);
                let list = |keys: Vec<usize>| -> VNode<NodeId> {
                    h("ul").children(keyed(keys))
                };

                let _ = renderer.render(Some(list((0..size).collect())), &root);
                let _ = renderer.render(Some(list(order.clone())), &root);
                black_box(renderer.host().node_count())
            });
        });
    }

    group.finish();
}

criterion_group!(benches, bench_diff, bench_lis, bench_render);
criterion_main!(benches);
