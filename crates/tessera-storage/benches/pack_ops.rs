//! Criterion micro-benchmarks for halo-sized pack and unpack.

use criterion::{black_box, criterion_group, criterion_main, Criterion};
use tessera_core::Rect;
use tessera_storage::{GridStorage, Region};

/// 256×256 local block plus a margin of 2 on each side.
fn make_storage() -> GridStorage<f64> {
    let mut s = GridStorage::<f64>::allocate(&[260, 260]).unwrap();
    for (i, v) in s.as_mut_slice().iter_mut().enumerate() {
        *v = i as f64;
    }
    s
}

fn bench_pack_row_strip(c: &mut Criterion) {
    let s = make_storage();
    let region = Region::within(Rect::new(&[2, 2], &[2, 256]).unwrap(), s.shape()).unwrap();
    c.bench_function("pack_row_strip_2x256", |b| {
        b.iter(|| black_box(s.pack(black_box(&region)).unwrap()));
    });
}

fn bench_pack_column_strip(c: &mut Criterion) {
    let s = make_storage();
    let region = Region::within(Rect::new(&[2, 2], &[256, 2]).unwrap(), s.shape()).unwrap();
    c.bench_function("pack_column_strip_256x2", |b| {
        b.iter(|| black_box(s.pack(black_box(&region)).unwrap()));
    });
}

fn bench_unpack_column_strip(c: &mut Criterion) {
    let mut s = make_storage();
    let region = Region::within(Rect::new(&[2, 0], &[256, 2]).unwrap(), s.shape()).unwrap();
    let buf = s.pack(&region).unwrap();
    c.bench_function("unpack_column_strip_256x2", |b| {
        b.iter(|| black_box(s.unpack(&region, black_box(&buf)).unwrap()));
    });
}

criterion_group!(
    benches,
    bench_pack_row_strip,
    bench_pack_column_strip,
    bench_unpack_column_strip
);
criterion_main!(benches);
