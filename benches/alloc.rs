//! Cell allocation and string sharing benchmarks

use valcell::cell::head::CellRef;
use valcell::heap::CellHeap;

use criterion::{black_box, criterion_group, criterion_main, Criterion};

/// Allocate, store and release a batch of scalar cells
fn scalar_churn(heap: &mut CellHeap, n: usize) {
    let cells: Vec<CellRef> = (0..n)
        .map(|i| {
            let c = heap.new_cell().unwrap();
            heap.store_integer(c, i as i64).unwrap();
            c
        })
        .collect();
    for c in cells {
        heap.release(c);
    }
}

/// Widen one cell through the whole scalar lattice
fn widen_to_extended(heap: &mut CellHeap) {
    let c = heap.new_cell().unwrap();
    heap.store_integer(c, 42).unwrap();
    heap.store_string(c, "forty-two as a string value").unwrap();
    heap.store_float(c, 42.0).unwrap();
    heap.bless(c, heap.undef()).unwrap();
    heap.release(c);
}

/// Assign a shareable string and release the copy
fn share_and_release(heap: &mut CellHeap, src: CellRef) {
    let dst = heap.new_cell().unwrap();
    heap.assign_string(dst, src).unwrap();
    heap.release(dst);
}

/// Assign a shareable string then write through the copy
fn share_and_fork(heap: &mut CellHeap, src: CellRef) {
    let dst = heap.new_cell().unwrap();
    heap.assign_string(dst, src).unwrap();
    heap.update_string(dst, |v| v.push(b'!')).unwrap();
    heap.release(dst);
}

/// Build and collapse a list of scalar elements
fn list_build_and_drop(heap: &mut CellHeap, n: usize) {
    let list = heap.new_cell().unwrap();
    for i in 0..n {
        let item = heap.new_cell().unwrap();
        heap.store_integer(item, i as i64).unwrap();
        heap.list_push(list, item).unwrap();
        heap.release(item);
    }
    heap.release(list);
}

pub fn criterion_benchmark(c: &mut Criterion) {
    let mut heap = CellHeap::new();
    let src = heap.new_cell().unwrap();
    heap.store_string(src, "a string comfortably past the sharing threshold")
        .unwrap();

    c.bench_function("scalar_churn_100", |b| {
        b.iter(|| scalar_churn(&mut heap, black_box(100)))
    });
    c.bench_function("widen_to_extended", |b| {
        b.iter(|| widen_to_extended(&mut heap))
    });
    c.bench_function("share_and_release", |b| {
        b.iter(|| share_and_release(&mut heap, src))
    });
    c.bench_function("share_and_fork", |b| {
        b.iter(|| share_and_fork(&mut heap, src))
    });
    c.bench_function("list_build_and_drop_100", |b| {
        b.iter(|| list_build_and_drop(&mut heap, black_box(100)))
    });
}

criterion_group!(benches, criterion_benchmark);
criterion_main!(benches);
