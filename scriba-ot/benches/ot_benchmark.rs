use criterion::{black_box, criterion_group, criterion_main, Criterion};
use scriba_ot::{apply, transform, transform_against_log, Operation};

fn medium_doc() -> String {
    "The quick brown fox jumps over the lazy dog. ".repeat(40)
}

fn bench_apply_insert(c: &mut Criterion) {
    let doc = medium_doc();
    let op = Operation::Insert {
        position: doc.chars().count() / 2,
        value: "hello".to_string(),
    };

    c.bench_function("apply_insert_1.8KB_doc", |b| {
        b.iter(|| black_box(apply(black_box(&doc), black_box(&op)).unwrap()))
    });
}

fn bench_apply_delete(c: &mut Criterion) {
    let doc = medium_doc();
    let op = Operation::Delete {
        position: doc.chars().count() / 2,
        length: 20,
    };

    c.bench_function("apply_delete_1.8KB_doc", |b| {
        b.iter(|| black_box(apply(black_box(&doc), black_box(&op)).unwrap()))
    });
}

fn bench_transform_pair(c: &mut Criterion) {
    let incoming = Operation::Insert {
        position: 120,
        value: "abc".to_string(),
    };
    let applied = Operation::Delete {
        position: 40,
        length: 25,
    };

    c.bench_function("transform_insert_vs_delete", |b| {
        b.iter(|| black_box(transform(black_box(&incoming), black_box(&applied))))
    });
}

fn bench_transform_against_log(c: &mut Criterion) {
    // A client 100 revisions behind: the worst realistic rebase.
    let log: Vec<Operation> = (0..100)
        .map(|i| {
            if i % 3 == 0 {
                Operation::Delete {
                    position: i,
                    length: 2,
                }
            } else {
                Operation::Insert {
                    position: i,
                    value: "xy".to_string(),
                }
            }
        })
        .collect();
    let op = Operation::Insert {
        position: 5,
        value: "stale".to_string(),
    };

    c.bench_function("transform_against_log_100_entries", |b| {
        b.iter(|| black_box(transform_against_log(black_box(op.clone()), &log)))
    });
}

criterion_group!(
    benches,
    bench_apply_insert,
    bench_apply_delete,
    bench_transform_pair,
    bench_transform_against_log
);
criterion_main!(benches);
