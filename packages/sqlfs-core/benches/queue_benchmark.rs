use std::hint::black_box;

use criterion::{criterion_group, criterion_main, Criterion};
use sqlfs_core::ddl::Statement;
use sqlfs_core::{Classifier, DatabaseObject, DeployQueue, KeywordClassifier, ObjectKind, ObjectPath, PendingCommand};

fn column_write(table: usize, column: usize, text: &str) -> PendingCommand {
    let path = ObjectPath::from_segments(["dbo".to_string(), format!("t{}", table), format!("c{}", column)]);
    let class = KeywordClassifier.classify(text).unwrap();
    let statement = Statement::for_fragment(&path, text, &class).unwrap();
    let object = DatabaseObject::local(format!("c{}", column), ObjectKind::Column);
    PendingCommand::create_or_alter(path, object, statement)
}

fn table_create(table: usize) -> PendingCommand {
    let name = format!("t{}", table);
    PendingCommand::create_or_alter(
        ObjectPath::from_segments(["dbo".to_string(), name.clone()]),
        DatabaseObject::local(name.clone(), ObjectKind::Table),
        Statement::CreateTable {
            schema: "dbo".to_string(),
            table: name,
        },
    )
}

fn bench_fold_and_drain(c: &mut Criterion) {
    c.bench_function("fold_100_tables_10_columns", |b| {
        b.iter(|| {
            let mut queue = DeployQueue::new();
            for t in 0..100 {
                queue.push(table_create(t));
                for col in 0..10 {
                    queue.push(column_write(t, col, "COLUMN int NULL"));
                }
            }
            black_box(queue.take_batch());
        });
    });
}

fn bench_rewrites(c: &mut Criterion) {
    c.bench_function("rewrite_same_column_1000", |b| {
        b.iter(|| {
            let mut queue = DeployQueue::new();
            for i in 0..1000 {
                let text = if i % 2 == 0 { "COLUMN int NULL" } else { "COLUMN bigint NULL" };
                queue.push(column_write(0, 0, text));
            }
            black_box(queue.len());
        });
    });
}

criterion_group!(benches, bench_fold_and_drain, bench_rewrites);
criterion_main!(benches);
