use criterion::{criterion_group, criterion_main, Criterion};
use herb_inventory_core::{auto_check, InventoryStore, MedicineRecord, MAX_MEDICINES};

fn mk_record(id: i32) -> MedicineRecord {
    let mut record = match MedicineRecord::new(
        id,
        "astragalus",
        "Gansu",
        "250g/bag",
        40 + id % 60,
        10,
    ) {
        Ok(record) => record,
        Err(err) => panic!("benchmark fixture record failed: {err}"),
    };
    record.usage_history = [3, 0, 7, 2, id % 9, 5, 11];
    record.last_usage = 11;
    record
}

fn full_store() -> InventoryStore {
    let mut store = match InventoryStore::new(MAX_MEDICINES) {
        Ok(store) => store,
        Err(err) => panic!("benchmark store failed: {err}"),
    };
    for id in 1..=300 {
        if let Err(err) = store.insert(mk_record(id)) {
            panic!("benchmark insert id {id} failed: {err}");
        }
    }
    store
}

fn bench_find(c: &mut Criterion) {
    let store = full_store();

    c.bench_function("find_300_records", |b| {
        b.iter(|| {
            for id in [1, 77, 150, 234, 300, 301] {
                let _ = store.find(id);
            }
        });
    });
}

fn bench_auto_check(c: &mut Criterion) {
    c.bench_function("auto_check_300_records", |b| {
        b.iter_batched(
            full_store,
            |mut store| auto_check(&mut store, "2026-08-23", 1_750_000_000),
            criterion::BatchSize::SmallInput,
        );
    });
}

criterion_group!(store_benches, bench_find, bench_auto_check);
criterion_main!(store_benches);
