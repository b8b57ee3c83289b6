//! Criterion benchmarks for entity_query

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use entity_query::core::{classify, SqlBuilder};
use entity_query::prelude::*;

#[derive(Debug, Clone, Default)]
struct Trip {
    id: i64,
    name: String,
    driver_id: i64,
    departure_id: i64,
    price: f64,
}

entity_query::impl_entity!(Trip => "Trips" {
    id: "Id" [key, computed],
    name: "Name",
    driver_id: "DriverId",
    departure_id: "DepartureId",
    price: "Price",
});

#[derive(Debug, Clone, Default)]
struct Driver {
    driver_id: i64,
    full_name: String,
}

entity_query::impl_entity!(Driver => "Drivers" {
    driver_id: "DriverId" [key],
    full_name: "FullName",
});

fn registry() -> MetadataRegistry {
    MetadataRegistry::builder()
        .register::<Trip>()
        .and_then(|b| b.register::<Driver>())
        .expect("entities register")
        .build()
}

// ============================================================================
// Statement Compilation Benchmarks
// ============================================================================

fn bench_select_compilation(c: &mut Criterion) {
    let registry = registry();
    let mut group = c.benchmark_group("select_compilation");
    group.throughput(Throughput::Elements(1));

    let joined = QueryModel::<Trip>::new()
        .join::<Driver>(
            JoinKind::Inner,
            Expr::field("driver_id").eq(Expr::field_of::<Driver>("driver_id")),
        )
        .filter(Expr::field("departure_id").eq(5_i64))
        .filter(Expr::field("name").contains("night"))
        .order_by_desc(Expr::field("price"))
        .page(3, 25);

    for dialect in [SqlDialect::SqlServer, SqlDialect::Sqlite] {
        let builder = SqlBuilder::new(&registry, dialect);
        group.bench_with_input(
            BenchmarkId::new("join_filter_page", dialect.to_str()),
            &joined,
            |b, model| b.iter(|| black_box(builder.select(black_box(model)).unwrap())),
        );
    }

    let builder = SqlBuilder::new(&registry, SqlDialect::SqlServer);
    let grouped = QueryModel::<Trip>::new()
        .group_by(&[("driver_id", Expr::field("driver_id"))])
        .aggregate(AggregateFunction::Count, None, "trips")
        .aggregate(AggregateFunction::Sum, Some(Expr::field("price")), "revenue");
    group.bench_function("group_aggregate", |b| {
        b.iter(|| black_box(builder.select(black_box(&grouped)).unwrap()))
    });
    group.bench_function("total_count", |b| {
        b.iter(|| black_box(builder.total_count(black_box(&joined)).unwrap()))
    });

    group.finish();
}

fn bench_filter_count(c: &mut Criterion) {
    let registry = registry();
    let builder = SqlBuilder::new(&registry, SqlDialect::SqlServer);
    let mut group = c.benchmark_group("filter_count");

    for count in [1, 10, 50] {
        let model = (0..count).fold(QueryModel::<Trip>::new(), |model, i| {
            model.filter(Expr::field("price").gt(i as f64))
        });
        group.throughput(Throughput::Elements(count as u64));
        group.bench_with_input(BenchmarkId::from_parameter(count), &model, |b, model| {
            b.iter(|| black_box(builder.select(black_box(model)).unwrap()))
        });
    }

    group.finish();
}

// ============================================================================
// Write Statement Benchmarks
// ============================================================================

fn bench_insert_batches(c: &mut Criterion) {
    let registry = registry();
    let mut group = c.benchmark_group("insert_batches");

    for rows in [10usize, 1_000] {
        let trips: Vec<Trip> = (0..rows)
            .map(|i| Trip {
                name: format!("Trip {}", i),
                driver_id: (i % 7) as i64,
                departure_id: (i % 5) as i64,
                price: i as f64,
                ..Default::default()
            })
            .collect();
        group.throughput(Throughput::Elements(rows as u64));
        group.bench_with_input(BenchmarkId::from_parameter(rows), &trips, |b, trips| {
            b.iter(|| {
                let mut builder = InsertBuilder::of::<Trip>(&registry).unwrap();
                for trip in trips {
                    builder = builder.entity(trip).unwrap();
                }
                black_box(builder.build_batches(SqlDialect::SqlServer).unwrap())
            })
        });
    }

    group.finish();
}

// ============================================================================
// Classification and Mapping Benchmarks
// ============================================================================

fn bench_classify(c: &mut Criterion) {
    let mut group = c.benchmark_group("classify");
    let messages = [
        ("unique", "Violation of UNIQUE KEY constraint 'UQ_Users_Email'. Cannot insert duplicate key."),
        ("not_null", "NOT NULL constraint failed: Passengers.Email"),
        ("generic", "near \"SELEC\": syntax error"),
    ];
    for (name, message) in messages {
        group.bench_with_input(BenchmarkId::from_parameter(name), message, |b, message| {
            b.iter(|| black_box(classify(black_box(message))))
        });
    }
    group.finish();
}

fn bench_row_mapping(c: &mut Criterion) {
    let row: DatabaseRow = [
        ("id", DatabaseValue::Long(7)),
        ("name", DatabaseValue::from("Night bus")),
        ("driver_id", DatabaseValue::Long(3)),
        ("departure_id", DatabaseValue::Long(5)),
        ("price", DatabaseValue::Double(12.5)),
    ]
    .into_iter()
    .collect();

    c.bench_function("row_mapping/entity", |b| {
        b.iter(|| black_box(Trip::from_row(black_box(&row)).unwrap()))
    });
}

criterion_group!(
    benches,
    bench_select_compilation,
    bench_filter_count,
    bench_insert_batches,
    bench_classify,
    bench_row_mapping
);
criterion_main!(benches);
