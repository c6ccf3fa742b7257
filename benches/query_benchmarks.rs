//! Criterion benchmarks for rust_orm_system

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use rust_orm_system::core::{
    ColumnValue, Connective, FilterValue, Operation, OrderDirection, QueryBuilder,
};
use rust_orm_system::prelude::*;
use std::sync::Arc;

#[derive(Debug, Clone, Default)]
struct Invoice {
    id: i64,
    customer: String,
    total: f64,
    paid: bool,
    lines: Vec<InvoiceLine>,
}

#[derive(Debug, Clone, Default)]
struct InvoiceLine {
    id: i64,
    invoice_id: i64,
    amount: f64,
}

impl Entity for Invoice {
    const TYPE_NAME: &'static str = "Invoice";

    fn define(schema: &mut SchemaBuilder<Self>) {
        schema.field("Id", |i| &i.id, |i| &mut i.id).db("id");
        schema
            .field("Customer", |i| &i.customer, |i| &mut i.customer)
            .db("customer");
        schema.field("Total", |i| &i.total, |i| &mut i.total).db("total");
        schema.field("Paid", |i| &i.paid, |i| &mut i.paid).db("paid");
        schema
            .has_many("Lines", |i| &i.lines, |i| &mut i.lines)
            .fk("InvoiceId");
    }
}

impl Entity for InvoiceLine {
    const TYPE_NAME: &'static str = "InvoiceLine";

    fn define(schema: &mut SchemaBuilder<Self>) {
        schema.field("Id", |l| &l.id, |l| &mut l.id).db("id");
        schema
            .field("InvoiceId", |l| &l.invoice_id, |l| &mut l.invoice_id)
            .db("invoice_id");
        schema.field("Amount", |l| &l.amount, |l| &mut l.amount).db("amount");
    }
}

fn invoice_builder() -> QueryBuilder {
    QueryBuilder::new(Schema::<Invoice>::reflect())
}

// ============================================================================
// SQL Generation Benchmarks
// ============================================================================

fn bench_select_generation(c: &mut Criterion) {
    let mut group = c.benchmark_group("select_generation");
    group.throughput(Throughput::Elements(1));

    for dialect in [Dialect::Mysql, Dialect::Mssql, Dialect::Sqlite] {
        let mut qb = invoice_builder();
        qb.add_where(Connective::And, "Paid", Operator::Eq, FilterValue::single(false))
            .add_where(Connective::And, "Total", Operator::Gt, FilterValue::single(100.0))
            .add_order("Total", OrderDirection::Desc)
            .set_offset(40)
            .set_limit(20);

        group.bench_with_input(
            BenchmarkId::from_parameter(dialect),
            &qb,
            |b, qb| b.iter(|| black_box(qb.to_sql(black_box(dialect), "app_"))),
        );
    }

    group.finish();
}

fn bench_write_generation(c: &mut Criterion) {
    let mut group = c.benchmark_group("write_generation");
    group.throughput(Throughput::Elements(1));

    let schema = Schema::<Invoice>::reflect();
    let invoice = Invoice {
        id: 7,
        customer: "ACME".to_string(),
        total: 1250.5,
        paid: true,
        lines: Vec::new(),
    };

    group.bench_function("insert", |b| {
        b.iter(|| {
            let mut qb = invoice_builder();
            qb.set_operation(Operation::Insert)
                .set_data(schema.column_values(black_box(&invoice)));
            black_box(qb.to_sql(Dialect::Sqlite, ""))
        });
    });

    group.bench_function("update", |b| {
        b.iter(|| {
            let mut qb = invoice_builder();
            qb.set_operation(Operation::Update)
                .set_data(schema.column_values(black_box(&invoice)))
                .add_where(Connective::And, "Id", Operator::Eq, FilterValue::single(invoice.id));
            black_box(qb.to_sql(Dialect::Mysql, ""))
        });
    });

    group.finish();
}

fn bench_in_list(c: &mut Criterion) {
    let mut group = c.benchmark_group("in_list");

    for size in [10usize, 100, 1000] {
        let keys: Vec<i64> = (0..size as i64).collect();
        group.throughput(Throughput::Elements(size as u64));
        group.bench_with_input(BenchmarkId::from_parameter(size), &keys, |b, keys| {
            b.iter(|| {
                let mut qb = QueryBuilder::for_table("invoice_line");
                qb.add_where(
                    Connective::And,
                    "invoice_id",
                    Operator::In,
                    FilterValue::list(keys.iter().copied()),
                );
                black_box(qb.to_sql(Dialect::Sqlite, ""))
            });
        });
    }

    group.finish();
}

// ============================================================================
// Row Mapping Benchmarks
// ============================================================================

fn bench_row_mapping(c: &mut Criterion) {
    let mut group = c.benchmark_group("row_mapping");
    let schema = Schema::<Invoice>::reflect();

    for size in [1usize, 100, 1000] {
        let rows: Vec<DatabaseRow> = (0..size)
            .map(|i| {
                let mut row = DatabaseRow::new();
                row.insert("id".to_string(), DatabaseValue::Long(i as i64));
                row.insert("customer".to_string(), DatabaseValue::from("ACME"));
                row.insert("total".to_string(), DatabaseValue::Double(i as f64 * 1.5));
                row.insert("paid".to_string(), DatabaseValue::Long((i % 2) as i64));
                row
            })
            .collect();

        group.throughput(Throughput::Elements(size as u64));
        group.bench_with_input(BenchmarkId::from_parameter(size), &rows, |b, rows| {
            b.iter(|| {
                let mut invoices = Vec::with_capacity(rows.len());
                for row in rows {
                    schema.append_row(&mut invoices, row).ok();
                }
                black_box(invoices)
            });
        });
    }

    group.finish();
}

fn bench_column_scan(c: &mut Criterion) {
    let mut group = c.benchmark_group("column_scan");
    group.throughput(Throughput::Elements(1));

    let long = DatabaseValue::Long(123_456_789);
    let text = DatabaseValue::Bytes(b"123456789".to_vec());
    let null = DatabaseValue::Null;

    group.bench_function("i64_from_long", |b| {
        b.iter(|| black_box(i64::scan(black_box(&long))))
    });

    group.bench_function("i64_from_text", |b| {
        b.iter(|| black_box(i64::scan(black_box(&text))))
    });

    group.bench_function("optional_from_null", |b| {
        b.iter(|| black_box(Option::<i64>::scan(black_box(&null))))
    });

    group.bench_function("string_from_text", |b| {
        b.iter(|| black_box(String::scan(black_box(&text))))
    });

    group.finish();
}

fn bench_schema_lookup(c: &mut Criterion) {
    let mut group = c.benchmark_group("schema_lookup");
    group.throughput(Throughput::Elements(1));

    group.bench_function("reflect_cached", |b| {
        b.iter(|| black_box(Schema::<Invoice>::reflect()))
    });

    let schema: Arc<Schema<Invoice>> = Schema::<Invoice>::reflect();
    group.bench_function("column_to_field", |b| {
        b.iter(|| black_box(schema.column_name_to_field_name(black_box("total"))))
    });

    group.finish();
}

criterion_group!(
    benches,
    bench_select_generation,
    bench_write_generation,
    bench_in_list,
    bench_row_mapping,
    bench_column_scan,
    bench_schema_lookup,
);

criterion_main!(benches);
