//! Arrow schema for canonical spending records.
//!
//! Chart and export consumers read snapshots as columnar batches rather than
//! walking `CanonicalRecord` structs.

use std::sync::Arc;

use arrow::array::{
    ArrayRef, Float64Builder, Int32Builder, StringBuilder, UInt32Builder, UInt64Builder,
};
use arrow::datatypes::{DataType, Field, Schema};
use arrow::error::ArrowError;
use arrow::record_batch::RecordBatch;

use crate::record::{CanonicalRecord, MoneyField};

/// Schema for one snapshot of canonical records.
pub fn canonical_record_schema() -> Schema {
    let mut fields = vec![
        Field::new("id", DataType::UInt64, false),
        Field::new("year", DataType::Int32, false),
        Field::new("month", DataType::UInt32, false),
        Field::new("institution", DataType::Utf8, false),
    ];
    fields.extend(
        MoneyField::ALL
            .iter()
            .map(|f| Field::new(f.as_str(), DataType::Float64, false)),
    );
    fields.extend([
        Field::new("function", DataType::Utf8, true),
        Field::new("expense_group", DataType::Utf8, true),
        Field::new("funding_source", DataType::Utf8, true),
        Field::new("correction_factor", DataType::Float64, true),
        Field::new("correction_period_index", DataType::Float64, true),
        Field::new("correction_reference_index", DataType::Float64, true),
        Field::new("correction_reference_period", DataType::Utf8, true),
        Field::new("correction_kind", DataType::Utf8, true),
    ]);
    Schema::new(fields)
}

/// Build a single `RecordBatch` from a snapshot, preserving its order.
pub fn records_to_batch(records: &[CanonicalRecord]) -> Result<RecordBatch, ArrowError> {
    let n = records.len();

    let mut ids = UInt64Builder::with_capacity(n);
    let mut years = Int32Builder::with_capacity(n);
    let mut months = UInt32Builder::with_capacity(n);
    let mut institutions = StringBuilder::new();
    for r in records {
        ids.append_value(r.id);
        years.append_value(r.year);
        months.append_value(r.month);
        institutions.append_value(&r.institution);
    }

    let mut columns: Vec<ArrayRef> = vec![
        Arc::new(ids.finish()),
        Arc::new(years.finish()),
        Arc::new(months.finish()),
        Arc::new(institutions.finish()),
    ];

    for field in MoneyField::ALL {
        let mut b = Float64Builder::with_capacity(n);
        for r in records {
            b.append_value(r.amount(field));
        }
        columns.push(Arc::new(b.finish()));
    }

    columns.push(utf8_column(records, |r| r.function.as_deref()));
    columns.push(utf8_column(records, |r| r.expense_group.as_deref()));
    columns.push(utf8_column(records, |r| r.funding_source.as_deref()));
    columns.push(f64_column(records, |r| r.correction.as_ref()?.factor));
    columns.push(f64_column(records, |r| r.correction.as_ref()?.period_index));
    columns.push(f64_column(records, |r| r.correction.as_ref()?.reference_index));
    columns.push(utf8_column(records, |r| {
        r.correction.as_ref()?.reference_period.as_deref()
    }));
    columns.push(utf8_column(records, |r| r.correction.as_ref()?.kind.as_deref()));

    RecordBatch::try_new(Arc::new(canonical_record_schema()), columns)
}

fn utf8_column<'a>(
    records: &'a [CanonicalRecord],
    get: impl Fn(&'a CanonicalRecord) -> Option<&'a str>,
) -> ArrayRef {
    let mut b = StringBuilder::new();
    for r in records {
        b.append_option(get(r));
    }
    Arc::new(b.finish())
}

fn f64_column(
    records: &[CanonicalRecord],
    get: impl Fn(&CanonicalRecord) -> Option<f64>,
) -> ArrayRef {
    let mut b = Float64Builder::with_capacity(records.len());
    for r in records {
        b.append_option(get(r));
    }
    Arc::new(b.finish())
}
