//! Terminal rendering for consultation results.
//!
//! Completion details print as a label/value card; roll-ups print as Arrow
//! pretty tables.

use std::io::{self, Write};
use std::sync::Arc;

use arrow::array::{ArrayRef, Float64Array, Int32Array, StringArray, UInt64Array};
use arrow::datatypes::{DataType, Field, Schema};
use arrow::record_batch::RecordBatch;
use arrow::util::pretty::pretty_format_batches;
use orcamento_core::CanonicalRecord;
use orcamento_stream::{CompletionSummary, YearTotal};
use serde_json::Value;

const MAX_LIST_ITEMS: usize = 10;

// ── Completion card ──

/// Write the server's completion report and any unprocessed-row warnings.
pub fn print_completion<W: Write>(out: &mut W, summary: &CompletionSummary) -> io::Result<()> {
    writeln!(out, "=== Consultation complete ===")?;
    writeln!(out, "  {:<26} {}", "records received", summary.received_records)?;
    writeln!(out, "  {:<26} {}", "records reported", summary.total_records)?;
    if !summary.reference_period.is_empty() {
        writeln!(out, "  {:<26} {}", "reference period", summary.reference_period)?;
    }
    if !summary.correction_kind.is_empty() {
        writeln!(out, "  {:<26} {}", "correction", summary.correction_kind)?;
    }
    writeln!(out)?;

    if !summary.has_warnings() {
        return Ok(());
    }

    writeln!(
        out,
        "WARNING: {} records could not be processed",
        summary.total_unprocessed
    )?;
    let show = summary.unprocessed.len().min(MAX_LIST_ITEMS);
    for item in &summary.unprocessed[..show] {
        writeln!(out, "    {}", describe_unprocessed(item))?;
    }
    if summary.unprocessed.len() > MAX_LIST_ITEMS {
        writeln!(
            out,
            "    ... and {} more",
            summary.unprocessed.len() - MAX_LIST_ITEMS
        )?;
    }
    writeln!(out)
}

/// One-line description of an unprocessed row: institution and month when
/// present, otherwise the compact JSON.
fn describe_unprocessed(item: &Value) -> String {
    let field = |name: &str| match item.get(name) {
        Some(Value::String(s)) => Some(s.clone()),
        Some(Value::Number(n)) => Some(n.to_string()),
        _ => None,
    };
    match (field("UNIDADE_ORCAMENTARIA"), field("MES")) {
        (Some(unit), Some(month)) => format!("{unit} (month {month})"),
        (Some(unit), None) => unit,
        _ => item.to_string(),
    }
}

// ── Roll-up tables ──

/// Write per-year and per-institution totals.
pub fn print_summary<W: Write>(
    out: &mut W,
    records: &[CanonicalRecord],
    years: &[YearTotal],
) -> anyhow::Result<()> {
    writeln!(out, "By fiscal year")?;
    writeln!(out, "{}", pretty_format_batches(&[year_batch(years)?])?)?;
    writeln!(out)?;
    writeln!(out, "By institution")?;
    writeln!(out, "{}", pretty_format_batches(&[institution_batch(records)?])?)?;
    Ok(())
}

fn year_batch(years: &[YearTotal]) -> anyhow::Result<RecordBatch> {
    let schema = Schema::new(vec![
        Field::new("year", DataType::Int32, false),
        Field::new("records", DataType::UInt64, false),
        Field::new("paid_in_month", DataType::Float64, false),
    ]);
    let columns: Vec<ArrayRef> = vec![
        Arc::new(Int32Array::from_iter_values(years.iter().map(|y| y.year))),
        Arc::new(UInt64Array::from_iter_values(
            years.iter().map(|y| y.records as u64),
        )),
        Arc::new(Float64Array::from_iter_values(
            years.iter().map(|y| round_cents(y.paid_in_month)),
        )),
    ];
    Ok(RecordBatch::try_new(Arc::new(schema), columns)?)
}

/// Totals per institution, in first-arrival order.
fn institution_batch(records: &[CanonicalRecord]) -> anyhow::Result<RecordBatch> {
    let mut rows: Vec<(&str, u64, f64, f64)> = Vec::new();
    for r in records {
        match rows.iter_mut().find(|row| row.0 == r.institution) {
            Some(row) => {
                row.1 += 1;
                row.2 += r.committed_in_month;
                row.3 += r.paid_in_month;
            }
            None => rows.push((
                r.institution.as_str(),
                1,
                r.committed_in_month,
                r.paid_in_month,
            )),
        }
    }

    let schema = Schema::new(vec![
        Field::new("institution", DataType::Utf8, false),
        Field::new("records", DataType::UInt64, false),
        Field::new("committed_in_month", DataType::Float64, false),
        Field::new("paid_in_month", DataType::Float64, false),
    ]);
    let columns: Vec<ArrayRef> = vec![
        Arc::new(StringArray::from_iter_values(rows.iter().map(|r| r.0))),
        Arc::new(UInt64Array::from_iter_values(rows.iter().map(|r| r.1))),
        Arc::new(Float64Array::from_iter_values(
            rows.iter().map(|r| round_cents(r.2)),
        )),
        Arc::new(Float64Array::from_iter_values(
            rows.iter().map(|r| round_cents(r.3)),
        )),
    ];
    Ok(RecordBatch::try_new(Arc::new(schema), columns)?)
}

fn round_cents(v: f64) -> f64 {
    (v * 100.0).round() / 100.0
}
