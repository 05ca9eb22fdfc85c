//! Progressive, append-only record collection for one session.

use orcamento_core::{CanonicalRecord, RawServerRecord, normalize_record};

/// Per-year roll-up of the accumulated snapshot.
#[derive(Debug, Clone, PartialEq)]
pub struct YearTotal {
    pub year: i32,
    pub records: usize,
    pub paid_in_month: f64,
}

/// Owns the growing snapshot and mints sequence ids.
///
/// Ids are `1..=len` in arrival order. Records from earlier chunks are never
/// reordered or touched by later merges. No de-duplication across years
/// happens here.
#[derive(Debug, Default)]
pub struct Accumulator {
    records: Vec<CanonicalRecord>,
}

impl Accumulator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Normalise and append one chunk's rows, returning the full snapshot.
    pub fn merge(&mut self, raw: &[RawServerRecord], chunk_year: i32) -> &[CanonicalRecord] {
        let base = self.records.len() as u64;
        self.records.reserve(raw.len());
        self.records.extend(
            raw.iter()
                .enumerate()
                .map(|(i, r)| normalize_record(r, base + i as u64 + 1, chunk_year)),
        );
        &self.records
    }

    pub fn snapshot(&self) -> &[CanonicalRecord] {
        &self.records
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn clear(&mut self) {
        self.records.clear();
    }

    pub fn into_records(self) -> Vec<CanonicalRecord> {
        self.records
    }

    /// Record count and paid-in-month sum per year, in first-arrival order.
    pub fn year_totals(&self) -> Vec<YearTotal> {
        let mut totals: Vec<YearTotal> = Vec::new();
        for r in &self.records {
            match totals.iter_mut().find(|t| t.year == r.year) {
                Some(t) => {
                    t.records += 1;
                    t.paid_in_month += r.paid_in_month;
                }
                None => totals.push(YearTotal {
                    year: r.year,
                    records: 1,
                    paid_in_month: r.paid_in_month,
                }),
            }
        }
        totals
    }
}
