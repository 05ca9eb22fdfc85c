//! Raw and canonical spending records.
//!
//! The service streams rows as flat JSON objects keyed by upper-case column
//! names. [`normalize_record`] maps one such row into a [`CanonicalRecord`]
//! with every monetary field guaranteed finite.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tracing::warn;

use crate::numeric::{normalize_amount, parse_integer, parse_locale_decimal};

/// Month assumed when a row carries no `MES` value.
pub const DEFAULT_MONTH: u32 = 12;

/// Current and legacy keys for the per-row inflation correction block.
const CORRECTION_KEYS: [&str; 2] = ["_correcao_aplicada", "_correcao_ipca"];

const VALIDATED_YEAR_KEY: &str = "_ano_validado";

/// One row as emitted by the server inside a `parcial` message.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RawServerRecord(pub Map<String, Value>);

impl RawServerRecord {
    pub fn get(&self, field: &str) -> Option<&Value> {
        self.0.get(field)
    }

    fn text(&self, field: &str) -> Option<String> {
        match self.0.get(field)? {
            Value::String(s) => {
                let s = s.trim();
                (!s.is_empty()).then(|| s.to_string())
            }
            Value::Number(n) => Some(n.to_string()),
            _ => None,
        }
    }
}

impl From<Value> for RawServerRecord {
    /// Non-object values become an empty record.
    fn from(value: Value) -> Self {
        match value {
            Value::Object(map) => Self(map),
            _ => Self::default(),
        }
    }
}

/// Inflation-correction metadata applied server-side to a row.
///
/// `raw` holds the block exactly as the server sent it. The typed members
/// are read from it one by one, so a malformed or missing member only
/// blanks that member.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CorrectionBlock {
    pub factor: Option<f64>,
    pub period_index: Option<f64>,
    pub reference_index: Option<f64>,
    pub reference_period: Option<String>,
    pub kind: Option<String>,
    #[serde(default)]
    pub raw: Map<String, Value>,
}

impl CorrectionBlock {
    pub fn from_raw(raw: Map<String, Value>) -> Self {
        let number = |key: &str| match raw.get(key)? {
            Value::Number(_) => Some(normalize_amount(raw.get(key))),
            Value::String(s) if !s.trim().is_empty() => Some(parse_locale_decimal(s)),
            _ => None,
        };
        let text = |key: &str| match raw.get(key)? {
            Value::String(s) if !s.trim().is_empty() => Some(s.trim().to_string()),
            Value::Number(n) => Some(n.to_string()),
            _ => None,
        };

        Self {
            factor: number("fator_correcao"),
            period_index: number("ipca_periodo"),
            reference_index: number("ipca_referencia"),
            reference_period: text("periodo_referencia"),
            kind: text("tipo_correcao"),
            raw,
        }
    }
}

/// The closed set of monetary columns on a canonical record.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MoneyField {
    InitialBudget,
    UpdatedBudget,
    CommittedToMonth,
    CommittedInMonth,
    LiquidatedToMonth,
    LiquidatedInMonth,
    PaidToMonth,
    PaidInMonth,
}

impl MoneyField {
    pub const ALL: [MoneyField; 8] = [
        Self::InitialBudget,
        Self::UpdatedBudget,
        Self::CommittedToMonth,
        Self::CommittedInMonth,
        Self::LiquidatedToMonth,
        Self::LiquidatedInMonth,
        Self::PaidToMonth,
        Self::PaidInMonth,
    ];

    /// Column name used by the server.
    pub fn raw_name(&self) -> &'static str {
        match self {
            Self::InitialBudget => "DOTACAO_INICIAL",
            Self::UpdatedBudget => "DOTACAO_ATUALIZADA",
            Self::CommittedToMonth => "EMPENHADO_ATE_MES",
            Self::CommittedInMonth => "EMPENHADO_NO_MES",
            Self::LiquidatedToMonth => "LIQUIDADO_ATE_MES",
            Self::LiquidatedInMonth => "LIQUIDADO_NO_MES",
            Self::PaidToMonth => "PAGO_ATE_MES",
            Self::PaidInMonth => "PAGO_NO_MES",
        }
    }

    /// Column name in the canonical schema.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::InitialBudget => "initial_budget",
            Self::UpdatedBudget => "updated_budget",
            Self::CommittedToMonth => "committed_to_month",
            Self::CommittedInMonth => "committed_in_month",
            Self::LiquidatedToMonth => "liquidated_to_month",
            Self::LiquidatedInMonth => "liquidated_in_month",
            Self::PaidToMonth => "paid_to_month",
            Self::PaidInMonth => "paid_in_month",
        }
    }
}

/// Normalised, numeric-safe representation of one spending row.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CanonicalRecord {
    /// Session-wide sequence id, starting at 1.
    pub id: u64,
    pub year: i32,
    pub month: u32,
    pub institution: String,
    pub initial_budget: f64,
    pub updated_budget: f64,
    pub committed_to_month: f64,
    pub committed_in_month: f64,
    pub liquidated_to_month: f64,
    pub liquidated_in_month: f64,
    pub paid_to_month: f64,
    pub paid_in_month: f64,
    pub function: Option<String>,
    pub expense_group: Option<String>,
    pub funding_source: Option<String>,
    pub correction: Option<CorrectionBlock>,
}

impl CanonicalRecord {
    pub fn amount(&self, field: MoneyField) -> f64 {
        match field {
            MoneyField::InitialBudget => self.initial_budget,
            MoneyField::UpdatedBudget => self.updated_budget,
            MoneyField::CommittedToMonth => self.committed_to_month,
            MoneyField::CommittedInMonth => self.committed_in_month,
            MoneyField::LiquidatedToMonth => self.liquidated_to_month,
            MoneyField::LiquidatedInMonth => self.liquidated_in_month,
            MoneyField::PaidToMonth => self.paid_to_month,
            MoneyField::PaidInMonth => self.paid_in_month,
        }
    }
}

/// Map one raw row into a canonical record.
///
/// `id` is minted by the caller. `chunk_year` is the year declared by the
/// enclosing `parcial` message and is used unless the row carries its own
/// `_ano_validado`.
pub fn normalize_record(raw: &RawServerRecord, id: u64, chunk_year: i32) -> CanonicalRecord {
    let money = |field: MoneyField| normalize_amount(raw.get(field.raw_name()));

    let year = parse_integer(raw.get(VALIDATED_YEAR_KEY))
        .and_then(|y| i32::try_from(y).ok())
        .unwrap_or(chunk_year);

    let month = parse_integer(raw.get("MES"))
        .and_then(|m| u32::try_from(m).ok())
        .unwrap_or(DEFAULT_MONTH);

    CanonicalRecord {
        id,
        year,
        month,
        institution: raw.text("UNIDADE_ORCAMENTARIA").unwrap_or_default(),
        initial_budget: money(MoneyField::InitialBudget),
        updated_budget: money(MoneyField::UpdatedBudget),
        committed_to_month: money(MoneyField::CommittedToMonth),
        committed_in_month: money(MoneyField::CommittedInMonth),
        liquidated_to_month: money(MoneyField::LiquidatedToMonth),
        liquidated_in_month: money(MoneyField::LiquidatedInMonth),
        paid_to_month: money(MoneyField::PaidToMonth),
        paid_in_month: money(MoneyField::PaidInMonth),
        function: raw.text("FUNCAO"),
        expense_group: raw.text("GRUPO_NATUREZA"),
        funding_source: raw.text("FONTE_RECURSO"),
        correction: correction_block(raw, id),
    }
}

fn correction_block(raw: &RawServerRecord, id: u64) -> Option<CorrectionBlock> {
    let (key, value) = CORRECTION_KEYS
        .iter()
        .find_map(|&k| raw.get(k).filter(|v| !v.is_null()).map(|v| (k, v)))?;

    match value {
        Value::Object(map) => Some(CorrectionBlock::from_raw(map.clone())),
        other => {
            warn!(id, key, value = %other, "ignoring non-object correction block");
            None
        }
    }
}
