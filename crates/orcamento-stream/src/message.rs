//! Frame payload → protocol message.
//!
//! Each frame carries one JSON object discriminated by `status`:
//!
//! - `"parcial"`  → [`ProtocolMessage::Partial`], one fiscal year of rows
//! - `"completo"` → [`ProtocolMessage::Complete`], end of a successful stream
//! - `"erro"`     → [`ProtocolMessage::Error`], server-side failure
//!
//! Only the discriminant and the fiscal year of a `parcial` frame are
//! required. Counters that are `null` or unparsable read as `0`, and rows
//! that are not objects become empty records.

use orcamento_core::RawServerRecord;
use orcamento_core::numeric::parse_integer;
use serde::de::Error as _;
use serde::{Deserialize, Deserializer};
use serde_json::Value;

use crate::error::DecodeError;

/// One fiscal year's worth of newly available rows.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct PartialChunk {
    #[serde(rename = "ano_processado", deserialize_with = "fiscal_year")]
    pub year: i32,
    #[serde(rename = "total_registros_ano", default, deserialize_with = "count")]
    pub records_in_year: u64,
    #[serde(rename = "dados", default, deserialize_with = "rows")]
    pub records: Vec<RawServerRecord>,
}

/// Final report sent once the server has produced every year.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct CompletionReport {
    #[serde(rename = "total_registros", default, deserialize_with = "count")]
    pub total_records: u64,
    #[serde(rename = "total_nao_processados", default, deserialize_with = "count")]
    pub total_unprocessed: u64,
    #[serde(rename = "dados_nao_processados", default, deserialize_with = "values")]
    pub unprocessed: Vec<Value>,
    #[serde(rename = "periodo_base_ipca", default, deserialize_with = "text")]
    pub base_correction_period: Option<String>,
    #[serde(rename = "tipo_correcao", default, deserialize_with = "text")]
    pub correction_kind: Option<String>,
}

fn fiscal_year<'de, D: Deserializer<'de>>(d: D) -> Result<i32, D::Error> {
    let value = Value::deserialize(d)?;
    parse_integer(Some(&value))
        .and_then(|y| i32::try_from(y).ok())
        .ok_or_else(|| D::Error::custom(format!("invalid fiscal year {value}")))
}

fn count<'de, D: Deserializer<'de>>(d: D) -> Result<u64, D::Error> {
    let value = Value::deserialize(d)?;
    Ok(parse_integer(Some(&value))
        .and_then(|n| u64::try_from(n).ok())
        .unwrap_or(0))
}

fn values<'de, D: Deserializer<'de>>(d: D) -> Result<Vec<Value>, D::Error> {
    Ok(match Value::deserialize(d)? {
        Value::Array(items) => items,
        _ => Vec::new(),
    })
}

fn rows<'de, D: Deserializer<'de>>(d: D) -> Result<Vec<RawServerRecord>, D::Error> {
    Ok(values(d)?.into_iter().map(RawServerRecord::from).collect())
}

fn text<'de, D: Deserializer<'de>>(d: D) -> Result<Option<String>, D::Error> {
    Ok(match Value::deserialize(d)? {
        Value::String(s) => Some(s),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    })
}

#[derive(Deserialize)]
struct ErrorBody {
    #[serde(default)]
    erro: Option<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum ProtocolMessage {
    Partial(PartialChunk),
    Complete(CompletionReport),
    Error { message: String },
}

impl ProtocolMessage {
    pub fn status(&self) -> &'static str {
        match self {
            Self::Partial(_) => "parcial",
            Self::Complete(_) => "completo",
            Self::Error { .. } => "erro",
        }
    }

    pub fn is_terminal(&self) -> bool {
        !matches!(self, Self::Partial(_))
    }
}

/// Decode a frame payload (already stripped of `data: `).
pub fn decode_message(payload: &str) -> Result<ProtocolMessage, DecodeError> {
    let value: Value = serde_json::from_str(payload)?;
    let status = value
        .get("status")
        .and_then(Value::as_str)
        .ok_or(DecodeError::MissingStatus)?
        .to_string();

    let payload_err = |source| DecodeError::Payload {
        status: status.clone(),
        source,
    };

    match status.as_str() {
        "parcial" => serde_json::from_value(value)
            .map(ProtocolMessage::Partial)
            .map_err(payload_err),
        "completo" => serde_json::from_value(value)
            .map(ProtocolMessage::Complete)
            .map_err(payload_err),
        "erro" => {
            let body: ErrorBody = serde_json::from_value(value).map_err(payload_err)?;
            Ok(ProtocolMessage::Error {
                message: body
                    .erro
                    .unwrap_or_else(|| "server reported an unspecified error".to_string()),
            })
        }
        _ => Err(DecodeError::UnknownStatus(status)),
    }
}
