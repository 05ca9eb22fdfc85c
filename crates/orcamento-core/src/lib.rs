pub mod numeric;
pub mod record;
pub mod schema;

pub use numeric::{normalize_amount, parse_locale_decimal};
pub use record::{CanonicalRecord, CorrectionBlock, MoneyField, RawServerRecord, normalize_record};
pub use schema::{canonical_record_schema, records_to_batch};
