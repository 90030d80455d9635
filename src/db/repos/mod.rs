mod expiry;
mod locks;
mod rules;

pub use expiry::*;
pub use locks::*;
pub use rules::*;

use crate::db::error::{DbError, DbResult};

/// Convert a stored BIGINT counter into an unsigned count.
pub(crate) fn counter_from_db(column: &str, value: i64) -> DbResult<u64> {
    u64::try_from(value)
        .map_err(|_| DbError::Internal(format!("Negative value {} in column {}", value, column)))
}

/// Convert an unsigned count into a BIGINT bind value.
pub(crate) fn counter_to_db(value: u64) -> DbResult<i64> {
    i64::try_from(value)
        .map_err(|_| DbError::Validation(format!("Counter value {} exceeds BIGINT range", value)))
}

/// Convert a stored batch size into the rule's unsigned representation.
pub(crate) fn batch_size_from_db(value: i64) -> DbResult<u32> {
    u32::try_from(value)
        .ok()
        .filter(|size| *size >= 1)
        .ok_or_else(|| DbError::Internal(format!("Invalid batch_size {} in database", value)))
}
