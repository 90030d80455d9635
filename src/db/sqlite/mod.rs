mod expiry;
mod locks;
mod rules;

#[cfg(test)]
pub(crate) use expiry::delete_batch_query;
pub use expiry::SqliteExpiryRepo;
pub use locks::SqliteLockRepo;
pub use rules::SqliteRuleRepo;
