mod expiry;
mod locks;
mod rules;

pub use expiry::PostgresExpiryRepo;
pub use locks::PostgresLockRepo;
pub use rules::PostgresRuleRepo;
