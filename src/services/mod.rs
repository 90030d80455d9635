mod rules;

pub use rules::{RuleService, RuleServiceError};
