mod rule;
mod validators;

pub use rule::*;
pub use validators::*;
