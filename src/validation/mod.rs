pub mod constraint_enforcer;
pub mod dialect;
pub mod inspect;
pub mod intent_check;
pub mod sql_validator;

pub use constraint_enforcer::ConstraintEnforcer;
pub use dialect::SqlDialectKind;
pub use intent_check::IntentChecker;
pub use sql_validator::{QueryValidator, SqlValidator};
