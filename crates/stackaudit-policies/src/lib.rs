#![forbid(unsafe_code)]

mod schema;
mod validate;

pub use schema::{AuditPolicy, LeafRule, NamingPolicy, PolicySchemaVersion, TierRule, TierRules};
pub use validate::{
    canonical_policy_json, load_policy, parse_policy, policy_config_path, validate_policy,
    PolicyValidationError, POLICY_FILE_NAME,
};
