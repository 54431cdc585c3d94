//! OpenAPI 3.0 meta-schema gate.
//!
//! The flattened contract is checked once per load. The meta-schema is
//! bundled with the crate and compiled on first use.

use crate::error::{ContractError, Result};
use crate::validator::ValidationIssue;
use jsonschema::{Draft, Validator};
use once_cell::sync::OnceCell;
use serde_json::Value;
use tracing::{debug, error};

const OPENAPI_30_META_SCHEMA: &str = include_str!("../../schemas/openapi-3.0.json");

static META_VALIDATOR: OnceCell<Validator> = OnceCell::new();

fn meta_validator() -> Result<&'static Validator> {
    META_VALIDATOR.get_or_try_init(|| {
        let schema: Value = serde_json::from_str(OPENAPI_30_META_SCHEMA)
            .map_err(|e| ContractError::Config(format!("bundled meta-schema is not JSON: {e}")))?;
        jsonschema::options()
            .with_draft(Draft::Draft4)
            .build(&schema)
            .map_err(|e| ContractError::Config(format!("bundled meta-schema does not compile: {e}")))
    })
}

/// Validates flattened contracts against the OpenAPI 3.0 meta-schema.
#[derive(Debug, Default, Clone, Copy)]
pub struct ContractValidator;

impl ContractValidator {
    pub fn new() -> Self {
        ContractValidator
    }

    /// All violations, empty when the contract is well formed.
    pub fn issues(&self, flattened: &Value) -> Result<Vec<ValidationIssue>> {
        let validator = meta_validator()?;
        Ok(validator
            .iter_errors(flattened)
            .map(|err| {
                ValidationIssue::new(
                    err.instance_path.to_string(),
                    err.schema_path.to_string(),
                    err.to_string(),
                )
            })
            .collect())
    }

    /// `Err(ContractInvalid)` carrying every violation.
    pub fn validate(&self, flattened: &Value) -> Result<()> {
        let violations = self.issues(flattened)?;
        if violations.is_empty() {
            debug!("contract passed meta-schema validation");
            return Ok(());
        }
        error!(
            violations = violations.len(),
            first = %violations[0],
            "contract failed meta-schema validation"
        );
        Err(ContractError::ContractInvalid { violations })
    }
}
