//! JSON Schema gate for repository index documents.
//!
//! The schema ships inside the binary so an installed tester can check any
//! repository without locating a checkout. Callers validate the raw JSON value
//! before deserializing so every structural problem is reported at once
//! instead of serde stopping at the first missing field.

use anyhow::{Result, anyhow, bail};
use jsonschema::JSONSchema;
use serde_json::Value;
use std::path::Path;

const INDEX_SCHEMA: &str = include_str!("../schema/repo_index.schema.json");

/// Compiled index schema.
pub(crate) struct IndexSchema {
    compiled: JSONSchema,
}

impl IndexSchema {
    pub(crate) fn load() -> Result<Self> {
        let raw: Value = serde_json::from_str(INDEX_SCHEMA)
            .map_err(|err| anyhow!("parsing embedded index schema: {err}"))?;
        let compiled = JSONSchema::compile(&raw)
            .map_err(|err| anyhow!("compiling embedded index schema: {err}"))?;
        Ok(Self { compiled })
    }

    /// Validate an index document, collecting every violation.
    pub(crate) fn check(&self, source: &Path, value: &Value) -> Result<()> {
        let details = match self.compiled.validate(value) {
            Ok(()) => return Ok(()),
            Err(errors) => errors
                .map(|err| format!("{}: {}", err.instance_path, err))
                .collect::<Vec<_>>()
                .join("\n"),
        };
        bail!(
            "repository index {} failed schema validation:\n{}",
            source.display(),
            details
        );
    }
}
