//! Optional TOML config file, named by `HEALTH_CHECKER_CONFIG`.
//!
//! ```toml
//! type = "http"
//!
//! [options]
//! url = "https://internal.example/health"
//! header = ["X-Probe: 1"]
//! connect-timeout = 2000
//! ```

use std::collections::BTreeMap;
use std::path::Path;

use serde::Deserialize;
use tracing::warn;

use crate::error::{CheckResult, ProbeError};
use crate::options::ResolvedOptions;
use crate::param;

/// Environment variable naming the config file.
pub const HEALTH_CHECKER_CONFIG: &str = "HEALTH_CHECKER_CONFIG";

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct CheckerConfig {
    /// Probe type, used when `HEALTH_CHECKER_TYPE` is unset.
    #[serde(rename = "type")]
    pub probe_type: Option<String>,
    /// Option values keyed by long name.
    #[serde(default)]
    pub options: BTreeMap<String, toml::Value>,
}

impl CheckerConfig {
    pub fn from_file(path: &Path) -> CheckResult<Self> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| ProbeError::Config(format!("reading {}: {e}", path.display())))?;
        Self::parse(&content)
            .map_err(|e| ProbeError::Config(format!("{}: {e}", path.display())))
    }

    pub fn parse(content: &str) -> CheckResult<Self> {
        toml::from_str(content).map_err(|e| ProbeError::Config(e.to_string()))
    }

    /// Fill every option not already supplied on the command line.
    pub fn apply(&self, options: &mut ResolvedOptions) -> CheckResult<()> {
        for (key, value) in &self.options {
            if param::lookup(options.specs(), key).is_none() {
                warn!(option = %key, "ignoring config option not declared by this probe");
                continue;
            }
            options.fill(key, value_strings(key, value)?);
        }
        Ok(())
    }
}

fn value_strings(key: &str, value: &toml::Value) -> CheckResult<Vec<String>> {
    match value {
        toml::Value::String(s) => Ok(vec![s.clone()]),
        toml::Value::Integer(i) => Ok(vec![i.to_string()]),
        toml::Value::Float(f) => Ok(vec![f.to_string()]),
        toml::Value::Boolean(b) => Ok(vec![b.to_string()]),
        toml::Value::Array(items) => {
            let mut out = Vec::with_capacity(items.len());
            for item in items {
                if matches!(item, toml::Value::Array(_) | toml::Value::Table(_)) {
                    return Err(ProbeError::Config(format!("option '{key}' has a nested value")));
                }
                out.extend(value_strings(key, item)?);
            }
            Ok(out)
        }
        _ => Err(ProbeError::Config(format!(
            "option '{key}' must be a string, number, boolean or array"
        ))),
    }
}
