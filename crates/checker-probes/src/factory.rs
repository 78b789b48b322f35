//! Chooses the probe for this invocation from the environment.

use tracing::debug;

use checker_core::{CheckResult, HEALTH_CHECKER_TYPE, ProbeKind};

use crate::probe::Probe;
use crate::probes::default::DefaultProbe;

pub struct ProbeFactory;

impl ProbeFactory {
    /// Probe selected by `HEALTH_CHECKER_TYPE` as read through `env`.
    /// When the variable is absent or blank, `fallback` (the config
    /// file's `type`) is used instead.
    pub fn create<F>(env: F, fallback: Option<&str>) -> CheckResult<Probe>
    where
        F: Fn(&str) -> Option<String>,
    {
        let value = env(HEALTH_CHECKER_TYPE).filter(|v| !v.trim().is_empty());
        debug!(from_env = value.is_some(), "probe type resolved");
        Self::for_value(value.as_deref().or(fallback))
    }

    /// Probe for a raw type value. Absent or blank selects the default
    /// probe; anything unrecognised is an error.
    pub fn for_value(value: Option<&str>) -> CheckResult<Probe> {
        let probe = match value.map(str::trim).filter(|v| !v.is_empty()) {
            None => Probe::Default(DefaultProbe),
            Some(raw) => Probe::for_kind(raw.parse::<ProbeKind>()?),
        };
        debug!(kind = ?probe.kind(), "probe selected");
        Ok(probe)
    }
}
