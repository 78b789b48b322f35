//! Stand-in probe used when no type is configured.

use std::io::Write;

use checker_core::{CheckResult, ParameterSpec, ProbeError, ProbeOutcome, ResolvedOptions};

use crate::probe::HealthProbe;

/// Declares no options and always fails with the list of supported types.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DefaultProbe;

impl HealthProbe for DefaultProbe {
    fn parameters(&self) -> &'static [ParameterSpec] {
        &[]
    }

    fn check(
        &self,
        _options: &ResolvedOptions,
        _console: &mut dyn Write,
    ) -> CheckResult<ProbeOutcome> {
        Err(ProbeError::missing_type())
    }
}
