//! checker-core — the probe execution contract shared by every probe.
//!
//! A probe declares its options as a static slice of [`ParameterSpec`],
//! receives them back as [`ResolvedOptions`] once the runner has merged
//! the command line, the optional config file and the declared defaults,
//! and reports through [`ProbeOutcome`] or a [`ProbeError`].
//!
//! ```text
//! HEALTH_CHECKER_TYPE ──► ProbeKind ──► Probe
//!                                         │ parameters() ─► &[ParameterSpec]
//!                                         │ check(&ResolvedOptions)
//!                                         ▼
//!                            rendered text ─► evaluate() ─► ProbeOutcome
//! ```

pub mod config;
pub mod error;
pub mod kind;
pub mod options;
pub mod outcome;
pub mod param;

pub use config::CheckerConfig;
pub use error::{CheckResult, ProbeError};
pub use kind::{HEALTH_CHECKER_TYPE, ProbeKind};
pub use options::ResolvedOptions;
pub use outcome::{ProbeOutcome, evaluate};
pub use param::ParameterSpec;
