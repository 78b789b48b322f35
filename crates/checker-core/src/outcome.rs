//! The shared tail of every probe: print the rendered response, then
//! search it for the configured pattern.

use std::io::Write;

use regex::Regex;
use tracing::debug;

use crate::error::{CheckResult, ProbeError};

/// Result of one successful check.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProbeOutcome {
    pub raw_response_text: String,
    /// `false` only when the response rendered to nothing and the pattern
    /// was therefore never evaluated.
    pub matched: bool,
}

/// Emit `text` to `console`, then search it for `pattern`.
///
/// Search semantics: the pattern may match anywhere in the text. Empty
/// text is printed as nothing and is not matched against the pattern.
pub fn evaluate(
    text: String,
    pattern: &Regex,
    console: &mut dyn Write,
) -> CheckResult<ProbeOutcome> {
    if text.is_empty() {
        debug!("empty response, pattern not evaluated");
        return Ok(ProbeOutcome {
            raw_response_text: text,
            matched: false,
        });
    }

    writeln!(console, "{text}")?;

    if !pattern.is_match(&text) {
        return Err(ProbeError::PatternMismatch(pattern.as_str().to_string()));
    }

    Ok(ProbeOutcome {
        raw_response_text: text,
        matched: true,
    })
}
