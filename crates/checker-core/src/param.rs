//! Option declarations.
//!
//! Each probe declares its options once, as a `static` slice of
//! [`ParameterSpec`]. The slice is never mutated; the runner builds its
//! command-line parser from it and [`ResolvedOptions`](crate::ResolvedOptions)
//! uses it to apply defaults.

/// Default connect timeout for every protocol probe, in milliseconds.
pub const DEFAULT_CONNECT_TIMEOUT: &str = "5000";
/// Default response timeout for every protocol probe, in milliseconds.
pub const DEFAULT_RESPONSE_TIMEOUT: &str = "10000";
/// Default response pattern: anything non-empty.
pub const DEFAULT_PATTERN: &str = ".*";

pub const CONNECT_TIMEOUT: &str = "connect-timeout";
pub const RESPONSE_TIMEOUT: &str = "response-timeout";
pub const PATTERN: &str = "pattern";

/// One configurable option of a probe.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ParameterSpec {
    /// Single-character flag, e.g. `l` for `-l`.
    pub short: char,
    /// Long flag without dashes; also the lookup key. Unique per probe.
    pub long: &'static str,
    pub description: &'static str,
    /// Textual default, parsed by the probe like any supplied value.
    pub default: Option<&'static str>,
    pub required: bool,
}

impl ParameterSpec {
    pub const fn new(short: char, long: &'static str, description: &'static str) -> Self {
        Self {
            short,
            long,
            description,
            default: None,
            required: false,
        }
    }

    pub const fn with_default(mut self, default: &'static str) -> Self {
        self.default = Some(default);
        self
    }

    pub const fn required(mut self) -> Self {
        self.required = true;
        self
    }

    /// `-c/--connect-timeout` with the shared default.
    pub const fn connect_timeout(short: char, description: &'static str) -> Self {
        Self::new(short, CONNECT_TIMEOUT, description).with_default(DEFAULT_CONNECT_TIMEOUT)
    }

    /// `-r/--response-timeout` with the shared default.
    pub const fn response_timeout(short: char, description: &'static str) -> Self {
        Self::new(short, RESPONSE_TIMEOUT, description).with_default(DEFAULT_RESPONSE_TIMEOUT)
    }

    /// `--pattern` with the given default regex.
    pub const fn pattern(short: char, description: &'static str, default: &'static str) -> Self {
        Self::new(short, PATTERN, description).with_default(default)
    }

    /// Help line: the description plus its default and required markers.
    pub fn help(&self) -> String {
        let mut text = self.description.to_string();
        if let Some(default) = self.default {
            text.push_str(&format!(" [default: {default}]"));
        }
        if self.required {
            text.push_str(" [required]");
        }
        text
    }
}

/// Find a spec by long name.
pub fn lookup<'a>(specs: &'a [ParameterSpec], long: &str) -> Option<&'a ParameterSpec> {
    specs.iter().find(|spec| spec.long == long)
}
