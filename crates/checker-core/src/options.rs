//! Per-invocation option values.
//!
//! Built once by the runner and handed to the probe read-only. A value
//! comes from the first layer that supplies it: command line, config file,
//! then the [`ParameterSpec`] default. Empty strings never count as supplied.

use std::collections::HashMap;
use std::fmt::Display;
use std::str::FromStr;
use std::time::Duration;

use regex::Regex;

use crate::error::{CheckResult, ProbeError};
use crate::param::{self, CONNECT_TIMEOUT, PATTERN, ParameterSpec, RESPONSE_TIMEOUT};

#[derive(Debug, Clone)]
pub struct ResolvedOptions {
    specs: &'static [ParameterSpec],
    supplied: HashMap<String, Vec<String>>,
}

impl ResolvedOptions {
    pub fn new(specs: &'static [ParameterSpec]) -> Self {
        Self {
            specs,
            supplied: HashMap::new(),
        }
    }

    /// Builder-style [`supply`](Self::supply).
    pub fn with(mut self, long: &str, value: impl Into<String>) -> Self {
        self.supply(long, value);
        self
    }

    /// Append a value for `long`. Empty values are dropped.
    pub fn supply(&mut self, long: &str, value: impl Into<String>) {
        let value = value.into();
        if value.is_empty() {
            return;
        }
        self.supplied.entry(long.to_string()).or_default().push(value);
    }

    /// Supply `values` only if nothing was supplied for `long` yet.
    /// Used for lower-precedence layers such as the config file.
    pub fn fill(&mut self, long: &str, values: impl IntoIterator<Item = String>) {
        if self.is_supplied(long) {
            return;
        }
        for value in values {
            self.supply(long, value);
        }
    }

    pub fn specs(&self) -> &'static [ParameterSpec] {
        self.specs
    }

    pub fn is_supplied(&self, long: &str) -> bool {
        self.supplied.get(long).is_some_and(|v| !v.is_empty())
    }

    /// First supplied value, else the declared default.
    pub fn get(&self, long: &str) -> Option<&str> {
        match self.supplied.get(long).and_then(|v| v.first()) {
            Some(value) => Some(value.as_str()),
            None => param::lookup(self.specs, long).and_then(|spec| spec.default),
        }
    }

    /// Every supplied value, or the default as a single value.
    pub fn get_all(&self, long: &str) -> Vec<&str> {
        match self.supplied.get(long) {
            Some(values) if !values.is_empty() => values.iter().map(String::as_str).collect(),
            _ => self.get(long).into_iter().collect(),
        }
    }

    pub fn require(&self, long: &str) -> CheckResult<&str> {
        self.get(long)
            .ok_or_else(|| ProbeError::MissingOption(long.to_string()))
    }

    /// Parse the value of `long`, if any.
    pub fn parse<T>(&self, long: &str) -> CheckResult<Option<T>>
    where
        T: FromStr,
        T::Err: Display,
    {
        self.get(long)
            .map(|raw| {
                raw.trim()
                    .parse::<T>()
                    .map_err(|e| ProbeError::invalid_option(long, raw, e))
            })
            .transpose()
    }

    /// A duration given in whole milliseconds.
    pub fn millis(&self, long: &str) -> CheckResult<Duration> {
        let raw = self.require(long)?;
        raw.trim()
            .parse::<u64>()
            .map(Duration::from_millis)
            .map_err(|e| ProbeError::invalid_option(long, raw, e))
    }

    pub fn connect_timeout(&self) -> CheckResult<Duration> {
        self.millis(CONNECT_TIMEOUT)
    }

    pub fn response_timeout(&self) -> CheckResult<Duration> {
        self.millis(RESPONSE_TIMEOUT)
    }

    /// `true`/`false` (any case). Absent means `false`.
    pub fn flag(&self, long: &str) -> CheckResult<bool> {
        match self.get(long) {
            None => Ok(false),
            Some(raw) => raw
                .trim()
                .to_ascii_lowercase()
                .parse::<bool>()
                .map_err(|e| ProbeError::invalid_option(long, raw, e)),
        }
    }

    /// The compiled `--pattern` regex.
    pub fn pattern(&self) -> CheckResult<Regex> {
        let raw = self.require(PATTERN)?;
        Regex::new(raw).map_err(|e| ProbeError::invalid_option(PATTERN, raw, e))
    }

    /// Repeated `name:value` entries, split on the first `:` and trimmed.
    pub fn pairs(&self, long: &str) -> CheckResult<Vec<(String, String)>> {
        let mut pairs = Vec::new();
        for raw in self.supplied.get(long).into_iter().flatten() {
            let (name, value) = raw
                .split_once(':')
                .ok_or_else(|| ProbeError::invalid_option(long, raw, "expected name:value"))?;
            let name = name.trim();
            if name.is_empty() {
                return Err(ProbeError::invalid_option(long, raw, "empty name"));
            }
            pairs.push((name.to_string(), value.trim().to_string()));
        }
        Ok(pairs)
    }

    /// Comma-separated list, trimmed, empty items dropped.
    pub fn list(&self, long: &str) -> Vec<String> {
        self.get(long)
            .map(|raw| {
                raw.split(',')
                    .map(str::trim)
                    .filter(|item| !item.is_empty())
                    .map(str::to_string)
                    .collect()
            })
            .unwrap_or_default()
    }
}
