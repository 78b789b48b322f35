//! The closed set of probe types selectable through the environment.

use std::fmt;
use std::str::FromStr;

use crate::error::ProbeError;

/// Environment variable selecting the probe type.
pub const HEALTH_CHECKER_TYPE: &str = "HEALTH_CHECKER_TYPE";

/// Supported target types. Unrecognized values are an error, never a
/// silent fallback.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ProbeKind {
    ElasticSearch,
    Http,
    Jdbc,
    Ldap,
    Mongo,
    Smtp,
    Solr,
}

impl ProbeKind {
    /// Every kind, in declaration order.
    pub const ALL: [ProbeKind; 7] = [
        ProbeKind::ElasticSearch,
        ProbeKind::Http,
        ProbeKind::Jdbc,
        ProbeKind::Ldap,
        ProbeKind::Mongo,
        ProbeKind::Smtp,
        ProbeKind::Solr,
    ];

    /// The configuration value naming this kind.
    pub fn as_str(&self) -> &'static str {
        match self {
            ProbeKind::ElasticSearch => "elasticsearch",
            ProbeKind::Http => "http",
            ProbeKind::Jdbc => "jdbc",
            ProbeKind::Ldap => "ldap",
            ProbeKind::Mongo => "mongo",
            ProbeKind::Smtp => "smtp",
            ProbeKind::Solr => "solr",
        }
    }
}

impl fmt::Display for ProbeKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ProbeKind {
    type Err = ProbeError;

    /// Case-insensitive lookup; surrounding whitespace is ignored.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let wanted = s.trim();
        ProbeKind::ALL
            .into_iter()
            .find(|kind| kind.as_str().eq_ignore_ascii_case(wanted))
            .ok_or_else(|| ProbeError::InvalidKind(s.to_string()))
    }
}
