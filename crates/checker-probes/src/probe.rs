//! The probe contract and the closed set of probes.

use std::io::Write;

use checker_core::{CheckResult, ParameterSpec, ProbeKind, ProbeOutcome, ResolvedOptions};

use crate::probes::default::DefaultProbe;
use crate::probes::elasticsearch::ElasticSearchProbe;
use crate::probes::http::HttpProbe;
use crate::probes::jdbc::JdbcProbe;
use crate::probes::ldap::LdapProbe;
use crate::probes::mongo::MongoProbe;
use crate::probes::smtp::SmtpProbe;
use crate::probes::solr::SolrProbe;

/// One protocol check.
///
/// `check` connects, issues exactly one operation, renders the response
/// as text, prints it to `console` and matches it against the pattern.
/// It returns `Ok` only when every step succeeded.
pub trait HealthProbe {
    /// The options this probe understands. Static for the process lifetime.
    fn parameters(&self) -> &'static [ParameterSpec];

    fn check(
        &self,
        options: &ResolvedOptions,
        console: &mut dyn Write,
    ) -> CheckResult<ProbeOutcome>;
}

/// Every probe the runner can execute.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Probe {
    ElasticSearch(ElasticSearchProbe),
    Http(HttpProbe),
    Jdbc(JdbcProbe),
    Ldap(LdapProbe),
    Mongo(MongoProbe),
    Smtp(SmtpProbe),
    Solr(SolrProbe),
    /// No kind configured; fails with the list of supported kinds.
    Default(DefaultProbe),
}

impl Probe {
    pub fn for_kind(kind: ProbeKind) -> Self {
        match kind {
            ProbeKind::ElasticSearch => Probe::ElasticSearch(ElasticSearchProbe),
            ProbeKind::Http => Probe::Http(HttpProbe),
            ProbeKind::Jdbc => Probe::Jdbc(JdbcProbe),
            ProbeKind::Ldap => Probe::Ldap(LdapProbe),
            ProbeKind::Mongo => Probe::Mongo(MongoProbe),
            ProbeKind::Smtp => Probe::Smtp(SmtpProbe),
            ProbeKind::Solr => Probe::Solr(SolrProbe),
        }
    }

    /// The configured kind, or `None` for the default probe.
    pub fn kind(&self) -> Option<ProbeKind> {
        match self {
            Probe::ElasticSearch(_) => Some(ProbeKind::ElasticSearch),
            Probe::Http(_) => Some(ProbeKind::Http),
            Probe::Jdbc(_) => Some(ProbeKind::Jdbc),
            Probe::Ldap(_) => Some(ProbeKind::Ldap),
            Probe::Mongo(_) => Some(ProbeKind::Mongo),
            Probe::Smtp(_) => Some(ProbeKind::Smtp),
            Probe::Solr(_) => Some(ProbeKind::Solr),
            Probe::Default(_) => None,
        }
    }

    pub fn is_default(&self) -> bool {
        matches!(self, Probe::Default(_))
    }

    fn inner(&self) -> &dyn HealthProbe {
        match self {
            Probe::ElasticSearch(p) => p,
            Probe::Http(p) => p,
            Probe::Jdbc(p) => p,
            Probe::Ldap(p) => p,
            Probe::Mongo(p) => p,
            Probe::Smtp(p) => p,
            Probe::Solr(p) => p,
            Probe::Default(p) => p,
        }
    }
}

impl HealthProbe for Probe {
    fn parameters(&self) -> &'static [ParameterSpec] {
        self.inner().parameters()
    }

    fn check(
        &self,
        options: &ResolvedOptions,
        console: &mut dyn Write,
    ) -> CheckResult<ProbeOutcome> {
        self.inner().check(options, console)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use checker_core::param::{
        CONNECT_TIMEOUT, DEFAULT_CONNECT_TIMEOUT, DEFAULT_RESPONSE_TIMEOUT, PATTERN,
        RESPONSE_TIMEOUT,
    };
    use std::collections::HashSet;

    #[test]
    fn kind_round_trips_through_probe() {
        for kind in ProbeKind::ALL {
            assert_eq!(Probe::for_kind(kind).kind(), Some(kind));
        }
        assert_eq!(Probe::Default(DefaultProbe).kind(), None);
    }

    #[test]
    fn every_protocol_probe_declares_timeout_defaults() {
        for kind in ProbeKind::ALL {
            let options = ResolvedOptions::new(Probe::for_kind(kind).parameters());
            assert_eq!(options.get(CONNECT_TIMEOUT), Some(DEFAULT_CONNECT_TIMEOUT), "{kind}");
            assert_eq!(options.get(RESPONSE_TIMEOUT), Some(DEFAULT_RESPONSE_TIMEOUT), "{kind}");
            assert_eq!(options.connect_timeout().unwrap().as_millis(), 5000, "{kind}");
            assert_eq!(options.response_timeout().unwrap().as_millis(), 10000, "{kind}");
        }
    }

    #[test]
    fn every_protocol_probe_has_a_pattern() {
        for kind in ProbeKind::ALL {
            let options = ResolvedOptions::new(Probe::for_kind(kind).parameters());
            assert!(options.get(PATTERN).is_some(), "{kind}");
            assert!(options.pattern().is_ok(), "{kind}");
        }
    }

    #[test]
    fn option_names_are_unique_per_probe() {
        for kind in ProbeKind::ALL {
            let specs = Probe::for_kind(kind).parameters();
            let longs: HashSet<_> = specs.iter().map(|s| s.long).collect();
            let shorts: HashSet<_> = specs.iter().map(|s| s.short).collect();
            assert_eq!(longs.len(), specs.len(), "duplicate long name in {kind}");
            assert_eq!(shorts.len(), specs.len(), "duplicate short name in {kind}");
        }
    }
}
