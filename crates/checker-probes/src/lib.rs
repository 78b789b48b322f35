//! checker-probes — the protocol probes and the factory that picks one.
//!
//! ```text
//! ProbeFactory::create()
//!   └─ HEALTH_CHECKER_TYPE ─► Probe::{ElasticSearch, Http, Jdbc, Ldap,
//!                                     Mongo, Smtp, Solr, Default}
//!                               └─ check(&ResolvedOptions, console)
//!                                    connect ─► one request ─► render ─► evaluate
//! ```
//!
//! Network seams are traits where the interesting logic lives: the HTTP
//! redirect rule runs over [`probes::http::HttpTransport`] and LDAP paging
//! over [`probes::ldap::Directory`], so both are testable without a server.

pub mod factory;
pub mod probe;
pub mod probes;

pub use factory::ProbeFactory;
pub use probe::{HealthProbe, Probe};
