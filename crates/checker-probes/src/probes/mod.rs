//! One module per protocol.

pub mod default;
pub mod elasticsearch;
pub mod http;
pub mod jdbc;
pub mod ldap;
pub mod mongo;
pub mod smtp;
pub mod solr;

/// Pin the process-wide rustls provider to ring. `ldap3` and `mongodb`
/// build their TLS configs from the default provider, which must be
/// unambiguous.
pub(crate) fn install_crypto_provider() {
    if rustls::crypto::ring::default_provider().install_default().is_err() {
        tracing::debug!("rustls crypto provider already installed");
    }
}
