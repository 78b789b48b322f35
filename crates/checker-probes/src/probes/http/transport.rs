//! Blocking HTTP transport over `reqwest`.
//!
//! The probe never lets the client follow redirects on its own: the
//! POST-then-GET rule in [`super::exchange`] is the only redirect handling.

use std::error::Error as StdError;
use std::time::Duration;

use reqwest::blocking::Client;
use reqwest::redirect::Policy;
use tracing::debug;

use checker_core::{CheckResult, ProbeError};

use super::{HttpMethod, HttpRequest, HttpResponse, HttpTransport};

/// Identifies the probe to the server on every request.
pub const USER_AGENT: &str = concat!("health-checker/", env!("CARGO_PKG_VERSION"));

/// Connection settings shared by the HTTP, Solr and Elasticsearch probes.
#[derive(Debug, Clone, Copy)]
pub struct ClientSettings {
    pub connect_timeout: Duration,
    pub response_timeout: Duration,
    /// Accept any server certificate: self-signed, expired or issued for
    /// another host. Only the HTTP probe turns this on, so it can reach
    /// internal endpoints; the TLS session then authenticates nothing.
    pub accept_any_certificate: bool,
}

/// Build the blocking client every HTTP-based probe uses.
pub fn build_client(settings: &ClientSettings) -> CheckResult<Client> {
    if settings.accept_any_certificate {
        debug!("server certificates will not be verified");
    }
    Client::builder()
        .user_agent(USER_AGENT)
        .redirect(Policy::none())
        .no_proxy()
        .connect_timeout(settings.connect_timeout)
        .timeout(settings.response_timeout)
        .danger_accept_invalid_certs(settings.accept_any_certificate)
        .build()
        .map_err(|e| ProbeError::connection(format!("building http client: {e}")))
}

/// Map a `reqwest` failure to a connection error, keeping the cause chain.
pub fn request_error(url: &str, err: reqwest::Error) -> ProbeError {
    if err.is_timeout() {
        return ProbeError::Connection(format!("request to {url} timed out"));
    }
    let mut message = format!("request to {url} failed: {err}");
    let mut source = err.source();
    while let Some(cause) = source {
        message.push_str(&format!(": {cause}"));
        source = cause.source();
    }
    ProbeError::Connection(message)
}

/// [`HttpTransport`] backed by a `reqwest` blocking client.
pub struct ReqwestTransport {
    client: Client,
}

impl ReqwestTransport {
    pub fn new(settings: &ClientSettings) -> CheckResult<Self> {
        Ok(Self {
            client: build_client(settings)?,
        })
    }
}

impl HttpTransport for ReqwestTransport {
    fn execute(&self, request: &HttpRequest) -> CheckResult<HttpResponse> {
        let mut builder = match request.method {
            HttpMethod::Get => self.client.get(&request.url),
            HttpMethod::Head => self.client.head(&request.url),
            HttpMethod::Post => self.client.post(&request.url),
        };
        for (name, value) in &request.headers {
            builder = builder.header(name.as_str(), value.as_str());
        }
        if let Some((username, password)) = &request.basic_auth {
            builder = builder.basic_auth(username, Some(password));
        }
        if request.method == HttpMethod::Post {
            if let Some(body) = &request.body {
                builder = builder.body(body.clone());
            } else if !request.form.is_empty() {
                builder = builder.form(&request.form);
            }
        }

        debug!(method = %request.method, url = %request.url, "sending request");
        let response = builder
            .send()
            .map_err(|e| request_error(&request.url, e))?;

        let status = response.status().as_u16();
        let headers = response
            .headers()
            .iter()
            .map(|(name, value)| {
                (
                    name.as_str().to_string(),
                    String::from_utf8_lossy(value.as_bytes()).into_owned(),
                )
            })
            .collect();
        let body = response
            .text()
            .map_err(|e| request_error(&request.url, e))?;
        debug!(status, bytes = body.len(), "received response");

        Ok(HttpResponse {
            status,
            headers,
            body,
        })
    }
}
