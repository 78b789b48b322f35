//! Solr probe: one `select` query against a core, one document per line.

use std::io::Write;

use regex::Regex;
use reqwest::Url;
use serde_json::Value;
use tracing::debug;

use checker_core::param::DEFAULT_PATTERN;
use checker_core::{CheckResult, ParameterSpec, ProbeError, ProbeOutcome, ResolvedOptions, evaluate};

use crate::probe::HealthProbe;
use crate::probes::http::{ClientSettings, HttpRequest, HttpTransport, ReqwestTransport};

const URL: &str = "url";
const QUERY: &str = "query";

pub static PARAMETERS: &[ParameterSpec] = &[
    ParameterSpec::new('l', URL, "The url of the Solr core").required(),
    ParameterSpec::new('q', QUERY, "The Solr query to execute").with_default("*:*"),
    ParameterSpec::connect_timeout(
        'c',
        "The connection timeout of the Solr server (in milliseconds)",
    ),
    ParameterSpec::response_timeout(
        'r',
        "The response timeout of the Solr server (in milliseconds)",
    ),
    ParameterSpec::pattern(
        'x',
        "The regex pattern to search in the Solr result text",
        DEFAULT_PATTERN,
    ),
];

/// `{core}/select?q={query}&wt=json`.
pub fn select_url(core: &str, query: &str) -> CheckResult<String> {
    let base = format!("{}/select", core.trim_end_matches('/'));
    Url::parse_with_params(&base, &[("q", query), ("wt", "json")])
        .map(String::from)
        .map_err(|e| ProbeError::invalid_option(URL, core, e))
}

/// The `response.docs` array as compact JSON, one document per line.
pub fn render(body: &str) -> CheckResult<String> {
    let json: Value = serde_json::from_str(body)
        .map_err(|e| ProbeError::connection(format!("solr returned invalid json: {e}")))?;
    let docs = json
        .pointer("/response/docs")
        .and_then(Value::as_array)
        .ok_or_else(|| ProbeError::connection("solr response has no response.docs"))?;

    let mut text = String::new();
    for doc in docs {
        text.push_str(&doc.to_string());
        text.push('\n');
    }
    Ok(text)
}

#[derive(Debug, Clone)]
pub struct SolrSettings {
    pub client: ClientSettings,
    pub url: String,
    pub pattern: Regex,
}

impl SolrSettings {
    pub fn from_options(options: &ResolvedOptions) -> CheckResult<Self> {
        Ok(Self {
            client: ClientSettings {
                connect_timeout: options.connect_timeout()?,
                response_timeout: options.response_timeout()?,
                accept_any_certificate: false,
            },
            url: select_url(options.require(URL)?, options.require(QUERY)?)?,
            pattern: options.pattern()?,
        })
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SolrProbe;

impl HealthProbe for SolrProbe {
    fn parameters(&self) -> &'static [ParameterSpec] {
        PARAMETERS
    }

    fn check(
        &self,
        options: &ResolvedOptions,
        console: &mut dyn Write,
    ) -> CheckResult<ProbeOutcome> {
        let settings = SolrSettings::from_options(options)?;
        let transport = ReqwestTransport::new(&settings.client)?;

        let response = transport.execute(&HttpRequest::get(&settings.url))?;
        if response.status != 200 {
            if !response.body.is_empty() {
                writeln!(console, "{}", response.body)?;
            }
            return Err(ProbeError::StatusMismatch {
                expected: 200,
                actual: response.status,
            });
        }

        let text = render(&response.body)?;
        debug!(lines = text.lines().count(), "solr query complete");
        evaluate(text, &settings.pattern, console)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Read;
    use std::net::TcpListener;
    use std::thread;

    #[test]
    fn select_url_encodes_query() {
        assert_eq!(
            select_url("http://solr:8983/solr/core1/", "title:\"a b\"").unwrap(),
            "http://solr:8983/solr/core1/select?q=title%3A%22a+b%22&wt=json"
        );
    }

    #[test]
    fn default_query_matches_all() {
        let options = ResolvedOptions::new(PARAMETERS).with(URL, "http://solr:8983/solr/core1");
        let settings = SolrSettings::from_options(&options).unwrap();
        assert_eq!(settings.url, "http://solr:8983/solr/core1/select?q=*%3A*&wt=json");
        assert!(!settings.client.accept_any_certificate);
    }

    #[test]
    fn documents_render_one_per_line() {
        let body = concat!(
            r#"{"responseHeader":{"status":0},"#,
            r#""response":{"numFound":2,"docs":[{"id":"1"},{"id":"2"}]}}"#
        );
        assert_eq!(render(body).unwrap(), "{\"id\":\"1\"}\n{\"id\":\"2\"}\n");
    }

    #[test]
    fn empty_result_renders_nothing() {
        let body = r#"{"response":{"numFound":0,"docs":[]}}"#;
        assert_eq!(render(body).unwrap(), "");
    }

    #[test]
    fn error_body_is_a_connection_error() {
        assert!(matches!(render("<html>"), Err(ProbeError::Connection(_))));
        assert!(matches!(render(r#"{"error":{}}"#), Err(ProbeError::Connection(_))));
    }

    #[test]
    fn error_status_prints_the_body_before_failing() {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let port = listener.local_addr().unwrap().port();
        let server = thread::spawn(move || {
            let (mut stream, _) = listener.accept().unwrap();
            let mut buf = [0u8; 4096];
            let n = stream.read(&mut buf).unwrap();
            let body = r#"{"error":{"msg":"SolrCore 'core1' is not available"}}"#;
            let response = format!(
                "HTTP/1.1 503 Service Unavailable\r\nContent-Length: {}\r\n\
                 Connection: close\r\n\r\n{body}",
                body.len()
            );
            stream.write_all(response.as_bytes()).unwrap();
            String::from_utf8_lossy(&buf[..n]).into_owned()
        });

        let options = ResolvedOptions::new(PARAMETERS)
            .with(URL, format!("http://127.0.0.1:{port}/solr/core1"));
        let mut console = Vec::new();
        let err = SolrProbe.check(&options, &mut console).unwrap_err();
        assert!(matches!(
            err,
            ProbeError::StatusMismatch { expected: 200, actual: 503 }
        ));
        assert!(String::from_utf8(console).unwrap().contains("is not available"));
        assert!(server.join().unwrap().starts_with("GET /solr/core1/select?q="));
    }
}
