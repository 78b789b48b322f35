//! Elasticsearch probe: one `_search` request, pretty-printed response.

use std::io::Write;

use regex::Regex;
use reqwest::Url;
use serde_json::{Value, json};
use tracing::debug;

use checker_core::param::DEFAULT_PATTERN;
use checker_core::{
    CheckResult, ParameterSpec, ProbeError, ProbeOutcome, ResolvedOptions, evaluate,
};

use crate::probe::HealthProbe;
use crate::probes::http::{
    ClientSettings, HttpMethod, HttpRequest, HttpTransport, ReqwestTransport,
};

const HOSTNAME: &str = "hostname";
const PORT: &str = "port";
const INDEX: &str = "index";
const TYPES: &str = "types";
const QUERY: &str = "query";

pub static PARAMETERS: &[ParameterSpec] = &[
    ParameterSpec::new('h', HOSTNAME, "The hostname of the Elasticsearch server").required(),
    ParameterSpec::new('p', PORT, "The HTTP port of the Elasticsearch server").with_default("9200"),
    ParameterSpec::connect_timeout(
        'c',
        "The connection timeout of the Elasticsearch server (in milliseconds)",
    ),
    ParameterSpec::response_timeout(
        'r',
        "The response timeout of the Elasticsearch server (in milliseconds)",
    ),
    ParameterSpec::new('i', INDEX, "The Elasticsearch index to search"),
    ParameterSpec::new('t', TYPES, "Comma-separated mapping types to search"),
    ParameterSpec::new('q', QUERY, "The query DSL object, or a query string")
        .with_default(r#"{"match_all":{}}"#),
    ParameterSpec::pattern(
        'x',
        "The regex pattern to search in the Elasticsearch response text",
        DEFAULT_PATTERN,
    ),
];

/// `http://{hostname}:{port}/{index}[/{types}]/_search`; a missing index
/// with types searches `_all`. Path segments are percent-encoded and an
/// IPv6 literal is bracketed.
pub fn search_url(
    hostname: &str,
    port: u16,
    index: Option<&str>,
    types: &[String],
) -> CheckResult<Url> {
    let host = if hostname.contains(':') && !hostname.starts_with('[') {
        format!("[{hostname}]")
    } else {
        hostname.to_string()
    };
    let invalid_host = |reason: &dyn std::fmt::Display| {
        ProbeError::invalid_option(HOSTNAME, hostname, reason)
    };
    let mut url = Url::parse("http://localhost/").map_err(|e| invalid_host(&e))?;
    url.set_host(Some(&host)).map_err(|e| invalid_host(&e))?;
    url.set_port(Some(port))
        .map_err(|()| invalid_host(&"cannot carry a port"))?;

    {
        let mut segments = url
            .path_segments_mut()
            .map_err(|()| invalid_host(&"cannot be a base url"))?;
        segments.clear();
        match (index, types.is_empty()) {
            (Some(index), _) => {
                segments.push(index);
            }
            (None, false) => {
                segments.push("_all");
            }
            (None, true) => {}
        }
        if !types.is_empty() {
            segments.push(&types.join(","));
        }
        segments.push("_search");
    }
    Ok(url)
}

/// The request body. A JSON object is used as the query; anything else
/// becomes a `query_string` query.
pub fn search_body(query: &str) -> String {
    let query = match serde_json::from_str::<Value>(query) {
        Ok(value @ Value::Object(_)) => value,
        _ => json!({ "query_string": { "query": query } }),
    };
    json!({ "query": query }).to_string()
}

#[derive(Debug, Clone)]
pub struct ElasticSearchSettings {
    pub client: ClientSettings,
    pub url: String,
    pub body: String,
    pub pattern: Regex,
}

impl ElasticSearchSettings {
    pub fn from_options(options: &ResolvedOptions) -> CheckResult<Self> {
        let hostname = options.require(HOSTNAME)?;
        let port = options.parse::<u16>(PORT)?.unwrap_or(9200);
        let url = search_url(hostname, port, options.get(INDEX), &options.list(TYPES))?;

        Ok(Self {
            client: ClientSettings {
                connect_timeout: options.connect_timeout()?,
                response_timeout: options.response_timeout()?,
                accept_any_certificate: false,
            },
            url: url.into(),
            body: search_body(options.require(QUERY)?),
            pattern: options.pattern()?,
        })
    }
}

/// Pretty-print a JSON response; non-JSON bodies pass through unchanged.
pub fn render(body: &str) -> String {
    match serde_json::from_str::<Value>(body) {
        Ok(value) => serde_json::to_string_pretty(&value).unwrap_or_else(|_| body.to_string()),
        Err(_) => body.to_string(),
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ElasticSearchProbe;

impl HealthProbe for ElasticSearchProbe {
    fn parameters(&self) -> &'static [ParameterSpec] {
        PARAMETERS
    }

    fn check(
        &self,
        options: &ResolvedOptions,
        console: &mut dyn Write,
    ) -> CheckResult<ProbeOutcome> {
        let settings = ElasticSearchSettings::from_options(options)?;
        let transport = ReqwestTransport::new(&settings.client)?;

        let request = HttpRequest {
            method: HttpMethod::Post,
            headers: vec![("Content-Type".into(), "application/json".into())],
            body: Some(settings.body.clone()),
            ..HttpRequest::get(&settings.url)
        };
        debug!(url = %settings.url, "searching");
        let response = transport.execute(&request)?;
        if !(200..300).contains(&response.status) {
            if !response.body.is_empty() {
                writeln!(console, "{}", response.body)?;
            }
            return Err(ProbeError::StatusMismatch {
                expected: 200,
                actual: response.status,
            });
        }

        evaluate(render(&response.body), &settings.pattern, console)
    }
}
