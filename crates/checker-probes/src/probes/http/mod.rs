//! HTTP probe.
//!
//! Issues one GET, HEAD or POST request, prints the response headers and
//! body, checks the status code, then searches the body for the pattern.
//!
//! # Redirects
//!
//! Redirects are never followed automatically. A POST whose response
//! carries exactly one `Location` header is followed by a single GET to
//! that location, and the GET response is the one evaluated:
//!
//! ```text
//! POST http://h:8080/login        ──► 302, Location: /next
//! GET  http://h:8080/next         ──► 200   (authoritative)
//! ```
//!
//! A relative location is resolved against the scheme and authority of the
//! original URL. Zero or several `Location` headers leave the POST response
//! in place.

pub mod transport;

use std::fmt;
use std::io::Write;
use std::str::FromStr;

use regex::Regex;
use reqwest::Url;
use reqwest::header::{HeaderName, HeaderValue};
use tracing::debug;

use checker_core::param::DEFAULT_PATTERN;
use checker_core::{CheckResult, ParameterSpec, ProbeError, ProbeOutcome, ResolvedOptions, evaluate};

use crate::probe::HealthProbe;
pub use transport::{ClientSettings, ReqwestTransport, USER_AGENT};

const URL: &str = "url";
const METHOD: &str = "method";
const USERNAME: &str = "username";
const PASSWORD: &str = "password";
const HEADER: &str = "header";
const POST_DATA: &str = "post-data";
const STATUS_CODE: &str = "status-code";

pub static PARAMETERS: &[ParameterSpec] = &[
    ParameterSpec::new('l', URL, "The url of the HTTP server").required(),
    ParameterSpec::new('m', METHOD, "The HTTP method to use (get, head, post)").with_default("get"),
    ParameterSpec::connect_timeout(
        'c',
        "The connection timeout of the HTTP server (in milliseconds)",
    ),
    ParameterSpec::response_timeout(
        'r',
        "The response timeout of the HTTP server (in milliseconds)",
    ),
    ParameterSpec::new('u', USERNAME, "The username for the HTTP server"),
    ParameterSpec::new('p', PASSWORD, "The password for the HTTP server"),
    ParameterSpec::new('h', HEADER, "A name:value header to add to the HTTP request (repeatable)"),
    ParameterSpec::new(
        'd',
        POST_DATA,
        "A name:value form field for the HTTP POST request (repeatable)",
    ),
    ParameterSpec::new('s', STATUS_CODE, "The expected status code of the HTTP response")
        .with_default("200"),
    ParameterSpec::pattern(
        'x',
        "The regex pattern to search in the HTTP response text",
        DEFAULT_PATTERN,
    ),
];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HttpMethod {
    Get,
    Head,
    Post,
}

impl fmt::Display for HttpMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            HttpMethod::Get => "GET",
            HttpMethod::Head => "HEAD",
            HttpMethod::Post => "POST",
        })
    }
}

impl FromStr for HttpMethod {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "get" => Ok(HttpMethod::Get),
            "head" => Ok(HttpMethod::Head),
            "post" => Ok(HttpMethod::Post),
            _ => Err("expected one of get, head, post".to_string()),
        }
    }
}

/// One request as the probe sees it, independent of the client library.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HttpRequest {
    pub method: HttpMethod,
    pub url: String,
    /// Extra headers, attached verbatim.
    pub headers: Vec<(String, String)>,
    /// Form fields, sent url-encoded as the body of a POST.
    pub form: Vec<(String, String)>,
    /// Raw POST body; takes precedence over `form`.
    pub body: Option<String>,
    pub basic_auth: Option<(String, String)>,
}

impl HttpRequest {
    pub fn get(url: impl Into<String>) -> Self {
        Self {
            method: HttpMethod::Get,
            url: url.into(),
            headers: Vec::new(),
            form: Vec::new(),
            body: None,
            basic_auth: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HttpResponse {
    pub status: u16,
    /// In wire order; a header repeated on the wire appears repeatedly.
    pub headers: Vec<(String, String)>,
    pub body: String,
}

impl HttpResponse {
    /// All values of the header `name`, compared case-insensitively.
    pub fn header_values(&self, name: &str) -> Vec<&str> {
        self.headers
            .iter()
            .filter(|(n, _)| n.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
            .collect()
    }
}

/// Executes a single request. Implemented over `reqwest` for real probes
/// and by in-memory fakes in tests.
pub trait HttpTransport {
    fn execute(&self, request: &HttpRequest) -> CheckResult<HttpResponse>;
}

/// Send `request`, applying the POST redirect rule.
pub fn exchange<T: HttpTransport + ?Sized>(
    transport: &T,
    request: &HttpRequest,
) -> CheckResult<HttpResponse> {
    let response = transport.execute(request)?;
    if request.method != HttpMethod::Post {
        return Ok(response);
    }

    let locations = response.header_values("location");
    let [location] = locations.as_slice() else {
        debug!(count = locations.len(), "no single location header, keeping POST response");
        return Ok(response);
    };

    let target = resolve_location(&request.url, location)?;
    debug!(from = %request.url, to = %target, "following POST redirect");

    let basic_auth = if same_origin(&request.url, &target) {
        request.basic_auth.clone()
    } else {
        None
    };
    let follow_up = HttpRequest {
        method: HttpMethod::Get,
        url: target,
        headers: request.headers.clone(),
        form: Vec::new(),
        body: None,
        basic_auth,
    };
    transport.execute(&follow_up)
}

/// Turn a `Location` value into an absolute URL.
///
/// A location that starts with a URI scheme is returned unchanged. Anything
/// else is appended to `scheme://authority` of `original`, with a `/`
/// inserted when the location does not start with one.
pub fn resolve_location(original: &str, location: &str) -> CheckResult<String> {
    if has_scheme(location) {
        return Ok(location.to_string());
    }

    let base = Url::parse(original).map_err(|e| ProbeError::invalid_option(URL, original, e))?;
    let host = base
        .host_str()
        .ok_or_else(|| ProbeError::invalid_option(URL, original, "url has no host"))?;
    let authority = match base.port() {
        Some(port) => format!("{host}:{port}"),
        None => host.to_string(),
    };
    let separator = if location.starts_with('/') { "" } else { "/" };
    Ok(format!("{}://{authority}{separator}{location}", base.scheme()))
}

/// RFC 3986 scheme: a letter, then letters, digits, `+`, `-` or `.`, then `:`.
fn has_scheme(location: &str) -> bool {
    let Some((scheme, _)) = location.split_once(':') else {
        return false;
    };
    let mut chars = scheme.chars();
    chars.next().is_some_and(|c| c.is_ascii_alphabetic())
        && chars.all(|c| c.is_ascii_alphanumeric() || matches!(c, '+' | '-' | '.'))
}

fn same_origin(a: &str, b: &str) -> bool {
    match (Url::parse(a), Url::parse(b)) {
        (Ok(a), Ok(b)) => a.origin() == b.origin(),
        _ => false,
    }
}

/// Typed view of the HTTP probe's options.
#[derive(Debug, Clone)]
pub struct HttpSettings {
    pub client: ClientSettings,
    pub request: HttpRequest,
    pub expected_status: u16,
    pub pattern: Regex,
}

impl HttpSettings {
    pub fn from_options(options: &ResolvedOptions) -> CheckResult<Self> {
        let url = options.require(URL)?.to_string();
        Url::parse(&url).map_err(|e| ProbeError::invalid_option(URL, &url, e))?;

        let method = options.parse::<HttpMethod>(METHOD)?.unwrap_or(HttpMethod::Get);
        let expected_status = options.parse::<u16>(STATUS_CODE)?.unwrap_or(200);

        let headers = options.pairs(HEADER)?;
        for (name, value) in &headers {
            let raw = format!("{name}:{value}");
            HeaderName::from_bytes(name.as_bytes())
                .map_err(|e| ProbeError::invalid_option(HEADER, &raw, e))?;
            HeaderValue::from_str(value).map_err(|e| ProbeError::invalid_option(HEADER, &raw, e))?;
        }
        let form = match method {
            HttpMethod::Post => options.pairs(POST_DATA)?,
            _ => Vec::new(),
        };

        let basic_auth = match (options.get(USERNAME), options.get(PASSWORD)) {
            (Some(username), Some(password)) => Some((username.to_string(), password.to_string())),
            _ => None,
        };

        Ok(Self {
            client: ClientSettings {
                connect_timeout: options.connect_timeout()?,
                response_timeout: options.response_timeout()?,
                accept_any_certificate: true,
            },
            request: HttpRequest {
                method,
                url,
                headers,
                form,
                body: None,
                basic_auth,
            },
            expected_status,
            pattern: options.pattern()?,
        })
    }
}

/// Run the HTTP check over `transport`.
pub fn run<T: HttpTransport + ?Sized>(
    transport: &T,
    settings: &HttpSettings,
    console: &mut dyn Write,
) -> CheckResult<ProbeOutcome> {
    let response = exchange(transport, &settings.request)?;

    for (name, value) in &response.headers {
        writeln!(console, "{name}: {value}")?;
    }

    if response.status != settings.expected_status {
        if !response.body.is_empty() {
            writeln!(console, "{}", response.body)?;
        }
        return Err(ProbeError::StatusMismatch {
            expected: settings.expected_status,
            actual: response.status,
        });
    }

    evaluate(response.body, &settings.pattern, console)
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct HttpProbe;

impl HealthProbe for HttpProbe {
    fn parameters(&self) -> &'static [ParameterSpec] {
        PARAMETERS
    }

    fn check(
        &self,
        options: &ResolvedOptions,
        console: &mut dyn Write,
    ) -> CheckResult<ProbeOutcome> {
        let settings = HttpSettings::from_options(options)?;
        let transport = ReqwestTransport::new(&settings.client)?;
        run(&transport, &settings, console)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::RefCell;
    use std::collections::VecDeque;
    use std::io::{Read, Write as _};
    use std::net::TcpListener;
    use std::thread;

    /// Replays canned responses and records every request it receives.
    struct ScriptedTransport {
        responses: RefCell<VecDeque<HttpResponse>>,
        requests: RefCell<Vec<HttpRequest>>,
    }

    impl ScriptedTransport {
        fn new(responses: Vec<HttpResponse>) -> Self {
            Self {
                responses: RefCell::new(responses.into()),
                requests: RefCell::new(Vec::new()),
            }
        }

        fn urls(&self) -> Vec<(HttpMethod, String)> {
            self.requests
                .borrow()
                .iter()
                .map(|r| (r.method, r.url.clone()))
                .collect()
        }
    }

    impl HttpTransport for ScriptedTransport {
        fn execute(&self, request: &HttpRequest) -> CheckResult<HttpResponse> {
            self.requests.borrow_mut().push(request.clone());
            self.responses
                .borrow_mut()
                .pop_front()
                .ok_or_else(|| ProbeError::Connection("no scripted response left".into()))
        }
    }

    fn response(status: u16, headers: &[(&str, &str)], body: &str) -> HttpResponse {
        HttpResponse {
            status,
            headers: headers
                .iter()
                .map(|(n, v)| (n.to_string(), v.to_string()))
                .collect(),
            body: body.to_string(),
        }
    }

    fn post(url: &str) -> HttpRequest {
        HttpRequest {
            method: HttpMethod::Post,
            ..HttpRequest::get(url)
        }
    }

    fn settings(request: HttpRequest, expected_status: u16, pattern: &str) -> HttpSettings {
        HttpSettings {
            client: ClientSettings {
                connect_timeout: std::time::Duration::from_millis(5000),
                response_timeout: std::time::Duration::from_millis(10000),
                accept_any_certificate: true,
            },
            request,
            expected_status,
            pattern: Regex::new(pattern).unwrap(),
        }
    }

    #[test]
    fn relative_location_resolves_against_original_authority() {
        let transport = ScriptedTransport::new(vec![
            response(302, &[("Location", "/next")], ""),
            response(200, &[], "done"),
        ]);
        let final_response = exchange(&transport, &post("http://h:8080/a")).unwrap();
        assert_eq!(final_response.body, "done");
        assert_eq!(
            transport.urls(),
            vec![
                (HttpMethod::Post, "http://h:8080/a".to_string()),
                (HttpMethod::Get, "http://h:8080/next".to_string()),
            ]
        );
    }

    #[test]
    fn relative_location_without_slash_gets_one() {
        assert_eq!(
            resolve_location("https://h/a/b", "next?x=1").unwrap(),
            "https://h/next?x=1"
        );
    }

    #[test]
    fn absolute_location_is_used_verbatim() {
        let transport = ScriptedTransport::new(vec![
            response(303, &[("location", "http://other/x")], ""),
            response(200, &[], "elsewhere"),
        ]);
        exchange(&transport, &post("http://h:8080/a")).unwrap();
        assert_eq!(transport.urls()[1], (HttpMethod::Get, "http://other/x".to_string()));
    }

    #[test]
    fn no_location_means_no_follow_up() {
        let transport = ScriptedTransport::new(vec![response(200, &[], "posted")]);
        let final_response = exchange(&transport, &post("http://h:8080/a")).unwrap();
        assert_eq!(final_response.body, "posted");
        assert_eq!(transport.urls().len(), 1);
    }

    #[test]
    fn two_locations_mean_no_follow_up() {
        let transport = ScriptedTransport::new(vec![response(
            302,
            &[("Location", "/one"), ("Location", "/two")],
            "",
        )]);
        let final_response = exchange(&transport, &post("http://h:8080/a")).unwrap();
        assert_eq!(final_response.status, 302);
        assert_eq!(transport.urls().len(), 1);
    }

    #[test]
    fn get_is_never_redirected() {
        let transport = ScriptedTransport::new(vec![response(301, &[("Location", "/moved")], "")]);
        let final_response = exchange(&transport, &HttpRequest::get("http://h/a")).unwrap();
        assert_eq!(final_response.status, 301);
        assert_eq!(transport.urls().len(), 1);
    }

    #[test]
    fn credentials_only_follow_to_the_same_origin() {
        let mut request = post("http://h:8080/a");
        request.basic_auth = Some(("user".into(), "secret".into()));

        let transport = ScriptedTransport::new(vec![
            response(302, &[("Location", "/next")], ""),
            response(200, &[], ""),
        ]);
        exchange(&transport, &request).unwrap();
        assert!(transport.requests.borrow()[1].basic_auth.is_some());

        let transport = ScriptedTransport::new(vec![
            response(302, &[("Location", "http://other/x")], ""),
            response(200, &[], ""),
        ]);
        exchange(&transport, &request).unwrap();
        assert!(transport.requests.borrow()[1].basic_auth.is_none());
    }

    #[test]
    fn status_mismatch_fails_before_pattern() {
        let transport = ScriptedTransport::new(vec![response(503, &[], "unavailable")]);
        let mut console = Vec::new();
        let err = run(
            &transport,
            &settings(HttpRequest::get("http://h/health"), 200, "never-matches"),
            &mut console,
        )
        .unwrap_err();
        assert!(matches!(err, ProbeError::StatusMismatch { expected: 200, actual: 503 }));
    }

    #[test]
    fn headers_are_printed_before_body() {
        let transport = ScriptedTransport::new(vec![response(
            200,
            &[("content-type", "text/plain")],
            "status: UP",
        )]);
        let mut console = Vec::new();
        let outcome = run(
            &transport,
            &settings(HttpRequest::get("http://h/health"), 200, "UP"),
            &mut console,
        )
        .unwrap();
        assert!(outcome.matched);
        assert_eq!(
            String::from_utf8(console).unwrap(),
            "content-type: text/plain\nstatus: UP\n"
        );
    }

    #[test]
    fn repeated_checks_agree() {
        let settings = settings(HttpRequest::get("http://h/health"), 200, "UP");
        let transport = ScriptedTransport::new(vec![
            response(200, &[], "UP"),
            response(200, &[], "UP"),
        ]);
        let first = run(&transport, &settings, &mut Vec::new()).unwrap();
        let second = run(&transport, &settings, &mut Vec::new()).unwrap();
        assert_eq!(first.matched, second.matched);
    }

    #[test]
    fn settings_from_options() {
        let options = ResolvedOptions::new(PARAMETERS)
            .with(URL, "http://h:8080/login")
            .with(METHOD, "POST")
            .with(USERNAME, "user")
            .with(POST_DATA, "name: alice")
            .with(HEADER, "X-Trace: 1");
        let settings = HttpSettings::from_options(&options).unwrap();
        assert_eq!(settings.request.method, HttpMethod::Post);
        assert_eq!(settings.request.form, vec![("name".into(), "alice".into())]);
        assert_eq!(settings.request.headers, vec![("X-Trace".into(), "1".into())]);
        assert!(settings.request.basic_auth.is_none(), "password missing");
        assert_eq!(settings.expected_status, 200);
        assert_eq!(settings.client.connect_timeout.as_millis(), 5000);
        assert_eq!(settings.client.response_timeout.as_millis(), 10000);
        assert!(settings.client.accept_any_certificate);
    }

    #[test]
    fn unknown_method_is_invalid() {
        let options = ResolvedOptions::new(PARAMETERS)
            .with(URL, "http://h/")
            .with(METHOD, "delete");
        assert!(matches!(
            HttpSettings::from_options(&options),
            Err(ProbeError::InvalidOption { ref option, .. }) if option == METHOD
        ));
    }

    #[test]
    fn missing_url_is_reported() {
        let options = ResolvedOptions::new(PARAMETERS);
        assert!(matches!(
            HttpSettings::from_options(&options),
            Err(ProbeError::MissingOption(ref o)) if o == URL
        ));
    }

    /// Serve one canned HTTP response on a local port.
    fn serve_once(raw_response: &'static str) -> String {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();
        thread::spawn(move || {
            let (mut stream, _) = listener.accept().unwrap();
            let mut request = Vec::new();
            let mut buf = [0u8; 1024];
            while !request.windows(4).any(|w| w == b"\r\n\r\n") {
                let n = stream.read(&mut buf).unwrap();
                if n == 0 {
                    break;
                }
                request.extend_from_slice(&buf[..n]);
            }
            stream.write_all(raw_response.as_bytes()).unwrap();
        });
        format!("http://{addr}/health")
    }

    #[test]
    fn probe_against_local_server() {
        let url = serve_once(
            "HTTP/1.1 200 OK\r\nContent-Length: 10\r\nConnection: close\r\n\r\nstatus: UP",
        );
        let options = ResolvedOptions::new(PARAMETERS)
            .with(URL, url)
            .with("pattern", "UP");
        let mut console = Vec::new();
        let outcome = HttpProbe.check(&options, &mut console).unwrap();
        assert!(outcome.matched);
        assert_eq!(outcome.raw_response_text, "status: UP");
        let printed = String::from_utf8(console).unwrap();
        assert!(printed.contains("content-length: 10"));
    }

    #[test]
    fn probe_reports_unexpected_status_from_local_server() {
        let url = serve_once(
            "HTTP/1.1 503 Service Unavailable\r\nContent-Length: 0\r\nConnection: close\r\n\r\n",
        );
        let options = ResolvedOptions::new(PARAMETERS).with(URL, url);
        let err = HttpProbe.check(&options, &mut Vec::new()).unwrap_err();
        assert!(matches!(err, ProbeError::StatusMismatch { actual: 503, .. }));
    }

    #[test]
    fn refused_connection_is_connection_error() {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);
        let options = ResolvedOptions::new(PARAMETERS)
            .with(URL, format!("http://{addr}/"))
            .with("connect-timeout", "500");
        let err = HttpProbe.check(&options, &mut Vec::new()).unwrap_err();
        assert!(matches!(err, ProbeError::Connection(_)));
    }
}
