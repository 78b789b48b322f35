//! LDAP probe.
//!
//! Binds (when a bind DN is given), runs one search and renders every
//! returned entry as an LDIF block. Large result sets are fetched with the
//! simple paged results control (RFC 2696):
//!
//! ```text
//! search(size, cookie = "")  ──► entries₁ + cookie₁
//! search(size, cookie₁)      ──► entries₂ + cookie₂
//! ...
//! search(size, cookieₙ₋₁)    ──► entriesₙ + ""        (done)
//! ```
//!
//! A page size of `-1` skips the control and issues a single search.

use std::collections::BTreeMap;
use std::fmt;
use std::fmt::Write as _;
use std::io::Write;
use std::str::FromStr;
use std::time::Duration;

use base64::Engine as _;
use base64::engine::general_purpose::STANDARD;
use ldap3::controls::{ControlType, PagedResults};
use ldap3::{LdapConn, LdapConnSettings, Scope, SearchEntry};
use regex::Regex;
use tracing::debug;

use checker_core::param::DEFAULT_PATTERN;
use checker_core::{CheckResult, ParameterSpec, ProbeError, ProbeOutcome, ResolvedOptions, evaluate};

use crate::probe::HealthProbe;

const URL: &str = "url";
const USERNAME: &str = "username";
const PASSWORD: &str = "password";
const BASE_DN: &str = "base-dn";
const SEARCH_SCOPE: &str = "search-scope";
const FILTER: &str = "filter";
const ATTRIBUTES: &str = "attributes";
const PAGE_SIZE: &str = "page-size";

/// Page size that turns paging off.
pub const UNPAGED: i32 = -1;

pub static PARAMETERS: &[ParameterSpec] = &[
    ParameterSpec::new('u', USERNAME, "The bind DN for the LDAP server"),
    ParameterSpec::new('p', PASSWORD, "The password for the LDAP server"),
    ParameterSpec::connect_timeout(
        'c',
        "The connection timeout of the LDAP server (in milliseconds)",
    ),
    ParameterSpec::response_timeout(
        'r',
        "The response timeout of the LDAP server (in milliseconds)",
    ),
    ParameterSpec::new('l', URL, "The LDAP url to connect to (ldaps:// for TLS)").required(),
    ParameterSpec::new('b', BASE_DN, "The base DN of the LDAP search").required(),
    ParameterSpec::new('s', SEARCH_SCOPE, "The scope of the LDAP search (base, one, sub)")
        .with_default("base"),
    ParameterSpec::new('f', FILTER, "The filter of the LDAP search")
        .with_default("(objectClass=*)"),
    ParameterSpec::new('a', ATTRIBUTES, "Comma-separated attributes to return"),
    ParameterSpec::new('x', PAGE_SIZE, "The page size of the LDAP search, -1 disables paging")
        .with_default("1000"),
    ParameterSpec::pattern(
        'y',
        "The regex pattern to search in the LDAP search result",
        DEFAULT_PATTERN,
    ),
];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SearchScope {
    Base,
    One,
    Sub,
}

impl FromStr for SearchScope {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "base" => Ok(SearchScope::Base),
            "one" | "onelevel" => Ok(SearchScope::One),
            "sub" | "subtree" => Ok(SearchScope::Sub),
            _ => Err("expected one of base, one, sub".to_string()),
        }
    }
}

impl From<SearchScope> for Scope {
    fn from(scope: SearchScope) -> Self {
        match scope {
            SearchScope::Base => Scope::Base,
            SearchScope::One => Scope::OneLevel,
            SearchScope::Sub => Scope::Subtree,
        }
    }
}

/// The parts of a search that stay fixed across pages.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SearchRequest {
    pub base_dn: String,
    pub scope: SearchScope,
    pub filter: String,
    /// Empty means all user attributes.
    pub attributes: Vec<String>,
}

/// One returned entry. Attribute names are kept sorted for stable output.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DirectoryEntry {
    pub dn: String,
    pub attrs: BTreeMap<String, Vec<String>>,
    pub bin_attrs: BTreeMap<String, Vec<Vec<u8>>>,
}

impl DirectoryEntry {
    pub fn new(dn: impl Into<String>) -> Self {
        Self {
            dn: dn.into(),
            ..Self::default()
        }
    }

    pub fn with_attr(mut self, name: &str, value: &str) -> Self {
        self.attrs.entry(name.to_string()).or_default().push(value.to_string());
        self
    }
}

impl From<SearchEntry> for DirectoryEntry {
    fn from(entry: SearchEntry) -> Self {
        Self {
            dn: entry.dn,
            attrs: entry.attrs.into_iter().collect(),
            bin_attrs: entry.bin_attrs.into_iter().collect(),
        }
    }
}

impl fmt::Display for DirectoryEntry {
    /// LDIF content record; binary values are base64 encoded (`name:: value`).
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "dn: {}", self.dn)?;
        for (name, values) in &self.attrs {
            for value in values {
                writeln!(f, "{name}: {value}")?;
            }
        }
        for (name, values) in &self.bin_attrs {
            for value in values {
                writeln!(f, "{name}:: {}", STANDARD.encode(value))?;
            }
        }
        Ok(())
    }
}

/// Paging control sent with a request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PageRequest {
    pub size: i32,
    pub cookie: Vec<u8>,
}

/// One response from the directory.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SearchPage {
    pub entries: Vec<DirectoryEntry>,
    /// Cookie from the paged results response control, if the server sent one.
    pub cookie: Option<Vec<u8>>,
}

/// A directory that can run one search request.
pub trait Directory {
    /// Run `request`, attaching the paging control when `page` is given.
    fn search(
        &mut self,
        request: &SearchRequest,
        page: Option<PageRequest>,
    ) -> CheckResult<SearchPage>;
}

/// Run `request` to completion and return every entry in server order.
///
/// With `page_size == UNPAGED` exactly one unpaged search is issued.
/// Otherwise pages are requested until the server returns no cookie or
/// an empty one.
pub fn collect_entries<D: Directory + ?Sized>(
    directory: &mut D,
    request: &SearchRequest,
    page_size: i32,
) -> CheckResult<Vec<DirectoryEntry>> {
    if page_size == UNPAGED {
        return Ok(directory.search(request, None)?.entries);
    }

    let mut entries = Vec::new();
    let mut cookie = Vec::new();
    let mut pages = 0usize;
    loop {
        let page = directory.search(
            request,
            Some(PageRequest {
                size: page_size,
                cookie,
            }),
        )?;
        pages += 1;
        debug!(page = pages, entries = page.entries.len(), "received search page");
        entries.extend(page.entries);

        match page.cookie {
            Some(next) if !next.is_empty() => cookie = next,
            _ => break,
        }
    }
    debug!(pages, total = entries.len(), "paged search complete");
    Ok(entries)
}

/// Entries as LDIF blocks separated by blank lines.
pub fn render(entries: &[DirectoryEntry]) -> String {
    let mut text = String::new();
    for entry in entries {
        // Writing into a String cannot fail.
        let _ = writeln!(text, "{entry}");
    }
    text
}

/// Typed view of the LDAP probe's options.
#[derive(Debug, Clone)]
pub struct LdapSettings {
    pub url: String,
    pub bind: Option<(String, String)>,
    pub connect_timeout: Duration,
    pub response_timeout: Duration,
    pub request: SearchRequest,
    pub page_size: i32,
    pub pattern: Regex,
}

impl LdapSettings {
    pub fn from_options(options: &ResolvedOptions) -> CheckResult<Self> {
        let page_size = options.parse::<i32>(PAGE_SIZE)?.unwrap_or(1000);
        if page_size != UNPAGED && page_size < 1 {
            return Err(ProbeError::invalid_option(
                PAGE_SIZE,
                &page_size.to_string(),
                "must be positive, or -1 to disable paging",
            ));
        }

        let bind = options.get(USERNAME).map(|dn| {
            (dn.to_string(), options.get(PASSWORD).unwrap_or_default().to_string())
        });

        Ok(Self {
            url: options.require(URL)?.to_string(),
            bind,
            connect_timeout: options.connect_timeout()?,
            response_timeout: options.response_timeout()?,
            request: SearchRequest {
                base_dn: options.require(BASE_DN)?.to_string(),
                scope: options.parse::<SearchScope>(SEARCH_SCOPE)?.unwrap_or(SearchScope::Base),
                filter: options.require(FILTER)?.to_string(),
                attributes: options.list(ATTRIBUTES),
            },
            page_size,
            pattern: options.pattern()?,
        })
    }
}

fn ldap_error(context: &str, err: ldap3::LdapError) -> ProbeError {
    ProbeError::connection(format!("{context}: {err}"))
}

/// [`Directory`] over a live `ldap3` connection.
pub struct LdapDirectory {
    conn: LdapConn,
    response_timeout: Duration,
}

impl LdapDirectory {
    /// Connect to `url` (TLS for `ldaps://`) and bind if credentials are given.
    pub fn connect(settings: &LdapSettings) -> CheckResult<Self> {
        super::install_crypto_provider();
        let conn_settings = LdapConnSettings::new().set_conn_timeout(settings.connect_timeout);
        let mut conn = LdapConn::with_settings(conn_settings, &settings.url)
            .map_err(|e| ldap_error(&format!("connecting to {}", settings.url), e))?;

        if let Some((dn, password)) = &settings.bind {
            debug!(dn = %dn, "simple bind");
            conn.with_timeout(settings.response_timeout)
                .simple_bind(dn, password)
                .and_then(|result| result.success())
                .map_err(|e| ldap_error(&format!("binding as {dn}"), e))?;
        }

        Ok(Self {
            conn,
            response_timeout: settings.response_timeout,
        })
    }

    pub fn close(mut self) {
        if let Err(e) = self.conn.unbind() {
            debug!(error = %e, "unbind failed");
        }
    }
}

impl Directory for LdapDirectory {
    fn search(
        &mut self,
        request: &SearchRequest,
        page: Option<PageRequest>,
    ) -> CheckResult<SearchPage> {
        let conn = self.conn.with_timeout(self.response_timeout);
        if let Some(page) = page {
            conn.with_controls(PagedResults {
                size: page.size,
                cookie: page.cookie,
            });
        }

        let (entries, result) = conn
            .search(
                &request.base_dn,
                request.scope.into(),
                &request.filter,
                &request.attributes,
            )
            .and_then(|result| result.success())
            .map_err(|e| ldap_error(&format!("searching {}", request.base_dn), e))?;

        let cookie = result
            .ctrls
            .iter()
            .find(|ctrl| matches!(ctrl.0, Some(ControlType::PagedResults)))
            .map(|ctrl| ctrl.1.parse::<PagedResults>().cookie);

        Ok(SearchPage {
            entries: entries
                .into_iter()
                .map(|entry| SearchEntry::construct(entry).into())
                .collect(),
            cookie,
        })
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct LdapProbe;

impl HealthProbe for LdapProbe {
    fn parameters(&self) -> &'static [ParameterSpec] {
        PARAMETERS
    }

    fn check(
        &self,
        options: &ResolvedOptions,
        console: &mut dyn Write,
    ) -> CheckResult<ProbeOutcome> {
        let settings = LdapSettings::from_options(options)?;
        let mut directory = LdapDirectory::connect(&settings)?;
        let entries = collect_entries(&mut directory, &settings.request, settings.page_size);
        directory.close();
        evaluate(render(&entries?), &settings.pattern, console)
    }
}
