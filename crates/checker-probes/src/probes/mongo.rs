//! MongoDB probe: one `find` on a collection, one document per line.

use std::io::Write;
use std::time::Duration;

use mongodb::bson::{Bson, Document};
use mongodb::options::ClientOptions;
use mongodb::sync::Client;
use regex::Regex;
use tracing::debug;

use checker_core::param::{CONNECT_TIMEOUT, DEFAULT_CONNECT_TIMEOUT, DEFAULT_PATTERN};
use checker_core::{CheckResult, ParameterSpec, ProbeError, ProbeOutcome, ResolvedOptions, evaluate};

use crate::probe::HealthProbe;

const URL: &str = "url";
const DATABASE: &str = "database";
const COLLECTION: &str = "collection";
const QUERY: &str = "query";

pub static PARAMETERS: &[ParameterSpec] = &[
    ParameterSpec::new('l', URL, "The MongoDB connection string").required(),
    ParameterSpec::new('d', DATABASE, "The MongoDB database").required(),
    ParameterSpec::new('c', COLLECTION, "The MongoDB collection").required(),
    ParameterSpec::new('q', QUERY, "The MongoDB query filter as JSON").with_default("{}"),
    ParameterSpec::new(
        's',
        CONNECT_TIMEOUT,
        "The connection timeout of the MongoDB server (in milliseconds)",
    )
    .with_default(DEFAULT_CONNECT_TIMEOUT),
    ParameterSpec::response_timeout(
        'r',
        "The response timeout of the MongoDB server (in milliseconds)",
    ),
    ParameterSpec::pattern(
        'x',
        "The regex pattern to search in the MongoDB query result",
        DEFAULT_PATTERN,
    ),
];

/// Parse a JSON filter, including extended JSON such as `{"$oid": …}`.
pub fn parse_filter(raw: &str) -> CheckResult<Document> {
    let json: serde_json::Value =
        serde_json::from_str(raw).map_err(|e| ProbeError::invalid_option(QUERY, raw, e))?;
    match Bson::try_from(json).map_err(|e| ProbeError::invalid_option(QUERY, raw, e))? {
        Bson::Document(document) => Ok(document),
        _ => Err(ProbeError::invalid_option(QUERY, raw, "expected a JSON object")),
    }
}

/// Documents as relaxed extended JSON, one per line.
pub fn render(documents: Vec<Document>) -> String {
    let mut text = String::new();
    for document in documents {
        text.push_str(&Bson::Document(document).into_relaxed_extjson().to_string());
        text.push('\n');
    }
    text
}

#[derive(Debug, Clone)]
pub struct MongoSettings {
    pub url: String,
    pub database: String,
    pub collection: String,
    pub filter: Document,
    pub connect_timeout: Duration,
    pub response_timeout: Duration,
    pub pattern: Regex,
}

impl MongoSettings {
    pub fn from_options(options: &ResolvedOptions) -> CheckResult<Self> {
        Ok(Self {
            url: options.require(URL)?.to_string(),
            database: options.require(DATABASE)?.to_string(),
            collection: options.require(COLLECTION)?.to_string(),
            filter: parse_filter(options.require(QUERY)?)?,
            connect_timeout: options.connect_timeout()?,
            response_timeout: options.response_timeout()?,
            pattern: options.pattern()?,
        })
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MongoProbe;

impl HealthProbe for MongoProbe {
    fn parameters(&self) -> &'static [ParameterSpec] {
        PARAMETERS
    }

    fn check(
        &self,
        options: &ResolvedOptions,
        console: &mut dyn Write,
    ) -> CheckResult<ProbeOutcome> {
        let settings = MongoSettings::from_options(options)?;
        super::install_crypto_provider();

        let mut client_options = ClientOptions::parse(&settings.url)
            .run()
            .map_err(|e| ProbeError::invalid_option(URL, &settings.url, e))?;
        client_options.connect_timeout = Some(settings.connect_timeout);
        client_options.server_selection_timeout = Some(settings.response_timeout);
        let client = Client::with_options(client_options).map_err(ProbeError::connection)?;

        debug!(database = %settings.database, collection = %settings.collection, "running find");
        let cursor = client
            .database(&settings.database)
            .collection::<Document>(&settings.collection)
            .find(settings.filter.clone())
            .max_time(settings.response_timeout)
            .run()
            .map_err(ProbeError::connection)?;

        let documents = cursor
            .collect::<Result<Vec<_>, _>>()
            .map_err(ProbeError::connection)?;
        debug!(documents = documents.len(), "find complete");

        evaluate(render(documents), &settings.pattern, console)
    }
}
