use crate::error::RetrievalError;
use geojson::{JsonObject, JsonValue};
use reqwest::blocking::Client;
use serde::Deserialize;
use std::fs;
use std::path::PathBuf;
use std::time::Duration;
use tracing::debug;

/// A feature as delivered by a source.
///
/// The geometry is kept as raw JSON and only read when the feature is aggregated,
/// so a bad geometry is skipped on its own instead of rejecting the whole payload.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct RawFeature {
    #[serde(default)]
    pub id: Option<JsonValue>,
    #[serde(default)]
    pub properties: Option<JsonObject>,
    #[serde(default)]
    pub geometry: Option<JsonValue>,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct RawCollection {
    pub features: Vec<RawFeature>,
}

#[derive(Deserialize)]
struct Payload {
    #[serde(rename = "type")]
    kind: String,
    #[serde(default)]
    features: Vec<RawFeature>,
}

/// Provides the raw features of one region (prefecture).
pub trait FeatureSource {
    /// `attempt` starts at 0 and grows with every retry of the same region.
    fn fetch(&self, region: u8, attempt: u32) -> Result<RawCollection, RetrievalError>;
}

/// Replaces `{code}` with the two-digit region code.
pub fn expand_template(template: &str, region: u8) -> String {
    template.replace("{code}", &format!("{region:02}"))
}

/// Only the envelope is validated here: a `FeatureCollection` whose features are objects.
pub fn parse_collection(bytes: &[u8]) -> Result<RawCollection, RetrievalError> {
    let payload: Payload = serde_json::from_slice(bytes)?;
    if payload.kind != "FeatureCollection" {
        return Err(RetrievalError::NotACollection(payload.kind));
    }
    Ok(RawCollection {
        features: payload.features,
    })
}

/// Downloads `{code}`-templated URLs. The timeout doubles on every retry.
pub struct HttpSource {
    client: Client,
    url_template: String,
    timeout: Duration,
}

impl HttpSource {
    pub fn new(
        url_template: impl Into<String>,
        user_agent: &str,
        timeout: Duration,
    ) -> Result<Self, RetrievalError> {
        let client = Client::builder().user_agent(user_agent).build()?;
        Ok(HttpSource {
            client,
            url_template: url_template.into(),
            timeout,
        })
    }

    fn timeout_for(&self, attempt: u32) -> Duration {
        self.timeout.saturating_mul(1 << attempt.min(8))
    }
}

impl FeatureSource for HttpSource {
    fn fetch(&self, region: u8, attempt: u32) -> Result<RawCollection, RetrievalError> {
        let url = expand_template(&self.url_template, region);
        let timeout = self.timeout_for(attempt);
        debug!(%url, ?timeout, "Downloading");

        let bytes = self
            .client
            .get(&url)
            .timeout(timeout)
            .send()?
            .error_for_status()?
            .bytes()?;
        parse_collection(&bytes)
    }
}

/// Reads previously downloaded files from a `{code}`-templated path.
pub struct FileSource {
    path_template: String,
}

impl FileSource {
    pub fn new(path_template: impl Into<String>) -> Self {
        FileSource {
            path_template: path_template.into(),
        }
    }
}

impl FeatureSource for FileSource {
    fn fetch(&self, region: u8, _attempt: u32) -> Result<RawCollection, RetrievalError> {
        let path = PathBuf::from(expand_template(&self.path_template, region));
        debug!(path = %path.display(), "Reading");

        let bytes = fs::read(&path).map_err(|source| RetrievalError::Io { path, source })?;
        parse_collection(&bytes)
    }
}

/// Picks the HTTP or the file source depending on the template scheme.
pub enum TemplateSource {
    Http(HttpSource),
    File(FileSource),
}

impl TemplateSource {
    pub fn new(template: &str, user_agent: &str, timeout: Duration) -> Result<Self, RetrievalError> {
        if !template.contains("{code}") {
            return Err(RetrievalError::Unavailable(format!(
                "source {template:?} has no `{{code}}` placeholder"
            )));
        }
        if is_remote(template) {
            Ok(TemplateSource::Http(HttpSource::new(template, user_agent, timeout)?))
        } else {
            Ok(TemplateSource::File(FileSource::new(template)))
        }
    }
}

impl FeatureSource for TemplateSource {
    fn fetch(&self, region: u8, attempt: u32) -> Result<RawCollection, RetrievalError> {
        match self {
            TemplateSource::Http(source) => source.fetch(region, attempt),
            TemplateSource::File(source) => source.fetch(region, attempt),
        }
    }
}

pub fn is_remote(template: &str) -> bool {
    template.starts_with("http://") || template.starts_with("https://")
}
