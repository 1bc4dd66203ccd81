use std::path::PathBuf;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    // Per-region errors, reported by the batch driver before moving on
    #[error("Region {region:02} could not be retrieved: {source}")]
    Retrieval { region: u8, source: RetrievalError },
    #[error("Could not write `{}`: {source}", .path.display())]
    Write { path: PathBuf, source: std::io::Error },

    // Per-feature errors, the offending geometry or feature is skipped
    #[error("Malformed geometry: {0}")]
    MalformedGeometry(String),
    #[error("Feature has no usable {0}")]
    UnresolvableKey(&'static str),

    #[error(transparent)]
    Json(#[from] serde_json::Error),
}

#[derive(Debug, thiserror::Error)]
pub enum RetrievalError {
    #[error(transparent)]
    Http(#[from] reqwest::Error),
    #[error("Could not read `{}`: {source}", .path.display())]
    Io { path: PathBuf, source: std::io::Error },
    #[error(transparent)]
    InvalidGeoJson(#[from] serde_json::Error),
    #[error("Payload is a {0} but only `FeatureCollection` is supported")]
    NotACollection(String),
    #[error("{0}")]
    Unavailable(String),
}

impl Error {
    pub(crate) fn malformed(reason: impl Into<String>) -> Self {
        Error::MalformedGeometry(reason.into())
    }
}
