mod assets;
mod body;
mod envelope;
mod model;

use serde::{Deserialize, Serialize};

pub use assets::{DirectoryPreviewHost, ImageAsset, InlineImage, PreviewHandle, PreviewHost, WorkingSet};
pub use body::{parse_finite, project_json, AppliedFields, FormFields, JsonProjection, RequestBody};
pub use envelope::{
    ConnectionSettings, CredentialTransport, RequestEnvelope, API_KEY_HEADER, DEFAULT_API_VERSION,
    DEFAULT_HOST, DEFAULT_MODEL_ID,
};
pub use model::{RequestModel, JSON_IMAGE_NAME};

/// Which representation is canonical for the next request.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RequestMode {
    #[default]
    Form,
    Json,
}

impl RequestMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Form => "form",
            Self::Json => "json",
        }
    }

    /// Anything other than exactly "json" is form mode.
    pub fn parse_lenient(raw: &str) -> Self {
        if raw == "json" {
            Self::Json
        } else {
            Self::Form
        }
    }
}
