use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use sha2::{Digest, Sha256};
use url::Url;

use crate::error::{ClientError, ClientResult};

pub const DEFAULT_HOST: &str = "https://generativelanguage.googleapis.com";
pub const DEFAULT_MODEL_ID: &str = "gemini-3-pro-image-preview";
pub const DEFAULT_API_VERSION: &str = "v1";
pub const API_KEY_HEADER: &str = "x-goog-api-key";
pub const CONTENT_TYPE_HEADER: &str = "Content-Type";

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CredentialTransport {
    #[default]
    Query,
    Header,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectionSettings {
    pub host: String,
    pub api_key: String,
    pub credential_transport: CredentialTransport,
    pub model_id: String,
    pub api_version: String,
}

impl Default for ConnectionSettings {
    fn default() -> Self {
        Self {
            host: DEFAULT_HOST.to_string(),
            api_key: String::new(),
            credential_transport: CredentialTransport::Query,
            model_id: DEFAULT_MODEL_ID.to_string(),
            api_version: DEFAULT_API_VERSION.to_string(),
        }
    }
}

impl ConnectionSettings {
    pub fn has_credential(&self) -> bool {
        !self.api_key.trim().is_empty()
    }

    /// Blank host falls back to the default; trailing slashes are dropped.
    pub fn effective_host(&self) -> String {
        let trimmed = self.host.trim().trim_end_matches('/');
        if trimmed.is_empty() {
            DEFAULT_HOST.to_string()
        } else {
            trimmed.to_string()
        }
    }

    pub fn endpoint(&self) -> String {
        let version = self.api_version.trim().trim_matches('/');
        let version = if version.is_empty() {
            DEFAULT_API_VERSION
        } else {
            version
        };
        let model = self.model_id.trim();
        let model = model.strip_prefix("models/").unwrap_or(model);
        let model = if model.is_empty() {
            DEFAULT_MODEL_ID
        } else {
            model
        };
        format!(
            "{}/{version}/models/{model}:generateContent",
            self.effective_host()
        )
    }
}

/// One fully built request. Fields are private so it cannot change after build.
#[derive(Debug, Clone, PartialEq)]
pub struct RequestEnvelope {
    url: String,
    headers: BTreeMap<String, String>,
    body: Value,
}

impl RequestEnvelope {
    pub fn build(connection: &ConnectionSettings, body: Value) -> ClientResult<Self> {
        if !connection.has_credential() {
            return Err(ClientError::MissingCredential);
        }
        let api_key = connection.api_key.trim();
        let endpoint = connection.endpoint();
        let mut url = Url::parse(&endpoint)
            .map_err(|err| ClientError::InvalidHost(format!("{endpoint}: {err}")))?;

        let mut headers = BTreeMap::new();
        headers.insert(
            CONTENT_TYPE_HEADER.to_string(),
            "application/json".to_string(),
        );
        match connection.credential_transport {
            CredentialTransport::Query => {
                url.query_pairs_mut().append_pair("key", api_key);
            }
            CredentialTransport::Header => {
                headers.insert(API_KEY_HEADER.to_string(), api_key.to_string());
            }
        }

        Ok(Self {
            url: url.to_string(),
            headers,
            body,
        })
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    pub fn headers(&self) -> &BTreeMap<String, String> {
        &self.headers
    }

    pub fn body(&self) -> &Value {
        &self.body
    }

    pub fn body_bytes(&self) -> ClientResult<Vec<u8>> {
        Ok(serde_json::to_vec(&self.body)?)
    }

    pub fn pretty_body(&self) -> String {
        serde_json::to_string_pretty(&self.body).unwrap_or_else(|_| "{}".to_string())
    }

    /// sha256 of the compact body; identifies a request in logs without the key.
    pub fn fingerprint(&self) -> String {
        let bytes = serde_json::to_vec(&self.body).unwrap_or_default();
        let mut hasher = Sha256::new();
        hasher.update(bytes);
        hex::encode(hasher.finalize())
    }

    /// Shell-escaped cURL command reproducing this request.
    pub fn to_curl(&self) -> String {
        let compact = serde_json::to_string(&self.body).unwrap_or_else(|_| "{}".to_string());
        let headers = self
            .headers
            .iter()
            .map(|(name, value)| format!("-H {}", shell_words::quote(&format!("{name}: {value}"))))
            .collect::<Vec<String>>();
        let mut lines = vec![
            "curl -s -X POST \\".to_string(),
            format!("  {} \\", shell_words::quote(&self.url)),
        ];
        for header in headers {
            lines.push(format!("  {header} \\"));
        }
        lines.push(format!("  -d {}", shell_words::quote(&compact)));
        lines.join("\n") + "\n"
    }
}
