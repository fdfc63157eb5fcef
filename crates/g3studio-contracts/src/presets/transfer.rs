use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::Preset;
use crate::error::{ClientError, ClientResult};

pub const EXPORT_VERSION: u64 = 1;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PresetExport {
    pub version: u64,
    pub exported_at: String,
    pub presets: Vec<Preset>,
}

impl PresetExport {
    pub fn new(presets: Vec<Preset>, exported_at: &str) -> Self {
        Self {
            version: EXPORT_VERSION,
            exported_at: exported_at.to_string(),
            presets,
        }
    }

    pub fn to_pretty_json(&self) -> ClientResult<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }
}

pub fn export_file_name(batch_tag: &str) -> String {
    format!("gemini3_presets_{batch_tag}.json")
}

/// Accepts `{presets: [...]}` or a bare array. Entries stay raw for the merge step.
pub fn parse_import_payload(text: &str) -> ClientResult<Vec<Value>> {
    let parsed: Value =
        serde_json::from_str(text).map_err(|err| ClientError::invalid_json(&err))?;
    let entries = match parsed {
        Value::Array(rows) => rows,
        Value::Object(mut wrapper) => match wrapper.remove("presets") {
            Some(Value::Array(rows)) => rows,
            _ => Vec::new(),
        },
        _ => Vec::new(),
    };
    if entries.is_empty() {
        return Err(ClientError::PresetImport("no presets array found".to_string()));
    }
    Ok(entries)
}
