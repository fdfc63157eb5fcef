mod merge;
mod store;
mod transfer;

use chrono::{SecondsFormat, Utc};
use serde::{Deserialize, Serialize};

use crate::request::{FormFields, RequestMode, RequestModel};

pub use merge::{import_merge, ImportOutcome, IMPORT_SUFFIX_CLOSE, IMPORT_SUFFIX_OPEN};
pub use store::{PresetStore, SaveOutcome};
pub use transfer::{export_file_name, parse_import_payload, PresetExport, EXPORT_VERSION};

/// Named, image-free and credential-free configuration snapshot.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Preset {
    pub name: String,
    pub created_at: String,
    pub updated_at: String,
    #[serde(default)]
    pub mode: RequestMode,
    #[serde(default)]
    pub fields: FormFields,
    #[serde(default, alias = "rawJsonText")]
    pub request_body_json: String,
}

/// The part of the client state a preset captures.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PresetSnapshot {
    pub mode: RequestMode,
    pub fields: FormFields,
    pub raw_json: String,
}

impl Preset {
    pub fn from_snapshot(name: &str, snapshot: &PresetSnapshot, now: &str) -> Self {
        Self {
            name: name.to_string(),
            created_at: now.to_string(),
            updated_at: now.to_string(),
            mode: snapshot.mode,
            fields: snapshot.fields.clone(),
            request_body_json: snapshot.raw_json.clone(),
        }
    }
}

impl RequestModel {
    pub fn snapshot(&self) -> PresetSnapshot {
        PresetSnapshot {
            mode: self.mode(),
            fields: self.fields().clone(),
            raw_json: self.raw_json().to_string(),
        }
    }

    /// Overwrites mode and fields, and the JSON text when the preset carries one.
    /// Images are kept.
    pub fn apply_preset(&mut self, preset: &Preset) {
        self.restore_mode(preset.mode);
        *self.fields_mut() = preset.fields.clone();
        if !preset.request_body_json.is_empty() {
            self.set_raw_json(preset.request_body_json.clone());
        }
    }
}

pub fn now_utc_iso() -> String {
    Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::request::ImageAsset;

    #[test]
    fn apply_preset_keeps_images_and_overwrites_fields() -> anyhow::Result<()> {
        let mut model = RequestModel::default();
        model.add_image(ImageAsset::from_bytes("x", "image/png", b"x"))?;
        model.fields_mut().prompt = "before".to_string();
        let preset = Preset {
            name: "night".to_string(),
            created_at: now_utc_iso(),
            updated_at: now_utc_iso(),
            mode: RequestMode::Json,
            fields: FormFields {
                prompt: "after".to_string(),
                ..FormFields::default()
            },
            request_body_json: "{\"contents\":[]}".to_string(),
        };
        model.apply_preset(&preset);
        assert_eq!(model.mode(), RequestMode::Json);
        assert_eq!(model.fields().prompt, "after");
        assert_eq!(model.raw_json(), "{\"contents\":[]}");
        assert_eq!(model.images().len(), 1);
        Ok(())
    }

    #[test]
    fn snapshot_carries_no_images() -> anyhow::Result<()> {
        let mut model = RequestModel::default();
        model.add_image(ImageAsset::from_bytes("x", "image/png", b"x"))?;
        model.fields_mut().top_p = "0.9".to_string();
        let preset = Preset::from_snapshot("p", &model.snapshot(), "2026-01-01T00:00:00.000Z");
        let encoded = serde_json::to_string(&preset)?;
        assert!(!encoded.contains("inline_data"));
        assert!(encoded.contains("\"topP\":\"0.9\""));
        assert!(encoded.contains("\"requestBodyJson\""));
        Ok(())
    }
}
