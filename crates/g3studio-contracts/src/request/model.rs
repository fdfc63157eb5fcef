use std::sync::Arc;

use serde_json::Value;
use similar::TextDiff;

use super::assets::{ImageAsset, PreviewHost, WorkingSet};
use super::body::{project_json, AppliedFields, FormFields, RequestBody};
use super::envelope::{ConnectionSettings, RequestEnvelope};
use super::RequestMode;
use crate::error::{ClientError, ClientResult};

pub const JSON_IMAGE_NAME: &str = "json_image";

/// Form fields, raw JSON text and the image working set behind one request.
#[derive(Debug, Default)]
pub struct RequestModel {
    mode: RequestMode,
    fields: FormFields,
    raw_json: String,
    images: WorkingSet,
}

impl RequestModel {
    pub fn new(previews: Option<Arc<dyn PreviewHost>>) -> Self {
        Self {
            images: WorkingSet::new(previews),
            ..Self::default()
        }
    }

    pub fn mode(&self) -> RequestMode {
        self.mode
    }

    /// Entering json mode regenerates the JSON text from the form.
    pub fn set_mode(&mut self, mode: RequestMode) {
        self.mode = mode;
        if mode == RequestMode::Json {
            self.sync_json_from_form();
        }
    }

    /// Restores a mode without touching the JSON text.
    pub fn restore_mode(&mut self, mode: RequestMode) {
        self.mode = mode;
    }

    pub fn fields(&self) -> &FormFields {
        &self.fields
    }

    pub fn fields_mut(&mut self) -> &mut FormFields {
        &mut self.fields
    }

    pub fn raw_json(&self) -> &str {
        &self.raw_json
    }

    pub fn set_raw_json(&mut self, raw: impl Into<String>) {
        self.raw_json = raw.into();
    }

    pub fn images(&self) -> &WorkingSet {
        &self.images
    }

    pub fn images_mut(&mut self) -> &mut WorkingSet {
        &mut self.images
    }

    pub fn add_image(&mut self, asset: ImageAsset) -> ClientResult<()> {
        self.images.push(asset)
    }

    pub fn build_body_from_form(&self) -> RequestBody {
        RequestBody::from_form(&self.fields, &self.images)
    }

    /// The body the active mode would send, without credential checks.
    pub fn active_body(&self) -> ClientResult<Value> {
        match self.mode {
            RequestMode::Form => Ok(self.build_body_from_form().to_json()),
            RequestMode::Json => {
                let raw = self.raw_json.trim();
                if raw.is_empty() {
                    return Err(ClientError::EmptyJsonBody);
                }
                serde_json::from_str(raw).map_err(|err| ClientError::invalid_json(&err))
            }
        }
    }

    pub fn build_envelope(&self, connection: &ConnectionSettings) -> ClientResult<RequestEnvelope> {
        if !connection.has_credential() {
            return Err(ClientError::MissingCredential);
        }
        RequestEnvelope::build(connection, self.active_body()?)
    }

    pub fn sync_json_from_form(&mut self) {
        self.raw_json = self.build_body_from_form().to_pretty_json();
    }

    /// Pulls what it can out of `raw` into the form. Images are always replaced.
    pub fn apply_json_to_form_best_effort(&mut self, raw: &str) -> ClientResult<AppliedFields> {
        let trimmed = raw.trim();
        if trimmed.is_empty() {
            return Err(ClientError::EmptyJsonBody);
        }
        let value: Value =
            serde_json::from_str(trimmed).map_err(|err| ClientError::invalid_json(&err))?;
        let projection = project_json(&value);
        let mut applied = self.fields.apply_projection(&projection);

        let mut assets = Vec::with_capacity(projection.images.len());
        for image in &projection.images {
            match ImageAsset::from_base64(JSON_IMAGE_NAME, &image.mime_type, &image.data) {
                Ok(asset) => assets.push(asset),
                Err(err) => tracing::warn!("skipping inline image from JSON: {err}"),
            }
        }
        if let Err(err) = self.images.replace_all(assets) {
            tracing::warn!("image rejected while applying JSON: {err}");
        }
        applied.images = self.images.len();
        Ok(applied)
    }

    pub fn apply_own_json_to_form(&mut self) -> ClientResult<AppliedFields> {
        let raw = self.raw_json.clone();
        self.apply_json_to_form_best_effort(&raw)
    }

    pub fn format_json(&mut self) -> ClientResult<()> {
        let raw = self.raw_json.trim();
        if raw.is_empty() {
            return Err(ClientError::EmptyJsonBody);
        }
        let value: Value = serde_json::from_str(raw).map_err(|err| ClientError::invalid_json(&err))?;
        self.raw_json = serde_json::to_string_pretty(&value)?;
        Ok(())
    }

    /// Unified diff from the JSON text to what a form sync would write. Empty when in step.
    pub fn json_drift(&self) -> Vec<String> {
        let projected = self.build_body_from_form().to_pretty_json();
        if projected == self.raw_json {
            return Vec::new();
        }
        let diff = TextDiff::from_lines(self.raw_json.as_str(), projected.as_str());
        diff.unified_diff()
            .header("json", "form")
            .to_string()
            .lines()
            .map(str::to_string)
            .collect()
    }

    /// Clears everything but connection settings, including the images.
    pub fn reset(&mut self) {
        self.fields = FormFields::default();
        self.raw_json.clear();
        self.images.clear();
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use serde_json::json;

    use super::*;
    use crate::request::assets::tests::RecordingPreviews;
    use crate::request::CredentialTransport;

    fn connection(key: &str) -> ConnectionSettings {
        ConnectionSettings {
            host: "https://api.example.com".to_string(),
            api_key: key.to_string(),
            credential_transport: CredentialTransport::Query,
            ..ConnectionSettings::default()
        }
    }

    #[test]
    fn empty_form_builds_expected_envelope() -> anyhow::Result<()> {
        let model = RequestModel::default();
        let envelope = model.build_envelope(&connection("abc"))?;
        assert_eq!(
            envelope.url(),
            "https://api.example.com/v1/models/gemini-3-pro-image-preview:generateContent?key=abc"
        );
        assert_eq!(envelope.body()["contents"][0]["parts"][0], json!({ "text": "" }));
        Ok(())
    }

    #[test]
    fn credential_checked_before_json_body() {
        let mut model = RequestModel::default();
        model.restore_mode(RequestMode::Json);
        assert!(matches!(
            model.build_envelope(&connection("")),
            Err(ClientError::MissingCredential)
        ));
        assert!(matches!(
            model.build_envelope(&connection("k")),
            Err(ClientError::EmptyJsonBody)
        ));
        model.set_raw_json("{ not json");
        match model.build_envelope(&connection("k")) {
            Err(ClientError::InvalidJson(message)) => assert!(message.contains("line 1")),
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn json_mode_sends_raw_text_verbatim() -> anyhow::Result<()> {
        let mut model = RequestModel::default();
        model.fields_mut().prompt = "ignored in json mode".to_string();
        model.restore_mode(RequestMode::Json);
        model.set_raw_json(r#"{"contents":[{"parts":[{"text":"custom"}]}],"extra":true}"#);
        let envelope = model.build_envelope(&connection("k"))?;
        assert_eq!(envelope.body()["extra"], json!(true));
        assert_eq!(envelope.body()["contents"][0]["parts"][0]["text"], json!("custom"));
        Ok(())
    }

    #[test]
    fn sync_is_idempotent() {
        let mut model = RequestModel::default();
        model.fields_mut().prompt = "a lighthouse".to_string();
        model.fields_mut().temperature = "0.7".to_string();
        model.sync_json_from_form();
        let first = model.raw_json().to_string();
        model.sync_json_from_form();
        assert_eq!(first, model.raw_json());
        assert!(model.json_drift().is_empty());
    }

    #[test]
    fn switching_to_json_mode_syncs_text() {
        let mut model = RequestModel::default();
        model.fields_mut().prompt = "hello".to_string();
        model.set_mode(RequestMode::Json);
        assert!(model.raw_json().contains("\"hello\""));
    }

    #[test]
    fn form_json_round_trip_keeps_prompt_and_images() -> anyhow::Result<()> {
        let mut source = RequestModel::default();
        source.fields_mut().prompt = "paint this".to_string();
        source.add_image(ImageAsset::from_bytes("a.png", "image/png", &[1, 2, 3, 4]))?;
        source.add_image(ImageAsset::from_bytes("b.webp", "image/webp", &[9; 70]))?;
        let serialized = source.build_body_from_form().to_pretty_json();

        let mut target = RequestModel::default();
        target.fields_mut().prompt = "old".to_string();
        let applied = target.apply_json_to_form_best_effort(&serialized)?;
        assert!(applied.prompt);
        assert_eq!(applied.images, 2);
        assert_eq!(target.fields().prompt, "paint this");
        assert_eq!(target.images().inline_images(), source.images().inline_images());
        let sizes: Vec<u64> = target.images().iter().map(|asset| asset.size_bytes).collect();
        assert_eq!(sizes, vec![4, 70]);
        Ok(())
    }

    #[test]
    fn apply_without_images_empties_working_set() -> anyhow::Result<()> {
        let previews = Arc::new(RecordingPreviews::default());
        let mut model = RequestModel::new(Some(previews.clone()));
        model.add_image(ImageAsset::from_bytes("x", "image/png", b"x"))?;
        model.fields_mut().aspect_ratio = "3:4".to_string();

        let applied = model.apply_json_to_form_best_effort(r#"{"generationConfig":{}}"#)?;
        assert_eq!(applied.images, 0);
        assert!(model.images().is_empty());
        assert_eq!(model.fields().aspect_ratio, "3:4");
        assert_eq!(previews.released.lock().unwrap().len(), 1);
        Ok(())
    }

    #[test]
    fn apply_parse_failure_mutates_nothing() -> anyhow::Result<()> {
        let mut model = RequestModel::default();
        model.add_image(ImageAsset::from_bytes("x", "image/png", b"x"))?;
        assert!(model.apply_json_to_form_best_effort("[1,").is_err());
        assert_eq!(model.images().len(), 1);
        Ok(())
    }

    #[test]
    fn drift_reports_hand_edits() {
        let mut model = RequestModel::default();
        model.sync_json_from_form();
        model.set_raw_json(model.raw_json().replace("Image", "Text"));
        let drift = model.json_drift();
        assert!(drift.iter().any(|line| line.starts_with("--- json")));
        assert!(drift.iter().any(|line| line.contains("\"Text\"")));
    }

    #[test]
    fn format_json_pretty_prints() -> anyhow::Result<()> {
        let mut model = RequestModel::default();
        model.set_raw_json(r#"{"a":1}"#);
        model.format_json()?;
        assert_eq!(model.raw_json(), "{\n  \"a\": 1\n}");
        Ok(())
    }

    #[test]
    fn reset_keeps_mode_and_clears_everything_else() -> anyhow::Result<()> {
        let mut model = RequestModel::default();
        model.set_mode(RequestMode::Json);
        model.fields_mut().prompt = "p".to_string();
        model.add_image(ImageAsset::from_bytes("x", "image/png", b"x"))?;
        model.reset();
        assert_eq!(model.mode(), RequestMode::Json);
        assert_eq!(model.fields(), &FormFields::default());
        assert!(model.raw_json().is_empty());
        assert!(model.images().is_empty());
        Ok(())
    }
}
