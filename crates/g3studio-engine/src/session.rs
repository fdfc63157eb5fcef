use std::path::{Path, PathBuf};
use std::sync::Arc;

use g3studio_contracts::journal::{RunEvent, RunJournal};
use g3studio_contracts::presets::{PresetExport, PresetStore, SaveOutcome};
use g3studio_contracts::request::{
    ConnectionSettings, PreviewHost, RequestEnvelope, RequestMode, RequestModel,
};
use g3studio_contracts::response::{ImageWriteFailure, ResponseResult, SavedImage};
use g3studio_contracts::settings::{persist_model, restore_model, ClientSettings};
use g3studio_contracts::store::KeyValueStore;
use g3studio_contracts::ClientResult;

use crate::transport::TransportPolicy;

#[derive(Debug, Clone, Default)]
pub struct RunOptions {
    /// Directory that receives the decoded response images.
    pub out_dir: Option<PathBuf>,
    pub background_retry: bool,
}

#[derive(Debug)]
pub struct RunOutcome {
    pub result: ResponseResult,
    pub written: Vec<SavedImage>,
    /// Images that could not be decoded or written. The rest of the result stands.
    pub image_failures: Vec<ImageWriteFailure>,
    pub model_id: String,
    pub run_id: Option<String>,
}

/// Client state restored from, and written back to, one key-value store.
pub struct Session {
    store: Arc<dyn KeyValueStore>,
    settings: ClientSettings,
    model: RequestModel,
    presets: PresetStore,
    env_api_key: Option<String>,
    journal_path: Option<PathBuf>,
}

impl Session {
    pub fn open(store: Arc<dyn KeyValueStore>, previews: Option<Arc<dyn PreviewHost>>) -> Self {
        let settings = ClientSettings::restore(store.as_ref());
        let mut model = RequestModel::new(previews);
        restore_model(store.as_ref(), &mut model);
        let presets = PresetStore::load(store.clone());
        Self {
            store,
            settings,
            model,
            presets,
            env_api_key: None,
            journal_path: None,
        }
    }

    pub fn with_journal(mut self, path: impl Into<PathBuf>) -> Self {
        self.journal_path = Some(path.into());
        self
    }

    pub fn settings(&self) -> &ClientSettings {
        &self.settings
    }

    pub fn settings_mut(&mut self) -> &mut ClientSettings {
        &mut self.settings
    }

    pub fn save_settings(&self) -> ClientResult<()> {
        self.settings.persist(self.store.as_ref())
    }

    /// Uses `api_key` for this session only when no key is configured. It is
    /// never written to the store.
    pub fn fallback_api_key(&mut self, api_key: Option<String>) {
        self.env_api_key = api_key
            .map(|key| key.trim().to_string())
            .filter(|key| !key.is_empty());
    }

    /// Whether a request can be authenticated, from settings or the fallback key.
    pub fn has_credential(&self) -> bool {
        self.settings.connection.has_credential() || self.env_api_key.is_some()
    }

    pub fn uses_fallback_key(&self) -> bool {
        !self.settings.connection.has_credential() && self.env_api_key.is_some()
    }

    fn effective_connection(&self) -> ConnectionSettings {
        let mut connection = self.settings.connection.clone();
        if !connection.has_credential() {
            if let Some(api_key) = &self.env_api_key {
                connection.api_key = api_key.clone();
            }
        }
        connection
    }

    pub fn model(&self) -> &RequestModel {
        &self.model
    }

    pub fn model_mut(&mut self) -> &mut RequestModel {
        &mut self.model
    }

    pub fn save_model(&self) -> ClientResult<()> {
        persist_model(self.store.as_ref(), &self.model)
    }

    pub fn set_mode(&mut self, mode: RequestMode) -> ClientResult<()> {
        self.model.set_mode(mode);
        self.save_model()
    }

    /// Clears the non-fixed fields and the working set. Host and key are untouched.
    pub fn reset(&mut self) -> ClientResult<()> {
        self.model.reset();
        self.save_model()
    }

    pub fn presets(&self) -> &PresetStore {
        &self.presets
    }

    pub fn save_preset(&mut self, name: &str, confirm_overwrite: bool) -> ClientResult<SaveOutcome> {
        let snapshot = self.model.snapshot();
        self.presets.save(name, &snapshot, confirm_overwrite)
    }

    pub fn update_preset(&mut self, name: &str) -> ClientResult<bool> {
        let snapshot = self.model.snapshot();
        self.presets.update(name, &snapshot)
    }

    pub fn delete_preset(&mut self, name: &str) -> ClientResult<bool> {
        self.presets.delete(name)
    }

    /// Returns false when no preset has that name.
    pub fn apply_preset(&mut self, name: &str) -> ClientResult<bool> {
        let Some(preset) = self.presets.get(name).cloned() else {
            return Ok(false);
        };
        self.model.apply_preset(&preset);
        self.presets.set_active(Some(&preset.name))?;
        self.save_model()?;
        Ok(true)
    }

    pub fn export_presets(&self) -> PresetExport {
        self.presets.export()
    }

    pub fn import_presets(&mut self, text: &str) -> ClientResult<usize> {
        self.presets.import_text(text)
    }

    pub fn envelope(&self) -> ClientResult<RequestEnvelope> {
        self.model.build_envelope(&self.effective_connection())
    }

    pub fn curl(&self) -> ClientResult<String> {
        Ok(self.envelope()?.to_curl())
    }

    /// Persists the current state, sends one request through `transport` and
    /// writes any returned images to `options.out_dir`.
    pub fn run(
        &mut self,
        transport: &mut TransportPolicy,
        options: &RunOptions,
    ) -> ClientResult<RunOutcome> {
        self.save_settings()?;
        self.save_model()?;
        let envelope = self.envelope()?;
        let model_id = self.settings.connection.model_id.clone();

        let journal = self
            .journal_path
            .as_ref()
            .map(|path| RunJournal::new(path, envelope.fingerprint()));
        if let Some(journal) = &journal {
            journal.record(&RunEvent::RunStarted {
                mode: self.model.mode().as_str().to_string(),
                model_id: model_id.clone(),
                image_count: self.model.images().len(),
                background_retry: options.background_retry,
            });
        }

        let visibility = transport.visibility();
        if options.background_retry {
            visibility.mark_hidden();
        }
        let executed = transport.execute_with_journal(&envelope, journal.as_ref());
        if options.background_retry {
            visibility.mark_visible();
        }

        match executed {
            Ok(result) => {
                let saved = match &options.out_dir {
                    Some(dir) => result.write_images(dir),
                    None => Default::default(),
                };
                if let Some(journal) = &journal {
                    journal.record(&RunEvent::RunSucceeded {
                        attempt: attempts_made(transport),
                        latency_ms: result.latency_ms.round() as u64,
                        text_count: result.texts.len(),
                        images: saved
                            .written
                            .iter()
                            .map(|image| file_name_of(&image.path))
                            .collect(),
                        failed_images: saved
                            .failed
                            .iter()
                            .map(|failure| failure.file_name.clone())
                            .collect(),
                    });
                }
                tracing::info!(
                    texts = result.texts.len(),
                    images = result.images.len(),
                    unsaved = saved.failed.len(),
                    latency = %result.latency_display(),
                    "generateContent succeeded"
                );
                Ok(RunOutcome {
                    result,
                    written: saved.written,
                    image_failures: saved.failed,
                    model_id,
                    run_id: journal.as_ref().map(|journal| journal.run_id().to_string()),
                })
            }
            Err(err) => {
                if let Some(journal) = &journal {
                    journal.record(&RunEvent::RunFailed {
                        kind: err.kind().as_str().to_string(),
                        message: err.to_string(),
                    });
                }
                Err(err)
            }
        }
    }
}

fn attempts_made(transport: &TransportPolicy) -> u32 {
    transport
        .last_transitions()
        .iter()
        .filter(|state| **state == crate::transport::TransportState::Sending)
        .count() as u32
}

fn file_name_of(path: &Path) -> String {
    path.file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_default()
}
