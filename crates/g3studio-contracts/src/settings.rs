use crate::error::ClientResult;
use crate::request::{
    ConnectionSettings, CredentialTransport, FormFields, RequestMode, RequestModel,
    DEFAULT_API_VERSION, DEFAULT_MODEL_ID,
};
use crate::store::KeyValueStore;

pub mod keys {
    pub const HOST: &str = "g3_host";
    pub const REMEMBER_KEY: &str = "g3_remember_key";
    pub const API_KEY: &str = "g3_api_key";
    pub const USE_HEADER_KEY: &str = "g3_use_header_key";
    pub const MODEL_ID: &str = "g3_model_id";
    pub const API_VERSION: &str = "g3_api_version";

    pub const UI_MODE: &str = "g3_ui_mode";
    pub const REQUEST_BODY_JSON: &str = "g3_request_body_json";

    pub const SYSTEM_PROMPT: &str = "g3_system_prompt";
    pub const PROMPT: &str = "g3_prompt";
    pub const ASPECT_RATIO: &str = "g3_aspect_ratio";
    pub const IMAGE_SIZE: &str = "g3_image_size";
    pub const TEMPERATURE: &str = "g3_temperature";
    pub const TOP_P: &str = "g3_topP";

    pub const PRESETS: &str = "g3_presets_v1";
    pub const ACTIVE_PRESET: &str = "g3_active_preset_name";
}

/// Host-level settings that are never part of a preset.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ClientSettings {
    pub connection: ConnectionSettings,
    pub remember_key: bool,
}

impl ClientSettings {
    pub fn restore(store: &dyn KeyValueStore) -> Self {
        let remember_key = read_flag(store, keys::REMEMBER_KEY);
        let api_key = if remember_key {
            store.get(keys::API_KEY).unwrap_or_default()
        } else {
            String::new()
        };
        let credential_transport = if read_flag(store, keys::USE_HEADER_KEY) {
            CredentialTransport::Header
        } else {
            CredentialTransport::Query
        };
        Self {
            connection: ConnectionSettings {
                host: store.get(keys::HOST).unwrap_or_default(),
                api_key,
                credential_transport,
                model_id: store
                    .get(keys::MODEL_ID)
                    .filter(|value| !value.trim().is_empty())
                    .unwrap_or_else(|| DEFAULT_MODEL_ID.to_string()),
                api_version: store
                    .get(keys::API_VERSION)
                    .filter(|value| !value.trim().is_empty())
                    .unwrap_or_else(|| DEFAULT_API_VERSION.to_string()),
            },
            remember_key,
        }
    }

    /// The key is written only while `remember_key` holds; otherwise it is removed.
    pub fn persist(&self, store: &dyn KeyValueStore) -> ClientResult<()> {
        let connection = &self.connection;
        store.set(keys::HOST, connection.host.trim())?;
        store.set(keys::REMEMBER_KEY, bool_text(self.remember_key))?;
        store.set(
            keys::USE_HEADER_KEY,
            bool_text(connection.credential_transport == CredentialTransport::Header),
        )?;
        store.set(keys::MODEL_ID, connection.model_id.trim())?;
        store.set(keys::API_VERSION, connection.api_version.trim())?;
        if self.remember_key {
            store.set(keys::API_KEY, &connection.api_key)
        } else {
            store.remove(keys::API_KEY)
        }
    }
}

/// Writes mode, JSON text and form fields. Images are never persisted.
pub fn persist_model(store: &dyn KeyValueStore, model: &RequestModel) -> ClientResult<()> {
    let fields = model.fields();
    store.set(keys::UI_MODE, model.mode().as_str())?;
    store.set(keys::REQUEST_BODY_JSON, model.raw_json())?;
    store.set(keys::SYSTEM_PROMPT, &fields.system_prompt)?;
    store.set(keys::PROMPT, &fields.prompt)?;
    store.set(keys::ASPECT_RATIO, &fields.aspect_ratio)?;
    store.set(keys::IMAGE_SIZE, &fields.image_size)?;
    store.set(keys::TEMPERATURE, &fields.temperature)?;
    store.set(keys::TOP_P, &fields.top_p)?;
    Ok(())
}

pub fn restore_model(store: &dyn KeyValueStore, model: &mut RequestModel) {
    let read = |key: &str| store.get(key).unwrap_or_default();
    *model.fields_mut() = FormFields {
        system_prompt: read(keys::SYSTEM_PROMPT),
        prompt: read(keys::PROMPT),
        aspect_ratio: read(keys::ASPECT_RATIO),
        image_size: read(keys::IMAGE_SIZE),
        temperature: read(keys::TEMPERATURE),
        top_p: read(keys::TOP_P),
    };
    model.set_raw_json(read(keys::REQUEST_BODY_JSON));
    model.restore_mode(RequestMode::parse_lenient(&read(keys::UI_MODE)));
}

fn read_flag(store: &dyn KeyValueStore, key: &str) -> bool {
    store.get(key).as_deref() == Some("true")
}

fn bool_text(value: bool) -> &'static str {
    if value {
        "true"
    } else {
        "false"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryStore;

    #[test]
    fn key_is_only_kept_when_remembered() -> anyhow::Result<()> {
        let store = MemoryStore::new();
        let mut settings = ClientSettings::default();
        settings.connection.api_key = "secret".to_string();
        settings.persist(&store)?;
        assert_eq!(store.get(keys::API_KEY), None);
        assert_eq!(ClientSettings::restore(&store).connection.api_key, "");

        settings.remember_key = true;
        settings.persist(&store)?;
        assert_eq!(store.get(keys::API_KEY).as_deref(), Some("secret"));
        assert_eq!(ClientSettings::restore(&store).connection.api_key, "secret");

        settings.remember_key = false;
        settings.persist(&store)?;
        assert_eq!(store.get(keys::API_KEY), None);
        Ok(())
    }

    #[test]
    fn restore_defaults_on_empty_store() {
        let restored = ClientSettings::restore(&MemoryStore::new());
        assert_eq!(restored.connection.host, "");
        assert_eq!(restored.connection.model_id, DEFAULT_MODEL_ID);
        assert_eq!(restored.connection.api_version, DEFAULT_API_VERSION);
        assert_eq!(
            restored.connection.credential_transport,
            CredentialTransport::Query
        );
        assert!(!restored.remember_key);
    }

    #[test]
    fn header_flag_round_trips() -> anyhow::Result<()> {
        let store = MemoryStore::new();
        let mut settings = ClientSettings::default();
        settings.connection.credential_transport = CredentialTransport::Header;
        settings.connection.host = " https://proxy.local/ ".to_string();
        settings.persist(&store)?;
        let restored = ClientSettings::restore(&store);
        assert_eq!(restored.connection.credential_transport, CredentialTransport::Header);
        assert_eq!(restored.connection.host, "https://proxy.local/");
        Ok(())
    }

    #[test]
    fn model_state_round_trips_without_images() -> anyhow::Result<()> {
        let store = MemoryStore::new();
        let mut model = RequestModel::default();
        model.fields_mut().prompt = "fox".to_string();
        model.fields_mut().top_p = "0.95".to_string();
        model.set_mode(RequestMode::Json);
        persist_model(&store, &model)?;

        let mut restored = RequestModel::default();
        restore_model(&store, &mut restored);
        assert_eq!(restored.mode(), RequestMode::Json);
        assert_eq!(restored.fields(), model.fields());
        assert_eq!(restored.raw_json(), model.raw_json());
        Ok(())
    }
}
