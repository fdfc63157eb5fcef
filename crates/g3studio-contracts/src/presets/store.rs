use std::sync::Arc;

use indexmap::IndexMap;
use serde_json::Value;

use super::merge::import_merge;
use super::transfer::{parse_import_payload, PresetExport};
use super::{now_utc_iso, Preset, PresetSnapshot};
use crate::error::{ClientError, ClientResult};
use crate::settings::keys;
use crate::store::KeyValueStore;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SaveOutcome {
    Created,
    Overwritten,
    /// The name exists and the caller has not confirmed an overwrite. Nothing changed.
    NeedsConfirmation,
}

/// Presets keyed by name, in creation order, mirrored to the key-value store.
pub struct PresetStore {
    store: Arc<dyn KeyValueStore>,
    presets: IndexMap<String, Preset>,
}

impl PresetStore {
    /// Unreadable or malformed entries are dropped rather than failing the load.
    pub fn load(store: Arc<dyn KeyValueStore>) -> Self {
        let rows = store
            .get(keys::PRESETS)
            .and_then(|raw| serde_json::from_str::<Vec<Value>>(&raw).ok())
            .unwrap_or_default();
        let mut presets = IndexMap::new();
        for row in rows {
            match serde_json::from_value::<Preset>(row) {
                Ok(preset) if !preset.name.is_empty() => {
                    presets.insert(preset.name.clone(), preset);
                }
                Ok(_) => {}
                Err(err) => tracing::warn!("dropping unreadable stored preset: {err}"),
            }
        }
        Self { store, presets }
    }

    pub fn len(&self) -> usize {
        self.presets.len()
    }

    pub fn is_empty(&self) -> bool {
        self.presets.is_empty()
    }

    pub fn list(&self) -> impl Iterator<Item = &Preset> {
        self.presets.values()
    }

    pub fn names(&self) -> Vec<String> {
        self.presets.keys().cloned().collect()
    }

    pub fn get(&self, name: &str) -> Option<&Preset> {
        self.presets.get(name)
    }

    pub fn active_name(&self) -> Option<String> {
        self.store
            .get(keys::ACTIVE_PRESET)
            .filter(|name| !name.is_empty())
    }

    /// The active preset, if the stored name still refers to one.
    pub fn active(&self) -> Option<&Preset> {
        self.active_name().and_then(|name| self.presets.get(&name))
    }

    pub fn set_active(&self, name: Option<&str>) -> ClientResult<()> {
        match name.filter(|name| !name.is_empty()) {
            Some(name) => self.store.set(keys::ACTIVE_PRESET, name),
            None => self.store.remove(keys::ACTIVE_PRESET),
        }
    }

    pub fn save(
        &mut self,
        name: &str,
        snapshot: &PresetSnapshot,
        confirm_overwrite: bool,
    ) -> ClientResult<SaveOutcome> {
        self.save_at(name, snapshot, confirm_overwrite, &now_utc_iso())
    }

    pub fn save_at(
        &mut self,
        name: &str,
        snapshot: &PresetSnapshot,
        confirm_overwrite: bool,
        now: &str,
    ) -> ClientResult<SaveOutcome> {
        let name = name.trim();
        if name.is_empty() {
            return Err(ClientError::EmptyPresetName);
        }
        let outcome = match self.presets.get_mut(name) {
            Some(_) if !confirm_overwrite => return Ok(SaveOutcome::NeedsConfirmation),
            Some(existing) => {
                replace_contents(existing, snapshot, now);
                SaveOutcome::Overwritten
            }
            None => {
                self.presets
                    .insert(name.to_string(), Preset::from_snapshot(name, snapshot, now));
                SaveOutcome::Created
            }
        };
        self.persist()?;
        self.set_active(Some(name))?;
        Ok(outcome)
    }

    /// Returns false, changing nothing, when `name` is unknown.
    pub fn update(&mut self, name: &str, snapshot: &PresetSnapshot) -> ClientResult<bool> {
        self.update_at(name, snapshot, &now_utc_iso())
    }

    pub fn update_at(
        &mut self,
        name: &str,
        snapshot: &PresetSnapshot,
        now: &str,
    ) -> ClientResult<bool> {
        let Some(existing) = self.presets.get_mut(name) else {
            return Ok(false);
        };
        replace_contents(existing, snapshot, now);
        self.persist()?;
        self.set_active(Some(name))?;
        Ok(true)
    }

    pub fn delete(&mut self, name: &str) -> ClientResult<bool> {
        let removed = self.presets.shift_remove(name).is_some();
        if removed {
            self.persist()?;
        }
        if self.active_name().as_deref() == Some(name) {
            self.set_active(None)?;
        }
        Ok(removed)
    }

    pub fn export(&self) -> PresetExport {
        PresetExport::new(self.presets.values().cloned().collect(), &now_utc_iso())
    }

    /// Parses an export file (or bare array) and merges it in. Returns how many were added.
    pub fn import_text(&mut self, text: &str) -> ClientResult<usize> {
        let incoming = parse_import_payload(text)?;
        let existing: Vec<Preset> = self.presets.values().cloned().collect();
        let outcome = import_merge(&existing, &incoming, &now_utc_iso());
        if outcome.added_count == 0 {
            return Ok(0);
        }
        self.presets = outcome
            .merged
            .into_iter()
            .map(|preset| (preset.name.clone(), preset))
            .collect();
        self.persist()?;
        tracing::info!(added = outcome.added_count, "imported presets");
        Ok(outcome.added_count)
    }

    fn persist(&self) -> ClientResult<()> {
        let rows: Vec<&Preset> = self.presets.values().collect();
        self.store.set(keys::PRESETS, &serde_json::to_string(&rows)?)
    }
}

fn replace_contents(existing: &mut Preset, snapshot: &PresetSnapshot, now: &str) {
    existing.mode = snapshot.mode;
    existing.fields = snapshot.fields.clone();
    existing.request_body_json = snapshot.raw_json.clone();
    existing.updated_at = now.to_string();
}
