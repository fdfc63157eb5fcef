use std::fmt;
use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::codec::{classify_extension, decode_base64, encode_base64};
use crate::error::{ClientError, ClientResult};

/// Wire form of one image: MIME type plus base64 payload.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InlineImage {
    pub mime_type: String,
    pub data: String,
}

/// Something that can show an image outside the core (a revocable URL, a temp file).
pub trait PreviewHost: Send + Sync {
    fn acquire(&self, name: &str, mime_type: &str, base64_data: &str) -> anyhow::Result<String>;
    fn release(&self, locator: &str);
}

/// Scoped preview resource. Released exactly once, when dropped.
pub struct PreviewHandle {
    locator: String,
    host: Arc<dyn PreviewHost>,
}

impl PreviewHandle {
    pub fn locator(&self) -> &str {
        &self.locator
    }
}

impl Drop for PreviewHandle {
    fn drop(&mut self) {
        self.host.release(&self.locator);
    }
}

impl fmt::Debug for PreviewHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PreviewHandle")
            .field("locator", &self.locator)
            .finish()
    }
}

#[derive(Debug)]
pub struct ImageAsset {
    pub mime_type: String,
    pub size_bytes: u64,
    pub name: String,
    pub base64_data: String,
    preview: Option<PreviewHandle>,
}

impl ImageAsset {
    pub fn from_bytes(name: impl Into<String>, mime_type: impl Into<String>, bytes: &[u8]) -> Self {
        Self {
            mime_type: mime_type.into(),
            size_bytes: bytes.len() as u64,
            name: name.into(),
            base64_data: encode_base64(bytes),
            preview: None,
        }
    }

    /// Size is the decoded length, or the payload length when it does not decode.
    pub fn from_base64(
        name: impl Into<String>,
        mime_type: impl Into<String>,
        base64_data: impl Into<String>,
    ) -> ClientResult<Self> {
        let name = name.into();
        let base64_data = base64_data.into();
        if base64_data.trim().is_empty() {
            return Err(ClientError::ImageRead {
                name,
                reason: "no base64 data".to_string(),
            });
        }
        let size_bytes = decode_base64(&base64_data)
            .map(|bytes| bytes.len() as u64)
            .unwrap_or(base64_data.len() as u64);
        Ok(Self {
            mime_type: mime_type.into(),
            size_bytes,
            name,
            base64_data,
            preview: None,
        })
    }

    pub fn preview(&self) -> Option<&PreviewHandle> {
        self.preview.as_ref()
    }

    pub fn inline(&self) -> InlineImage {
        InlineImage {
            mime_type: self.mime_type.clone(),
            data: self.base64_data.clone(),
        }
    }
}

/// Ordered images attached to the next outgoing request.
#[derive(Default)]
pub struct WorkingSet {
    assets: Vec<ImageAsset>,
    previews: Option<Arc<dyn PreviewHost>>,
}

impl WorkingSet {
    pub fn new(previews: Option<Arc<dyn PreviewHost>>) -> Self {
        Self {
            assets: Vec::new(),
            previews,
        }
    }

    pub fn len(&self) -> usize {
        self.assets.len()
    }

    pub fn is_empty(&self) -> bool {
        self.assets.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &ImageAsset> {
        self.assets.iter()
    }

    pub fn inline_images(&self) -> Vec<InlineImage> {
        self.assets.iter().map(ImageAsset::inline).collect()
    }

    pub fn push(&mut self, mut asset: ImageAsset) -> ClientResult<()> {
        if asset.base64_data.is_empty() {
            return Err(ClientError::ImageRead {
                name: asset.name,
                reason: "no base64 data".to_string(),
            });
        }
        if asset.preview.is_none() {
            if let Some(host) = &self.previews {
                match host.acquire(&asset.name, &asset.mime_type, &asset.base64_data) {
                    Ok(locator) => {
                        asset.preview = Some(PreviewHandle {
                            locator,
                            host: Arc::clone(host),
                        })
                    }
                    Err(err) => {
                        tracing::warn!(name = %asset.name, "preview unavailable: {err:#}");
                    }
                }
            }
        }
        self.assets.push(asset);
        Ok(())
    }

    /// Removes one image; its preview is released before it is handed back.
    pub fn remove_at(&mut self, idx: usize) -> Option<ImageAsset> {
        if idx >= self.assets.len() {
            return None;
        }
        let mut asset = self.assets.remove(idx);
        asset.preview.take();
        Some(asset)
    }

    pub fn clear(&mut self) {
        self.assets.clear();
    }

    /// Swaps the whole set. Old previews are released even if a new asset is rejected.
    pub fn replace_all(&mut self, assets: Vec<ImageAsset>) -> ClientResult<()> {
        self.clear();
        let mut first_err = None;
        for asset in assets {
            if let Err(err) = self.push(asset) {
                first_err.get_or_insert(err);
            }
        }
        match first_err {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }
}

impl fmt::Debug for WorkingSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WorkingSet")
            .field("assets", &self.assets)
            .field("previews", &self.previews.is_some())
            .finish()
    }
}

/// Writes each preview into a directory and deletes it on release.
#[derive(Debug)]
pub struct DirectoryPreviewHost {
    dir: PathBuf,
    counter: AtomicU64,
}

impl DirectoryPreviewHost {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self {
            dir: dir.into(),
            counter: AtomicU64::new(0),
        }
    }
}

impl PreviewHost for DirectoryPreviewHost {
    fn acquire(&self, name: &str, mime_type: &str, base64_data: &str) -> anyhow::Result<String> {
        std::fs::create_dir_all(&self.dir)?;
        let seq = self.counter.fetch_add(1, Ordering::Relaxed) + 1;
        let stem: String = name
            .chars()
            .map(|ch| if ch.is_ascii_alphanumeric() { ch } else { '_' })
            .take(48)
            .collect();
        let path = self.dir.join(format!(
            "preview-{seq:03}-{stem}.{}",
            classify_extension(mime_type)
        ));
        std::fs::write(&path, decode_base64(base64_data)?)?;
        Ok(path.to_string_lossy().to_string())
    }

    fn release(&self, locator: &str) {
        if let Err(err) = std::fs::remove_file(locator) {
            tracing::debug!(locator, "preview release failed: {err}");
        }
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use std::sync::{Arc, Mutex};

    use super::*;

    #[derive(Default)]
    pub(crate) struct RecordingPreviews {
        pub acquired: Mutex<Vec<String>>,
        pub released: Mutex<Vec<String>>,
    }

    impl PreviewHost for RecordingPreviews {
        fn acquire(&self, name: &str, _mime: &str, _data: &str) -> anyhow::Result<String> {
            let mut acquired = self.acquired.lock().unwrap();
            let locator = format!("preview://{}/{name}", acquired.len());
            acquired.push(locator.clone());
            Ok(locator)
        }

        fn release(&self, locator: &str) {
            self.released.lock().unwrap().push(locator.to_string());
        }
    }

    #[test]
    fn rejects_empty_payload() {
        let mut set = WorkingSet::default();
        let err = set
            .push(ImageAsset::from_bytes("empty.png", "image/png", b""))
            .unwrap_err();
        assert!(matches!(err, ClientError::ImageRead { .. }));
        assert!(set.is_empty());
    }

    #[test]
    fn previews_release_on_remove_replace_and_drop() -> anyhow::Result<()> {
        let host = Arc::new(RecordingPreviews::default());
        let mut set = WorkingSet::new(Some(host.clone()));
        set.push(ImageAsset::from_bytes("a", "image/png", b"aaa"))?;
        set.push(ImageAsset::from_bytes("b", "image/png", b"bbb"))?;

        let removed = set.remove_at(0).unwrap();
        assert!(removed.preview().is_none());
        assert_eq!(host.released.lock().unwrap().len(), 1);

        set.replace_all(vec![ImageAsset::from_bytes("c", "image/png", b"ccc")])?;
        assert_eq!(host.released.lock().unwrap().len(), 2);

        drop(set);
        let released = host.released.lock().unwrap().clone();
        let acquired = host.acquired.lock().unwrap().clone();
        assert_eq!(released.len(), 3);
        assert_eq!(acquired, released);
        Ok(())
    }

    #[test]
    fn replace_all_keeps_valid_assets_when_one_is_rejected() {
        let mut set = WorkingSet::default();
        let result = set.replace_all(vec![
            ImageAsset::from_bytes("ok", "image/png", b"x"),
            ImageAsset::from_bytes("bad", "image/png", b""),
        ]);
        assert!(result.is_err());
        assert_eq!(set.len(), 1);
    }

    #[test]
    fn directory_previews_are_deleted_on_release() -> anyhow::Result<()> {
        let temp = tempfile::tempdir()?;
        let host: Arc<dyn PreviewHost> = Arc::new(DirectoryPreviewHost::new(temp.path()));
        let mut set = WorkingSet::new(Some(host));
        set.push(ImageAsset::from_bytes("cat photo", "image/jpeg", b"jpeg-bytes"))?;
        let locator = set.iter().next().unwrap().preview().unwrap().locator().to_string();
        assert!(locator.ends_with(".jpg"));
        assert_eq!(std::fs::read(&locator)?, b"jpeg-bytes".to_vec());

        set.clear();
        assert!(!std::path::Path::new(&locator).exists());
        Ok(())
    }

    #[test]
    fn from_base64_measures_decoded_size() -> anyhow::Result<()> {
        let asset = ImageAsset::from_base64("json_image", "image/png", "aGVsbG8=")?;
        assert_eq!(asset.size_bytes, 5);
        let odd = ImageAsset::from_base64("json_image", "image/png", "not base64!")?;
        assert_eq!(odd.size_bytes, 11);
        Ok(())
    }
}
