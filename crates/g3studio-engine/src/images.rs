use std::path::{Path, PathBuf};
use std::thread;

use g3studio_contracts::codec::sniff_mime;
use g3studio_contracts::request::{ImageAsset, RequestModel};
use g3studio_contracts::{ClientError, ClientResult};

pub fn read_image_file(path: &Path) -> ClientResult<ImageAsset> {
    let name = display_name(path);
    let bytes = std::fs::read(path).map_err(|err| ClientError::ImageRead {
        name: name.clone(),
        reason: err.to_string(),
    })?;
    if bytes.is_empty() {
        return Err(ClientError::ImageRead {
            name,
            reason: "file is empty".to_string(),
        });
    }
    let mime_type = sniff_mime(path, &bytes);
    Ok(ImageAsset::from_bytes(name, mime_type, &bytes))
}

/// Reads every file on its own thread. Results come back in input order and one
/// failed file never affects its siblings.
pub fn read_image_files(paths: &[PathBuf]) -> Vec<ClientResult<ImageAsset>> {
    thread::scope(|scope| {
        let handles: Vec<_> = paths
            .iter()
            .map(|path| scope.spawn(move || read_image_file(path)))
            .collect();
        handles
            .into_iter()
            .zip(paths)
            .map(|(handle, path)| {
                handle.join().unwrap_or_else(|_| {
                    Err(ClientError::ImageRead {
                        name: display_name(path),
                        reason: "reader thread panicked".to_string(),
                    })
                })
            })
            .collect()
    })
}

/// Appends what was read to the working set and returns the per-file failures.
pub fn attach_images(model: &mut RequestModel, paths: &[PathBuf]) -> Vec<ClientError> {
    let mut failures = Vec::new();
    for result in read_image_files(paths) {
        let attached = result.and_then(|asset| {
            let name = asset.name.clone();
            let size = asset.size_bytes;
            model.add_image(asset)?;
            tracing::debug!(%name, size, "attached image");
            Ok(())
        });
        if let Err(err) = attached {
            tracing::warn!("image read failed: {err}");
            failures.push(err);
        }
    }
    failures
}

fn display_name(path: &Path) -> String {
    path.file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_else(|| path.display().to_string())
}
