//! A [`RemoteSource`] backed by a local directory tree.

use std::fs;

use reqwest::Url;

use super::{RemoteItem, RemoteSource};
use crate::{async_utils::spawn_blocking_propagating_panics, prelude::*};

/// Files below a local directory. Item IDs are `/`-separated paths relative
/// to the root, so they stay stable as long as files aren't moved.
pub struct LocalFolderSource {
    /// The directory we enumerate.
    root: PathBuf,

    /// Base URL for [`RemoteSource::item_url`].
    url_base: Option<String>,
}

impl LocalFolderSource {
    /// Create a new local source.
    pub fn new(root: PathBuf, url_base: Option<String>) -> Self {
        Self { root, url_base }
    }

    /// The on-disk path for an item.
    fn local_path(&self, item: &RemoteItem) -> PathBuf {
        let mut path = self.root.clone();
        path.extend(item.path.iter());
        path.push(&item.name);
        path
    }
}

#[async_trait]
impl RemoteSource for LocalFolderSource {
    #[instrument(level = "debug", skip_all, fields(root = %self.root.display()))]
    async fn list_items(&self, mime_types: &[&str]) -> Result<Vec<RemoteItem>> {
        let root = self.root.clone();
        let mime_types = mime_types
            .iter()
            .map(|m| (*m).to_owned())
            .collect::<Vec<_>>();
        spawn_blocking_propagating_panics(move || {
            if !root.is_dir() {
                return Err(anyhow!("source folder {:?} does not exist", root));
            }
            let mut items = vec![];
            walk(&root, &[], &mime_types, &mut items)?;
            Ok(items)
        })
        .await
    }

    async fn fetch(&self, item: &RemoteItem) -> Result<Vec<u8>> {
        let path = self.local_path(item);
        tokio::fs::read(&path)
            .await
            .with_context(|| format!("failed to read {:?}", path.display()))
    }

    fn item_url(&self, item: &RemoteItem) -> String {
        let url = match &self.url_base {
            Some(base) => Url::parse(&format!("{}/", base.trim_end_matches('/')))
                .and_then(|base| base.join(&item.id))
                .ok(),
            None => std::path::absolute(self.local_path(item))
                .ok()
                .and_then(|path| Url::from_file_path(path).ok()),
        };
        url.map(String::from)
            .unwrap_or_else(|| self.local_path(item).display().to_string())
    }
}

/// Recursively collect matching files below `dir`, sorted by name at each
/// level with files before subfolders.
fn walk(
    dir: &Path,
    folders: &[String],
    mime_types: &[String],
    items: &mut Vec<RemoteItem>,
) -> Result<()> {
    let mut entries = fs::read_dir(dir)
        .with_context(|| format!("failed to list {:?}", dir.display()))?
        .map(|entry| {
            entry.with_context(|| format!("failed to read entry in {:?}", dir.display()))
        })
        .collect::<Result<Vec<_>>>()?;
    entries.sort_by_key(|entry| entry.file_name());

    let mut subdirs = vec![];
    for entry in entries {
        let path = entry.path();
        let name = entry.file_name().to_string_lossy().into_owned();
        if name.starts_with('.') {
            continue;
        }
        if path.is_dir() {
            subdirs.push((path, name));
            continue;
        }
        let Some(mime_type) = detect_mime_type(&path) else {
            trace!(path = %path.display(), "skipping file with unknown type");
            continue;
        };
        if !mime_types.iter().any(|m| *m == mime_type) {
            continue;
        }
        let mut id_parts = folders.to_vec();
        id_parts.push(name.clone());
        items.push(RemoteItem {
            id: id_parts.join("/"),
            path: folders.to_vec(),
            name,
            mime_type: Some(mime_type),
        });
    }

    for (path, name) in subdirs {
        let mut child_folders = folders.to_vec();
        child_folders.push(name);
        walk(&path, &child_folders, mime_types, items)?;
    }
    Ok(())
}

/// Sniff a file's MIME type from its contents, falling back to its extension.
fn detect_mime_type(path: &Path) -> Option<String> {
    match infer::get_from_path(path) {
        Ok(Some(kind)) => Some(kind.mime_type().to_owned()),
        _ => mime_guess::from_path(path)
            .first()
            .map(|mime| mime.essence_str().to_owned()),
    }
}
