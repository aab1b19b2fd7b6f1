//! I/O utilities.
//!
//! This module is responsible for reading JSON and TOML files, and for
//! writing JSON files in a way that never leaves a half-written file behind.
//! Checkpoints are rewritten many times during a long run, and a crash in
//! the middle of one of those writes must leave the previous version intact.

use std::io::{BufWriter, Write as _};

use serde::{Serialize, de::DeserializeOwned};
use tokio::{
    fs::{self, File},
    io::AsyncWrite,
};

use super::spawn_blocking_propagating_panics;
use crate::prelude::*;

/// Read TOML or JSON from a file. Files ending in `.json` are parsed as JSON,
/// everything else as TOML.
pub async fn read_json_or_toml<T>(path: &Path) -> Result<T>
where
    T: DeserializeOwned,
{
    let data = fs::read_to_string(path)
        .await
        .with_context(|| format!("Failed to read file at path: {:?}", path))?;
    if path.extension().unwrap_or_default() == "json" {
        serde_json::from_str(&data).with_context(|| {
            format!("Failed to parse JSON from file at path: {:?}", path)
        })
    } else {
        toml::from_str(&data).with_context(|| {
            format!("Failed to parse TOML from file at path: {:?}", path)
        })
    }
}

/// Read JSON from a file, returning `None` if the file does not exist.
///
/// Any other failure, including a file which exists but cannot be parsed, is
/// an error. We never silently replace a corrupt file with an empty value.
pub async fn read_json_if_exists<T>(path: &Path) -> Result<Option<T>>
where
    T: DeserializeOwned,
{
    let data = match fs::read(path).await {
        Ok(data) => data,
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(None),
        Err(err) => {
            return Err(err)
                .with_context(|| format!("Failed to read file at path: {:?}", path));
        }
    };
    let value = serde_json::from_slice(&data)
        .with_context(|| format!("Failed to parse JSON from file at path: {:?}", path))?;
    Ok(Some(value))
}

/// Write `value` as pretty-printed JSON to `path`, atomically.
///
/// We write to a temporary file in the same directory and rename it over the
/// destination, so readers see either the old contents or the new contents.
#[instrument(level = "debug", skip_all, fields(path = %path.display()))]
pub async fn write_json_atomic<T>(path: &Path, value: &T) -> Result<()>
where
    T: Serialize + ?Sized,
{
    // Serialize up front, so the blocking task doesn't need to borrow `value`.
    let json = serde_json::to_vec_pretty(value)
        .with_context(|| format!("Failed to serialize JSON for {:?}", path))?;
    let path = path.to_owned();
    spawn_blocking_propagating_panics(move || -> Result<()> {
        let dir = match path.parent() {
            Some(dir) if !dir.as_os_str().is_empty() => dir.to_owned(),
            _ => PathBuf::from("."),
        };
        std::fs::create_dir_all(&dir)
            .with_context(|| format!("Failed to create directory {:?}", dir))?;
        let tmp = tempfile::NamedTempFile::new_in(&dir)
            .with_context(|| format!("Failed to create temporary file in {:?}", dir))?;
        {
            let mut wtr = BufWriter::new(tmp.as_file());
            wtr.write_all(&json)
                .and_then(|()| wtr.write_all(b"\n"))
                .and_then(|()| wtr.flush())
                .with_context(|| format!("Failed to write temporary file for {:?}", path))?;
        }
        tmp.as_file()
            .sync_all()
            .with_context(|| format!("Failed to sync temporary file for {:?}", path))?;
        tmp.persist(&path)
            .with_context(|| format!("Failed to replace {:?}", path))?;
        Ok(())
    })
    .await
}

/// Create an [`AsyncWrite`] for a file or stdout.
pub async fn create_writer(
    path: Option<&Path>,
) -> Result<Box<dyn AsyncWrite + Unpin + Send + Sync + 'static>> {
    match path {
        Some(path) => {
            let file = File::create(path)
                .await
                .with_context(|| format!("Failed to create file at path: {:?}", path))?;
            Ok(Box::new(file))
        }
        None => Ok(Box::new(tokio::io::stdout())),
    }
}
