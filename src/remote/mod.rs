//! Remote sources of files to process.
//!
//! A [`RemoteSource`] knows how to enumerate a folder tree and download the
//! files in it. We ship a Google Drive implementation and a local directory
//! implementation, which is also handy for Drive folders synced to disk.

use std::{error, fmt, sync::Arc};

use clap::Args;
use schemars::JsonSchema;

use crate::{prelude::*, rate_limit::RateLimit};

pub mod drive;
pub mod local;

/// MIME type used for PDF files.
pub const PDF_MIME_TYPE: &str = "application/pdf";

/// Image MIME types we can OCR.
pub const IMAGE_MIME_TYPES: &[&str] = &["image/png", "image/jpeg"];

/// A file in a remote folder tree.
#[derive(Clone, Debug, Deserialize, JsonSchema, PartialEq, Eq, Serialize)]
pub struct RemoteItem {
    /// A unique identifier, stable across runs.
    pub id: String,

    /// The names of the folders containing this item, starting below the
    /// source root.
    pub path: Vec<String>,

    /// The file name.
    pub name: String,

    /// The MIME type, if known.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mime_type: Option<String>,
}

impl RemoteItem {
    /// The path and name joined with `/`, for messages.
    pub fn display_path(&self) -> String {
        let mut parts = self.path.clone();
        parts.push(self.name.clone());
        parts.join("/")
    }
}

/// A folder tree we can list and download from.
#[async_trait]
pub trait RemoteSource: Send + Sync + 'static {
    /// List every file below the root whose MIME type is in `mime_types`, in
    /// a stable order.
    async fn list_items(&self, mime_types: &[&str]) -> Result<Vec<RemoteItem>>;

    /// Download the contents of a file.
    async fn fetch(&self, item: &RemoteItem) -> Result<Vec<u8>>;

    /// A URL where an annotation tool can load this item.
    fn item_url(&self, item: &RemoteItem) -> String;
}

/// Options selecting a [`RemoteSource`].
#[derive(Args, Clone, Debug)]
pub struct SourceOpts {
    /// Read from a local directory tree, such as a synced drive folder.
    #[clap(long, conflicts_with = "drive_folder", required_unless_present = "drive_folder")]
    pub local_root: Option<PathBuf>,

    /// Read from a Google Drive folder with this ID. Requires
    /// GOOGLE_DRIVE_ACCESS_TOKEN.
    #[clap(long, env = "DRIVE_FOLDER_ID")]
    pub drive_folder: Option<String>,

    /// Base URL used to build image URLs for local files, for example
    /// "http://localhost:8081". Defaults to `file://` URLs.
    #[clap(long)]
    pub image_url_base: Option<String>,

    /// A rate limit for Drive API requests, of the form "10/s" or "600/m".
    #[clap(long)]
    pub rate_limit: Option<RateLimit>,
}

impl SourceOpts {
    /// Create the selected source. `subfolder`, if given, is a folder name
    /// below the root to use as the actual root.
    pub async fn create_source(&self, subfolder: Option<&str>) -> Result<Arc<dyn RemoteSource>> {
        if let Some(root) = &self.local_root {
            let root = match subfolder {
                Some(subfolder) => root.join(subfolder),
                None => root.to_owned(),
            };
            Ok(Arc::new(local::LocalFolderSource::new(
                root,
                self.image_url_base.clone(),
            )))
        } else if let Some(folder_id) = &self.drive_folder {
            let client = drive::DriveClient::from_env(self.rate_limit.as_ref())?;
            let root_id = match subfolder {
                Some(subfolder) => client.find_folder(folder_id, subfolder).await?,
                None => folder_id.to_owned(),
            };
            Ok(Arc::new(drive::DriveSource::new(client, root_id)))
        } else {
            Err(anyhow!("one of --local-root or --drive-folder is required"))
        }
    }
}

/// A remote service told us to slow down, or was temporarily unavailable,
/// and retrying did not help.
///
/// This is kept distinct from other errors so that operators can lower
/// concurrency and re-run, instead of treating the item as broken.
#[derive(Debug)]
pub struct TransientFailure {
    /// What we were trying to do.
    pub operation: String,

    /// The last HTTP status we saw, if any.
    pub status: Option<u16>,

    /// Details from the remote service.
    pub detail: String,
}

impl TransientFailure {
    /// Create a new transient failure.
    pub fn new(operation: &str, status: Option<u16>, detail: String) -> Self {
        Self {
            operation: operation.to_owned(),
            status,
            detail,
        }
    }
}

impl fmt::Display for TransientFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.status {
            Some(status) => write!(
                f,
                "temporary service failure while {} (HTTP {}): {}",
                self.operation, status, self.detail
            ),
            None => write!(
                f,
                "temporary service failure while {}: {}",
                self.operation, self.detail
            ),
        }
    }
}

impl error::Error for TransientFailure {}

/// Does this error chain contain a [`TransientFailure`]?
pub fn is_transient(err: &anyhow::Error) -> bool {
    err.chain().any(|cause| cause.is::<TransientFailure>())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn transient_failures_survive_context() {
        let err = anyhow::Error::new(TransientFailure::new(
            "downloading a file",
            Some(429),
            "slow down".to_owned(),
        ))
        .context("failed to fetch receipt.pdf");
        assert!(is_transient(&err));
        assert!(!is_transient(&anyhow!("bad PDF")));
    }

    #[test]
    fn display_path_joins_folders() {
        let item = RemoteItem {
            id: "x".to_owned(),
            path: vec!["2024-01".to_owned(), "17".to_owned()],
            name: "scan_p1.png".to_owned(),
            mime_type: None,
        };
        assert_eq!(item.display_path(), "2024-01/17/scan_p1.png");
    }
}
