//! Render PDF pages to images with Poppler's `pdftocairo`.

use std::{fmt, str::FromStr, sync::LazyLock};

use chrono::{DateTime, Utc};
use regex::Regex;
use schemars::JsonSchema;
use sha2::{Digest, Sha256};
use tokio::{fs, process::Command};

use super::ProcessOptions;
use crate::{
    async_utils::check_for_command_failure,
    cpu_limit::with_cpu_semaphore,
    engine::ItemProcessor,
    prelude::*,
    remote::{PDF_MIME_TYPE, RemoteItem, drive::DriveUploader},
};

/// The longest sanitized file stem we produce.
const MAX_STEM_CHARS: usize = 100;

/// Hex digits of the item ID hash appended to each PDF's page folder.
const ID_TAG_CHARS: usize = 8;

static ERROR_REGEX: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)error").expect("built-in regex should be valid"));

/// Damaged cross-reference tables are common in scanned receipts, and
/// `pdftocairo` recovers from them.
static DOWNGRADE_TO_WARNING_REGEX: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)error: xref num").expect("built-in regex should be valid")
});

fn is_error_line(line: &str) -> bool {
    ERROR_REGEX.is_match(line) && !DOWNGRADE_TO_WARNING_REGEX.is_match(line)
}

/// Output image formats.
#[derive(Clone, Copy, Debug, Deserialize, JsonSchema, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ImageFormat {
    Png,
    Jpeg,
}

impl ImageFormat {
    fn pdftocairo_flag(self) -> &'static str {
        match self {
            ImageFormat::Png => "-png",
            ImageFormat::Jpeg => "-jpeg",
        }
    }

    fn extension(self) -> &'static str {
        match self {
            ImageFormat::Png => "png",
            ImageFormat::Jpeg => "jpg",
        }
    }

    fn mime_type(self) -> &'static str {
        match self {
            ImageFormat::Png => "image/png",
            ImageFormat::Jpeg => "image/jpeg",
        }
    }
}

impl fmt::Display for ImageFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ImageFormat::Png => write!(f, "png"),
            ImageFormat::Jpeg => write!(f, "jpeg"),
        }
    }
}

impl FromStr for ImageFormat {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "png" => Ok(ImageFormat::Png),
            "jpeg" | "jpg" => Ok(ImageFormat::Jpeg),
            _ => Err(anyhow!("unsupported image format {:?}", s)),
        }
    }
}

/// A rendered page.
#[derive(Clone, Debug, Deserialize, JsonSchema, Serialize)]
pub struct RenderedPage {
    /// 1-based page number.
    pub page: usize,

    /// The image file name, `<stem>_p<N>.<ext>`.
    pub name: String,

    /// Where we stored the image: a local path, or a Drive file ID.
    pub location: String,
}

/// Where a PDF's page images were stored.
#[derive(Clone, Debug, Deserialize, JsonSchema, PartialEq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum PageFolder {
    /// A local directory.
    Local { dir: PathBuf },
    /// A Drive folder.
    Drive { folder_id: String },
}

/// The dataset record for a rasterized PDF.
#[derive(Clone, Debug, Deserialize, JsonSchema, Serialize)]
pub struct PageManifest {
    /// The PDF's file name.
    pub source_name: String,

    /// The folders containing the PDF.
    pub folders: Vec<String>,

    /// The folder path of the page images, below the output root.
    pub output_path: Vec<String>,

    /// The folder holding this PDF's page images.
    pub output: PageFolder,

    /// Rendered pages, in page order.
    pub pages: Vec<RenderedPage>,

    /// Rendering resolution.
    pub dpi: u32,

    /// Image format.
    pub format: ImageFormat,

    /// Bookkeeping.
    pub meta: ManifestMeta,
}

/// Bookkeeping for a [`PageManifest`].
#[derive(Clone, Debug, Deserialize, JsonSchema, Serialize)]
pub struct ManifestMeta {
    /// The remote item ID of the PDF.
    pub source_id: String,

    /// When the pages were rendered.
    pub rendered_at: DateTime<Utc>,
}

/// Where to store page images.
pub enum PageOutput {
    /// Below a local directory.
    Local(PathBuf),
    /// Below a Drive folder.
    Drive(DriveUploader),
}

/// Renders each page of a PDF to
/// `<output>/<folders...>/<stem>_<id tag>/<stem>_p<N>.<ext>`.
///
/// The ID tag is derived from the item ID, so PDFs whose names sanitize to
/// the same stem never share a folder, and re-processing a PDF replaces its
/// own pages.
pub struct Rasterizer {
    output: PageOutput,
    dpi: u32,
    format: ImageFormat,
}

impl Rasterizer {
    /// Create a rasterizer. Reads the `dpi` (default 150) and `format`
    /// (default `png`) options.
    pub fn new(output: PageOutput, opts: &ProcessOptions) -> Result<Self> {
        let dpi = opts.get_or("dpi", 150u32)?;
        if !(10..=2400).contains(&dpi) {
            return Err(anyhow!("dpi must be between 10 and 2400, got {}", dpi));
        }
        Ok(Self {
            output,
            dpi,
            format: opts.get_or("format", ImageFormat::Png)?,
        })
    }

    /// Store rendered pages from `rendered`, returning the folder we used
    /// and the stored pages. Fails unless every page was stored.
    async fn store_pages(
        &self,
        output_path: &[String],
        stem: &str,
        rendered: Vec<(usize, PathBuf)>,
    ) -> Result<(PageFolder, Vec<RenderedPage>)> {
        let page_name =
            |page: usize| format!("{stem}_p{page}.{}", self.format.extension());
        let mut pages = Vec::with_capacity(rendered.len());
        match &self.output {
            PageOutput::Local(root) => {
                let mut dir = root.clone();
                dir.extend(output_path);
                fs::create_dir_all(&dir)
                    .await
                    .with_context(|| format!("cannot create {:?}", dir))?;
                for (page, tmp_path) in rendered {
                    let name = page_name(page);
                    let path = dir.join(&name);
                    // Copy, because the temporary directory may be on another device.
                    fs::copy(&tmp_path, &path)
                        .await
                        .with_context(|| format!("cannot write page image {:?}", path))?;
                    pages.push(RenderedPage {
                        page,
                        name,
                        location: path.display().to_string(),
                    });
                }
                Ok((PageFolder::Local { dir }, pages))
            }
            PageOutput::Drive(uploader) => {
                let folder_id = uploader.folder(output_path).await?;
                for (page, tmp_path) in rendered {
                    let name = page_name(page);
                    let content = fs::read(&tmp_path)
                        .await
                        .with_context(|| format!("cannot read page image {:?}", tmp_path))?;
                    let file_id = uploader
                        .upload(&folder_id, &name, self.format.mime_type(), content)
                        .await?;
                    pages.push(RenderedPage {
                        page,
                        name,
                        location: file_id,
                    });
                }
                Ok((PageFolder::Drive { folder_id }, pages))
            }
        }
    }
}

#[async_trait]
impl ItemProcessor for Rasterizer {
    fn mime_types(&self) -> &'static [&'static str] {
        &[PDF_MIME_TYPE]
    }

    #[instrument(level = "debug", skip_all, fields(id = %item.id, dpi = self.dpi))]
    async fn process(&self, item: &RemoteItem, content: Vec<u8>) -> Result<Value> {
        let tmpdir = tempfile::TempDir::with_prefix("rasterize")?;
        let input_path = tmpdir.path().join("input.pdf");
        fs::write(&input_path, &content)
            .await
            .context("cannot write PDF to temporary file")?;

        // `pdftocairo` appends `-N.png` to this prefix, zero-padding N to the
        // width of the page count.
        let out_prefix = tmpdir.path().join("page");
        let output = with_cpu_semaphore(|| async {
            Command::new("pdftocairo")
                .arg(self.format.pdftocairo_flag())
                .arg("-r")
                .arg(self.dpi.to_string())
                .arg(&input_path)
                .arg(&out_prefix)
                .output()
                .await
                .with_context(|| format!("failed to run pdftocairo on {}", item.name))
        })
        .await?;
        check_for_command_failure("pdftocairo", &output, Some(&is_error_line))?;

        let rendered = rendered_pages(tmpdir.path(), self.format.extension()).await?;
        if rendered.is_empty() {
            return Err(anyhow!("pdftocairo rendered no pages for {}", item.name));
        }

        let stem = sanitize_stem(&item.name);
        let output_path = page_folder_path(item, &stem);
        let (output, pages) = self.store_pages(&output_path, &stem, rendered).await?;
        debug!(pages = pages.len(), output = ?output, "Rendered PDF");

        let manifest = PageManifest {
            source_name: item.name.clone(),
            folders: item.path.clone(),
            output_path,
            output,
            pages,
            dpi: self.dpi,
            format: self.format,
            meta: ManifestMeta {
                source_id: item.id.clone(),
                rendered_at: Utc::now(),
            },
        };
        Ok(serde_json::to_value(manifest)?)
    }
}

/// The folder path, below the output root, for a PDF's pages: the PDF's
/// sanitized folders, then `<stem>_<id tag>`.
fn page_folder_path(item: &RemoteItem, stem: &str) -> Vec<String> {
    let mut path = item
        .path
        .iter()
        .map(|folder| sanitize_stem(folder))
        .collect::<Vec<_>>();
    path.push(format!("{stem}_{}", id_tag(&item.id)));
    path
}

/// A short tag that is stable for a given item ID.
fn id_tag(id: &str) -> String {
    let mut tag = format!("{:x}", Sha256::digest(id.as_bytes()));
    tag.truncate(ID_TAG_CHARS);
    tag
}

/// Find `page-N.<ext>` files in `dir`, sorted by page number.
async fn rendered_pages(dir: &Path, ext: &str) -> Result<Vec<(usize, PathBuf)>> {
    let mut pages = vec![];
    let mut entries = fs::read_dir(dir)
        .await
        .with_context(|| format!("cannot read {:?}", dir))?;
    while let Some(entry) = entries.next_entry().await? {
        let path = entry.path();
        if path.extension().and_then(|e| e.to_str()) != Some(ext) {
            continue;
        }
        let page = path
            .file_stem()
            .and_then(|s| s.to_str())
            .and_then(|s| s.strip_prefix("page-"))
            .and_then(|n| n.parse::<usize>().ok());
        if let Some(page) = page {
            pages.push((page, path));
        }
    }
    pages.sort_by_key(|(page, _)| *page);
    Ok(pages)
}

/// Turn a file or folder name into a safe path component: drop any `.pdf`
/// extension, keep only letters, digits, spaces, `-` and `_`, and truncate.
pub fn sanitize_stem(name: &str) -> String {
    let stem = match name.rsplit_once('.') {
        Some((stem, ext)) if ext.eq_ignore_ascii_case("pdf") => stem,
        _ => name,
    };
    let clean = stem
        .chars()
        .filter(|c| c.is_alphanumeric() || matches!(c, ' ' | '-' | '_'))
        .take(MAX_STEM_CHARS)
        .collect::<String>();
    let clean = clean.trim();
    if clean.is_empty() {
        "document".to_owned()
    } else {
        clean.to_owned()
    }
}
