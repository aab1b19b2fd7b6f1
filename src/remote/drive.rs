//! A [`RemoteSource`] backed by the Google Drive v3 REST API.
//!
//! Getting an OAuth access token is somebody else's job. We expect one in
//! `GOOGLE_DRIVE_ACCESS_TOKEN`, for example from
//! `gcloud auth print-access-token`.

use std::{collections::HashMap, env, sync::Arc};

use keen_retry::{ExponentialJitter, ResolvedResult};
use leaky_bucket::RateLimiter;
use reqwest::{Client, RequestBuilder, StatusCode, Url, header::CONTENT_TYPE};
use serde_json::json;
use tokio::sync::Mutex;
use uuid::Uuid;

use super::{RemoteItem, RemoteSource, TransientFailure};
use crate::{
    prelude::*,
    rate_limit::RateLimit,
    retry::{
        AttemptResult, IsKnownTransient as _, retry_result_fatal, retry_result_ok,
        retry_result_transient,
    },
};

/// The public Drive API endpoint.
const DEFAULT_API_BASE: &str = "https://www.googleapis.com/drive/v3";

/// MIME type Drive uses for folders.
const FOLDER_MIME_TYPE: &str = "application/vnd.google-apps.folder";

/// How many files to request per listing page.
const PAGE_SIZE: &str = "100";

/// A thin Drive API client, shared by every worker.
#[derive(Clone)]
pub struct DriveClient {
    /// HTTP client. Cheap to clone, and pools connections internally.
    http: Client,

    /// OAuth bearer token.
    token: String,

    /// API base URL, without a trailing slash.
    api_base: String,

    /// Base URL for uploading file contents.
    upload_base: String,

    /// Optional client-side rate limiter.
    rate_limiter: Option<Arc<RateLimiter>>,

    /// Use millisecond backoffs. Only for tests.
    fast_retries: bool,
}

impl DriveClient {
    /// Create a client from `GOOGLE_DRIVE_ACCESS_TOKEN`, and optionally
    /// `GOOGLE_DRIVE_API_BASE`.
    pub fn from_env(rate_limit: Option<&RateLimit>) -> Result<Self> {
        let token = env::var("GOOGLE_DRIVE_ACCESS_TOKEN")
            .context("GOOGLE_DRIVE_ACCESS_TOKEN must be set to use Google Drive")?;
        let api_base =
            env::var("GOOGLE_DRIVE_API_BASE").unwrap_or_else(|_| DEFAULT_API_BASE.to_owned());
        Self::new(token, api_base, rate_limit)
    }

    /// Create a client with an explicit token and API base.
    pub fn new(token: String, api_base: String, rate_limit: Option<&RateLimit>) -> Result<Self> {
        let http = Client::builder()
            .user_agent(concat!(env!("CARGO_PKG_NAME"), "/", env!("CARGO_PKG_VERSION")))
            .build()
            .context("could not create HTTP client")?;
        let api_base = api_base.trim_end_matches('/').to_owned();
        Ok(Self {
            http,
            token,
            upload_base: upload_base_for(&api_base),
            api_base,
            rate_limiter: rate_limit.map(|limit| Arc::new(limit.to_rate_limiter())),
            fast_retries: false,
        })
    }

    /// Find a folder named `name` directly inside `parent_id`.
    #[instrument(level = "debug", skip(self))]
    pub async fn find_folder(&self, parent_id: &str, name: &str) -> Result<String> {
        self.find_child(parent_id, name, ChildKind::Folder)
            .await?
            .ok_or_else(|| anyhow!("no folder named {:?} inside Drive folder {}", name, parent_id))
    }

    /// Look up a folder or file named `name` directly inside `parent_id`.
    async fn find_child(
        &self,
        parent_id: &str,
        name: &str,
        kind: ChildKind,
    ) -> Result<Option<String>> {
        let type_test = match kind {
            ChildKind::Folder => "=",
            ChildKind::File => "!=",
        };
        let query = format!(
            "name='{}' and '{}' in parents and mimeType{}'{}' and trashed=false",
            escape_query(name),
            escape_query(parent_id),
            type_test,
            FOLDER_MIME_TYPE,
        );
        let files = self.list_files(&query).await?;
        Ok(files.into_iter().next().map(|file| file.id))
    }

    /// Create a folder named `name` inside `parent_id`.
    #[instrument(level = "debug", skip(self))]
    async fn create_folder(&self, parent_id: &str, name: &str) -> Result<String> {
        let url = Url::parse_with_params(&format!("{}/files", self.api_base), &[("fields", "id")])
            .context("could not build Drive folder URL")?;
        let metadata = json!({
            "name": name,
            "mimeType": FOLDER_MIME_TYPE,
            "parents": [parent_id],
        });
        let response = self
            .send_with_retries("creating a folder", || {
                self.http.post(url.clone()).json(&metadata)
            })
            .await?;
        let created = response
            .json::<CreatedFile>()
            .await
            .context("could not parse Drive folder creation response")?;
        debug!(id = %created.id, "Created Drive folder");
        Ok(created.id)
    }

    /// Store `content` as `name` inside `parent_id`, replacing the contents
    /// of any existing file with that name. Returns the file ID.
    #[instrument(level = "debug", skip(self, content), fields(bytes = content.len()))]
    async fn upload_file(
        &self,
        parent_id: &str,
        name: &str,
        mime_type: &str,
        content: Vec<u8>,
    ) -> Result<String> {
        let response = match self.find_child(parent_id, name, ChildKind::File).await? {
            Some(file_id) => {
                let url = Url::parse_with_params(
                    &format!("{}/files/{}", self.upload_base, file_id),
                    &[("uploadType", "media"), ("fields", "id")],
                )
                .context("could not build Drive upload URL")?;
                self.send_with_retries("replacing a file", || {
                    self.http
                        .patch(url.clone())
                        .header(CONTENT_TYPE, mime_type)
                        .body(content.clone())
                })
                .await?
            }
            None => {
                let url = Url::parse_with_params(
                    &format!("{}/files", self.upload_base),
                    &[("uploadType", "multipart"), ("fields", "id")],
                )
                .context("could not build Drive upload URL")?;
                let metadata = json!({ "name": name, "parents": [parent_id] });
                let boundary = format!("ocr-harvest-{}", Uuid::new_v4().simple());
                let body = multipart_related_body(&boundary, &metadata, mime_type, &content);
                let content_type = format!("multipart/related; boundary={boundary}");
                self.send_with_retries("uploading a file", || {
                    self.http
                        .post(url.clone())
                        .header(CONTENT_TYPE, content_type.as_str())
                        .body(body.clone())
                })
                .await?
            }
        };
        let uploaded = response
            .json::<CreatedFile>()
            .await
            .context("could not parse Drive upload response")?;
        Ok(uploaded.id)
    }

    /// Run a `files.list` query, following every page.
    async fn list_files(&self, query: &str) -> Result<Vec<DriveFile>> {
        let mut files = vec![];
        let mut page_token: Option<String> = None;
        loop {
            let mut params = vec![
                ("q", query.to_owned()),
                ("fields", "nextPageToken, files(id, name, mimeType)".to_owned()),
                ("orderBy", "name".to_owned()),
                ("pageSize", PAGE_SIZE.to_owned()),
            ];
            if let Some(token) = &page_token {
                params.push(("pageToken", token.clone()));
            }
            let url = Url::parse_with_params(&format!("{}/files", self.api_base), &params)
                .context("could not build Drive listing URL")?;
            let response = self
                .send_with_retries("listing files", || self.http.get(url.clone()))
                .await?;
            let page = response
                .json::<FileList>()
                .await
                .context("could not parse Drive listing response")?;
            files.extend(page.files);
            match page.next_page_token {
                Some(token) if !token.is_empty() => page_token = Some(token),
                _ => return Ok(files),
            }
        }
    }

    /// Download a file's contents.
    async fn download(&self, file_id: &str) -> Result<Vec<u8>> {
        let url = Url::parse_with_params(
            &format!("{}/files/{}", self.api_base, file_id),
            &[("alt", "media")],
        )
        .context("could not build Drive download URL")?;
        let response = self
            .send_with_retries("downloading a file", || self.http.get(url.clone()))
            .await?;
        let bytes = response
            .bytes()
            .await
            .context("connection dropped while downloading from Drive")?;
        Ok(bytes.to_vec())
    }

    /// Send the request built by `build`, retrying transient failures with
    /// exponential backoff. `build` is called once per attempt.
    #[instrument(level = "debug", skip(self, build))]
    async fn send_with_retries<F>(&self, operation: &str, build: F) -> Result<reqwest::Response>
    where
        F: Fn() -> RequestBuilder + Sync,
    {
        let jitter = if self.fast_retries {
            ExponentialJitter::FromBackoffRange {
                backoff_range_millis: 1..=20,
                re_attempts: 3,
                jitter_ratio: 0.2,
            }
        } else {
            ExponentialJitter::FromBackoffRange {
                backoff_range_millis: 1_000..=16_000,
                re_attempts: 3,
                jitter_ratio: 0.2,
            }
        };
        let result = self
            .send_once(operation, &build)
            .await
            .retry_with_async(|_| async { self.send_once(operation, &build).await })
            .with_exponential_jitter(|| jitter)
            .await
            .inspect_recovered(|_, _, retry_errors_list| {
                debug!(
                    "{operation} succeeded after retrying {} times (failed attempts: [{}])",
                    retry_errors_list.len(),
                    keen_retry::loggable_retry_errors(retry_errors_list)
                )
            })
            .inspect_given_up(|_, retry_errors_list, fatal_error| {
                warn!(
                    "{operation} gave up after {} retries: {fatal_error:#}",
                    retry_errors_list.len(),
                )
            });
        match result {
            ResolvedResult::Ok { output, .. } | ResolvedResult::Recovered { output, .. } => {
                Ok(output)
            }
            ResolvedResult::Fatal { error, .. } => Err(error),
            ResolvedResult::GivenUp { fatal_error, .. }
            | ResolvedResult::Unrecoverable { fatal_error, .. } => Err(fatal_error),
        }
    }

    /// Make a single attempt at a request.
    async fn send_once<F>(&self, operation: &str, build: &F) -> AttemptResult<reqwest::Response>
    where
        F: Fn() -> RequestBuilder + Sync,
    {
        if let Some(limiter) = &self.rate_limiter {
            limiter.acquire_one().await;
        }
        let response = match build().bearer_auth(&self.token).send().await {
            Ok(response) => response,
            Err(err) if err.is_known_transient() => {
                return retry_result_transient(
                    TransientFailure::new(operation, None, err.to_string()).into(),
                );
            }
            Err(err) => {
                return retry_result_fatal(
                    anyhow::Error::new(err).context(format!("Drive request failed while {operation}")),
                );
            }
        };

        let status = response.status();
        if status.is_success() {
            return retry_result_ok(response);
        }
        let body = response.text().await.unwrap_or_default();
        if status.is_known_transient() || is_quota_error(status, &body) {
            retry_result_transient(
                TransientFailure::new(operation, Some(status.as_u16()), summarize_body(&body))
                    .into(),
            )
        } else {
            retry_result_fatal(anyhow!(
                "Drive returned HTTP {} while {}: {}",
                status.as_u16(),
                operation,
                summarize_body(&body)
            ))
        }
    }
}

/// What [`DriveClient::find_child`] looks for.
#[derive(Clone, Copy, Debug)]
enum ChildKind {
    Folder,
    File,
}

/// Uploads go to a separate endpoint, `.../upload/drive/v3` for the public
/// API.
fn upload_base_for(api_base: &str) -> String {
    match api_base.strip_suffix("/drive/v3") {
        Some(host) => format!("{host}/upload/drive/v3"),
        None => format!("{api_base}/upload"),
    }
}

/// Build a `multipart/related` body holding file metadata and contents.
fn multipart_related_body(
    boundary: &str,
    metadata: &Value,
    mime_type: &str,
    content: &[u8],
) -> Vec<u8> {
    let mut body = Vec::with_capacity(content.len() + 512);
    body.extend_from_slice(
        format!(
            "--{boundary}\r\nContent-Type: application/json; charset=UTF-8\r\n\r\n{metadata}\r\n--{boundary}\r\nContent-Type: {mime_type}\r\n\r\n"
        )
        .as_bytes(),
    );
    body.extend_from_slice(content);
    body.extend_from_slice(format!("\r\n--{boundary}--\r\n").as_bytes());
    body
}

/// Drive reports quota exhaustion as 403 with a `rateLimitExceeded` or
/// `userRateLimitExceeded` reason.
fn is_quota_error(status: StatusCode, body: &str) -> bool {
    status == StatusCode::FORBIDDEN && body.contains("ateLimitExceeded")
}

/// Trim an error body for inclusion in a message.
fn summarize_body(body: &str) -> String {
    let body = body.trim();
    match body.char_indices().nth(300) {
        Some((idx, _)) => format!("{}…", &body[..idx]),
        None => body.to_owned(),
    }
}

/// Escape a value for use inside single quotes in a Drive query.
fn escape_query(value: &str) -> String {
    value.replace('\\', "\\\\").replace('\'', "\\'")
}

/// One page of a `files.list` response.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct FileList {
    #[serde(default)]
    next_page_token: Option<String>,
    #[serde(default)]
    files: Vec<DriveFile>,
}

/// A file entry in a `files.list` response.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct DriveFile {
    id: String,
    name: String,
    #[serde(default)]
    mime_type: Option<String>,
}

/// The response to a create or upload request.
#[derive(Debug, Deserialize)]
struct CreatedFile {
    id: String,
}

/// Writes files into a Drive folder tree, creating folders as needed.
pub struct DriveUploader {
    /// Our API client.
    client: DriveClient,

    /// The folder everything is written below.
    root_id: String,

    /// Folder IDs by parent ID and name. The lock is held across lookups
    /// and creation, so concurrent workers never create the same folder
    /// twice.
    folders: Mutex<HashMap<(String, String), String>>,
}

impl DriveUploader {
    /// Write below the folder `name` inside `parent_id`, creating it if
    /// needed.
    pub async fn open(client: DriveClient, parent_id: &str, name: &str) -> Result<Self> {
        let uploader = Self {
            client,
            root_id: parent_id.to_owned(),
            folders: Mutex::new(HashMap::new()),
        };
        let root_id = uploader
            .folder(&[name.to_owned()])
            .await
            .with_context(|| format!("could not open Drive output folder {:?}", name))?;
        Ok(Self {
            root_id,
            ..uploader
        })
    }

    /// The ID of the folder at `path` below our root, creating any missing
    /// folders along the way.
    pub async fn folder(&self, path: &[String]) -> Result<String> {
        let mut folders = self.folders.lock().await;
        let mut parent = self.root_id.clone();
        for name in path {
            let key = (parent.clone(), name.clone());
            let id = match folders.get(&key) {
                Some(id) => id.clone(),
                None => {
                    let id = match self
                        .client
                        .find_child(&parent, name, ChildKind::Folder)
                        .await?
                    {
                        Some(id) => id,
                        None => self.client.create_folder(&parent, name).await?,
                    };
                    folders.insert(key, id.clone());
                    id
                }
            };
            parent = id;
        }
        Ok(parent)
    }

    /// Store `content` as `name` in the folder `folder_id`, replacing any
    /// file of the same name. Returns the file ID.
    pub async fn upload(
        &self,
        folder_id: &str,
        name: &str,
        mime_type: &str,
        content: Vec<u8>,
    ) -> Result<String> {
        self.client
            .upload_file(folder_id, name, mime_type, content)
            .await
            .with_context(|| format!("failed to upload {:?} to Drive", name))
    }
}

/// A Drive folder tree.
pub struct DriveSource {
    /// Our API client.
    client: DriveClient,

    /// The folder we enumerate.
    root_id: String,
}

impl DriveSource {
    /// Create a source rooted at `root_id`.
    pub fn new(client: DriveClient, root_id: String) -> Self {
        Self { client, root_id }
    }
}

#[async_trait]
impl RemoteSource for DriveSource {
    #[instrument(level = "debug", skip_all, fields(root = %self.root_id))]
    async fn list_items(&self, mime_types: &[&str]) -> Result<Vec<RemoteItem>> {
        let type_filter = mime_types
            .iter()
            .map(|mime| format!("mimeType='{}'", escape_query(mime)))
            .collect::<Vec<_>>()
            .join(" or ");

        // Depth-first, files before subfolders, so the order matches the local
        // source and stays stable between runs.
        let mut items = vec![];
        let mut stack = vec![(self.root_id.clone(), Vec::<String>::new())];
        while let Some((folder_id, folders)) = stack.pop() {
            let parent = format!("'{}' in parents and trashed=false", escape_query(&folder_id));
            if !mime_types.is_empty() {
                let files = self
                    .client
                    .list_files(&format!("{parent} and ({type_filter})"))
                    .await
                    .with_context(|| format!("failed to list files in {:?}", folders.join("/")))?;
                items.extend(files.into_iter().map(|file| RemoteItem {
                    id: file.id,
                    path: folders.clone(),
                    name: file.name,
                    mime_type: file.mime_type,
                }));
            }

            let subfolders = self
                .client
                .list_files(&format!("{parent} and mimeType='{FOLDER_MIME_TYPE}'"))
                .await
                .with_context(|| format!("failed to list folders in {:?}", folders.join("/")))?;
            for folder in subfolders.into_iter().rev() {
                let mut child = folders.clone();
                child.push(folder.name);
                stack.push((folder.id, child));
            }
        }
        debug!(count = items.len(), "listed Drive items");
        Ok(items)
    }

    async fn fetch(&self, item: &RemoteItem) -> Result<Vec<u8>> {
        self.client
            .download(&item.id)
            .await
            .with_context(|| format!("failed to download {:?}", item.display_path()))
    }

    fn item_url(&self, item: &RemoteItem) -> String {
        format!("https://drive.google.com/uc?id={}&export=download", item.id)
    }
}

#[cfg(test)]
mod tests {
    use std::collections::VecDeque;

    use tokio::{
        io::{AsyncReadExt as _, AsyncWriteExt as _},
        net::TcpListener,
        sync::Mutex,
    };

    use super::*;
    use crate::remote::is_transient;

    /// A request seen by [`fake_drive`].
    #[derive(Clone, Debug)]
    struct SeenRequest {
        /// The request line, such as `GET /files?q=... HTTP/1.1`.
        line: String,
        body: Vec<u8>,
    }

    /// Serve canned HTTP responses, one per connection, and record the
    /// requests we saw.
    async fn fake_drive(
        responses: Vec<(u16, &'static str)>,
    ) -> (String, Arc<Mutex<Vec<SeenRequest>>>) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let seen = Arc::new(Mutex::new(vec![]));
        let seen_clone = seen.clone();
        let mut responses = responses.into_iter().collect::<VecDeque<_>>();
        tokio::spawn(async move {
            while let Some((status, body)) = responses.pop_front() {
                let (mut socket, _) = listener.accept().await.unwrap();
                let mut buf = vec![0; 8192];
                let mut request = vec![];
                let header_end = loop {
                    let n = socket.read(&mut buf).await.unwrap();
                    request.extend_from_slice(&buf[..n]);
                    if let Some(pos) = request.windows(4).position(|w| w == b"\r\n\r\n") {
                        break pos + 4;
                    }
                    if n == 0 {
                        break request.len();
                    }
                };
                let head = String::from_utf8_lossy(&request[..header_end]).into_owned();
                let content_length = head
                    .lines()
                    .filter_map(|line| line.split_once(':'))
                    .find(|(name, _)| name.eq_ignore_ascii_case("content-length"))
                    .and_then(|(_, value)| value.trim().parse::<usize>().ok())
                    .unwrap_or(0);
                while request.len() < header_end + content_length {
                    let n = socket.read(&mut buf).await.unwrap();
                    if n == 0 {
                        break;
                    }
                    request.extend_from_slice(&buf[..n]);
                }
                seen_clone.lock().await.push(SeenRequest {
                    line: head.lines().next().unwrap_or_default().to_owned(),
                    body: request[header_end..].to_vec(),
                });
                let response = format!(
                    "HTTP/1.1 {status} X\r\nContent-Type: application/json\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{body}",
                    body.len()
                );
                socket.write_all(response.as_bytes()).await.unwrap();
                socket.shutdown().await.ok();
            }
        });
        (format!("http://{addr}"), seen)
    }

    fn test_client(api_base: String) -> DriveClient {
        let mut client = DriveClient::new("test-token".to_owned(), api_base, None).unwrap();
        client.fast_retries = true;
        client
    }

    #[tokio::test]
    async fn listing_follows_pages_and_recurses() -> Result<()> {
        let (base, seen) = fake_drive(vec![
            // Root: files, two pages.
            (200, r#"{"nextPageToken": "p2", "files": [{"id": "f1", "name": "a.pdf", "mimeType": "application/pdf"}]}"#),
            (200, r#"{"files": [{"id": "f2", "name": "b.pdf", "mimeType": "application/pdf"}]}"#),
            // Root: folders.
            (200, r#"{"files": [{"id": "d1", "name": "2024-01"}]}"#),
            // 2024-01: files, then folders.
            (200, r#"{"files": [{"id": "f3", "name": "c.pdf", "mimeType": "application/pdf"}]}"#),
            (200, r#"{"files": []}"#),
        ])
        .await;
        let source = DriveSource::new(test_client(base), "root".to_owned());
        let items = source.list_items(&["application/pdf"]).await?;
        let ids = items.iter().map(|i| i.id.as_str()).collect::<Vec<_>>();
        assert_eq!(ids, vec!["f1", "f2", "f3"]);
        assert_eq!(items[2].path, vec!["2024-01".to_owned()]);
        assert!(seen.lock().await[1].line.contains("pageToken=p2"));
        Ok(())
    }

    #[tokio::test]
    async fn throttling_is_retried_then_reported_as_transient() -> Result<()> {
        let (base, _seen) = fake_drive(vec![
            (429, r#"{"error": "slow down"}"#),
            (503, r#"{"error": "unavailable"}"#),
            (429, r#"{"error": "slow down"}"#),
            (429, r#"{"error": "slow down"}"#),
        ])
        .await;
        let source = DriveSource::new(test_client(base), "root".to_owned());
        let item = RemoteItem {
            id: "f1".to_owned(),
            path: vec![],
            name: "a.pdf".to_owned(),
            mime_type: None,
        };
        let err = source.fetch(&item).await.unwrap_err();
        assert!(is_transient(&err), "unexpected error: {err:?}");
        Ok(())
    }

    #[tokio::test]
    async fn recovers_after_one_throttled_attempt() -> Result<()> {
        let (base, _seen) = fake_drive(vec![
            (403, r#"{"error": {"errors": [{"reason": "userRateLimitExceeded"}]}}"#),
            (200, "PDFDATA"),
        ])
        .await;
        let source = DriveSource::new(test_client(base), "root".to_owned());
        let item = RemoteItem {
            id: "f1".to_owned(),
            path: vec![],
            name: "a.pdf".to_owned(),
            mime_type: None,
        };
        assert_eq!(source.fetch(&item).await?, b"PDFDATA");
        Ok(())
    }

    #[tokio::test]
    async fn not_found_is_not_transient() -> Result<()> {
        let (base, seen) = fake_drive(vec![(404, r#"{"error": "no such file"}"#)]).await;
        let source = DriveSource::new(test_client(base), "root".to_owned());
        let item = RemoteItem {
            id: "gone".to_owned(),
            path: vec![],
            name: "gone.pdf".to_owned(),
            mime_type: None,
        };
        let err = source.fetch(&item).await.unwrap_err();
        assert!(!is_transient(&err));
        assert_eq!(seen.lock().await.len(), 1);
        Ok(())
    }

    #[tokio::test]
    async fn uploads_create_folders_once_and_replace_existing_files() -> Result<()> {
        let (base, seen) = fake_drive(vec![
            // Open the output folder: not found, so create it.
            (200, r#"{"files": []}"#),
            (200, r#"{"id": "images"}"#),
            // "2024-01" already exists.
            (200, r#"{"files": [{"id": "month", "name": "2024-01"}]}"#),
            // First upload: no such file yet.
            (200, r#"{"files": []}"#),
            (200, r#"{"id": "page1"}"#),
            // Second upload of the same name: replace the contents.
            (200, r#"{"files": [{"id": "page1", "name": "r_p1.png"}]}"#),
            (200, r#"{"id": "page1"}"#),
        ])
        .await;
        let uploader = DriveUploader::open(test_client(base), "root", "Recibos_Imagenes").await?;

        let month = vec!["2024-01".to_owned()];
        assert_eq!(uploader.folder(&month).await?, "month");
        // Cached, so no request.
        assert_eq!(uploader.folder(&month).await?, "month");

        let id = uploader
            .upload("month", "r_p1.png", "image/png", b"PNGDATA".to_vec())
            .await?;
        assert_eq!(id, "page1");
        let id = uploader
            .upload("month", "r_p1.png", "image/png", b"PNGDATA2".to_vec())
            .await?;
        assert_eq!(id, "page1");

        let seen = seen.lock().await;
        assert_eq!(seen.len(), 7);
        assert!(seen[1].line.starts_with("POST /files?"));
        let folder_body: Value = serde_json::from_slice(&seen[1].body)?;
        assert_eq!(folder_body["name"], "Recibos_Imagenes");
        assert_eq!(folder_body["parents"], json!(["root"]));
        assert!(seen[2].line.contains("images"));

        assert!(seen[4].line.starts_with("POST /upload/files?uploadType=multipart"));
        let upload = String::from_utf8_lossy(&seen[4].body);
        assert!(upload.contains(r#""parents":["month"]"#));
        assert!(upload.contains("PNGDATA"));

        assert!(seen[6].line.starts_with("PATCH /upload/files/page1?uploadType=media"));
        assert_eq!(seen[6].body, b"PNGDATA2");
        Ok(())
    }

    #[tokio::test]
    async fn throttled_uploads_are_transient() -> Result<()> {
        let (base, _seen) = fake_drive(vec![
            (200, r#"{"files": []}"#),
            (429, r#"{"error": "slow down"}"#),
            (429, r#"{"error": "slow down"}"#),
            (429, r#"{"error": "slow down"}"#),
            (429, r#"{"error": "slow down"}"#),
        ])
        .await;
        let client = test_client(base);
        let err = client
            .upload_file("month", "r_p1.png", "image/png", b"PNG".to_vec())
            .await
            .unwrap_err();
        assert!(is_transient(&err), "unexpected error: {err:?}");
        Ok(())
    }

    #[test]
    fn upload_urls_sit_beside_the_api() {
        assert_eq!(
            upload_base_for(DEFAULT_API_BASE),
            "https://www.googleapis.com/upload/drive/v3"
        );
        assert_eq!(upload_base_for("http://127.0.0.1:9"), "http://127.0.0.1:9/upload");
    }

    #[test]
    fn queries_escape_quotes() {
        assert_eq!(escape_query("Ana's receipts"), "Ana\\'s receipts");
    }

    #[test]
    fn drive_urls_point_at_downloads() {
        let client = DriveClient::new("t".to_owned(), DEFAULT_API_BASE.to_owned(), None).unwrap();
        let source = DriveSource::new(client, "root".to_owned());
        let item = RemoteItem {
            id: "abc123".to_owned(),
            path: vec![],
            name: "p1.png".to_owned(),
            mime_type: None,
        };
        assert_eq!(
            source.item_url(&item),
            "https://drive.google.com/uc?id=abc123&export=download"
        );
    }
}
