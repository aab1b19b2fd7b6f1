//! Fakes for exercising the engine without a network or external tools.

use std::{
    collections::{HashMap, HashSet},
    sync::{Arc, Mutex},
    time::Duration,
};

use serde_json::json;

use crate::{
    async_utils::ShutdownFlag,
    engine::ItemProcessor,
    prelude::*,
    remote::{PDF_MIME_TYPE, RemoteItem, RemoteSource, TransientFailure},
};

/// Build PDF items with the given IDs, all in one folder.
pub fn items(ids: &[&str]) -> Vec<RemoteItem> {
    ids.iter()
        .map(|id| RemoteItem {
            id: (*id).to_owned(),
            path: vec!["inbox".to_owned()],
            name: format!("{id}.pdf"),
            mime_type: Some(PDF_MIME_TYPE.to_owned()),
        })
        .collect()
}

/// A [`RemoteSource`] backed by memory.
#[derive(Default)]
pub struct MemorySource {
    items: Vec<RemoteItem>,
    missing: HashSet<String>,
    throttled: HashSet<String>,
    listing_fails: bool,
    fetched: Mutex<Vec<String>>,
}

impl MemorySource {
    pub fn new(ids: &[&str]) -> Self {
        Self {
            items: items(ids),
            ..Self::default()
        }
    }

    /// Fetching `id` fails as if the file had vanished.
    pub fn without(mut self, id: &str) -> Self {
        self.missing.insert(id.to_owned());
        self
    }

    /// Fetching `id` fails with a throttling error.
    pub fn throttling(mut self, id: &str) -> Self {
        self.throttled.insert(id.to_owned());
        self
    }

    /// Listing fails.
    pub fn failing_to_list(mut self) -> Self {
        self.listing_fails = true;
        self
    }

    pub fn items(&self) -> Vec<RemoteItem> {
        self.items.clone()
    }

    /// IDs fetched so far, in order.
    pub fn fetched(&self) -> Vec<String> {
        self.fetched.lock().expect("lock poisoned").clone()
    }
}

#[async_trait]
impl RemoteSource for MemorySource {
    async fn list_items(&self, _mime_types: &[&str]) -> Result<Vec<RemoteItem>> {
        if self.listing_fails {
            return Err(anyhow!("folder listing refused"));
        }
        Ok(self.items.clone())
    }

    async fn fetch(&self, item: &RemoteItem) -> Result<Vec<u8>> {
        self.fetched
            .lock()
            .expect("lock poisoned")
            .push(item.id.clone());
        if self.missing.contains(&item.id) {
            Err(anyhow!("file not found")).with_context(|| format!("fetching {}", item.id))
        } else if self.throttled.contains(&item.id) {
            Err(anyhow::Error::new(TransientFailure::new(
                "downloading a file",
                Some(429),
                "rate limit exceeded".to_owned(),
            )))
        } else {
            Ok(format!("contents of {}", item.id).into_bytes())
        }
    }

    fn item_url(&self, item: &RemoteItem) -> String {
        format!("memory://{}", item.id)
    }
}

/// A callback run while processing a particular item.
type Hook = Arc<dyn Fn() + Send + Sync>;

/// An [`ItemProcessor`] whose behavior is chosen per item.
#[derive(Default)]
pub struct FakeProcessor {
    failing: HashSet<String>,
    panicking: HashSet<String>,
    delays_ms: HashMap<String, u64>,
    waits_for: HashMap<String, PathBuf>,
    hooks: HashMap<String, Hook>,
    shutdown_at: Option<(String, ShutdownFlag)>,
    version: u32,
}

impl FakeProcessor {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn failing(mut self, id: &str) -> Self {
        self.failing.insert(id.to_owned());
        self
    }

    pub fn panicking(mut self, id: &str) -> Self {
        self.panicking.insert(id.to_owned());
        self
    }

    pub fn delaying(mut self, id: &str, ms: u64) -> Self {
        self.delays_ms.insert(id.to_owned(), ms);
        self
    }

    /// Don't start on `id` until `path` exists.
    pub fn waiting_for(mut self, id: &str, path: PathBuf) -> Self {
        self.waits_for.insert(id.to_owned(), path);
        self
    }

    /// Call `hook` while processing `id`, after any wait.
    pub fn calling_at(mut self, id: &str, hook: impl Fn() + Send + Sync + 'static) -> Self {
        self.hooks.insert(id.to_owned(), Arc::new(hook));
        self
    }

    /// Request a shutdown while processing `id`, as if Ctrl-C arrived then.
    pub fn requesting_shutdown_at(mut self, id: &str, flag: ShutdownFlag) -> Self {
        self.shutdown_at = Some((id.to_owned(), flag));
        self
    }

    /// Tag outputs with a version, so tests can tell runs apart.
    pub fn version(mut self, version: u32) -> Self {
        self.version = version;
        self
    }
}

#[async_trait]
impl ItemProcessor for FakeProcessor {
    fn mime_types(&self) -> &'static [&'static str] {
        &[PDF_MIME_TYPE]
    }

    async fn process(&self, item: &RemoteItem, content: Vec<u8>) -> Result<Value> {
        if let Some(ms) = self.delays_ms.get(&item.id) {
            tokio::time::sleep(Duration::from_millis(*ms)).await;
        }
        if let Some(path) = self.waits_for.get(&item.id) {
            while !path.exists() {
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        }
        if let Some(hook) = self.hooks.get(&item.id) {
            hook();
        }
        if let Some((id, flag)) = &self.shutdown_at {
            if id == &item.id {
                flag.request();
            }
        }
        if self.panicking.contains(&item.id) {
            panic!("processor exploded on {}", item.id);
        }
        if self.failing.contains(&item.id) {
            return Err(anyhow!("cannot parse {}", item.name));
        }
        Ok(json!({
            "name": item.name,
            "bytes": content.len(),
            "version": self.version,
        }))
    }
}
