//! Shared artifact store seam for `ResolveArtifacts` (spec.md §3, §4.7
//! "fetch listed URLs to a shared artifact store... fatal if any fetch
//! fails after retries").
//!
//! Grounded on the same thin `async_trait` collaborator pattern as
//! `store.rs`/`driver.rs`: the fetch transport (HTTP, S3, whatever backs a
//! production artifact cache) is out of this core's scope, so only the
//! trait and a fake are carried here.

use async_trait::async_trait;
use std::sync::Mutex;

use crate::errors::CoreError;

#[async_trait]
pub trait ArtifactStore: Send + Sync {
    /// Fetches `url` into the shared store, idempotently. A single call is
    /// one attempt; retrying belongs to `resolve_artifacts` below, not here,
    /// so fakes stay simple.
    async fn fetch(&self, url: &str) -> Result<(), CoreError>;
}

/// Fetches every URL for an app, retrying each with `errors::retry_policy`
/// before giving up. The first URL that never succeeds makes the whole
/// resolution fail (spec.md §4.7 "fatal if any fetch fails after retries").
pub async fn resolve_artifacts(store: &dyn ArtifactStore, urls: &[String]) -> Result<(), CoreError> {
    for url in urls {
        let mut last_err = None;
        for delay in crate::errors::retry_policy() {
            match store.fetch(url).await {
                Ok(()) => {
                    last_err = None;
                    break;
                }
                Err(e) => {
                    last_err = Some(e);
                    tokio::time::sleep(delay).await;
                }
            }
        }
        if let Some(e) = last_err {
            return Err(CoreError::ResolveArtifactFailed(format!("{url}: {e}")));
        }
    }
    Ok(())
}

/// Test double and reference implementation; not meant for production use.
#[derive(Default)]
pub struct FakeArtifactStore {
    pub fetched: Mutex<Vec<String>>,
    pub fail_urls: Mutex<std::collections::HashSet<String>>,
}

impl FakeArtifactStore {
    pub fn new() -> Self {
        FakeArtifactStore::default()
    }

    pub fn fail(&self, url: impl Into<String>) {
        self.fail_urls.lock().unwrap().insert(url.into());
    }
}

#[async_trait]
impl ArtifactStore for FakeArtifactStore {
    async fn fetch(&self, url: &str) -> Result<(), CoreError> {
        if self.fail_urls.lock().unwrap().contains(url) {
            return Err(CoreError::StoreUnavailable(format!("fake artifact fetch failed for {url}")));
        }
        self.fetched.lock().unwrap().push(url.to_string());
        Ok(())
    }
}
