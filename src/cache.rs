//! Rendered-image cache keyed by every parameter that affects the output
//!
//! Entries expire a fixed time after insertion and are tagged with their
//! target URL so they can be invalidated in bulk. Without `max_entries` the
//! cache has no size bound; request-space cardinality decides memory use.

use crate::{CacheSettings, OutputFormat, RenderError, ScreenshotRequest};
use bytes::Bytes;
use dashmap::DashMap;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::debug;

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CacheKey {
    url: String,
    width: u32,
    height: u32,
    /// Bit pattern of the effective scale, so the key stays `Eq + Hash`
    scale_bits: u64,
    quality: Option<u8>,
    full_page: bool,
    format: OutputFormat,
}

impl CacheKey {
    /// Build a key from the values that actually reach the renderer
    ///
    /// Quality is dropped for lossless formats and scale for full-page
    /// captures, so requests differing only in ignored values share an entry.
    pub fn from_request(request: &ScreenshotRequest) -> Self {
        Self {
            url: request.url.as_str().to_string(),
            width: request.viewport.width,
            height: request.viewport.height,
            scale_bits: request.effective_scale().to_bits(),
            quality: request.effective_quality(),
            full_page: request.full_page,
            format: request.format,
        }
    }

    /// Invalidation tag of the entry
    pub fn url(&self) -> &str {
        &self.url
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CacheStatus {
    Hit,
    Miss,
}

impl CacheStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            CacheStatus::Hit => "HIT",
            CacheStatus::Miss => "MISS",
        }
    }
}

#[derive(Debug, Clone)]
pub struct CachedImage {
    /// Shared with the cache entry, cloning does not copy the image
    pub data: Bytes,
    pub status: CacheStatus,
}

#[derive(Debug)]
struct CacheEntry {
    data: Bytes,
    expires_at: Instant,
}

pub struct ScreenshotCache {
    entries: DashMap<CacheKey, CacheEntry>,
    ttl: Duration,
    max_entries: Option<usize>,
}

impl ScreenshotCache {
    pub fn new(settings: &CacheSettings) -> Self {
        Self {
            entries: DashMap::new(),
            ttl: settings.ttl,
            max_entries: settings.max_entries,
        }
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Fresh bytes for `key`, removing the entry if it has expired
    pub fn get(&self, key: &CacheKey) -> Option<Bytes> {
        let now = Instant::now();
        let fresh = self.entries.get(key).and_then(|entry| {
            (entry.expires_at > now).then(|| entry.data.clone())
        });

        if fresh.is_none() {
            self.entries.remove_if(key, |_, entry| entry.expires_at <= now);
        }
        fresh
    }

    pub fn insert(&self, key: CacheKey, data: Bytes) {
        if let Some(max) = self.max_entries {
            if !self.entries.contains_key(&key) && self.entries.len() >= max {
                self.evict_one();
            }
        }

        self.entries.insert(
            key,
            CacheEntry {
                data,
                expires_at: Instant::now() + self.ttl,
            },
        );
    }

    /// Return cached bytes, or run `render` and store its result
    ///
    /// Failures are not cached. Two identical requests that miss at the same
    /// time both render; the later insert wins.
    pub async fn get_or_render<F, Fut>(
        &self,
        key: CacheKey,
        render: F,
    ) -> Result<CachedImage, RenderError>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<Vec<u8>, RenderError>>,
    {
        if let Some(data) = self.get(&key) {
            crate::metrics::record_cache_lookup(true);
            return Ok(CachedImage {
                data,
                status: CacheStatus::Hit,
            });
        }

        crate::metrics::record_cache_lookup(false);
        let data = Bytes::from(render().await?);
        self.insert(key, data.clone());

        Ok(CachedImage {
            data,
            status: CacheStatus::Miss,
        })
    }

    /// Drop every entry tagged with `url`, returning how many were removed
    pub fn invalidate_tag(&self, url: &str) -> usize {
        let before = self.entries.len();
        self.entries.retain(|key, _| key.url() != url);
        let removed = before.saturating_sub(self.entries.len());
        debug!("Invalidated {} cache entries for {}", removed, url);
        removed
    }

    pub fn purge_expired(&self) -> usize {
        let now = Instant::now();
        let before = self.entries.len();
        self.entries.retain(|_, entry| entry.expires_at > now);
        before.saturating_sub(self.entries.len())
    }

    /// Remove the entry closest to expiry
    fn evict_one(&self) {
        let victim = self
            .entries
            .iter()
            .min_by_key(|entry| entry.value().expires_at)
            .map(|entry| entry.key().clone());

        if let Some(key) = victim {
            self.entries.remove(&key);
            crate::metrics::record_cache_evictions(1);
        }
    }

    /// Periodically purge expired entries until the task is aborted
    pub fn start_sweeper(self: &Arc<Self>, every: Duration) -> JoinHandle<()> {
        let cache = self.clone();

        tokio::spawn(async move {
            let mut interval = tokio::time::interval(every);
            // The first tick completes immediately
            interval.tick().await;

            loop {
                interval.tick().await;
                let purged = cache.purge_expired();
                if purged > 0 {
                    debug!("Purged {} expired cache entries", purged);
                    crate::metrics::record_cache_evictions(purged);
                }
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{RequestDefaults, ValidatedParams};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use url::Url;

    fn request(url: &str) -> ScreenshotRequest {
        ValidatedParams {
            url: Url::parse(url).unwrap(),
            width: None,
            height: None,
            scale: None,
            quality: None,
            full_page: None,
            format: None,
            key: None,
        }
        .with_defaults(&RequestDefaults::default())
    }

    fn cache(ttl: Duration, max_entries: Option<usize>) -> ScreenshotCache {
        ScreenshotCache::new(&CacheSettings {
            ttl,
            max_entries,
            ..Default::default()
        })
    }

    #[test]
    fn test_key_ignores_inapplicable_values() {
        let base = request("https://example.com");

        let mut other_quality = base.clone();
        other_quality.quality = 90;
        assert_eq!(CacheKey::from_request(&base), CacheKey::from_request(&other_quality));

        let mut jpeg = base.clone();
        jpeg.format = OutputFormat::Jpeg;
        let mut jpeg_other_quality = jpeg.clone();
        jpeg_other_quality.quality = 90;
        assert_ne!(CacheKey::from_request(&jpeg), CacheKey::from_request(&jpeg_other_quality));

        let mut full = base.clone();
        full.full_page = true;
        let mut full_other_scale = full.clone();
        full_other_scale.scale = 0.5;
        assert_eq!(CacheKey::from_request(&full), CacheKey::from_request(&full_other_scale));
        assert_ne!(CacheKey::from_request(&base), CacheKey::from_request(&full));
    }

    #[tokio::test]
    async fn test_second_call_is_a_hit() {
        let cache = cache(Duration::from_secs(3600), None);
        let renders = AtomicUsize::new(0);
        let counter = &renders;
        let key = CacheKey::from_request(&request("https://example.com"));

        let render = move || async move {
            counter.fetch_add(1, Ordering::SeqCst);
            Ok::<_, RenderError>(vec![1, 2, 3])
        };

        let first = cache.get_or_render(key.clone(), render).await.unwrap();
        let second = cache.get_or_render(key, render).await.unwrap();

        assert_eq!(first.status, CacheStatus::Miss);
        assert_eq!(second.status, CacheStatus::Hit);
        assert_eq!(first.data, second.data);
        assert_eq!(first.data.as_ptr(), second.data.as_ptr());
        assert_eq!(renders.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_failures_are_not_cached() {
        let cache = cache(Duration::from_secs(3600), None);
        let key = CacheKey::from_request(&request("https://example.com"));

        let failed = cache
            .get_or_render(key.clone(), || async {
                Err::<Vec<u8>, _>(RenderError::PageError("target crashed".into()))
            })
            .await;
        assert!(failed.is_err());
        assert!(cache.is_empty());

        let ok = cache
            .get_or_render(key, || async { Ok::<_, RenderError>(vec![9]) })
            .await
            .unwrap();
        assert_eq!(ok.status, CacheStatus::Miss);
    }

    #[tokio::test(start_paused = true)]
    async fn test_entries_expire_after_ttl() {
        let cache = cache(Duration::from_secs(3600), None);
        let key = CacheKey::from_request(&request("https://example.com"));
        cache.insert(key.clone(), Bytes::from(vec![1]));

        tokio::time::advance(Duration::from_secs(3599)).await;
        assert!(cache.get(&key).is_some());

        tokio::time::advance(Duration::from_secs(2)).await;
        assert!(cache.get(&key).is_none());
        assert!(cache.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_purge_expired() {
        let cache = cache(Duration::from_secs(60), None);
        cache.insert(CacheKey::from_request(&request("https://a.test")), Bytes::from(vec![1]));
        tokio::time::advance(Duration::from_secs(30)).await;
        cache.insert(CacheKey::from_request(&request("https://b.test")), Bytes::from(vec![2]));

        tokio::time::advance(Duration::from_secs(31)).await;
        assert_eq!(cache.purge_expired(), 1);
        assert_eq!(cache.len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_sweeper_purges_in_background() {
        let cache = Arc::new(cache(Duration::from_secs(10), None));
        cache.insert(CacheKey::from_request(&request("https://a.test")), Bytes::from(vec![1]));

        let sweeper = cache.start_sweeper(Duration::from_secs(30));
        tokio::time::sleep(Duration::from_secs(31)).await;
        tokio::task::yield_now().await;

        assert!(cache.is_empty());
        sweeper.abort();
    }

    #[test]
    fn test_invalidate_by_url_tag() {
        let cache = cache(Duration::from_secs(3600), None);
        let target = request("https://example.com");
        let mut jpeg = target.clone();
        jpeg.format = OutputFormat::Jpeg;

        cache.insert(CacheKey::from_request(&target), Bytes::from(vec![1]));
        cache.insert(CacheKey::from_request(&jpeg), Bytes::from(vec![2]));
        cache.insert(CacheKey::from_request(&request("https://other.test")), Bytes::from(vec![3]));

        assert_eq!(cache.invalidate_tag("https://example.com/"), 2);
        assert_eq!(cache.len(), 1);
        assert_eq!(cache.invalidate_tag("https://example.com/"), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_bounded_cache_evicts_oldest() {
        let cache = cache(Duration::from_secs(3600), Some(2));
        let a = CacheKey::from_request(&request("https://a.test"));
        let b = CacheKey::from_request(&request("https://b.test"));
        let c = CacheKey::from_request(&request("https://c.test"));

        cache.insert(a.clone(), Bytes::from(vec![1]));
        tokio::time::advance(Duration::from_secs(1)).await;
        cache.insert(b.clone(), Bytes::from(vec![2]));
        tokio::time::advance(Duration::from_secs(1)).await;
        cache.insert(c.clone(), Bytes::from(vec![3]));

        assert_eq!(cache.len(), 2);
        assert!(cache.get(&a).is_none());
        assert!(cache.get(&b).is_some());
        assert!(cache.get(&c).is_some());
    }
}
