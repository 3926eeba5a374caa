//! Media loading.
//!
//! The [`LoadingCoordinator`] fans out one load per locator through a [`ResourceLoader`],
//! keeps a [`LoadingProgress`] snapshot that can be read at any time, and resolves only when
//! every item decoded. The first failure rejects the whole load; whatever is still in flight
//! at that point is dropped and never touches the progress again.

use crate::engine::errors::FlipbookError;
use anyhow::{bail, Context};
use async_trait::async_trait;
use futures::StreamExt;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::sync::{Arc, Mutex};
use url::Url;

/// A decoded, presentation-ready RGBA8 bitmap.
#[derive(Clone)]
pub struct DecodedImage {
    pub locator: String,
    pub width: u32,
    pub height: u32,
    pub pixels: Vec<u8>,
}

impl DecodedImage {
    pub fn new(locator: impl Into<String>, width: u32, height: u32, pixels: Vec<u8>) -> Self {
        Self {
            locator: locator.into(),
            width,
            height,
            pixels,
        }
    }

    /// Width over height; `1.0` for degenerate images.
    pub fn aspect_ratio(&self) -> f32 {
        if self.height == 0 {
            1.0
        } else {
            self.width as f32 / self.height as f32
        }
    }
}

impl std::fmt::Debug for DecodedImage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DecodedImage")
            .field("locator", &self.locator)
            .field("width", &self.width)
            .field("height", &self.height)
            .field("len", &self.pixels.len())
            .finish()
    }
}

/// Snapshot of an in-progress load.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct LoadingProgress {
    pub loaded: usize,
    pub total: usize,
    /// `loaded / total` in `0.0 ..= 1.0`
    pub progress: f32,
    pub current_item: Option<String>,
}

impl LoadingProgress {
    pub fn new(total: usize) -> Self {
        Self {
            loaded: 0,
            total,
            progress: if total == 0 { 1.0 } else { 0.0 },
            current_item: None,
        }
    }

    pub fn is_complete(&self) -> bool {
        self.loaded == self.total
    }

    fn record(&mut self, locator: &str) {
        self.loaded += 1;
        self.progress = self.loaded as f32 / self.total.max(1) as f32;
        self.current_item = Some(locator.to_string());
    }
}

/// Turns a locator into a decoded bitmap.
#[async_trait]
pub trait ResourceLoader: Send + Sync {
    async fn load(&self, locator: &str) -> anyhow::Result<DecodedImage>;
}

/// Default loader: `http(s)://` over the network, `file://` and bare paths from disk, decoded
/// with the `image` crate.
#[derive(Clone, Default)]
pub struct ImageLoader {
    client: reqwest::Client,
}

impl ImageLoader {
    pub fn new() -> Self {
        Self::default()
    }

    async fn fetch_bytes(&self, locator: &str) -> anyhow::Result<Vec<u8>> {
        match Url::parse(locator) {
            Ok(url) => match url.scheme() {
                "http" | "https" => {
                    let res = self.client.get(url).send().await?.error_for_status()?;
                    Ok(res.bytes().await?.to_vec())
                }
                "file" => {
                    let path = url
                        .to_file_path()
                        .map_err(|_| anyhow::anyhow!("not a local file url"))?;
                    Ok(tokio::fs::read(path).await?)
                }
                // Windows drive letters parse as a one-letter scheme
                scheme if scheme.len() == 1 => Ok(tokio::fs::read(Path::new(locator)).await?),
                scheme => bail!("unsupported locator scheme '{scheme}'"),
            },
            Err(_) => Ok(tokio::fs::read(Path::new(locator)).await?),
        }
    }
}

#[async_trait]
impl ResourceLoader for ImageLoader {
    async fn load(&self, locator: &str) -> anyhow::Result<DecodedImage> {
        let bytes = self
            .fetch_bytes(locator)
            .await
            .with_context(|| format!("reading {locator}"))?;

        let decoded = tokio::task::spawn_blocking(move || image::load_from_memory(&bytes))
            .await
            .context("decoder task panicked")?
            .with_context(|| format!("decoding {locator}"))?
            .to_rgba8();

        let (width, height) = decoded.dimensions();
        Ok(DecodedImage::new(locator, width, height, decoded.into_raw()))
    }
}

/// Drives the concurrent load of a whole media list.
pub struct LoadingCoordinator {
    loader: Arc<dyn ResourceLoader>,
    progress: Arc<Mutex<LoadingProgress>>,
    /// Maximum loads in flight; `None` issues all of them at once
    concurrency: Option<usize>,
}

impl LoadingCoordinator {
    pub fn new(loader: Arc<dyn ResourceLoader>, total: usize, concurrency: Option<usize>) -> Self {
        Self {
            loader,
            progress: Arc::new(Mutex::new(LoadingProgress::new(total))),
            concurrency,
        }
    }

    /// Current progress. Safe to call while [`load_all`](Self::load_all) is running.
    pub fn progress(&self) -> LoadingProgress {
        match self.progress.lock() {
            Ok(p) => p.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }

    /// Loads every locator, calling `on_progress` after each success. Results come back in
    /// locator order regardless of completion order.
    pub async fn load_all<F>(
        &self,
        locators: &[String],
        mut on_progress: F,
    ) -> Result<Vec<DecodedImage>, FlipbookError>
    where
        F: FnMut(&LoadingProgress) + Send,
    {
        let limit = self.concurrency.unwrap_or(locators.len()).max(1);

        let mut pending = futures::stream::iter(locators.iter().cloned().enumerate())
            .map(|(index, locator)| {
                let loader = self.loader.clone();
                async move {
                    let res = loader.load(&locator).await;
                    (index, locator, res)
                }
            })
            .buffer_unordered(limit);

        let mut slots: Vec<Option<DecodedImage>> = (0..locators.len()).map(|_| None).collect();

        while let Some((index, locator, res)) = pending.next().await {
            match res {
                Ok(image) => {
                    let snapshot = {
                        let mut p = self.progress.lock().unwrap_or_else(|e| e.into_inner());
                        p.record(&locator);
                        p.clone()
                    };
                    log::debug!("loaded {} ({}/{})", locator, snapshot.loaded, snapshot.total);
                    slots[index] = Some(image);
                    on_progress(&snapshot);
                }
                Err(e) => {
                    log::error!("failed to load {}: {:#}", locator, e);
                    return Err(FlipbookError::load_failure(locator, &e));
                }
            }
        }

        Ok(slots.into_iter().flatten().collect())
    }
}


#[cfg(test)]
mod tests {
    use super::testing::ScriptedLoader;
    use super::*;
    use std::time::Duration;

    fn locators(names: &[&str]) -> Vec<String> {
        names.iter().map(|s| s.to_string()).collect()
    }

    #[tokio::test(start_paused = true)]
    async fn resolves_in_locator_order_with_monotonic_progress() {
        let loader = ScriptedLoader::new().ok("a", 30).ok("b", 10).ok("c", 20);
        let coordinator = LoadingCoordinator::new(Arc::new(loader), 3, None);

        let mut seen = Vec::new();
        let images = coordinator
            .load_all(&locators(&["a", "b", "c"]), |p| seen.push(p.clone()))
            .await
            .unwrap();

        let order: Vec<&str> = images.iter().map(|i| i.locator.as_str()).collect();
        assert_eq!(order, vec!["a", "b", "c"]);

        let loaded: Vec<usize> = seen.iter().map(|p| p.loaded).collect();
        assert_eq!(loaded, vec![1, 2, 3]);
        assert_eq!(seen[0].current_item.as_deref(), Some("b"));
        assert!(coordinator.progress().is_complete());
        assert_eq!(coordinator.progress().progress, 1.0);
    }

    #[tokio::test(start_paused = true)]
    async fn first_failure_rejects_and_freezes_progress() {
        let loader = ScriptedLoader::new()
            .ok("a", 10)
            .ok("b", 20)
            .fail("c", 30, "corrupt");
        let coordinator = LoadingCoordinator::new(Arc::new(loader), 3, None);

        let err = coordinator
            .load_all(&locators(&["a", "b", "c"]), |_| {})
            .await
            .unwrap_err();

        match err {
            FlipbookError::ResourceLoad { locator, cause } => {
                assert_eq!(locator, "c");
                assert!(cause.contains("corrupt"));
            }
            other => panic!("unexpected error {other:?}"),
        }
        assert_eq!(coordinator.progress().loaded, 2);
    }

    #[tokio::test(start_paused = true)]
    async fn siblings_finishing_after_rejection_are_ignored() {
        let loader = ScriptedLoader::new().fail("a", 5, "404").ok("b", 50).ok("c", 60);
        let coordinator = LoadingCoordinator::new(Arc::new(loader), 3, None);

        assert!(coordinator.load_all(&locators(&["a", "b", "c"]), |_| {}).await.is_err());
        tokio::time::sleep(Duration::from_millis(100)).await;
        assert_eq!(coordinator.progress().loaded, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn bounded_concurrency_still_loads_everything() {
        let loader = ScriptedLoader::new().ok("a", 10).ok("b", 10).ok("c", 10).ok("d", 10);
        let coordinator = LoadingCoordinator::new(Arc::new(loader), 4, Some(2));

        let start = tokio::time::Instant::now();
        let images = coordinator
            .load_all(&locators(&["a", "b", "c", "d"]), |_| {})
            .await
            .unwrap();
        assert_eq!(images.len(), 4);
        // Two waves of two
        let elapsed = start.elapsed();
        assert!(elapsed >= Duration::from_millis(20), "{elapsed:?}");
        assert!(elapsed < Duration::from_millis(30), "{elapsed:?}");
    }

    #[tokio::test]
    async fn image_loader_reads_paths_and_file_urls() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("page.png");
        image::RgbaImage::new(3, 2).save(&path).unwrap();

        let loader = ImageLoader::new();
        let img = loader.load(path.to_str().unwrap()).await.unwrap();
        assert_eq!((img.width, img.height), (3, 2));
        assert_eq!(img.pixels.len(), 3 * 2 * 4);

        let url = Url::from_file_path(&path).unwrap();
        let img = loader.load(url.as_str()).await.unwrap();
        assert_eq!(img.locator, url.as_str());
    }

    #[tokio::test]
    async fn image_loader_reports_missing_and_undecodable_files() {
        let dir = tempfile::tempdir().unwrap();
        let loader = ImageLoader::new();

        let missing = dir.path().join("nope.png");
        let err = loader.load(missing.to_str().unwrap()).await.unwrap_err();
        assert!(format!("{err:#}").contains("reading"));

        let garbage = dir.path().join("garbage.png");
        std::fs::write(&garbage, b"not an image").unwrap();
        let err = loader.load(garbage.to_str().unwrap()).await.unwrap_err();
        assert!(format!("{err:#}").contains("decoding"));
    }

    #[tokio::test]
    async fn image_loader_rejects_unknown_schemes() {
        let err = ImageLoader::new().load("ftp://host/a.png").await.unwrap_err();
        assert!(format!("{err:#}").contains("unsupported locator scheme"));
    }
}
