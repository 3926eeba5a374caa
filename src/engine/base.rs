//! State and plumbing shared by both backends.

use crate::engine::animation::AnimationDriver;
use crate::engine::config::ResolvedConfig;
use crate::engine::errors::FlipbookError;
use crate::engine::events::{EventSink, FlipbookEvent};
use crate::engine::loading::{DecodedImage, LoadingCoordinator, LoadingProgress, ResourceLoader};
use crate::engine::media::MediaSource;
use crate::engine::mount::MountPoint;
use crate::engine::pagination::{build_spreads, Spread};
use crate::engine::{EngineId, EngineState};
use std::sync::Arc;
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;

/// Collaborators an engine is constructed with.
#[derive(Clone)]
pub struct EngineDeps {
    pub events: EventSink,
    pub loader: Arc<dyn ResourceLoader>,
    pub driver: Arc<dyn AnimationDriver>,
}

pub(crate) struct EngineBase {
    pub id: EngineId,
    pub mount: Arc<MountPoint>,
    pub media: MediaSource,
    pub spreads: Vec<Spread>,
    pub events: EventSink,
    pub driver: Arc<dyn AnimationDriver>,
    /// Fires on disposal. Every deferred task selects on it or on a child of it.
    pub cancel: CancellationToken,
    coordinator: LoadingCoordinator,
    state_tx: watch::Sender<EngineState>,
}

impl EngineBase {
    /// Claims the mount point for a new engine.
    pub fn new(resolved: &ResolvedConfig, deps: EngineDeps) -> Result<Self, FlipbookError> {
        let id = EngineId::new();
        resolved.mount.claim(id)?;

        let media = resolved.media.clone();
        let coordinator = LoadingCoordinator::new(
            deps.loader,
            media.len(),
            resolved.settings.load_concurrency(),
        );
        let (state_tx, _) = watch::channel(EngineState::Uninitialized);

        Ok(Self {
            id,
            mount: resolved.mount.clone(),
            spreads: build_spreads(&media.locators),
            media,
            events: deps.events,
            driver: deps.driver,
            cancel: CancellationToken::new(),
            coordinator,
            state_tx,
        })
    }

    pub fn total(&self) -> usize {
        self.media.len()
    }

    pub fn publish(&self, state: &EngineState) {
        self.state_tx.send_replace(state.clone());
    }

    pub fn watch(&self) -> watch::Receiver<EngineState> {
        self.state_tx.subscribe()
    }

    pub fn progress(&self) -> LoadingProgress {
        self.coordinator.progress()
    }

    /// Loads every media item, emitting progress as items arrive. Emits nothing once the
    /// engine has been disposed.
    pub async fn load_media(&self) -> Result<Vec<DecodedImage>, FlipbookError> {
        let events = self.events.clone();
        let cancel = self.cancel.clone();
        let on_progress = move |p: &LoadingProgress| {
            if !cancel.is_cancelled() {
                events.emit(FlipbookEvent::LoadProgress(p.clone()));
            }
        };

        tokio::select! {
            _ = self.cancel.cancelled() => Err(FlipbookError::Disposed),
            res = self.coordinator.load_all(&self.media.locators, on_progress) => res,
        }
    }

    /// Reports a failed load. The caller has already moved its state to `Failed`.
    pub fn report_failure(&self, err: &FlipbookError) {
        if matches!(err, FlipbookError::Disposed) || self.cancel.is_cancelled() {
            return;
        }
        log::error!("engine {}: initialization failed: {}", self.id, err);
        self.events.emit(FlipbookEvent::Error {
            message: err.to_string(),
        });
    }

    pub fn report_ready(&self) {
        log::info!("engine {}: ready with {} pages", self.id, self.total());
        self.events.emit(FlipbookEvent::LoadComplete);
        self.events.emit(FlipbookEvent::Ready);
    }

    /// Logs and emits each teardown problem without interrupting the caller.
    pub fn report_warnings(&self, warnings: Vec<String>) {
        for message in warnings {
            log::warn!("engine {}: {}", self.id, message);
            self.events.emit(FlipbookEvent::Warning { message });
        }
    }
}
