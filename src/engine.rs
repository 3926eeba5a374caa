pub mod animation;
mod base;
pub mod config;
pub mod errors;
pub mod events;
pub mod flipbook;
mod input;
pub mod layered;
pub mod loading;
pub mod media;
pub mod mount;
pub mod pagination;
pub mod scene;

pub use animation::{AnimationDriver, Easing, TokioDriver, Tween};
pub use base::EngineDeps;
pub use config::{
    ConfigUpdate, Fallback, FlipbookConfig, FlipbookSettings, LoadingStrategy, NavigationOptions,
    RenderMode, SettingsPatch, ThemeOptions,
};
pub use errors::FlipbookError;
pub use events::{Direction, EventCallbacks, FlipbookEvent};
pub use flipbook::Flipbook;
pub use input::MIN_SWIPE_DISTANCE;
pub use layered::LayeredEngine;
pub use loading::{DecodedImage, ImageLoader, LoadingProgress, ResourceLoader};
pub use media::{MediaKind, MediaSource};
pub use mount::{InputEvent, Key, MountPoint};
pub use pagination::{PageInfo, Spread};
pub use scene::SceneEngine;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::fmt::Display;
use tokio::sync::watch;
use uuid::Uuid;

/// Default capacity of the event bus.
pub const DEFAULT_CHANNEL_CAPACITY: usize = 512;

/// A unique identifier for an engine instance, represented as a UUID.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct EngineId(Uuid);

impl EngineId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for EngineId {
    fn default() -> Self {
        Self::new()
    }
}

impl From<Uuid> for EngineId {
    fn from(uuid: Uuid) -> Self {
        Self(uuid)
    }
}

impl Display for EngineId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Lifecycle of an engine.
///
/// `Uninitialized -> Loading -> Ready <-> Flipping`, with `Failed` reached when loading fails
/// and `Disposed` terminal from anywhere.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum EngineState {
    #[default]
    Uninitialized,
    Loading,
    Ready,
    Flipping,
    /// Loading failed; the engine never becomes ready
    Failed(String),
    Disposed,
}

impl Display for EngineState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            EngineState::Uninitialized => write!(f, "uninitialized"),
            EngineState::Loading => write!(f, "loading"),
            EngineState::Ready => write!(f, "ready"),
            EngineState::Flipping => write!(f, "flipping"),
            EngineState::Failed(reason) => write!(f, "failed: {}", reason),
            EngineState::Disposed => write!(f, "disposed"),
        }
    }
}

/// A rendering backend. Both variants expose the same navigation and lifecycle contract.
///
/// Navigation in any state other than `Ready` (or to an out-of-range or unchanged position)
/// is a silent no-op.
#[async_trait]
pub trait FlipbookEngine: Send + Sync {
    fn id(&self) -> EngineId;

    fn kind(&self) -> RenderMode;

    /// Decodes every media item and shows the first spread or page. Call once.
    async fn load(&self) -> Result<(), FlipbookError>;

    /// Turns forward. Resolves once the flip, if any, has committed.
    async fn next_page(&self);

    /// Turns back. Resolves once the flip, if any, has committed.
    async fn prev_page(&self);

    /// Jumps straight to `index` without animating.
    async fn go_to_page(&self, index: usize);

    /// Committed position; never reflects a flip in progress.
    fn current_page(&self) -> PageInfo;

    fn is_animating(&self) -> bool;

    fn loading_progress(&self) -> LoadingProgress;

    fn state(&self) -> EngineState;

    fn watch_state(&self) -> watch::Receiver<EngineState>;

    fn spreads(&self) -> Vec<Spread>;

    /// Re-reads the mount point size and lays out again.
    fn resize(&self);

    /// Applies settings that do not require a rebuild (theme, timing, input toggles).
    fn apply_settings(&self, settings: &FlipbookSettings);

    /// Releases everything the engine acquired. Idempotent.
    fn dispose(&self);
}
