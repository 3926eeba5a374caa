//! Flipbook configuration.
//!
//! [`FlipbookSettings`] is the fully resolved option set every engine runs with. Callers
//! rarely build one directly: they hand a partial [`SettingsPatch`] (often deserialized from
//! JSON) to a [`FlipbookConfig`], and [`FlipbookConfig::resolve`] deep-merges it over the
//! defaults, validates the required pieces and picks the backend the host can actually run.
//!
//! # Examples
//!
//! ```rust
//! use flipbook_engine::config::{FlipbookSettings, SettingsPatch};
//!
//! let patch = SettingsPatch::from_json(r#"{ "theme": { "page_shadow": false } }"#).unwrap();
//! let mut settings = FlipbookSettings::default();
//! settings.apply(&patch);
//!
//! assert!(!settings.theme.page_shadow);
//! // Siblings of a patched field keep their defaults
//! assert_eq!(settings.theme.background_color, "#1a1a1a");
//! ```
//!
//! # Defaults
//! - `render_mode`: [`RenderMode::SceneGraph`], downgraded to [`RenderMode::Layered`] when
//!   the mount point has no 3D capability.
//! - `animation_duration`: 800 ms, `easing`: [`Easing::EaseInOut`].
//! - `navigation`: every input enabled.
//! - `theme`: background `#1a1a1a`, page shadow and spine on.
//! - `loading_strategy`: [`LoadingStrategy::Eager`], `preload_count`: 2, `responsive`: on.

use crate::engine::animation::{AnimationDriver, Easing};
use crate::engine::errors::FlipbookError;
use crate::engine::events::EventCallbacks;
use crate::engine::loading::ResourceLoader;
use crate::engine::media::MediaSource;
use crate::engine::mount::MountPoint;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RenderMode {
    /// Flat two-slot surfaces with an overlay for the turning page
    Layered,
    /// One textured mesh per page rotating around the spine
    #[default]
    #[serde(alias = "scene-graph", alias = "scene_graph")]
    SceneGraph,
}

impl fmt::Display for RenderMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RenderMode::Layered => write!(f, "layered"),
            RenderMode::SceneGraph => write!(f, "scenegraph"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LoadingStrategy {
    /// Every page requested at once
    #[default]
    Eager,
    /// One page at a time, in order
    Lazy,
    /// At most `preload_count` pages in flight
    Progressive,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NavigationOptions {
    pub keyboard: bool,
    pub touch: bool,
    pub click: bool,
    pub arrows: bool,
    pub page_indicator: bool,
}

impl Default for NavigationOptions {
    fn default() -> Self {
        Self {
            keyboard: true,
            touch: true,
            click: true,
            arrows: true,
            page_indicator: true,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ThemeOptions {
    pub background_color: String,
    pub page_shadow: bool,
    pub spine: bool,
}

impl Default for ThemeOptions {
    fn default() -> Self {
        Self {
            background_color: "#1a1a1a".to_string(),
            page_shadow: true,
            spine: true,
        }
    }
}

/// Fully resolved settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FlipbookSettings {
    pub render_mode: RenderMode,
    /// Flip duration in milliseconds
    pub animation_duration: u64,
    pub easing: Easing,
    pub navigation: NavigationOptions,
    pub theme: ThemeOptions,
    pub loading_strategy: LoadingStrategy,
    pub preload_count: usize,
    pub responsive: bool,
}

impl Default for FlipbookSettings {
    fn default() -> Self {
        Self {
            render_mode: RenderMode::default(),
            animation_duration: 800,
            easing: Easing::default(),
            navigation: NavigationOptions::default(),
            theme: ThemeOptions::default(),
            loading_strategy: LoadingStrategy::default(),
            preload_count: 2,
            responsive: true,
        }
    }
}

impl FlipbookSettings {
    pub fn flip_duration(&self) -> Duration {
        Duration::from_millis(self.animation_duration)
    }

    /// Maximum number of loads in flight for the configured strategy. `None` means unbounded.
    pub fn load_concurrency(&self) -> Option<usize> {
        match self.loading_strategy {
            LoadingStrategy::Eager => None,
            LoadingStrategy::Lazy => Some(1),
            LoadingStrategy::Progressive => Some(self.preload_count.max(1)),
        }
    }

    /// Overlays `patch` field by field. Fields absent from the patch keep their value.
    pub fn apply(&mut self, patch: &SettingsPatch) {
        if let Some(mode) = patch.render_mode {
            self.render_mode = mode;
        }
        if let Some(ms) = patch.animation_duration {
            self.animation_duration = ms;
        }
        if let Some(easing) = patch.easing {
            self.easing = easing;
        }
        if let Some(nav) = &patch.navigation {
            nav.apply_to(&mut self.navigation);
        }
        if let Some(theme) = &patch.theme {
            theme.apply_to(&mut self.theme);
        }
        if let Some(strategy) = patch.loading_strategy {
            self.loading_strategy = strategy;
        }
        if let Some(n) = patch.preload_count {
            self.preload_count = n;
        }
        if let Some(on) = patch.responsive {
            self.responsive = on;
        }
    }

    pub fn merged(mut self, patch: &SettingsPatch) -> Self {
        self.apply(patch);
        self
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct NavigationPatch {
    pub keyboard: Option<bool>,
    pub touch: Option<bool>,
    pub click: Option<bool>,
    pub arrows: Option<bool>,
    pub page_indicator: Option<bool>,
}

impl NavigationPatch {
    fn apply_to(&self, nav: &mut NavigationOptions) {
        let fields = [
            (self.keyboard, &mut nav.keyboard),
            (self.touch, &mut nav.touch),
            (self.click, &mut nav.click),
            (self.arrows, &mut nav.arrows),
            (self.page_indicator, &mut nav.page_indicator),
        ];
        for (patch, slot) in fields {
            if let Some(v) = patch {
                *slot = v;
            }
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ThemePatch {
    pub background_color: Option<String>,
    pub page_shadow: Option<bool>,
    pub spine: Option<bool>,
}

impl ThemePatch {
    fn apply_to(&self, theme: &mut ThemeOptions) {
        if let Some(color) = &self.background_color {
            theme.background_color = color.clone();
        }
        if let Some(on) = self.page_shadow {
            theme.page_shadow = on;
        }
        if let Some(on) = self.spine {
            theme.spine = on;
        }
    }
}

/// Partial settings as supplied by a caller. Any subset deserializes.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SettingsPatch {
    pub render_mode: Option<RenderMode>,
    pub animation_duration: Option<u64>,
    pub easing: Option<Easing>,
    pub navigation: Option<NavigationPatch>,
    pub theme: Option<ThemePatch>,
    pub loading_strategy: Option<LoadingStrategy>,
    pub preload_count: Option<usize>,
    pub responsive: Option<bool>,
}

impl SettingsPatch {
    pub fn from_json(json: &str) -> Result<Self, FlipbookError> {
        serde_json::from_str(json).map_err(|e| FlipbookError::config(format!("invalid settings: {e}")))
    }

    #[inline]
    fn map(mut self, f: impl FnOnce(&mut SettingsPatch)) -> Self {
        f(&mut self);
        self
    }

    pub fn render_mode(self, mode: RenderMode) -> Self { self.map(|p| p.render_mode = Some(mode)) }
    pub fn animation_duration(self, ms: u64) -> Self { self.map(|p| p.animation_duration = Some(ms)) }
    pub fn easing(self, easing: Easing) -> Self { self.map(|p| p.easing = Some(easing)) }
    pub fn loading_strategy(self, s: LoadingStrategy) -> Self { self.map(|p| p.loading_strategy = Some(s)) }
    pub fn preload_count(self, n: usize) -> Self { self.map(|p| p.preload_count = Some(n)) }
    pub fn responsive(self, on: bool) -> Self { self.map(|p| p.responsive = Some(on)) }
    pub fn background_color<S: Into<String>>(self, color: S) -> Self {
        self.map(|p| p.theme.get_or_insert_with(Default::default).background_color = Some(color.into()))
    }
    pub fn navigation(self, f: impl FnOnce(&mut NavigationPatch)) -> Self {
        self.map(|p| f(p.navigation.get_or_insert_with(Default::default)))
    }
    pub fn theme(self, f: impl FnOnce(&mut ThemePatch)) -> Self {
        self.map(|p| f(p.theme.get_or_insert_with(Default::default)))
    }

    pub fn is_empty(&self) -> bool {
        *self == SettingsPatch::default()
    }
}

/// Caller-facing configuration. Built with consuming setters and resolved once per engine.
#[derive(Clone, Default)]
pub struct FlipbookConfig {
    pub mount: Option<Arc<MountPoint>>,
    pub media: Option<MediaSource>,
    pub settings: SettingsPatch,
    pub callbacks: EventCallbacks,
    pub loader: Option<Arc<dyn ResourceLoader>>,
    pub driver: Option<Arc<dyn AnimationDriver>>,
}

impl fmt::Debug for FlipbookConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FlipbookConfig")
            .field("mount", &self.mount.as_ref().map(|m| m.id()))
            .field("media", &self.media)
            .field("settings", &self.settings)
            .field("custom_loader", &self.loader.is_some())
            .field("custom_driver", &self.driver.is_some())
            .finish()
    }
}

impl FlipbookConfig {
    pub fn new() -> Self {
        Self::default()
    }

    #[inline]
    fn map(mut self, f: impl FnOnce(&mut FlipbookConfig)) -> Self {
        f(&mut self);
        self
    }

    pub fn mount(self, mount: Arc<MountPoint>) -> Self { self.map(|c| c.mount = Some(mount)) }
    pub fn media(self, media: MediaSource) -> Self { self.map(|c| c.media = Some(media)) }
    pub fn settings(self, patch: SettingsPatch) -> Self { self.map(|c| c.settings = patch) }
    pub fn callbacks(self, callbacks: EventCallbacks) -> Self { self.map(|c| c.callbacks = callbacks) }
    pub fn loader(self, loader: Arc<dyn ResourceLoader>) -> Self { self.map(|c| c.loader = Some(loader)) }
    pub fn driver(self, driver: Arc<dyn AnimationDriver>) -> Self { self.map(|c| c.driver = Some(driver)) }

    /// Apply multiple changes in one go.
    pub fn with(self, f: impl FnOnce(&mut FlipbookConfig)) -> Self { self.map(f) }

    /// Validates and resolves the configuration against the mount point's capabilities.
    pub fn resolve(&self) -> Result<ResolvedConfig, FlipbookError> {
        let mount = self
            .mount
            .clone()
            .ok_or_else(|| FlipbookError::config("no mount point supplied"))?;
        let media = self
            .media
            .clone()
            .ok_or_else(|| FlipbookError::config("no media supplied"))?;

        settle(mount, media, FlipbookSettings::default().merged(&self.settings))
    }
}

fn settle(
    mount: Arc<MountPoint>,
    media: MediaSource,
    mut settings: FlipbookSettings,
) -> Result<ResolvedConfig, FlipbookError> {
    if media.is_empty() {
        return Err(FlipbookError::config("media source has no locators"));
    }
    settings.preload_count = settings.preload_count.max(1);

    let fallback = downgrade(settings.render_mode, &mount);
    if let Some(fb) = fallback {
        log::warn!(
            "{} rendering is unavailable on mount {}, falling back to {}",
            fb.requested,
            mount.id(),
            fb.used
        );
        settings.render_mode = fb.used;
    }

    Ok(ResolvedConfig {
        mount,
        media,
        settings,
        fallback,
    })
}

/// Record of a requested backend being substituted by the guaranteed one.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Fallback {
    pub requested: RenderMode,
    pub used: RenderMode,
}

/// Picks the backend to construct: a pure function of the requested mode and the capability probe.
pub fn downgrade(requested: RenderMode, mount: &MountPoint) -> Option<Fallback> {
    match requested {
        RenderMode::SceneGraph if !mount.supports_scene_graph() => Some(Fallback {
            requested,
            used: RenderMode::Layered,
        }),
        _ => None,
    }
}

/// Output of [`FlipbookConfig::resolve`].
#[derive(Debug, Clone)]
pub struct ResolvedConfig {
    pub mount: Arc<MountPoint>,
    pub media: MediaSource,
    pub settings: FlipbookSettings,
    pub fallback: Option<Fallback>,
}

impl ResolvedConfig {
    /// The render mode the caller asked for, before any downgrade.
    pub fn requested_mode(&self) -> RenderMode {
        self.fallback
            .map(|fb| fb.requested)
            .unwrap_or(self.settings.render_mode)
    }

    /// Resolves `update` on top of this configuration. Unset fields keep their current value;
    /// the capability probe runs again against the requested mode.
    ///
    /// A downgrade already in force (including one made when a backend failed to start)
    /// stays in force while the requested mode is unchanged.
    pub fn updated(&self, update: &ConfigUpdate) -> Result<ResolvedConfig, FlipbookError> {
        let media = update.media.clone().unwrap_or_else(|| self.media.clone());
        let requested = update.settings.render_mode.unwrap_or(self.requested_mode());
        let mut settings = self.settings.clone().merged(&update.settings);
        settings.render_mode = requested;

        let mut next = settle(self.mount.clone(), media, settings)?;
        if let Some(fb) = self.fallback.filter(|fb| fb.requested == requested) {
            next.settings.render_mode = fb.used;
            next.fallback = Some(fb);
        }
        Ok(next)
    }

    /// Whether moving to `next` requires a new engine rather than a live update.
    pub fn needs_rebuild(&self, next: &ResolvedConfig) -> bool {
        self.media != next.media || self.settings.render_mode != next.settings.render_mode
    }
}

/// Runtime change requested through `Flipbook::update_config`.
#[derive(Debug, Clone, Default)]
pub struct ConfigUpdate {
    pub media: Option<MediaSource>,
    pub settings: SettingsPatch,
}

impl ConfigUpdate {
    pub fn media(media: MediaSource) -> Self {
        Self {
            media: Some(media),
            settings: SettingsPatch::default(),
        }
    }

    pub fn settings(settings: SettingsPatch) -> Self {
        Self { media: None, settings }
    }
}
