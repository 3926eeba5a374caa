//! The engine facade.
//!
//! A [`Flipbook`] resolves its configuration, owns exactly one backend engine at a time and
//! forwards the navigation API to it. Replacing the media list or the render mode tears the
//! running engine down completely before the next one is built on the same mount point.

use crate::engine::animation::{AnimationDriver, TokioDriver};
use crate::engine::base::EngineDeps;
use crate::engine::config::{ConfigUpdate, Fallback, FlipbookConfig, RenderMode, ResolvedConfig};
use crate::engine::errors::FlipbookError;
use crate::engine::events::{EventSink, FlipbookEvent};
use crate::engine::layered::LayeredEngine;
use crate::engine::loading::{ImageLoader, LoadingProgress, ResourceLoader};
use crate::engine::pagination::{PageInfo, Spread};
use crate::engine::scene::SceneEngine;
use crate::engine::{EngineState, FlipbookEngine, DEFAULT_CHANNEL_CAPACITY};
use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};
use tokio::sync::broadcast;
use tokio::task::JoinHandle;

struct Active {
    engine: Arc<dyn FlipbookEngine>,
    resolved: ResolvedConfig,
    load: JoinHandle<()>,
    destroyed: bool,
}

/// A paginated image book bound to one mount point.
///
/// Must be created inside a tokio runtime: loading, flips and the render loop run as tasks.
pub struct Flipbook {
    active: RwLock<Active>,
    events: EventSink,
    loader: Arc<dyn ResourceLoader>,
    driver: Arc<dyn AnimationDriver>,
}

impl std::fmt::Debug for Flipbook {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let active = self.read();
        f.debug_struct("Flipbook")
            .field("engine", &active.engine.id())
            .field("render_mode", &active.engine.kind())
            .field("state", &active.engine.state())
            .field("destroyed", &active.destroyed)
            .finish()
    }
}

impl Flipbook {
    /// Validates `config`, builds the backend and starts loading.
    ///
    /// Returns once the engine exists; use [`ready`](Self::ready) to wait for the first spread.
    pub fn new(config: FlipbookConfig) -> Result<Self, FlipbookError> {
        let mut resolved = config.resolve()?;

        let events = EventSink::new(config.callbacks.clone(), DEFAULT_CHANNEL_CAPACITY);
        let loader = config
            .loader
            .clone()
            .unwrap_or_else(|| Arc::new(ImageLoader::new()) as Arc<dyn ResourceLoader>);
        let driver = config
            .driver
            .clone()
            .unwrap_or_else(|| Arc::new(TokioDriver::new()) as Arc<dyn AnimationDriver>);

        let deps = EngineDeps {
            events: events.clone(),
            loader: loader.clone(),
            driver: driver.clone(),
        };
        let engine = construct(&mut resolved, deps)?;
        let load = spawn_load(engine.clone(), events.clone(), resolved.fallback);
        log::info!(
            "flipbook created with {} engine {} ({} pages)",
            engine.kind(),
            engine.id(),
            resolved.media.len()
        );

        Ok(Self {
            active: RwLock::new(Active {
                engine,
                resolved,
                load,
                destroyed: false,
            }),
            events,
            loader,
            driver,
        })
    }

    fn read(&self) -> RwLockReadGuard<'_, Active> {
        self.active.read().unwrap_or_else(|e| e.into_inner())
    }

    fn write(&self) -> RwLockWriteGuard<'_, Active> {
        self.active.write().unwrap_or_else(|e| e.into_inner())
    }

    fn engine(&self) -> Arc<dyn FlipbookEngine> {
        self.read().engine.clone()
    }

    /// Waits until the current engine shows its first spread or page.
    ///
    /// Fails when loading fails or the engine is torn down first.
    pub async fn ready(&self) -> Result<(), FlipbookError> {
        let mut rx = self.engine().watch_state();
        let state = rx
            .wait_for(|s| !matches!(s, EngineState::Uninitialized | EngineState::Loading))
            .await
            .map_err(|_| FlipbookError::Disposed)?
            .clone();

        match state {
            EngineState::Ready | EngineState::Flipping => Ok(()),
            EngineState::Failed(reason) => Err(FlipbookError::Initialization(reason)),
            _ => Err(FlipbookError::Disposed),
        }
    }

    pub fn subscribe_events(&self) -> broadcast::Receiver<FlipbookEvent> {
        self.events.subscribe()
    }

    pub fn state(&self) -> EngineState {
        self.engine().state()
    }

    /// Backend in use, after any capability downgrade.
    pub fn render_mode(&self) -> RenderMode {
        self.engine().kind()
    }

    pub fn fallback(&self) -> Option<Fallback> {
        self.read().resolved.fallback
    }

    pub fn spreads(&self) -> Vec<Spread> {
        self.engine().spreads()
    }

    // ****************************************
    // ** Navigation

    pub async fn next_page(&self) {
        self.engine().next_page().await
    }

    pub async fn prev_page(&self) {
        self.engine().prev_page().await
    }

    pub async fn go_to_page(&self, index: usize) {
        self.engine().go_to_page(index).await
    }

    pub fn get_current_page(&self) -> PageInfo {
        self.engine().current_page()
    }

    pub fn is_animating(&self) -> bool {
        self.engine().is_animating()
    }

    pub fn get_loading_progress(&self) -> LoadingProgress {
        self.engine().loading_progress()
    }

    pub fn resize(&self) {
        self.engine().resize()
    }

    // ****************************************
    // ** Lifecycle

    /// Applies a partial configuration change.
    ///
    /// A new media list or a different render mode replaces the engine: the old one is fully
    /// disposed first, then a new one is built and starts loading. Anything else is applied
    /// to the running engine.
    ///
    /// If the replacement cannot be built the book ends up destroyed, as after [`destroy`].
    ///
    /// [`destroy`]: Flipbook::destroy
    pub fn update_config(&self, update: ConfigUpdate) -> Result<(), FlipbookError> {
        let (old, new) = {
            let mut active = self.write();
            if active.destroyed {
                return Err(FlipbookError::Disposed);
            }

            let mut next = active.resolved.updated(&update)?;
            if !active.resolved.needs_rebuild(&next) {
                active.engine.apply_settings(&next.settings);
                active.resolved = next;
                log::debug!("flipbook settings updated in place");
                return Ok(());
            }

            let old = active.engine.kind();
            active.engine.dispose();
            active.load.abort();

            let deps = EngineDeps {
                events: self.events.clone(),
                loader: self.loader.clone(),
                driver: self.driver.clone(),
            };
            let engine = match construct(&mut next, deps) {
                Ok(engine) => engine,
                Err(e) => {
                    active.destroyed = true;
                    drop(active);
                    log::error!("failed to rebuild flipbook engine, flipbook destroyed: {}", e);
                    self.events.emit(FlipbookEvent::Disposed);
                    return Err(e);
                }
            };
            active.load = spawn_load(engine.clone(), self.events.clone(), next.fallback);
            log::info!("flipbook engine replaced by {} engine {}", engine.kind(), engine.id());
            active.engine = engine;
            active.resolved = next;
            (old, active.engine.kind())
        };

        self.events.emit(FlipbookEvent::BackendChanged { old, new });
        Ok(())
    }

    /// Tears the engine down. Safe to call any number of times.
    pub fn destroy(&self) {
        let engine = {
            let mut active = self.write();
            if active.destroyed {
                return;
            }
            active.destroyed = true;
            active.load.abort();
            active.engine.clone()
        };

        engine.dispose();
        log::info!("flipbook destroyed");
        self.events.emit(FlipbookEvent::Disposed);
    }
}

impl Drop for Flipbook {
    fn drop(&mut self) {
        self.destroy();
    }
}

/// Builds the engine `resolved` asks for. A scene-graph engine whose context cannot be
/// created is replaced by a layered one and the downgrade is recorded in `resolved`.
fn construct(
    resolved: &mut ResolvedConfig,
    deps: EngineDeps,
) -> Result<Arc<dyn FlipbookEngine>, FlipbookError> {
    match resolved.settings.render_mode {
        RenderMode::Layered => Ok(Arc::new(LayeredEngine::new(resolved, deps)?)),
        RenderMode::SceneGraph => match SceneEngine::new(resolved, deps.clone()) {
            Ok(engine) => Ok(Arc::new(engine)),
            Err(FlipbookError::Backend(e)) => {
                log::warn!("scene-graph context unavailable, falling back to layered: {:#}", e);
                resolved.fallback = Some(Fallback {
                    requested: RenderMode::SceneGraph,
                    used: RenderMode::Layered,
                });
                resolved.settings.render_mode = RenderMode::Layered;
                Ok(Arc::new(LayeredEngine::new(resolved, deps)?))
            }
            Err(e) => Err(e),
        },
    }
}

fn spawn_load(
    engine: Arc<dyn FlipbookEngine>,
    events: EventSink,
    fallback: Option<Fallback>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        // Ahead of any load event, so subscribers attached right after construction see it
        if let Some(fb) = fallback {
            events.emit(FlipbookEvent::CapabilityFallback {
                requested: fb.requested,
                used: fb.used,
            });
        }
        if let Err(e) = engine.load().await {
            log::debug!("engine {} did not become ready: {}", engine.id(), e);
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::config::SettingsPatch;
    use crate::engine::events::EventCallbacks;
    use crate::engine::loading::testing::ScriptedLoader;
    use crate::engine::media::MediaSource;
    use crate::engine::mount::MountPoint;
    use crate::render::backend::{GraphicsProvider, SceneContext, SurfaceSize};
    use crate::render::backends::null::{NullGraphics, NullStats};
    use crate::render::Viewport;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::{Mutex, OnceLock, Weak};

    fn pages(n: usize) -> MediaSource {
        MediaSource::images((0..n).map(|i| format!("p{i}.png")))
    }

    fn config(mount: Arc<MountPoint>, media: MediaSource) -> FlipbookConfig {
        FlipbookConfig::new()
            .mount(mount)
            .media(media)
            .loader(Arc::new(ScriptedLoader::new()))
    }

    fn mount_2d() -> Arc<MountPoint> {
        MountPoint::new(Viewport::new(0, 0, 800, 600))
    }

    fn drain(rx: &mut broadcast::Receiver<FlipbookEvent>) -> Vec<FlipbookEvent> {
        let mut out = Vec::new();
        while let Ok(ev) = rx.try_recv() {
            out.push(ev);
        }
        out
    }

    #[tokio::test(start_paused = true)]
    async fn missing_capability_falls_back_to_layered() {
        let mount = mount_2d();
        let fb = Flipbook::new(config(mount.clone(), pages(4))).unwrap();
        let mut events = fb.subscribe_events();
        fb.ready().await.unwrap();

        assert_eq!(fb.render_mode(), RenderMode::Layered);
        assert_eq!(
            fb.fallback(),
            Some(Fallback {
                requested: RenderMode::SceneGraph,
                used: RenderMode::Layered
            })
        );
        let seen = drain(&mut events);
        assert_eq!(
            seen.first(),
            Some(&FlipbookEvent::CapabilityFallback {
                requested: RenderMode::SceneGraph,
                used: RenderMode::Layered
            })
        );
        assert_eq!(seen.last(), Some(&FlipbookEvent::Ready));

        // Behaves as a plain layered book
        assert_eq!(mount.find_by_class("flipbook--layered").len(), 1);
        fb.next_page().await;
        let info = fb.get_current_page();
        assert_eq!((info.index, info.spread_index), (1, 1));
        assert_eq!(fb.spreads().len(), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn scene_graph_used_when_available() {
        let gfx = Arc::new(NullGraphics::new());
        let stats = gfx.stats();
        let mount = MountPoint::with_graphics(Viewport::new(0, 0, 800, 600), gfx);
        let fb = Flipbook::new(config(mount.clone(), pages(3))).unwrap();
        fb.ready().await.unwrap();

        assert_eq!(fb.render_mode(), RenderMode::SceneGraph);
        assert_eq!(fb.fallback(), None);
        assert_eq!(mount.find_by_class("flipbook-canvas").len(), 1);

        fb.next_page().await;
        assert_eq!(fb.get_current_page().index, 1);

        fb.destroy();
        assert_eq!(stats.live_resources(), 0);
        assert_eq!(NullStats::get(&stats.contexts_lost), 1);
    }

    struct BrokenGraphics;

    impl GraphicsProvider for BrokenGraphics {
        fn name(&self) -> &str {
            "BrokenGraphics"
        }

        fn supports_scene_graph(&self) -> bool {
            true
        }

        fn create_context(&self, _size: SurfaceSize) -> anyhow::Result<Box<dyn SceneContext>> {
            anyhow::bail!("no adapter found")
        }
    }

    #[tokio::test(start_paused = true)]
    async fn context_failure_falls_back_at_construction() {
        let mount = MountPoint::with_graphics(Viewport::new(0, 0, 800, 600), Arc::new(BrokenGraphics));
        let fb = Flipbook::new(config(mount.clone(), pages(2))).unwrap();
        let mut events = fb.subscribe_events();
        fb.ready().await.unwrap();

        assert_eq!(fb.render_mode(), RenderMode::Layered);
        assert!(fb.fallback().is_some());
        assert!(drain(&mut events)
            .iter()
            .any(|e| matches!(e, FlipbookEvent::CapabilityFallback { .. })));
    }

    #[tokio::test(start_paused = true)]
    async fn construction_fallback_holds_across_theme_updates() {
        let mount = MountPoint::with_graphics(Viewport::new(0, 0, 800, 600), Arc::new(BrokenGraphics));
        let fb = Flipbook::new(config(mount.clone(), pages(6))).unwrap();
        let mut events = fb.subscribe_events();
        fb.ready().await.unwrap();
        fb.next_page().await;
        let owner = mount.owner();
        drain(&mut events);

        fb.update_config(ConfigUpdate::settings(SettingsPatch::default().background_color("#fff")))
            .unwrap();

        assert_eq!(fb.get_current_page().index, 1);
        assert_eq!(mount.owner(), owner);
        assert_eq!(fb.render_mode(), RenderMode::Layered);
        assert!(fb.fallback().is_some());
        assert!(!drain(&mut events)
            .iter()
            .any(|e| matches!(e, FlipbookEvent::BackendChanged { .. })));
        let container = mount.find_by_class("flipbook--layered")[0];
        assert_eq!(mount.node(container).unwrap().background.as_deref(), Some("#fff"));
    }

    /// Hands the mount to a foreign owner while a context is being created, so neither
    /// backend can claim it.
    #[derive(Default)]
    struct StealingGraphics {
        mount: OnceLock<Weak<MountPoint>>,
    }

    impl GraphicsProvider for StealingGraphics {
        fn name(&self) -> &str {
            "StealingGraphics"
        }

        fn supports_scene_graph(&self) -> bool {
            true
        }

        fn create_context(&self, _size: SurfaceSize) -> anyhow::Result<Box<dyn SceneContext>> {
            if let Some(mount) = self.mount.get().and_then(Weak::upgrade) {
                if let Some(owner) = mount.owner() {
                    mount.release(owner);
                }
                mount.claim(crate::engine::EngineId::new())?;
            }
            anyhow::bail!("device lost")
        }
    }

    #[tokio::test(start_paused = true)]
    async fn failed_rebuild_leaves_the_book_destroyed() {
        let gfx = Arc::new(StealingGraphics::default());
        let mount = MountPoint::with_graphics(Viewport::new(0, 0, 800, 600), gfx.clone());
        gfx.mount.set(Arc::downgrade(&mount)).unwrap();
        let fb = Flipbook::new(
            config(mount.clone(), pages(3))
                .settings(SettingsPatch::default().render_mode(RenderMode::Layered)),
        )
        .unwrap();
        let mut events = fb.subscribe_events();
        fb.ready().await.unwrap();
        drain(&mut events);

        let err = fb
            .update_config(ConfigUpdate::settings(
                SettingsPatch::default().render_mode(RenderMode::SceneGraph),
            ))
            .unwrap_err();
        assert!(matches!(err, FlipbookError::MountBusy));
        assert_eq!(fb.state(), EngineState::Disposed);
        assert!(matches!(fb.ready().await, Err(FlipbookError::Disposed)));
        assert!(matches!(
            fb.update_config(ConfigUpdate::media(pages(1))),
            Err(FlipbookError::Disposed)
        ));

        fb.destroy();
        let disposed = drain(&mut events)
            .into_iter()
            .filter(|e| *e == FlipbookEvent::Disposed)
            .count();
        assert_eq!(disposed, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn one_failed_item_fails_the_whole_load() {
        let errors = Arc::new(Mutex::new(Vec::new()));
        let readies = Arc::new(AtomicUsize::new(0));
        let callbacks = {
            let errors = errors.clone();
            let readies = readies.clone();
            EventCallbacks::new()
                .on_error(move |msg| errors.lock().unwrap().push(msg))
                .on_ready(move || {
                    readies.fetch_add(1, Ordering::SeqCst);
                })
        };
        let loader = ScriptedLoader::new().ok("a.png", 5).ok("b.png", 10).fail("c.png", 20, "404");
        let fb = Flipbook::new(
            FlipbookConfig::new()
                .mount(mount_2d())
                .media(MediaSource::images(["a.png", "b.png", "c.png"]))
                .loader(Arc::new(loader))
                .callbacks(callbacks),
        )
        .unwrap();

        let err = fb.ready().await.unwrap_err();
        assert!(matches!(err, FlipbookError::Initialization(_)));
        assert!(err.to_string().contains("c.png"));

        let errors = errors.lock().unwrap().clone();
        assert_eq!(errors.len(), 1);
        assert!(errors[0].contains("c.png"));
        assert_eq!(readies.load(Ordering::SeqCst), 0);
        assert_eq!(fb.get_loading_progress().loaded, 2);

        // Navigation on a failed book does nothing
        fb.next_page().await;
        assert_eq!(fb.get_current_page().index, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn destroy_twice_releases_once() {
        let mount = mount_2d();
        let fb = Flipbook::new(config(mount.clone(), pages(3))).unwrap();
        let mut events = fb.subscribe_events();
        fb.ready().await.unwrap();

        fb.destroy();
        fb.destroy();

        assert_eq!(fb.state(), EngineState::Disposed);
        assert_eq!(mount.node_count(), 0);
        assert_eq!(mount.subscriber_count(), 0);
        assert_eq!(mount.owner(), None);
        let disposed = drain(&mut events)
            .into_iter()
            .filter(|e| *e == FlipbookEvent::Disposed)
            .count();
        assert_eq!(disposed, 1);

        fb.next_page().await;
        assert!(matches!(
            fb.update_config(ConfigUpdate::media(pages(1))),
            Err(FlipbookError::Disposed)
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn destroy_during_load_never_reports_ready() {
        let readies = Arc::new(AtomicUsize::new(0));
        let r = readies.clone();
        let fb = Flipbook::new(
            config(mount_2d(), pages(3)).callbacks(EventCallbacks::new().on_ready(move || {
                r.fetch_add(1, Ordering::SeqCst);
            })),
        )
        .unwrap();

        tokio::task::yield_now().await;
        fb.destroy();
        assert!(matches!(fb.ready().await, Err(FlipbookError::Disposed)));
        tokio::time::sleep(std::time::Duration::from_secs(1)).await;
        assert_eq!(readies.load(Ordering::SeqCst), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn theme_change_is_applied_live() {
        let mount = mount_2d();
        let fb = Flipbook::new(config(mount.clone(), pages(3))).unwrap();
        let mut events = fb.subscribe_events();
        fb.ready().await.unwrap();
        fb.next_page().await;
        drain(&mut events);

        fb.update_config(ConfigUpdate::settings(
            SettingsPatch::default().background_color("#ffffff"),
        ))
        .unwrap();

        let container = mount.find_by_class("flipbook--layered")[0];
        assert_eq!(mount.node(container).unwrap().background.as_deref(), Some("#ffffff"));
        assert_eq!(fb.get_current_page().index, 1);
        assert!(drain(&mut events).is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn new_media_rebuilds_the_engine() {
        let mount = mount_2d();
        let fb = Flipbook::new(config(mount.clone(), pages(3))).unwrap();
        let mut events = fb.subscribe_events();
        fb.ready().await.unwrap();
        fb.next_page().await;
        let old_owner = mount.owner();
        drain(&mut events);

        fb.update_config(ConfigUpdate::media(pages(6))).unwrap();
        fb.ready().await.unwrap();

        assert_eq!(fb.spreads().len(), 4);
        assert_eq!(fb.get_current_page().index, 0);
        assert_ne!(mount.owner(), old_owner);
        assert_eq!(mount.find_by_class("flipbook--layered").len(), 1);
        assert_eq!(mount.subscriber_count(), 1);

        let seen = drain(&mut events);
        assert_eq!(
            seen.first(),
            Some(&FlipbookEvent::BackendChanged {
                old: RenderMode::Layered,
                new: RenderMode::Layered
            })
        );
        assert_eq!(seen.last(), Some(&FlipbookEvent::Ready));
    }

    #[tokio::test(start_paused = true)]
    async fn render_mode_change_swaps_backends() {
        let gfx = Arc::new(NullGraphics::new());
        let stats = gfx.stats();
        let mount = MountPoint::with_graphics(Viewport::new(0, 0, 800, 600), gfx);
        let fb = Flipbook::new(
            config(mount.clone(), pages(2)).settings(SettingsPatch::default().render_mode(RenderMode::Layered)),
        )
        .unwrap();
        fb.ready().await.unwrap();
        assert_eq!(fb.render_mode(), RenderMode::Layered);

        fb.update_config(ConfigUpdate::settings(
            SettingsPatch::default().render_mode(RenderMode::SceneGraph),
        ))
        .unwrap();
        fb.ready().await.unwrap();

        assert_eq!(fb.render_mode(), RenderMode::SceneGraph);
        assert!(mount.find_by_class("flipbook--layered").is_empty());
        assert_eq!(mount.find_by_class("flipbook-canvas").len(), 1);
        assert_eq!(NullStats::get(&stats.textures_created), 2);

        drop(fb);
        assert_eq!(stats.live_resources(), 0);
        assert_eq!(mount.node_count(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn callbacks_may_call_back_into_the_book() {
        let book: Arc<OnceLock<Weak<Flipbook>>> = Arc::new(OnceLock::new());
        let seen = Arc::new(Mutex::new(Vec::new()));
        let callbacks = {
            let book = book.clone();
            let seen = seen.clone();
            EventCallbacks::new().on_page_change(move |info| {
                if let Some(fb) = book.get().and_then(Weak::upgrade) {
                    let current = fb.get_current_page();
                    seen.lock().unwrap().push((info.index, current.index, fb.is_animating()));
                }
            })
        };

        let fb = Arc::new(Flipbook::new(config(mount_2d(), pages(5)).callbacks(callbacks)).unwrap());
        let _ = book.set(Arc::downgrade(&fb));
        fb.ready().await.unwrap();

        fb.next_page().await;
        fb.go_to_page(4).await;

        assert_eq!(*seen.lock().unwrap(), vec![(1, 1, false), (3, 3, false)]);
    }
}
