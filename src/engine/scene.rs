//! Scene-graph engine.
//!
//! Every media item becomes one textured page mesh hinged on the spine. Pages are stacked
//! back to front by a small depth offset and only the current one is visible. A flip shows
//! the neighbouring page and rotates the turning page between its two resting angles (`0`
//! and `-PI`) with a [`Tween`] stepped from the driver's tick loop. A continuous render loop
//! draws the scene from `Ready` until disposal.
//!
//! GPU-side resources (textures, geometries, materials and the context itself) are released
//! exactly once, on a best-effort basis: a failing release is reported and the rest of the
//! teardown continues.

pub mod camera;

use crate::engine::animation::{FrameTick, TickControl, TickHandle, Tween};
use crate::engine::base::{EngineBase, EngineDeps};
use crate::engine::config::{FlipbookSettings, RenderMode, ResolvedConfig};
use crate::engine::errors::FlipbookError;
use crate::engine::events::{Direction, FlipbookEvent};
use crate::engine::input::{input_mask, key_action, spawn_input_worker, InputTarget, KeyAction};
use crate::engine::loading::{DecodedImage, LoadingProgress};
use crate::engine::mount::{InputEvent, InputKind, NodeId, NodeKind, Subscription, VisualNode};
use crate::engine::pagination::{single_page_info, PageInfo, Spread};
use crate::engine::{EngineId, EngineState, FlipbookEngine};
use crate::render::backend::{GeometryId, MaterialId, PageTransform, SceneContext, SceneFrame, TextureId};
use crate::render::Color;
use async_trait::async_trait;
use camera::{page_hit_u, page_model, Camera, PAGE_DEPTH_STEP, PAGE_HEIGHT, PAGE_WIDTH};
use std::f32::consts::PI;
use std::sync::{Arc, Mutex, MutexGuard};
use tokio::sync::{oneshot, watch};

/// Resting angle of a page that has been turned over.
const TURNED: f32 = -PI;

pub struct SceneEngine {
    shared: Arc<Shared>,
}

struct Shared {
    base: EngineBase,
    inner: Mutex<Inner>,
}

#[derive(Debug)]
struct PageMesh {
    texture: Option<TextureId>,
    geometry: Option<GeometryId>,
    material: Option<MaterialId>,
    /// Radians around the spine; `0` at rest on the right, `TURNED` on the left
    rotation: f32,
    depth: f32,
    visible: bool,
}

struct Inner {
    state: EngineState,
    settings: FlipbookSettings,
    /// Committed page index
    current: usize,
    context: Option<Box<dyn SceneContext>>,
    camera: Camera,
    clear_color: Color,
    pages: Vec<PageMesh>,
    canvas: Option<NodeId>,
    input_mask: InputKind,
    subscriptions: Vec<Subscription>,
    render_loop: Option<TickHandle>,
}

struct FlipPlan {
    direction: Direction,
    target: usize,
    turning: usize,
    tween: Tween,
}

fn clear_color(settings: &FlipbookSettings) -> Color {
    Color::from_hex(&settings.theme.background_color).unwrap_or(Color::BLACK)
}

impl Inner {
    /// Uploads one mesh per page. Pages created before a failure stay in `pages` so they
    /// can be released.
    fn build_pages(&mut self, images: &[DecodedImage]) -> anyhow::Result<()> {
        let ctx = self
            .context
            .as_mut()
            .ok_or_else(|| anyhow::anyhow!("scene context already released"))?;

        for (k, image) in images.iter().enumerate() {
            self.pages.push(PageMesh {
                texture: None,
                geometry: None,
                material: None,
                rotation: 0.0,
                depth: -(k as f32) * PAGE_DEPTH_STEP,
                visible: k == 0,
            });
            let page = self
                .pages
                .last_mut()
                .ok_or_else(|| anyhow::anyhow!("page arena is empty"))?;

            let texture = ctx.create_texture(image)?;
            page.texture = Some(texture);
            page.geometry = Some(ctx.create_geometry(PAGE_WIDTH, PAGE_HEIGHT)?);
            page.material = Some(ctx.create_material(texture)?);
        }
        Ok(())
    }

    /// Releases every page's material, geometry and texture. Returns what failed.
    fn release_pages(&mut self) -> Vec<String> {
        let mut warnings = Vec::new();
        let Some(ctx) = self.context.as_mut() else {
            self.pages.clear();
            return warnings;
        };

        for (k, page) in self.pages.iter_mut().enumerate() {
            if let Some(id) = page.material.take() {
                if let Err(e) = ctx.release_material(id) {
                    warnings.push(format!("page {k}: failed to release material: {e:#}"));
                }
            }
            if let Some(id) = page.geometry.take() {
                if let Err(e) = ctx.release_geometry(id) {
                    warnings.push(format!("page {k}: failed to release geometry: {e:#}"));
                }
            }
            if let Some(id) = page.texture.take() {
                if let Err(e) = ctx.release_texture(id) {
                    warnings.push(format!("page {k}: failed to release texture: {e:#}"));
                }
            }
        }
        self.pages.clear();
        warnings
    }

    fn transforms(&self) -> Vec<PageTransform> {
        self.pages
            .iter()
            .filter_map(|p| {
                Some(PageTransform {
                    geometry: p.geometry?,
                    material: p.material?,
                    model: page_model(p.rotation, p.depth),
                    visible: p.visible,
                })
            })
            .collect()
    }
}

impl SceneEngine {
    /// Claims the mount point, creates the scene context and attaches its canvas.
    ///
    /// Fails with a configuration error when the mount point has no graphics provider.
    pub fn new(resolved: &ResolvedConfig, deps: EngineDeps) -> Result<Self, FlipbookError> {
        let graphics = resolved
            .mount
            .graphics()
            .ok_or_else(|| FlipbookError::config("mount point offers no 3D graphics"))?;

        let base = EngineBase::new(resolved, deps)?;
        let vp = base.mount.viewport();
        let context = match graphics.create_context(vp.as_size()) {
            Ok(ctx) => ctx,
            Err(e) => {
                base.mount.release(base.id);
                return Err(FlipbookError::Backend(e));
            }
        };
        log::debug!("scene engine {}: context from {} ({})", base.id, graphics.name(), context.name());

        let settings = resolved.settings.clone();
        let canvas = base.mount.attach(
            VisualNode::new(NodeKind::Canvas, "flipbook-canvas")
                .with_bounds(vp.into())
                .with_background(settings.theme.background_color.clone()),
        );

        let shared = Arc::new(Shared {
            inner: Mutex::new(Inner {
                state: EngineState::Uninitialized,
                clear_color: clear_color(&settings),
                settings,
                current: 0,
                context: Some(context),
                camera: Camera::new(vp.aspect_ratio()),
                pages: Vec::new(),
                canvas: Some(canvas),
                input_mask: InputKind::empty(),
                subscriptions: Vec::new(),
                render_loop: None,
            }),
            base,
        });

        {
            let mut inner = shared.lock();
            shared.listen(&mut inner);
        }
        Ok(Self { shared })
    }

    async fn turn(&self, direction: Direction) {
        if let Some(done) = self.shared.start_flip(direction) {
            let _ = done.await;
        }
    }
}

impl Shared {
    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn set_state(&self, inner: &mut Inner, state: EngineState) {
        log::debug!("scene engine {}: {} -> {}", self.base.id, inner.state, state);
        inner.state = state;
        self.base.publish(&inner.state);
    }

    fn page_info(&self, inner: &Inner) -> PageInfo {
        single_page_info(&self.base.spreads, inner.current, self.base.total())
    }

    fn listen(self: &Arc<Self>, inner: &mut Inner) {
        // No arrows or page slots here: clicks are picked, drags are not used
        let mask = input_mask(&inner.settings.navigation, inner.settings.responsive)
            & (InputKind::KEYBOARD | InputKind::CLICK | InputKind::RESIZE);
        if mask == inner.input_mask && !inner.subscriptions.is_empty() {
            return;
        }
        inner.subscriptions.clear();
        inner.input_mask = mask;
        if let Some((sub, _worker)) = spawn_input_worker(
            &self.base.mount,
            mask,
            Arc::downgrade(self),
            self.base.cancel.clone(),
        ) {
            inner.subscriptions.push(sub);
        }
    }

    fn start_render_loop(self: &Arc<Self>, inner: &mut Inner) {
        let weak = Arc::downgrade(self);
        let frame = Box::new(move |_tick: FrameTick| match weak.upgrade() {
            Some(shared) => shared.render_frame(),
            None => TickControl::Stop,
        });
        inner.render_loop = Some(self.base.driver.tick_loop(frame, self.base.cancel.child_token()));
    }

    fn render_frame(&self) -> TickControl {
        let mut guard = self.lock();
        let inner = &mut *guard;
        if inner.state == EngineState::Disposed {
            return TickControl::Stop;
        }

        let pages = inner.transforms();
        let frame = SceneFrame {
            view_projection: inner.camera.view_projection(),
            clear_color: inner.clear_color,
            pages: &pages,
        };
        match inner.context.as_mut() {
            Some(ctx) => {
                if let Err(e) = ctx.render(&frame) {
                    log::warn!("scene engine {}: frame dropped: {:#}", self.base.id, e);
                }
                TickControl::Continue
            }
            None => TickControl::Stop,
        }
    }

    fn set_rotation(&self, page: usize, rotation: f32) {
        if let Some(p) = self.lock().pages.get_mut(page) {
            p.rotation = rotation;
        }
    }

    fn start_flip(self: &Arc<Self>, direction: Direction) -> Option<oneshot::Receiver<()>> {
        let plan = {
            let mut inner = self.lock();
            if inner.state != EngineState::Ready {
                log::debug!("scene engine {}: {} ignored while {}", self.base.id, direction, inner.state);
                return None;
            }
            let current = inner.current;
            let target = match direction {
                Direction::Next => current + 1,
                Direction::Prev => current.checked_sub(1)?,
            };
            if target >= inner.pages.len() {
                return None;
            }

            inner.pages[target].visible = true;
            let (turning, from, to) = match direction {
                Direction::Next => (current, 0.0, TURNED),
                Direction::Prev => (target, TURNED, 0.0),
            };
            let tween = Tween::new(from, to, inner.settings.flip_duration(), inner.settings.easing);
            self.set_state(&mut inner, EngineState::Flipping);
            FlipPlan {
                direction,
                target,
                turning,
                tween,
            }
        };

        self.base.events.emit(FlipbookEvent::AnimationStarted {
            direction: plan.direction,
        });

        let (done_tx, done_rx) = oneshot::channel();
        let weak = Arc::downgrade(self);
        let driver = self.base.driver.clone();
        let cancel = self.base.cancel.clone();
        tokio::spawn(async move {
            let (tween_tx, tween_rx) = oneshot::channel::<()>();
            let mut tween_tx = Some(tween_tx);
            let frame_weak = weak.clone();
            let (turning, tween) = (plan.turning, plan.tween);

            let ticker = driver.tick_loop(
                Box::new(move |tick: FrameTick| {
                    let Some(shared) = frame_weak.upgrade() else {
                        return TickControl::Stop;
                    };
                    shared.set_rotation(turning, tween.value_at(tick.elapsed));
                    if !tween.is_finished(tick.elapsed) {
                        return TickControl::Continue;
                    }
                    if let Some(tx) = tween_tx.take() {
                        let _ = tx.send(());
                    }
                    TickControl::Stop
                }),
                cancel.child_token(),
            );

            let finished = tokio::select! {
                res = tween_rx => res.is_ok(),
                _ = cancel.cancelled() => false,
            };
            drop(ticker);
            if !finished {
                return;
            }
            let Some(shared) = weak.upgrade() else {
                return;
            };
            shared.finish_flip(plan);
            let _ = done_tx.send(());
        });

        Some(done_rx)
    }

    fn finish_flip(&self, plan: FlipPlan) {
        let info = {
            let mut inner = self.lock();
            if inner.state != EngineState::Flipping {
                return;
            }
            let departing = inner.current;
            if let Some(p) = inner.pages.get_mut(plan.turning) {
                p.rotation = plan.tween.to;
            }
            if let Some(p) = inner.pages.get_mut(departing) {
                p.visible = false;
            }
            inner.current = plan.target;
            self.set_state(&mut inner, EngineState::Ready);
            self.page_info(&inner)
        };

        self.base.events.emit(FlipbookEvent::PageChanged(info));
        self.base.events.emit(FlipbookEvent::AnimationEnded);
    }

    fn jump(&self, index: usize) {
        let info = {
            let mut inner = self.lock();
            if inner.state != EngineState::Ready || index >= inner.pages.len() || index == inner.current {
                return;
            }
            for (k, page) in inner.pages.iter_mut().enumerate() {
                page.visible = k == index;
                page.rotation = if k < index { TURNED } else { 0.0 };
            }
            inner.current = index;
            self.page_info(&inner)
        };
        self.base.events.emit(FlipbookEvent::PageChanged(info));
    }

    /// Projects a pointer position into the scene. Left half of the visible page turns
    /// back, right half forward.
    fn pick(&self, x: f32, y: f32) -> Option<Direction> {
        let inner = self.lock();
        let page = inner.pages.get(inner.current).filter(|p| p.visible)?;
        let ray = inner.camera.ray_through(self.base.mount.viewport(), x, y)?;
        let u = page_hit_u(&ray, &page_model(page.rotation, page.depth))?;
        Some(if u < 0.5 { Direction::Prev } else { Direction::Next })
    }

    fn relayout(&self) {
        let mut guard = self.lock();
        let inner = &mut *guard;
        if inner.state == EngineState::Disposed {
            return;
        }
        let vp = self.base.mount.viewport();
        inner.camera.set_aspect(vp.aspect_ratio());
        if let Some(ctx) = inner.context.as_mut() {
            if let Err(e) = ctx.resize(vp.as_size()) {
                log::warn!("scene engine {}: resize failed: {:#}", self.base.id, e);
            }
        }
        if let Some(canvas) = inner.canvas {
            self.base.mount.update(canvas, |n| n.bounds = vp.into());
        }
    }

    fn fail(&self, err: FlipbookError) -> FlipbookError {
        let warnings = {
            let mut guard = self.lock();
            let inner = &mut *guard;
            if inner.state != EngineState::Loading {
                return err;
            }
            self.set_state(inner, EngineState::Failed(err.to_string()));
            inner.release_pages()
        };
        self.base.report_warnings(warnings);
        self.base.report_failure(&err);
        err
    }

    fn dispose(&self) {
        let warnings = {
            let mut guard = self.lock();
            let inner = &mut *guard;
            if inner.state == EngineState::Disposed {
                return;
            }
            self.set_state(inner, EngineState::Disposed);

            if let Some(render_loop) = inner.render_loop.take() {
                render_loop.cancel();
            }
            self.base.cancel.cancel();

            let mut warnings = inner.release_pages();
            if let Some(mut ctx) = inner.context.take() {
                ctx.lose_context();
            }
            if let Some(canvas) = inner.canvas.take() {
                if self.base.mount.detach(canvas).is_none() {
                    warnings.push(format!("canvas {canvas} was already detached"));
                }
            }
            inner.subscriptions.clear();
            self.base.mount.release(self.base.id);
            warnings
        };

        self.base.report_warnings(warnings);
        log::info!("scene engine {} disposed", self.base.id);
    }
}

impl InputTarget for Shared {
    fn handle_input(self: Arc<Self>, event: InputEvent) {
        let direction = match event {
            InputEvent::Key(key) => match key_action(&key) {
                Some(KeyAction::Turn(direction)) => Some(direction),
                Some(KeyAction::First) => {
                    self.jump(0);
                    None
                }
                Some(KeyAction::Last) => {
                    self.jump(self.base.total().saturating_sub(1));
                    None
                }
                None => None,
            },
            InputEvent::Click { x, y } => self.pick(x, y),
            InputEvent::Resize { .. } => {
                self.relayout();
                None
            }
            InputEvent::PointerDown { .. } | InputEvent::PointerUp { .. } | InputEvent::Activate { .. } => None,
        };
        if let Some(direction) = direction {
            let _ = self.start_flip(direction);
        }
    }
}

impl Drop for Shared {
    fn drop(&mut self) {
        self.dispose();
    }
}

#[async_trait]
impl FlipbookEngine for SceneEngine {
    fn id(&self) -> EngineId {
        self.shared.base.id
    }

    fn kind(&self) -> RenderMode {
        RenderMode::SceneGraph
    }

    async fn load(&self) -> Result<(), FlipbookError> {
        let shared = &self.shared;
        {
            let mut inner = shared.lock();
            match inner.state {
                EngineState::Uninitialized => shared.set_state(&mut inner, EngineState::Loading),
                EngineState::Disposed => return Err(FlipbookError::Disposed),
                _ => return Ok(()),
            }
        }

        let images = match shared.base.load_media().await {
            Ok(images) => images,
            Err(e) => return Err(shared.fail(e)),
        };

        let built = {
            let mut inner = shared.lock();
            if inner.state != EngineState::Loading {
                return Err(FlipbookError::Disposed);
            }
            inner.build_pages(&images)
        };
        // Pixel buffers are only needed until upload
        drop(images);
        if let Err(e) = built {
            return Err(shared.fail(FlipbookError::Backend(e)));
        }

        {
            let mut inner = shared.lock();
            if inner.state != EngineState::Loading {
                return Err(FlipbookError::Disposed);
            }
            inner.current = 0;
            shared.set_state(&mut inner, EngineState::Ready);
            shared.start_render_loop(&mut inner);
        }
        shared.base.report_ready();
        Ok(())
    }

    async fn next_page(&self) {
        self.turn(Direction::Next).await
    }

    async fn prev_page(&self) {
        self.turn(Direction::Prev).await
    }

    async fn go_to_page(&self, index: usize) {
        self.shared.jump(index)
    }

    fn current_page(&self) -> PageInfo {
        let inner = self.shared.lock();
        self.shared.page_info(&inner)
    }

    fn is_animating(&self) -> bool {
        self.shared.lock().state == EngineState::Flipping
    }

    fn loading_progress(&self) -> LoadingProgress {
        self.shared.base.progress()
    }

    fn state(&self) -> EngineState {
        self.shared.lock().state.clone()
    }

    fn watch_state(&self) -> watch::Receiver<EngineState> {
        self.shared.base.watch()
    }

    fn spreads(&self) -> Vec<Spread> {
        self.shared.base.spreads.clone()
    }

    fn resize(&self) {
        self.shared.relayout()
    }

    fn apply_settings(&self, settings: &FlipbookSettings) {
        let shared = &self.shared;
        let mut inner = shared.lock();
        if inner.state == EngineState::Disposed {
            return;
        }
        inner.settings = FlipbookSettings {
            render_mode: RenderMode::SceneGraph,
            ..settings.clone()
        };
        inner.clear_color = clear_color(&inner.settings);
        if let Some(canvas) = inner.canvas {
            let background = inner.settings.theme.background_color.clone();
            shared.base.mount.update(canvas, |n| n.background = Some(background));
        }
        shared.listen(&mut inner);
    }

    fn dispose(&self) {
        self.shared.dispose()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::animation::TokioDriver;
    use crate::engine::config::{FlipbookConfig, SettingsPatch};
    use crate::engine::events::{EventCallbacks, EventSink};
    use crate::engine::loading::testing::ScriptedLoader;
    use crate::engine::media::MediaSource;
    use crate::engine::mount::{Key, MountPoint};
    use crate::render::backend::SurfaceSize;
    use crate::render::backends::null::{NullGraphics, NullStats};
    use crate::render::Viewport;
    use std::time::Duration;
    use tokio::sync::broadcast;

    struct Fixture {
        engine: SceneEngine,
        mount: Arc<MountPoint>,
        gfx: Arc<NullGraphics>,
        stats: Arc<NullStats>,
        events: broadcast::Receiver<FlipbookEvent>,
    }

    fn fixture_with(pages: usize, loader: ScriptedLoader) -> Fixture {
        let gfx = Arc::new(NullGraphics::new());
        let stats = gfx.stats();
        let mount = MountPoint::with_graphics(Viewport::new(0, 0, 800, 600), gfx.clone());
        let resolved = FlipbookConfig::new()
            .mount(mount.clone())
            .media(MediaSource::images((0..pages).map(|i| format!("p{i}.png"))))
            .settings(SettingsPatch::default().render_mode(RenderMode::SceneGraph))
            .resolve()
            .unwrap();

        let sink = EventSink::new(EventCallbacks::default(), 256);
        let events = sink.subscribe();
        let deps = EngineDeps {
            events: sink,
            loader: Arc::new(loader),
            driver: Arc::new(TokioDriver::new()),
        };
        let engine = SceneEngine::new(&resolved, deps).unwrap();
        Fixture {
            engine,
            mount,
            gfx,
            stats,
            events,
        }
    }

    async fn ready(pages: usize) -> Fixture {
        let f = fixture_with(pages, ScriptedLoader::new());
        f.engine.load().await.unwrap();
        f
    }

    fn drain(rx: &mut broadcast::Receiver<FlipbookEvent>) -> Vec<FlipbookEvent> {
        let mut out = Vec::new();
        while let Ok(ev) = rx.try_recv() {
            out.push(ev);
        }
        out
    }

    fn visible(f: &Fixture) -> Vec<usize> {
        let inner = f.engine.shared.lock();
        inner
            .pages
            .iter()
            .enumerate()
            .filter(|(_, p)| p.visible)
            .map(|(k, _)| k)
            .collect()
    }

    fn rotation(f: &Fixture, page: usize) -> f32 {
        f.engine.shared.lock().pages[page].rotation
    }

    #[tokio::test(start_paused = true)]
    async fn load_builds_one_mesh_per_page() {
        let mut f = ready(3).await;
        assert_eq!(f.engine.state(), EngineState::Ready);
        assert_eq!(NullStats::get(&f.stats.textures_created), 3);
        assert_eq!(NullStats::get(&f.stats.geometries_created), 3);
        assert_eq!(NullStats::get(&f.stats.materials_created), 3);
        assert_eq!(visible(&f), vec![0]);
        assert_eq!(f.mount.find_by_class("flipbook-canvas").len(), 1);

        {
            let inner = f.engine.shared.lock();
            assert!(inner.pages[1].depth < inner.pages[0].depth);
            assert!(inner.pages[2].depth < inner.pages[1].depth);
        }

        let events = drain(&mut f.events);
        assert_eq!(events.last(), Some(&FlipbookEvent::Ready));

        tokio::time::sleep(Duration::from_millis(200)).await;
        assert!(NullStats::get(&f.stats.frames_rendered) > 5);
    }

    #[tokio::test(start_paused = true)]
    async fn next_and_prev_rotate_single_pages() {
        let mut f = ready(3).await;
        drain(&mut f.events);

        let flip = f.engine.next_page();
        tokio::pin!(flip);
        tokio::select! {
            _ = &mut flip => panic!("flip finished immediately"),
            _ = tokio::time::sleep(Duration::from_millis(400)) => {}
        }
        assert!(f.engine.is_animating());
        assert_eq!(visible(&f), vec![0, 1]);
        let mid = rotation(&f, 0);
        assert!(mid < 0.0 && mid > TURNED, "{mid}");
        assert_eq!(f.engine.current_page().index, 0);

        flip.await;
        assert_eq!(visible(&f), vec![1]);
        assert_eq!(rotation(&f, 0), TURNED);
        let info = f.engine.current_page();
        assert_eq!((info.index, info.spread_index), (1, 1));

        f.engine.prev_page().await;
        assert_eq!(visible(&f), vec![0]);
        assert_eq!(rotation(&f, 0), 0.0);
        assert_eq!(f.engine.current_page().index, 0);

        let events = drain(&mut f.events);
        let kinds: Vec<String> = events.iter().map(|e| e.to_string()).collect();
        assert_eq!(
            kinds,
            vec![
                "AnimationStarted: next",
                "PageChanged: page 2/3 (spread 2/3)",
                "AnimationEnded",
                "AnimationStarted: prev",
                "PageChanged: page 1/3 (spread 1/3)",
                "AnimationEnded",
            ]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn page_info_names_the_spread_showing_the_page() {
        let f = ready(5).await;
        let spreads = f.engine.spreads();

        let mut seen = Vec::new();
        for _ in 0..4 {
            f.engine.next_page().await;
            let info = f.engine.current_page();
            assert!(spreads[info.spread_index].contains(info.index), "{info:?}");
            seen.push((info.index, info.spread_index));
        }
        // [A] [B,C] [D] [E]
        assert_eq!(seen, vec![(1, 1), (2, 1), (3, 2), (4, 3)]);
        assert!(spreads[3].is_back_cover);
    }

    #[tokio::test(start_paused = true)]
    async fn bounds_and_double_next() {
        let f = ready(2).await;
        f.engine.prev_page().await;
        assert_eq!(f.engine.current_page().index, 0);

        tokio::join!(f.engine.next_page(), f.engine.next_page());
        assert_eq!(f.engine.current_page().index, 1);

        f.engine.next_page().await;
        assert_eq!(f.engine.current_page().index, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn go_to_page_swaps_visibility_without_animation() {
        let mut f = ready(5).await;
        drain(&mut f.events);

        f.engine.go_to_page(3).await;
        assert_eq!(visible(&f), vec![3]);
        assert_eq!(rotation(&f, 2), TURNED);
        assert_eq!(rotation(&f, 3), 0.0);
        assert_eq!(f.engine.current_page().spread_index, 2);

        f.engine.go_to_page(3).await;
        f.engine.go_to_page(5).await;

        let events = drain(&mut f.events);
        assert_eq!(events.len(), 1);
        assert!(matches!(events[0], FlipbookEvent::PageChanged(PageInfo { index: 3, .. })));
    }

    #[tokio::test(start_paused = true)]
    async fn picking_maps_halves_to_directions() {
        let f = ready(3).await;
        f.engine.go_to_page(1).await;
        assert_eq!(f.engine.shared.pick(300.0, 300.0), Some(Direction::Prev));
        assert_eq!(f.engine.shared.pick(500.0, 300.0), Some(Direction::Next));
        assert_eq!(f.engine.shared.pick(10.0, 300.0), None);

        f.mount.dispatch(InputEvent::Click { x: 500.0, y: 300.0 });
        tokio::time::sleep(Duration::from_secs(1)).await;
        assert_eq!(f.engine.current_page().index, 2);

        f.mount.dispatch(InputEvent::Key(Key::ArrowLeft));
        tokio::time::sleep(Duration::from_secs(1)).await;
        assert_eq!(f.engine.current_page().index, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn home_and_end_jump_to_first_and_last_page() {
        let f = ready(4).await;
        f.mount.dispatch(InputEvent::Key(Key::End));
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert_eq!(visible(&f), vec![3]);
        assert_eq!(f.engine.current_page().index, 3);
        assert!(!f.engine.is_animating());

        f.mount.dispatch(InputEvent::Key(Key::Home));
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert_eq!(visible(&f), vec![0]);
        assert_eq!(rotation(&f, 0), 0.0);
    }

    #[tokio::test(start_paused = true)]
    async fn resize_updates_projection_and_surface() {
        let f = ready(2).await;
        f.mount.set_size(1200, 600);
        tokio::time::sleep(Duration::from_millis(20)).await;

        let aspect = f.engine.shared.lock().camera.aspect();
        assert!((aspect - 2.0).abs() < 1e-5);
        assert_eq!(f.stats.last_size(), SurfaceSize { width: 1200, height: 600 });
        assert_eq!(NullStats::get(&f.stats.resizes), 1);
        assert_eq!(f.engine.current_page().index, 0);

        // Direct call as well
        f.engine.resize();
        assert_eq!(NullStats::get(&f.stats.resizes), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn dispose_releases_each_resource_once() {
        let f = ready(4).await;
        tokio::time::sleep(Duration::from_millis(50)).await;

        f.engine.dispose();
        f.engine.dispose();

        assert_eq!(f.stats.live_resources(), 0);
        assert_eq!(NullStats::get(&f.stats.textures_released), 4);
        assert_eq!(NullStats::get(&f.stats.geometries_released), 4);
        assert_eq!(NullStats::get(&f.stats.materials_released), 4);
        assert_eq!(NullStats::get(&f.stats.contexts_lost), 1);
        assert_eq!(f.mount.node_count(), 0);
        assert_eq!(f.mount.subscriber_count(), 0);
        assert_eq!(f.mount.owner(), None);

        let frames = NullStats::get(&f.stats.frames_rendered);
        tokio::time::sleep(Duration::from_millis(200)).await;
        assert_eq!(NullStats::get(&f.stats.frames_rendered), frames);
    }

    #[tokio::test(start_paused = true)]
    async fn failing_release_does_not_stop_teardown() {
        let mut f = ready(3).await;
        drain(&mut f.events);
        f.gfx.fail_texture_release(true);

        f.engine.dispose();

        assert_eq!(NullStats::get(&f.stats.materials_released), 3);
        assert_eq!(NullStats::get(&f.stats.geometries_released), 3);
        assert_eq!(NullStats::get(&f.stats.textures_released), 0);
        assert_eq!(NullStats::get(&f.stats.contexts_lost), 1);
        assert_eq!(f.mount.node_count(), 0);

        let warnings = drain(&mut f.events)
            .into_iter()
            .filter(|e| matches!(e, FlipbookEvent::Warning { .. }))
            .count();
        assert_eq!(warnings, 3);

        // Nothing is retried on a second dispose
        f.gfx.fail_texture_release(false);
        f.engine.dispose();
        assert_eq!(NullStats::get(&f.stats.textures_released), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn decode_failure_reports_once_and_creates_nothing() {
        let loader = ScriptedLoader::new().ok("p0.png", 5).fail("p1.png", 10, "truncated").ok("p2.png", 15);
        let mut f = fixture_with(3, loader);

        assert!(f.engine.load().await.is_err());
        assert!(matches!(f.engine.state(), EngineState::Failed(_)));
        assert_eq!(NullStats::get(&f.stats.textures_created), 0);
        assert_eq!(f.engine.loading_progress().loaded, 1);

        tokio::time::sleep(Duration::from_millis(50)).await;
        let events = drain(&mut f.events);
        assert_eq!(events.iter().filter(|e| matches!(e, FlipbookEvent::Error { .. })).count(), 1);
        assert!(!events.contains(&FlipbookEvent::Ready));
        assert_eq!(f.engine.loading_progress().loaded, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn dispose_mid_flip_never_commits() {
        let mut f = ready(3).await;
        drain(&mut f.events);

        let flip = f.engine.next_page();
        tokio::pin!(flip);
        tokio::select! {
            _ = &mut flip => panic!("flip finished immediately"),
            _ = tokio::time::sleep(Duration::from_millis(300)) => {}
        }
        f.engine.dispose();
        flip.await;
        tokio::time::sleep(Duration::from_secs(1)).await;

        assert!(!drain(&mut f.events).iter().any(|e| matches!(e, FlipbookEvent::PageChanged(_))));
        assert_eq!(f.stats.live_resources(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn mount_without_graphics_is_rejected() {
        let mount = MountPoint::new(Viewport::new(0, 0, 800, 600));
        let resolved = ResolvedConfig {
            mount: mount.clone(),
            media: MediaSource::image("a"),
            settings: FlipbookSettings::default(),
            fallback: None,
        };
        let deps = EngineDeps {
            events: EventSink::new(EventCallbacks::default(), 4),
            loader: Arc::new(ScriptedLoader::new()),
            driver: Arc::new(TokioDriver::new()),
        };
        assert!(matches!(
            SceneEngine::new(&resolved, deps),
            Err(FlipbookError::Configuration(_))
        ));
        assert_eq!(mount.owner(), None);
    }
}
