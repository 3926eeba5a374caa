//! Layered-surface engine.
//!
//! Shows one [`Spread`] at a time as two flat page slots inside a container node. A flip
//! attaches a transient overlay showing the departing face, waits one animation duration on
//! the [`AnimationDriver`](crate::animation::AnimationDriver) and then commits the neighbouring
//! spread. Direct jumps swap the slots immediately.
//!
//! All state lives behind one mutex that is never held across an await or while events are
//! emitted, so callbacks are free to call back into the engine.

use crate::engine::base::{EngineBase, EngineDeps};
use crate::engine::config::{FlipbookSettings, RenderMode, ResolvedConfig};
use crate::engine::errors::FlipbookError;
use crate::engine::events::{Direction, FlipbookEvent};
use crate::engine::input::{input_mask, key_action, spawn_input_worker, InputTarget, KeyAction, SwipeTracker};
use crate::engine::loading::{DecodedImage, LoadingProgress};
use crate::engine::mount::{InputEvent, InputKind, MountPoint, NodeId, NodeKind, Rect, Slot, Subscription, VisualNode};
use crate::engine::pagination::{spread_for_page, spread_page_info, PageInfo, Spread};
use crate::engine::{EngineId, EngineState, FlipbookEngine};
use crate::render::Viewport;
use async_trait::async_trait;
use std::sync::{Arc, Mutex, MutexGuard};
use tokio::sync::{oneshot, watch};

const INDICATOR_HEIGHT: f32 = 32.0;
const ARROW_SIZE: f32 = 48.0;

pub struct LayeredEngine {
    shared: Arc<Shared>,
}

struct Shared {
    base: EngineBase,
    inner: Mutex<Inner>,
}

#[derive(Default)]
struct Nodes {
    container: Option<NodeId>,
    left: Option<NodeId>,
    right: Option<NodeId>,
    flipping: Option<NodeId>,
    indicator: Option<NodeId>,
    prev_arrow: Option<NodeId>,
    next_arrow: Option<NodeId>,
}

impl Nodes {
    fn drain(&mut self) -> Vec<NodeId> {
        // Children first, container last
        [
            self.flipping.take(),
            self.left.take(),
            self.right.take(),
            self.indicator.take(),
            self.prev_arrow.take(),
            self.next_arrow.take(),
            self.container.take(),
        ]
        .into_iter()
        .flatten()
        .collect()
    }
}

struct Inner {
    state: EngineState,
    settings: FlipbookSettings,
    /// Committed spread index
    current: usize,
    /// Decoded pages, indexed by media position. Slots display by locator; the bitmaps are
    /// only held so they live exactly as long as the engine and are freed on disposal.
    images: Vec<DecodedImage>,
    nodes: Nodes,
    input_mask: InputKind,
    subscriptions: Vec<Subscription>,
    swipe: SwipeTracker,
}

struct FlipPlan {
    direction: Direction,
    target: usize,
}

fn slot_rect(vp: Viewport, slot: Slot) -> Rect {
    let half = vp.width as f32 / 2.0;
    let height = vp.height as f32;
    match slot {
        Slot::Left => Rect::new(0.0, 0.0, half, height),
        Slot::Right => Rect::new(half, 0.0, half, height),
    }
}

fn container_class(settings: &FlipbookSettings, loading: bool) -> String {
    let mut classes = vec!["flipbook", "flipbook--layered"];
    if loading {
        classes.push("flipbook--loading");
    }
    if settings.theme.spine {
        classes.push("flipbook--spine");
    }
    classes.join(" ")
}

fn page_class(slot: Slot, spread: &Spread, occupied: bool, shadow: bool) -> String {
    let mut classes = vec![
        "flipbook-page",
        match slot {
            Slot::Left => "flipbook-page--left",
            Slot::Right => "flipbook-page--right",
        },
    ];
    if !occupied {
        classes.push("flipbook-page--empty");
    } else {
        if spread.is_front_cover || spread.is_back_cover {
            classes.push("flipbook-page--cover");
        }
        if shadow {
            classes.push("flipbook-page--shadow");
        }
    }
    classes.join(" ")
}

/// Replaces the node in `slot`, attaching a new one if there is none yet.
fn upsert(mount: &MountPoint, slot: &mut Option<NodeId>, node: VisualNode) {
    match *slot {
        Some(id) if mount.node(id).is_some() => {
            mount.update(id, |n| *n = node);
        }
        _ => *slot = Some(mount.attach(node)),
    }
}

fn remove(mount: &MountPoint, slot: &mut Option<NodeId>) {
    if let Some(id) = slot.take() {
        mount.detach(id);
    }
}

impl LayeredEngine {
    /// Claims the mount point and attaches the (still loading) container.
    pub fn new(resolved: &ResolvedConfig, deps: EngineDeps) -> Result<Self, FlipbookError> {
        let base = EngineBase::new(resolved, deps)?;
        let settings = resolved.settings.clone();

        let container = base.mount.attach(
            VisualNode::new(NodeKind::Container, container_class(&settings, true))
                .with_bounds(base.mount.viewport().into())
                .with_background(settings.theme.background_color.clone()),
        );

        let shared = Arc::new(Shared {
            base,
            inner: Mutex::new(Inner {
                state: EngineState::Uninitialized,
                settings,
                current: 0,
                images: Vec::new(),
                nodes: Nodes {
                    container: Some(container),
                    ..Default::default()
                },
                input_mask: InputKind::empty(),
                subscriptions: Vec::new(),
                swipe: SwipeTracker::default(),
            }),
        });

        {
            let mut inner = shared.lock();
            shared.listen(&mut inner);
        }

        log::debug!(
            "layered engine {} created with {} spreads",
            shared.base.id,
            shared.base.spreads.len()
        );
        Ok(Self { shared })
    }

    /// Node ids of the prev/next arrows, when shown.
    pub fn arrow_nodes(&self) -> (Option<NodeId>, Option<NodeId>) {
        let inner = self.shared.lock();
        (inner.nodes.prev_arrow, inner.nodes.next_arrow)
    }

    async fn turn(&self, direction: Direction) {
        if let Some(done) = self.shared.start_flip(direction) {
            // Sender dropped means the engine was disposed mid-flip
            let _ = done.await;
        }
    }
}

impl Shared {
    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn set_state(&self, inner: &mut Inner, state: EngineState) {
        log::debug!("layered engine {}: {} -> {}", self.base.id, inner.state, state);
        inner.state = state;
        self.base.publish(&inner.state);
    }

    fn page_info(&self, inner: &Inner) -> PageInfo {
        spread_page_info(&self.base.spreads, inner.current, self.base.total())
    }

    /// (Re)subscribes to the mount point for the inputs the current settings enable.
    fn listen(self: &Arc<Self>, inner: &mut Inner) {
        let mask = input_mask(&inner.settings.navigation, inner.settings.responsive);
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

    /// Lays out both slots of the committed spread plus indicator and arrows.
    fn render(&self, inner: &mut Inner) {
        let mount = &self.base.mount;
        let vp = mount.viewport();

        if let Some(container) = inner.nodes.container {
            let class = container_class(&inner.settings, false);
            let background = inner.settings.theme.background_color.clone();
            mount.update(container, |n| {
                n.class_name = class;
                n.bounds = vp.into();
                n.background = Some(background);
            });
        }

        let Some(spread) = self.base.spreads.get(inner.current) else {
            return;
        };
        let shadow = inner.settings.theme.page_shadow;
        for slot in [Slot::Left, Slot::Right] {
            let locator = match slot {
                Slot::Left => spread.left_locator.clone(),
                Slot::Right => spread.right_locator.clone(),
            };
            let node = VisualNode::new(
                NodeKind::Page(slot),
                page_class(slot, spread, locator.is_some(), shadow),
            )
            .with_bounds(slot_rect(vp, slot))
            .with_image(locator);

            let target = match slot {
                Slot::Left => &mut inner.nodes.left,
                Slot::Right => &mut inner.nodes.right,
            };
            upsert(mount, target, node);
        }

        self.render_chrome(inner, vp);
    }

    fn render_chrome(&self, inner: &mut Inner, vp: Viewport) {
        let mount = &self.base.mount;
        let (w, h) = (vp.width as f32, vp.height as f32);

        if inner.settings.navigation.page_indicator {
            let info = self.page_info(inner);
            let node = VisualNode::new(NodeKind::Indicator, "flipbook-indicator")
                .with_bounds(Rect::new(0.0, h - INDICATOR_HEIGHT, w, INDICATOR_HEIGHT))
                .with_text(format!("{} / {}", info.index + 1, info.total));
            upsert(mount, &mut inner.nodes.indicator, node);
        } else {
            remove(mount, &mut inner.nodes.indicator);
        }

        if inner.settings.navigation.arrows {
            let top = (h - ARROW_SIZE) / 2.0;
            let prev = VisualNode::new(NodeKind::Arrow(Direction::Prev), "flipbook-arrow flipbook-arrow--prev")
                .with_bounds(Rect::new(0.0, top, ARROW_SIZE, ARROW_SIZE));
            let next = VisualNode::new(NodeKind::Arrow(Direction::Next), "flipbook-arrow flipbook-arrow--next")
                .with_bounds(Rect::new(w - ARROW_SIZE, top, ARROW_SIZE, ARROW_SIZE));
            upsert(mount, &mut inner.nodes.prev_arrow, prev);
            upsert(mount, &mut inner.nodes.next_arrow, next);
        } else {
            remove(mount, &mut inner.nodes.prev_arrow);
            remove(mount, &mut inner.nodes.next_arrow);
        }
    }

    /// Starts a flip if one is allowed. The returned receiver fires once it has committed.
    fn start_flip(self: &Arc<Self>, direction: Direction) -> Option<oneshot::Receiver<()>> {
        let (plan, duration) = {
            let mut inner = self.lock();
            if inner.state != EngineState::Ready {
                log::debug!("layered engine {}: {} ignored while {}", self.base.id, direction, inner.state);
                return None;
            }
            let target = match direction {
                Direction::Next => inner.current + 1,
                Direction::Prev => inner.current.checked_sub(1)?,
            };
            if target >= self.base.spreads.len() {
                return None;
            }

            let spread = &self.base.spreads[inner.current];
            let (face, slot) = match direction {
                Direction::Next => (spread.right_locator.clone(), Slot::Right),
                Direction::Prev => (spread.left_locator.clone(), Slot::Left),
            };
            let overlay = VisualNode::new(
                NodeKind::FlippingPage(direction),
                format!("flipbook-page flipbook-page--flipping flipbook-page--flipping-{direction}"),
            )
            .with_bounds(slot_rect(self.base.mount.viewport(), slot))
            .with_image(face);
            inner.nodes.flipping = Some(self.base.mount.attach(overlay));

            self.set_state(&mut inner, EngineState::Flipping);
            (FlipPlan { direction, target }, inner.settings.flip_duration())
        };

        self.base.events.emit(FlipbookEvent::AnimationStarted {
            direction: plan.direction,
        });

        let (done_tx, done_rx) = oneshot::channel();
        let weak = Arc::downgrade(self);
        let driver = self.base.driver.clone();
        let cancel = self.base.cancel.clone();
        tokio::spawn(async move {
            if !driver.run_once(duration, &cancel).await {
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
            inner.current = plan.target;
            self.render(&mut inner);
            remove(&self.base.mount, &mut inner.nodes.flipping);
            self.set_state(&mut inner, EngineState::Ready);
            self.page_info(&inner)
        };

        self.base.events.emit(FlipbookEvent::PageChanged(info));
        self.base.events.emit(FlipbookEvent::AnimationEnded);
    }

    fn jump(&self, index: usize) {
        if index >= self.base.total() {
            return;
        }
        self.show_spread(spread_for_page(index));
    }

    /// Shows spread `target` without animating.
    fn show_spread(&self, target: usize) {
        let info = {
            let mut inner = self.lock();
            if inner.state != EngineState::Ready
                || target >= self.base.spreads.len()
                || target == inner.current
            {
                return;
            }
            inner.current = target;
            self.render(&mut inner);
            self.page_info(&inner)
        };
        self.base.events.emit(FlipbookEvent::PageChanged(info));
    }

    /// Maps a click to a direction: left half of a shown page turns back, right half forward.
    fn hit_test(&self, x: f32, y: f32) -> Option<Direction> {
        let inner = self.lock();
        let spread = self.base.spreads.get(inner.current)?;
        let vp = self.base.mount.viewport();

        [
            (Slot::Left, spread.left_locator.is_some()),
            (Slot::Right, spread.right_locator.is_some()),
        ]
        .into_iter()
        .filter(|(_, occupied)| *occupied)
        .map(|(slot, _)| slot_rect(vp, slot))
        .find(|rect| rect.contains(x, y))
        .map(|rect| {
            if x < rect.center_x() {
                Direction::Prev
            } else {
                Direction::Next
            }
        })
    }

    fn relayout(&self) {
        let mut inner = self.lock();
        match inner.state {
            EngineState::Disposed => {}
            EngineState::Ready | EngineState::Flipping => {
                self.render(&mut inner);
                if let Some(overlay) = inner.nodes.flipping {
                    let vp = self.base.mount.viewport();
                    self.base.mount.update(overlay, |n| {
                        if let NodeKind::FlippingPage(dir) = n.kind {
                            let slot = match dir {
                                Direction::Next => Slot::Right,
                                Direction::Prev => Slot::Left,
                            };
                            n.bounds = slot_rect(vp, slot);
                        }
                    });
                }
            }
            _ => {
                if let Some(container) = inner.nodes.container {
                    let vp = self.base.mount.viewport();
                    self.base.mount.update(container, |n| n.bounds = vp.into());
                }
            }
        }
    }

    fn dispose(&self) {
        let warnings = {
            let mut inner = self.lock();
            if inner.state == EngineState::Disposed {
                return;
            }
            self.set_state(&mut inner, EngineState::Disposed);
            self.base.cancel.cancel();

            inner.subscriptions.clear();

            let mut warnings = Vec::new();
            for id in inner.nodes.drain() {
                if self.base.mount.detach(id).is_none() {
                    warnings.push(format!("{id} was already detached"));
                }
            }
            inner.images.clear();
            self.base.mount.release(self.base.id);
            warnings
        };

        self.base.report_warnings(warnings);
        log::info!("layered engine {} disposed", self.base.id);
    }
}

impl InputTarget for Shared {
    fn handle_input(self: Arc<Self>, event: InputEvent) {
        let direction = match event {
            InputEvent::Key(key) => match key_action(&key) {
                Some(KeyAction::Turn(direction)) => Some(direction),
                Some(KeyAction::First) => {
                    self.show_spread(0);
                    None
                }
                Some(KeyAction::Last) => {
                    self.show_spread(self.base.spreads.len().saturating_sub(1));
                    None
                }
                None => None,
            },
            InputEvent::Click { x, y } => self.hit_test(x, y),
            InputEvent::PointerDown { x, y } => {
                self.lock().swipe.down(x, y);
                None
            }
            InputEvent::PointerUp { x, y } => self.lock().swipe.up(x, y),
            InputEvent::Activate { node } => {
                let inner = self.lock();
                if inner.nodes.prev_arrow == Some(node) {
                    Some(Direction::Prev)
                } else if inner.nodes.next_arrow == Some(node) {
                    Some(Direction::Next)
                } else {
                    None
                }
            }
            InputEvent::Resize { .. } => {
                self.relayout();
                None
            }
        };

        if let Some(direction) = direction {
            // Input never waits for the flip to finish
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
impl FlipbookEngine for LayeredEngine {
    fn id(&self) -> EngineId {
        self.shared.base.id
    }

    fn kind(&self) -> RenderMode {
        RenderMode::Layered
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

        match shared.base.load_media().await {
            Ok(images) => {
                {
                    let mut inner = shared.lock();
                    if inner.state != EngineState::Loading {
                        return Err(FlipbookError::Disposed);
                    }
                    inner.images = images;
                    inner.current = 0;
                    shared.render(&mut inner);
                    shared.set_state(&mut inner, EngineState::Ready);
                }
                shared.base.report_ready();
                Ok(())
            }
            Err(e) => {
                {
                    let mut inner = shared.lock();
                    if inner.state == EngineState::Loading {
                        shared.set_state(&mut inner, EngineState::Failed(e.to_string()));
                    }
                }
                shared.base.report_failure(&e);
                Err(e)
            }
        }
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
            render_mode: RenderMode::Layered,
            ..settings.clone()
        };
        shared.listen(&mut inner);

        match inner.state {
            EngineState::Ready | EngineState::Flipping => shared.render(&mut inner),
            _ => {
                if let Some(container) = inner.nodes.container {
                    let class = container_class(&inner.settings, true);
                    let background = inner.settings.theme.background_color.clone();
                    shared.base.mount.update(container, |n| {
                        n.class_name = class;
                        n.background = Some(background);
                    });
                }
            }
        }
    }

    fn dispose(&self) {
        self.shared.dispose()
    }
}
