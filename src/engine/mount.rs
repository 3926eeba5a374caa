//! Mount point: the caller-supplied rendering target.
//!
//! A [`MountPoint`] stands in for the host container an engine draws into. It owns the
//! attached [`VisualNode`]s, knows its current [`Viewport`], optionally carries a
//! [`GraphicsProvider`] (the host's 3D capability), and routes host input to whichever engine
//! subscribed for it. Only one engine may own a mount point at a time.

use crate::engine::errors::FlipbookError;
use crate::engine::events::Direction;
use crate::engine::EngineId;
use crate::render::backend::GraphicsProvider;
use crate::render::Viewport;
use bitflags::bitflags;
use std::collections::BTreeMap;
use std::fmt::{Debug, Display};
use std::sync::{Arc, Mutex, MutexGuard, Weak};
use tokio::sync::mpsc;
use uuid::Uuid;

/// Capacity of each input subscription channel. Events beyond it are dropped.
pub const INPUT_CHANNEL_CAPACITY: usize = 32;

#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NodeId(u64);

impl Display for NodeId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "node#{}", self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Slot {
    Left,
    Right,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NodeKind {
    /// Root element of a book
    Container,
    /// One of the two page slots of a spread
    Page(Slot),
    /// Transient overlay showing the departing face during a flip
    FlippingPage(Direction),
    /// Drawing surface of a 3D context
    Canvas,
    /// "n / total" label
    Indicator,
    /// Clickable prev/next control
    Arrow(Direction),
}

/// Axis-aligned rectangle in mount coordinates (pixels).
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct Rect {
    pub x: f32,
    pub y: f32,
    pub width: f32,
    pub height: f32,
}

impl Rect {
    pub fn new(x: f32, y: f32, width: f32, height: f32) -> Self {
        Self { x, y, width, height }
    }

    pub fn contains(&self, x: f32, y: f32) -> bool {
        x >= self.x && x < self.x + self.width && y >= self.y && y < self.y + self.height
    }

    pub fn center_x(&self) -> f32 {
        self.x + self.width / 2.0
    }
}

impl From<Viewport> for Rect {
    fn from(vp: Viewport) -> Self {
        Rect::new(0.0, 0.0, vp.width as f32, vp.height as f32)
    }
}

/// A visual element attached to a mount point.
#[derive(Debug, Clone, PartialEq)]
pub struct VisualNode {
    pub kind: NodeKind,
    /// Space separated class list
    pub class_name: String,
    /// Locator of the image shown by this node
    pub image: Option<String>,
    pub text: Option<String>,
    pub bounds: Rect,
    pub background: Option<String>,
}

impl VisualNode {
    pub fn new(kind: NodeKind, class_name: impl Into<String>) -> Self {
        Self {
            kind,
            class_name: class_name.into(),
            image: None,
            text: None,
            bounds: Rect::default(),
            background: None,
        }
    }

    pub fn with_bounds(mut self, bounds: Rect) -> Self {
        self.bounds = bounds;
        self
    }

    pub fn with_image(mut self, image: Option<String>) -> Self {
        self.image = image;
        self
    }

    pub fn with_text(mut self, text: impl Into<String>) -> Self {
        self.text = Some(text.into());
        self
    }

    pub fn with_background(mut self, color: impl Into<String>) -> Self {
        self.background = Some(color.into());
        self
    }

    pub fn has_class(&self, class: &str) -> bool {
        self.class_name.split_whitespace().any(|c| c == class)
    }
}

/// Keys the engines react to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Key {
    ArrowLeft,
    ArrowRight,
    /// Jumps to the first spread or page
    Home,
    /// Jumps to the last spread or page
    End,
    Other(String),
}

/// Input delivered by the host.
#[derive(Debug, Clone, PartialEq)]
pub enum InputEvent {
    Key(Key),
    Click { x: f32, y: f32 },
    PointerDown { x: f32, y: f32 },
    PointerUp { x: f32, y: f32 },
    /// A clickable node was activated
    Activate { node: NodeId },
    Resize { width: u32, height: u32 },
}

bitflags! {
    pub struct InputKind: u8 {
        const KEYBOARD = 0b00001;
        const CLICK    = 0b00010;
        const POINTER  = 0b00100;
        const ACTIVATE = 0b01000;
        const RESIZE   = 0b10000;
    }
}

impl InputEvent {
    pub fn kind(&self) -> InputKind {
        match self {
            InputEvent::Key(_) => InputKind::KEYBOARD,
            InputEvent::Click { .. } => InputKind::CLICK,
            InputEvent::PointerDown { .. } | InputEvent::PointerUp { .. } => InputKind::POINTER,
            InputEvent::Activate { .. } => InputKind::ACTIVATE,
            InputEvent::Resize { .. } => InputKind::RESIZE,
        }
    }
}

struct Subscriber {
    id: u64,
    kinds: InputKind,
    tx: mpsc::Sender<InputEvent>,
}

struct MountState {
    viewport: Viewport,
    nodes: BTreeMap<NodeId, VisualNode>,
    next_node: u64,
    owner: Option<EngineId>,
    subscribers: Vec<Subscriber>,
    next_subscriber: u64,
}

pub struct MountPoint {
    id: Uuid,
    graphics: Option<Arc<dyn GraphicsProvider>>,
    state: Mutex<MountState>,
}

impl Debug for MountPoint {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.lock();
        f.debug_struct("MountPoint")
            .field("id", &self.id)
            .field("viewport", &state.viewport)
            .field("nodes", &state.nodes.len())
            .field("owner", &state.owner)
            .field("subscribers", &state.subscribers.len())
            .finish()
    }
}

impl MountPoint {
    /// A mount point without 3D capability.
    pub fn new(viewport: Viewport) -> Arc<Self> {
        Self::build(viewport, None)
    }

    /// A mount point whose host can create scene contexts through `graphics`.
    pub fn with_graphics(viewport: Viewport, graphics: Arc<dyn GraphicsProvider>) -> Arc<Self> {
        Self::build(viewport, Some(graphics))
    }

    fn build(viewport: Viewport, graphics: Option<Arc<dyn GraphicsProvider>>) -> Arc<Self> {
        Arc::new(Self {
            id: Uuid::new_v4(),
            graphics,
            state: Mutex::new(MountState {
                viewport,
                nodes: BTreeMap::new(),
                next_node: 1,
                owner: None,
                subscribers: Vec::new(),
                next_subscriber: 1,
            }),
        })
    }

    fn lock(&self) -> MutexGuard<'_, MountState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn viewport(&self) -> Viewport {
        self.lock().viewport
    }

    pub fn graphics(&self) -> Option<Arc<dyn GraphicsProvider>> {
        self.graphics.clone()
    }

    /// Capability probe used when resolving the render mode.
    pub fn supports_scene_graph(&self) -> bool {
        self.graphics
            .as_ref()
            .is_some_and(|g| g.supports_scene_graph())
    }

    // ****************************************
    // ** Ownership

    /// Takes exclusive ownership. Fails if another engine owns the mount point.
    pub fn claim(&self, engine: EngineId) -> Result<(), FlipbookError> {
        let mut state = self.lock();
        match state.owner {
            Some(owner) if owner != engine => Err(FlipbookError::MountBusy),
            _ => {
                state.owner = Some(engine);
                Ok(())
            }
        }
    }

    /// Gives up ownership. A release by a non-owner is ignored.
    pub fn release(&self, engine: EngineId) {
        let mut state = self.lock();
        if state.owner == Some(engine) {
            state.owner = None;
        }
    }

    pub fn owner(&self) -> Option<EngineId> {
        self.lock().owner
    }

    // ****************************************
    // ** Visual nodes

    pub fn attach(&self, node: VisualNode) -> NodeId {
        let mut state = self.lock();
        let id = NodeId(state.next_node);
        state.next_node += 1;
        state.nodes.insert(id, node);
        id
    }

    /// Mutates an attached node. Returns `false` if it is not attached.
    pub fn update(&self, id: NodeId, f: impl FnOnce(&mut VisualNode)) -> bool {
        match self.lock().nodes.get_mut(&id) {
            Some(node) => {
                f(node);
                true
            }
            None => false,
        }
    }

    pub fn detach(&self, id: NodeId) -> Option<VisualNode> {
        self.lock().nodes.remove(&id)
    }

    pub fn node(&self, id: NodeId) -> Option<VisualNode> {
        self.lock().nodes.get(&id).cloned()
    }

    /// Attached nodes in attach order.
    pub fn nodes(&self) -> Vec<(NodeId, VisualNode)> {
        self.lock().nodes.iter().map(|(id, n)| (*id, n.clone())).collect()
    }

    pub fn node_count(&self) -> usize {
        self.lock().nodes.len()
    }

    pub fn find_by_class(&self, class: &str) -> Vec<NodeId> {
        self.lock()
            .nodes
            .iter()
            .filter(|(_, n)| n.has_class(class))
            .map(|(id, _)| *id)
            .collect()
    }

    // ****************************************
    // ** Input

    /// Registers for the given input kinds. Events arrive on the returned receiver until the
    /// [`Subscription`] is dropped or cancelled.
    pub fn subscribe(self: &Arc<Self>, kinds: InputKind) -> (Subscription, mpsc::Receiver<InputEvent>) {
        let (tx, rx) = mpsc::channel(INPUT_CHANNEL_CAPACITY);
        let mut state = self.lock();
        let id = state.next_subscriber;
        state.next_subscriber += 1;
        state.subscribers.push(Subscriber { id, kinds, tx });

        let sub = Subscription {
            id,
            mount: Arc::downgrade(self),
        };
        (sub, rx)
    }

    pub fn subscriber_count(&self) -> usize {
        self.lock().subscribers.len()
    }

    fn unsubscribe(&self, id: u64) {
        self.lock().subscribers.retain(|s| s.id != id);
    }

    /// Delivers host input to every matching subscriber. Returns how many received it.
    pub fn dispatch(&self, event: InputEvent) -> usize {
        let kind = event.kind();
        let state = self.lock();
        let mut delivered = 0;
        for sub in state.subscribers.iter().filter(|s| s.kinds.intersects(kind)) {
            match sub.tx.try_send(event.clone()) {
                Ok(()) => delivered += 1,
                Err(e) => log::debug!("mount {}: input dropped: {}", self.id, e),
            }
        }
        delivered
    }

    /// Changes the container size and tells subscribers about it.
    pub fn set_size(&self, width: u32, height: u32) {
        self.lock().viewport.resize(width, height);
        self.dispatch(InputEvent::Resize { width, height });
    }
}

/// Handle to an input registration. Dropping it unsubscribes.
#[derive(Debug)]
pub struct Subscription {
    id: u64,
    mount: Weak<MountPoint>,
}

impl Subscription {
    /// Unsubscribes now rather than at drop.
    pub fn cancel(self) {
        drop(self);
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        if let Some(mount) = self.mount.upgrade() {
            mount.unsubscribe(self.id);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::render::backends::null::NullGraphics;

    fn mount() -> Arc<MountPoint> {
        MountPoint::new(Viewport::new(0, 0, 800, 600))
    }

    #[test]
    fn second_owner_is_rejected() {
        let m = mount();
        let a = EngineId::new();
        let b = EngineId::new();
        m.claim(a).unwrap();
        assert!(matches!(m.claim(b), Err(FlipbookError::MountBusy)));

        // Not the owner: ignored
        m.release(b);
        assert_eq!(m.owner(), Some(a));

        m.release(a);
        m.claim(b).unwrap();
    }

    #[test]
    fn capability_probe() {
        assert!(!mount().supports_scene_graph());
        let m = MountPoint::with_graphics(Viewport::default(), Arc::new(NullGraphics::new()));
        assert!(m.supports_scene_graph());
        let m = MountPoint::with_graphics(Viewport::default(), Arc::new(NullGraphics::unsupported()));
        assert!(!m.supports_scene_graph());
    }

    #[test]
    fn nodes_attach_update_detach() {
        let m = mount();
        let id = m.attach(VisualNode::new(NodeKind::Container, "flipbook flipbook--layered"));
        assert_eq!(m.find_by_class("flipbook"), vec![id]);
        assert!(m.find_by_class("flip").is_empty());

        assert!(m.update(id, |n| n.text = Some("hi".into())));
        assert_eq!(m.node(id).unwrap().text.as_deref(), Some("hi"));

        assert!(m.detach(id).is_some());
        assert!(m.detach(id).is_none());
        assert!(!m.update(id, |_| {}));
        assert_eq!(m.node_count(), 0);
    }

    #[tokio::test]
    async fn dispatch_filters_by_kind_and_drop_unsubscribes() {
        let m = mount();
        let (keys, mut key_rx) = m.subscribe(InputKind::KEYBOARD);
        let (_resize, mut resize_rx) = m.subscribe(InputKind::RESIZE | InputKind::CLICK);
        assert_eq!(m.subscriber_count(), 2);

        assert_eq!(m.dispatch(InputEvent::Key(Key::ArrowLeft)), 1);
        assert_eq!(key_rx.recv().await, Some(InputEvent::Key(Key::ArrowLeft)));

        m.set_size(1024, 768);
        assert_eq!(m.viewport().width, 1024);
        assert_eq!(
            resize_rx.recv().await,
            Some(InputEvent::Resize { width: 1024, height: 768 })
        );

        keys.cancel();
        assert_eq!(m.subscriber_count(), 1);
        assert_eq!(m.dispatch(InputEvent::Key(Key::ArrowRight)), 0);
    }

    #[test]
    fn rect_contains_is_half_open() {
        let r = Rect::new(0.0, 0.0, 400.0, 600.0);
        assert!(r.contains(0.0, 0.0));
        assert!(!r.contains(400.0, 10.0));
        assert_eq!(r.center_x(), 200.0);
    }
}
