//! Engine event types.
//!
//! Every observable occurrence of a flipbook is a [`FlipbookEvent`]. An [`EventSink`] fans each
//! event out to two places: the caller's [`EventCallbacks`] (the `on_*` hooks) and a tokio
//! broadcast bus that any number of subscribers can listen on.
//!
//! # Main Types
//!
//! - [`Direction`]: Direction of a page turn.
//! - [`FlipbookEvent`]: Lifecycle, navigation, loading and diagnostic events.
//! - [`EventCallbacks`]: Optional per-event closures supplied with the configuration.
//! - [`EventSink`]: Dispatches events to callbacks and the broadcast bus.

use crate::engine::config::RenderMode;
use crate::engine::loading::LoadingProgress;
use crate::engine::pagination::PageInfo;
use std::fmt::{Debug, Display};
use std::sync::Arc;
use tokio::sync::broadcast;

/// Direction of a page turn
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Direction {
    /// Towards the back cover
    Next,
    /// Towards the front cover
    Prev,
}

impl Display for Direction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Direction::Next => write!(f, "next"),
            Direction::Prev => write!(f, "prev"),
        }
    }
}

/// Events emitted by a flipbook
#[derive(Debug, Clone, PartialEq)]
pub enum FlipbookEvent {
    // ****************************************
    // ** Lifecycle
    /// All media decoded and the first spread/page is shown
    Ready,
    /// The engine was torn down
    Disposed,
    /// The facade replaced its backend
    BackendChanged { old: RenderMode, new: RenderMode },

    // ****************************************
    // ** Navigation
    /// A navigation committed; carries the new position
    PageChanged(PageInfo),
    /// A flip animation started
    AnimationStarted { direction: Direction },
    /// A flip animation finished and its position is committed
    AnimationEnded,

    // ****************************************
    // ** Loading
    /// One more media item decoded
    LoadProgress(LoadingProgress),
    /// Every media item decoded
    LoadComplete,

    // ****************************************
    // ** Diagnostics
    /// Initialization failed
    Error { message: String },
    /// The requested backend is unavailable and another one is used
    CapabilityFallback { requested: RenderMode, used: RenderMode },
    /// Non-fatal problem, such as a resource that refused to be released
    Warning { message: String },
}

impl Display for FlipbookEvent {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            FlipbookEvent::Ready => write!(f, "Ready"),
            FlipbookEvent::Disposed => write!(f, "Disposed"),
            FlipbookEvent::BackendChanged { old, new } => {
                write!(f, "BackendChanged: {} -> {}", old, new)
            }
            FlipbookEvent::PageChanged(info) => write!(
                f,
                "PageChanged: page {}/{} (spread {}/{})",
                info.index + 1,
                info.total,
                info.spread_index + 1,
                info.total_spreads
            ),
            FlipbookEvent::AnimationStarted { direction } => {
                write!(f, "AnimationStarted: {}", direction)
            }
            FlipbookEvent::AnimationEnded => write!(f, "AnimationEnded"),
            FlipbookEvent::LoadProgress(p) => {
                write!(f, "LoadProgress: {}/{}", p.loaded, p.total)
            }
            FlipbookEvent::LoadComplete => write!(f, "LoadComplete"),
            FlipbookEvent::Error { message } => write!(f, "Error: {}", message),
            FlipbookEvent::CapabilityFallback { requested, used } => {
                write!(f, "CapabilityFallback: {} -> {}", requested, used)
            }
            FlipbookEvent::Warning { message } => write!(f, "Warning: {}", message),
        }
    }
}

type Hook = Arc<dyn Fn() + Send + Sync>;
type HookWith<T> = Arc<dyn Fn(T) + Send + Sync>;

/// Callbacks supplied with the configuration. Each is optional.
#[derive(Clone, Default)]
pub struct EventCallbacks {
    pub on_page_change: Option<HookWith<PageInfo>>,
    pub on_animation_start: Option<Hook>,
    pub on_animation_end: Option<Hook>,
    pub on_load_progress: Option<HookWith<LoadingProgress>>,
    pub on_load_complete: Option<Hook>,
    pub on_error: Option<HookWith<String>>,
    pub on_ready: Option<Hook>,
}

impl Debug for EventCallbacks {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventCallbacks")
            .field("on_page_change", &self.on_page_change.is_some())
            .field("on_animation_start", &self.on_animation_start.is_some())
            .field("on_animation_end", &self.on_animation_end.is_some())
            .field("on_load_progress", &self.on_load_progress.is_some())
            .field("on_load_complete", &self.on_load_complete.is_some())
            .field("on_error", &self.on_error.is_some())
            .field("on_ready", &self.on_ready.is_some())
            .finish()
    }
}

impl EventCallbacks {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn on_page_change(mut self, f: impl Fn(PageInfo) + Send + Sync + 'static) -> Self {
        self.on_page_change = Some(Arc::new(f));
        self
    }

    pub fn on_animation_start(mut self, f: impl Fn() + Send + Sync + 'static) -> Self {
        self.on_animation_start = Some(Arc::new(f));
        self
    }

    pub fn on_animation_end(mut self, f: impl Fn() + Send + Sync + 'static) -> Self {
        self.on_animation_end = Some(Arc::new(f));
        self
    }

    pub fn on_load_progress(mut self, f: impl Fn(LoadingProgress) + Send + Sync + 'static) -> Self {
        self.on_load_progress = Some(Arc::new(f));
        self
    }

    pub fn on_load_complete(mut self, f: impl Fn() + Send + Sync + 'static) -> Self {
        self.on_load_complete = Some(Arc::new(f));
        self
    }

    pub fn on_error(mut self, f: impl Fn(String) + Send + Sync + 'static) -> Self {
        self.on_error = Some(Arc::new(f));
        self
    }

    pub fn on_ready(mut self, f: impl Fn() + Send + Sync + 'static) -> Self {
        self.on_ready = Some(Arc::new(f));
        self
    }

    fn dispatch(&self, event: &FlipbookEvent) {
        match event {
            FlipbookEvent::PageChanged(info) => {
                if let Some(f) = &self.on_page_change {
                    f(*info)
                }
            }
            FlipbookEvent::AnimationStarted { .. } => {
                if let Some(f) = &self.on_animation_start {
                    f()
                }
            }
            FlipbookEvent::AnimationEnded => {
                if let Some(f) = &self.on_animation_end {
                    f()
                }
            }
            FlipbookEvent::LoadProgress(p) => {
                if let Some(f) = &self.on_load_progress {
                    f(p.clone())
                }
            }
            FlipbookEvent::LoadComplete => {
                if let Some(f) = &self.on_load_complete {
                    f()
                }
            }
            FlipbookEvent::Error { message } => {
                if let Some(f) = &self.on_error {
                    f(message.clone())
                }
            }
            FlipbookEvent::Ready => {
                if let Some(f) = &self.on_ready {
                    f()
                }
            }
            FlipbookEvent::Disposed
            | FlipbookEvent::BackendChanged { .. }
            | FlipbookEvent::CapabilityFallback { .. }
            | FlipbookEvent::Warning { .. } => {}
        }
    }
}

/// Fans events out to the callbacks and the broadcast bus. Cheap to clone; every clone
/// feeds the same bus.
#[derive(Clone, Debug)]
pub struct EventSink {
    callbacks: EventCallbacks,
    tx: broadcast::Sender<FlipbookEvent>,
}

impl EventSink {
    pub fn new(callbacks: EventCallbacks, capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity);
        Self { callbacks, tx }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<FlipbookEvent> {
        self.tx.subscribe()
    }

    /// Emits an event. Must not be called while holding engine state locks.
    pub fn emit(&self, event: FlipbookEvent) {
        log::trace!("event: {}", event);
        self.callbacks.dispatch(&event);
        // No receivers is fine
        let _ = self.tx.send(event);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[test]
    fn display_event() {
        let info = PageInfo {
            index: 2,
            total: 5,
            spread_index: 1,
            total_spreads: 4,
        };
        assert_eq!(
            FlipbookEvent::PageChanged(info).to_string(),
            "PageChanged: page 3/5 (spread 2/4)"
        );
        assert_eq!(
            FlipbookEvent::CapabilityFallback {
                requested: RenderMode::SceneGraph,
                used: RenderMode::Layered
            }
            .to_string(),
            "CapabilityFallback: scenegraph -> layered"
        );
        assert_eq!(
            FlipbookEvent::AnimationStarted { direction: Direction::Prev }.to_string(),
            "AnimationStarted: prev"
        );
    }

    #[tokio::test]
    async fn sink_reaches_callbacks_and_bus() {
        let ready = Arc::new(AtomicUsize::new(0));
        let pages = Arc::new(AtomicUsize::new(0));
        let r = ready.clone();
        let p = pages.clone();
        let callbacks = EventCallbacks::new()
            .on_ready(move || {
                r.fetch_add(1, Ordering::SeqCst);
            })
            .on_page_change(move |info| {
                p.store(info.index, Ordering::SeqCst);
            });

        let sink = EventSink::new(callbacks, 8);
        let mut rx = sink.subscribe();

        sink.emit(FlipbookEvent::Ready);
        sink.emit(FlipbookEvent::PageChanged(PageInfo {
            index: 3,
            ..Default::default()
        }));

        assert_eq!(ready.load(Ordering::SeqCst), 1);
        assert_eq!(pages.load(Ordering::SeqCst), 3);
        assert_eq!(rx.recv().await.unwrap(), FlipbookEvent::Ready);
        assert!(matches!(rx.recv().await.unwrap(), FlipbookEvent::PageChanged(_)));
    }

    #[test]
    fn emit_without_subscribers_is_fine() {
        let sink = EventSink::new(EventCallbacks::default(), 4);
        sink.emit(FlipbookEvent::Warning {
            message: "texture leak".into(),
        });
    }
}
