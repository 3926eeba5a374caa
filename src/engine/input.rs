//! Input workers.
//!
//! Each engine runs one worker task that drains its mount point subscription. The worker only
//! holds a weak reference to the engine, so it never keeps a dropped engine alive, and it stops
//! as soon as the engine's cancellation token fires.

use crate::engine::config::NavigationOptions;
use crate::engine::events::Direction;
use crate::engine::mount::{InputEvent, InputKind, Key, MountPoint, Subscription};
use std::sync::{Arc, Weak};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

/// Horizontal travel (px) a drag needs before it counts as a swipe.
pub const MIN_SWIPE_DISTANCE: f32 = 50.0;

/// Receiver side of an engine's input handling.
pub(crate) trait InputTarget: Send + Sync + 'static {
    fn handle_input(self: Arc<Self>, event: InputEvent);
}

/// Input kinds an engine subscribes to for the given toggles.
pub(crate) fn input_mask(nav: &NavigationOptions, responsive: bool) -> InputKind {
    let mut mask = InputKind::empty();
    if nav.keyboard {
        mask |= InputKind::KEYBOARD;
    }
    if nav.click {
        mask |= InputKind::CLICK;
    }
    if nav.touch {
        mask |= InputKind::POINTER;
    }
    if nav.arrows {
        mask |= InputKind::ACTIVATE;
    }
    if responsive {
        mask |= InputKind::RESIZE;
    }
    mask
}

/// Subscribes `target` to `mount` for `mask` and spawns the worker draining the subscription.
pub(crate) fn spawn_input_worker<T: InputTarget>(
    mount: &Arc<MountPoint>,
    mask: InputKind,
    target: Weak<T>,
    cancel: CancellationToken,
) -> Option<(Subscription, JoinHandle<()>)> {
    if mask.is_empty() {
        return None;
    }
    let (sub, rx) = mount.subscribe(mask);
    let handle = tokio::spawn(run(rx, target, cancel));
    Some((sub, handle))
}

async fn run<T: InputTarget>(
    mut rx: mpsc::Receiver<InputEvent>,
    target: Weak<T>,
    cancel: CancellationToken,
) {
    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,
            ev = rx.recv() => {
                let Some(ev) = ev else { break };
                let Some(target) = target.upgrade() else { break };
                target.handle_input(ev);
            }
        }
    }
    log::trace!("input worker stopped");
}

/// What a key press asks an engine to do.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum KeyAction {
    Turn(Direction),
    First,
    Last,
}

pub(crate) fn key_action(key: &Key) -> Option<KeyAction> {
    match key {
        Key::ArrowLeft => Some(KeyAction::Turn(Direction::Prev)),
        Key::ArrowRight => Some(KeyAction::Turn(Direction::Next)),
        Key::Home => Some(KeyAction::First),
        Key::End => Some(KeyAction::Last),
        Key::Other(_) => None,
    }
}

/// Tracks a pointer drag and turns it into a swipe direction on release.
#[derive(Debug, Default, Clone, Copy)]
pub(crate) struct SwipeTracker {
    start: Option<(f32, f32)>,
}

impl SwipeTracker {
    pub(crate) fn down(&mut self, x: f32, y: f32) {
        self.start = Some((x, y));
    }

    /// Drag right turns back, drag left turns forward. Short or mostly vertical drags
    /// yield nothing.
    pub(crate) fn up(&mut self, x: f32, y: f32) -> Option<Direction> {
        let (sx, sy) = self.start.take()?;
        let dx = x - sx;
        let dy = y - sy;
        if dx.abs() <= MIN_SWIPE_DISTANCE || dx.abs() <= dy.abs() {
            return None;
        }
        if dx > 0.0 {
            Some(Direction::Prev)
        } else {
            Some(Direction::Next)
        }
    }
}
