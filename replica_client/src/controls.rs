//! Input handling.
//!
//! Behaviors claim raw input by binding a set of callbacks at a priority.
//! Each event walks the live bindings from highest to lowest priority and
//! stops at the first callback that returns `true`. Acquiring a binding
//! returns a [`ControlHandle`] that must be handed back through
//! [`ControlStack::release`]; a handle dropped while still live is reported
//! as a leak because its binding keeps shadowing everything below it.
//!
//! The pointer lock and the camera are exclusive: one binding at a time.

use std::collections::HashSet;

use replica_shared::math::{Quat, Vec3};
use thiserror::Error;
use tracing::{debug, warn};

/// Conventional priorities.
pub mod priority {
    /// The local character controller.
    pub const PLAYER: i32 = 0;
    /// Gameplay actions layered over the character (double jump).
    pub const ACTION: i32 = 5;
    /// Apps that take over input entirely (vehicles, seats).
    pub const APP: i32 = 10;
}

/// Identifies a binding.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct BindingId(pub u64);

/// Mouse movement since the last event, in pixels.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct PointerDelta {
    pub x: f32,
    pub y: f32,
}

/// One raw input event. Codes follow DOM naming (`Space`, `KeyW`, `MouseRight`).
#[derive(Debug, Clone, PartialEq)]
pub enum InputEvent {
    Press(String),
    Release(String),
    PointerMove(PointerDelta),
    Scroll(f32),
}

type CodeFn = Box<dyn FnMut(&str) -> bool + Send>;
type PointerFn = Box<dyn FnMut(PointerDelta) -> bool + Send>;
type ScrollFn = Box<dyn FnMut(f32) -> bool + Send>;

/// Optional callbacks of a binding. Each returns `true` to consume the event.
#[derive(Default)]
pub struct ControlCallbacks {
    on_press: Option<CodeFn>,
    on_release: Option<CodeFn>,
    on_pointer_move: Option<PointerFn>,
    on_scroll: Option<ScrollFn>,
}

impl ControlCallbacks {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn on_press(mut self, f: impl FnMut(&str) -> bool + Send + 'static) -> Self {
        self.on_press = Some(Box::new(f));
        self
    }

    pub fn on_release(mut self, f: impl FnMut(&str) -> bool + Send + 'static) -> Self {
        self.on_release = Some(Box::new(f));
        self
    }

    pub fn on_pointer_move(mut self, f: impl FnMut(PointerDelta) -> bool + Send + 'static) -> Self {
        self.on_pointer_move = Some(Box::new(f));
        self
    }

    pub fn on_scroll(mut self, f: impl FnMut(f32) -> bool + Send + 'static) -> Self {
        self.on_scroll = Some(Box::new(f));
        self
    }
}

/// Camera pose written by whichever binding holds the camera claim.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CameraRig {
    pub position: Vec3,
    pub quaternion: Quat,
    pub zoom: f32,
}

impl Default for CameraRig {
    fn default() -> Self {
        Self {
            position: Vec3::ZERO,
            quaternion: Quat::IDENTITY,
            zoom: 0.0,
        }
    }
}

/// Exclusive-claim failures. These are programming errors in the behavior
/// making the claim and are reported straight back to it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum ControlError {
    #[error("pointer is already locked by binding {holder:?}")]
    PointerLocked { holder: BindingId },
    #[error("camera is already claimed by binding {holder:?}")]
    CameraClaimed { holder: BindingId },
    #[error("binding does not hold the camera")]
    NotCameraHolder,
    #[error("binding has been released")]
    Released,
}

/// Token for a live binding.
#[must_use = "a binding must be released through ControlStack::release"]
#[derive(Debug)]
pub struct ControlHandle {
    id: BindingId,
    released: bool,
}

impl ControlHandle {
    pub fn id(&self) -> BindingId {
        self.id
    }

    pub fn is_released(&self) -> bool {
        self.released
    }
}

impl Drop for ControlHandle {
    fn drop(&mut self) {
        if !self.released {
            warn!(binding = ?self.id, "Control binding leaked; lower priorities stay shadowed");
        }
    }
}

struct Binding {
    id: BindingId,
    priority: i32,
    callbacks: ControlCallbacks,
    /// Codes this binding saw pressed and not yet released.
    buttons: HashSet<String>,
}

/// Priority-ordered set of live bindings.
#[derive(Default)]
pub struct ControlStack {
    next_id: u64,
    /// Highest priority first; newest first among equals.
    bindings: Vec<Binding>,
    held: HashSet<String>,
    pointer_holder: Option<BindingId>,
    camera_holder: Option<BindingId>,
    camera: CameraRig,
}

impl ControlStack {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a binding and returns its handle.
    pub fn bind(&mut self, priority: i32, callbacks: ControlCallbacks) -> ControlHandle {
        self.next_id += 1;
        let id = BindingId(self.next_id);
        let at = self
            .bindings
            .iter()
            .position(|b| b.priority <= priority)
            .unwrap_or(self.bindings.len());
        self.bindings.insert(
            at,
            Binding {
                id,
                priority,
                callbacks,
                buttons: HashSet::new(),
            },
        );
        debug!(binding = ?id, priority, "Control bound");
        ControlHandle {
            id,
            released: false,
        }
    }

    /// Removes a binding and any claims it holds. Releasing twice is a no-op.
    pub fn release(&mut self, handle: &mut ControlHandle) {
        if handle.released {
            return;
        }
        handle.released = true;
        self.bindings.retain(|b| b.id != handle.id);
        if self.pointer_holder == Some(handle.id) {
            self.pointer_holder = None;
        }
        if self.camera_holder == Some(handle.id) {
            self.camera_holder = None;
        }
        debug!(binding = ?handle.id, "Control released");
    }

    /// Number of live bindings.
    pub fn len(&self) -> usize {
        self.bindings.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bindings.is_empty()
    }

    /// Delivers one event. Returns the binding that consumed it, if any.
    pub fn dispatch(&mut self, event: &InputEvent) -> Option<BindingId> {
        match event {
            InputEvent::Press(code) => {
                // Key repeat: only the first press of a held key is delivered.
                if !self.held.insert(code.clone()) {
                    return None;
                }
                self.bindings.iter_mut().find_map(|b| {
                    b.buttons.insert(code.clone());
                    let f = b.callbacks.on_press.as_mut()?;
                    f(code.as_str()).then_some(b.id)
                })
            }
            InputEvent::Release(code) => {
                self.held.remove(code);
                for b in &mut self.bindings {
                    b.buttons.remove(code);
                }
                self.bindings.iter_mut().find_map(|b| {
                    let f = b.callbacks.on_release.as_mut()?;
                    f(code.as_str()).then_some(b.id)
                })
            }
            InputEvent::PointerMove(delta) => self.bindings.iter_mut().find_map(|b| {
                let f = b.callbacks.on_pointer_move.as_mut()?;
                f(*delta).then_some(b.id)
            }),
            InputEvent::Scroll(delta) => self.bindings.iter_mut().find_map(|b| {
                let f = b.callbacks.on_scroll.as_mut()?;
                f(*delta).then_some(b.id)
            }),
        }
    }

    /// True if `code` is held and its press reached this binding.
    pub fn is_down(&self, handle: &ControlHandle, code: &str) -> bool {
        self.binding(handle)
            .is_some_and(|b| b.buttons.contains(code))
    }

    /// Locks the pointer for `handle`. Locking again by the holder is a no-op.
    pub fn lock_pointer(&mut self, handle: &ControlHandle) -> Result<(), ControlError> {
        self.live(handle)?;
        match self.pointer_holder {
            Some(holder) if holder != handle.id => Err(ControlError::PointerLocked { holder }),
            _ => {
                self.pointer_holder = Some(handle.id);
                Ok(())
            }
        }
    }

    /// Unlocks the pointer if `handle` holds it. Returns whether it did.
    pub fn unlock_pointer(&mut self, handle: &ControlHandle) -> bool {
        if self.pointer_holder == Some(handle.id) {
            self.pointer_holder = None;
            true
        } else {
            false
        }
    }

    pub fn pointer_locked(&self) -> bool {
        self.pointer_holder.is_some()
    }

    /// Claims the camera for `handle`. Claiming again by the holder is a no-op.
    pub fn claim_camera(&mut self, handle: &ControlHandle) -> Result<(), ControlError> {
        self.live(handle)?;
        match self.camera_holder {
            Some(holder) if holder != handle.id => Err(ControlError::CameraClaimed { holder }),
            _ => {
                self.camera_holder = Some(handle.id);
                Ok(())
            }
        }
    }

    /// Gives the camera back if `handle` holds it. Returns whether it did.
    pub fn unclaim_camera(&mut self, handle: &ControlHandle) -> bool {
        if self.camera_holder == Some(handle.id) {
            self.camera_holder = None;
            true
        } else {
            false
        }
    }

    pub fn camera_holder(&self) -> Option<BindingId> {
        self.camera_holder
    }

    pub fn camera(&self) -> &CameraRig {
        &self.camera
    }

    /// Writable camera, for the claim holder only.
    pub fn camera_mut(&mut self, handle: &ControlHandle) -> Result<&mut CameraRig, ControlError> {
        self.live(handle)?;
        if self.camera_holder != Some(handle.id) {
            return Err(ControlError::NotCameraHolder);
        }
        Ok(&mut self.camera)
    }

    /// Camera follow for the unclaimed case, driven by the late update.
    pub(crate) fn follow(&mut self, position: Vec3, quaternion: Quat) {
        if self.camera_holder.is_none() {
            self.camera.position = position;
            self.camera.quaternion = quaternion;
        }
    }

    fn binding(&self, handle: &ControlHandle) -> Option<&Binding> {
        if handle.released {
            return None;
        }
        self.bindings.iter().find(|b| b.id == handle.id)
    }

    fn live(&self, handle: &ControlHandle) -> Result<(), ControlError> {
        self.binding(handle).map(|_| ()).ok_or(ControlError::Released)
    }
}

#[cfg(test)]
mod tests {
    use std::sync::{
        atomic::{AtomicUsize, Ordering},
        Arc,
    };

    use super::*;

    fn counter() -> Arc<AtomicUsize> {
        Arc::new(AtomicUsize::new(0))
    }

    fn space_counter(hits: &Arc<AtomicUsize>, consume: bool) -> ControlCallbacks {
        let hits = hits.clone();
        ControlCallbacks::new().on_press(move |code| {
            if code != "Space" {
                return false;
            }
            hits.fetch_add(1, Ordering::SeqCst);
            consume
        })
    }

    fn tap(stack: &mut ControlStack, code: &str) -> Option<BindingId> {
        let consumed = stack.dispatch(&InputEvent::Press(code.to_string()));
        stack.dispatch(&InputEvent::Release(code.to_string()));
        consumed
    }

    #[test]
    fn higher_priority_hides_event_until_released() {
        let mut stack = ControlStack::new();
        let low_hits = counter();
        let high_hits = counter();
        let mut low = stack.bind(5, space_counter(&low_hits, true));
        let mut high = stack.bind(10, space_counter(&high_hits, true));

        assert_eq!(tap(&mut stack, "Space"), Some(high.id()));
        assert_eq!(high_hits.load(Ordering::SeqCst), 1);
        assert_eq!(low_hits.load(Ordering::SeqCst), 0);

        stack.release(&mut high);
        assert_eq!(tap(&mut stack, "Space"), Some(low.id()));
        assert_eq!(low_hits.load(Ordering::SeqCst), 1);
        assert_eq!(high_hits.load(Ordering::SeqCst), 1);

        stack.release(&mut low);
    }

    #[test]
    fn unhandled_event_falls_through() {
        let mut stack = ControlStack::new();
        let low_hits = counter();
        let high_hits = counter();
        let mut low = stack.bind(5, space_counter(&low_hits, true));
        let mut high = stack.bind(10, space_counter(&high_hits, false));

        assert_eq!(tap(&mut stack, "Space"), Some(low.id()));
        assert_eq!(high_hits.load(Ordering::SeqCst), 1);
        assert_eq!(low_hits.load(Ordering::SeqCst), 1);
        assert_eq!(tap(&mut stack, "KeyQ"), None);

        stack.release(&mut low);
        stack.release(&mut high);
    }

    #[test]
    fn equal_priority_prefers_newest() {
        let mut stack = ControlStack::new();
        let mut first = stack.bind(1, ControlCallbacks::new().on_press(|_| true));
        let mut second = stack.bind(1, ControlCallbacks::new().on_press(|_| true));
        assert_eq!(tap(&mut stack, "KeyA"), Some(second.id()));
        stack.release(&mut second);
        assert_eq!(tap(&mut stack, "KeyA"), Some(first.id()));
        stack.release(&mut first);
    }

    #[test]
    fn release_is_idempotent() {
        let mut stack = ControlStack::new();
        let mut a = stack.bind(1, ControlCallbacks::new());
        let mut b = stack.bind(2, ControlCallbacks::new());
        stack.release(&mut a);
        stack.release(&mut a);
        assert!(a.is_released());
        assert_eq!(stack.len(), 1);
        stack.release(&mut b);
        assert!(stack.is_empty());
    }

    #[test]
    fn held_key_repeat_is_not_redelivered() {
        let mut stack = ControlStack::new();
        let hits = counter();
        let mut h = stack.bind(0, space_counter(&hits, true));
        stack.dispatch(&InputEvent::Press("Space".into()));
        stack.dispatch(&InputEvent::Press("Space".into()));
        assert!(stack.is_down(&h, "Space"));
        stack.dispatch(&InputEvent::Release("Space".into()));
        assert!(!stack.is_down(&h, "Space"));
        assert_eq!(hits.load(Ordering::SeqCst), 1);
        stack.release(&mut h);
    }

    #[test]
    fn exclusive_claims_are_reported_to_the_caller() {
        let mut stack = ControlStack::new();
        let mut a = stack.bind(10, ControlCallbacks::new());
        let mut b = stack.bind(5, ControlCallbacks::new());

        stack.claim_camera(&a).unwrap();
        stack.claim_camera(&a).unwrap();
        assert_eq!(
            stack.claim_camera(&b),
            Err(ControlError::CameraClaimed { holder: a.id() })
        );
        assert!(matches!(
            stack.camera_mut(&b),
            Err(ControlError::NotCameraHolder)
        ));
        stack.camera_mut(&a).unwrap().zoom = 5.0;
        assert_eq!(stack.camera().zoom, 5.0);

        assert!(!stack.unclaim_camera(&b));
        assert!(stack.unclaim_camera(&a));
        assert_eq!(stack.camera_holder(), None);
        stack.claim_camera(&b).unwrap();
        assert!(stack.unclaim_camera(&b));
        stack.claim_camera(&a).unwrap();

        stack.lock_pointer(&b).unwrap();
        assert_eq!(
            stack.lock_pointer(&a),
            Err(ControlError::PointerLocked { holder: b.id() })
        );
        assert!(!stack.unlock_pointer(&a));
        assert!(stack.unlock_pointer(&b));
        stack.lock_pointer(&a).unwrap();

        // Releasing drops every claim the binding holds.
        stack.release(&mut a);
        assert!(!stack.pointer_locked());
        assert_eq!(stack.camera_holder(), None);
        stack.claim_camera(&b).unwrap();
        assert_eq!(stack.claim_camera(&a), Err(ControlError::Released));
        stack.release(&mut b);
    }

    #[test]
    fn pointer_and_scroll_dispatch() {
        let mut stack = ControlStack::new();
        let mut h = stack.bind(
            0,
            ControlCallbacks::new()
                .on_pointer_move(|d| d.x != 0.0)
                .on_scroll(|_| true),
        );
        assert_eq!(
            stack.dispatch(&InputEvent::PointerMove(PointerDelta { x: 1.0, y: 0.0 })),
            Some(h.id())
        );
        assert_eq!(
            stack.dispatch(&InputEvent::PointerMove(PointerDelta::default())),
            None
        );
        assert_eq!(stack.dispatch(&InputEvent::Scroll(-1.0)), Some(h.id()));
        stack.release(&mut h);
    }
}
