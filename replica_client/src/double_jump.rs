//! Double jump.
//!
//! A fixed-tick action layered over the local character. While airborne the
//! player may jump once more: the body's vertical velocity is set to a fixed
//! force (horizontal velocity untouched) and the flip clip plays briefly
//! before the float clip takes over. Landing re-arms it.
//!
//! Input and physics meet through a [`JumpLatch`]. The fixed tick arms the
//! latch while a secondary jump is available; the input binding consumes a
//! `Space` press only while armed and records the request, which the next
//! fixed tick turns into the impulse. Presses the latch does not want fall
//! through to lower bindings (the character's own jump). A consumed press
//! that is still pending when the body lands is handed back as a landing
//! press, for the character to turn into its ground jump.
//!
//! Nothing runs until both the physics body and the input binding exist.

use std::sync::{
    atomic::{AtomicBool, Ordering},
    Arc,
};

use replica_shared::{
    config::WorldConfig,
    physics::CharacterBody,
    resources::{AssetEvent, AssetKind, RequestId},
};
use tracing::{debug, info, warn};

use crate::{
    controls::{priority, ControlCallbacks, ControlHandle, ControlStack},
    emote::Emote,
    services::Services,
};

/// Key that triggers jumps.
pub const JUMP_CODE: &str = "Space";

/// Whether the secondary jump of the current flight is spent.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SecondaryJump {
    Available,
    Used,
}

/// Flight state of the controlled body.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JumpPhase {
    Grounded,
    Airborne {
        /// True if the flight began with a jump rather than a fall.
        primary: bool,
        secondary: SecondaryJump,
    },
}

/// Shared between the input binding and the fixed tick.
#[derive(Debug, Default)]
pub struct JumpLatch {
    armed: AtomicBool,
    requested: AtomicBool,
}

impl JumpLatch {
    /// Called from the binding. Consumes the press only when armed.
    fn press(&self) -> bool {
        if self.armed.swap(false, Ordering::SeqCst) {
            self.requested.store(true, Ordering::SeqCst);
            true
        } else {
            false
        }
    }

    fn take_request(&self) -> bool {
        self.requested.swap(false, Ordering::SeqCst)
    }

    fn arm(&self, armed: bool) {
        self.armed.store(armed, Ordering::SeqCst);
    }

    fn clear(&self) {
        self.armed.store(false, Ordering::SeqCst);
        self.requested.store(false, Ordering::SeqCst);
    }
}

/// Readiness of the collaborators the system depends on.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct InitBarrier {
    pub physics: bool,
    pub controls: bool,
}

impl InitBarrier {
    pub fn is_open(&self) -> bool {
        self.physics && self.controls
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
struct EmoteOverride {
    emote: Emote,
    /// Seconds until the flip gives way to float.
    left: Option<f32>,
}

/// Double-jump action system.
pub struct DoubleJump {
    force: f32,
    flip_secs: f32,
    phase: JumpPhase,
    /// Simulation time of the last jump (primary or secondary) this flight.
    last_jump_at: Option<f64>,
    clock: f64,
    emote: Option<EmoteOverride>,
    latch: Arc<JumpLatch>,
    control: Option<ControlHandle>,
    barrier: InitBarrier,
    preload: Option<RequestId>,
    /// Press consumed in the air but not applied before touching down.
    landing_press: bool,
}

impl DoubleJump {
    pub fn new(cfg: &WorldConfig) -> Self {
        Self {
            force: cfg.double_jump_force,
            flip_secs: cfg.double_jump_emote_secs,
            phase: JumpPhase::Grounded,
            last_jump_at: None,
            clock: 0.0,
            emote: None,
            latch: Arc::new(JumpLatch::default()),
            control: None,
            barrier: InitBarrier::default(),
            preload: None,
            landing_press: false,
        }
    }

    /// Binds input and preloads the flip clip.
    pub fn start(&mut self, controls: &mut ControlStack, services: &mut Services<'_>) {
        if self.control.is_some() {
            return;
        }
        let latch = self.latch.clone();
        self.control = Some(controls.bind(
            priority::ACTION,
            ControlCallbacks::new().on_press(move |code| code == JUMP_CODE && latch.press()),
        ));
        self.preload = Some(
            services
                .assets
                .request(AssetKind::Emote, Emote::DoubleJump.url()),
        );
        self.barrier.controls = true;
        debug!("Double jump started");
    }

    /// Releases input. Safe to call more than once.
    pub fn stop(&mut self, controls: &mut ControlStack) {
        if let Some(mut control) = self.control.take() {
            controls.release(&mut control);
        }
        self.barrier.controls = false;
        self.latch.clear();
        self.reset();
    }

    /// Reports whether the controlled body exists.
    pub fn set_physics_ready(&mut self, ready: bool) {
        self.barrier.physics = ready;
        if !ready {
            self.latch.clear();
            self.reset();
        }
    }

    pub fn is_ready(&self) -> bool {
        self.barrier.is_open()
    }

    pub fn phase(&self) -> JumpPhase {
        self.phase
    }

    pub fn last_jump_at(&self) -> Option<f64> {
        self.last_jump_at
    }

    /// Emote the action wants on the character, if any.
    pub fn emote_override(&self) -> Option<Emote> {
        self.emote.map(|o| o.emote)
    }

    /// One fixed step. Returns true when a secondary jump was applied.
    pub fn fixed_update(&mut self, dt: f32, body: &mut dyn CharacterBody) -> bool {
        if !self.is_ready() {
            return false;
        }
        self.clock += f64::from(dt);

        if body.is_grounded() {
            if self.phase != JumpPhase::Grounded {
                debug!("Landed, secondary jump re-armed");
            }
            let pending = self.latch.take_request();
            self.reset();
            self.latch.clear();
            if pending {
                debug!("Jump pressed on landing, handing it to the ground jump");
                self.landing_press = true;
            }
            return false;
        }

        if self.phase == JumpPhase::Grounded {
            let primary = body.linear_velocity().y > 0.0;
            self.phase = JumpPhase::Airborne {
                primary,
                secondary: SecondaryJump::Available,
            };
            if primary {
                self.last_jump_at = Some(self.clock);
            }
        }

        let mut jumped = false;
        if let JumpPhase::Airborne {
            primary,
            secondary: SecondaryJump::Available,
        } = self.phase
        {
            if self.latch.take_request() {
                let mut v = body.linear_velocity();
                v.y = self.force;
                body.set_linear_velocity(v);
                self.phase = JumpPhase::Airborne {
                    primary,
                    secondary: SecondaryJump::Used,
                };
                self.last_jump_at = Some(self.clock);
                self.emote = Some(EmoteOverride {
                    emote: Emote::DoubleJump,
                    left: Some(self.flip_secs),
                });
                info!(force = self.force, "Double jump");
                jumped = true;
            }
        }

        // Stale requests from a spent flight are dropped.
        self.latch.take_request();
        self.latch.arm(matches!(
            self.phase,
            JumpPhase::Airborne {
                secondary: SecondaryJump::Available,
                ..
            }
        ));
        jumped
    }

    /// Takes a press the latch consumed that the body landed before using.
    pub fn take_landing_press(&mut self) -> bool {
        std::mem::take(&mut self.landing_press)
    }

    /// Per-frame emote bookkeeping: the flip reverts to float after its time.
    pub fn update(&mut self, dt: f32) {
        let Some(o) = self.emote.as_mut() else {
            return;
        };
        if let Some(left) = o.left.as_mut() {
            *left -= dt.max(0.0);
            if *left <= 0.0 {
                self.emote = Some(EmoteOverride {
                    emote: Emote::Float,
                    left: None,
                });
            }
        }
    }

    /// An explicit teleport starts a fresh flight: the secondary jump is
    /// usable again if the body is still airborne afterwards.
    pub fn teleported(&mut self) {
        self.latch.clear();
        self.reset();
    }

    /// Logs a missing flip clip; the emote machine falls back on its own.
    pub fn on_asset(&mut self, event: &AssetEvent) {
        if self.preload != Some(event.request) {
            return;
        }
        self.preload = None;
        if let Err(e) = &event.result {
            warn!(error = %e, "Double jump clip failed to preload");
        }
    }

    fn reset(&mut self) {
        self.landing_press = false;
        self.phase = JumpPhase::Grounded;
        self.last_jump_at = None;
        self.emote = None;
    }
}
