//! # Animation Stage
//!
//! One animation step inside a brain. A stage wraps a single clip with
//! policies for how time is driven through it and what happens at either end.
//!
//! ## Policies
//!
//! | Policy   | Values                         | Meaning                                   |
//! |----------|--------------------------------|-------------------------------------------|
//! | forward  | None, Key, Auto                | what moves time forward                   |
//! | back     | None, Key, Auto                | what moves time backward                  |
//! | advance  | None, OnMove, Auto, OnAnyKey   | whether reaching the end moves on         |
//! | regress  | None, OnMove, Auto, OnAnyKey   | whether reaching the start moves back     |
//!
//! ## Timeline
//!
//! ```text
//!  0 ───────────────────────────── length
//!  │ Enter          (loop wrap) ◀──┤ loops remain: back to 0, loop += 1
//!  │                               │ exhausted: done, Advance notify
//! ```
//!
//! Stages never own their animation instance outright: `attach` binds one on
//! the armature and `detach` releases it. A stage is considered bound from
//! `attach` until `detach`, even if its clip could not be found.

use bevy::prelude::*;
use tracing::{debug, warn};

use crate::armature::{AnimInstanceId, Armature, TimeDirection};
use crate::events::{BehaviorEvent, MultiStageEvent, NetFlags, StageEventKind};
use crate::keys::ObjectKey;

// ============================================================================
// Policies
// ============================================================================

/// What drives time forward through a stage.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Reflect)]
pub enum ForwardPolicy {
    #[default]
    None = 0,
    /// Only while the forward key is held
    Key = 1,
    Auto = 2,
}

/// What drives time backward through a stage.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Reflect)]
pub enum BackPolicy {
    #[default]
    None = 0,
    Key = 1,
    Auto = 2,
}

/// Whether finishing a stage moves the brain to the next one.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Reflect)]
pub enum AdvancePolicy {
    #[default]
    None = 0,
    /// Advance at the end, or immediately when a movement key is pressed
    OnMove = 1,
    Auto = 2,
    /// Holds at the end; never moves on by itself
    OnAnyKey = 3,
}

/// Whether rewinding past the start moves the brain to the previous stage.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Reflect)]
pub enum RegressPolicy {
    #[default]
    None = 0,
    /// Holds at the start; the Regress notify still fires
    OnMove = 1,
    /// The only policy that moves back
    Auto = 2,
    OnAnyKey = 3,
}

impl ForwardPolicy {
    pub fn from_u32(value: u32) -> Option<Self> {
        match value {
            0 => Some(ForwardPolicy::None),
            1 => Some(ForwardPolicy::Key),
            2 => Some(ForwardPolicy::Auto),
            _ => None,
        }
    }
}

impl BackPolicy {
    pub fn from_u32(value: u32) -> Option<Self> {
        match value {
            0 => Some(BackPolicy::None),
            1 => Some(BackPolicy::Key),
            2 => Some(BackPolicy::Auto),
            _ => None,
        }
    }
}

impl AdvancePolicy {
    pub fn from_u32(value: u32) -> Option<Self> {
        match value {
            0 => Some(AdvancePolicy::None),
            1 => Some(AdvancePolicy::OnMove),
            2 => Some(AdvancePolicy::Auto),
            3 => Some(AdvancePolicy::OnAnyKey),
            _ => None,
        }
    }
}

impl RegressPolicy {
    pub fn from_u32(value: u32) -> Option<Self> {
        match value {
            0 => Some(RegressPolicy::None),
            1 => Some(RegressPolicy::OnMove),
            2 => Some(RegressPolicy::Auto),
            3 => Some(RegressPolicy::OnAnyKey),
            _ => None,
        }
    }
}

/// Loop budget of a stage. `Finite(0)` plays once.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Reflect)]
pub enum LoopCount {
    Finite(u32),
    Infinite,
}

impl Default for LoopCount {
    fn default() -> Self {
        LoopCount::Finite(0)
    }
}

impl LoopCount {
    /// Decode the stream form, where any negative value is infinite.
    pub fn from_wire(value: i32) -> Self {
        if value < 0 {
            LoopCount::Infinite
        } else {
            LoopCount::Finite(value as u32)
        }
    }

    pub fn to_wire(self) -> i32 {
        match self {
            LoopCount::Finite(n) => n.min(i32::MAX as u32) as i32,
            LoopCount::Infinite => -1,
        }
    }

    pub fn is_infinite(self) -> bool {
        matches!(self, LoopCount::Infinite)
    }
}

bitflags::bitflags! {
    /// Stage boundaries that produce notifications.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct NotifyFlags: u8 {
        const ENTER = 1 << 0;
        const LOOP = 1 << 1;
        const ADVANCE = 1 << 2;
        const REGRESS = 1 << 3;
    }
}

// ============================================================================
// Binding Context
// ============================================================================

/// Where a bound stage relays its notifications.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct NotifyRelay {
    /// Index of the stage inside its brain
    pub stage_index: i32,
    /// Without a recipient, notifications are dropped
    pub recipient: Option<ObjectKey>,
    pub receivers: Vec<ObjectKey>,
}

/// Link back to the trigger a stage was cloned from.
#[derive(Debug, Clone, PartialEq)]
pub struct TriggerLink {
    pub key: ObjectKey,
    pub net: NetFlags,
}

/// Outcome of [`AnimStage::move_relative`].
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct StageMove {
    /// The brain should leave this stage
    pub done: bool,
    /// Time left over past the boundary (negative when moving backward)
    pub overrun: f32,
    /// Which end the stage finished at
    pub forward: bool,
}

impl StageMove {
    fn hold() -> Self {
        Self { done: false, overrun: 0.0, forward: true }
    }
}

// ============================================================================
// Stage
// ============================================================================

/// A single animation step with timing, looping and transition policy.
#[derive(Debug, PartialEq)]
pub struct AnimStage {
    anim_name: String,
    notify: NotifyFlags,
    forward: ForwardPolicy,
    back: BackPolicy,
    advance: AdvancePolicy,
    regress: RegressPolicy,
    loops: LoopCount,
    advance_to: Option<i32>,
    regress_to: Option<i32>,
    owner: Option<TriggerLink>,

    // Runtime state
    local_time: f32,
    length: f32,
    cur_loop: u32,
    attached: bool,
    /// Attached when its state was saved; cleared by the next attach
    resume_attached: bool,
    done: bool,
    sent: NotifyFlags,
    reverse_on_idle: bool,
    has_handle: bool,
    instance: Option<AnimInstanceId>,
    relay: Option<NotifyRelay>,
    bound_once: bool,
}

impl AnimStage {
    /// A stage that does nothing until policies are set.
    pub fn new(anim_name: impl Into<String>) -> Self {
        Self {
            anim_name: anim_name.into(),
            notify: NotifyFlags::empty(),
            forward: ForwardPolicy::None,
            back: BackPolicy::None,
            advance: AdvancePolicy::None,
            regress: RegressPolicy::None,
            loops: LoopCount::Finite(0),
            advance_to: None,
            regress_to: None,
            owner: None,
            local_time: 0.0,
            length: 0.0,
            cur_loop: 0,
            attached: false,
            resume_attached: false,
            done: false,
            sent: NotifyFlags::empty(),
            reverse_on_idle: false,
            has_handle: false,
            instance: None,
            relay: None,
            bound_once: false,
        }
    }

    /// Plays forward automatically and advances at the end.
    pub fn auto(anim_name: impl Into<String>, notify: NotifyFlags) -> Self {
        Self::new(anim_name)
            .with_notify(notify)
            .with_forward(ForwardPolicy::Auto)
            .with_advance(AdvancePolicy::Auto)
    }

    pub fn with_notify(mut self, notify: NotifyFlags) -> Self {
        self.notify = notify;
        self
    }

    pub fn with_forward(mut self, forward: ForwardPolicy) -> Self {
        self.forward = forward;
        self
    }

    pub fn with_back(mut self, back: BackPolicy) -> Self {
        self.back = back;
        self
    }

    pub fn with_advance(mut self, advance: AdvancePolicy) -> Self {
        self.advance = advance;
        self
    }

    pub fn with_regress(mut self, regress: RegressPolicy) -> Self {
        self.regress = regress;
        self
    }

    pub fn with_loops(mut self, loops: LoopCount) -> Self {
        self.loops = loops;
        self
    }

    /// Jump to `stage` instead of the following one when done moving forward.
    pub fn with_advance_to(mut self, stage: Option<i32>) -> Self {
        self.advance_to = stage;
        self
    }

    /// Jump to `stage` instead of the preceding one when done moving backward.
    pub fn with_regress_to(mut self, stage: Option<i32>) -> Self {
        self.regress_to = stage;
        self
    }

    /// Copy the template part of this stage. Runtime state starts fresh and
    /// the copy is unbound.
    pub fn clone_template(&self) -> Self {
        Self {
            anim_name: self.anim_name.clone(),
            notify: self.notify,
            forward: self.forward,
            back: self.back,
            advance: self.advance,
            regress: self.regress,
            loops: self.loops,
            advance_to: self.advance_to,
            regress_to: self.regress_to,
            owner: self.owner.clone(),
            ..Self::new(String::new())
        }
    }

    // ------------------------------------------------------------------------
    // Accessors
    // ------------------------------------------------------------------------

    pub fn anim_name(&self) -> &str {
        &self.anim_name
    }

    pub fn notify_flags(&self) -> NotifyFlags {
        self.notify
    }

    pub fn set_notify_flags(&mut self, notify: NotifyFlags) {
        self.notify = notify;
    }

    pub fn forward_policy(&self) -> ForwardPolicy {
        self.forward
    }

    pub fn back_policy(&self) -> BackPolicy {
        self.back
    }

    pub fn advance_policy(&self) -> AdvancePolicy {
        self.advance
    }

    pub fn regress_policy(&self) -> RegressPolicy {
        self.regress
    }

    pub fn loops(&self) -> LoopCount {
        self.loops
    }

    pub fn advance_to(&self) -> Option<i32> {
        self.advance_to
    }

    pub fn regress_to(&self) -> Option<i32> {
        self.regress_to
    }

    pub fn local_time(&self) -> f32 {
        self.local_time
    }

    pub fn length(&self) -> f32 {
        self.length
    }

    pub fn current_loop(&self) -> u32 {
        self.cur_loop
    }

    pub fn is_attached(&self) -> bool {
        self.attached
    }

    /// Restored from a record written while attached, and not yet re-attached.
    pub fn was_attached(&self) -> bool {
        self.resume_attached
    }

    /// Bound to a brain, with or without a live instance.
    pub fn is_bound(&self) -> bool {
        self.relay.is_some()
    }

    pub fn is_done(&self) -> bool {
        self.done
    }

    pub fn sent_notifies(&self) -> NotifyFlags {
        self.sent
    }

    pub fn instance(&self) -> Option<AnimInstanceId> {
        self.instance
    }

    pub fn has_handle(&self) -> bool {
        self.has_handle
    }

    pub fn reverse_on_idle(&self) -> bool {
        self.reverse_on_idle
    }

    pub fn set_reverse_on_idle(&mut self, reverse: bool) {
        self.reverse_on_idle = reverse;
    }

    pub fn owner(&self) -> Option<&TriggerLink> {
        self.owner.as_ref()
    }

    pub fn set_owner(&mut self, owner: Option<TriggerLink>) {
        self.owner = owner;
    }

    /// Stage index to go to after finishing forward.
    pub fn next_stage(&self, current: i32) -> i32 {
        self.advance_to.unwrap_or(current + 1)
    }

    /// Stage index to go to after finishing backward.
    pub fn prev_stage(&self, current: i32) -> i32 {
        self.regress_to.unwrap_or(current - 1)
    }

    /// Retarget the loop budget. A running stage jumps to its final loop,
    /// so the loop in progress is the last one played.
    pub fn set_loop_count(&mut self, loops: LoopCount) {
        if let LoopCount::Finite(n) = loops {
            if self.is_bound() && n >= self.cur_loop {
                self.cur_loop = n;
            }
            self.cur_loop = self.cur_loop.min(n);
        }
        self.loops = loops;
    }

    /// Overwrite the runtime counters. Used when restoring saved state; the
    /// stage stays unbound until its brain attaches it again.
    pub(crate) fn restore_runtime(&mut self, local_time: f32, length: f32, cur_loop: u32, attached: bool) {
        self.local_time = local_time;
        self.length = length;
        self.cur_loop = match self.loops {
            LoopCount::Finite(n) => cur_loop.min(n),
            LoopCount::Infinite => cur_loop,
        };
        self.attached = false;
        self.resume_attached = attached;
    }

    // ------------------------------------------------------------------------
    // Binding
    // ------------------------------------------------------------------------

    /// Bind this stage to a live animation instance. Returns the instance, or
    /// `None` when the clip cannot be found; the stage then runs without a
    /// visual effect.
    pub fn attach(
        &mut self,
        armature: &mut dyn Armature,
        relay: NotifyRelay,
        initial_blend: f32,
    ) -> Option<AnimInstanceId> {
        self.relay = Some(relay);
        self.bound_once = true;
        self.resume_attached = false;
        self.sent = NotifyFlags::empty();

        if let Some(id) = self.instance {
            armature.set_anim_blend(id, initial_blend);
        } else {
            let clip = armature
                .find_animation(&self.anim_name)
                .map(|clip| (clip.length, clip.has_handle));
            match clip {
                Some((length, has_handle)) => {
                    self.length = length;
                    self.has_handle = has_handle;
                    self.instance = armature.attach_animation(&self.anim_name, initial_blend);
                    if let Some(id) = self.instance {
                        armature.set_anim_time(id, self.local_time, false);
                    }
                    debug!("attached stage {}", self.anim_name);
                }
                None => {
                    warn!("Can't find animation <{}> for animation stage", self.anim_name);
                }
            }
        }

        if let Some(id) = self.instance {
            armature.stop_anim(id);
            self.attached = true;
        }
        self.instance
    }

    /// Release the animation instance. Returns false if nothing was released.
    pub fn detach(&mut self, armature: &mut dyn Armature) -> bool {
        if self.relay.is_none() {
            debug_assert!(self.bound_once, "detaching stage {} that was never attached", self.anim_name);
            debug!("stage {} already detached", self.anim_name);
            self.attached = false;
            return false;
        }

        debug!("detaching stage {}", self.anim_name);
        self.relay = None;
        self.attached = false;
        match self.instance.take() {
            Some(id) => armature.detach_animation(id),
            None => false,
        }
    }

    /// Rewind to the start (or end) and re-base the root accumulator.
    pub fn reset(&mut self, armature: &mut dyn Armature, at_start: bool) {
        let time = if at_start { 0.0 } else { self.length };
        self.reset_at_time(armature, time);
    }

    /// Jump to `local_time` and re-base the root accumulator.
    pub fn reset_at_time(&mut self, armature: &mut dyn Armature, local_time: f32) {
        self.set_local_time(armature, local_time, true);
        armature.reset_root_motion();
        self.sent = NotifyFlags::empty();
        self.done = false;
    }

    pub fn set_local_time(&mut self, armature: &mut dyn Armature, time: f32, no_callbacks: bool) {
        self.local_time = time;
        if let Some(id) = self.instance {
            armature.set_anim_time(id, time, no_callbacks);
        }
    }

    // ------------------------------------------------------------------------
    // Movement
    // ------------------------------------------------------------------------

    /// Move local time by `delta` seconds.
    pub fn move_relative(&mut self, delta: f32, armature: &mut dyn Armature) -> StageMove {
        if self.local_time == 0.0 && delta >= 0.0 && !self.sent.contains(NotifyFlags::ENTER) {
            // At the start and moving forward or standing still
            self.send_notify(NotifyFlags::ENTER, StageEventKind::EnterStage, armature);
            self.sent.insert(NotifyFlags::ENTER);
        }

        let controls = armature.controls();
        let forced = match self.advance {
            AdvancePolicy::OnMove => controls.has_movement() || controls.exit_mode,
            _ => false,
        };
        if forced {
            if !self.sent.contains(NotifyFlags::ADVANCE) {
                self.send_notify(NotifyFlags::ADVANCE, StageEventKind::AdvanceNextStage, armature);
                self.sent.insert(NotifyFlags::ADVANCE);
            }
            self.done = true;
            return StageMove { done: true, overrun: 0.0, forward: true };
        }

        if delta == 0.0 {
            StageMove::hold()
        } else if delta < 0.0 {
            self.move_backward(delta, armature)
        } else {
            self.move_forward(delta, armature)
        }
    }

    fn move_forward(&mut self, delta: f32, armature: &mut dyn Armature) -> StageMove {
        if self.local_time >= self.length && self.advance == AdvancePolicy::None {
            // Parked at the end; don't keep firing
            return StageMove::hold();
        }

        let mut target = self.local_time + delta;
        if let Some(id) = self.instance {
            armature.set_time_direction(id, TimeDirection::Forwards);
        }

        if target >= self.length {
            self.set_local_time(armature, self.length, false);
            armature.apply_root_motion();

            let loops_remain = match self.loops {
                LoopCount::Finite(n) => self.cur_loop < n,
                LoopCount::Infinite => true,
            };
            if loops_remain {
                self.set_local_time(armature, 0.0, true);
                armature.reset_root_motion();
                self.cur_loop = self.cur_loop.saturating_add(1);
                target = if self.length > 0.0 { target % self.length } else { 0.0 };
                self.send_notify(NotifyFlags::LOOP, StageEventKind::BeginningOfLoop, armature);
            } else {
                self.done = true;
                let overrun = target - self.length;
                return StageMove { done: self.try_advance(armature), overrun, forward: true };
            }
        }

        self.set_local_time(armature, target, false);
        StageMove::hold()
    }

    fn move_backward(&mut self, delta: f32, armature: &mut dyn Armature) -> StageMove {
        if self.local_time <= 0.0 && self.regress == RegressPolicy::None {
            // Parked at the start; don't keep firing
            return StageMove { forward: false, ..StageMove::hold() };
        }

        let mut target = self.local_time + delta;
        if let Some(id) = self.instance {
            armature.set_time_direction(id, TimeDirection::Backwards);
        }

        if target <= 0.0 {
            self.set_local_time(armature, 0.0, false);
            armature.apply_root_motion();

            let loops_remain = match self.loops {
                LoopCount::Finite(_) => self.cur_loop > 0,
                LoopCount::Infinite => true,
            };
            if loops_remain {
                self.set_local_time(armature, self.length, true);
                armature.reset_root_motion();
                if !self.loops.is_infinite() {
                    self.cur_loop -= 1;
                }
                target = if self.length > 0.0 { self.length - (-target % self.length) } else { 0.0 };
                self.send_notify(NotifyFlags::LOOP, StageEventKind::BeginningOfLoop, armature);
            } else {
                self.done = true;
                return StageMove { done: self.try_regress(armature), overrun: target, forward: false };
            }
        }

        self.set_local_time(armature, target, false);
        StageMove { forward: false, ..StageMove::hold() }
    }

    fn try_advance(&mut self, armature: &mut dyn Armature) -> bool {
        // Notify at the point where we would advance, whether or not we do
        if !self.sent.contains(NotifyFlags::ADVANCE) {
            self.send_notify(NotifyFlags::ADVANCE, StageEventKind::AdvanceNextStage, armature);
            self.sent.insert(NotifyFlags::ADVANCE);
        }
        matches!(self.advance, AdvancePolicy::Auto | AdvancePolicy::OnMove)
    }

    fn try_regress(&mut self, armature: &mut dyn Armature) -> bool {
        if !self.sent.contains(NotifyFlags::REGRESS) {
            self.send_notify(NotifyFlags::REGRESS, StageEventKind::RegressPrevStage, armature);
            self.sent.insert(NotifyFlags::REGRESS);
        }
        matches!(self.regress, RegressPolicy::Auto)
    }

    /// Send a notification if `mask` was requested. Returns whether it was
    /// requested; delivery still needs a recipient on the relay.
    fn send_notify(&self, mask: NotifyFlags, kind: StageEventKind, armature: &mut dyn Armature) -> bool {
        if !self.notify.intersects(mask) {
            return false;
        }

        let Some(relay) = &self.relay else {
            return true;
        };
        let Some(recipient) = &relay.recipient else {
            return true;
        };

        let avatar = armature.avatar_key().clone();
        let (sender, net) = match &self.owner {
            Some(link) => (link.key.clone(), link.net),
            None => (avatar.clone(), NetFlags::empty()),
        };
        let mut receivers = Vec::with_capacity(relay.receivers.len() + 1);
        receivers.push(recipient.clone());
        receivers.extend(relay.receivers.iter().cloned());

        armature.send(BehaviorEvent::MultiStage(MultiStageEvent {
            sender,
            receivers,
            stage: relay.stage_index,
            kind,
            avatar,
            net,
        }));
        true
    }

    /// One-line debug summary.
    pub fn describe(&self) -> String {
        let mut line = format!("{} ", self.anim_name);
        match self.loops {
            LoopCount::Finite(0) => {}
            LoopCount::Finite(n) => line.push_str(&format!("loop({}/{}) ", self.cur_loop, n)),
            LoopCount::Infinite => line.push_str(&format!("loop({}/inf) ", self.cur_loop)),
        }
        line.push_str(&format!("time: ({:.2}/{:.2})", self.local_time, self.length));
        line
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::armature::{AnimationClip, AnimationLibrary, AvatarRig};

    fn rig() -> AvatarRig {
        let library = AnimationLibrary::default()
            .with(AnimationClip::new("Bow", 2.0))
            .with(AnimationClip::new("Walk", 1.0).with_root_travel(Transform::from_xyz(0.0, 0.0, 1.0)));
        AvatarRig::new("avatar", library)
    }

    fn relay() -> NotifyRelay {
        NotifyRelay {
            stage_index: 0,
            recipient: Some(ObjectKey::new("script")),
            receivers: vec![],
        }
    }

    fn kinds(rig: &mut AvatarRig) -> Vec<StageEventKind> {
        rig.outbox_mut()
            .drain()
            .filter_map(|e| match e {
                BehaviorEvent::MultiStage(m) => Some(m.kind),
                _ => None,
            })
            .collect()
    }

    #[test]
    fn test_scenario_auto_advance_once() {
        let mut rig = rig();
        let mut stage = AnimStage::auto("Bow", NotifyFlags::ADVANCE);
        stage.attach(&mut rig, relay(), 1.0);

        assert!(!stage.move_relative(0.5, &mut rig).done);
        assert!(!stage.move_relative(1.0, &mut rig).done);
        let result = stage.move_relative(0.5, &mut rig);
        assert!(result.done);
        assert_eq!(result.overrun, 0.0);

        // Further moves do not repeat the notification
        stage.move_relative(0.5, &mut rig);
        assert_eq!(kinds(&mut rig), vec![StageEventKind::AdvanceNextStage]);
    }

    #[test]
    fn test_scenario_no_regress_at_rest() {
        let mut rig = rig();
        let mut stage = AnimStage::new("Bow").with_notify(NotifyFlags::all());
        stage.attach(&mut rig, relay(), 1.0);

        let result = stage.move_relative(-0.25, &mut rig);
        assert!(!result.done);
        assert_eq!(stage.local_time(), 0.0);
        assert!(kinds(&mut rig).is_empty());
    }

    #[test]
    fn test_advance_none_holds_at_end() {
        let mut rig = rig();
        let mut stage = AnimStage::new("Bow")
            .with_forward(ForwardPolicy::Auto)
            .with_notify(NotifyFlags::ADVANCE);
        stage.attach(&mut rig, relay(), 1.0);

        assert!(!stage.move_relative(3.0, &mut rig).done);
        assert_eq!(stage.local_time(), 2.0);
        assert!(!stage.move_relative(1.0, &mut rig).done);
        assert_eq!(kinds(&mut rig), vec![StageEventKind::AdvanceNextStage]);
    }

    #[test]
    fn test_enter_notify_once() {
        let mut rig = rig();
        let mut stage = AnimStage::auto("Bow", NotifyFlags::ENTER);
        stage.attach(&mut rig, relay(), 1.0);

        stage.move_relative(0.0, &mut rig);
        stage.move_relative(0.0, &mut rig);
        assert_eq!(kinds(&mut rig), vec![StageEventKind::EnterStage]);

        // Reset re-arms it
        stage.reset(&mut rig, true);
        stage.move_relative(0.1, &mut rig);
        assert_eq!(kinds(&mut rig), vec![StageEventKind::EnterStage]);
    }

    #[test]
    fn test_loops_wrap_and_stay_in_budget() {
        let mut rig = rig();
        let mut stage = AnimStage::auto("Bow", NotifyFlags::LOOP).with_loops(LoopCount::Finite(2));
        stage.attach(&mut rig, relay(), 1.0);

        let mut done = false;
        for _ in 0..20 {
            done = stage.move_relative(0.75, &mut rig).done;
            assert!(stage.current_loop() <= 2);
            assert!(stage.local_time() >= 0.0 && stage.local_time() <= stage.length());
            if done {
                break;
            }
        }
        assert!(done);
        assert_eq!(stage.current_loop(), 2);
        assert_eq!(kinds(&mut rig).len(), 2);
    }

    #[test]
    fn test_wrap_keeps_remainder() {
        let mut rig = rig();
        let mut stage = AnimStage::auto("Bow", NotifyFlags::empty()).with_loops(LoopCount::Infinite);
        stage.attach(&mut rig, relay(), 1.0);

        stage.move_relative(1.5, &mut rig);
        stage.move_relative(1.0, &mut rig);
        assert!((stage.local_time() - 0.5).abs() < 1e-5);
        assert_eq!(stage.current_loop(), 1);
    }

    #[test]
    fn test_backward_loop_and_regress() {
        let mut rig = rig();
        let mut stage = AnimStage::new("Bow")
            .with_back(BackPolicy::Auto)
            .with_regress(RegressPolicy::Auto)
            .with_notify(NotifyFlags::REGRESS);
        stage.attach(&mut rig, relay(), 1.0);
        stage.set_local_time(&mut rig, 1.0, false);

        assert!(!stage.move_relative(-0.5, &mut rig).done);
        assert!((stage.local_time() - 0.5).abs() < 1e-5);

        let result = stage.move_relative(-1.0, &mut rig);
        assert!(result.done);
        assert!(!result.forward);
        assert!((result.overrun + 0.5).abs() < 1e-5);
        assert_eq!(kinds(&mut rig), vec![StageEventKind::RegressPrevStage]);
    }

    #[test]
    fn test_forced_advance_on_move() {
        let mut rig = rig();
        let mut stage = AnimStage::new("Bow")
            .with_forward(ForwardPolicy::Auto)
            .with_advance(AdvancePolicy::OnMove)
            .with_loops(LoopCount::Infinite)
            .with_notify(NotifyFlags::ADVANCE);
        stage.attach(&mut rig, relay(), 1.0);

        assert!(!stage.move_relative(0.0, &mut rig).done);
        rig.set_controls(crate::armature::ControlState { forward: true, ..Default::default() });
        let result = stage.move_relative(0.0, &mut rig);
        assert!(result.done);
        assert!(result.forward);
        assert_eq!(kinds(&mut rig), vec![StageEventKind::AdvanceNextStage]);
    }

    #[test]
    fn test_regress_on_move_holds_at_start() {
        let mut rig = rig();
        let mut stage = AnimStage::new("Bow")
            .with_back(BackPolicy::Auto)
            .with_regress(RegressPolicy::OnMove)
            .with_notify(NotifyFlags::REGRESS);
        stage.attach(&mut rig, relay(), 1.0);
        stage.set_local_time(&mut rig, 1.0, false);

        let result = stage.move_relative(-1.5, &mut rig);
        assert!(!result.done);
        assert!(!result.forward);
        assert_eq!(stage.local_time(), 0.0);
        assert!(!stage.move_relative(-0.5, &mut rig).done);
        assert_eq!(stage.local_time(), 0.0);
        assert_eq!(kinds(&mut rig), vec![StageEventKind::RegressPrevStage]);
    }

    #[test]
    fn test_any_key_advance_holds_at_end() {
        let mut rig = rig();
        let mut stage = AnimStage::new("Bow")
            .with_forward(ForwardPolicy::Auto)
            .with_advance(AdvancePolicy::OnAnyKey)
            .with_notify(NotifyFlags::ADVANCE);
        stage.attach(&mut rig, relay(), 1.0);
        rig.set_controls(crate::armature::ControlState { jump: true, forward: true, ..Default::default() });

        // A held key never forces the stage on
        assert!(!stage.move_relative(0.0, &mut rig).done);
        assert!(kinds(&mut rig).is_empty());
        assert!(!stage.move_relative(1.0, &mut rig).done);
        assert_eq!(stage.local_time(), 1.0);

        assert!(!stage.move_relative(1.5, &mut rig).done);
        assert_eq!(stage.local_time(), 2.0);
        assert!(!stage.move_relative(1.0, &mut rig).done);
        assert_eq!(kinds(&mut rig), vec![StageEventKind::AdvanceNextStage]);
    }

    #[test]
    fn test_detach_twice() {
        let mut rig = rig();
        let mut stage = AnimStage::auto("Bow", NotifyFlags::empty());
        assert!(stage.attach(&mut rig, relay(), 1.0).is_some());
        assert!(stage.is_attached());
        assert!(stage.detach(&mut rig));
        assert!(!stage.detach(&mut rig));
        assert!(!stage.is_attached());
        assert_eq!(rig.attached_count(), 0);
    }

    #[test]
    fn test_missing_animation_still_runs() {
        let mut rig = rig();
        let mut stage = AnimStage::auto("Nope", NotifyFlags::ENTER | NotifyFlags::ADVANCE);
        assert!(stage.attach(&mut rig, relay(), 1.0).is_none());
        assert!(!stage.is_attached());
        assert!(stage.is_bound());

        let result = stage.move_relative(0.1, &mut rig);
        assert!(result.done);
        assert_eq!(
            kinds(&mut rig),
            vec![StageEventKind::EnterStage, StageEventKind::AdvanceNextStage]
        );
        assert!(!stage.detach(&mut rig));
    }

    #[test]
    fn test_notify_sender_and_receivers() {
        let mut rig = rig();
        let mut stage = AnimStage::auto("Bow", NotifyFlags::ENTER);
        stage.set_owner(Some(TriggerLink {
            key: ObjectKey::new("door"),
            net: NetFlags::PROPAGATE,
        }));
        let relay = NotifyRelay {
            stage_index: 3,
            recipient: Some(ObjectKey::new("script")),
            receivers: vec![ObjectKey::new("ui")],
        };
        stage.attach(&mut rig, relay, 1.0);
        stage.move_relative(0.1, &mut rig);

        let events: Vec<_> = rig.outbox_mut().drain().collect();
        match &events[..] {
            [BehaviorEvent::MultiStage(event)] => {
                assert_eq!(event.sender, ObjectKey::new("door"));
                assert_eq!(event.avatar, ObjectKey::new("avatar"));
                assert_eq!(event.receivers, vec![ObjectKey::new("script"), ObjectKey::new("ui")]);
                assert_eq!(event.stage, 3);
                assert_eq!(event.net, NetFlags::PROPAGATE);
            }
            other => panic!("unexpected events {:?}", other),
        }
    }

    #[test]
    fn test_no_recipient_drops_notify() {
        let mut rig = rig();
        let mut stage = AnimStage::auto("Bow", NotifyFlags::all());
        stage.attach(&mut rig, NotifyRelay::default(), 1.0);
        stage.move_relative(5.0, &mut rig);
        assert!(rig.outbox().is_empty());
    }

    #[test]
    fn test_jump_targets() {
        let stage = AnimStage::new("Bow").with_advance_to(Some(4)).with_regress_to(Some(-1));
        assert_eq!(stage.next_stage(1), 4);
        assert_eq!(stage.prev_stage(1), -1);

        let plain = AnimStage::new("Bow");
        assert_eq!(plain.next_stage(1), 2);
        assert_eq!(plain.prev_stage(1), 0);
    }

    #[test]
    fn test_set_loop_count() {
        let mut rig = rig();
        let mut template = AnimStage::auto("Bow", NotifyFlags::empty());
        template.set_loop_count(LoopCount::Finite(3));
        assert_eq!(template.current_loop(), 0);

        let mut running = template.clone_template();
        running.attach(&mut rig, relay(), 1.0);
        running.move_relative(2.5, &mut rig);
        assert_eq!(running.current_loop(), 1);
        running.set_loop_count(LoopCount::Finite(5));
        assert_eq!(running.current_loop(), 5);
        running.set_loop_count(LoopCount::Finite(2));
        assert_eq!(running.current_loop(), 2);
    }

    #[test]
    fn test_root_motion_across_wrap() {
        let mut rig = rig();
        rig.enable_root_motion(true);
        let mut stage = AnimStage::auto("Walk", NotifyFlags::empty()).with_loops(LoopCount::Infinite);
        stage.attach(&mut rig, relay(), 1.0);

        for _ in 0..5 {
            stage.move_relative(0.5, &mut rig);
            rig.apply_root_motion();
        }
        assert!((rig.transform().translation.z - 2.5).abs() < 1e-4);
    }

    #[test]
    fn test_clone_template_resets_runtime() {
        let mut rig = rig();
        let mut stage = AnimStage::auto("Bow", NotifyFlags::ENTER).with_loops(LoopCount::Finite(1));
        stage.attach(&mut rig, relay(), 1.0);
        stage.move_relative(1.0, &mut rig);

        let copy = stage.clone_template();
        assert_eq!(copy.local_time(), 0.0);
        assert!(!copy.is_attached());
        assert!(copy.instance().is_none());
        assert_eq!(copy.loops(), LoopCount::Finite(1));
        stage.detach(&mut rig);
    }
}
