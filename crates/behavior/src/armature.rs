//! # Armature
//!
//! The narrow interface brains and stages use to drive an avatar, plus
//! [`AvatarRig`], the in-memory armature the Bevy plugin attaches to every
//! avatar entity.
//!
//! ## Layers
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────┐
//! │  Armature  (avatar identity, root motion, physics, input)    │
//! │  └── AnimationHost  (per-instance time / blend / fade)       │
//! ├──────────────────────────────────────────────────────────────┤
//! │  AvatarRig                                                   │
//! │  ├── AnimationLibrary  (clip name -> length, root travel)    │
//! │  ├── instances         (AnimInstanceId -> AnimInstance)      │
//! │  ├── root accumulator  (moves Transform by handle travel)    │
//! │  └── Outbox            (events for the transport layer)      │
//! └──────────────────────────────────────────────────────────────┘
//! ```
//!
//! Root motion is sampled: each instance remembers the clip time it was last
//! applied at, and `apply_root_motion` moves the avatar by the handle travel
//! between that time and the current one. `reset_root_motion` re-bases the
//! samples without moving, which is what makes a loop wrap or a stage switch
//! produce the same total motion as an uninterrupted playthrough.

use bevy::prelude::*;
use std::collections::{BTreeMap, HashMap};

use crate::events::{BehaviorEvent, Outbox};
use crate::keys::ObjectKey;

// ============================================================================
// Animation Data
// ============================================================================

/// Handle to a live animation binding on an armature.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct AnimInstanceId(pub u32);

/// Which part of the skeleton an animation drives.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Reflect)]
pub enum BodyUsage {
    #[default]
    Unknown = 0,
    Upper = 1,
    Lower = 2,
    Full = 3,
}

impl BodyUsage {
    pub fn from_u8(value: u8) -> Option<Self> {
        match value {
            0 => Some(BodyUsage::Unknown),
            1 => Some(BodyUsage::Upper),
            2 => Some(BodyUsage::Lower),
            3 => Some(BodyUsage::Full),
            _ => None,
        }
    }
}

/// Time direction hint for an animation instance.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TimeDirection {
    #[default]
    Forwards,
    Backwards,
}

/// Clip metadata the behavior core needs.
#[derive(Debug, Clone, PartialEq)]
pub struct AnimationClip {
    pub name: String,
    /// Clip length in seconds
    pub length: f32,
    /// Root "Handle" travel from the first frame to the last
    pub start_to_end: Transform,
    /// Whether the clip animates the root handle channel
    pub has_handle: bool,
    pub body_usage: BodyUsage,
}

impl AnimationClip {
    pub fn new(name: impl Into<String>, length: f32) -> Self {
        Self {
            name: name.into(),
            length,
            start_to_end: Transform::IDENTITY,
            has_handle: false,
            body_usage: BodyUsage::Full,
        }
    }

    /// Give the clip a root handle that travels by `travel` over its length.
    pub fn with_root_travel(mut self, travel: Transform) -> Self {
        self.start_to_end = travel;
        self.has_handle = true;
        self
    }

    pub fn with_body_usage(mut self, usage: BodyUsage) -> Self {
        self.body_usage = usage;
        self
    }
}

/// Clips available to avatars, keyed by name.
#[derive(Resource, Debug, Clone, Default)]
pub struct AnimationLibrary {
    clips: HashMap<String, AnimationClip>,
}

impl AnimationLibrary {
    pub fn insert(&mut self, clip: AnimationClip) {
        self.clips.insert(clip.name.clone(), clip);
    }

    pub fn with(mut self, clip: AnimationClip) -> Self {
        self.insert(clip);
        self
    }

    pub fn get(&self, name: &str) -> Option<&AnimationClip> {
        self.clips.get(name)
    }

    pub fn len(&self) -> usize {
        self.clips.len()
    }

    pub fn is_empty(&self) -> bool {
        self.clips.is_empty()
    }
}

/// Live input state of an avatar.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Reflect)]
pub struct ControlState {
    pub forward: bool,
    pub backward: bool,
    pub turn_left: bool,
    pub turn_right: bool,
    pub strafe_left: bool,
    pub strafe_right: bool,
    pub jump: bool,
    /// Dedicated "leave this behavior" key
    pub exit_mode: bool,
}

impl ControlState {
    /// Any key that would move the avatar.
    pub fn has_movement(&self) -> bool {
        self.forward
            || self.backward
            || self.turn_left
            || self.turn_right
            || self.strafe_left
            || self.strafe_right
            || self.jump
    }

    pub fn any_key(&self) -> bool {
        self.has_movement() || self.exit_mode
    }
}

// ============================================================================
// Collaborator Traits
// ============================================================================

/// Per-instance animation control.
pub trait AnimationHost {
    fn find_animation(&self, name: &str) -> Option<&AnimationClip>;
    fn attach_animation(&mut self, name: &str, blend: f32) -> Option<AnimInstanceId>;
    /// Detach instantly. Returns false for an unknown instance.
    fn detach_animation(&mut self, id: AnimInstanceId) -> bool;

    fn set_anim_time(&mut self, id: AnimInstanceId, time: f32, no_callbacks: bool);
    fn anim_time(&self, id: AnimInstanceId) -> f32;
    fn set_anim_blend(&mut self, id: AnimInstanceId, blend: f32);
    fn anim_blend(&self, id: AnimInstanceId) -> f32;
    /// Move the blend toward `target` at `rate` per second.
    fn fade_anim(&mut self, id: AnimInstanceId, target: f32, rate: f32);
    /// Stop self-playback; time is driven manually afterwards.
    fn stop_anim(&mut self, id: AnimInstanceId);
    fn set_time_direction(&mut self, id: AnimInstanceId, direction: TimeDirection);
    fn anim_at_end(&self, id: AnimInstanceId) -> bool;
}

/// Everything a brain may touch on its avatar.
pub trait Armature: AnimationHost {
    fn avatar_key(&self) -> &ObjectKey;
    fn is_local_avatar(&self) -> bool;
    fn transform(&self) -> Transform;

    // Root motion accumulator
    fn reset_root_motion(&mut self);
    fn enable_root_motion(&mut self, enabled: bool);
    fn apply_root_motion(&mut self);

    fn set_kinematic(&mut self, kinematic: bool);

    // Input
    fn controls(&self) -> ControlState;
    fn is_fb_reversed(&self) -> bool;
    fn set_reverse_fb_on_idle(&mut self, reverse: bool);
    fn set_ladder_mode(&mut self, on: bool);

    /// Restart the locomotion idle so an instant exit lines up with it.
    fn reset_idle(&mut self);
    /// Mark replicated avatar state as needing a send.
    fn dirty_sync_state(&mut self);

    fn send(&mut self, event: BehaviorEvent);
}

// ============================================================================
// Avatar Rig
// ============================================================================

/// A live animation binding on an [`AvatarRig`].
#[derive(Debug, Clone, PartialEq)]
pub struct AnimInstance {
    pub clip: AnimationClip,
    pub time: f32,
    pub blend: f32,
    pub playing: bool,
    pub direction: TimeDirection,
    fade: Option<(f32, f32)>,
    sampled: f32,
}

impl AnimInstance {
    pub fn is_fading(&self) -> bool {
        self.fade.is_some()
    }
}

/// In-memory armature: clip bindings, fades, root accumulator and input.
#[derive(Debug, Clone)]
pub struct AvatarRig {
    key: ObjectKey,
    local: bool,
    library: AnimationLibrary,
    instances: BTreeMap<AnimInstanceId, AnimInstance>,
    next_id: u32,
    transform: Transform,
    root_motion: bool,
    kinematic: bool,
    controls: ControlState,
    fb_reversed: bool,
    reverse_fb_on_idle: bool,
    ladder_mode: bool,
    idle_resets: u32,
    sync_dirty: bool,
    outbox: Outbox,
}

impl AvatarRig {
    pub fn new(key: impl Into<ObjectKey>, library: AnimationLibrary) -> Self {
        Self {
            key: key.into(),
            local: false,
            library,
            instances: BTreeMap::new(),
            next_id: 0,
            transform: Transform::IDENTITY,
            root_motion: false,
            kinematic: false,
            controls: ControlState::default(),
            fb_reversed: false,
            reverse_fb_on_idle: false,
            ladder_mode: false,
            idle_resets: 0,
            sync_dirty: false,
            outbox: Outbox::default(),
        }
    }

    /// Mark this rig as the avatar the local player controls.
    pub fn local(mut self) -> Self {
        self.local = true;
        self
    }

    pub fn with_transform(mut self, transform: Transform) -> Self {
        self.transform = transform;
        self
    }

    /// Advance fades by `elapsed` seconds.
    pub fn tick(&mut self, elapsed: f32) {
        for instance in self.instances.values_mut() {
            let Some((target, rate)) = instance.fade else {
                continue;
            };
            if rate <= 0.0 {
                instance.blend = target;
            } else if instance.blend < target {
                instance.blend = (instance.blend + rate * elapsed).min(target);
            } else {
                instance.blend = (instance.blend - rate * elapsed).max(target);
            }
            if instance.blend == target {
                instance.fade = None;
            }
        }
    }

    pub fn instance(&self, id: AnimInstanceId) -> Option<&AnimInstance> {
        self.instances.get(&id)
    }

    /// Names of all attached clips, in attach order.
    pub fn attached_clips(&self) -> Vec<&str> {
        self.instances.values().map(|i| i.clip.name.as_str()).collect()
    }

    pub fn attached_count(&self) -> usize {
        self.instances.len()
    }

    pub fn library(&self) -> &AnimationLibrary {
        &self.library
    }

    pub fn set_transform(&mut self, transform: Transform) {
        self.transform = transform;
    }

    pub fn set_controls(&mut self, controls: ControlState) {
        self.controls = controls;
    }

    pub fn set_fb_reversed(&mut self, reversed: bool) {
        self.fb_reversed = reversed;
    }

    pub fn is_kinematic(&self) -> bool {
        self.kinematic
    }

    pub fn root_motion_enabled(&self) -> bool {
        self.root_motion
    }

    pub fn reverse_fb_on_idle(&self) -> bool {
        self.reverse_fb_on_idle
    }

    pub fn ladder_mode(&self) -> bool {
        self.ladder_mode
    }

    pub fn idle_resets(&self) -> u32 {
        self.idle_resets
    }

    /// Returns and clears the replication dirty bit.
    pub fn take_sync_dirty(&mut self) -> bool {
        std::mem::take(&mut self.sync_dirty)
    }

    pub fn outbox(&self) -> &Outbox {
        &self.outbox
    }

    pub fn outbox_mut(&mut self) -> &mut Outbox {
        &mut self.outbox
    }
}

impl AnimationHost for AvatarRig {
    fn find_animation(&self, name: &str) -> Option<&AnimationClip> {
        self.library.get(name)
    }

    fn attach_animation(&mut self, name: &str, blend: f32) -> Option<AnimInstanceId> {
        let clip = self.library.get(name)?.clone();
        let id = AnimInstanceId(self.next_id);
        self.next_id = self.next_id.wrapping_add(1);
        self.instances.insert(
            id,
            AnimInstance {
                clip,
                time: 0.0,
                blend,
                playing: true,
                direction: TimeDirection::Forwards,
                fade: None,
                sampled: 0.0,
            },
        );
        Some(id)
    }

    fn detach_animation(&mut self, id: AnimInstanceId) -> bool {
        self.instances.remove(&id).is_some()
    }

    fn set_anim_time(&mut self, id: AnimInstanceId, time: f32, _no_callbacks: bool) {
        if let Some(instance) = self.instances.get_mut(&id) {
            instance.time = time;
        }
    }

    fn anim_time(&self, id: AnimInstanceId) -> f32 {
        self.instances.get(&id).map_or(0.0, |i| i.time)
    }

    fn set_anim_blend(&mut self, id: AnimInstanceId, blend: f32) {
        if let Some(instance) = self.instances.get_mut(&id) {
            instance.blend = blend;
            instance.fade = None;
        }
    }

    fn anim_blend(&self, id: AnimInstanceId) -> f32 {
        self.instances.get(&id).map_or(0.0, |i| i.blend)
    }

    fn fade_anim(&mut self, id: AnimInstanceId, target: f32, rate: f32) {
        if let Some(instance) = self.instances.get_mut(&id) {
            instance.fade = Some((target, rate));
        }
    }

    fn stop_anim(&mut self, id: AnimInstanceId) {
        if let Some(instance) = self.instances.get_mut(&id) {
            instance.playing = false;
        }
    }

    fn set_time_direction(&mut self, id: AnimInstanceId, direction: TimeDirection) {
        if let Some(instance) = self.instances.get_mut(&id) {
            instance.direction = direction;
        }
    }

    fn anim_at_end(&self, id: AnimInstanceId) -> bool {
        self.instances.get(&id).map_or(true, |i| match i.direction {
            TimeDirection::Forwards => i.time >= i.clip.length,
            TimeDirection::Backwards => i.time <= 0.0,
        })
    }
}

impl Armature for AvatarRig {
    fn avatar_key(&self) -> &ObjectKey {
        &self.key
    }

    fn is_local_avatar(&self) -> bool {
        self.local
    }

    fn transform(&self) -> Transform {
        self.transform
    }

    fn reset_root_motion(&mut self) {
        for instance in self.instances.values_mut() {
            instance.sampled = instance.time;
        }
    }

    fn enable_root_motion(&mut self, enabled: bool) {
        self.root_motion = enabled;
    }

    fn apply_root_motion(&mut self) {
        for instance in self.instances.values_mut() {
            let length = instance.clip.length;
            if self.root_motion && instance.clip.has_handle && length > 0.0 {
                let fraction = (instance.time - instance.sampled) / length;
                let travel = instance.clip.start_to_end.translation * fraction;
                self.transform.translation += self.transform.rotation * travel;
            }
            instance.sampled = instance.time;
        }
    }

    fn set_kinematic(&mut self, kinematic: bool) {
        self.kinematic = kinematic;
    }

    fn controls(&self) -> ControlState {
        self.controls
    }

    fn is_fb_reversed(&self) -> bool {
        self.fb_reversed
    }

    fn set_reverse_fb_on_idle(&mut self, reverse: bool) {
        self.reverse_fb_on_idle = reverse;
    }

    fn set_ladder_mode(&mut self, on: bool) {
        self.ladder_mode = on;
    }

    fn reset_idle(&mut self) {
        self.idle_resets += 1;
    }

    fn dirty_sync_state(&mut self) {
        self.sync_dirty = true;
    }

    fn send(&mut self, event: BehaviorEvent) {
        self.outbox.push(event);
    }
}
