//! # Sitting Trigger
//!
//! A seat. On activation it picks the sit animation whose start point is
//! closest to the avatar, walks the avatar there, and pushes a three-stage
//! brain: sit down, idle until the player moves, stand up.
//!
//! ```text
//!   [0] Sit{Front,Left,Right}      auto, once
//!   [1] SitIdle                    auto, infinite, advance on move
//!   [2] StandUp{Front,Left,Right}  auto, once ──▶ occupant cleared
//! ```

use bevy::prelude::*;
use tracing::{debug, warn};

use crate::armature::Armature;
use crate::brain::{AvatarTask, BrainKind, BrainMessage, ExitFlags, GenericBrain, MoveMode};
use crate::config::BehaviorConfig;
use crate::events::{BehaviorEvent, CallbackPhase, NetFlags, SeekRequest, StageEventKind};
use crate::keys::ObjectKey;
use crate::sequence::StageSequence;
use crate::stack::Avatar;
use crate::stage::{AdvancePolicy, AnimStage, ForwardPolicy, LoopCount, NotifyFlags, TriggerLink};
use crate::trigger::TRIGGERED;

bitflags::bitflags! {
    /// Sides a seat can be approached from.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct ApproachFlags: u8 {
        const FRONT = 1 << 0;
        const LEFT = 1 << 1;
        const RIGHT = 1 << 2;
    }
}

/// Approach side, sit animation, stand animation; checked in this order.
const SIT_CANDIDATES: [(ApproachFlags, &str, &str); 3] = [
    (ApproachFlags::FRONT, "SitFront", "StandUpFront"),
    (ApproachFlags::LEFT, "SitLeft", "StandUpLeft"),
    (ApproachFlags::RIGHT, "SitRight", "StandUpRight"),
];

const SIT_IDLE: &str = "SitIdle";
const STAND_STAGE: i32 = 2;

/// Where the avatar has to stand for a sit animation to end on the seat.
fn sit_start(seat: Transform, start_to_end: Transform) -> Transform {
    let rotation = start_to_end.rotation.inverse();
    let inverse = Transform {
        translation: -(rotation * start_to_end.translation),
        rotation,
        scale: Vec3::ONE,
    };
    seat.mul_transform(inverse)
}

#[derive(Component, Debug)]
pub struct SittingTrigger {
    key: ObjectKey,
    seat: Transform,
    approach: ApproachFlags,
    smart_seek: bool,
    occupant: Option<ObjectKey>,
    config: BehaviorConfig,
}

impl SittingTrigger {
    pub fn new(key: impl Into<ObjectKey>, seat: Transform, approach: ApproachFlags, config: &BehaviorConfig) -> Self {
        Self {
            key: key.into(),
            seat,
            approach,
            smart_seek: true,
            occupant: None,
            config: config.clone(),
        }
    }

    pub fn with_smart_seek(mut self, smart: bool) -> Self {
        self.smart_seek = smart;
        self
    }

    pub fn key(&self) -> &ObjectKey {
        &self.key
    }

    pub fn occupant(&self) -> Option<&ObjectKey> {
        self.occupant.as_ref()
    }

    pub fn is_occupied(&self) -> bool {
        self.occupant.is_some()
    }

    /// Sit/stand animation pair and start transform closest to the avatar.
    pub fn choose_animations(&self, armature: &dyn Armature) -> Option<(&'static str, &'static str, Transform)> {
        let position = armature.transform().translation;
        let mut best: Option<(f32, &'static str, &'static str, Transform)> = None;

        for (side, sit, stand) in SIT_CANDIDATES {
            if !self.approach.contains(side) {
                continue;
            }
            let Some(clip) = armature.find_animation(sit) else {
                warn!("seat {} can't find sit animation <{}>", self.key, sit);
                continue;
            };
            let start = sit_start(self.seat, clip.start_to_end);
            let distance = start.translation.distance_squared(position);
            if best.map_or(true, |(closest, ..)| distance < closest) {
                best = Some((distance, sit, stand, start));
            }
        }
        best.map(|(_, sit, stand, start)| (sit, stand, start))
    }

    pub fn build_brain(&self, sit: &str, stand: &str) -> GenericBrain {
        let link = TriggerLink { key: self.key.clone(), net: NetFlags::PROPAGATE };
        let mut stages = StageSequence::new(vec![
            AnimStage::auto(sit, NotifyFlags::empty()),
            AnimStage::new(SIT_IDLE)
                .with_notify(NotifyFlags::ENTER)
                .with_forward(ForwardPolicy::Auto)
                .with_advance(AdvancePolicy::OnMove)
                .with_loops(LoopCount::Infinite),
            AnimStage::auto(stand, NotifyFlags::ADVANCE),
        ]);
        for stage in stages.iter_mut() {
            stage.set_owner(Some(link.clone()));
        }

        GenericBrain::new(stages, &self.config)
            .with_kind(BrainKind::Sit)
            .with_exit_flags(ExitFlags::empty())
            .with_move_mode(MoveMode::Relative)
            .with_recipient(Some(self.key.clone()))
            .with_callbacks(None, Some(self.key.clone()))
    }

    /// React to an activation event. Refused while someone is seated.
    pub fn activate(&mut self, avatar: &mut Avatar, state: f32) -> bool {
        if state != TRIGGERED {
            return false;
        }
        if let Some(occupant) = &self.occupant {
            debug!("seat {} already taken by {}", self.key, occupant);
            return false;
        }
        let Some((sit, stand, start)) = self.choose_animations(avatar.rig()) else {
            warn!("seat {} has no usable approach", self.key);
            return false;
        };

        let avatar_key = avatar.rig().avatar_key().clone();
        let brain = self.build_brain(sit, stand);
        let seek = SeekRequest { avatar: avatar_key.clone(), target: start, smart: self.smart_seek };
        avatar.deliver(BrainMessage::Task(AvatarTask::Seek(seek)));
        avatar.deliver(BrainMessage::Task(AvatarTask::PushBrain(Box::new(brain.into()))));

        debug!("{} sitting on {} via {}", avatar_key, self.key, sit);
        self.occupant = Some(avatar_key);
        true
    }

    /// Watch outbound events for the occupant getting up.
    pub fn observe(&mut self, event: &BehaviorEvent) {
        let stood_up = match event {
            BehaviorEvent::MultiStage(event) => {
                event.kind == StageEventKind::AdvanceNextStage
                    && event.stage == STAND_STAGE
                    && event.receivers.first() == Some(&self.key)
            }
            BehaviorEvent::Callback { target, phase: CallbackPhase::End, .. } => *target == self.key,
            _ => false,
        };
        if stood_up {
            if let Some(occupant) = self.occupant.take() {
                debug!("{} left seat {}", occupant, self.key);
            }
        }
    }
}
