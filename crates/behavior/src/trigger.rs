//! # Multistage Trigger
//!
//! A world object that, when activated, walks an avatar to its anchor and
//! hands it a generic brain built from a template stage sequence.
//!
//! ```text
//! ActivateTrigger(state 1.0)
//!   └─▶ clone template ─▶ GenericBrain ─┬─▶ Task::Seek(anchor)
//!                                       └─▶ Task::PushBrain
//! ```

use bevy::prelude::*;
use tracing::debug;

use crate::armature::{Armature, BodyUsage};
use crate::brain::{AvatarTask, BrainKind, BrainMessage, ExitFlags, GenericBrain, MoveMode};
use crate::config::BehaviorConfig;
use crate::events::{NetFlags, SeekRequest};
use crate::keys::ObjectKey;
use crate::sequence::{is_ladder_sequence, StageSequence};
use crate::stack::Avatar;
use crate::stage::{LoopCount, TriggerLink};

/// Activation state that fires a trigger.
pub const TRIGGERED: f32 = 1.0;

/// Commands addressed to a trigger rather than a running brain.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum TriggerAction {
    /// Change a template stage's loop budget for future activations
    SetLoopCount { stage: usize, loops: LoopCount },
}

#[derive(Component, Debug)]
pub struct MultistageTrigger {
    key: ObjectKey,
    template: StageSequence,
    freeze_physics: bool,
    smart_seek: bool,
    reverse_fb_on_release: bool,
    net: NetFlags,
    receivers: Vec<ObjectKey>,
    anchor: Transform,
    body_usage: BodyUsage,
    config: BehaviorConfig,
}

impl MultistageTrigger {
    pub fn new(key: impl Into<ObjectKey>, template: StageSequence, config: &BehaviorConfig) -> Self {
        Self {
            key: key.into(),
            template,
            freeze_physics: true,
            smart_seek: true,
            reverse_fb_on_release: false,
            net: NetFlags::PROPAGATE,
            receivers: Vec::new(),
            anchor: Transform::IDENTITY,
            body_usage: BodyUsage::Unknown,
            config: config.clone(),
        }
    }

    /// Move the avatar with root motion while the brain runs, instead of
    /// leaving it to physics.
    pub fn with_freeze_physics(mut self, freeze: bool) -> Self {
        self.freeze_physics = freeze;
        self
    }

    pub fn with_smart_seek(mut self, smart: bool) -> Self {
        self.smart_seek = smart;
        self
    }

    pub fn with_reverse_fb_on_release(mut self, reverse: bool) -> Self {
        self.reverse_fb_on_release = reverse;
        self
    }

    pub fn with_net(mut self, net: NetFlags) -> Self {
        self.net = net;
        self
    }

    pub fn with_receivers(mut self, receivers: Vec<ObjectKey>) -> Self {
        self.receivers = receivers;
        self
    }

    pub fn with_anchor(mut self, anchor: Transform) -> Self {
        self.anchor = anchor;
        self
    }

    pub fn with_body_usage(mut self, usage: BodyUsage) -> Self {
        self.body_usage = usage;
        self
    }

    pub fn key(&self) -> &ObjectKey {
        &self.key
    }

    pub fn template(&self) -> &StageSequence {
        &self.template
    }

    pub fn anchor(&self) -> Transform {
        self.anchor
    }

    pub fn is_ladder(&self) -> bool {
        is_ladder_sequence(&self.template, &self.config.ladder_marker)
    }

    /// Build the brain one activation would push.
    pub fn build_brain(&self) -> GenericBrain {
        let mut stages = self.template.clone_template();
        let link = TriggerLink { key: self.key.clone(), net: self.net };
        for stage in stages.iter_mut() {
            stage.set_owner(Some(link.clone()));
        }

        let kind = if self.is_ladder() { BrainKind::Ladder } else { BrainKind::Generic };
        let move_mode = if self.freeze_physics { MoveMode::Relative } else { MoveMode::Normal };

        GenericBrain::new(stages, &self.config)
            .with_kind(kind)
            .with_exit_flags(ExitFlags::ANY_TASK | ExitFlags::NEW_BRAIN)
            .with_move_mode(move_mode)
            .with_body_usage(self.body_usage)
            .with_recipient(Some(self.key.clone()))
            .with_receivers(self.receivers.clone())
            .with_reverse_fb_on_release(self.reverse_fb_on_release)
    }

    /// React to an activation event. Only `state == 1.0` triggers.
    pub fn activate(&self, avatar: &mut Avatar, state: f32) -> bool {
        if state != TRIGGERED {
            debug!("trigger {} ignoring state {}", self.key, state);
            return false;
        }

        let brain = self.build_brain();
        let seek = SeekRequest {
            avatar: avatar.rig().avatar_key().clone(),
            target: self.anchor,
            smart: self.smart_seek,
        };
        debug!("trigger {} activated by {}", self.key, seek.avatar);
        avatar.deliver(BrainMessage::Task(AvatarTask::Seek(seek)));
        avatar.deliver(BrainMessage::Task(AvatarTask::PushBrain(Box::new(brain.into()))));
        true
    }

    /// Retarget a template stage's loop budget. Returns false for a bad index.
    pub fn set_loop_count(&mut self, stage: usize, loops: LoopCount) -> bool {
        match self.template.get_mut(stage) {
            Some(stage) => {
                stage.set_loop_count(loops);
                true
            }
            None => false,
        }
    }

    pub fn handle(&mut self, action: TriggerAction) -> bool {
        match action {
            TriggerAction::SetLoopCount { stage, loops } => self.set_loop_count(stage, loops),
        }
    }
}
