//! # Behavior Events
//!
//! Value-typed records produced by stages and brains. They are queued on the
//! avatar's [`Outbox`] during simulation and drained once per frame by the
//! plugin, which forwards them as Bevy messages to whatever transport or
//! script layer is listening.
//!
//! ```text
//! AnimStage ──notify──┐
//! GenericBrain ───────┼──▶ Outbox (VecDeque) ──flush──▶ MessageWriter<BehaviorEvent>
//! ClimbBrain ──probe──┘
//! ```

use bevy::prelude::*;
use std::collections::VecDeque;

use crate::keys::ObjectKey;

bitflags::bitflags! {
    /// Network broadcast flags carried by an event.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct NetFlags: u8 {
        /// Broadcast to other clients
        const PROPAGATE = 1 << 0;
        /// Broadcast even if the receiver would normally filter it
        const FORCE = 1 << 1;
    }
}

impl NetFlags {
    pub fn from_parts(propagate: bool, force: bool) -> Self {
        let mut flags = NetFlags::empty();
        flags.set(NetFlags::PROPAGATE, propagate);
        flags.set(NetFlags::FORCE, force);
        flags
    }
}

/// Which boundary of a stage an event reports.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StageEventKind {
    EnterStage,
    BeginningOfLoop,
    AdvanceNextStage,
    RegressPrevStage,
}

/// Stage boundary notification relayed to a brain's recipient.
#[derive(Debug, Clone, PartialEq)]
pub struct MultiStageEvent {
    pub sender: ObjectKey,
    pub receivers: Vec<ObjectKey>,
    /// Index of the stage inside its brain (-1 if unknown)
    pub stage: i32,
    pub kind: StageEventKind,
    pub avatar: ObjectKey,
    pub net: NetFlags,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CameraCommand {
    ForceThirdPerson,
    UndoThirdPerson,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CallbackPhase {
    Start,
    End,
}

/// Request to walk the avatar onto an anchor before a brain takes over.
#[derive(Debug, Clone, PartialEq)]
pub struct SeekRequest {
    pub avatar: ObjectKey,
    pub target: Transform,
    /// Path around obstacles instead of sliding straight there
    pub smart: bool,
}

/// Line-of-sight query issued by the climb brain. The answer comes back as a
/// `BrainMessage::ProbeHit` carrying the same `request_id`.
#[derive(Debug, Clone, PartialEq)]
pub struct ProbeRequest {
    pub avatar: ObjectKey,
    pub request_id: u32,
    pub from: Vec3,
    pub to: Vec3,
}

/// Everything the behavior core sends to the outside world.
#[derive(Message, Debug, Clone, PartialEq)]
pub enum BehaviorEvent {
    MultiStage(MultiStageEvent),
    Camera {
        avatar: ObjectKey,
        command: CameraCommand,
    },
    Callback {
        target: ObjectKey,
        avatar: ObjectKey,
        phase: CallbackPhase,
    },
    ClimbFallOff {
        avatar: ObjectKey,
        net: NetFlags,
    },
    Emote {
        avatar: ObjectKey,
        started: bool,
    },
    Probe(ProbeRequest),
    Seek(SeekRequest),
}

impl BehaviorEvent {
    /// Broadcast flags for the transport layer.
    pub fn net_flags(&self) -> NetFlags {
        match self {
            BehaviorEvent::MultiStage(event) => event.net,
            BehaviorEvent::ClimbFallOff { net, .. } => *net,
            _ => NetFlags::empty(),
        }
    }
}

// ============================================================================
// Outbox
// ============================================================================

/// Outbound queue. Owns events until they are drained.
#[derive(Debug, Clone, Default)]
pub struct Outbox {
    queue: VecDeque<BehaviorEvent>,
}

impl Outbox {
    pub fn push(&mut self, event: BehaviorEvent) {
        self.queue.push_back(event);
    }

    pub fn drain(&mut self) -> impl Iterator<Item = BehaviorEvent> + '_ {
        self.queue.drain(..)
    }

    pub fn iter(&self) -> impl Iterator<Item = &BehaviorEvent> {
        self.queue.iter()
    }

    pub fn len(&self) -> usize {
        self.queue.len()
    }

    pub fn is_empty(&self) -> bool {
        self.queue.is_empty()
    }

    pub fn clear(&mut self) {
        self.queue.clear();
    }
}
