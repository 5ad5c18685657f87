//! # Brains
//!
//! A brain is the behavior controller driving an avatar. The avatar keeps a
//! stack of them; only the top one is simulated each frame, and messages fall
//! through the stack until one consumes them.
//!
//! ```text
//! Brain
//! ├── Locomotion   stack root; never pops; queues tasks
//! ├── Generic      stage sequence with fades, exit rules, compatibility
//! └── Climb        direction-driven mode machine over fixed climb stages
//! ```
//!
//! Every variant answers the same small set of calls (`activate`, `apply`,
//! `deactivate`, `receive`, `leave_age`), dispatched with a `match`.

pub mod climb;
pub mod generic;

use std::collections::VecDeque;

use crate::armature::{Armature, ControlState};
use crate::events::SeekRequest;
use crate::stage::LoopCount;

pub use climb::{ClimbBrain, ClimbBrainRecord, ClimbCommand, ClimbDirections, ClimbMode};
pub use generic::{BrainKind, BrainMode, ExitFlags, GenericBrain, MoveMode};

// ============================================================================
// Messages
// ============================================================================

/// Work queued on a brain and run when that brain is on top of the stack.
#[derive(Debug)]
pub enum AvatarTask {
    /// Push a new brain onto the stack
    PushBrain(Box<Brain>),
    /// Pop the brain that runs this task
    PopBrain,
    /// Walk to an anchor point
    Seek(SeekRequest),
}

/// Stage jump requested of a generic brain.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StageCommand {
    /// Go to a stage index; -1 exits the brain
    GotoStage(i32),
    NextStage,
    PrevStage,
}

/// Message-driven stage jump, optionally setting time and direction with it.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct StageJump {
    pub command: StageCommand,
    /// Local time for the target stage
    pub set_time: Option<f32>,
    /// New playback direction (true = forward)
    pub set_direction: Option<bool>,
}

impl StageJump {
    pub fn new(command: StageCommand) -> Self {
        Self {
            command,
            set_time: None,
            set_direction: None,
        }
    }

    pub fn with_time(mut self, time: f32) -> Self {
        self.set_time = Some(time);
        self
    }

    pub fn with_direction(mut self, forward: bool) -> Self {
        self.set_direction = Some(forward);
        self
    }
}

/// Everything that can be sent to an avatar's brain stack.
#[derive(Debug)]
pub enum BrainMessage {
    Stage(StageJump),
    Task(AvatarTask),
    /// Raw input event
    Control(ControlState),
    Climb(ClimbCommand),
    /// Line-of-sight probe reported a hit
    ProbeHit { request_id: u32 },
    /// Retarget a stage's loop budget on a running generic brain
    SetLoopCount { stage: usize, loops: LoopCount },
}

/// Result of offering a message to one brain.
#[derive(Debug)]
pub enum Delivery {
    Consumed,
    /// Not handled here; offer it to the next brain down
    Declined(BrainMessage),
    /// Handled by queueing this task on the next brain down
    QueueOnNext(AvatarTask),
}

// ============================================================================
// Locomotion Brain
// ============================================================================

/// Bottom of every brain stack. Holds tasks until it is on top again.
#[derive(Debug, Default)]
pub struct LocomotionBrain {
    tasks: VecDeque<AvatarTask>,
}

impl LocomotionBrain {
    pub fn new() -> Self {
        Self::default()
    }
}

// ============================================================================
// Brain
// ============================================================================

#[derive(Debug)]
pub enum Brain {
    Locomotion(LocomotionBrain),
    Generic(GenericBrain),
    Climb(ClimbBrain),
}

impl From<GenericBrain> for Brain {
    fn from(brain: GenericBrain) -> Self {
        Brain::Generic(brain)
    }
}

impl From<ClimbBrain> for Brain {
    fn from(brain: ClimbBrain) -> Self {
        Brain::Climb(brain)
    }
}

impl Brain {
    pub fn name(&self) -> &'static str {
        match self {
            Brain::Locomotion(_) => "locomotion",
            Brain::Generic(_) => "generic",
            Brain::Climb(_) => "climb",
        }
    }

    /// Called once when the brain is pushed.
    pub fn activate(&mut self, armature: &mut dyn Armature) {
        match self {
            Brain::Locomotion(_) => {}
            Brain::Generic(brain) => brain.activate(armature),
            Brain::Climb(brain) => brain.activate(armature),
        }
    }

    /// Per-frame simulation. Returns false when the brain is finished.
    pub fn apply(&mut self, armature: &mut dyn Armature, time: f64, elapsed: f32) -> bool {
        match self {
            Brain::Locomotion(_) => true,
            Brain::Generic(brain) => brain.apply(armature, time, elapsed),
            Brain::Climb(brain) => brain.apply(armature, time, elapsed),
        }
    }

    /// Called once when the brain is popped.
    pub fn deactivate(&mut self, armature: &mut dyn Armature) {
        match self {
            Brain::Locomotion(_) => {}
            Brain::Generic(brain) => brain.deactivate(armature),
            Brain::Climb(brain) => brain.deactivate(armature),
        }
    }

    pub fn receive(&mut self, message: BrainMessage, armature: &mut dyn Armature) -> Delivery {
        match self {
            Brain::Locomotion(brain) => match message {
                BrainMessage::Task(task) => {
                    brain.tasks.push_back(task);
                    Delivery::Consumed
                }
                other => Delivery::Declined(other),
            },
            Brain::Generic(brain) => brain.receive(message, armature),
            Brain::Climb(brain) => brain.receive(message, armature),
        }
    }

    /// The avatar is leaving the world. Returns true if this brain should be
    /// removed without fading.
    pub fn leave_age(&mut self, armature: &mut dyn Armature) -> bool {
        match self {
            Brain::Locomotion(_) => false,
            Brain::Generic(brain) => brain.leave_age(armature),
            Brain::Climb(_) => true,
        }
    }

    /// Detach every stage this brain still holds.
    pub fn release(&mut self, armature: &mut dyn Armature) {
        match self {
            Brain::Locomotion(_) => {}
            Brain::Generic(brain) => brain.release(armature),
            Brain::Climb(brain) => brain.release(armature),
        }
    }

    fn tasks_mut(&mut self) -> &mut VecDeque<AvatarTask> {
        match self {
            Brain::Locomotion(brain) => &mut brain.tasks,
            Brain::Generic(brain) => brain.tasks_mut(),
            Brain::Climb(brain) => brain.tasks_mut(),
        }
    }

    pub fn queue_task(&mut self, task: AvatarTask) {
        self.tasks_mut().push_back(task);
    }

    pub fn next_task(&mut self) -> Option<AvatarTask> {
        self.tasks_mut().pop_front()
    }

    pub fn take_tasks(&mut self) -> VecDeque<AvatarTask> {
        std::mem::take(self.tasks_mut())
    }

    pub fn pending_tasks(&self) -> usize {
        match self {
            Brain::Locomotion(brain) => brain.tasks.len(),
            Brain::Generic(brain) => brain.pending_tasks(),
            Brain::Climb(brain) => brain.pending_tasks(),
        }
    }

    pub fn as_generic(&self) -> Option<&GenericBrain> {
        match self {
            Brain::Generic(brain) => Some(brain),
            _ => None,
        }
    }

    pub fn as_generic_mut(&mut self) -> Option<&mut GenericBrain> {
        match self {
            Brain::Generic(brain) => Some(brain),
            _ => None,
        }
    }

    pub fn as_climb(&self) -> Option<&ClimbBrain> {
        match self {
            Brain::Climb(brain) => Some(brain),
            _ => None,
        }
    }

    pub fn as_climb_mut(&mut self) -> Option<&mut ClimbBrain> {
        match self {
            Brain::Climb(brain) => Some(brain),
            _ => None,
        }
    }

    /// Human-readable state for debug overlays.
    pub fn describe(&self) -> String {
        match self {
            Brain::Locomotion(brain) => format!("Locomotion brain ({} queued tasks)", brain.tasks.len()),
            Brain::Generic(brain) => brain.describe(),
            Brain::Climb(brain) => brain.describe(),
        }
    }
}
