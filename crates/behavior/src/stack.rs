//! # Brain Stack
//!
//! Per-avatar stack of brains. The bottom is always a locomotion brain; the
//! top one is the only brain simulated each frame.
//!
//! ```text
//!   top  ┌──────────────┐  apply() every frame; false = pop
//!        │ GenericBrain │  receive() first
//!        ├──────────────┤
//!        │ ...          │  declined messages fall through
//!        ├──────────────┤
//!   root │ Locomotion   │  never popped
//!        └──────────────┘
//! ```
//!
//! After the top brain has run, one queued task is taken from it and
//! executed (push, pop or seek).

use bevy::prelude::*;
use tracing::debug;

use crate::armature::{Armature, AvatarRig};
use crate::brain::{AvatarTask, Brain, BrainMessage, Delivery, LocomotionBrain};
use crate::events::BehaviorEvent;

// ============================================================================
// Brain Stack
// ============================================================================

#[derive(Debug)]
pub struct BrainStack {
    brains: Vec<Brain>,
}

impl Default for BrainStack {
    fn default() -> Self {
        Self { brains: vec![Brain::Locomotion(LocomotionBrain::new())] }
    }
}

impl BrainStack {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of brains, root included.
    pub fn depth(&self) -> usize {
        self.brains.len()
    }

    pub fn top(&self) -> Option<&Brain> {
        self.brains.last()
    }

    pub fn top_mut(&mut self) -> Option<&mut Brain> {
        self.brains.last_mut()
    }

    pub fn get(&self, index: usize) -> Option<&Brain> {
        self.brains.get(index)
    }

    pub fn iter(&self) -> impl Iterator<Item = &Brain> {
        self.brains.iter()
    }

    pub fn push(&mut self, mut brain: Brain, armature: &mut dyn Armature) {
        debug!("pushing {} brain at depth {}", brain.name(), self.brains.len());
        brain.activate(armature);
        self.brains.push(brain);
    }

    /// Pop the top brain. The root stays; pending tasks move down a level.
    pub fn pop(&mut self, armature: &mut dyn Armature) -> Option<Brain> {
        if self.brains.len() <= 1 {
            return None;
        }
        let mut brain = self.brains.pop()?;
        debug!("popping {} brain at depth {}", brain.name(), self.brains.len());
        brain.deactivate(armature);
        brain.release(armature);

        let tasks = brain.take_tasks();
        if let Some(top) = self.brains.last_mut() {
            for task in tasks {
                top.queue_task(task);
            }
        }
        Some(brain)
    }

    /// Run the top brain for one frame, then one of its queued tasks.
    pub fn apply(&mut self, armature: &mut dyn Armature, time: f64, elapsed: f32) {
        let keep = match self.brains.last_mut() {
            Some(top) => top.apply(armature, time, elapsed),
            None => return,
        };
        if !keep {
            self.pop(armature);
        }
        self.run_next_task(armature);
    }

    fn run_next_task(&mut self, armature: &mut dyn Armature) {
        let Some(task) = self.brains.last_mut().and_then(Brain::next_task) else {
            return;
        };
        match task {
            AvatarTask::PushBrain(brain) => self.push(*brain, armature),
            AvatarTask::PopBrain => {
                if self.pop(armature).is_none() {
                    debug!("pop task on the root brain ignored");
                }
            }
            AvatarTask::Seek(request) => armature.send(BehaviorEvent::Seek(request)),
        }
    }

    /// Offer `message` to each brain from the top down. Returns whether any
    /// brain took it.
    pub fn dispatch(&mut self, message: BrainMessage, armature: &mut dyn Armature) -> bool {
        let mut message = message;
        for index in (0..self.brains.len()).rev() {
            match self.brains[index].receive(message, armature) {
                Delivery::Consumed => return true,
                Delivery::Declined(declined) => message = declined,
                Delivery::QueueOnNext(task) => {
                    let below = index.saturating_sub(1);
                    self.brains[below].queue_task(task);
                    return true;
                }
            }
        }
        debug!("no brain took {:?}", message);
        false
    }

    /// Drop every brain that agrees to leave without fading.
    pub fn leave_age(&mut self, armature: &mut dyn Armature) {
        while let Some(top) = self.brains.last_mut() {
            if !top.leave_age(armature) {
                break;
            }
            if self.pop(armature).is_none() {
                break;
            }
        }
    }

    /// Detach every stage of every brain without running exit logic.
    pub fn release_all(&mut self, armature: &mut dyn Armature) {
        for brain in self.brains.iter_mut() {
            brain.release(armature);
        }
    }

    pub fn describe(&self) -> String {
        self.brains
            .iter()
            .rev()
            .map(Brain::describe)
            .collect::<Vec<_>>()
            .join("\n")
    }
}

// ============================================================================
// Avatar Component
// ============================================================================

/// An avatar's armature together with its brain stack.
#[derive(Component, Debug)]
pub struct Avatar {
    rig: AvatarRig,
    stack: BrainStack,
}

impl Avatar {
    pub fn new(rig: AvatarRig) -> Self {
        Self { rig, stack: BrainStack::new() }
    }

    pub fn rig(&self) -> &AvatarRig {
        &self.rig
    }

    pub fn rig_mut(&mut self) -> &mut AvatarRig {
        &mut self.rig
    }

    pub fn stack(&self) -> &BrainStack {
        &self.stack
    }

    pub fn push_brain(&mut self, brain: impl Into<Brain>) {
        self.stack.push(brain.into(), &mut self.rig);
    }

    pub fn pop_brain(&mut self) -> Option<Brain> {
        self.stack.pop(&mut self.rig)
    }

    /// Deliver a message to the stack. Control messages also update the
    /// rig's live input.
    pub fn deliver(&mut self, message: BrainMessage) -> bool {
        if let BrainMessage::Control(controls) = &message {
            self.rig.set_controls(*controls);
        }
        self.stack.dispatch(message, &mut self.rig)
    }

    /// Advance fades by `elapsed`.
    pub fn tick(&mut self, elapsed: f32) {
        self.rig.tick(elapsed);
    }

    pub fn apply(&mut self, time: f64, elapsed: f32) {
        self.stack.apply(&mut self.rig, time, elapsed);
    }

    /// Fade, simulate and move the root for one frame.
    pub fn update(&mut self, time: f64, elapsed: f32) {
        self.tick(elapsed);
        self.apply(time, elapsed);
        self.rig.apply_root_motion();
    }

    pub fn leave_age(&mut self) {
        self.stack.leave_age(&mut self.rig);
    }

    pub fn drain_events(&mut self) -> Vec<BehaviorEvent> {
        self.rig.outbox_mut().drain().collect()
    }
}

impl Drop for Avatar {
    fn drop(&mut self) {
        self.stack.release_all(&mut self.rig);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::armature::{AnimationClip, AnimationLibrary, ControlState};
    use crate::brain::{BrainMode, ClimbBrain, ClimbMode, ExitFlags, GenericBrain};
    use crate::config::BehaviorConfig;
    use crate::events::SeekRequest;
    use crate::sequence::StageSequence;
    use crate::stage::{AnimStage, NotifyFlags};

    fn avatar() -> Avatar {
        let library = AnimationLibrary::default()
            .with(AnimationClip::new("Wave", 1.0))
            .with(AnimationClip::new("Bow", 1.0));
        Avatar::new(AvatarRig::new("avatar", library))
    }

    fn generic(anim: &str) -> GenericBrain {
        GenericBrain::new(StageSequence::new(vec![AnimStage::auto(anim, NotifyFlags::empty())]), &BehaviorConfig::default())
            .with_fades(0.0, 0.0)
    }

    #[test]
    fn test_root_never_pops() {
        let mut avatar = avatar();
        assert!(avatar.pop_brain().is_none());
        assert_eq!(avatar.stack().depth(), 1);
        avatar.leave_age();
        assert_eq!(avatar.stack().depth(), 1);
    }

    #[test]
    fn test_brain_runs_and_pops() {
        let mut avatar = avatar();
        avatar.push_brain(generic("Wave"));
        assert_eq!(avatar.stack().depth(), 2);

        for _ in 0..10 {
            avatar.update(0.0, 0.25);
        }
        assert_eq!(avatar.stack().depth(), 1);
        assert_eq!(avatar.rig().attached_count(), 0);
    }

    #[test]
    fn test_tasks_run_one_per_frame() {
        let mut avatar = avatar();
        let seek = SeekRequest { avatar: "avatar".into(), target: Transform::from_xyz(1.0, 0.0, 0.0), smart: false };
        assert!(avatar.deliver(BrainMessage::Task(AvatarTask::Seek(seek.clone()))));
        assert!(avatar.deliver(BrainMessage::Task(AvatarTask::PushBrain(Box::new(generic("Bow").into())))));

        avatar.update(0.0, 0.0);
        assert_eq!(avatar.drain_events(), vec![BehaviorEvent::Seek(seek)]);
        assert_eq!(avatar.stack().depth(), 1);

        avatar.update(0.0, 0.0);
        assert_eq!(avatar.stack().depth(), 2);
        assert_eq!(avatar.rig().attached_clips(), vec!["Bow"]);
    }

    #[test]
    fn test_new_brain_replaces_exiting_brain() {
        let mut avatar = avatar();
        avatar.push_brain(generic("Wave").with_exit_flags(ExitFlags::NEW_BRAIN));
        avatar.update(0.0, 0.0);

        // Declined by the running brain, queued on the root
        assert!(avatar.deliver(BrainMessage::Task(AvatarTask::PushBrain(Box::new(generic("Bow").into())))));
        assert_eq!(avatar.stack().get(0).unwrap().pending_tasks(), 1);

        // Exit pops the old brain, then the root pushes the new one
        avatar.update(0.0, 0.1);
        assert_eq!(avatar.stack().depth(), 2);
        assert_eq!(avatar.rig().attached_clips(), vec!["Bow"]);
    }

    #[test]
    fn test_leave_age_pops_everything() {
        let mut avatar = avatar();
        avatar.push_brain(generic("Wave").with_fades(0.0, 3.0));
        avatar.push_brain(ClimbBrain::new(ClimbMode::MountingUp, &BehaviorConfig::default()));
        assert_eq!(avatar.stack().depth(), 3);

        avatar.leave_age();
        assert_eq!(avatar.stack().depth(), 1);
        assert_eq!(avatar.rig().attached_count(), 0);
        assert!(!avatar.rig().is_kinematic());
    }

    #[test]
    fn test_control_reaches_rig() {
        let mut avatar = avatar();
        let controls = ControlState { strafe_left: true, ..Default::default() };
        assert!(!avatar.deliver(BrainMessage::Control(controls)));
        assert_eq!(avatar.rig().controls(), controls);
    }

    #[test]
    fn test_exiting_input_reaches_lower_brain() {
        let mut rig = AvatarRig::new("avatar", AnimationLibrary::default().with(AnimationClip::new("Wave", 1.0)));
        let mut stack = BrainStack::new();
        stack.push(generic("Wave").with_exit_flags(ExitFlags::ANY_INPUT).into(), &mut rig);
        stack.push(generic("Wave").with_exit_flags(ExitFlags::ANY_INPUT).into(), &mut rig);

        let jump = ControlState { jump: true, ..Default::default() };
        assert!(!stack.dispatch(BrainMessage::Control(jump), &mut rig));
        for index in [1, 2] {
            let brain = stack.get(index).and_then(Brain::as_generic).unwrap();
            assert_eq!(brain.mode(), BrainMode::Exit);
        }
        stack.release_all(&mut rig);
    }

    #[test]
    fn test_drop_with_running_brain() {
        let mut avatar = avatar();
        avatar.push_brain(generic("Wave"));
        avatar.update(0.0, 0.1);
        assert!(avatar.stack().describe().contains("Generic brain"));
        drop(avatar);
    }
}
