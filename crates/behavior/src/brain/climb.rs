//! # Climb Brain
//!
//! Free climbing on a wall. Unlike the generic brain there is no fixed
//! stage order: every time a stage finishes, the brain picks the next mode
//! from the direction the player is pushing, which directions the wall
//! allows, and which ones the last probe found blocked.
//!
//! ```text
//!   Mounting* ──┐
//!               ├──▶ Climbing* ◀──▶ Idle
//!   Climbing* ──┘        │
//!                        ├──▶ Dismounting* ──▶ Finishing
//!   any (except exiting) └──▶ Releasing / FallingOff ──▶ Finishing
//! ```
//!
//! Release and fall-off play an exit stage on top of the current climb
//! stage. Once the exit stage has fully blended in, the climb stage is
//! dropped and the exit stage fades out; the brain ends when it is both
//! faded and finished.
//!
//! Probes are issued at the end of every frame and their hits arrive before
//! the next one, so mode choices always see the previous frame's blockers.

use std::collections::VecDeque;

use bevy::prelude::*;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::armature::Armature;
use crate::config::BehaviorConfig;
use crate::error::BehaviorResult;
use crate::events::{BehaviorEvent, NetFlags, ProbeRequest};
use crate::sequence::StageSequence;
use crate::stage::{AnimStage, NotifyFlags, NotifyRelay, RegressPolicy};

use super::{AvatarTask, BrainMessage, Delivery};

// ============================================================================
// Modes and Directions
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ClimbMode {
    Inactive = 0,
    Unknown,
    Finishing,
    Done,
    ClimbingUp,
    ClimbingDown,
    ClimbingLeft,
    ClimbingRight,
    MountingUp,
    MountingDown,
    MountingLeft,
    MountingRight,
    DismountingUp,
    DismountingDown,
    DismountingLeft,
    DismountingRight,
    Idle,
    Releasing,
    FallingOff,
}

bitflags::bitflags! {
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct ClimbDirections: u8 {
        const UP = 1 << 0;
        const DOWN = 1 << 1;
        const LEFT = 1 << 2;
        const RIGHT = 1 << 3;
        const CENTER = 1 << 4;
    }
}

impl ClimbDirections {
    const CARDINAL: [ClimbDirections; 4] =
        [ClimbDirections::UP, ClimbDirections::DOWN, ClimbDirections::LEFT, ClimbDirections::RIGHT];
}

/// Commands from the wall (or script) to a climbing avatar.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClimbCommand {
    EnableClimb { direction: ClimbDirections, enable: bool },
    EnableDismount { direction: ClimbDirections, enable: bool },
    /// Let go on purpose
    Release,
    /// Knocked off
    FallOff,
}

/// Stage slots in the brain's sequence, in build order.
const STAGE_TABLE: [(ClimbMode, &str); 15] = [
    (ClimbMode::ClimbingUp, "WallClimbUp"),
    (ClimbMode::ClimbingDown, "WallClimbDown"),
    (ClimbMode::ClimbingLeft, "WallClimbLeft"),
    (ClimbMode::ClimbingRight, "WallClimbRight"),
    (ClimbMode::MountingUp, "WallClimbMountUp"),
    (ClimbMode::MountingDown, "WallClimbMountDown"),
    (ClimbMode::MountingLeft, "WallClimbMountLeft"),
    (ClimbMode::MountingRight, "WallClimbMountRight"),
    (ClimbMode::DismountingUp, "WallClimbDismountUp"),
    (ClimbMode::DismountingDown, "WallClimbDismountDown"),
    (ClimbMode::DismountingLeft, "WallClimbDismountLeft"),
    (ClimbMode::DismountingRight, "WallClimbDismountRight"),
    (ClimbMode::Idle, "WallClimbIdle"),
    (ClimbMode::Releasing, "WallClimbRelease"),
    (ClimbMode::FallingOff, "WallClimbFallOff"),
];

fn stage_slot(mode: ClimbMode) -> Option<usize> {
    STAGE_TABLE.iter().position(|(m, _)| *m == mode)
}

fn climb_mode(direction: ClimbDirections) -> Option<ClimbMode> {
    match direction {
        d if d == ClimbDirections::UP => Some(ClimbMode::ClimbingUp),
        d if d == ClimbDirections::DOWN => Some(ClimbMode::ClimbingDown),
        d if d == ClimbDirections::LEFT => Some(ClimbMode::ClimbingLeft),
        d if d == ClimbDirections::RIGHT => Some(ClimbMode::ClimbingRight),
        _ => None,
    }
}

fn dismount_mode(direction: ClimbDirections) -> Option<ClimbMode> {
    match direction {
        d if d == ClimbDirections::UP => Some(ClimbMode::DismountingUp),
        d if d == ClimbDirections::DOWN => Some(ClimbMode::DismountingDown),
        d if d == ClimbDirections::LEFT => Some(ClimbMode::DismountingLeft),
        d if d == ClimbDirections::RIGHT => Some(ClimbMode::DismountingRight),
        _ => None,
    }
}

fn build_stages() -> StageSequence {
    STAGE_TABLE
        .iter()
        .map(|(mode, name)| {
            let stage = AnimStage::auto(*name, NotifyFlags::ENTER);
            match mode {
                ClimbMode::ClimbingUp | ClimbMode::ClimbingDown | ClimbMode::ClimbingLeft | ClimbMode::ClimbingRight => {
                    stage.with_regress(RegressPolicy::Auto)
                }
                _ => stage,
            }
        })
        .collect()
}

// ============================================================================
// Replication Record
// ============================================================================

/// Live state of one climb stage.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ClimbStageSnapshot {
    pub mode: ClimbMode,
    pub local_time: f32,
    pub blend: f32,
}

/// Everything another client needs to reproduce a climb in progress.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClimbBrainRecord {
    pub cur_mode: ClimbMode,
    pub next_mode: ClimbMode,
    pub allowed_directions: u8,
    pub allowed_dismounts: u8,
    pub blocked_directions: u8,
    pub vertical_probe: f32,
    pub horizontal_probe: f32,
    pub cur_stage: Option<ClimbStageSnapshot>,
    pub exit_stage: Option<ClimbStageSnapshot>,
}

impl ClimbBrainRecord {
    pub fn to_bytes(&self) -> BehaviorResult<Vec<u8>> {
        Ok(bincode::serialize(self)?)
    }

    pub fn from_bytes(bytes: &[u8]) -> BehaviorResult<Self> {
        Ok(bincode::deserialize(bytes)?)
    }
}

// ============================================================================
// Climb Brain
// ============================================================================

#[derive(Debug)]
pub struct ClimbBrain {
    cur_mode: ClimbMode,
    next_mode: ClimbMode,
    desired: ClimbDirections,
    allowed: ClimbDirections,
    allowed_dismounts: ClimbDirections,
    blocked: ClimbDirections,
    old_blocked: ClimbDirections,
    stages: StageSequence,
    cur_stage: Option<usize>,
    exit_stage: Option<usize>,
    exit_fading: bool,
    vertical_probe: f32,
    horizontal_probe: f32,
    probe_origin_height: f32,
    exit_fade_rate: f32,
    exit_peak_blend: f32,
    tasks: VecDeque<AvatarTask>,
}

impl ClimbBrain {
    /// A climb brain that starts by playing `first` (usually a mount).
    pub fn new(first: ClimbMode, config: &BehaviorConfig) -> Self {
        Self {
            cur_mode: ClimbMode::Inactive,
            next_mode: first,
            desired: ClimbDirections::UP,
            allowed: ClimbDirections::UP | ClimbDirections::DOWN | ClimbDirections::LEFT | ClimbDirections::RIGHT,
            allowed_dismounts: ClimbDirections::empty(),
            blocked: ClimbDirections::empty(),
            old_blocked: ClimbDirections::empty(),
            stages: build_stages(),
            cur_stage: None,
            exit_stage: None,
            exit_fading: false,
            vertical_probe: config.default_vertical_probe,
            horizontal_probe: config.default_horizontal_probe,
            probe_origin_height: config.probe_origin_height,
            exit_fade_rate: config.exit_stage_fade_rate,
            exit_peak_blend: config.exit_stage_peak_blend,
            tasks: VecDeque::new(),
        }
    }

    pub fn mode(&self) -> ClimbMode {
        self.cur_mode
    }

    pub fn next_mode(&self) -> ClimbMode {
        self.next_mode
    }

    pub fn desired_direction(&self) -> ClimbDirections {
        self.desired
    }

    pub fn allowed_directions(&self) -> ClimbDirections {
        self.allowed
    }

    pub fn allowed_dismounts(&self) -> ClimbDirections {
        self.allowed_dismounts
    }

    pub fn blocked_directions(&self) -> ClimbDirections {
        self.blocked
    }

    /// Blockers the last mode choice was made with.
    pub fn previously_blocked(&self) -> ClimbDirections {
        self.old_blocked
    }

    pub fn probe_lengths(&self) -> (f32, f32) {
        (self.vertical_probe, self.horizontal_probe)
    }

    pub fn stages(&self) -> &StageSequence {
        &self.stages
    }

    /// Animation name of the running climb stage.
    pub fn current_anim(&self) -> Option<&str> {
        self.cur_stage.and_then(|slot| self.stages.get(slot)).map(AnimStage::anim_name)
    }

    /// Animation name of the running release / fall-off stage.
    pub fn exit_anim(&self) -> Option<&str> {
        self.exit_stage.and_then(|slot| self.stages.get(slot)).map(AnimStage::anim_name)
    }

    pub(crate) fn tasks_mut(&mut self) -> &mut VecDeque<AvatarTask> {
        &mut self.tasks
    }

    pub(crate) fn pending_tasks(&self) -> usize {
        self.tasks.len()
    }

    fn relay(slot: usize) -> NotifyRelay {
        NotifyRelay { stage_index: slot as i32, ..Default::default() }
    }

    fn attach_slot(&mut self, armature: &mut dyn Armature, slot: usize, blend: f32) {
        if let Some(stage) = self.stages.get_mut(slot) {
            stage.attach(armature, Self::relay(slot), blend);
        }
    }

    fn detach_slot(&mut self, armature: &mut dyn Armature, slot: usize) {
        if let Some(stage) = self.stages.get_mut(slot) {
            if stage.is_bound() {
                stage.detach(armature);
            }
        }
    }

    // ------------------------------------------------------------------------
    // Lifecycle
    // ------------------------------------------------------------------------

    pub fn activate(&mut self, armature: &mut dyn Armature) {
        self.calc_probe_lengths(armature);
        armature.enable_root_motion(true);
        armature.set_kinematic(true);
        debug!("climb brain activated, first mode {:?}", self.next_mode);
    }

    pub fn deactivate(&mut self, armature: &mut dyn Armature) {
        armature.enable_root_motion(false);
        armature.set_kinematic(false);
        debug!("climb brain deactivated in mode {:?}", self.cur_mode);
    }

    pub fn release(&mut self, armature: &mut dyn Armature) {
        self.stages.detach_all(armature);
        self.cur_stage = None;
        self.exit_stage = None;
        self.exit_fading = false;
    }

    /// Per-frame update. Returns false when the climb is over.
    pub fn apply(&mut self, armature: &mut dyn Armature, _time: f64, elapsed: f32) -> bool {
        self.desired = Self::read_desired_direction(armature);

        let mut overage = 0.0;
        let done = if self.exit_stage.is_some() {
            self.process_exit_stage(armature, elapsed)
        } else {
            let (done, overrun) = self.advance_current_stage(armature, elapsed);
            overage = overrun;
            done
        };

        let mut result = true;
        if done || self.cur_mode == ClimbMode::Idle {
            result = self.try_stage_transition(armature, overage, done);
        }
        if !result {
            if let Some(slot) = self.exit_stage.take() {
                self.detach_slot(armature, slot);
            }
        }

        self.probe_environment(armature);
        result
    }

    // ------------------------------------------------------------------------
    // Mode Machine
    // ------------------------------------------------------------------------

    fn read_desired_direction(armature: &dyn Armature) -> ClimbDirections {
        let controls = armature.controls();
        if controls.forward {
            ClimbDirections::UP
        } else if controls.backward {
            ClimbDirections::DOWN
        } else if controls.turn_left {
            ClimbDirections::LEFT
        } else if controls.turn_right {
            ClimbDirections::RIGHT
        } else {
            ClimbDirections::CENTER
        }
    }

    /// Move the current stage; a brain with no stage counts as done.
    fn advance_current_stage(&mut self, armature: &mut dyn Armature, elapsed: f32) -> (bool, f32) {
        let Some(slot) = self.cur_stage else {
            return (true, 0.0);
        };
        let delta = match self.cur_mode {
            ClimbMode::Inactive | ClimbMode::Unknown | ClimbMode::Done => 0.0,
            _ => elapsed,
        };
        match self.stages.get_mut(slot) {
            Some(stage) => {
                let step = stage.move_relative(delta, armature);
                (step.done, step.overrun)
            }
            None => (true, 0.0),
        }
    }

    fn process_exit_stage(&mut self, armature: &mut dyn Armature, elapsed: f32) -> bool {
        let Some(slot) = self.exit_stage else {
            return true;
        };
        let Some(stage) = self.stages.get_mut(slot) else {
            return true;
        };

        let instance = stage.instance();
        let anim_done = instance.map_or(true, |id| armature.anim_at_end(id));
        if !anim_done {
            stage.move_relative(elapsed, armature);
        }

        let blend = instance.map_or(0.0, |id| armature.anim_blend(id));
        if blend > self.exit_peak_blend {
            // Fully covering the climb stage; drop it and start fading out
            if !self.exit_fading {
                if let Some(cur) = self.cur_stage.take() {
                    self.detach_slot(armature, cur);
                }
                if let Some(id) = instance {
                    armature.fade_anim(id, 0.0, self.exit_fade_rate);
                }
                self.exit_fading = true;
            }
            false
        } else {
            anim_done && blend <= 0.0
        }
    }

    fn choose_next_mode(&mut self) {
        match self.cur_mode {
            ClimbMode::Inactive | ClimbMode::Unknown | ClimbMode::Finishing | ClimbMode::Done => {}
            ClimbMode::DismountingUp
            | ClimbMode::DismountingDown
            | ClimbMode::DismountingLeft
            | ClimbMode::DismountingRight
            | ClimbMode::Releasing
            | ClimbMode::FallingOff => self.next_mode = ClimbMode::Finishing,
            _ => {
                self.next_mode = ClimbMode::Idle;
                if self.allowed_dismounts.intersects(self.desired) {
                    if let Some(mode) = dismount_mode(self.desired) {
                        self.next_mode = mode;
                    }
                } else if self.allowed.intersects(self.desired) && !self.blocked.intersects(self.desired) {
                    if let Some(mode) = climb_mode(self.desired) {
                        self.next_mode = mode;
                    }
                }
            }
        }
    }

    fn try_stage_transition(&mut self, armature: &mut dyn Armature, overage: f32, done: bool) -> bool {
        self.choose_next_mode();

        let idle_slot = stage_slot(ClimbMode::Idle);
        if let Some(slot) = self.cur_stage.filter(|slot| Some(*slot) != idle_slot) {
            if let Some(stage) = self.stages.get_mut(slot) {
                stage.reset(armature, overage >= 0.0);
            }
        }

        let mut result = true;
        let mut switched = false;
        if self.next_mode != self.cur_mode {
            if let Some(slot) = self.cur_stage.take() {
                self.detach_slot(armature, slot);
            }
            match stage_slot(self.next_mode) {
                Some(slot) => {
                    debug!("climb mode {:?} -> {:?}", self.cur_mode, self.next_mode);
                    self.cur_mode = self.next_mode;
                    self.attach_slot(armature, slot, 1.0);
                    self.cur_stage = Some(slot);
                    armature.dirty_sync_state();
                    switched = true;
                }
                None => {
                    debug!("climb finished from {:?}", self.cur_mode);
                    result = false;
                }
            }
        }
        self.next_mode = ClimbMode::Unknown;

        if done || switched {
            if let Some(stage) = self.cur_stage.and_then(|slot| self.stages.get_mut(slot)) {
                let time = if overage < 0.0 { stage.length() + overage } else { overage };
                stage.set_local_time(armature, time, true);
                armature.reset_root_motion();
            }
        }
        result
    }

    /// Start the release or fall-off exit stage.
    fn begin_release(&mut self, armature: &mut dyn Armature, intentional: bool) {
        if matches!(self.cur_mode, ClimbMode::Releasing | ClimbMode::FallingOff | ClimbMode::Finishing) {
            return;
        }

        let mode = if intentional { ClimbMode::Releasing } else { ClimbMode::FallingOff };
        debug!("climb {:?} from {:?}", mode, self.cur_mode);
        self.cur_mode = mode;
        self.next_mode = ClimbMode::Finishing;
        self.exit_stage = stage_slot(mode);
        self.exit_fading = false;

        armature.enable_root_motion(false);
        armature.set_kinematic(false);
        if let Some(slot) = self.exit_stage {
            self.attach_slot(armature, slot, 1.0);
        }
        armature.dirty_sync_state();
    }

    // ------------------------------------------------------------------------
    // Environment Probes
    // ------------------------------------------------------------------------

    fn calc_probe_lengths(&mut self, armature: &dyn Armature) {
        let travel = |name: &str| {
            armature
                .find_animation(name)
                .filter(|clip| clip.has_handle)
                .map(|clip| clip.start_to_end.translation)
        };
        if let Some(up) = travel("WallClimbUp") {
            self.vertical_probe = up.y.abs();
        }
        if let Some(left) = travel("WallClimbLeft") {
            self.horizontal_probe = left.x.abs();
        }
    }

    fn probe_environment(&mut self, armature: &mut dyn Armature) {
        let transform = armature.transform();
        let origin = transform.translation + Vec3::Y * self.probe_origin_height;
        let up = transform.rotation * Vec3::Y * self.vertical_probe;
        let right = transform.rotation * Vec3::X * self.horizontal_probe;
        let avatar = armature.avatar_key().clone();

        for (direction, offset) in ClimbDirections::CARDINAL.into_iter().zip([up, -up, -right, right]) {
            armature.send(BehaviorEvent::Probe(ProbeRequest {
                avatar: avatar.clone(),
                request_id: direction.bits() as u32,
                from: origin,
                to: origin + offset,
            }));
        }

        self.old_blocked = self.blocked;
        self.blocked = ClimbDirections::empty();
    }

    // ------------------------------------------------------------------------
    // Messages
    // ------------------------------------------------------------------------

    pub fn receive(&mut self, message: BrainMessage, armature: &mut dyn Armature) -> Delivery {
        match message {
            BrainMessage::Climb(command) => {
                self.handle_command(command, armature);
                Delivery::Consumed
            }
            BrainMessage::ProbeHit { request_id } => {
                let hit = u8::try_from(request_id)
                    .ok()
                    .and_then(ClimbDirections::from_bits)
                    .filter(|dir| ClimbDirections::CARDINAL.contains(dir));
                match hit {
                    Some(direction) => {
                        self.blocked |= direction;
                        Delivery::Consumed
                    }
                    None => Delivery::Declined(BrainMessage::ProbeHit { request_id }),
                }
            }
            BrainMessage::Task(task) => {
                self.tasks.push_back(task);
                Delivery::Consumed
            }
            other => Delivery::Declined(other),
        }
    }

    fn handle_command(&mut self, command: ClimbCommand, armature: &mut dyn Armature) {
        match command {
            ClimbCommand::EnableClimb { direction, enable } => self.allowed.set(direction, enable),
            ClimbCommand::EnableDismount { direction, enable } => self.allowed_dismounts.set(direction, enable),
            ClimbCommand::Release => self.begin_release(armature, true),
            ClimbCommand::FallOff => {
                if !matches!(self.cur_mode, ClimbMode::Releasing | ClimbMode::FallingOff | ClimbMode::Finishing) {
                    let avatar = armature.avatar_key().clone();
                    armature.send(BehaviorEvent::ClimbFallOff { avatar, net: NetFlags::PROPAGATE | NetFlags::FORCE });
                }
                self.begin_release(armature, false);
            }
        }
    }

    // ------------------------------------------------------------------------
    // Replication
    // ------------------------------------------------------------------------

    fn snapshot(&self, slot: Option<usize>, armature: &dyn Armature) -> Option<ClimbStageSnapshot> {
        let slot = slot?;
        let stage = self.stages.get(slot)?;
        let (mode, _) = STAGE_TABLE.get(slot)?;
        Some(ClimbStageSnapshot {
            mode: *mode,
            local_time: stage.local_time(),
            blend: stage.instance().map_or(0.0, |id| armature.anim_blend(id)),
        })
    }

    pub fn record(&self, armature: &dyn Armature) -> ClimbBrainRecord {
        ClimbBrainRecord {
            cur_mode: self.cur_mode,
            next_mode: self.next_mode,
            allowed_directions: self.allowed.bits(),
            allowed_dismounts: self.allowed_dismounts.bits(),
            blocked_directions: self.blocked.bits(),
            vertical_probe: self.vertical_probe,
            horizontal_probe: self.horizontal_probe,
            cur_stage: self.snapshot(self.cur_stage, armature),
            exit_stage: self.snapshot(self.exit_stage, armature),
        }
    }

    /// Bring this brain to the state in `record`, re-attaching its stages.
    pub fn restore(&mut self, record: &ClimbBrainRecord, armature: &mut dyn Armature) {
        for slot in [self.cur_stage.take(), self.exit_stage.take()].into_iter().flatten() {
            self.detach_slot(armature, slot);
        }

        self.cur_mode = record.cur_mode;
        self.next_mode = record.next_mode;
        self.allowed = ClimbDirections::from_bits_truncate(record.allowed_directions);
        self.allowed_dismounts = ClimbDirections::from_bits_truncate(record.allowed_dismounts);
        self.blocked = ClimbDirections::from_bits_truncate(record.blocked_directions);
        self.vertical_probe = record.vertical_probe;
        self.horizontal_probe = record.horizontal_probe;

        self.cur_stage = self.restore_stage(record.cur_stage, armature);
        self.exit_stage = self.restore_stage(record.exit_stage, armature);
        // Exit stage below full blend with no climb stage under it is already fading
        self.exit_fading = self.exit_stage.is_some()
            && self.cur_stage.is_none()
            && record.exit_stage.is_some_and(|snapshot| snapshot.blend <= self.exit_peak_blend);
        if self.exit_fading {
            if let Some(id) = self.exit_stage.and_then(|slot| self.stages.get(slot)).and_then(AnimStage::instance) {
                armature.fade_anim(id, 0.0, self.exit_fade_rate);
            }
        }
        armature.reset_root_motion();
    }

    fn restore_stage(&mut self, snapshot: Option<ClimbStageSnapshot>, armature: &mut dyn Armature) -> Option<usize> {
        let snapshot = snapshot?;
        let slot = stage_slot(snapshot.mode)?;
        self.attach_slot(armature, slot, snapshot.blend);
        if let Some(stage) = self.stages.get_mut(slot) {
            stage.set_local_time(armature, snapshot.local_time, true);
        }
        Some(slot)
    }

    pub fn describe(&self) -> String {
        let mut out = format!(
            "Climb brain: mode {:?}, next {:?}, desired {:?}\n  allowed {:?}, dismounts {:?}, blocked {:?}",
            self.cur_mode, self.next_mode, self.desired, self.allowed, self.allowed_dismounts, self.old_blocked
        );
        for slot in [self.cur_stage, self.exit_stage].into_iter().flatten() {
            if let Some(stage) = self.stages.get(slot) {
                out.push_str(&format!("\n  {}", stage.describe()));
            }
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::armature::{AnimationClip, AnimationLibrary, AvatarRig, ControlState};

    fn rig() -> AvatarRig {
        let mut library = AnimationLibrary::default();
        for (_, name) in STAGE_TABLE {
            library.insert(AnimationClip::new(name, 1.0));
        }
        library.insert(AnimationClip::new("WallClimbUp", 1.0).with_root_travel(Transform::from_xyz(0.0, 2.5, 0.0)));
        library.insert(AnimationClip::new("WallClimbLeft", 1.0).with_root_travel(Transform::from_xyz(-1.5, 0.0, 0.0)));
        AvatarRig::new("climber", library)
    }

    fn finish(mut brain: ClimbBrain, rig: &mut AvatarRig) {
        brain.deactivate(rig);
        brain.release(rig);
    }

    fn hold(rig: &mut AvatarRig, controls: ControlState) {
        rig.set_controls(controls);
    }

    fn up() -> ControlState {
        ControlState { forward: true, ..Default::default() }
    }

    /// Mounted and climbing up.
    fn climbing(rig: &mut AvatarRig) -> ClimbBrain {
        let mut brain = ClimbBrain::new(ClimbMode::MountingUp, &BehaviorConfig::default());
        brain.activate(rig);
        hold(rig, up());
        brain.apply(rig, 0.0, 0.1);
        assert_eq!(brain.mode(), ClimbMode::MountingUp);
        brain.apply(rig, 0.0, 1.0);
        assert_eq!(brain.mode(), ClimbMode::ClimbingUp);
        brain
    }

    #[test]
    fn test_stage_table() {
        let stages = build_stages();
        assert_eq!(stages.len(), 15);
        assert_eq!(stages.get(stage_slot(ClimbMode::ClimbingUp).unwrap()).unwrap().regress_policy(), RegressPolicy::Auto);
        assert_eq!(stages.get(stage_slot(ClimbMode::Idle).unwrap()).unwrap().regress_policy(), RegressPolicy::None);
        assert_eq!(stages.get(stage_slot(ClimbMode::DismountingRight).unwrap()).unwrap().anim_name(), "WallClimbDismountRight");
        assert!(stage_slot(ClimbMode::Finishing).is_none());
    }

    #[test]
    fn test_probe_lengths_from_travel() {
        let mut rig = rig();
        let mut brain = ClimbBrain::new(ClimbMode::MountingUp, &BehaviorConfig::default());
        brain.activate(&mut rig);
        assert_eq!(brain.probe_lengths(), (2.5, 1.5));
        assert!(rig.is_kinematic());
        assert!(rig.root_motion_enabled());
        finish(brain, &mut rig);
        assert!(!rig.is_kinematic());

        let mut bare = AvatarRig::new("climber", AnimationLibrary::default());
        let mut brain = ClimbBrain::new(ClimbMode::MountingUp, &BehaviorConfig::default());
        brain.activate(&mut bare);
        assert_eq!(brain.probe_lengths(), (4.0, 3.0));
        finish(brain, &mut bare);
    }

    #[test]
    fn test_scenario_keeps_climbing_up() {
        let mut rig = rig();
        let mut brain = climbing(&mut rig);
        assert!(brain.allowed_directions().contains(ClimbDirections::UP));

        assert!(brain.apply(&mut rig, 0.0, 1.0));
        assert_eq!(brain.mode(), ClimbMode::ClimbingUp);
        assert_eq!(brain.current_anim(), Some("WallClimbUp"));
        assert_eq!(rig.attached_clips(), vec!["WallClimbUp"]);
        finish(brain, &mut rig);
    }

    #[test]
    fn test_blocked_direction_falls_back_to_idle() {
        let mut rig = rig();
        let mut brain = climbing(&mut rig);
        assert!(matches!(
            brain.receive(BrainMessage::ProbeHit { request_id: ClimbDirections::UP.bits() as u32 }, &mut rig),
            Delivery::Consumed
        ));
        brain.apply(&mut rig, 0.0, 1.0);
        assert_eq!(brain.mode(), ClimbMode::Idle);
        assert!(brain.previously_blocked().contains(ClimbDirections::UP));
        assert!(brain.blocked_directions().is_empty());

        // Hit is gone next frame, so idle resumes climbing at once
        brain.apply(&mut rig, 0.0, 0.1);
        assert_eq!(brain.mode(), ClimbMode::ClimbingUp);
        finish(brain, &mut rig);
    }

    #[test]
    fn test_disallowed_direction_idles() {
        let mut rig = rig();
        let mut brain = climbing(&mut rig);
        brain.receive(
            BrainMessage::Climb(ClimbCommand::EnableClimb { direction: ClimbDirections::UP, enable: false }),
            &mut rig,
        );
        brain.apply(&mut rig, 0.0, 1.0);
        assert_eq!(brain.mode(), ClimbMode::Idle);

        // Idle holds its place while nothing is pressed
        hold(&mut rig, ControlState::default());
        brain.apply(&mut rig, 0.0, 0.25);
        assert_eq!(brain.mode(), ClimbMode::Idle);
        let idle = brain.stages().get(stage_slot(ClimbMode::Idle).unwrap()).unwrap();
        assert!((idle.local_time() - 0.25).abs() < 1e-5);
        finish(brain, &mut rig);
    }

    #[test]
    fn test_dismount_takes_priority() {
        let mut rig = rig();
        let mut brain = climbing(&mut rig);
        brain.receive(
            BrainMessage::Climb(ClimbCommand::EnableDismount { direction: ClimbDirections::UP, enable: true }),
            &mut rig,
        );
        brain.apply(&mut rig, 0.0, 1.0);
        assert_eq!(brain.mode(), ClimbMode::DismountingUp);
        assert_eq!(brain.current_anim(), Some("WallClimbDismountUp"));

        assert!(!brain.apply(&mut rig, 0.0, 1.0));
        assert_eq!(rig.attached_count(), 0);
        finish(brain, &mut rig);
    }

    #[test]
    fn test_release_flow() {
        let mut rig = rig();
        let mut brain = climbing(&mut rig);
        brain.receive(BrainMessage::Climb(ClimbCommand::Release), &mut rig);
        assert_eq!(brain.mode(), ClimbMode::Releasing);
        assert_eq!(brain.exit_anim(), Some("WallClimbRelease"));
        assert!(!rig.is_kinematic());
        assert!(!rig.root_motion_enabled());

        // Exit stage starts at full blend: the climb stage is dropped
        assert!(brain.apply(&mut rig, 0.0, 0.25));
        assert_eq!(brain.current_anim(), None);
        assert_eq!(rig.attached_clips(), vec!["WallClimbRelease"]);

        // Second release is ignored
        brain.receive(BrainMessage::Climb(ClimbCommand::FallOff), &mut rig);
        assert_eq!(brain.mode(), ClimbMode::Releasing);

        let mut frames = 0;
        loop {
            rig.tick(0.25);
            if !brain.apply(&mut rig, 0.0, 0.25) {
                break;
            }
            frames += 1;
            assert!(frames < 20);
        }
        assert_eq!(rig.attached_count(), 0);
        assert!(!rig.outbox().iter().any(|e| matches!(e, BehaviorEvent::ClimbFallOff { .. })));
        finish(brain, &mut rig);
    }

    #[test]
    fn test_release_before_first_frame_finishes() {
        let mut rig = rig();
        let mut brain = ClimbBrain::new(ClimbMode::MountingUp, &BehaviorConfig::default());
        brain.activate(&mut rig);
        brain.receive(BrainMessage::Climb(ClimbCommand::Release), &mut rig);
        assert_eq!(brain.mode(), ClimbMode::Releasing);
        assert_eq!(brain.current_anim(), None);

        let mut frames = 0;
        loop {
            rig.tick(0.25);
            if !brain.apply(&mut rig, 0.0, 0.25) {
                break;
            }
            frames += 1;
            assert!(frames < 20, "release never finished");
        }
        assert_eq!(rig.attached_count(), 0);
        finish(brain, &mut rig);
    }

    #[test]
    fn test_fall_off_broadcasts() {
        let mut rig = rig();
        let mut brain = climbing(&mut rig);
        rig.outbox_mut().clear();
        brain.receive(BrainMessage::Climb(ClimbCommand::FallOff), &mut rig);
        assert_eq!(brain.mode(), ClimbMode::FallingOff);
        assert_eq!(
            rig.outbox().iter().next(),
            Some(&BehaviorEvent::ClimbFallOff {
                avatar: "climber".into(),
                net: NetFlags::PROPAGATE | NetFlags::FORCE,
            })
        );
        finish(brain, &mut rig);
    }

    #[test]
    fn test_probes_sent_each_frame() {
        let mut rig = rig().with_transform(Transform::from_xyz(1.0, 0.0, 0.0));
        let mut brain = climbing(&mut rig);
        rig.outbox_mut().clear();
        brain.apply(&mut rig, 0.0, 0.1);

        let probes: Vec<ProbeRequest> = rig
            .outbox_mut()
            .drain()
            .filter_map(|e| match e {
                BehaviorEvent::Probe(probe) => Some(probe),
                _ => None,
            })
            .collect();
        assert_eq!(probes.len(), 4);
        assert_eq!(probes.iter().map(|p| p.request_id).collect::<Vec<_>>(), vec![1, 2, 4, 8]);
        assert_eq!(probes[0].from, Vec3::new(1.0, 3.0, 0.0));
        assert!((probes[0].to - Vec3::new(1.0, 5.5, 0.0)).length() < 1e-5);
        assert!((probes[2].to - Vec3::new(-0.5, 3.0, 0.0)).length() < 1e-5);
        finish(brain, &mut rig);
    }

    #[test]
    fn test_foreign_probe_hit_declined() {
        let mut rig = rig();
        let mut brain = ClimbBrain::new(ClimbMode::MountingUp, &BehaviorConfig::default());
        for id in [0, 3, 16, 300] {
            assert!(matches!(
                brain.receive(BrainMessage::ProbeHit { request_id: id }, &mut rig),
                Delivery::Declined(_)
            ));
        }
        assert!(brain.blocked_directions().is_empty());
    }

    #[test]
    fn test_first_mode_without_stage_ends_at_once() {
        let mut rig = rig();
        let mut brain = ClimbBrain::new(ClimbMode::Finishing, &BehaviorConfig::default());
        brain.activate(&mut rig);
        assert!(!brain.apply(&mut rig, 0.0, 0.1));
        assert_eq!(rig.attached_count(), 0);
        finish(brain, &mut rig);
    }

    #[test]
    fn test_record_round_trip() {
        let mut rig = rig();
        let mut brain = climbing(&mut rig);
        brain.apply(&mut rig, 0.0, 0.4);
        brain.receive(BrainMessage::Climb(ClimbCommand::Release), &mut rig);

        let record = brain.record(&rig);
        assert_eq!(record.cur_mode, ClimbMode::Releasing);
        assert_eq!(record.cur_stage.map(|s| s.mode), Some(ClimbMode::ClimbingUp));
        assert_eq!(record.exit_stage.map(|s| s.blend), Some(1.0));

        let bytes = record.to_bytes().unwrap();
        let decoded = ClimbBrainRecord::from_bytes(&bytes).unwrap();
        assert_eq!(decoded, record);

        let mut remote_rig = self::rig();
        let mut remote = ClimbBrain::new(ClimbMode::MountingUp, &BehaviorConfig::default());
        remote.activate(&mut remote_rig);
        remote.restore(&decoded, &mut remote_rig);
        assert_eq!(remote.mode(), ClimbMode::Releasing);
        assert_eq!(remote.current_anim(), Some("WallClimbUp"));
        assert_eq!(remote.exit_anim(), Some("WallClimbRelease"));
        assert_eq!(remote.record(&remote_rig), record);

        finish(brain, &mut rig);
        finish(remote, &mut remote_rig);
    }

    #[test]
    fn test_bad_record_bytes() {
        let err = ClimbBrainRecord::from_bytes(&[1, 2]).unwrap_err();
        assert_eq!(err.code(), 1004);
    }

    #[test]
    fn test_describe() {
        let brain = ClimbBrain::new(ClimbMode::MountingLeft, &BehaviorConfig::default());
        let text = brain.describe();
        assert!(text.contains("Inactive"));
        assert!(text.contains("MountingLeft"));
    }
}
