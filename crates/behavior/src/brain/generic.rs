//! # Generic Brain
//!
//! Plays a [`StageSequence`] from start to finish, one stage at a time,
//! blending in on entry and out on exit.
//!
//! ## Lifecycle
//!
//! ```text
//! Entering ──fade_in == 0──────────────┐
//!    │                                 ▼
//!    └──fade to 1──▶ FadingIn ──▶ Normal ──exit condition──▶ Exit
//!                                                             │
//!                         Abort ◀── blend 0 ◀── FadingOut ◀───┤ fade_out > 0
//!                           ▲                                 │
//!                           └─────────────────────────────────┘ fade_out == 0
//! ```
//!
//! Exit conditions are: running off either end of the sequence, a stage jump
//! to -1, a pop-brain task, or whatever the [`ExitFlags`] ask for.

use std::collections::VecDeque;
use std::io::{Read, Write};

use tracing::{debug, warn};

use crate::armature::{Armature, BodyUsage};
use crate::config::BehaviorConfig;
use crate::error::{BehaviorError, BehaviorResult};
use crate::events::{BehaviorEvent, CallbackPhase, CameraCommand};
use crate::keys::ObjectKey;
use crate::persist::{
    load_stage_aux, read_bool, read_f32, read_key, read_stage_template, read_u32, read_u8, save_stage_aux,
    write_bool, write_f32, write_key, write_stage_template, write_u32, write_u8,
};
use crate::sequence::StageSequence;
use crate::stage::{AnimStage, BackPolicy, ForwardPolicy, NotifyRelay};

use super::{AvatarTask, BrainMessage, Delivery, StageCommand, StageJump};

// ============================================================================
// Types
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum BrainMode {
    #[default]
    Entering = 0,
    Normal = 1,
    FadingIn = 2,
    FadingOut = 3,
    Exit = 4,
    Abort = 5,
}

impl BrainMode {
    pub fn from_u8(value: u8) -> Option<Self> {
        match value {
            0 => Some(BrainMode::Entering),
            1 => Some(BrainMode::Normal),
            2 => Some(BrainMode::FadingIn),
            3 => Some(BrainMode::FadingOut),
            4 => Some(BrainMode::Exit),
            5 => Some(BrainMode::Abort),
            _ => None,
        }
    }
}

/// How the avatar's body moves while the brain runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum MoveMode {
    /// Kinematic, positioned directly
    Absolute = 0,
    /// Kinematic, moved by animation root travel
    #[default]
    Relative = 1,
    /// Physics as usual
    Normal = 2,
    Standstill = 3,
}

impl MoveMode {
    pub fn from_u8(value: u8) -> Option<Self> {
        match value {
            0 => Some(MoveMode::Absolute),
            1 => Some(MoveMode::Relative),
            2 => Some(MoveMode::Normal),
            3 => Some(MoveMode::Standstill),
            _ => None,
        }
    }
}

/// Classification used by hosts and input handling.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum BrainKind {
    #[default]
    Generic = 0,
    Ladder = 1,
    Sit = 2,
    SitOnGround = 3,
    Emote = 4,
    Afk = 5,
}

impl BrainKind {
    pub fn from_u32(value: u32) -> Option<Self> {
        match value {
            0 => Some(BrainKind::Generic),
            1 => Some(BrainKind::Ladder),
            2 => Some(BrainKind::Sit),
            3 => Some(BrainKind::SitOnGround),
            4 => Some(BrainKind::Emote),
            5 => Some(BrainKind::Afk),
            _ => None,
        }
    }
}

bitflags::bitflags! {
    /// Extra reasons for a generic brain to exit. Empty exits only at the
    /// end of the sequence.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct ExitFlags: u32 {
        const ANY_TASK = 1 << 0;
        const NEW_BRAIN = 1 << 1;
        const ANY_INPUT = 1 << 2;
    }
}

/// Whether two brains may run side by side.
fn body_usage_compatible(a: BodyUsage, b: BodyUsage) -> bool {
    matches!(
        (a, b),
        (BodyUsage::Upper, BodyUsage::Lower) | (BodyUsage::Lower, BodyUsage::Upper)
    )
}

// ============================================================================
// Generic Brain
// ============================================================================

#[derive(Debug)]
pub struct GenericBrain {
    stages: StageSequence,
    cur_stage: usize,
    kind: BrainKind,
    exit_flags: ExitFlags,
    mode: BrainMode,
    forward: bool,
    start_callback: Option<ObjectKey>,
    end_callback: Option<ObjectKey>,
    fade_in: f32,
    fade_out: f32,
    move_mode: MoveMode,
    body_usage: BodyUsage,
    recipient: Option<ObjectKey>,
    receivers: Vec<ObjectKey>,
    reverse_fb_on_release: bool,
    force_third_person: bool,
    camera_forced: bool,
    tasks: VecDeque<AvatarTask>,
}

impl GenericBrain {
    pub fn new(stages: StageSequence, config: &BehaviorConfig) -> Self {
        Self {
            stages,
            cur_stage: 0,
            kind: BrainKind::Generic,
            exit_flags: ExitFlags::empty(),
            mode: BrainMode::Entering,
            forward: true,
            start_callback: None,
            end_callback: None,
            fade_in: config.default_fade_in,
            fade_out: config.default_fade_out,
            move_mode: MoveMode::Relative,
            body_usage: BodyUsage::Unknown,
            recipient: None,
            receivers: Vec::new(),
            reverse_fb_on_release: false,
            force_third_person: config.force_third_person,
            camera_forced: false,
            tasks: VecDeque::new(),
        }
    }

    pub fn with_kind(mut self, kind: BrainKind) -> Self {
        self.kind = kind;
        self
    }

    pub fn with_exit_flags(mut self, flags: ExitFlags) -> Self {
        self.exit_flags = flags;
        self
    }

    pub fn with_move_mode(mut self, mode: MoveMode) -> Self {
        self.move_mode = mode;
        self
    }

    pub fn with_body_usage(mut self, usage: BodyUsage) -> Self {
        self.body_usage = usage;
        self
    }

    /// Blend rates in units per second; 0 switches instantly.
    pub fn with_fades(mut self, fade_in: f32, fade_out: f32) -> Self {
        self.fade_in = fade_in;
        self.fade_out = fade_out;
        self
    }

    pub fn with_callbacks(mut self, start: Option<ObjectKey>, end: Option<ObjectKey>) -> Self {
        self.start_callback = start;
        self.end_callback = end;
        self
    }

    /// Object that receives stage notifications.
    pub fn with_recipient(mut self, recipient: Option<ObjectKey>) -> Self {
        self.recipient = recipient;
        self
    }

    pub fn with_receivers(mut self, receivers: Vec<ObjectKey>) -> Self {
        self.receivers = receivers;
        self
    }

    pub fn with_reverse_fb_on_release(mut self, reverse: bool) -> Self {
        self.reverse_fb_on_release = reverse;
        self
    }

    pub fn with_start_stage(mut self, index: usize) -> Self {
        self.cur_stage = index;
        self
    }

    // ------------------------------------------------------------------------
    // Accessors
    // ------------------------------------------------------------------------

    pub fn stages(&self) -> &StageSequence {
        &self.stages
    }

    pub fn current_stage(&self) -> usize {
        self.cur_stage
    }

    pub fn mode(&self) -> BrainMode {
        self.mode
    }

    pub fn kind(&self) -> BrainKind {
        self.kind
    }

    pub fn exit_flags(&self) -> ExitFlags {
        self.exit_flags
    }

    pub fn move_mode(&self) -> MoveMode {
        self.move_mode
    }

    pub fn body_usage(&self) -> BodyUsage {
        self.body_usage
    }

    pub fn recipient(&self) -> Option<&ObjectKey> {
        self.recipient.as_ref()
    }

    pub fn receivers(&self) -> &[ObjectKey] {
        &self.receivers
    }

    pub fn is_forward(&self) -> bool {
        self.forward
    }

    pub fn fades(&self) -> (f32, f32) {
        (self.fade_in, self.fade_out)
    }

    pub fn reverse_fb_on_release(&self) -> bool {
        self.reverse_fb_on_release
    }

    pub(crate) fn tasks_mut(&mut self) -> &mut VecDeque<AvatarTask> {
        &mut self.tasks
    }

    pub(crate) fn pending_tasks(&self) -> usize {
        self.tasks.len()
    }

    /// Whether `other` may run alongside this brain.
    pub fn is_compatible(&self, other: &GenericBrain) -> bool {
        body_usage_compatible(self.body_usage, other.body_usage)
    }

    fn relay(&self, index: usize) -> NotifyRelay {
        NotifyRelay {
            stage_index: index as i32,
            recipient: self.recipient.clone(),
            receivers: self.receivers.clone(),
        }
    }

    fn current_blend(&self, armature: &dyn Armature) -> Option<f32> {
        let id = self.stages.get(self.cur_stage)?.instance()?;
        Some(armature.anim_blend(id))
    }

    // ------------------------------------------------------------------------
    // Lifecycle
    // ------------------------------------------------------------------------

    pub fn activate(&mut self, armature: &mut dyn Armature) {
        if self.cur_stage >= self.stages.len() {
            warn!("generic brain activated without stage {} ({} stages)", self.cur_stage, self.stages.len());
            self.mode = BrainMode::Exit;
            return;
        }

        let blend = if self.fade_in > 0.0 { 0.0 } else { 1.0 };
        let avatar = armature.avatar_key().clone();

        if self.kind == BrainKind::Emote {
            armature.send(BehaviorEvent::Emote { avatar: avatar.clone(), started: true });
        }
        if matches!(self.move_mode, MoveMode::Relative | MoveMode::Absolute) {
            armature.set_kinematic(true);
        }

        let relay = self.relay(self.cur_stage);
        let attached = self
            .stages
            .get_mut(self.cur_stage)
            .and_then(|stage| stage.attach(armature, relay, blend))
            .is_some();

        // Nothing started without a live animation
        if let (true, Some(target)) = (attached, &self.start_callback) {
            armature.send(BehaviorEvent::Callback {
                target: target.clone(),
                avatar: avatar.clone(),
                phase: CallbackPhase::Start,
            });
        }
        if armature.is_local_avatar() {
            if self.force_third_person {
                armature.send(BehaviorEvent::Camera { avatar, command: CameraCommand::ForceThirdPerson });
                self.camera_forced = true;
            }
            if self.kind == BrainKind::Ladder {
                armature.set_ladder_mode(true);
            }
        }
        if self.reverse_fb_on_release {
            armature.set_reverse_fb_on_idle(true);
        }
        debug!("generic brain activated at stage {}", self.cur_stage);
    }

    /// Per-frame update. Returns false once the brain has aborted.
    pub fn apply(&mut self, armature: &mut dyn Armature, _time: f64, elapsed: f32) -> bool {
        match self.mode {
            BrainMode::Abort => return false,
            BrainMode::Entering | BrainMode::FadingIn => self.process_fade_in(armature),
            BrainMode::Exit | BrainMode::FadingOut => self.process_fade_out(armature),
            BrainMode::Normal => self.process_normal(armature, elapsed),
        }
        self.mode != BrainMode::Abort
    }

    pub fn deactivate(&mut self, armature: &mut dyn Armature) {
        let avatar = armature.avatar_key().clone();
        if let Some(target) = &self.end_callback {
            armature.send(BehaviorEvent::Callback {
                target: target.clone(),
                avatar: avatar.clone(),
                phase: CallbackPhase::End,
            });
        }
        if self.mode != BrainMode::Abort {
            self.exit_move_mode(armature);
        }
        armature.set_kinematic(false);

        if self.kind == BrainKind::Ladder && armature.is_local_avatar() {
            armature.set_ladder_mode(false);
        }
        if self.reverse_fb_on_release {
            armature.set_reverse_fb_on_idle(false);
        }
        if self.camera_forced {
            armature.send(BehaviorEvent::Camera { avatar: avatar.clone(), command: CameraCommand::UndoThirdPerson });
            self.camera_forced = false;
        }
        if self.kind == BrainKind::Emote {
            armature.send(BehaviorEvent::Emote { avatar, started: false });
        }
        debug!("generic brain deactivated");
    }

    /// Drop out immediately, without fading.
    pub fn leave_age(&mut self, armature: &mut dyn Armature) -> bool {
        self.exit_move_mode(armature);
        self.mode = BrainMode::Abort;
        true
    }

    /// Detach every stage still bound.
    pub fn release(&mut self, armature: &mut dyn Armature) {
        self.stages.detach_all(armature);
    }

    // ------------------------------------------------------------------------
    // Per-Mode Processing
    // ------------------------------------------------------------------------

    fn process_fade_in(&mut self, armature: &mut dyn Armature) {
        if self.mode != BrainMode::FadingIn {
            let instance = self.stages.get(self.cur_stage).and_then(AnimStage::instance);
            match instance {
                Some(id) if self.fade_in > 0.0 => {
                    armature.fade_anim(id, 1.0, self.fade_in);
                    self.mode = BrainMode::FadingIn;
                }
                _ => self.enter_move_mode(armature),
            }
        } else if self.current_blend(armature).unwrap_or(1.0) >= 1.0 {
            self.enter_move_mode(armature);
        }
    }

    fn process_fade_out(&mut self, armature: &mut dyn Armature) {
        if self.mode != BrainMode::FadingOut {
            let instance = self.stages.get(self.cur_stage).and_then(AnimStage::instance);
            match instance {
                Some(id) if self.fade_out > 0.0 => {
                    armature.fade_anim(id, 0.0, self.fade_out);
                    self.exit_move_mode(armature);
                    self.mode = BrainMode::FadingOut;
                }
                _ => {
                    self.detach_current(armature);
                    self.exit_move_mode(armature);
                    self.mode = BrainMode::Abort;
                }
            }
        } else if self.current_blend(armature).unwrap_or(0.0) <= 0.0 {
            self.detach_current(armature);
            self.mode = BrainMode::Abort;
        }
    }

    fn process_normal(&mut self, armature: &mut dyn Armature, elapsed: f32) {
        let policies = self
            .stages
            .get(self.cur_stage)
            .map(|stage| (stage.forward_policy(), stage.back_policy()));
        let delta = match policies {
            Some((forward, back)) => self.anim_delta(forward, back, armature, elapsed),
            None => {
                self.mode = BrainMode::Exit;
                return;
            }
        };

        let cur = self.cur_stage as i32;
        let Some(stage) = self.stages.get_mut(self.cur_stage) else {
            return;
        };
        let step = stage.move_relative(delta, armature);
        if !step.done {
            return;
        }

        let next = if step.forward { stage.next_stage(cur) } else { stage.prev_stage(cur) };
        if next < 0 || next as usize >= self.stages.len() {
            debug!("generic brain ran off stage {} -> {}, exiting", cur, next);
            self.mode = BrainMode::Exit;
            return;
        }

        let next = next as usize;
        self.switch_stages(armature, next, None);
        if let Some(stage) = self.stages.get_mut(next) {
            stage.reset(armature, step.forward);
        }
    }

    /// Time to move the current stage by, from input and stage policy. A
    /// key-driven move also sets the brain's direction.
    fn anim_delta(&mut self, forward: ForwardPolicy, back: BackPolicy, armature: &dyn Armature, elapsed: f32) -> f32 {
        let controls = armature.controls();
        let (forward_key, back_key) = if self.reverse_fb_on_release && armature.is_fb_reversed() {
            (controls.backward, controls.forward)
        } else {
            (controls.forward, controls.backward)
        };

        // Held keys win over auto-play
        if forward == ForwardPolicy::Key && forward_key {
            self.forward = true;
            elapsed
        } else if back == BackPolicy::Key && back_key {
            self.forward = false;
            -elapsed
        } else if forward == ForwardPolicy::Auto && self.forward {
            elapsed
        } else if back == BackPolicy::Auto && !self.forward {
            -elapsed
        } else {
            0.0
        }
    }

    fn enter_move_mode(&mut self, armature: &mut dyn Armature) {
        if self.move_mode == MoveMode::Relative {
            armature.enable_root_motion(true);
            armature.reset_root_motion();
        }
        self.mode = BrainMode::Normal;
    }

    fn exit_move_mode(&mut self, armature: &mut dyn Armature) {
        if self.move_mode == MoveMode::Relative {
            armature.enable_root_motion(false);
        }
        if self.fade_out == 0.0 {
            armature.reset_idle();
        }
    }

    fn detach_current(&mut self, armature: &mut dyn Armature) {
        if let Some(stage) = self.stages.get_mut(self.cur_stage) {
            if stage.is_bound() {
                stage.detach(armature);
            }
        }
    }

    /// Detach the current stage and attach `to` in the same step.
    fn switch_stages(&mut self, armature: &mut dyn Armature, to: usize, set_time: Option<f32>) {
        let from = self.cur_stage;
        self.detach_current(armature);

        let relay = self.relay(to);
        if let Some(stage) = self.stages.get_mut(to) {
            stage.attach(armature, relay, 1.0);
            if let Some(time) = set_time {
                stage.set_local_time(armature, time, true);
            }
        }
        debug!("generic brain switching stage {} -> {}", from, to);

        self.cur_stage = to;
        armature.dirty_sync_state();
        if self.move_mode == MoveMode::Relative {
            armature.reset_root_motion();
        }
    }

    // ------------------------------------------------------------------------
    // Messages
    // ------------------------------------------------------------------------

    pub fn receive(&mut self, message: BrainMessage, armature: &mut dyn Armature) -> Delivery {
        match message {
            BrainMessage::Stage(jump) => {
                self.handle_stage_jump(jump, armature);
                Delivery::Consumed
            }
            BrainMessage::Task(task) => self.handle_task(task),
            BrainMessage::Control(controls) => {
                // Input still falls through after it ends this brain
                if self.exit_flags.contains(ExitFlags::ANY_INPUT) && controls.any_key() {
                    self.mode = BrainMode::Exit;
                }
                Delivery::Declined(BrainMessage::Control(controls))
            }
            BrainMessage::SetLoopCount { stage, loops } => {
                match self.stages.get_mut(stage) {
                    Some(stage) => stage.set_loop_count(loops),
                    None => warn!("loop count for missing stage {} ({} stages)", stage, self.stages.len()),
                }
                Delivery::Consumed
            }
            other => Delivery::Declined(other),
        }
    }

    fn handle_stage_jump(&mut self, jump: StageJump, armature: &mut dyn Armature) {
        if let Some(forward) = jump.set_direction {
            self.forward = forward;
        }

        let count = self.stages.len();
        match jump.command {
            StageCommand::GotoStage(-1) => self.mode = BrainMode::Exit,
            StageCommand::GotoStage(index) if index >= 0 && (index as usize) < count => {
                self.switch_stages(armature, index as usize, jump.set_time);
            }
            StageCommand::GotoStage(index) => {
                let err = BehaviorError::StageOutOfRange { index: index as i64, count };
                warn!("ignoring stage jump: {}", err);
            }
            StageCommand::NextStage => {
                let next = self.cur_stage + 1;
                if next >= count {
                    self.mode = BrainMode::Exit;
                } else {
                    self.switch_stages(armature, next, jump.set_time);
                }
            }
            StageCommand::PrevStage => {
                if self.cur_stage == 0 {
                    self.mode = BrainMode::Exit;
                } else {
                    self.switch_stages(armature, self.cur_stage - 1, jump.set_time);
                }
            }
        }
    }

    fn handle_task(&mut self, task: AvatarTask) -> Delivery {
        match task {
            AvatarTask::PushBrain(brain) => {
                if self.exit_flags.contains(ExitFlags::NEW_BRAIN) {
                    self.mode = BrainMode::Exit;
                    return Delivery::Declined(BrainMessage::Task(AvatarTask::PushBrain(brain)));
                }

                let compatible = brain.as_generic().is_some_and(|other| self.is_compatible(other));
                if !compatible && matches!(self.mode, BrainMode::Exit | BrainMode::FadingOut) {
                    Delivery::QueueOnNext(AvatarTask::PushBrain(brain))
                } else {
                    self.tasks.push_back(AvatarTask::PushBrain(brain));
                    Delivery::Consumed
                }
            }
            AvatarTask::PopBrain => {
                self.mode = BrainMode::Exit;
                Delivery::Consumed
            }
            other => {
                if self.exit_flags.contains(ExitFlags::ANY_TASK) {
                    self.mode = BrainMode::Exit;
                    Delivery::Declined(BrainMessage::Task(other))
                } else {
                    self.tasks.push_back(other);
                    Delivery::Consumed
                }
            }
        }
    }

    // ------------------------------------------------------------------------
    // Persistence
    // ------------------------------------------------------------------------

    /// Write the full brain record, stages included.
    pub fn write<W: Write>(&self, writer: &mut W) -> BehaviorResult<()> {
        write_u32(writer, self.stages.len() as u32)?;
        for stage in self.stages.iter() {
            write_stage_template(writer, stage)?;
            save_stage_aux(writer, stage)?;
        }

        write_u32(writer, self.cur_stage as u32)?;
        write_u32(writer, self.kind as u32)?;
        write_u32(writer, self.exit_flags.bits())?;
        write_u8(writer, self.mode as u8)?;
        write_bool(writer, self.forward)?;
        write_key(writer, self.start_callback.as_ref())?;
        write_key(writer, self.end_callback.as_ref())?;
        write_f32(writer, self.fade_in)?;
        write_f32(writer, self.fade_out)?;
        write_u8(writer, self.move_mode as u8)?;
        write_u8(writer, self.body_usage as u8)?;
        write_key(writer, self.recipient.as_ref())?;

        write_u32(writer, self.receivers.len() as u32)?;
        for receiver in &self.receivers {
            write_key(writer, Some(receiver))?;
        }
        Ok(())
    }

    /// Read a record written by [`GenericBrain::write`]. Stages come back
    /// unbound; pushing the brain attaches the current one.
    pub fn read<R: Read>(reader: &mut R, config: &BehaviorConfig) -> BehaviorResult<Self> {
        let count = read_u32(reader, "stage count")?;
        let mut stages = StageSequence::default();
        for _ in 0..count {
            let mut stage = read_stage_template(reader)?;
            load_stage_aux(reader, &mut stage)?;
            stages.push(stage);
        }

        let cur_stage = read_u32(reader, "current stage")? as usize;
        let kind = read_u32(reader, "brain kind")?;
        let kind = BrainKind::from_u32(kind).ok_or(BehaviorError::InvalidTag { field: "brain kind", value: kind })?;
        let exit_flags = ExitFlags::from_bits_truncate(read_u32(reader, "exit flags")?);
        let mode = read_u8(reader, "brain mode")?;
        let mode = BrainMode::from_u8(mode)
            .ok_or(BehaviorError::InvalidTag { field: "brain mode", value: mode as u32 })?;
        let forward = read_bool(reader, "forward")?;
        let start_callback = read_key(reader, "start callback")?;
        let end_callback = read_key(reader, "end callback")?;
        let fade_in = read_f32(reader, "fade in")?;
        let fade_out = read_f32(reader, "fade out")?;
        let move_mode = read_u8(reader, "move mode")?;
        let move_mode = MoveMode::from_u8(move_mode)
            .ok_or(BehaviorError::InvalidTag { field: "move mode", value: move_mode as u32 })?;
        let body_usage = read_u8(reader, "body usage")?;
        let body_usage = BodyUsage::from_u8(body_usage)
            .ok_or(BehaviorError::InvalidTag { field: "body usage", value: body_usage as u32 })?;
        let recipient = read_key(reader, "recipient")?;

        let receiver_count = read_u32(reader, "receiver count")?;
        let mut receivers = Vec::with_capacity(receiver_count.min(64) as usize);
        for _ in 0..receiver_count {
            if let Some(key) = read_key(reader, "receiver")? {
                receivers.push(key);
            }
        }

        if cur_stage >= stages.len() && !stages.is_empty() {
            return Err(BehaviorError::StageOutOfRange { index: cur_stage as i64, count: stages.len() });
        }

        let mut brain = GenericBrain::new(stages, config)
            .with_kind(kind)
            .with_exit_flags(exit_flags)
            .with_fades(fade_in, fade_out)
            .with_callbacks(start_callback, end_callback)
            .with_move_mode(move_mode)
            .with_body_usage(body_usage)
            .with_recipient(recipient)
            .with_receivers(receivers)
            .with_start_stage(cur_stage);
        brain.mode = mode;
        brain.forward = forward;
        Ok(brain)
    }

    /// Debug dump, one line per stage with the current one marked.
    pub fn describe(&self) -> String {
        let mut out = format!(
            "Generic brain: kind {:?}, mode {:?}, {}, stage {}/{}",
            self.kind,
            self.mode,
            if self.forward { "forward" } else { "backward" },
            self.cur_stage,
            self.stages.len()
        );
        for (index, stage) in self.stages.iter().enumerate() {
            let marker = if index == self.cur_stage { ">" } else { " " };
            out.push_str(&format!("\n {} {}", marker, stage.describe()));
        }
        out
    }
}
