//! # Behavior Plugin
//!
//! Bevy wiring for the behavior core. Avatars are entities carrying an
//! [`Avatar`] component; triggers are entities carrying a
//! [`MultistageTrigger`] or [`SittingTrigger`].
//!
//! ```text
//! ActivateTrigger ─┐
//! AvatarCommand ───┼─▶ activation ─▶ commands ─▶ rig tick ─▶ brain apply
//! TriggerCommand ──┘                                             │
//!                    BehaviorEvent ◀── outbox flush ◀── root sync ◀┘
//! ```
//!
//! The rig owns the avatar's transform; the root sync copies it into the
//! entity's `Transform` every frame.

use bevy::prelude::*;
use tracing::{debug, info, warn};

use crate::armature::{AnimationLibrary, Armature};
use crate::brain::BrainMessage;
use crate::config::BehaviorConfig;
use crate::events::BehaviorEvent;
use crate::sitting::SittingTrigger;
use crate::stack::Avatar;
use crate::trigger::{MultistageTrigger, TriggerAction};

// ============================================================================
// Messages
// ============================================================================

/// An avatar touched or used a trigger.
#[derive(Message, Debug, Clone, Copy, PartialEq)]
pub struct ActivateTrigger {
    pub trigger: Entity,
    pub avatar: Entity,
    /// 1.0 fires the trigger, anything else is ignored
    pub state: f32,
}

/// A message for an avatar's brain stack.
#[derive(Message, Debug)]
pub struct AvatarCommand {
    pub avatar: Entity,
    pub message: BrainMessage,
}

#[derive(Message, Debug, Clone, Copy, PartialEq)]
pub struct TriggerCommand {
    pub trigger: Entity,
    pub command: TriggerAction,
}

// ============================================================================
// Plugin
// ============================================================================

pub struct BehaviorPlugin;

impl Plugin for BehaviorPlugin {
    fn build(&self, app: &mut App) {
        app.register_type::<BehaviorConfig>()
            .init_resource::<BehaviorConfig>()
            .init_resource::<AnimationLibrary>()
            .add_message::<ActivateTrigger>()
            .add_message::<AvatarCommand>()
            .add_message::<TriggerCommand>()
            .add_message::<BehaviorEvent>()
            .add_systems(
                Update,
                (
                    handle_trigger_activation,
                    deliver_avatar_commands,
                    handle_trigger_commands,
                    tick_avatar_rigs,
                    apply_brains,
                    sync_root_motion,
                    flush_behavior_events,
                )
                    .chain(),
            );

        info!("Behavior core initialized");
    }
}

// ============================================================================
// Systems
// ============================================================================

fn handle_trigger_activation(
    mut events: MessageReader<ActivateTrigger>,
    mut avatars: Query<&mut Avatar>,
    multistage: Query<&MultistageTrigger>,
    mut seats: Query<&mut SittingTrigger>,
) {
    for event in events.read() {
        let Ok(mut avatar) = avatars.get_mut(event.avatar) else {
            warn!("activation from {:?}, which is not an avatar", event.avatar);
            continue;
        };

        if let Ok(trigger) = multistage.get(event.trigger) {
            trigger.activate(&mut avatar, event.state);
        } else if let Ok(mut seat) = seats.get_mut(event.trigger) {
            seat.activate(&mut avatar, event.state);
        } else {
            debug!("activation of {:?}, which has no trigger", event.trigger);
        }
    }
}

/// Drained rather than read: brain messages own the brains they carry.
fn deliver_avatar_commands(mut commands: ResMut<Messages<AvatarCommand>>, mut avatars: Query<&mut Avatar>) {
    for command in commands.drain() {
        match avatars.get_mut(command.avatar) {
            Ok(mut avatar) => {
                avatar.deliver(command.message);
            }
            Err(_) => warn!("command for missing avatar {:?} dropped", command.avatar),
        }
    }
}

fn handle_trigger_commands(mut events: MessageReader<TriggerCommand>, mut triggers: Query<&mut MultistageTrigger>) {
    for event in events.read() {
        let Ok(mut trigger) = triggers.get_mut(event.trigger) else {
            warn!("trigger command for {:?}, which is not a multistage trigger", event.trigger);
            continue;
        };
        if !trigger.handle(event.command) {
            warn!("trigger {} rejected {:?}", trigger.key(), event.command);
        }
    }
}

fn tick_avatar_rigs(time: Res<Time>, mut avatars: Query<&mut Avatar>) {
    let elapsed = time.delta_secs();
    for mut avatar in avatars.iter_mut() {
        avatar.tick(elapsed);
    }
}

fn apply_brains(time: Res<Time>, mut avatars: Query<&mut Avatar>) {
    let now = time.elapsed_secs_f64();
    let elapsed = time.delta_secs();
    for mut avatar in avatars.iter_mut() {
        avatar.apply(now, elapsed);
    }
}

fn sync_root_motion(mut avatars: Query<(&mut Avatar, &mut Transform)>) {
    for (mut avatar, mut transform) in avatars.iter_mut() {
        avatar.rig_mut().apply_root_motion();
        let root = avatar.rig().transform();
        if *transform != root {
            *transform = root;
        }
    }
}

fn flush_behavior_events(
    mut avatars: Query<&mut Avatar>,
    mut seats: Query<&mut SittingTrigger>,
    mut writer: MessageWriter<BehaviorEvent>,
) {
    for mut avatar in avatars.iter_mut() {
        for event in avatar.drain_events() {
            for mut seat in seats.iter_mut() {
                seat.observe(&event);
            }
            writer.write(event);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::armature::{AnimationClip, AvatarRig};
    use crate::brain::AvatarTask;
    use crate::events::SeekRequest;
    use crate::sequence::StageSequence;
    use crate::sitting::ApproachFlags;
    use crate::stage::{AnimStage, LoopCount, NotifyFlags};
    use crate::trigger::TRIGGERED;
    use std::time::Duration;

    #[derive(Resource, Default)]
    struct Collected(Vec<BehaviorEvent>);

    fn collect_events(mut reader: MessageReader<BehaviorEvent>, mut collected: ResMut<Collected>) {
        collected.0.extend(reader.read().cloned());
    }

    fn library() -> AnimationLibrary {
        AnimationLibrary::default()
            .with(AnimationClip::new("Lever", 1.0))
            .with(AnimationClip::new("SitFront", 1.0).with_root_travel(Transform::from_xyz(0.0, 0.0, -1.0)))
            .with(AnimationClip::new("SitIdle", 1.0))
            .with(AnimationClip::new("StandUpFront", 1.0))
    }

    fn app() -> App {
        let mut app = App::new();
        app.init_resource::<Time>()
            .init_resource::<Collected>()
            .add_plugins(BehaviorPlugin)
            .add_systems(PostUpdate, collect_events);
        app
    }

    fn step(app: &mut App, seconds: f32) {
        app.world_mut()
            .resource_mut::<Time>()
            .advance_by(Duration::from_secs_f32(seconds));
        app.update();
    }

    fn spawn_avatar(app: &mut App) -> Entity {
        let rig = AvatarRig::new("avatar", library()).with_transform(Transform::from_xyz(0.0, 0.0, 1.0));
        app.world_mut()
            .spawn((Avatar::new(rig), Transform::IDENTITY))
            .id()
    }

    #[test]
    fn test_plugin_registers_resources() {
        let app = app();
        assert!(app.world().contains_resource::<BehaviorConfig>());
        assert!(app.world().contains_resource::<AnimationLibrary>());
        assert!(app.world().contains_resource::<Messages<AvatarCommand>>());
    }

    #[test]
    fn test_trigger_activation_flow() {
        let mut app = app();
        let avatar = spawn_avatar(&mut app);
        let config = app.world().resource::<BehaviorConfig>().clone();
        let stages = StageSequence::new(vec![AnimStage::auto("Lever", NotifyFlags::empty())]);
        let trigger = app
            .world_mut()
            .spawn(MultistageTrigger::new("lever", stages, &config).with_anchor(Transform::from_xyz(2.0, 0.0, 0.0)))
            .id();

        app.world_mut().write_message(ActivateTrigger { trigger, avatar, state: TRIGGERED });
        step(&mut app, 0.0);
        let seek = BehaviorEvent::Seek(SeekRequest {
            avatar: "avatar".into(),
            target: Transform::from_xyz(2.0, 0.0, 0.0),
            smart: true,
        });
        assert_eq!(app.world().resource::<Collected>().0, vec![seek]);

        step(&mut app, 0.0);
        assert_eq!(app.world().get::<Avatar>(avatar).unwrap().stack().depth(), 2);

        // Popping the brain ends it without a fade-out
        app.world_mut().write_message(AvatarCommand {
            avatar,
            message: BrainMessage::Task(AvatarTask::PopBrain),
        });
        for _ in 0..3 {
            step(&mut app, 0.1);
        }
        let avatar_ref = app.world().get::<Avatar>(avatar).unwrap();
        assert_eq!(avatar_ref.stack().depth(), 1);
        assert_eq!(avatar_ref.rig().attached_count(), 0);
    }

    #[test]
    fn test_trigger_command_updates_template() {
        let mut app = app();
        let config = BehaviorConfig::default();
        let stages = StageSequence::new(vec![AnimStage::auto("Lever", NotifyFlags::empty())]);
        let trigger = app.world_mut().spawn(MultistageTrigger::new("lever", stages, &config)).id();

        app.world_mut().write_message(TriggerCommand {
            trigger,
            command: TriggerAction::SetLoopCount { stage: 0, loops: LoopCount::Infinite },
        });
        step(&mut app, 0.0);

        let trigger = app.world().get::<MultistageTrigger>(trigger).unwrap();
        assert_eq!(trigger.template().get(0).unwrap().loops(), LoopCount::Infinite);
    }

    #[test]
    fn test_seat_moves_avatar_transform() {
        let mut app = app();
        let avatar = spawn_avatar(&mut app);
        let seat = app
            .world_mut()
            .spawn(SittingTrigger::new("chair", Transform::IDENTITY, ApproachFlags::FRONT, &BehaviorConfig::default()))
            .id();

        app.world_mut().write_message(ActivateTrigger { trigger: seat, avatar, state: TRIGGERED });
        for _ in 0..8 {
            step(&mut app, 0.25);
        }

        // The sit animation carries the avatar onto the seat
        let transform = app.world().get::<Transform>(avatar).unwrap();
        assert!(transform.translation.z < 0.5);
        assert!(app.world().get::<SittingTrigger>(seat).unwrap().is_occupied());
    }
}
