//! # Eustress Behavior
//!
//! Avatar behavior core for Eustress Engine: a per-avatar stack of brains,
//! each driving an ordered sequence of animation stages.
//! Shared by Studio (engine) and Player (client) so both simulate avatars
//! identically.
//!
//! ## Modules
//!
//! - [`stage`]: One animation wrapped with start/loop/advance policies
//! - [`sequence`]: Owned, index-stable stage lists
//! - [`brain`]: Generic and climb brains plus the locomotion root
//! - [`stack`]: Brain stack and the `Avatar` component
//! - [`trigger`], [`sitting`]: World objects that hand avatars new brains
//! - [`persist`]: Save/resume streams
//! - [`plugin`]: Bevy systems and messages
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────┐
//! │                      Eustress Behavior                          │
//! ├─────────────────────────────────────────────────────────────────┤
//! │  Triggers                                                       │
//! │  ├── MultistageTrigger clones its template into a GenericBrain  │
//! │  └── SittingTrigger picks a sit side and tracks its occupant    │
//! ├─────────────────────────────────────────────────────────────────┤
//! │  Brain Stack (per avatar)                                       │
//! │  ├── Top brain simulated each frame, popped when it ends        │
//! │  ├── Messages offered top-down until one brain takes them       │
//! │  └── Locomotion root, never popped                              │
//! ├─────────────────────────────────────────────────────────────────┤
//! │  Stages                                                         │
//! │  ├── Key / auto driven local time, loop budgets                 │
//! │  └── Enter / loop / advance / regress notifications             │
//! ├─────────────────────────────────────────────────────────────────┤
//! │  Armature (trait)                                               │
//! │  ├── Animation instances, fades, root motion                    │
//! │  └── Outbox of BehaviorEvents for camera, scripts, network      │
//! └─────────────────────────────────────────────────────────────────┘
//! ```

pub mod armature;
pub mod brain;
pub mod config;
pub mod error;
pub mod events;
pub mod keys;
pub mod persist;
pub mod plugin;
pub mod sequence;
pub mod sitting;
pub mod stack;
pub mod stage;
pub mod trigger;

pub use config::BehaviorConfig;
pub use error::{BehaviorError, BehaviorResult};
pub use plugin::BehaviorPlugin;

// ============================================================================
// Prelude
// ============================================================================

/// Convenient re-exports for common behavior types.
pub mod prelude {
    pub use super::armature::{AnimationClip, AnimationLibrary, Armature, AvatarRig, ControlState};
    pub use super::brain::{AvatarTask, Brain, BrainMessage, ClimbBrain, ClimbCommand, ClimbMode, GenericBrain, StageCommand, StageJump};
    pub use super::config::BehaviorConfig;
    pub use super::error::{BehaviorError, BehaviorResult};
    pub use super::events::{BehaviorEvent, NetFlags};
    pub use super::keys::ObjectKey;
    pub use super::plugin::{ActivateTrigger, AvatarCommand, BehaviorPlugin, TriggerCommand};
    pub use super::sequence::StageSequence;
    pub use super::sitting::{ApproachFlags, SittingTrigger};
    pub use super::stack::{Avatar, BrainStack};
    pub use super::stage::{AnimStage, LoopCount, NotifyFlags};
    pub use super::trigger::{MultistageTrigger, TriggerAction, TRIGGERED};
}
