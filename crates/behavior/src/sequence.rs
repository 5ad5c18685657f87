//! # Stage Sequence
//!
//! Ordered, index-stable list of stages owned by exactly one brain.
//! Copying a sequence copies stage templates only; the copy is unbound.

use tracing::error;

use crate::armature::Armature;
use crate::stage::AnimStage;

#[derive(Debug, Default)]
pub struct StageSequence {
    stages: Vec<AnimStage>,
}

impl StageSequence {
    pub fn new(stages: Vec<AnimStage>) -> Self {
        Self { stages }
    }

    pub fn push(&mut self, stage: AnimStage) -> usize {
        self.stages.push(stage);
        self.stages.len() - 1
    }

    pub fn len(&self) -> usize {
        self.stages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.stages.is_empty()
    }

    pub fn get(&self, index: usize) -> Option<&AnimStage> {
        self.stages.get(index)
    }

    pub fn get_mut(&mut self, index: usize) -> Option<&mut AnimStage> {
        self.stages.get_mut(index)
    }

    pub fn iter(&self) -> impl Iterator<Item = &AnimStage> {
        self.stages.iter()
    }

    pub fn iter_mut(&mut self) -> impl Iterator<Item = &mut AnimStage> {
        self.stages.iter_mut()
    }

    /// Deep copy of the stage templates.
    pub fn clone_template(&self) -> Self {
        self.stages.iter().map(AnimStage::clone_template).collect()
    }

    pub fn anim_names(&self) -> Vec<&str> {
        self.stages.iter().map(AnimStage::anim_name).collect()
    }

    /// Whether the stage animation names equal `names`, in order.
    pub fn matches_anim_names<S: AsRef<str>>(&self, names: &[S]) -> bool {
        self.stages.len() == names.len()
            && self.stages.iter().zip(names).all(|(stage, name)| stage.anim_name() == name.as_ref())
    }

    /// Number of stages currently bound to a brain.
    pub fn bound_count(&self) -> usize {
        self.stages.iter().filter(|s| s.is_bound()).count()
    }

    /// Detach every bound stage. Returns how many released an instance.
    pub fn detach_all(&mut self, armature: &mut dyn Armature) -> usize {
        self.stages
            .iter_mut()
            .filter(|stage| stage.is_bound())
            .map(|stage| stage.detach(armature))
            .filter(|released| *released)
            .count()
    }
}

impl FromIterator<AnimStage> for StageSequence {
    fn from_iter<I: IntoIterator<Item = AnimStage>>(iter: I) -> Self {
        Self { stages: iter.into_iter().collect() }
    }
}

impl Drop for StageSequence {
    fn drop(&mut self) {
        if std::thread::panicking() {
            return;
        }
        let bound = self.bound_count();
        if bound > 0 {
            error!("stage sequence dropped with {} stage(s) still attached", bound);
            debug_assert!(bound == 0, "stage sequence dropped with attached stages");
        }
    }
}

/// Whether a sequence drives a ladder: any stage animation name contains
/// `marker`. Ladder brains switch the avatar's input into ladder mode.
pub fn is_ladder_sequence(sequence: &StageSequence, marker: &str) -> bool {
    !marker.is_empty() && sequence.iter().any(|stage| stage.anim_name().contains(marker))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::armature::{AnimationClip, AnimationLibrary, AvatarRig};
    use crate::stage::{LoopCount, NotifyFlags, NotifyRelay};

    fn sequence() -> StageSequence {
        StageSequence::new(vec![
            AnimStage::auto("LadderMountUp", NotifyFlags::ENTER),
            AnimStage::auto("LadderUp", NotifyFlags::empty()).with_loops(LoopCount::Infinite),
            AnimStage::auto("LadderDismountUp", NotifyFlags::ADVANCE),
        ])
    }

    #[test]
    fn test_ladder_predicate() {
        assert!(is_ladder_sequence(&sequence(), "Ladder"));
        assert!(!is_ladder_sequence(&sequence(), "Rope"));
        assert!(!is_ladder_sequence(&sequence(), ""));
    }

    #[test]
    fn test_clone_template_is_independent() {
        let library = AnimationLibrary::default().with(AnimationClip::new("LadderUp", 1.0));
        let mut rig = AvatarRig::new("avatar", library);
        let mut original = sequence();
        original
            .get_mut(1)
            .unwrap()
            .attach(&mut rig, NotifyRelay::default(), 1.0);

        let copy = original.clone_template();
        assert_eq!(copy.len(), 3);
        assert_eq!(copy.bound_count(), 0);
        assert!(copy.matches_anim_names(&["LadderMountUp", "LadderUp", "LadderDismountUp"]));
        assert_eq!(copy.get(1).unwrap().loops(), LoopCount::Infinite);

        assert_eq!(original.detach_all(&mut rig), 1);
        assert_eq!(original.bound_count(), 0);
    }

    #[test]
    fn test_matches_anim_names_length() {
        assert!(!sequence().matches_anim_names(&["LadderMountUp"]));
    }
}
