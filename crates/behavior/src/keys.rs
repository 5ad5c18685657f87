//! Scene-object identity used for notification senders and receivers.

use bevy::prelude::*;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Name of a keyed scene object (avatar, trigger, script receiver).
#[derive(Debug, Clone, PartialEq, Eq, Hash, Default, Serialize, Deserialize, Reflect)]
pub struct ObjectKey(pub String);

impl ObjectKey {
    pub fn new(name: impl Into<String>) -> Self {
        Self(name.into())
    }

    pub fn name(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ObjectKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for ObjectKey {
    fn from(name: &str) -> Self {
        Self(name.to_string())
    }
}
