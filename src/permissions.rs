//! Authorization checks consumed at session and recording start.
//!
//! Prompting the user is the collaborator's business; the core only asks for
//! the outcome.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Resource {
    Camera,
    Microphone,
}

impl fmt::Display for Resource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Resource::Camera => write!(f, "camera"),
            Resource::Microphone => write!(f, "microphone"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Authorization {
    Authorized,
    Denied,
    /// The user has not been asked yet
    NotDetermined,
}

#[async_trait]
pub trait PermissionGate: Send + Sync {
    /// Current authorization, asking the user when it is not yet determined
    async fn request(&self, resource: Resource) -> Authorization;
}

/// Fixed answers, for headless runs and tests
#[derive(Debug, Clone, Copy)]
pub struct StaticPermissions {
    pub camera: Authorization,
    pub microphone: Authorization,
}

impl StaticPermissions {
    pub fn allow_all() -> Self {
        Self {
            camera: Authorization::Authorized,
            microphone: Authorization::Authorized,
        }
    }

    pub fn without_microphone() -> Self {
        Self {
            microphone: Authorization::Denied,
            ..Self::allow_all()
        }
    }
}

#[async_trait]
impl PermissionGate for StaticPermissions {
    async fn request(&self, resource: Resource) -> Authorization {
        match resource {
            Resource::Camera => self.camera,
            Resource::Microphone => self.microphone,
        }
    }
}
