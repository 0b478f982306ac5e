use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Final registration status reported by the provisioning service
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProvisioningStatus {
    /// Device was assigned to a target hub
    Assigned,
    /// Enrollment exists but is disabled
    Disabled,
    /// The service failed to assign the device
    Failed,
}

impl ProvisioningStatus {
    /// Returns true if the device was assigned
    #[must_use]
    pub const fn is_assigned(self) -> bool {
        matches!(self, Self::Assigned)
    }
}

impl std::fmt::Display for ProvisioningStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Assigned => write!(f, "assigned"),
            Self::Disabled => write!(f, "disabled"),
            Self::Failed => write!(f, "failed"),
        }
    }
}

/// Outcome of a completed provisioning handshake
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProvisioningResult {
    /// Identifier the device registered under
    pub registration_id: String,

    /// Final status
    pub status: ProvisioningStatus,

    /// Host name of the assigned hub (present when assigned)
    #[serde(default)]
    pub assigned_hub: Option<String>,

    /// Device identifier on the assigned hub (present when assigned)
    #[serde(default)]
    pub device_id: Option<String>,

    /// Additional status detail from the service
    #[serde(default)]
    pub substatus: Option<String>,

    /// Error message from the service for disabled/failed registrations
    #[serde(default)]
    pub error_message: Option<String>,

    /// When the handshake completed
    pub completed_at: DateTime<Utc>,
}

impl ProvisioningResult {
    /// Returns true if the device was assigned
    #[must_use]
    pub const fn is_assigned(&self) -> bool {
        self.status.is_assigned()
    }
}
