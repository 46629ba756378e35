//! Sandbox profiles for tool execution.
//!
//! A profile is a small enumerated configuration; the runtime always honors
//! the tightest of the request-level and tool-level profiles.

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Network access policy, most restrictive first.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize, Default,
)]
#[serde(rename_all = "snake_case")]
pub enum NetworkPolicy {
    /// No network access.
    None,
    /// Loopback and allow-listed hosts only.
    #[default]
    Restricted,
    /// Unrestricted.
    Open,
}

/// Filesystem access policy, most restrictive first.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize, Default,
)]
#[serde(rename_all = "snake_case")]
pub enum FilesystemPolicy {
    /// No filesystem access.
    None,
    /// Read-only access.
    #[default]
    Readonly,
    /// Read and write.
    Readwrite,
}

/// Per-call sandbox configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SandboxProfile {
    /// Network policy.
    #[serde(default)]
    pub network: NetworkPolicy,
    /// Filesystem policy.
    #[serde(rename = "fs", default)]
    pub filesystem: FilesystemPolicy,
    /// Per-call wall-clock deadline.
    #[serde(default, skip_serializing_if = "Option::is_none", with = "opt_millis")]
    pub deadline: Option<Duration>,
    /// Max memory in megabytes, when the host supports enforcement.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_memory_mb: Option<u64>,
}

impl Default for SandboxProfile {
    fn default() -> Self {
        Self {
            network: NetworkPolicy::Restricted,
            filesystem: FilesystemPolicy::Readonly,
            deadline: None,
            max_memory_mb: None,
        }
    }
}

impl SandboxProfile {
    /// Fully open profile for trusted native tools.
    pub fn open() -> Self {
        Self {
            network: NetworkPolicy::Open,
            filesystem: FilesystemPolicy::Readwrite,
            deadline: None,
            max_memory_mb: None,
        }
    }

    /// Merge with another profile, taking the tightest setting for every
    /// field. Deadlines take the minimum; memory caps take the minimum.
    pub fn tightest(&self, other: &SandboxProfile) -> SandboxProfile {
        SandboxProfile {
            network: self.network.min(other.network),
            filesystem: self.filesystem.min(other.filesystem),
            deadline: match (self.deadline, other.deadline) {
                (Some(a), Some(b)) => Some(a.min(b)),
                (a, b) => a.or(b),
            },
            max_memory_mb: match (self.max_memory_mb, other.max_memory_mb) {
                (Some(a), Some(b)) => Some(a.min(b)),
                (a, b) => a.or(b),
            },
        }
    }
}

mod opt_millis {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(d: &Option<Duration>, s: S) -> Result<S::Ok, S::Error> {
        match d {
            Some(d) => s.serialize_some(&(d.as_millis() as u64)),
            None => s.serialize_none(),
        }
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Option<Duration>, D::Error> {
        let millis = Option::<u64>::deserialize(d)?;
        Ok(millis.map(Duration::from_millis))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tightest_takes_minimum() {
        let request = SandboxProfile {
            network: NetworkPolicy::Restricted,
            filesystem: FilesystemPolicy::Readwrite,
            deadline: Some(Duration::from_secs(30)),
            max_memory_mb: None,
        };
        let tool = SandboxProfile {
            network: NetworkPolicy::None,
            filesystem: FilesystemPolicy::Readonly,
            deadline: Some(Duration::from_secs(5)),
            max_memory_mb: Some(256),
        };

        let merged = request.tightest(&tool);
        assert_eq!(merged.network, NetworkPolicy::None);
        assert_eq!(merged.filesystem, FilesystemPolicy::Readonly);
        assert_eq!(merged.deadline, Some(Duration::from_secs(5)));
        assert_eq!(merged.max_memory_mb, Some(256));
    }

    #[test]
    fn test_default_profile() {
        let profile = SandboxProfile::default();
        assert_eq!(profile.network, NetworkPolicy::Restricted);
        assert_eq!(profile.filesystem, FilesystemPolicy::Readonly);
    }

    #[test]
    fn test_profile_serde() {
        let profile = SandboxProfile {
            network: NetworkPolicy::None,
            filesystem: FilesystemPolicy::Readonly,
            deadline: Some(Duration::from_millis(1500)),
            max_memory_mb: None,
        };
        let json = serde_json::to_value(&profile).unwrap();
        assert_eq!(json["network"], "none");
        assert_eq!(json["fs"], "readonly");
        assert_eq!(json["deadline"], 1500);

        let parsed: SandboxProfile = serde_json::from_value(json).unwrap();
        assert_eq!(parsed, profile);
    }
}
