//! Capabilities service
//!
//! Decides which kinds of jobs this runner reports it can take. The
//! orchestrator only hands out jobs whose requirements are covered.

use anyhow::Result;
use tracing::info;

/// Runner can clone sources
pub const SOURCE: &str = "source";

/// Runner can execute command lists in containers
pub const COMMAND: &str = "command";

/// Runner may start privileged containers
pub const PRIVILEGED: &str = "privileged";

/// Service trait for capability discovery
pub trait CapabilitiesService: Send + Sync {
    /// Capability identifiers reported to the orchestrator on registration
    fn discover(&self) -> Result<Vec<String>>;

    /// Checks if this runner has all required capabilities
    fn check_compatibility(&self, requires: &[String]) -> bool {
        match self.discover() {
            Ok(capabilities) => requires.iter().all(|r| capabilities.contains(r)),
            Err(_) => false,
        }
    }
}

/// Standard implementation of CapabilitiesService
pub struct StandardCapabilitiesService {
    allow_privileged: bool,
}

impl StandardCapabilitiesService {
    /// Podman is checked at startup, so sources and commands are always
    /// available; privileged containers only when the operator allows them
    pub fn new(allow_privileged: bool) -> Self {
        Self { allow_privileged }
    }
}

impl CapabilitiesService for StandardCapabilitiesService {
    fn discover(&self) -> Result<Vec<String>> {
        info!("Discovering runner capabilities");

        let mut capabilities = vec![SOURCE.to_string(), COMMAND.to_string()];
        if self.allow_privileged {
            capabilities.push(PRIVILEGED.to_string());
        }

        Ok(capabilities)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_privileged_only_when_allowed() {
        let caps = StandardCapabilitiesService::new(false).discover().unwrap();
        assert_eq!(caps, vec!["source", "command"]);

        let caps = StandardCapabilitiesService::new(true).discover().unwrap();
        assert!(caps.contains(&PRIVILEGED.to_string()));
    }

    #[test]
    fn test_check_compatibility() {
        let service = StandardCapabilitiesService::new(false);

        assert!(service.check_compatibility(&["command".to_string()]));
        assert!(service.check_compatibility(&[]));
        assert!(!service.check_compatibility(&["privileged".to_string()]));
    }
}
