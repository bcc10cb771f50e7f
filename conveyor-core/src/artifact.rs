//! Artifact registry
//!
//! Tracks the named artifacts passed between the stages of one run. An
//! artifact is declared empty when the run is created, bound once when its
//! producing action completes, and read-only afterwards.

use serde::{Deserialize, Serialize};

use crate::error::ArtifactError;

/// Opaque handle to a declared artifact
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ArtifactHandle(usize);

/// Concrete content of a bound artifact
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ArtifactContent {
    /// Key of the bundle in the artifact store (`<run>/<stage>/<artifact>`)
    pub location: String,

    /// Files in the bundle, relative to its root
    #[serde(default)]
    pub files: Vec<String>,
}

/// An input artifact resolved for an action invocation
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResolvedInput {
    pub name: String,
    pub content: ArtifactContent,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
struct ArtifactSlot {
    name: String,
    content: Option<ArtifactContent>,
}

/// Run-scoped map of artifact handles to their content
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ArtifactRegistry {
    slots: Vec<ArtifactSlot>,
}

impl ArtifactRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Declares an artifact, returning the existing handle if already declared
    pub fn declare(&mut self, name: &str) -> ArtifactHandle {
        if let Some(handle) = self.lookup(name) {
            return handle;
        }

        self.slots.push(ArtifactSlot {
            name: name.to_string(),
            content: None,
        });
        ArtifactHandle(self.slots.len() - 1)
    }

    /// Finds the handle of a declared artifact
    pub fn lookup(&self, name: &str) -> Option<ArtifactHandle> {
        self.slots
            .iter()
            .position(|slot| slot.name == name)
            .map(ArtifactHandle)
    }

    /// Binds content to a declared artifact
    ///
    /// An artifact can only be bound once.
    pub fn bind(
        &mut self,
        handle: ArtifactHandle,
        content: ArtifactContent,
    ) -> Result<(), ArtifactError> {
        let slot = self
            .slots
            .get_mut(handle.0)
            .ok_or_else(|| ArtifactError::Unknown(format!("#{}", handle.0)))?;

        if slot.content.is_some() {
            return Err(ArtifactError::AlreadyBound(slot.name.clone()));
        }

        slot.content = Some(content);
        Ok(())
    }

    /// Returns the content of a bound artifact
    pub fn resolve(&self, handle: ArtifactHandle) -> Result<&ArtifactContent, ArtifactError> {
        let slot = self
            .slots
            .get(handle.0)
            .ok_or_else(|| ArtifactError::Unknown(format!("#{}", handle.0)))?;

        slot.content
            .as_ref()
            .ok_or_else(|| ArtifactError::Unbound(slot.name.clone()))
    }

    /// Looks up and resolves an artifact by name
    pub fn resolve_name(&self, name: &str) -> Result<&ArtifactContent, ArtifactError> {
        let handle = self
            .lookup(name)
            .ok_or_else(|| ArtifactError::Unknown(name.to_string()))?;
        self.resolve(handle)
    }

    /// Name of the artifact behind a handle
    pub fn name(&self, handle: ArtifactHandle) -> Option<&str> {
        self.slots.get(handle.0).map(|slot| slot.name.as_str())
    }

    pub fn is_bound(&self, handle: ArtifactHandle) -> bool {
        self.slots
            .get(handle.0)
            .is_some_and(|slot| slot.content.is_some())
    }

    /// Iterates over every declared artifact in declaration order
    pub fn iter(&self) -> impl Iterator<Item = (&str, Option<&ArtifactContent>)> {
        self.slots
            .iter()
            .map(|slot| (slot.name.as_str(), slot.content.as_ref()))
    }

    pub fn len(&self) -> usize {
        self.slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn content(location: &str) -> ArtifactContent {
        ArtifactContent {
            location: location.to_string(),
            files: vec!["pom.xml".to_string()],
        }
    }

    #[test]
    fn test_declare_is_idempotent() {
        let mut registry = ArtifactRegistry::new();
        let first = registry.declare("source");
        let second = registry.declare("source");
        assert_eq!(first, second);
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn test_resolve_before_bind_fails() {
        let mut registry = ArtifactRegistry::new();
        let handle = registry.declare("build");

        let err = registry.resolve(handle).unwrap_err();
        assert_eq!(err, ArtifactError::Unbound("build".to_string()));
    }

    #[test]
    fn test_bind_then_resolve() {
        let mut registry = ArtifactRegistry::new();
        let handle = registry.declare("source");
        registry.bind(handle, content("run/Source/source")).unwrap();

        assert!(registry.is_bound(handle));
        assert_eq!(
            registry.resolve_name("source").unwrap().location,
            "run/Source/source"
        );
    }

    #[test]
    fn test_bound_artifact_is_read_only() {
        let mut registry = ArtifactRegistry::new();
        let handle = registry.declare("source");
        registry.bind(handle, content("a")).unwrap();

        let err = registry.bind(handle, content("b")).unwrap_err();
        assert_eq!(err, ArtifactError::AlreadyBound("source".to_string()));
        assert_eq!(registry.resolve(handle).unwrap().location, "a");
    }

    #[test]
    fn test_unknown_name() {
        let registry = ArtifactRegistry::new();
        assert!(matches!(
            registry.resolve_name("missing"),
            Err(ArtifactError::Unknown(_))
        ));
    }
}
