//! The stage graph: the ordered list of execution phases.
//!
//! Stages run strictly one after another. Each one ends in a synchronization
//! point where the command buffers of its systems are applied.

use serde::{Deserialize, Serialize};

use crate::error::ConfigError;

/// Stages every [`Runtime::new`](crate::Runtime::new) starts with, in order.
pub const DEFAULT_STAGES: [&str; 5] = ["first", "pre_update", "update", "post_update", "last"];

/// Where a new stage is inserted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum StagePosition {
    /// Before every existing stage.
    AtStart,
    /// After every existing stage.
    AtEnd,
    /// Immediately before the named stage.
    Before(String),
    /// Immediately after the named stage.
    After(String),
}

/// Ordered, uniquely named stages.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StageGraph {
    stages: Vec<String>,
}

impl StageGraph {
    /// A graph with no stages.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// A graph holding [`DEFAULT_STAGES`].
    #[must_use]
    pub fn with_defaults() -> Self {
        Self {
            stages: DEFAULT_STAGES.iter().map(ToString::to_string).collect(),
        }
    }

    /// Insert a stage.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::DuplicateStage`] if the name is taken, or
    /// [`ConfigError::UnknownStage`] if `position` names a missing stage.
    pub fn define(&mut self, name: impl Into<String>, position: StagePosition) -> Result<(), ConfigError> {
        let name = name.into();
        if self.contains(&name) {
            return Err(ConfigError::DuplicateStage(name));
        }
        let index = match &position {
            StagePosition::AtStart => 0,
            StagePosition::AtEnd => self.stages.len(),
            StagePosition::Before(anchor) => self.require(anchor)?,
            StagePosition::After(anchor) => self.require(anchor)? + 1,
        };
        self.stages.insert(index, name);
        Ok(())
    }

    fn require(&self, name: &str) -> Result<usize, ConfigError> {
        self.position(name)
            .ok_or_else(|| ConfigError::UnknownStage(name.to_string()))
    }

    /// Index of a stage in execution order.
    #[must_use]
    pub fn position(&self, name: &str) -> Option<usize> {
        self.stages.iter().position(|stage| stage == name)
    }

    /// Returns `true` if the stage exists.
    #[must_use]
    pub fn contains(&self, name: &str) -> bool {
        self.position(name).is_some()
    }

    /// Stage names in execution order.
    pub fn iter(&self) -> impl Iterator<Item = &str> {
        self.stages.iter().map(String::as_str)
    }

    /// Number of stages.
    #[must_use]
    pub fn len(&self) -> usize {
        self.stages.len()
    }

    /// Returns `true` if there are no stages.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.stages.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn names(graph: &StageGraph) -> Vec<&str> {
        graph.iter().collect()
    }

    #[test]
    fn test_default_stage_order() {
        let graph = StageGraph::with_defaults();
        assert_eq!(names(&graph), DEFAULT_STAGES.to_vec());
        assert!(StageGraph::new().is_empty());
    }

    #[test]
    fn test_define_positions() {
        let mut graph = StageGraph::new();
        graph.define("update", StagePosition::AtEnd).unwrap();
        graph.define("input", StagePosition::AtStart).unwrap();
        graph
            .define("physics", StagePosition::After("update".to_string()))
            .unwrap();
        graph
            .define("ai", StagePosition::Before("update".to_string()))
            .unwrap();
        graph.define("render", StagePosition::AtEnd).unwrap();
        assert_eq!(names(&graph), vec!["input", "ai", "update", "physics", "render"]);
    }

    #[test]
    fn test_duplicate_stage_rejected() {
        let mut graph = StageGraph::with_defaults();
        assert_eq!(
            graph.define("update", StagePosition::AtEnd),
            Err(ConfigError::DuplicateStage("update".to_string()))
        );
        assert_eq!(graph.len(), DEFAULT_STAGES.len());
    }

    #[test]
    fn test_unknown_anchor_rejected() {
        let mut graph = StageGraph::new();
        assert_eq!(
            graph.define("late", StagePosition::After("missing".to_string())),
            Err(ConfigError::UnknownStage("missing".to_string()))
        );
        assert!(graph.is_empty());
    }
}
