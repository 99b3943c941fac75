//! The immutable pipeline topology produced by the builder.

use super::Options;
use crate::errors::ConfigurationError;
use crate::observability::Logger;
use crate::stages::Stage;
use std::sync::Arc;

/// Stages occupying one topological position.
///
/// A group of width one is a plain stage; wider groups are the parallel
/// branches of a fan.
#[derive(Debug, Clone)]
pub struct StageGroup {
    stages: Vec<Arc<Stage>>,
}

impl StageGroup {
    /// Creates a group from tidied stages.
    #[must_use]
    pub fn new(stages: Vec<Stage>) -> Self {
        Self {
            stages: stages.into_iter().map(Arc::new).collect(),
        }
    }

    /// Returns the number of parallel stages.
    #[must_use]
    pub fn width(&self) -> usize {
        self.stages.len()
    }

    /// Returns the stages.
    #[must_use]
    pub fn stages(&self) -> &[Arc<Stage>] {
        &self.stages
    }
}

/// An ordered list of stage groups plus the pipeline options.
///
/// Position 0 is the source group and the last position is the sink group.
#[derive(Debug, Clone)]
pub struct PipelineSpec {
    options: Options,
    groups: Vec<StageGroup>,
}

impl PipelineSpec {
    /// Creates an empty specification.
    #[must_use]
    pub fn new(options: Options) -> Self {
        Self {
            options,
            groups: Vec::new(),
        }
    }

    /// Appends a group.
    pub fn push(&mut self, group: StageGroup) {
        self.groups.push(group);
    }

    /// Returns the pipeline name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.options.name
    }

    /// Returns the pipeline options.
    #[must_use]
    pub const fn options(&self) -> &Options {
        &self.options
    }

    /// Returns the groups in topological order.
    #[must_use]
    pub fn groups(&self) -> &[StageGroup] {
        &self.groups
    }

    /// Returns the width of the last group.
    #[must_use]
    pub fn tail_width(&self) -> usize {
        self.groups.last().map_or(0, StageGroup::width)
    }

    /// Checks the topology.
    ///
    /// # Errors
    ///
    /// - [`ConfigurationError::PipelineTooShort`] with fewer than two groups
    /// - [`ConfigurationError::EmptyGroup`] for a group without stages
    /// - [`ConfigurationError::MultipleSources`] unless the first group holds
    ///   exactly one stage
    /// - [`ConfigurationError::InvalidTransition`] when two adjacent groups
    ///   are both wider than one but differ in width
    pub fn validate(&self) -> Result<(), ConfigurationError> {
        if self.groups.len() < 2 {
            return Err(ConfigurationError::PipelineTooShort {
                groups: self.groups.len(),
            });
        }

        if let Some(position) = self.groups.iter().position(|g| g.width() == 0) {
            return Err(ConfigurationError::EmptyGroup { position });
        }

        let source_width = self.groups[0].width();
        if source_width != 1 {
            return Err(ConfigurationError::MultipleSources {
                width: source_width,
            });
        }

        for (position, pair) in self.groups.windows(2).enumerate() {
            let (from, to) = (pair[0].width(), pair[1].width());
            if from != to && from != 1 && to != 1 {
                return Err(ConfigurationError::InvalidTransition {
                    position: position + 1,
                    from,
                    to,
                });
            }
        }

        Ok(())
    }

    /// Sink deliveries a single parcel produces from each position onwards,
    /// absent expansions. Only a width increase (a fan-out broadcast)
    /// multiplies deliveries; fan-in merges keep every branch's parcel.
    #[must_use]
    pub fn multipliers(&self) -> Vec<i64> {
        let mut multipliers = vec![1_i64; self.groups.len()];
        for position in (0..self.groups.len().saturating_sub(1)).rev() {
            let (from, to) = (self.groups[position].width(), self.groups[position + 1].width());
            let fan = if to > from {
                i64::try_from(to).unwrap_or(i64::MAX)
            } else {
                1
            };
            multipliers[position] = multipliers[position + 1].saturating_mul(fan);
        }
        multipliers
    }

    /// Distinct loggers used by the pipeline and its stages.
    #[must_use]
    pub fn loggers(&self) -> Vec<Arc<dyn Logger>> {
        let mut loggers = vec![self.options.logger()];
        for stage in self.groups.iter().flat_map(|g| g.stages.iter()) {
            if !loggers.iter().any(|l| Arc::ptr_eq(l, stage.logger())) {
                loggers.push(Arc::clone(stage.logger()));
            }
        }
        loggers
    }
}
