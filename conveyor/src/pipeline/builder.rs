//! Typestate pipeline builder.
//!
//! Each step returns a builder exposing only the operations that are legal
//! next: a source comes first, fans must be closed or terminated by sinks of
//! the same width, and only a builder ending in sinks can be built.

use super::{Dispatcher, Options, PipelineSpec, StageGroup};
use crate::errors::ConfigurationError;
use crate::stages::StageSpec;

/// Entry point for building a pipeline.
#[derive(Debug, Clone, Copy, Default)]
pub struct Conveyor;

impl Conveyor {
    /// Starts a pipeline with the given options.
    #[must_use]
    pub fn start(options: Options) -> SourceBuilder {
        SourceBuilder {
            draft: Draft {
                spec: PipelineSpec::new(options),
            },
        }
    }
}

/// Shared append-only state behind every builder step.
#[derive(Debug, Clone)]
struct Draft {
    spec: PipelineSpec,
}

impl Draft {
    fn push(mut self, stages: Vec<StageSpec>) -> Result<Self, ConfigurationError> {
        if stages.is_empty() {
            return Err(ConfigurationError::EmptyGroup {
                position: self.spec.groups().len(),
            });
        }
        for (index, stage) in stages.iter().enumerate() {
            stage.validate(index)?;
        }

        let options = self.spec.options().clone();
        let group = StageGroup::new(stages.into_iter().map(|s| s.tidy(&options)).collect());
        self.spec.push(group);
        Ok(self)
    }

    fn push_matching(self, stages: Vec<StageSpec>) -> Result<Self, ConfigurationError> {
        let expected = self.spec.tail_width();
        if stages.len() != expected {
            return Err(ConfigurationError::ArityMismatch {
                expected,
                actual: stages.len(),
            });
        }
        self.push(stages)
    }
}

/// A pipeline without stages. Only a source may be added.
#[derive(Debug, Clone)]
pub struct SourceBuilder {
    draft: Draft,
}

impl SourceBuilder {
    /// Adds the source stage.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigurationError::InvalidStage`] if the stage is invalid.
    pub fn add_source(self, stage: StageSpec) -> Result<StageBuilder, ConfigurationError> {
        Ok(StageBuilder {
            draft: self.draft.push(vec![stage])?,
        })
    }
}

/// A pipeline whose last group is a single stage.
#[derive(Debug, Clone)]
pub struct StageBuilder {
    draft: Draft,
}

impl StageBuilder {
    /// Appends a single segment stage.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigurationError::InvalidStage`] if the stage is invalid.
    pub fn add_stage(self, stage: StageSpec) -> Result<Self, ConfigurationError> {
        Ok(Self {
            draft: self.draft.push(vec![stage])?,
        })
    }

    /// Appends the single sink, ending the pipeline.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigurationError::InvalidStage`] if the stage is invalid.
    pub fn add_sink(self, stage: StageSpec) -> Result<SinkBuilder, ConfigurationError> {
        Ok(SinkBuilder {
            draft: self.draft.push(vec![stage])?,
        })
    }

    /// Opens a fan: every parcel is broadcast to each of `stages`.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigurationError::EmptyGroup`] if `stages` is empty, or
    /// [`ConfigurationError::InvalidStage`] naming the first invalid stage.
    pub fn fanout(
        self,
        stages: impl IntoIterator<Item = StageSpec>,
    ) -> Result<StagesBuilder, ConfigurationError> {
        Ok(StagesBuilder {
            draft: self.draft.push(stages.into_iter().collect())?,
        })
    }
}

/// A pipeline whose last group is an open fan.
#[derive(Debug, Clone)]
pub struct StagesBuilder {
    draft: Draft,
}

impl StagesBuilder {
    /// Returns the width of the open fan.
    #[must_use]
    pub fn width(&self) -> usize {
        self.draft.spec.tail_width()
    }

    /// Appends one stage per branch of the open fan.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigurationError::ArityMismatch`] unless exactly
    /// [`width`](Self::width) stages are given.
    pub fn add_stages(
        self,
        stages: impl IntoIterator<Item = StageSpec>,
    ) -> Result<Self, ConfigurationError> {
        Ok(Self {
            draft: self.draft.push_matching(stages.into_iter().collect())?,
        })
    }

    /// Terminates every branch with its own sink.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigurationError::ArityMismatch`] unless exactly
    /// [`width`](Self::width) sinks are given.
    pub fn add_sinks(
        self,
        stages: impl IntoIterator<Item = StageSpec>,
    ) -> Result<SinkBuilder, ConfigurationError> {
        Ok(SinkBuilder {
            draft: self.draft.push_matching(stages.into_iter().collect())?,
        })
    }

    /// Closes the fan by merging every branch into `stage`.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigurationError::InvalidStage`] if the stage is invalid.
    pub fn fanin(self, stage: StageSpec) -> Result<StageBuilder, ConfigurationError> {
        Ok(StageBuilder {
            draft: self.draft.push(vec![stage])?,
        })
    }
}

/// A complete pipeline.
#[derive(Debug, Clone)]
pub struct SinkBuilder {
    draft: Draft,
}

impl SinkBuilder {
    /// Returns the specification built so far.
    #[must_use]
    pub const fn spec(&self) -> &PipelineSpec {
        &self.draft.spec
    }

    /// Snapshots the specification into a dispatcher. May be called any
    /// number of times; each dispatcher is independent of the others.
    #[must_use]
    pub fn build(&self) -> Dispatcher {
        Dispatcher::new(self.draft.spec.clone())
    }
}
