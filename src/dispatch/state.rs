//! Per-call dispatch stages
//!
//! `Validating -> Sending -> Persisting -> Done`, with `Failed` reachable
//! from every non-terminal stage.

use std::fmt;

/// Stage a dispatch can fail in
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DispatchStage {
    Validating,
    Sending,
    Persisting,
}

impl fmt::Display for DispatchStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Validating => "validating",
            Self::Sending => "sending",
            Self::Persisting => "persisting",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DispatchState {
    Validating,
    Sending,
    Persisting,
    Done,
    Failed { stage: DispatchStage },
}

impl DispatchState {
    /// Move to the next stage after the current one succeeded
    #[must_use]
    pub fn advance(self) -> Self {
        match self {
            Self::Validating => Self::Sending,
            Self::Sending => Self::Persisting,
            Self::Persisting => Self::Done,
            terminal @ (Self::Done | Self::Failed { .. }) => terminal,
        }
    }

    /// Record a failure in the current stage
    #[must_use]
    pub fn fail(self) -> Self {
        match self.stage() {
            Some(stage) => Self::Failed { stage },
            None => self,
        }
    }

    /// The stage in progress, if any
    pub fn stage(self) -> Option<DispatchStage> {
        match self {
            Self::Validating => Some(DispatchStage::Validating),
            Self::Sending => Some(DispatchStage::Sending),
            Self::Persisting => Some(DispatchStage::Persisting),
            Self::Done | Self::Failed { .. } => None,
        }
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Done | Self::Failed { .. })
    }
}
