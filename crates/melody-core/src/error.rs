use thiserror::Error;

/// Caller-supplied parameters outside the generator's contract.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ComposeError {
    #[error("unsupported style '{0}'")]
    UnsupportedStyle(String),
    #[error("unsupported complexity '{0}'")]
    UnsupportedComplexity(String),
    #[error("duration {duration}s is outside 1..={max}s")]
    InvalidDuration { duration: u32, max: u32 },
    #[error("invalid bpm range [{min}, {max}]")]
    InvalidBpmRange { min: u32, max: u32 },
    #[error("snapshot is from chain {snapshot}, config targets chain {config}")]
    ChainMismatch { snapshot: u64, config: u64 },
}

/// A composition plan that cannot be turned into a score.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ArrangeError {
    #[error("{track} loop index {index} out of range (pool size {pool})")]
    LoopOutOfRange { track: &'static str, index: usize, pool: usize },
    #[error("chord progression is empty")]
    EmptyProgression,
    #[error("chord degree {0} is outside the scale")]
    InvalidChord(u8),
    #[error("invalid tempo {0} bpm")]
    InvalidTempo(u32),
    #[error("invalid duration {0}s")]
    InvalidDuration(u32),
    #[error("midi encoding failed: {0}")]
    Midi(String),
}
