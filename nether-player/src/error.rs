//! Player error types

/// Errors raised while setting up playback
///
/// Rendering itself never fails: notes that cannot get a voice are dropped.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum PlayerError {
    /// The order list names no playable pattern before its end marker
    #[error("module has no playable order")]
    NoValidOrder,
    /// Starting order lies beyond the order list
    #[error("start order {order} is beyond the order list ({len} entries)")]
    StartOrderOutOfRange { order: usize, len: usize },
    /// The module addresses more channels than a renderer tracks
    #[error("module uses {0} channels, at most {max} are supported", max = crate::N_CHANNELS)]
    TooManyChannels(usize),
    /// Playback ended before the requested seek position
    #[error("song ends before position {0}")]
    SeekPastEnd(i64),
    /// Configuration could not be applied
    #[error(transparent)]
    Config(#[from] ConfigError),
}

/// Errors raised while loading a [`PlayerConfig`](crate::PlayerConfig)
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ConfigError {
    /// TOML text did not parse into a configuration
    #[error("invalid player config: {0}")]
    Parse(String),
    /// Configuration could not be written out
    #[error("failed to serialize player config: {0}")]
    Serialize(String),
    /// A value is outside its accepted range
    #[error("{field} out of range: {value}")]
    OutOfRange { field: &'static str, value: i64 },
}
