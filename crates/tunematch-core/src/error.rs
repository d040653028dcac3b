//! Error type shared by the engine, the stores and the recognizer

use thiserror::Error;

/// Failures surfaced by tunematch. A search that finds nothing is not an
/// error; it is a [`crate::MatchResult`] with `match_found == false`.
#[derive(Debug, Error)]
pub enum Error {
    /// Missing, unreadable or empty audio, or a bad identifier
    #[error("input error: {0}")]
    Input(String),

    /// Invalid algorithm, matching or storage parameters
    #[error("config error: {0}")]
    Config(String),

    /// The backing store could not be reached or did not answer in time
    #[error("store unavailable: {0}")]
    StoreUnavailable(String),

    /// Persisted index data is unreadable or inconsistent
    #[error("storage error: {0}")]
    Storage(String),
}

pub type Result<T> = std::result::Result<T, Error>;

impl Error {
    pub fn input(msg: impl Into<String>) -> Self {
        Error::Input(msg.into())
    }

    pub fn config(msg: impl Into<String>) -> Self {
        Error::Config(msg.into())
    }

    /// Wrap a backend failure, keeping the whole context chain
    pub(crate) fn unavailable(err: impl std::fmt::Display) -> Self {
        Error::StoreUnavailable(format!("{:#}", err))
    }
}
