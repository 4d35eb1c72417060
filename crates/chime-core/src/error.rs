use thiserror::Error;

/// Crate-level error type.
///
/// Two kinds matter to callers:
/// - `Store`: the document store misbehaved. Propagated out of `schedule`,
///   `poll`, `execute` and the sweeper.
/// - `Handler`: user handler code failed. Captured onto the task record
///   (`status = Failed`) and never propagated out of the poll loop.
#[derive(Debug, Error)]
pub enum ChimeError {
    #[error("store: {0}")]
    Store(String),

    #[error("{0}")]
    Handler(String),
}

impl ChimeError {
    pub fn store(msg: impl Into<String>) -> Self {
        Self::Store(msg.into())
    }

    pub fn handler(msg: impl Into<String>) -> Self {
        Self::Handler(msg.into())
    }
}
