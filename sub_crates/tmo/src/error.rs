#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum TmoError {
    #[error("frame is missing its X, Y and Z channels")]
    MissingChannels,

    #[error("tone mapping was cancelled")]
    Cancelled,
}
