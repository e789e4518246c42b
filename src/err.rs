#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("transport error: {0}")]
    Transport(#[from] std::io::Error),

    #[error("malformed frame: {0}")]
    Decode(#[from] bincode::Error),

    #[error("{0}")]
    ApplicationNack(String),

    #[error("{0}")]
    PipelineFailed(String),

    #[error("{0}")]
    DiscoveryFailed(String),

    #[error("{0}")]
    Usage(String),
}
