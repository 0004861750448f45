use thiserror::Error;

/// Fatal filter errors.
///
/// Everything recoverable (unparsable range endpoints, timestamp anomalies,
/// unseekable sources with out-of-order ranges) is logged and handled by
/// ending extraction instead.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum RecutError {
    /// Size/duration splitting must retain packets across ticks to plan
    /// cuts, which deadlocks an upstream that hands out blocking
    /// references.
    #[error("size/duration split requires packet retention but input pid {pid} uses blocking references")]
    BlockingReferences { pid: usize },
}

pub type RecutResult<T> = Result<T, RecutError>;
