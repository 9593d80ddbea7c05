use std::io;
use std::path::PathBuf;

use thiserror::Error;

/// Failure picking an entry out of a ranking.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SelectError {
    #[error("no valid multicast candidates")]
    NoValidCandidates,
    #[error("rank {rank} is out of range ({available} valid candidates)")]
    OutOfRange { rank: usize, available: usize },
}

/// Failure of one region's fetch. Reported at the region boundary, never fatal to a batch.
#[derive(Debug, Error)]
pub enum FetchError {
    #[error("every navigation strategy failed for '{region}'")]
    NavigationFailed { region: String },
    #[error("no valid multicast candidates for '{region}'")]
    NoValidCandidates { region: String },
    #[error("rank {rank} is out of range ({available} valid candidates)")]
    OutOfRange { rank: usize, available: usize },
    #[error("download trigger failed: {0}")]
    TriggerFailed(String),
    #[error("no new playlist appeared in {} within {timeout_secs}s", .dir.display())]
    DownloadTimeout { dir: PathBuf, timeout_secs: u64 },
    #[error("downloaded playlist {} is empty", .path.display())]
    EmptyArtifact { path: PathBuf },
    #[error(transparent)]
    Io(#[from] io::Error),
}

impl FetchError {
    pub fn from_select(err: SelectError, region: &str) -> Self {
        match err {
            SelectError::NoValidCandidates => FetchError::NoValidCandidates {
                region: region.to_string(),
            },
            SelectError::OutOfRange { rank, available } => FetchError::OutOfRange { rank, available },
        }
    }
}

/// Failure of a single navigation strategy; the chain moves on to the next one.
#[derive(Debug, Error)]
pub enum NavError {
    #[error("strategy not available for this region")]
    Unsupported,
    #[error("listing is empty")]
    EmptyListing,
    #[error("malformed listing: {0}")]
    Malformed(String),
    #[error(transparent)]
    Io(#[from] io::Error),
}
