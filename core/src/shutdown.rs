//! Commit dirty tables when the process is asked to stop.

use tracing::info;

use crate::manager::{CacheDisk, CommitReport};

/// Wait for Ctrl-C, then persist every dirty table.
///
/// Must run inside a Tokio runtime with the I/O driver enabled. The caller decides how to exit
/// once the returned future completes.
pub async fn commit_on_ctrl_c(cache: CacheDisk) -> std::io::Result<CommitReport> {
    tokio::signal::ctrl_c().await?;
    info!("interrupt received; committing dirty cache tables");
    Ok(cache.commit_all())
}
