//! CLI command implementations.

pub mod daemon;
pub mod init;
pub mod notify;
pub mod status;
pub mod stop;
pub mod sync_now;

use anyhow::{Context, Result};

use bufsync_client::{AtuinStore, SyncEngine, TmuxBuffers};
use bufsync_types::SyncReport;

use crate::config::{AppConfig, ServerIdentity};

/// Engine wired to tmux and atuin.
pub type Engine = SyncEngine<TmuxBuffers, AtuinStore>;

/// Build an engine from saved identity and state.
pub async fn build_engine(config: &AppConfig) -> Result<Engine> {
    let identity = ServerIdentity::load_or_create(&config.paths).await?;
    let state_file = config.paths.state_file();
    let state = state_file
        .load()
        .await
        .context("Failed to load sync state")?;

    Ok(SyncEngine::new(
        identity.id()?,
        config.sync.clone(),
        config.settings.tmux(),
        config.settings.atuin(),
    )
    .with_state(state)
    .with_state_file(state_file))
}

/// One-line summary of a sync.
pub fn summarize(report: &SyncReport) -> String {
    let mut out = format!(
        "Pulled {} ({} already present), pushed {}",
        report.pull.pulled, report.pull.already_present, report.push.pushed
    );
    if report.push.evicted > 0 {
        out.push_str(&format!(", evicted {}", report.push.evicted));
    }
    if report.pull.skipped_corrupt > 0 {
        out.push_str(&format!(", skipped {} corrupt", report.pull.skipped_corrupt));
    }
    if report.push.skipped_oversize > 0 {
        out.push_str(&format!(", kept {} too large to share", report.push.skipped_oversize));
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use bufsync_types::{PullReport, PushReport};

    #[test]
    fn summary_mentions_only_what_happened() {
        let quiet = SyncReport::default();
        assert_eq!(summarize(&quiet), "Pulled 0 (0 already present), pushed 0");

        let busy = SyncReport {
            pull: PullReport {
                pulled: 2,
                already_present: 1,
                skipped_corrupt: 1,
            },
            push: PushReport {
                pushed: 1,
                evicted: 1,
                skipped_oversize: 2,
            },
        };
        let text = summarize(&busy);
        assert!(text.contains("evicted 1"));
        assert!(text.contains("skipped 1 corrupt"));
        assert!(text.contains("kept 2 too large to share"));
    }
}
