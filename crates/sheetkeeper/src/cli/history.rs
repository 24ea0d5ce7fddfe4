//! Read and rewind the version log.

use std::io::{self, Write};

use sheetkeeper_core::HistorySession;
use sheetkeeper_core::config::HistoryConfig;
use sheetkeeper_core::history::{CommitOutcome, VersionRecord};

use super::{block_on, open_session};

/// Format a millisecond timestamp in local time.
pub(super) fn format_timestamp(millis: i64) -> String {
    chrono::DateTime::from_timestamp_millis(millis)
        .map(|t| {
            t.with_timezone(&chrono::Local)
                .format("%Y-%m-%d %H:%M:%S")
                .to_string()
        })
        .unwrap_or_else(|| millis.to_string())
}

/// Close the session, logging rather than failing the command.
pub(super) async fn close(session: &HistorySession) {
    if let Err(e) = session.shutdown().await {
        log::warn!("Session did not close cleanly: {}", e);
    }
}

/// Report a commit the way every writing command does.
pub(super) fn report_commit(outcome: &CommitOutcome, total: usize) -> bool {
    match outcome {
        CommitOutcome::Committed(record) => {
            println!(
                "✓ Saved version {} of {}: {}",
                total.saturating_sub(1),
                total,
                record.description
            );
            true
        }
        CommitOutcome::Empty => {
            println!("Nothing to save.");
            true
        }
        CommitOutcome::Blocked(conflict) => {
            eprintln!(
                "✗ Another tab saved version {} first, nothing was written",
                short_hash(conflict.remote_hash())
            );
            false
        }
    }
}

fn short_hash(hash: &str) -> &str {
    hash.get(..8).unwrap_or(hash)
}

fn squash_note(record: &VersionRecord) -> String {
    match record.squashed_count {
        Some(count) if record.is_squashed && count > 1 => format!(" ({} edits)", count),
        _ => String::new(),
    }
}

/// Handle the `history` command
pub fn handle_history(config: HistoryConfig, json: bool) -> bool {
    let result = block_on(async {
        let session = open_session(config)?;
        let versions = session.versions();
        close(&session).await;
        Ok::<_, String>(versions)
    });

    let versions = match result.and_then(|r| r) {
        Ok(versions) => versions,
        Err(e) => {
            eprintln!("✗ {}", e);
            return false;
        }
    };

    if json {
        return match serde_json::to_string_pretty(&versions) {
            Ok(text) => {
                println!("{}", text);
                true
            }
            Err(e) => {
                eprintln!("✗ Could not serialize history: {}", e);
                false
            }
        };
    }

    if versions.is_empty() {
        println!("No versions stored yet.");
        return true;
    }

    for (index, record) in versions.iter().enumerate() {
        println!(
            "{:>3}  {}  {}  {}{}",
            index,
            format_timestamp(record.timestamp),
            short_hash(&record.content_hash),
            record.description,
            squash_note(record)
        );
    }
    true
}

/// Handle the `show` command
pub fn handle_show(config: HistoryConfig, index: Option<usize>) -> bool {
    let result = block_on(async {
        let session = open_session(config)?;
        let shown = match index {
            Some(index) => session
                .navigate_to_version(index)
                .map(|()| session.displayed_character())
                .map_err(|e| e.to_string()),
            None => Ok(session.latest_character()),
        };
        close(&session).await;
        shown
    });

    match result.and_then(|r| r) {
        Ok(Some(snapshot)) => match serde_json::to_string_pretty(&snapshot) {
            Ok(text) => {
                println!("{}", text);
                true
            }
            Err(e) => {
                eprintln!("✗ Could not serialize version: {}", e);
                false
            }
        },
        Ok(None) => {
            println!("No versions stored yet.");
            true
        }
        Err(e) => {
            eprintln!("✗ {}", e);
            false
        }
    }
}

/// Handle the `restore` command
pub fn handle_restore(config: HistoryConfig, index: usize) -> bool {
    let result = block_on(async {
        let session = open_session(config)?;
        let restored = restore(&session, index).await;
        close(&session).await;
        restored
    });

    match result.and_then(|r| r) {
        Ok(Some((outcome, total))) => report_commit(&outcome, total),
        Ok(None) => {
            println!("Version {} is already the newest version.", index);
            true
        }
        Err(e) => {
            eprintln!("✗ {}", e);
            false
        }
    }
}

async fn restore(
    session: &HistorySession,
    index: usize,
) -> Result<Option<(CommitOutcome, usize)>, String> {
    session
        .navigate_to_version(index)
        .map_err(|e| e.to_string())?;
    if session
        .restore_displayed_version()
        .map_err(|e| e.to_string())?
        .is_none()
    {
        return Ok(None);
    }
    let outcome = session.flush().await.map_err(|e| e.to_string())?;
    Ok(Some((outcome, session.versions().len())))
}

/// Handle the `clear` command
pub fn handle_clear(config: HistoryConfig, yes: bool) -> bool {
    if !yes {
        print!("Delete every stored version? [y/N] ");
        if io::stdout().flush().is_err() {
            eprintln!("✗ Failed to write prompt");
            return false;
        }

        let mut input = String::new();
        if io::stdin().read_line(&mut input).is_err() {
            eprintln!("✗ Failed to read input");
            return false;
        }

        let input = input.trim().to_lowercase();
        if input != "y" && input != "yes" {
            println!("Clear cancelled.");
            return true;
        }
    }

    let result = block_on(async {
        let session = open_session(config)?;
        let removed = session.versions().len();
        let cleared = session
            .store()
            .clear()
            .map_err(|e| e.to_string())
            .and_then(|()| session.reload().map_err(|e| e.to_string()));
        close(&session).await;
        cleared.map(|()| removed)
    });

    match result.and_then(|r| r) {
        Ok(removed) => {
            println!("✓ Removed {} version(s)", removed);
            true
        }
        Err(e) => {
            eprintln!("✗ {}", e);
            false
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn short_hash_truncates_long_hashes_only() {
        assert_eq!(short_hash("0123456789abcdef"), "01234567");
        assert_eq!(short_hash("abc"), "abc");
    }

    #[test]
    fn squash_note_only_for_multi_edit_versions() {
        let mut record = VersionRecord {
            id: "v1".to_string(),
            snapshot: serde_json::json!({}),
            timestamp: 0,
            description: "Changed name".to_string(),
            content_hash: "h".to_string(),
            is_squashed: true,
            squashed_count: Some(1),
        };
        assert_eq!(squash_note(&record), "");
        record.squashed_count = Some(4);
        assert_eq!(squash_note(&record), " (4 edits)");
    }
}
