//! The human readable status file, one block per epoch.

use std::path::Path;

use tokio::{
    fs::{self, OpenOptions},
    io::AsyncWriteExt,
};

use crate::{error::Result, telemetry::SUMMARY_HEADER};

/// Prefix of every block's first line.
pub const EPOCH_MARKER: &str = "[epoch ";

/// One epoch's entry in the status file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StatusBlock {
    /// Save marker, always starts with [`EPOCH_MARKER`].
    pub save: String,
    /// Counters rendered by the metrics logger.
    pub stats: String,
    /// Rendered utilization summary, starts with [`SUMMARY_HEADER`].
    pub summary: String,
}

impl StatusBlock {
    /// The block as written: its three parts newline-joined.
    pub fn text(&self) -> String {
        [self.save.as_str(), &self.stats, &self.summary].join("\n")
    }
}

/// Appends `block` plus a trailing newline to the file at `path`.
///
/// The file is opened in append mode and flushed before returning.
pub async fn append(path: &Path, block: &StatusBlock) -> Result<()> {
    if let Some(dir) = path.parent().filter(|dir| !dir.as_os_str().is_empty()) {
        fs::create_dir_all(dir).await?;
    }

    let mut file = OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .await?;

    let mut text = block.text();
    text.push('\n');

    file.write_all(text.as_bytes()).await?;
    file.flush().await?;
    Ok(())
}

/// Splits the status file back into its blocks, oldest first.
///
/// Lines before the first save marker are skipped.
pub async fn read_blocks(path: &Path) -> Result<Vec<StatusBlock>> {
    let text = fs::read_to_string(path).await?;
    Ok(parse(&text))
}

fn parse(text: &str) -> Vec<StatusBlock> {
    let mut blocks: Vec<StatusBlock> = Vec::new();
    let mut in_summary = false;

    for line in text.lines() {
        if line.starts_with(EPOCH_MARKER) {
            blocks.push(StatusBlock {
                save: line.to_string(),
                stats: String::new(),
                summary: String::new(),
            });
            in_summary = false;
            continue;
        }

        let Some(block) = blocks.last_mut() else {
            continue;
        };

        if line == SUMMARY_HEADER {
            in_summary = true;
        }

        let part = if in_summary {
            &mut block.summary
        } else {
            &mut block.stats
        };

        if !part.is_empty() {
            part.push('\n');
        }
        part.push_str(line);
    }

    blocks
}
