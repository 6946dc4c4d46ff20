//! Append-only store of epoch summaries.
//!
//! Every record is a frame: a `u64` big-endian length followed by that many
//! bytes of JSON-encoded [`BlobSummary`].

use std::{io, path::Path};

use futures::StreamExt;
use log::{debug, warn};
use tokio::{
    fs::{self, File, OpenOptions},
    io::AsyncWriteExt,
};
use tokio_util::codec::{FramedRead, LengthDelimitedCodec};

use crate::{error::Result, stats::BlobSummary};

/// Store file name inside the model directory.
pub const STORE_FILE: &str = "logs.p";

type LenType = u64;
const LEN_TYPE_SIZE: usize = size_of::<LenType>();

/// Frames bigger than this are treated as corruption.
const MAX_FRAME_LEN: usize = 64 * 1024 * 1024;

/// Appends one framed summary to the store at `path`, creating it if needed.
///
/// The file is opened in append mode on every call and flushed before
/// returning.
///
/// # Arguments
/// * `path` - The store file.
/// * `summary` - The summary to persist.
pub async fn append(path: &Path, summary: &BlobSummary) -> Result<()> {
    if let Some(dir) = path.parent().filter(|dir| !dir.as_os_str().is_empty()) {
        fs::create_dir_all(dir).await?;
    }

    let body = serde_json::to_vec(summary)?;
    let len = (body.len() as LenType).to_be_bytes();

    let mut file = OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .await?;

    let mut frame = Vec::with_capacity(LEN_TYPE_SIZE + body.len());
    frame.extend_from_slice(&len);
    frame.extend_from_slice(&body);

    file.write_all(&frame).await?;
    file.flush().await?;
    Ok(())
}

/// Reads every complete summary in the store, oldest first.
///
/// A store that doesn't exist reads as empty. A truncated or unreadable
/// trailing frame ends the read with a warning, the frames before it are kept.
pub async fn read_all(path: &Path) -> Result<Vec<BlobSummary>> {
    let file = match File::open(path).await {
        Ok(file) => file,
        Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(Vec::new()),
        Err(e) => return Err(e.into()),
    };

    let codec = LengthDelimitedCodec::builder()
        .length_field_length(LEN_TYPE_SIZE)
        .max_frame_length(MAX_FRAME_LEN)
        .new_codec();
    let mut frames = FramedRead::new(file, codec);

    let mut summaries = Vec::new();
    while let Some(frame) = frames.next().await {
        match frame {
            Ok(bytes) => summaries.push(serde_json::from_slice(&bytes)?),
            Err(e) => {
                warn!("summary store ends in a bad frame, stopping: err={e}");
                break;
            }
        }
    }

    debug!("read {} summaries from {}", summaries.len(), path.display());
    Ok(summaries)
}

/// Deletes the store at `path`.
///
/// A missing store is already reset. Any other failure is logged and
/// ignored, the next [`append`] surfaces a store that is really unusable.
pub fn reset(path: &Path) {
    match std::fs::remove_file(path) {
        Ok(()) => debug!("summary store {} reset", path.display()),
        Err(e) if e.kind() == io::ErrorKind::NotFound => {}
        Err(e) => debug!("could not reset summary store {}: {e}", path.display()),
    }
}
