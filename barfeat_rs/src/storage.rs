use std::fs::{self, File};
use std::io;
use std::path::Path;

use anyhow::{Context, Result, bail};
use polars::prelude::*;
use sha2::{Digest, Sha256};
use tracing::{info, warn};

/// Reads a headered CSV with schema inference. Malformed cells become nulls.
pub fn read_csv_frame(path: &Path) -> Result<DataFrame> {
    let frame = CsvReader::from_path(path)
        .with_context(|| format!("Failed to load {}", path.display()))?
        .infer_schema(Some(1024))
        .has_header(true)
        .with_ignore_errors(true)
        .finish()
        .with_context(|| format!("Unable to read {} into DataFrame", path.display()))?;
    info!(
        rows = frame.height(),
        columns = frame.width(),
        path = %path.display(),
        "Loaded CSV"
    );
    Ok(frame)
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum WriteOutcome {
    /// No file existed at the target path.
    Created,
    /// The existing file already held identical bytes and was left alone.
    Unchanged,
    /// The existing file differed and was replaced after acknowledgement.
    Overwritten,
}

/// CSV bytes exactly as they are persisted: header row, then one line per row
/// in the frame's column order.
pub fn render_csv(frame: &mut DataFrame) -> Result<Vec<u8>> {
    let mut rendered = Vec::new();
    CsvWriter::new(&mut rendered)
        .include_header(true)
        .finish(frame)
        .context("Failed to render frame as CSV")?;
    Ok(rendered)
}

pub fn sha256_file(path: &Path) -> Result<String> {
    let mut file = File::open(path)
        .with_context(|| format!("Unable to open {} for hashing", path.display()))?;
    let mut hasher = Sha256::new();
    io::copy(&mut file, &mut hasher)
        .with_context(|| format!("Unable to hash {}", path.display()))?;
    Ok(hex::encode(hasher.finalize()))
}

/// Writes `contents` to `path`. An existing file with the same sha256 is left
/// alone; a different one is only replaced when `ack_new_df` is set.
pub fn write_guarded(contents: &[u8], path: &Path, ack_new_df: bool) -> Result<WriteOutcome> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent)
            .with_context(|| format!("Unable to create {}", parent.display()))?;
    }

    let outcome = if path.exists() {
        let existing = sha256_file(path)?;
        let incoming = hex::encode(Sha256::digest(contents));
        if existing == incoming {
            info!(path = %path.display(), "Output unchanged; reusing existing file");
            return Ok(WriteOutcome::Unchanged);
        }
        if !ack_new_df {
            bail!(
                "Existing output differs from the newly computed one.\n\
                 path: {}\n\
                 existing sha256: {existing}\n\
                 new sha256: {incoming}\n\
                 Rerun with --ack-new-df to overwrite, or choose a fresh output location to preserve prior results.",
                path.display()
            );
        }
        warn!(
            existing_hash = %existing,
            new_hash = %incoming,
            path = %path.display(),
            "Output hash mismatch; overwriting because ack_new_df=true"
        );
        WriteOutcome::Overwritten
    } else {
        WriteOutcome::Created
    };

    fs::write(path, contents).with_context(|| format!("Failed to persist {}", path.display()))?;
    info!(bytes = contents.len(), path = %path.display(), "Output written");
    Ok(outcome)
}

/// Renders `frame` as CSV and persists it through [`write_guarded`].
pub fn write_frame_guarded(
    frame: &mut DataFrame,
    path: &Path,
    ack_new_df: bool,
) -> Result<WriteOutcome> {
    let rendered = render_csv(frame)?;
    let outcome = write_guarded(&rendered, path, ack_new_df)?;
    info!(rows = frame.height(), ?outcome, path = %path.display(), "Frame persisted");
    Ok(outcome)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_frame() -> DataFrame {
        df!(
            "Date" => ["2024-01-02", "2024-01-03"],
            "x" => [Some(1.5), None],
        )
        .expect("frame")
    }

    #[test]
    fn persisted_bytes_match_rendered_csv() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("out.csv");
        let mut frame = sample_frame();
        let outcome = write_frame_guarded(&mut frame, &path, false).expect("write");
        assert_eq!(outcome, WriteOutcome::Created);
        let rendered = render_csv(&mut frame).expect("render");
        assert_eq!(fs::read(&path).expect("read"), rendered);
        assert_eq!(
            sha256_file(&path).expect("hash file"),
            hex::encode(Sha256::digest(&rendered))
        );
    }

    #[test]
    fn guard_reuses_identical_and_refuses_changed_output() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("out.csv");
        let mut frame = sample_frame();
        write_frame_guarded(&mut frame, &path, false).expect("first write");
        assert_eq!(
            write_frame_guarded(&mut frame, &path, false).expect("second write"),
            WriteOutcome::Unchanged
        );

        let mut changed = df!("Date" => ["2024-01-02"], "x" => [2.0]).expect("frame");
        let err = write_frame_guarded(&mut changed, &path, false).expect_err("refused");
        assert!(err.to_string().contains("--ack-new-df"), "got: {err}");
        assert_eq!(
            write_frame_guarded(&mut changed, &path, true).expect("acknowledged"),
            WriteOutcome::Overwritten
        );
    }

    #[test]
    fn plain_text_goes_through_the_same_guard() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("names.txt");
        assert_eq!(
            write_guarded(b"a\nb\n", &path, false).expect("write"),
            WriteOutcome::Created
        );
        assert_eq!(fs::read_to_string(&path).expect("read"), "a\nb\n");
        assert!(write_guarded(b"a\n", &path, false).is_err());
        assert_eq!(fs::read_to_string(&path).expect("read"), "a\nb\n");
    }
}
