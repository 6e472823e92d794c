//! Saving transcript exports to disk
//!
//! Exports land in the user's Documents folder under
//! `LiveSubs/transcripts`, one file per export with a timestamped name.

use crate::transcript::TranscriptLog;
use chrono::Local;
use std::fs;
use std::io::Write;
use std::path::PathBuf;
use tracing::info;

/// Export file formats.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExportFormat {
    Text,
    Srt,
}

impl ExportFormat {
    fn extension(self) -> &'static str {
        match self {
            ExportFormat::Text => "txt",
            ExportFormat::Srt => "srt",
        }
    }
}

/// The transcripts directory, when a Documents folder exists.
pub fn transcripts_dir() -> Option<PathBuf> {
    dirs::document_dir().map(|d| d.join("LiveSubs").join("transcripts"))
}

fn ensure_transcripts_dir() -> Result<PathBuf, StorageError> {
    let dir = transcripts_dir().ok_or(StorageError::NoDocumentsDir)?;
    if !dir.exists() {
        fs::create_dir_all(&dir).map_err(|e| StorageError::CreateDirectory {
            path: dir.clone(),
            source: e,
        })?;
        info!("Created transcripts directory: {:?}", dir);
    }
    Ok(dir)
}

/// Export the transcript in the given format and save it.
///
/// Returns the path to the saved file.
pub fn save_transcript(log: &TranscriptLog, format: ExportFormat) -> Result<PathBuf, StorageError> {
    let content = match format {
        ExportFormat::Text => log.export_as_text(),
        ExportFormat::Srt => log.export_as_srt(),
    };
    if content.trim().is_empty() {
        return Err(StorageError::EmptyTranscript);
    }

    let dir = ensure_transcripts_dir()?;
    let timestamp = Local::now().format("%Y-%m-%d-%H-%M-%S");
    let filename = format!("transcript-{}.{}", timestamp, format.extension());
    let filepath = dir.join(&filename);

    let mut file = fs::File::create(&filepath).map_err(|e| StorageError::CreateFile {
        path: filepath.clone(),
        source: e,
    })?;
    file.write_all(content.as_bytes())
        .map_err(|e| StorageError::WriteFile {
            path: filepath.clone(),
            source: e,
        })?;
    file.flush().map_err(|e| StorageError::WriteFile {
        path: filepath.clone(),
        source: e,
    })?;

    info!("Saved transcript to: {:?}", filepath);
    Ok(filepath)
}

/// Storage errors with contextual information
#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    #[error("Could not find Documents directory")]
    NoDocumentsDir,

    #[error("Transcript is empty")]
    EmptyTranscript,

    #[error("Failed to create directory {path}: {source}")]
    CreateDirectory {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to create file {path}: {source}")]
    CreateFile {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to write to file {path}: {source}")]
    WriteFile {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn export_formats_map_to_extensions() {
        assert_eq!(ExportFormat::Text.extension(), "txt");
        assert_eq!(ExportFormat::Srt.extension(), "srt");
    }

    #[test]
    fn empty_transcript_is_rejected_before_touching_disk() {
        let log = TranscriptLog::new();
        assert!(matches!(
            save_transcript(&log, ExportFormat::Text),
            Err(StorageError::EmptyTranscript)
        ));
    }
}
