//! Filesystem mailbox primitives: atomic write, tolerant read, ordered drain,
//! and the `_close` cooperative-exit sentinel.

use std::path::{Path, PathBuf};

use serde::{de::DeserializeOwned, Serialize};
use tokio::fs;
use tracing::debug;
use uuid::Uuid;

/// One drained mailbox entry: its parsed body and the filename it came from.
pub struct DrainedEntry<T> {
    pub obj: T,
    pub filename: String,
}

/// Write `obj` as a `.json` file into `dir`, atomically.
///
/// Ensures `dir` exists, writes to a dotfile `.tmp` sibling, then renames —
/// rename is the publication point, so readers never see a partial write.
pub async fn write<T: Serialize>(
    dir: &Path,
    obj: &T,
    prefix: Option<&str>,
) -> std::io::Result<PathBuf> {
    fs::create_dir_all(dir).await?;

    let millis = chrono::Utc::now().timestamp_millis();
    let suffix = &Uuid::new_v4().simple().to_string()[..8];
    let name = format!("{}{}-{}.json", prefix.unwrap_or(""), millis, suffix);

    let tmp_path = dir.join(format!(".{name}.tmp"));
    let final_path = dir.join(&name);

    let body = serde_json::to_vec_pretty(obj).unwrap_or_default();
    fs::write(&tmp_path, body).await?;
    fs::rename(&tmp_path, &final_path).await?;

    Ok(final_path)
}

/// Read and parse a single mailbox file. Any failure (missing file, bad JSON)
/// yields `None` — callers must tolerate absence.
pub async fn read<T: DeserializeOwned>(path: &Path) -> Option<T> {
    let bytes = fs::read(path).await.ok()?;
    serde_json::from_slice(&bytes).ok()
}

/// Drain `dir`: read every `.json` file not starting with `.`, in ascending
/// filename order (FIFO-by-creation), deleting each as it is consumed.
///
/// A file that fails to parse is skipped and left in place (so it is picked
/// up again on the next drain); a file that parses but fails to delete is
/// still returned (best-effort cleanup). A missing directory drains empty.
pub async fn drain<T: DeserializeOwned>(dir: &Path) -> Vec<DrainedEntry<T>> {
    let mut entries = match fs::read_dir(dir).await {
        Ok(rd) => rd,
        Err(_) => return Vec::new(),
    };

    let mut names = Vec::new();
    while let Ok(Some(entry)) = entries.next_entry().await {
        let name = entry.file_name().to_string_lossy().to_string();
        if name.starts_with('.') || !name.ends_with(".json") {
            continue;
        }
        names.push(name);
    }
    names.sort();

    let mut out = Vec::with_capacity(names.len());
    for name in names {
        let path = dir.join(&name);
        let Some(obj) = read::<T>(&path).await else {
            debug!(file = %name, "skipping unparseable mailbox entry, will retry");
            continue;
        };
        if let Err(e) = fs::remove_file(&path).await {
            debug!(file = %name, error = %e, "failed to delete drained mailbox entry");
        }
        out.push(DrainedEntry { obj, filename: name });
    }
    out
}

/// Move a raw mailbox file into a sibling `errors/` directory for quarantine.
/// Best-effort: failures are logged by the caller, never propagated.
pub async fn quarantine(dir: &Path, filename: &str) -> std::io::Result<()> {
    let errors_dir = dir.join("errors");
    fs::create_dir_all(&errors_dir).await?;
    let src = dir.join(filename);
    let dst = errors_dir.join(filename);
    fs::rename(src, dst).await
}

/// Write the empty `_close` sentinel into `dir`, signaling cooperative exit.
pub async fn write_close(dir: &Path) -> std::io::Result<()> {
    fs::create_dir_all(dir).await?;
    fs::write(dir.join("_close"), b"").await
}

/// Whether `dir` currently contains the `_close` sentinel.
pub async fn has_close(dir: &Path) -> bool {
    fs::metadata(dir.join("_close")).await.is_ok()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;
    use serde_json::json;
    use tempfile::tempdir;

    #[derive(Debug, Serialize, Deserialize, PartialEq)]
    struct Payload {
        text: String,
    }

    #[tokio::test]
    async fn write_then_read_roundtrips() {
        let dir = tempdir().unwrap();
        let path = write(dir.path(), &Payload { text: "hi".into() }, None)
            .await
            .unwrap();
        let back: Payload = read(&path).await.unwrap();
        assert_eq!(back.text, "hi");
    }

    #[tokio::test]
    async fn write_names_are_sortable_and_json_suffixed() {
        let dir = tempdir().unwrap();
        let path = write(dir.path(), &json!({"a": 1}), Some("task-"))
            .await
            .unwrap();
        let name = path.file_name().unwrap().to_string_lossy().to_string();
        assert!(name.starts_with("task-"));
        assert!(name.ends_with(".json"));
        assert!(!name.starts_with('.'));
    }

    #[tokio::test]
    async fn drain_is_fifo_by_filename_and_deletes_consumed() {
        let dir = tempdir().unwrap();
        for (i, text) in ["first", "second", "third"].iter().enumerate() {
            let name = format!("{:020}-aaaaaaaa.json", i);
            let body = serde_json::to_vec(&Payload {
                text: text.to_string(),
            })
            .unwrap();
            fs::write(dir.path().join(name), body).await.unwrap();
        }

        let drained: Vec<DrainedEntry<Payload>> = drain(dir.path()).await;
        let texts: Vec<&str> = drained.iter().map(|e| e.obj.text.as_str()).collect();
        assert_eq!(texts, vec!["first", "second", "third"]);

        let remaining = fs::read_dir(dir.path()).await.unwrap();
        // drain consumed and removed all valid entries
        drop(remaining);
        let drained_again: Vec<DrainedEntry<Payload>> = drain(dir.path()).await;
        assert!(drained_again.is_empty());
    }

    #[tokio::test]
    async fn drain_skips_dotfiles_and_non_json() {
        let dir = tempdir().unwrap();
        fs::write(dir.path().join(".hidden.json"), b"{}").await.unwrap();
        fs::write(dir.path().join("notes.txt"), b"hello").await.unwrap();

        let drained: Vec<DrainedEntry<Payload>> = drain(dir.path()).await;
        assert!(drained.is_empty());
    }

    #[tokio::test]
    async fn drain_skips_unparseable_without_deleting() {
        let dir = tempdir().unwrap();
        let name = "00000000000000000000-aaaaaaaa.json";
        fs::write(dir.path().join(name), b"not json").await.unwrap();

        let drained: Vec<DrainedEntry<Payload>> = drain(dir.path()).await;
        assert!(drained.is_empty());
        assert!(fs::metadata(dir.path().join(name)).await.is_ok());
    }

    #[tokio::test]
    async fn drain_missing_dir_yields_empty() {
        let dir = tempdir().unwrap();
        let missing = dir.path().join("does-not-exist");
        let drained: Vec<DrainedEntry<Payload>> = drain(&missing).await;
        assert!(drained.is_empty());
    }

    #[tokio::test]
    async fn close_sentinel_write_and_detect() {
        let dir = tempdir().unwrap();
        assert!(!has_close(dir.path()).await);
        write_close(dir.path()).await.unwrap();
        assert!(has_close(dir.path()).await);
    }

    #[tokio::test]
    async fn quarantine_moves_file_into_errors_subdir() {
        let dir = tempdir().unwrap();
        let name = "bad.json";
        fs::write(dir.path().join(name), b"{}").await.unwrap();
        quarantine(dir.path(), name).await.unwrap();
        assert!(fs::metadata(dir.path().join("errors").join(name))
            .await
            .is_ok());
        assert!(fs::metadata(dir.path().join(name)).await.is_err());
    }

    #[tokio::test]
    async fn concurrent_write_and_drain_never_observe_partial_json() {
        let dir = tempdir().unwrap();
        let mut writers = Vec::new();
        for i in 0..20 {
            let d = dir.path().to_path_buf();
            writers.push(tokio::spawn(async move {
                write(&d, &Payload { text: format!("m{i}") }, None)
                    .await
                    .unwrap();
            }));
        }
        for w in writers {
            w.await.unwrap();
        }
        let drained: Vec<DrainedEntry<Payload>> = drain(dir.path()).await;
        assert_eq!(drained.len(), 20);
    }
}
