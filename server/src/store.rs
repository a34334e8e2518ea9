//! Append-only JSON-lines record file

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use chrono::{DateTime, SecondsFormat, Utc};
use serde::Serialize;
use solarstation_shared::{DataBody, ReceivedEnvelope};
use tokio::fs::{File, OpenOptions};
use tokio::io::AsyncWriteExt;
use tokio::sync::Mutex;

/// One accepted envelope as stored on disk
#[derive(Debug, Serialize)]
pub struct StoredRecord {
    pub received_at: String,
    pub pend: bool,
    pub data: DataBody,
}

impl StoredRecord {
    pub fn new(envelope: &ReceivedEnvelope, received_at: DateTime<Utc>) -> Self {
        Self {
            received_at: received_at.to_rfc3339_opts(SecondsFormat::Millis, true),
            pend: envelope.pending,
            data: envelope.data,
        }
    }
}

/// Shared by every session; appends are serialized
pub struct RecordStore {
    path: PathBuf,
    file: Mutex<File>,
}

impl RecordStore {
    pub async fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .await
            .with_context(|| format!("opening {}", path.display()))?;
        Ok(Self {
            path,
            file: Mutex::new(file),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub async fn append(&self, record: &StoredRecord) -> Result<()> {
        let mut line = serde_json::to_vec(record)?;
        line.push(b'\n');

        let mut file = self.file.lock().await;
        file.write_all(&line).await?;
        file.flush().await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use solarstation_shared::{codec, Authenticator, Snapshot};

    #[tokio::test]
    async fn test_append_writes_json_lines() {
        let dir = tempfile::tempdir().unwrap();
        let store = RecordStore::open(dir.path().join("data.txt")).await.unwrap();

        let auth = Authenticator::new("k").unwrap();
        let snapshot = Snapshot {
            temperature: 20.5,
            ..Snapshot::faulted()
        };
        let line = codec::encode(&snapshot, false, &auth).unwrap();
        let envelope = codec::decode(&line).unwrap();
        let at = Utc.with_ymd_and_hms(2024, 6, 1, 12, 0, 0).unwrap();

        store.append(&StoredRecord::new(&envelope, at)).await.unwrap();
        store.append(&StoredRecord::new(&envelope, at)).await.unwrap();

        let contents = tokio::fs::read_to_string(store.path()).await.unwrap();
        let lines: Vec<&str> = contents.lines().collect();
        assert_eq!(lines.len(), 2);

        let value: serde_json::Value = serde_json::from_str(lines[0]).unwrap();
        assert_eq!(value["received_at"], "2024-06-01T12:00:00.000Z");
        assert_eq!(value["pend"], false);
        assert_eq!(value["data"]["tp"], 20.5);
        assert_eq!(value["data"]["lux1"], -1.0);
    }

    #[tokio::test]
    async fn test_open_appends_to_existing_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("data.txt");
        tokio::fs::write(&path, "existing\n").await.unwrap();

        let store = RecordStore::open(&path).await.unwrap();
        let envelope = codec::decode(
            &codec::encode(&Snapshot::faulted(), true, &Authenticator::new("k").unwrap()).unwrap(),
        )
        .unwrap();
        store.append(&StoredRecord::new(&envelope, Utc::now())).await.unwrap();

        let contents = tokio::fs::read_to_string(&path).await.unwrap();
        assert!(contents.starts_with("existing\n"));
        assert_eq!(contents.lines().count(), 2);
    }
}
