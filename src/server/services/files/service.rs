use std::path::PathBuf;

use tokio::io::AsyncWriteExt;
use tracing::{debug, info};

use super::FileStoreError;
use crate::server::models::{Cell, Table, TablePage};

/// Per-user namespaced store for uploaded tabular files.
///
/// Every operation re-derives the owner's directory from the authenticated
/// username; anything that would step outside it is a `PathViolation`.
pub struct FileStore {
    root: PathBuf,
    max_bytes: usize,
}

impl FileStore {
    pub fn new(root: PathBuf, max_bytes: usize) -> anyhow::Result<FileStore> {
        std::fs::create_dir_all(&root)
            .map_err(|e| anyhow::anyhow!("cannot create files root {}: {e}", root.display()))?;
        Ok(FileStore { root, max_bytes })
    }

    pub fn max_bytes(&self) -> usize {
        self.max_bytes
    }

    fn user_dir(&self, owner: &str) -> Result<PathBuf, FileStoreError> {
        check_component(owner)?;
        Ok(self.root.join(owner))
    }

    fn file_path(&self, owner: &str, filename: &str) -> Result<PathBuf, FileStoreError> {
        check_component(filename)?;
        Ok(self.user_dir(owner)?.join(filename))
    }

    /// Opens a transactional upload: bytes stream into a sibling temp file
    /// and only land in the listing on [`UploadSink::finish`]. Dropping the
    /// sink (client disconnect) removes the temp file.
    pub async fn create_upload(
        &self,
        owner: &str,
        filename: &str,
    ) -> Result<UploadSink, FileStoreError> {
        let final_path = self.file_path(owner, filename)?;
        let dir = self.user_dir(owner)?;
        tokio::fs::create_dir_all(&dir).await?;

        let tmp_path = dir.join(format!(".tmp-{}", uuid::Uuid::new_v4()));
        let file = tokio::fs::File::create(&tmp_path).await?;
        Ok(UploadSink {
            file: Some(file),
            tmp_path,
            final_path,
            written: 0,
            max_bytes: self.max_bytes,
            finished: false,
        })
    }

    /// Filenames in the owner's directory, lexicographically sorted.
    /// In-flight upload temp files are not listed.
    pub async fn list(&self, owner: &str) -> Result<Vec<String>, FileStoreError> {
        let dir = self.user_dir(owner)?;
        let mut names = Vec::new();
        let mut entries = match tokio::fs::read_dir(&dir).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(names),
            Err(e) => return Err(e.into()),
        };
        while let Some(entry) = entries.next_entry().await? {
            if !entry.file_type().await?.is_file() {
                continue;
            }
            let name = entry.file_name().to_string_lossy().to_string();
            if name.starts_with(".tmp-") {
                continue;
            }
            names.push(name);
        }
        names.sort();
        Ok(names)
    }

    pub async fn delete(&self, owner: &str, filename: &str) -> Result<(), FileStoreError> {
        let path = self.file_path(owner, filename)?;
        match tokio::fs::remove_file(&path).await {
            Ok(()) => {
                info!(owner, filename, "deleted user file");
                Ok(())
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                Err(FileStoreError::NotFound(filename.to_string()))
            }
            Err(e) => Err(e.into()),
        }
    }

    /// Parses the file as a comma-separated table with a header row and
    /// returns one page. Cells stay strings; the header alone does not tell
    /// us their types.
    pub async fn browse(
        &self,
        owner: &str,
        filename: &str,
        page: usize,
        page_size: usize,
    ) -> Result<TablePage, FileStoreError> {
        let path = self.file_path(owner, filename)?;
        let bytes = match tokio::fs::read(&path).await {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(FileStoreError::NotFound(filename.to_string()))
            }
            Err(e) => return Err(e.into()),
        };

        let table = parse_csv(&bytes)?;
        debug!(owner, filename, records = table.record_count(), "browsed user file");
        Ok(table.paginate(page, page_size))
    }
}

/// Rejects path components that could escape the per-user root: empty
/// names, separators, parent references, hidden temp prefixes, oversized
/// names.
fn check_component(name: &str) -> Result<(), FileStoreError> {
    if name.is_empty()
        || name.len() > 255
        || name.contains('/')
        || name.contains('\\')
        || name.contains("..")
        || name.contains('\0')
        || name.starts_with(".tmp-")
    {
        return Err(FileStoreError::PathViolation);
    }
    Ok(())
}

fn parse_csv(bytes: &[u8]) -> Result<Table, FileStoreError> {
    let mut reader = csv::ReaderBuilder::new()
        .has_headers(true)
        .flexible(true)
        .from_reader(bytes);

    let headers = reader
        .headers()
        .map_err(|e| FileStoreError::Parse(e.to_string()))?
        .clone();
    if headers.is_empty() || headers.iter().all(|h| h.trim().is_empty()) {
        return Err(FileStoreError::Parse("missing header row".to_string()));
    }

    let columns: Vec<String> = headers.iter().map(str::to_string).collect();
    let mut table = Table::new(columns);
    for record in reader.records() {
        let record = record.map_err(|e| FileStoreError::Parse(e.to_string()))?;
        let row = (0..table.columns.len())
            .map(|i| match record.get(i) {
                Some(value) => Cell::Str(value.to_string()),
                None => Cell::Null,
            })
            .collect();
        table.rows.push(row);
    }
    Ok(table)
}

/// In-progress upload. Enforces the size cap incrementally so an oversized
/// body is rejected before it is fully received.
pub struct UploadSink {
    file: Option<tokio::fs::File>,
    tmp_path: PathBuf,
    final_path: PathBuf,
    written: usize,
    max_bytes: usize,
    finished: bool,
}

impl UploadSink {
    pub async fn write_chunk(&mut self, chunk: &[u8]) -> Result<(), FileStoreError> {
        self.written += chunk.len();
        if self.written > self.max_bytes {
            return Err(FileStoreError::TooLarge);
        }
        let file = self.file.as_mut().ok_or_else(|| {
            FileStoreError::Io(std::io::Error::other("upload already finished"))
        })?;
        file.write_all(chunk).await?;
        Ok(())
    }

    /// Flushes and renames the temp file into place. Until this returns the
    /// upload is invisible to `list`.
    pub async fn finish(mut self) -> Result<(), FileStoreError> {
        if let Some(mut file) = self.file.take() {
            file.flush().await?;
            file.sync_all().await?;
        }
        tokio::fs::rename(&self.tmp_path, &self.final_path).await?;
        self.finished = true;
        Ok(())
    }
}

impl Drop for UploadSink {
    fn drop(&mut self) {
        if !self.finished {
            let _ = std::fs::remove_file(&self.tmp_path);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    const CAP: usize = 10 * 1024 * 1024;

    fn store(dir: &TempDir) -> FileStore {
        FileStore::new(dir.path().to_path_buf(), CAP).unwrap()
    }

    async fn put(store: &FileStore, owner: &str, name: &str, body: &[u8]) {
        let mut sink = store.create_upload(owner, name).await.unwrap();
        sink.write_chunk(body).await.unwrap();
        sink.finish().await.unwrap();
    }

    #[tokio::test]
    async fn upload_then_list_and_browse() {
        let dir = TempDir::new().unwrap();
        let store = store(&dir);
        put(
            &store,
            "alice",
            "mini.csv",
            b"date,price\n2024-01-01,10\n2024-01-02,11\n2024-01-03,12\n",
        )
        .await;

        assert_eq!(store.list("alice").await.unwrap(), vec!["mini.csv"]);

        let page = store.browse("alice", "mini.csv", 1, 2).await.unwrap();
        assert_eq!(page.total_records, 3);
        assert_eq!(page.total_pages, 2);
        assert_eq!(page.data[0]["price"], serde_json::json!("10"));
    }

    #[tokio::test]
    async fn owners_are_isolated() {
        let dir = TempDir::new().unwrap();
        let store = store(&dir);
        put(&store, "alice", "a.csv", b"x\n1\n").await;

        assert!(store.list("bob").await.unwrap().is_empty());
        assert!(matches!(
            store.delete("bob", "a.csv").await,
            Err(FileStoreError::NotFound(_))
        ));
        // Alice's copy is untouched.
        assert_eq!(store.list("alice").await.unwrap(), vec!["a.csv"]);
    }

    #[tokio::test]
    async fn traversal_names_are_rejected() {
        let dir = TempDir::new().unwrap();
        let store = store(&dir);
        for name in ["../bob/secret.csv", "a/b.csv", "..", "", "a\\b"] {
            assert!(matches!(
                store.delete("alice", name).await,
                Err(FileStoreError::PathViolation)
            ));
        }
    }

    #[tokio::test]
    async fn oversized_upload_is_rejected_and_invisible() {
        let dir = TempDir::new().unwrap();
        let store = FileStore::new(dir.path().to_path_buf(), 16).unwrap();

        let mut sink = store.create_upload("alice", "big.csv").await.unwrap();
        let result = sink.write_chunk(&[0u8; 32]).await;
        assert!(matches!(result, Err(FileStoreError::TooLarge)));
        drop(sink);

        assert!(store.list("alice").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn abandoned_upload_leaves_no_partial_file() {
        let dir = TempDir::new().unwrap();
        let store = store(&dir);

        let mut sink = store.create_upload("alice", "gone.csv").await.unwrap();
        sink.write_chunk(b"date,price\n").await.unwrap();
        drop(sink); // client disconnected before finish

        assert!(store.list("alice").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn browse_requires_a_header() {
        let dir = TempDir::new().unwrap();
        let store = store(&dir);
        put(&store, "alice", "empty.csv", b"").await;
        assert!(matches!(
            store.browse("alice", "empty.csv", 1, 10).await,
            Err(FileStoreError::Parse(_))
        ));
    }
}
