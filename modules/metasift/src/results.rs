//! Per-paper result files and the index that lists them.
//!
//! Records live at `<data_dir>/results/<paper id>.json`; the index at
//! `<data_dir>/results_index.json` maps each paper id to its record path
//! relative to the data directory. The merge stage reads only these files.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use tracing::{debug, info};

use metasift_common::{MetaSiftError, PaperRecord};

pub const RESULTS_DIR: &str = "results";
pub const INDEX_FILE: &str = "results_index.json";

/// File stem for a paper id. Anything outside `[A-Za-z0-9_-]` (and a leading
/// `.`) is percent-encoded byte by byte, so distinct ids never share a file.
pub fn sanitize_id(id: &str) -> String {
    let mut out = String::with_capacity(id.len());
    for (i, byte) in id.bytes().enumerate() {
        let keep = byte.is_ascii_alphanumeric() || byte == b'_' || byte == b'-' || (byte == b'.' && i > 0);
        if keep {
            out.push(byte as char);
        } else {
            out.push_str(&format!("%{byte:02X}"));
        }
    }
    if out.is_empty() {
        out.push_str("%");
    }
    out
}

pub struct ResultStore {
    data_dir: PathBuf,
}

impl ResultStore {
    pub fn new(data_dir: impl Into<PathBuf>) -> Self {
        Self {
            data_dir: data_dir.into(),
        }
    }

    pub fn results_dir(&self) -> PathBuf {
        self.data_dir.join(RESULTS_DIR)
    }

    pub fn index_path(&self) -> PathBuf {
        self.data_dir.join(INDEX_FILE)
    }

    /// Record path relative to the data directory.
    fn relative_record_path(id: &str) -> PathBuf {
        Path::new(RESULTS_DIR).join(format!("{}.json", sanitize_id(id)))
    }

    pub fn write_record(&self, id: &str, record: &PaperRecord) -> Result<PathBuf, MetaSiftError> {
        std::fs::create_dir_all(self.results_dir())?;
        let relative = Self::relative_record_path(id);
        let path = self.data_dir.join(&relative);
        std::fs::write(&path, serde_json::to_string_pretty(record)?)?;
        debug!(paper = id, path = %path.display(), "Record written");
        Ok(relative)
    }

    pub fn write_index(&self, ids: impl IntoIterator<Item = String>) -> Result<PathBuf, MetaSiftError> {
        let index: BTreeMap<String, String> = ids
            .into_iter()
            .map(|id| {
                let path = Self::relative_record_path(&id).to_string_lossy().into_owned();
                (id, path)
            })
            .collect();
        std::fs::create_dir_all(&self.data_dir)?;
        let path = self.index_path();
        std::fs::write(&path, serde_json::to_string_pretty(&index)?)?;
        info!(papers = index.len(), path = %path.display(), "Results index written");
        Ok(path)
    }

    /// Load every indexed record in paper-id order.
    pub fn load_all(&self) -> Result<Vec<(String, PaperRecord)>, MetaSiftError> {
        let index_path = self.index_path();
        if !index_path.exists() {
            return Err(MetaSiftError::MissingArtifact(format!(
                "results index {}",
                index_path.display()
            )));
        }
        let index: BTreeMap<String, PathBuf> =
            serde_json::from_str(&std::fs::read_to_string(&index_path)?)?;

        index
            .into_iter()
            .map(|(id, relative)| {
                let path = self.data_dir.join(&relative);
                let body = std::fs::read_to_string(&path).map_err(|e| {
                    MetaSiftError::MissingArtifact(format!("record for {id} at {}: {e}", path.display()))
                })?;
                Ok((id, serde_json::from_str(&body)?))
            })
            .collect()
    }
}
