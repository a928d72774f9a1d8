//! ---
//! flx_section: "03-persistence-logging"
//! flx_subsection: "module"
//! flx_type: "source"
//! flx_scope: "code"
//! flx_description: "Persistence abstractions and storage bindings."
//! flx_version: "v0.1.0"
//! flx_owner: "line-controls"
//! ---
use std::fs::{self, File};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use flexo_msg::{Order, ProductionRecord};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use tracing::debug;

use crate::{PersistenceError, Result};

/// Current envelope version.
pub const STORE_VERSION: u16 = 1;
/// File holding the order queue.
pub const ORDERS_FILE: &str = "orders.json";
/// File holding the production history.
pub const HISTORY_FILE: &str = "production_history.json";

#[derive(Debug, Serialize, Deserialize)]
struct Envelope<T> {
    version: u16,
    saved_at: DateTime<Utc>,
    hash: String,
    data: T,
}

/// Directory-backed store for the queue and the production history.
#[derive(Debug, Clone)]
pub struct StateStore {
    root: PathBuf,
    history_cap: usize,
}

impl StateStore {
    /// Open (creating if needed) a store rooted at `root`.
    pub fn open(root: impl Into<PathBuf>, history_cap: usize) -> Result<Self> {
        let root = root.into();
        fs::create_dir_all(&root)?;
        Ok(Self {
            root,
            history_cap: history_cap.max(1),
        })
    }

    /// Directory the store writes into.
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Stored orders, empty when nothing was saved yet.
    pub fn load_orders(&self) -> Result<Vec<Order>> {
        self.load_or_default(ORDERS_FILE)
    }

    /// Replace the stored order list.
    pub fn save_orders(&self, orders: &[Order]) -> Result<()> {
        self.save(ORDERS_FILE, &orders)
    }

    /// Stored production records, newest first.
    pub fn load_history(&self) -> Result<Vec<ProductionRecord>> {
        self.load_or_default(HISTORY_FILE)
    }

    /// Put `record` at the head of the history, trimming to the cap.
    ///
    /// Returns the resulting history length.
    pub fn record_production(&self, record: ProductionRecord) -> Result<usize> {
        let mut history = self.load_history()?;
        history.insert(0, record);
        history.truncate(self.history_cap);
        self.save(HISTORY_FILE, &history)?;
        Ok(history.len())
    }

    fn load_or_default<T: DeserializeOwned + Serialize + Default>(&self, name: &str) -> Result<T> {
        let path = self.root.join(name);
        if !path.exists() {
            return Ok(T::default());
        }
        let bytes = fs::read(&path)?;
        let envelope: Envelope<T> = serde_json::from_slice(&bytes)?;
        if envelope.hash != compute_hash(&envelope.data)? {
            return Err(PersistenceError::HashMismatch(path.display().to_string()));
        }
        Ok(envelope.data)
    }

    fn save<T: Serialize>(&self, name: &str, data: &T) -> Result<()> {
        let envelope = Envelope {
            version: STORE_VERSION,
            saved_at: Utc::now(),
            hash: compute_hash(data)?,
            data,
        };
        let path = self.root.join(name);
        let tmp = self.root.join(format!("{name}.tmp"));
        {
            let mut writer = BufWriter::new(File::create(&tmp)?);
            serde_json::to_writer_pretty(&mut writer, &envelope)?;
            writer.flush()?;
        }
        fs::rename(&tmp, &path)?;
        debug!(path = %path.display(), "state document saved");
        Ok(())
    }
}

fn compute_hash<T: Serialize + ?Sized>(data: &T) -> Result<String> {
    let serialized = serde_json::to_vec(data)?;
    Ok(hex::encode(Sha256::digest(serialized)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn missing_files_load_empty() {
        let dir = tempdir().unwrap();
        let store = StateStore::open(dir.path(), 10).unwrap();
        assert!(store.load_orders().unwrap().is_empty());
        assert!(store.load_history().unwrap().is_empty());
    }

    #[test]
    fn orders_round_trip() {
        let dir = tempdir().unwrap();
        let store = StateStore::open(dir.path().join("state"), 10).unwrap();
        let orders = vec![Order::new("SO-1", "BX-1", 100), Order::new("SO-2", "BX-2", 200)];
        store.save_orders(&orders).unwrap();
        assert_eq!(store.load_orders().unwrap(), orders);
        assert!(!dir.path().join("state").join("orders.json.tmp").exists());
    }

    #[test]
    fn tampered_document_is_rejected() {
        let dir = tempdir().unwrap();
        let store = StateStore::open(dir.path(), 10).unwrap();
        store.save_orders(&[Order::new("SO-1", "BX-1", 100)]).unwrap();

        let path = dir.path().join(ORDERS_FILE);
        let mut envelope: serde_json::Value =
            serde_json::from_reader(File::open(&path).unwrap()).unwrap();
        envelope["data"][0]["targetQty"] = serde_json::json!(999);
        fs::write(&path, serde_json::to_vec_pretty(&envelope).unwrap()).unwrap();

        assert!(matches!(
            store.load_orders(),
            Err(PersistenceError::HashMismatch(_))
        ));
    }
}
