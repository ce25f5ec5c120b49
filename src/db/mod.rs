use anyhow::{Context, Result};
use rocksdb::{
    Direction, IteratorMode, Options, Transaction, TransactionDB, TransactionDBOptions,
};
use serde::{de::DeserializeOwned, Serialize};

use std::{path::Path, str};

pub mod captures;
pub mod devices;
pub mod migrations;
pub mod payloads;
pub mod users;

pub use devices::{AdoptOutcome, InsertOutcome};

pub struct DBLayer {
    db: TransactionDB,
}

impl DBLayer {
    /// Open (or create) the database and bring its layout up to date.
    pub fn new(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let mut opts = Options::default();
        opts.create_if_missing(true);
        let txn_opts = TransactionDBOptions::default();
        let db = TransactionDB::open(&opts, &txn_opts, path)
            .with_context(|| format!("Failed to open rocksdb at {}", path.display()))?;

        let layer = Self { db };
        layer.migrate()?;
        Ok(layer)
    }

    fn txn(&self) -> Transaction<'_, TransactionDB> {
        self.db.transaction()
    }

    fn get_json<T: DeserializeOwned>(&self, key: &str) -> Result<Option<T>> {
        self.db
            .get(key)?
            .map(|v| serde_json::from_slice(&v))
            .transpose()
            .with_context(|| format!("Corrupt record at {key}"))
    }

    fn get_string(&self, key: &str) -> Result<Option<String>> {
        self.db
            .get(key)?
            .map(String::from_utf8)
            .transpose()
            .with_context(|| format!("Corrupt index entry at {key}"))
    }

    /// Collect every `(key, value)` under `prefix`, in key order.
    fn scan_prefix(&self, prefix: &str) -> Result<Vec<(String, Vec<u8>)>> {
        let mut out = Vec::new();

        for item in self
            .db
            .iterator(IteratorMode::From(prefix.as_bytes(), Direction::Forward))
        {
            let (key, val) = item?;
            let k = str::from_utf8(&key)?;
            if !k.starts_with(prefix) {
                break;
            }
            out.push((k.to_string(), val.to_vec()));
        }

        Ok(out)
    }

    /// Last `limit` records under `prefix`, newest key first. Seeks past the
    /// prefix and walks backwards, so cost is bounded by `limit`.
    fn scan_prefix_rev_json<T: DeserializeOwned>(&self, prefix: &str, limit: usize) -> Result<Vec<T>> {
        let mut out = Vec::with_capacity(limit);
        if limit == 0 {
            return Ok(out);
        }
        let end = prefix_end(prefix);

        for item in self
            .db
            .iterator(IteratorMode::From(end.as_slice(), Direction::Reverse))
        {
            let (key, val) = item?;
            let k = str::from_utf8(&key)?;
            if !k.starts_with(prefix) {
                if k.as_bytes() < prefix.as_bytes() {
                    break;
                }
                // Keys at or after `end` sort above the prefix range.
                continue;
            }
            out.push(serde_json::from_slice(&val).with_context(|| format!("Corrupt record at {k}"))?);
            if out.len() == limit {
                break;
            }
        }

        Ok(out)
    }

    fn scan_prefix_json<T: DeserializeOwned>(&self, prefix: &str) -> Result<Vec<T>> {
        self.scan_prefix(prefix)?
            .into_iter()
            .map(|(key, val)| {
                serde_json::from_slice(&val).with_context(|| format!("Corrupt record at {key}"))
            })
            .collect()
    }
}

/// Smallest key that sorts after every key starting with `prefix`.
fn prefix_end(prefix: &str) -> Vec<u8> {
    let mut end = prefix.as_bytes().to_vec();
    while let Some(last) = end.pop() {
        if last < u8::MAX {
            end.push(last + 1);
            return end;
        }
    }
    // All 0xff: no upper bound, start from the very end.
    vec![u8::MAX; prefix.len() + 1]
}

fn txn_get_json<T: DeserializeOwned>(
    txn: &Transaction<'_, TransactionDB>,
    key: &str,
) -> Result<Option<T>> {
    txn.get_for_update(key, true)?
        .map(|v| serde_json::from_slice(&v))
        .transpose()
        .with_context(|| format!("Corrupt record at {key}"))
}

fn txn_put_json<T: Serialize>(
    txn: &Transaction<'_, TransactionDB>,
    key: &str,
    value: &T,
) -> Result<()> {
    txn.put(key, serde_json::to_vec(value)?)?;
    Ok(())
}

#[cfg(test)]
pub(crate) fn open_temp() -> (tempfile::TempDir, DBLayer) {
    let dir = tempfile::tempdir().expect("tempdir");
    let db = DBLayer::new(dir.path().join("db")).expect("open db");
    (dir, db)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn prefix_end_bumps_last_byte() {
        assert_eq!(prefix_end("capture:dev_a:"), b"capture:dev_a;".to_vec());
    }

    #[test]
    fn reverse_scan_stays_inside_prefix() {
        let (_dir, db) = open_temp();
        for (key, n) in [("p:a:1", 1), ("p:a:2", 2), ("p:a:3", 3), ("p:b:9", 9), ("p:9", 0)] {
            db.db.put(key, serde_json::to_vec(&n).unwrap()).unwrap();
        }

        let got: Vec<i32> = db.scan_prefix_rev_json("p:a:", 2).unwrap();
        assert_eq!(got, vec![3, 2]);

        let all: Vec<i32> = db.scan_prefix_rev_json("p:a:", 10).unwrap();
        assert_eq!(all, vec![3, 2, 1]);

        let none: Vec<i32> = db.scan_prefix_rev_json("p:c:", 10).unwrap();
        assert!(none.is_empty());
    }
}
