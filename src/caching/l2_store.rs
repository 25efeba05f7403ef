use crate::caching::error::CacheError;
use crate::model::Payload;
use chrono::Utc;
use log::debug;
use redb::{Database, ReadableDatabase, ReadableTable, TableDefinition, TypeName, Value};
use serde::{Deserialize, Serialize};
use std::any::type_name;
use std::collections::BTreeSet;
use std::sync::Arc;

const TABLE: TableDefinition<&str, CacheEntryRow> = TableDefinition::new("cache_entries");

/// One persisted cache row. Keys in the table are `"{namespace}:{key}"`;
/// namespaces never contain `:`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheEntryRow {
    pub value: Payload,
    pub expires_at: i64,
    pub created_at: i64,
}

impl CacheEntryRow {
    fn as_bytes(&self) -> Vec<u8> {
        serde_json::to_vec(self).unwrap()
    }

    fn from_bytes(bytes: &[u8]) -> Result<Self, &'static str> {
        serde_json::from_slice(bytes).map_err(|_| "failed to decode json")
    }

    fn struct_name() -> String {
        type_name::<CacheEntryRow>()
            .split("::")
            .last()
            .unwrap()
            .to_string()
    }
}

impl Value for CacheEntryRow {
    type SelfType<'a> = CacheEntryRow;
    type AsBytes<'a> = Vec<u8>;

    fn fixed_width() -> Option<usize> {
        None
    }

    fn from_bytes<'a>(data: &'a [u8]) -> Self::SelfType<'a>
    where
        Self: 'a,
    {
        Self::from_bytes(data).unwrap()
    }

    fn as_bytes<'a, 'b: 'a>(value: &'a Self::SelfType<'b>) -> Self::AsBytes<'a>
    where
        Self: 'b,
    {
        value.as_bytes()
    }

    fn type_name() -> TypeName {
        TypeName::new(CacheEntryRow::struct_name().as_str())
    }
}

fn composite_key(namespace: &str, key: &str) -> String {
    format!("{namespace}:{key}")
}

/// Range bounds covering every key in a namespace. `;` is the successor of
/// `:` in ASCII, so `["ns:", "ns;")` is exactly the namespace's key space.
fn namespace_bounds(namespace: &str) -> (String, String) {
    (format!("{namespace}:"), format!("{namespace};"))
}

/// Persistent cache tier backed by the shared redb database.
pub struct L2Store {
    db: Arc<Database>,
}

impl L2Store {
    pub fn new(db: Arc<Database>) -> Result<Self, CacheError> {
        let write_txn = db.begin_write()?;
        {
            write_txn.open_table(TABLE)?;
        }
        write_txn.commit()?;
        Ok(L2Store { db })
    }

    pub fn get(&self, namespace: &str, key: &str) -> Result<Option<CacheEntryRow>, CacheError> {
        let read_txn = self.db.begin_read()?;
        let table = read_txn.open_table(TABLE)?;
        let row = table
            .get(composite_key(namespace, key).as_str())?
            .map(|guard| guard.value());

        match row {
            Some(row) if row.expires_at > Utc::now().timestamp() => Ok(Some(row)),
            Some(_) => {
                // Lazy eviction: the sweeper removes the body later.
                Ok(None)
            }
            None => Ok(None),
        }
    }

    pub fn set(
        &self,
        namespace: &str,
        key: &str,
        value: Payload,
        expires_at: i64,
    ) -> Result<(), CacheError> {
        let row = CacheEntryRow {
            value,
            expires_at,
            created_at: Utc::now().timestamp(),
        };
        let write_txn = self.db.begin_write()?;
        {
            let mut table = write_txn.open_table(TABLE)?;
            table.insert(composite_key(namespace, key).as_str(), row)?;
        }
        write_txn.commit()?;
        Ok(())
    }

    pub fn delete(&self, namespace: &str, key: &str) -> Result<bool, CacheError> {
        let write_txn = self.db.begin_write()?;
        let removed = {
            let mut table = write_txn.open_table(TABLE)?;
            table
                .remove(composite_key(namespace, key).as_str())?
                .is_some()
        };
        write_txn.commit()?;
        Ok(removed)
    }

    /// Removes every row in `namespace`, returning how many were dropped.
    pub fn invalidate(&self, namespace: &str) -> Result<usize, CacheError> {
        let (low, high) = namespace_bounds(namespace);
        let write_txn = self.db.begin_write()?;
        let mut dropped = 0;
        {
            let mut table = write_txn.open_table(TABLE)?;
            table.retain(|key, _| {
                let doomed = key >= low.as_str() && key < high.as_str();
                if doomed {
                    dropped += 1;
                }
                !doomed
            })?;
        }
        write_txn.commit()?;
        debug!("Invalidated {dropped} cache entries in namespace {namespace}");
        Ok(dropped)
    }

    /// The set of namespaces currently present, derived from live rows.
    pub fn list_namespaces(&self) -> Result<BTreeSet<String>, CacheError> {
        let read_txn = self.db.begin_read()?;
        let table = read_txn.open_table(TABLE)?;
        let mut namespaces = BTreeSet::new();
        for entry in table.iter()? {
            let (key, _) = entry?;
            if let Some((namespace, _)) = key.value().split_once(':') {
                namespaces.insert(namespace.to_string());
            }
        }
        Ok(namespaces)
    }

    /// Entry count and approximate byte size, optionally per namespace.
    pub fn measure(&self, namespace: Option<&str>) -> Result<(u64, u64), CacheError> {
        let read_txn = self.db.begin_read()?;
        let table = read_txn.open_table(TABLE)?;
        let mut entries = 0u64;
        let mut bytes = 0u64;
        for entry in table.iter()? {
            let (key, value) = entry?;
            let in_scope = match namespace {
                Some(ns) => key.value().split_once(':').map(|(k, _)| k) == Some(ns),
                None => true,
            };
            if in_scope {
                entries += 1;
                bytes += value.value().as_bytes().len() as u64;
            }
        }
        Ok((entries, bytes))
    }

    /// Drops rows whose expiry has passed. Called by the background sweeper.
    pub fn purge_expired(&self) -> Result<usize, CacheError> {
        let now = Utc::now().timestamp();
        let write_txn = self.db.begin_write()?;
        let mut purged = 0;
        {
            let mut table = write_txn.open_table(TABLE)?;
            table.retain(|_, row| {
                let expired = row.expires_at <= now;
                if expired {
                    purged += 1;
                }
                !expired
            })?;
        }
        write_txn.commit()?;
        if purged > 0 {
            debug!("Sweeper purged {purged} expired cache entries");
        }
        Ok(purged)
    }
}
