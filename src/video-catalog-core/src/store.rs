use crate::error::Result;
use crate::types::{CatalogEntry, EntryFields, EntryPatch};

/// Persistence seam for catalog records.
///
/// Every write targets a single record by its unique path or id, so callers
/// may interleave writes from a reconciliation pass and a watch event.
pub trait CatalogStore: Send + Sync {
    fn list_all(&self) -> Result<Vec<CatalogEntry>>;

    fn find_by_path(&self, path: &str) -> Result<Option<CatalogEntry>>;

    fn find_by_id(&self, id: i64) -> Result<Option<CatalogEntry>>;

    /// Insert or replace the extracted fields for `path`, returning its id.
    /// The stored fingerprint is dropped when size or modified time changed.
    fn upsert(&self, path: &str, fields: &EntryFields) -> Result<i64>;

    fn delete_by_path(&self, path: &str) -> Result<bool>;

    fn delete_by_id(&self, id: i64) -> Result<bool>;

    fn update_fields(&self, id: i64, patch: &EntryPatch) -> Result<bool>;

    /// Remove every record whose path lies under `dir`; returns the count.
    fn delete_under(&self, dir: &str) -> Result<usize>;
}
