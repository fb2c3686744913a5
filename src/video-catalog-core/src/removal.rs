use std::fs;
use std::path::Path;

use crate::error::{CatalogError, Result};

/// Removes media files from disk, either to the system trash or permanently.
pub trait Trasher: Send + Sync {
    fn trash_or_delete(&self, path: &Path, move_to_trash: bool) -> Result<()>;
}

/// Platform trash via the `trash` crate, permanent deletion via `std::fs`.
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemTrasher;

impl Trasher for SystemTrasher {
    fn trash_or_delete(&self, path: &Path, move_to_trash: bool) -> Result<()> {
        if move_to_trash {
            trash::delete(path).map_err(|e| {
                CatalogError::Trash(format!("cannot move {} to trash: {}", path.display(), e))
            })
        } else {
            fs::remove_file(path).map_err(CatalogError::from)
        }
    }
}
