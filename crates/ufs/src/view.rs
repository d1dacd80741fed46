//! View validation.

use ufs_types::{BASE, Id, VIEW_MAX_SIZE};

use crate::store::Store;
use crate::{Error, Result};

/// A validated view: an ordered sequence of areas, possibly including
/// BASE, with no duplicates.
pub(crate) struct View(Vec<Id>);

impl View {
    /// Parses `raw` up to the first negative entry (the terminator) or the
    /// end of the slice. Every entry must be BASE or a live area, and no
    /// entry may repeat.
    pub fn parse(store: &Store, raw: &[Id]) -> Result<View> {
        let entries: Vec<Id> = raw.iter().copied().take_while(|&id| id >= 0).collect();
        if entries.len() > VIEW_MAX_SIZE {
            return Err(Error::BadCall("view is longer than VIEW_MAX_SIZE"));
        }
        for (index, &area) in entries.iter().enumerate() {
            if entries[..index].contains(&area) {
                return Err(Error::ViewContainsDuplicates);
            }
            if area == BASE {
                continue;
            }
            match store.read_area(area) {
                Ok(_) => {}
                Err(Error::DoesNotExist) => return Err(Error::InvalidAreaInView(area)),
                Err(other) => return Err(other),
            }
        }
        Ok(View(entries))
    }

    pub fn entries(&self) -> &[Id] {
        &self.0
    }
}
