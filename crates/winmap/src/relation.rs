use std::{collections::HashMap, path::PathBuf};

use crate::region::RegionId;

/// The FileInfo → [Region] half of the manager's relation index (§3, "Relation").
///
/// The complementary Region → cursor cardinality (`region.client_count() ==
/// |cursors pinning it|`) is enforced structurally by `Region::pin`/`unpin` instead of
/// a second parallel index here: a cursor pins exactly one region for exactly as long
/// as it holds it, so there is nothing a duplicate cursor-side index would catch that
/// the count itself doesn't already guarantee (see `DESIGN.md`).
///
/// Owned by `TilingManager`'s core; `GreedyManager` skips this entirely since its
/// one-region-per-file policy makes a single `HashMap<PathBuf, Region>` sufficient.
#[derive(Debug, Default)]
pub(crate) struct Relation {
    file_to_regions: HashMap<PathBuf, Vec<RegionId>>,
}

impl Relation {
    pub fn attach_region(&mut self, path: PathBuf, id: RegionId) {
        self.file_to_regions.entry(path).or_default().push(id);
    }

    pub fn detach_region(&mut self, path: &PathBuf, id: RegionId) {
        if let Some(ids) = self.file_to_regions.get_mut(path) {
            ids.retain(|&existing| existing != id);
            if ids.is_empty() {
                self.file_to_regions.remove(path);
            }
        }
    }

    pub fn regions_for(&self, path: &PathBuf) -> &[RegionId] {
        self.file_to_regions
            .get(path)
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }

    pub fn all_region_ids(&self) -> impl Iterator<Item = RegionId> + '_ {
        self.file_to_regions.values().flatten().copied()
    }

    pub fn clear(&mut self) {
        self.file_to_regions.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn attach_and_detach_round_trip() {
        let mut rel = Relation::default();
        let path = PathBuf::from("/tmp/f");
        rel.attach_region(path.clone(), 1);
        rel.attach_region(path.clone(), 2);
        assert_eq!(rel.regions_for(&path), &[1, 2]);

        rel.detach_region(&path, 1);
        assert_eq!(rel.regions_for(&path), &[2]);

        rel.detach_region(&path, 2);
        assert!(rel.regions_for(&path).is_empty());
    }

    #[test]
    fn all_region_ids_spans_every_file() {
        let mut rel = Relation::default();
        rel.attach_region(PathBuf::from("/a"), 1);
        rel.attach_region(PathBuf::from("/b"), 2);
        let mut ids: Vec<_> = rel.all_region_ids().collect();
        ids.sort_unstable();
        assert_eq!(ids, vec![1, 2]);
    }
}
