use crate::stats::Stats;
use std::collections::BTreeMap;

/// Key of an object fragment: brick id in the upper 32 bits, object id in the lower.
#[inline(always)]
pub fn combine_key(object_id: u32, brick_id: u32) -> u64 {
    ((brick_id as u64) << 32) | object_id as u64
}

/// Inverse of [`combine_key`], returns `(object_id, brick_id)`.
#[inline(always)]
pub fn split_key(key: u64) -> (u32, u32) {
    (key as u32, (key >> 32) as u32)
}

/// Statistics of one object inside one brick.
#[derive(Clone, Debug, PartialEq)]
pub struct ComponentRecord {
    /// Label value in the label plane of the brick.
    pub object_id: u32,
    /// Id assigned when colors were made consistent, 0 until then.
    pub alt_id: u32,
    pub brick_id: u32,
    /// Statistics of the voxels inside this brick only.
    pub local: Stats,
    /// Reported statistics. Equal to `local` unless the object spans several bricks, then pooled
    /// over all of its fragments.
    pub stats: Stats,
    /// Not computed by the analysis, kept for consumers of the table.
    pub distance: f64,
}

impl ComponentRecord {
    pub fn new(object_id: u32, brick_id: u32, stats: Stats) -> Self {
        Self {
            object_id,
            alt_id: 0,
            brick_id,
            local: stats.clone(),
            stats,
            distance: 0.0,
        }
    }

    #[inline(always)]
    pub fn key(&self) -> u64 {
        combine_key(self.object_id, self.brick_id)
    }
}

/// Records of all object fragments, addressed by key.
///
/// Records live in an arena and are referred to by their index everywhere else (see
/// `conectivity::LinkGraph`). A record keeps its index for the lifetime of the table, even when
/// its key changes.
#[derive(Debug)]
pub struct ComponentTable {
    records: Vec<ComponentRecord>,
    keys: BTreeMap<u64, u32>,
    /// Smallest voxel count of a retained record.
    pub min_size: u32,
    /// Largest voxel count of a retained record or of a pooled object.
    pub max_size: u32,
}

impl Default for ComponentTable {
    fn default() -> Self {
        Self {
            records: vec![],
            keys: BTreeMap::new(),
            min_size: u32::MAX,
            max_size: 0,
        }
    }
}

impl ComponentTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn clear(&mut self) {
        *self = Self::default();
    }

    /// Number of keys in the table.
    pub fn len(&self) -> usize {
        self.keys.len()
    }

    pub fn is_empty(&self) -> bool {
        self.keys.is_empty()
    }

    /// Inserts a record and returns its index. A record with the same key is replaced in the
    /// key map but stays in the arena.
    pub fn insert(&mut self, record: ComponentRecord) -> u32 {
        let size = record.stats.count;
        self.min_size = self.min_size.min(size);
        self.max_size = self.max_size.max(size);
        let index = self.records.len() as u32;
        self.keys.insert(record.key(), index);
        self.records.push(record);
        index
    }

    pub fn index_of(&self, key: u64) -> Option<u32> {
        self.keys.get(&key).copied()
    }

    pub fn get(&self, key: u64) -> Option<&ComponentRecord> {
        self.index_of(key).map(|i| &self.records[i as usize])
    }

    #[inline(always)]
    pub fn record(&self, index: u32) -> &ComponentRecord {
        &self.records[index as usize]
    }

    #[inline(always)]
    pub fn record_mut(&mut self, index: u32) -> &mut ComponentRecord {
        &mut self.records[index as usize]
    }

    /// Entries in key order. After an id rewrite and before [`ComponentTable::remove_stale`] an
    /// entry's key can differ from its record's key.
    pub fn iter(&self) -> impl Iterator<Item = (u64, &ComponentRecord)> + '_ {
        self.keys
            .iter()
            .map(|(key, index)| (*key, &self.records[*index as usize]))
    }

    /// Snapshot of `(key, index)` pairs in key order.
    pub fn entries(&self) -> Vec<(u64, u32)> {
        self.keys.iter().map(|(k, i)| (*k, *i)).collect()
    }

    /// Changes the object id of the record at `index` and adds an entry under its new key. The
    /// entry under the old key is left in place until [`ComponentTable::remove_stale`].
    pub fn rekey(&mut self, index: u32, new_id: u32) {
        let record = &mut self.records[index as usize];
        record.object_id = new_id;
        record.alt_id = new_id;
        let key = record.key();
        self.keys.insert(key, index);
    }

    /// Removes entries whose key does not match the key of their record, returns how many.
    pub fn remove_stale(&mut self) -> usize {
        let before = self.keys.len();
        let records = &self.records;
        self.keys
            .retain(|key, index| *key == records[*index as usize].key());
        before - self.keys.len()
    }

    pub fn update_max_size(&mut self, size: u32) {
        self.max_size = self.max_size.max(size);
    }
}
