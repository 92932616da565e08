use std::collections::HashMap;

use image::RgbaImage;

// ============================================================================
// BACKUP CACHE - reclaimable store for partial-region undo data
// ============================================================================

/// Handle to a block stored in a [`BackupCache`].
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct BackupId(u64);

struct Entry {
    block: RgbaImage,
    last_use: u64,
}

impl Entry {
    fn bytes(&self) -> usize {
        self.block.as_raw().len()
    }
}

/// Pixel blocks backing partial-region edits.
///
/// Entries may disappear at any time: when the byte budget is exceeded the
/// least recently used blocks are evicted, and [`reclaim`](Self::reclaim)
/// lets the host free memory under pressure. Every lookup therefore returns
/// an `Option`, and a missing block means the owning edit can no longer be
/// replayed.
pub struct BackupCache {
    entries: HashMap<BackupId, Entry>,
    next_id: u64,
    clock: u64,
    budget_bytes: usize,
    used_bytes: usize,
    evicted: u64,
}

impl std::fmt::Debug for BackupCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BackupCache")
            .field("entries", &self.entries.len())
            .field("used_bytes", &self.used_bytes)
            .field("budget_bytes", &self.budget_bytes)
            .finish()
    }
}

impl Default for BackupCache {
    fn default() -> Self {
        Self::new(256 * 1024 * 1024)
    }
}

impl BackupCache {
    pub fn new(budget_bytes: usize) -> Self {
        Self {
            entries: HashMap::new(),
            next_id: 0,
            clock: 0,
            budget_bytes,
            used_bytes: 0,
            evicted: 0,
        }
    }

    fn tick(&mut self) -> u64 {
        self.clock += 1;
        self.clock
    }

    /// Store a block and return its handle. May evict older blocks to stay
    /// within budget; the block just stored is never the one evicted.
    pub fn store(&mut self, block: RgbaImage) -> BackupId {
        let id = BackupId(self.next_id);
        self.next_id += 1;
        self.put(id, block);
        id
    }

    /// Re-store a block under an existing handle (used after a swap).
    pub(crate) fn put(&mut self, id: BackupId, block: RgbaImage) {
        let last_use = self.tick();
        let entry = Entry { block, last_use };
        self.used_bytes += entry.bytes();
        if let Some(old) = self.entries.insert(id, entry) {
            self.used_bytes -= old.bytes();
        }
        self.evict_over_budget(id);
    }

    pub fn contains(&self, id: BackupId) -> bool {
        self.entries.contains_key(&id)
    }

    /// Look up a block, marking it as recently used.
    pub fn get(&mut self, id: BackupId) -> Option<&RgbaImage> {
        let now = self.tick();
        let entry = self.entries.get_mut(&id)?;
        entry.last_use = now;
        Some(&entry.block)
    }

    /// Remove and return a block.
    pub fn take(&mut self, id: BackupId) -> Option<RgbaImage> {
        let entry = self.entries.remove(&id)?;
        self.used_bytes -= entry.bytes();
        Some(entry.block)
    }

    /// Drop a block whose edit has been discarded.
    pub fn release(&mut self, id: BackupId) {
        self.take(id);
    }

    /// Memory-pressure hook: evict least recently used blocks until at
    /// least `bytes` have been freed. Returns the number of bytes freed.
    pub fn reclaim(&mut self, bytes: usize) -> usize {
        let mut freed = 0;
        while freed < bytes {
            let Some(victim) = self.least_recently_used(None) else { break };
            if let Some(block) = self.take(victim) {
                freed += block.as_raw().len();
                self.evicted += 1;
            }
        }
        if freed > 0 {
            crate::log_info!("Backup cache reclaimed {} bytes", freed);
        }
        freed
    }

    /// Drop every block.
    pub fn reclaim_all(&mut self) -> usize {
        let freed = self.used_bytes;
        self.evicted += self.entries.len() as u64;
        self.entries.clear();
        self.used_bytes = 0;
        freed
    }

    fn least_recently_used(&self, keep: Option<BackupId>) -> Option<BackupId> {
        self.entries
            .iter()
            .filter(|(id, _)| Some(**id) != keep)
            .min_by_key(|(_, e)| e.last_use)
            .map(|(id, _)| *id)
    }

    fn evict_over_budget(&mut self, keep: BackupId) {
        while self.used_bytes > self.budget_bytes {
            let Some(victim) = self.least_recently_used(Some(keep)) else { break };
            self.take(victim);
            self.evicted += 1;
            crate::log_warn!("Backup cache over budget, evicted block {:?}", victim);
        }
    }

    pub fn used_bytes(&self) -> usize {
        self.used_bytes
    }

    pub fn budget_bytes(&self) -> usize {
        self.budget_bytes
    }

    pub fn set_budget(&mut self, budget_bytes: usize) {
        self.budget_bytes = budget_bytes;
        while self.used_bytes > self.budget_bytes {
            let Some(victim) = self.least_recently_used(None) else { break };
            self.take(victim);
            self.evicted += 1;
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Number of blocks lost to eviction or reclamation so far.
    pub fn evicted_count(&self) -> u64 {
        self.evicted
    }
}
