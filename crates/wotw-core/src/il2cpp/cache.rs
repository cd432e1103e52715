use std::collections::HashMap;
use std::path::Path;

use crate::error::Result;
use crate::il2cpp::resolver::Il2CppTables;

/// Results keyed by (process id, case-folded name).
///
/// Everything is dropped as soon as a different process id is seen.
#[derive(Debug, Clone)]
pub struct NameCache<V> {
    pid: Option<u32>,
    entries: HashMap<String, V>,
}

impl<V> Default for NameCache<V> {
    fn default() -> Self {
        Self {
            pid: None,
            entries: HashMap::new(),
        }
    }
}

impl<V: Clone> NameCache<V> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get_or_insert_with(&mut self, pid: u32, name: &str, resolve: impl FnOnce() -> V) -> V {
        if self.pid != Some(pid) {
            self.entries.clear();
            self.pid = Some(pid);
        }
        self.entries
            .entry(name.to_ascii_lowercase())
            .or_insert_with(resolve)
            .clone()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn clear(&mut self) {
        self.entries.clear();
        self.pid = None;
    }
}

/// Loaded IL2CPP tables plus the per-process lookup caches
#[derive(Debug)]
pub struct Il2CppRuntime {
    tables: Il2CppTables,
    rvas: NameCache<u64>,
    field_offsets: NameCache<Option<i32>>,
}

impl Il2CppRuntime {
    pub fn new(tables: Il2CppTables) -> Self {
        Self {
            tables,
            rvas: NameCache::new(),
            field_offsets: NameCache::new(),
        }
    }

    pub fn load(game_dir: &Path, product: &str) -> Result<Self> {
        Il2CppTables::load(game_dir, product).map(Self::new)
    }

    pub fn tables(&self) -> &Il2CppTables {
        &self.tables
    }

    /// Cached [`Il2CppTables::resolve_rva`]
    pub fn rva(&mut self, pid: u32, full_name: &str) -> u64 {
        let tables = &self.tables;
        self.rvas
            .get_or_insert_with(pid, full_name, || tables.resolve_rva(full_name))
    }

    /// Cached [`Il2CppTables::resolve_field_offset`]
    pub fn field_offset(&mut self, pid: u32, full_name: &str) -> Option<i32> {
        let tables = &self.tables;
        self.field_offsets
            .get_or_insert_with(pid, full_name, || tables.resolve_field_offset(full_name))
    }

    pub fn cached_names(&self) -> usize {
        self.rvas.len() + self.field_offsets.len()
    }
}

#[cfg(test)]
mod tests {
    use std::cell::Cell;

    use super::*;
    use crate::il2cpp::fixture::Il2CppFixture;

    #[test]
    fn test_name_cache_resolves_once_per_pid() {
        let calls = Cell::new(0);
        let mut cache = NameCache::new();
        let mut lookup = |pid, name: &str| {
            cache.get_or_insert_with(pid, name, || {
                calls.set(calls.get() + 1);
                42u64
            })
        };

        assert_eq!(lookup(1, "Game.Player.GetHealth"), 42);
        assert_eq!(lookup(1, "game.player.gethealth"), 42);
        assert_eq!(calls.get(), 1);

        assert_eq!(lookup(2, "Game.Player.GetHealth"), 42);
        assert_eq!(calls.get(), 2);
    }

    #[test]
    fn test_name_cache_clear() {
        let mut cache = NameCache::new();
        cache.get_or_insert_with(7, "a", || 1u32);
        cache.get_or_insert_with(7, "b", || 2u32);
        assert_eq!(cache.len(), 2);
        cache.clear();
        assert!(cache.is_empty());
    }

    #[test]
    fn test_runtime_caches_misses_too() {
        let mut runtime = Il2CppRuntime::new(Il2CppFixture::game_player().tables());
        assert_eq!(runtime.rva(1000, "Game.Player.GetHealth"), 0x1000);
        assert_eq!(runtime.rva(1000, "Game.Player.Missing"), 0);
        assert_eq!(runtime.field_offset(1000, "Game.Player.health"), Some(0x18));
        assert_eq!(runtime.cached_names(), 3);

        // New process: caches start over
        assert_eq!(runtime.rva(2000, "Game.Player.GetHealth"), 0x1000);
        assert_eq!(runtime.cached_names(), 2);
    }
}
