//! LRU cache for orphaned tile textures
//!
//! A texture whose node was pruned before its load finished is parked here
//! so the node can adopt it if the camera comes back. When the cache is full
//! the least recently used texture is evicted and must be deleted on the GPU
//! by the caller.

use crate::planet::LayerId;
use crate::render::TextureHandle;
use crate::tile::TileAddress;
use std::collections::HashMap;

pub type TextureKey = (TileAddress, LayerId);

/// LRU cache of GPU textures keyed by tile and layer
pub struct TextureCache {
    /// Map of keys to textures and the layer version they were loaded at
    textures: HashMap<TextureKey, (TextureHandle, u64)>,
    /// Access order: oldest first, newest last
    access_order: Vec<TextureKey>,
    /// Maximum number of textures to keep
    capacity: usize,
}

impl TextureCache {
    /// Create a new texture cache with the given capacity
    ///
    /// # Arguments
    /// * `capacity` - Maximum number of textures; zero disables caching
    pub fn new(capacity: usize) -> Self {
        Self {
            textures: HashMap::with_capacity(capacity),
            access_order: Vec::with_capacity(capacity),
            capacity,
        }
    }

    /// Park a texture
    ///
    /// # Returns
    /// Textures that no longer fit (or the one being replaced); the caller
    /// owns them and must delete them
    pub fn insert(
        &mut self,
        key: TextureKey,
        texture: TextureHandle,
        version: u64,
    ) -> Vec<TextureHandle> {
        let mut released = Vec::new();
        if self.capacity == 0 {
            released.push(texture);
            return released;
        }

        if let Some((old, _)) = self.remove(key) {
            released.push(old);
        }
        while self.textures.len() >= self.capacity {
            match self.evict_oldest() {
                Some((_, (evicted, _))) => released.push(evicted),
                None => break,
            }
        }

        self.textures.insert(key, (texture, version));
        self.access_order.push(key);
        released
    }

    /// Take a texture out of the cache for a node that needs it again.
    ///
    /// Entries loaded at another layer version stay cached but count as used.
    pub fn adopt(&mut self, key: TextureKey, version: u64) -> Option<TextureHandle> {
        match self.textures.get(&key) {
            Some(&(_, v)) if v == version => self.remove(key).map(|(handle, _)| handle),
            Some(_) => {
                self.touch(key);
                None
            }
            None => None,
        }
    }

    /// Mark an entry as most recently used.
    pub fn touch(&mut self, key: TextureKey) -> bool {
        if !self.textures.contains_key(&key) {
            return false;
        }
        self.remove_from_access_order(key);
        self.access_order.push(key);
        true
    }

    /// Remove a texture from the cache
    ///
    /// # Returns
    /// The removed texture and its version if it existed
    pub fn remove(&mut self, key: TextureKey) -> Option<(TextureHandle, u64)> {
        self.remove_from_access_order(key);
        self.textures.remove(&key)
    }

    /// Remove every texture of a layer
    pub fn remove_layer(&mut self, layer: LayerId) -> Vec<TextureHandle> {
        let keys: Vec<TextureKey> =
            self.textures.keys().filter(|(_, l)| *l == layer).copied().collect();
        keys.into_iter().filter_map(|k| self.remove(k)).map(|(t, _)| t).collect()
    }

    /// Forget every texture without returning them (after a GPU context loss)
    pub fn clear(&mut self) {
        self.textures.clear();
        self.access_order.clear();
    }

    /// Remove every texture, handing them back for deletion
    pub fn drain(&mut self) -> Vec<TextureHandle> {
        self.access_order.clear();
        self.textures.drain().map(|(_, (t, _))| t).collect()
    }

    pub fn contains(&self, key: TextureKey) -> bool {
        self.textures.contains_key(&key)
    }

    /// Get the number of textures in the cache
    pub fn len(&self) -> usize {
        self.textures.len()
    }

    /// Check if the cache is empty
    pub fn is_empty(&self) -> bool {
        self.textures.is_empty()
    }

    /// Evict the least recently used texture
    fn evict_oldest(&mut self) -> Option<(TextureKey, (TextureHandle, u64))> {
        let key = self.access_order.first().copied()?;
        self.remove(key).map(|entry| (key, entry))
    }

    /// Remove a key from the access order
    fn remove_from_access_order(&mut self, key: TextureKey) {
        if let Some(pos) = self.access_order.iter().position(|&k| k == key) {
            self.access_order.remove(pos);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn key(x: u32) -> TextureKey {
        (TileAddress::new(x, 0, 3), LayerId(1))
    }

    #[test]
    fn test_cache_new() {
        let cache = TextureCache::new(10);
        assert_eq!(cache.len(), 0);
        assert!(cache.is_empty());
    }

    #[test]
    fn test_adopt() {
        let mut cache = TextureCache::new(4);
        assert!(cache.insert(key(1), TextureHandle(10), 0).is_empty());
        assert!(cache.contains(key(1)));

        // Wrong version stays cached
        assert_eq!(cache.adopt(key(1), 1), None);
        assert_eq!(cache.adopt(key(1), 0), Some(TextureHandle(10)));
        assert!(cache.is_empty());
    }

    #[test]
    fn test_replace_returns_old() {
        let mut cache = TextureCache::new(4);
        cache.insert(key(1), TextureHandle(10), 0);
        assert_eq!(cache.insert(key(1), TextureHandle(11), 0), vec![TextureHandle(10)]);
        assert_eq!(cache.len(), 1);
    }

    #[test]
    fn test_cache_lru_eviction() {
        let mut cache = TextureCache::new(3);
        cache.insert(key(1), TextureHandle(1), 0);
        cache.insert(key(2), TextureHandle(2), 0);
        cache.insert(key(3), TextureHandle(3), 0);

        // Insert 4th texture - should evict oldest
        let evicted = cache.insert(key(4), TextureHandle(4), 0);
        assert_eq!(evicted, vec![TextureHandle(1)]);
        assert_eq!(cache.len(), 3);
        assert!(!cache.contains(key(1)));
    }

    #[test]
    fn test_recently_used_survives_eviction() {
        let mut cache = TextureCache::new(3);
        cache.insert(key(1), TextureHandle(1), 0);
        cache.insert(key(2), TextureHandle(2), 0);
        cache.insert(key(3), TextureHandle(3), 0);

        assert!(cache.touch(key(1)));
        assert!(!cache.touch(key(9)));
        assert_eq!(cache.insert(key(4), TextureHandle(4), 0), vec![TextureHandle(2)]);

        // A lookup at another version still refreshes the entry
        assert_eq!(cache.adopt(key(3), 5), None);
        assert_eq!(cache.insert(key(5), TextureHandle(5), 0), vec![TextureHandle(1)]);
        assert!(cache.contains(key(3)));
        assert!(cache.contains(key(4)));
    }

    #[test]
    fn test_zero_capacity_rejects() {
        let mut cache = TextureCache::new(0);
        assert_eq!(cache.insert(key(1), TextureHandle(1), 0), vec![TextureHandle(1)]);
        assert!(cache.is_empty());
    }

    #[test]
    fn test_remove_layer() {
        let mut cache = TextureCache::new(8);
        cache.insert(key(1), TextureHandle(1), 0);
        cache.insert((TileAddress::new(1, 0, 3), LayerId(2)), TextureHandle(2), 0);

        assert_eq!(cache.remove_layer(LayerId(1)), vec![TextureHandle(1)]);
        assert_eq!(cache.len(), 1);
    }
}
