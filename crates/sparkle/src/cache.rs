//! Texture pool that recycles intermediate render targets between frames.
//!
//! Passes ask the cache for scratch textures by exact key (size, format,
//! usage) and hand them back before their encode call returns. Idle textures
//! are kept in release order so [`TextureCache::trim`] can drop the stalest
//! ones first.

use std::collections::VecDeque;

use tracing::{debug, warn};

/// Exact match key for pooled textures.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct TextureKey {
    pub width: u32,
    pub height: u32,
    pub format: wgpu::TextureFormat,
    pub usage: wgpu::TextureUsages,
}

impl TextureKey {
    pub fn new(
        width: u32,
        height: u32,
        format: wgpu::TextureFormat,
        usage: wgpu::TextureUsages,
    ) -> Self {
        Self {
            width,
            height,
            format,
            usage,
        }
    }

    /// Key with the size and format of `texture` and the supplied usage.
    pub fn matching(texture: &wgpu::Texture, usage: wgpu::TextureUsages) -> Self {
        Self::new(texture.width(), texture.height(), texture.format(), usage)
    }

    fn extent(&self) -> wgpu::Extent3d {
        wgpu::Extent3d {
            width: self.width,
            height: self.height,
            depth_or_array_layers: 1,
        }
    }
}

/// Creates the GPU images backing the cache.
///
/// Returning `None` means the allocation failed (zero-sized request, device
/// limits exceeded, out of memory) and the caller should degrade.
pub trait TextureAllocator {
    type Texture: Clone;

    fn allocate(&mut self, key: &TextureKey) -> Option<Self::Texture>;

    fn key_of(&self, texture: &Self::Texture) -> TextureKey;
}

/// Allocates real `wgpu` textures, trapping out-of-memory errors in an error
/// scope so they surface as `None`.
pub struct DeviceAllocator {
    device: wgpu::Device,
    max_dimension: u32,
}

impl DeviceAllocator {
    pub fn new(device: wgpu::Device) -> Self {
        let max_dimension = device.limits().max_texture_dimension_2d;
        Self {
            device,
            max_dimension,
        }
    }
}

impl TextureAllocator for DeviceAllocator {
    type Texture = wgpu::Texture;

    fn allocate(&mut self, key: &TextureKey) -> Option<wgpu::Texture> {
        if key.width == 0 || key.height == 0 {
            return None;
        }
        if key.width > self.max_dimension || key.height > self.max_dimension {
            warn!(
                width = key.width,
                height = key.height,
                max = self.max_dimension,
                "pooled texture request exceeds device limits"
            );
            return None;
        }

        self.device.push_error_scope(wgpu::ErrorFilter::OutOfMemory);
        let texture = self.device.create_texture(&wgpu::TextureDescriptor {
            label: Some("pooled texture"),
            size: key.extent(),
            mip_level_count: 1,
            sample_count: 1,
            dimension: wgpu::TextureDimension::D2,
            format: key.format,
            usage: key.usage,
            view_formats: &[],
        });
        if let Some(error) = pollster::block_on(self.device.pop_error_scope()) {
            warn!(%error, ?key, "pooled texture allocation failed");
            return None;
        }
        Some(texture)
    }

    fn key_of(&self, texture: &wgpu::Texture) -> TextureKey {
        TextureKey::matching(texture, texture.usage())
    }
}

struct IdleEntry<T> {
    key: TextureKey,
    texture: T,
    released_at: u64,
}

/// Pool of reusable textures keyed by [`TextureKey`].
///
/// A texture returned by [`acquire`](Self::acquire) belongs to the caller
/// until it is passed back to [`release`](Self::release). Releasing a texture
/// twice, or one the cache never produced, is a caller bug; debug builds
/// assert on it, release builds simply pool the handle.
pub struct TextureCache<A: TextureAllocator = DeviceAllocator> {
    allocator: A,
    idle: VecDeque<IdleEntry<A::Texture>>,
    checked_out: usize,
    release_clock: u64,
    allocations: u64,
    hits: u64,
}

impl TextureCache<DeviceAllocator> {
    pub fn for_device(device: &wgpu::Device) -> Self {
        Self::new(DeviceAllocator::new(device.clone()))
    }
}

impl<A: TextureAllocator> TextureCache<A> {
    pub fn new(allocator: A) -> Self {
        Self {
            allocator,
            idle: VecDeque::new(),
            checked_out: 0,
            release_clock: 0,
            allocations: 0,
            hits: 0,
        }
    }

    /// Reuses an idle texture with exactly `key`, or allocates a fresh one.
    pub fn acquire(&mut self, key: TextureKey) -> Option<A::Texture> {
        // Most recently released first keeps the hottest textures in use.
        if let Some(index) = self.idle.iter().rposition(|entry| entry.key == key) {
            let entry = self.idle.remove(index)?;
            self.hits += 1;
            self.checked_out += 1;
            return Some(entry.texture);
        }

        let texture = self.allocator.allocate(&key)?;
        self.allocations += 1;
        self.checked_out += 1;
        debug!(
            width = key.width,
            height = key.height,
            format = ?key.format,
            allocations = self.allocations,
            "allocated pooled texture"
        );
        Some(texture)
    }

    /// Same as [`acquire`](Self::acquire) with the size and format copied from `texture`.
    pub fn acquire_matching(
        &mut self,
        texture: &A::Texture,
        usage: wgpu::TextureUsages,
    ) -> Option<A::Texture> {
        let existing = self.allocator.key_of(texture);
        self.acquire(TextureKey { usage, ..existing })
    }

    /// Returns a texture to the idle pool.
    pub fn release(&mut self, texture: A::Texture) {
        debug_assert!(
            self.checked_out > 0,
            "texture released to the cache more often than it was acquired"
        );
        self.checked_out = self.checked_out.saturating_sub(1);
        self.release_clock += 1;
        let key = self.allocator.key_of(&texture);
        self.idle.push_back(IdleEntry {
            key,
            texture,
            released_at: self.release_clock,
        });
    }

    /// Acquires a texture for the duration of `f` and releases it afterwards.
    ///
    /// Returns `None` without calling `f` when the texture is unavailable.
    pub fn with_texture<R>(
        &mut self,
        key: TextureKey,
        f: impl FnOnce(&mut Self, &A::Texture) -> R,
    ) -> Option<R> {
        let texture = self.acquire(key)?;
        let result = f(self, &texture);
        self.release(texture);
        Some(result)
    }

    /// Drops every idle texture. Textures still checked out are orphaned and
    /// must not be released back afterwards.
    pub fn clear(&mut self) {
        if !self.idle.is_empty() {
            debug!(evicted = self.idle.len(), "clearing texture cache");
        }
        self.idle.clear();
        self.checked_out = 0;
    }

    /// Evicts the least recently released idle textures until at most
    /// `max_count` remain. Checked-out textures are never affected.
    pub fn trim(&mut self, max_count: usize) {
        let mut evicted = 0usize;
        while self.idle.len() > max_count {
            let Some(oldest) = self.idle.pop_front() else {
                break;
            };
            debug_assert!(self
                .idle
                .front()
                .map_or(true, |next| next.released_at > oldest.released_at));
            evicted += 1;
        }
        if evicted > 0 {
            debug!(evicted, remaining = self.idle.len(), "trimmed texture cache");
        }
    }

    pub fn idle_count(&self) -> usize {
        self.idle.len()
    }

    pub fn checked_out_count(&self) -> usize {
        self.checked_out
    }

    /// Number of textures the allocator produced over the cache lifetime.
    pub fn allocation_count(&self) -> u64 {
        self.allocations
    }

    pub fn hit_count(&self) -> u64 {
        self.hits
    }

    pub fn allocator(&self) -> &A {
        &self.allocator
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Clone, Debug, PartialEq)]
    struct FakeTexture {
        id: u32,
        key: TextureKey,
    }

    #[derive(Default)]
    struct CountingAllocator {
        next_id: u32,
        fail: bool,
    }

    impl TextureAllocator for CountingAllocator {
        type Texture = FakeTexture;

        fn allocate(&mut self, key: &TextureKey) -> Option<FakeTexture> {
            if self.fail || key.width == 0 || key.height == 0 {
                return None;
            }
            self.next_id += 1;
            Some(FakeTexture {
                id: self.next_id,
                key: *key,
            })
        }

        fn key_of(&self, texture: &FakeTexture) -> TextureKey {
            texture.key
        }
    }

    fn key(size: u32, format: wgpu::TextureFormat) -> TextureKey {
        TextureKey::new(
            size,
            size,
            format,
            wgpu::TextureUsages::TEXTURE_BINDING | wgpu::TextureUsages::STORAGE_BINDING,
        )
    }

    #[test]
    fn released_texture_is_reused_without_allocating() {
        let mut cache = TextureCache::new(CountingAllocator::default());
        let first = cache
            .acquire(key(256, wgpu::TextureFormat::Rgba8Unorm))
            .unwrap();
        cache.release(first.clone());
        let second = cache
            .acquire(key(256, wgpu::TextureFormat::Rgba8Unorm))
            .unwrap();

        assert_eq!(first, second);
        assert_eq!(cache.allocation_count(), 1);
        assert_eq!(cache.hit_count(), 1);
    }

    #[test]
    fn mismatched_key_allocates_fresh_texture() {
        let mut cache = TextureCache::new(CountingAllocator::default());
        let a = cache
            .acquire(key(256, wgpu::TextureFormat::Rgba8Unorm))
            .unwrap();
        cache.release(a);
        let b = cache
            .acquire(key(256, wgpu::TextureFormat::Rgba16Float))
            .unwrap();
        let c = cache
            .acquire(key(128, wgpu::TextureFormat::Rgba8Unorm))
            .unwrap();

        assert_ne!(b.id, c.id);
        assert_eq!(cache.allocation_count(), 3);
        assert_eq!(cache.idle_count(), 1);
    }

    #[test]
    fn checked_out_textures_are_never_handed_out_twice() {
        let mut cache = TextureCache::new(CountingAllocator::default());
        let k = key(64, wgpu::TextureFormat::Rgba8Unorm);
        let a = cache.acquire(k).unwrap();
        let b = cache.acquire(k).unwrap();
        assert_ne!(a.id, b.id);
        assert_eq!(cache.checked_out_count(), 2);
    }

    #[test]
    fn trim_to_zero_empties_pool_and_forces_allocation() {
        let mut cache = TextureCache::new(CountingAllocator::default());
        let k = key(32, wgpu::TextureFormat::Rgba8Unorm);
        let held = cache.acquire(k).unwrap();
        let a = cache.acquire(k).unwrap();
        let b = cache.acquire(k).unwrap();
        cache.release(a);
        cache.release(b);

        cache.trim(0);
        assert_eq!(cache.idle_count(), 0);
        assert_eq!(cache.checked_out_count(), 1);

        let before = cache.allocation_count();
        let fresh = cache.acquire(k).unwrap();
        assert_ne!(fresh.id, held.id);
        assert_eq!(cache.allocation_count(), before + 1);
    }

    #[test]
    fn trim_evicts_oldest_releases_first() {
        let mut cache = TextureCache::new(CountingAllocator::default());
        let small = key(16, wgpu::TextureFormat::Rgba8Unorm);
        let large = key(512, wgpu::TextureFormat::Rgba8Unorm);
        let old = cache.acquire(small).unwrap();
        let recent = cache.acquire(large).unwrap();
        cache.release(old);
        cache.release(recent.clone());

        cache.trim(1);
        assert_eq!(cache.idle_count(), 1);
        let reused = cache.acquire(large).unwrap();
        assert_eq!(reused, recent);
    }

    #[test]
    fn acquire_matching_copies_size_and_format() {
        let mut cache = TextureCache::new(CountingAllocator::default());
        let source = cache
            .acquire(key(100, wgpu::TextureFormat::Rgba16Float))
            .unwrap();
        let scratch = cache
            .acquire_matching(&source, wgpu::TextureUsages::COPY_DST)
            .unwrap();
        assert_eq!(scratch.key.width, 100);
        assert_eq!(scratch.key.format, wgpu::TextureFormat::Rgba16Float);
        assert_eq!(scratch.key.usage, wgpu::TextureUsages::COPY_DST);
    }

    #[test]
    fn allocation_failure_is_an_empty_result() {
        let mut cache = TextureCache::new(CountingAllocator {
            fail: true,
            ..Default::default()
        });
        assert!(cache
            .acquire(key(64, wgpu::TextureFormat::Rgba8Unorm))
            .is_none());
        assert_eq!(cache.checked_out_count(), 0);
        assert!(cache
            .with_texture(key(64, wgpu::TextureFormat::Rgba8Unorm), |_, _| ())
            .is_none());
    }

    #[test]
    fn scoped_acquisition_releases_on_return() {
        let mut cache = TextureCache::new(CountingAllocator::default());
        let k = key(8, wgpu::TextureFormat::Rgba8Unorm);
        let nested = cache.with_texture(k, |cache, outer| {
            let inner = cache.with_texture(k, |cache, inner| {
                assert_eq!(cache.checked_out_count(), 2);
                inner.id
            });
            (outer.id, inner)
        });
        let (outer, inner) = nested.unwrap();
        assert_ne!(Some(outer), inner);
        assert_eq!(cache.checked_out_count(), 0);
        assert_eq!(cache.idle_count(), 2);
    }

    #[test]
    fn clear_drops_idle_textures() {
        let mut cache = TextureCache::new(CountingAllocator::default());
        let k = key(8, wgpu::TextureFormat::Rgba8Unorm);
        let a = cache.acquire(k).unwrap();
        cache.release(a);
        cache.clear();
        assert_eq!(cache.idle_count(), 0);
        cache.acquire(k).unwrap();
        assert_eq!(cache.allocation_count(), 2);
    }
}
