//! Size-class shadow texture atlas with per-class LRU eviction.
//!
//! The atlas is one square texture cut into blocks at construction time. Every
//! block is assigned to one size class and pre-split into equal fragments of
//! that class. Texture handles borrow a fragment for as long as nothing with a
//! higher priority needs it; the least recently used fragment of a class is
//! the one given away.

use glam::UVec2;
use penumbra_types::{RawShadowTextureHandle, ShadowRect};

use crate::{
    config::AtlasConfig,
    error::AtlasConfigError,
    util::{
        freelist::{FreelistIndex, FreelistVec},
        math::ceil_log2,
        multilist::MultiList,
    },
};

/// Textures this large always move to their ideal class.
const HYSTERESIS_MAX_POWER: u8 = 8;

#[derive(Debug)]
struct Fragment {
    rect: ShadowRect,
    power: u8,
    texture: Option<RawShadowTextureHandle>,
    frame_used: Option<u64>,
}

#[derive(Debug)]
struct AtlasTexture {
    /// Largest power this texture will ever be given.
    power: u8,
    fragment: Option<usize>,
}

/// Per-class occupancy, for statistics and debugging overlays.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct SizeClassUsage {
    pub power: u8,
    pub fragments: usize,
    pub bound: usize,
    pub used_this_frame: usize,
}

#[derive(Debug)]
pub struct ShadowAtlas {
    config: AtlasConfig,
    fragments: Vec<Fragment>,
    /// One list per power in `0..=max_power`, cold end first.
    lru: MultiList,
    /// Configured class powers, ascending. The table may skip powers.
    class_powers: Vec<u8>,
    textures: FreelistVec<AtlasTexture>,
    current_frame: u64,
    warned_exhausted: bool,
}

impl ShadowAtlas {
    pub fn new(config: AtlasConfig) -> Result<Self, AtlasConfigError> {
        profiling::scope!("ShadowAtlas::new");

        config.validate()?;

        let fragments = build_fragments(&config);
        let mut class_powers: Vec<u8> = config.classes.iter().map(|class| class.power).collect();
        class_powers.sort_unstable();
        let mut lru = MultiList::new(usize::from(config.max_power) + 1, fragments.len());
        for (idx, fragment) in fragments.iter().enumerate() {
            lru.link_to_tail(usize::from(fragment.power), idx);
        }

        log::debug!(
            "Built {}x{} shadow atlas with {} fragments in {} size classes",
            config.size,
            config.size,
            fragments.len(),
            config.classes.len()
        );

        Ok(Self {
            config,
            fragments,
            lru,
            class_powers,
            textures: FreelistVec::new(),
            current_frame: 0,
            warned_exhausted: false,
        })
    }

    /// Edge length of the atlas texture.
    pub fn size(&self) -> u32 {
        self.config.size
    }

    pub fn config(&self) -> &AtlasConfig {
        &self.config
    }

    pub fn current_frame(&self) -> u64 {
        self.current_frame
    }

    pub fn texture_count(&self) -> usize {
        self.textures.len()
    }

    /// Registers a texture that wants to be `edge` texels wide.
    ///
    /// The edge is clamped to the configured power range and rounded up to a power
    /// of two. No fragment is bound until the texture is first used.
    pub fn allocate(&mut self, edge: u32) -> RawShadowTextureHandle {
        let power = ceil_log2(edge).clamp(u32::from(self.config.min_power), u32::from(self.config.max_power)) as u8;
        let idx = self.textures.push(AtlasTexture { power, fragment: None });
        RawShadowTextureHandle::new(idx.0)
    }

    /// Releases a texture. Its fragment goes to the cold end of its class with
    /// the pixels left in place.
    pub fn deallocate(&mut self, handle: RawShadowTextureHandle) {
        let texture = match self.textures.remove(FreelistIndex(handle.idx)) {
            Some(texture) => texture,
            None => panic!("deallocating shadow texture {:?} which is not allocated", handle),
        };
        if let Some(fragment) = texture.fragment {
            self.release_fragment(fragment);
        }
    }

    /// Desired power of a texture, as clamped at allocation.
    pub fn desired_power(&self, handle: RawShadowTextureHandle) -> u8 {
        self.texture(handle).power
    }

    /// Power of the fragment currently bound to the texture.
    pub fn bound_power(&self, handle: RawShadowTextureHandle) -> Option<u8> {
        self.texture(handle).fragment.map(|f| self.fragments[f].power)
    }

    pub fn has_valid_texture(&self, handle: RawShadowTextureHandle) -> bool {
        self.texture(handle).fragment.is_some()
    }

    /// Atlas rectangle of the texture, if it holds a fragment.
    pub fn rect(&self, handle: RawShadowTextureHandle) -> Option<ShadowRect> {
        self.texture(handle).fragment.map(|f| self.fragments[f].rect)
    }

    /// Marks a texture as used this frame, finding it a fragment if needed.
    ///
    /// Callers must use textures in order of descending `area` within a frame;
    /// earlier calls win fragments over later ones. Returns true if the texture
    /// was given a new fragment and has to be redrawn. A false return with no
    /// valid texture afterwards means the atlas is out of space this frame.
    pub fn use_texture(&mut self, handle: RawShadowTextureHandle, force_redraw: bool, area: f32) -> bool {
        profiling::scope!("ShadowAtlas::use_texture");

        let texture = self.texture(handle);
        let max_power = texture.power;
        let current = texture.fragment;

        let desired_power = self.desired_class(max_power, area);

        let mut current_power = None;
        if let Some(current) = current {
            let power = self.fragments[current].power;
            current_power = Some(power);

            // Hysteresis: one class short of the ideal is kept unless the texture is
            // redrawn anyway. Textures of 256 texels and up never lag behind.
            let close_enough = !force_redraw
                && desired_power < HYSTERESIS_MAX_POWER
                && i32::from(desired_power) - i32::from(power) <= 1;
            if power == desired_power || close_enough {
                self.mark_used(current);
                return false;
            }
        }

        let found = (0..=desired_power).rev().find_map(|power| {
            let head = self.lru.head(usize::from(power))?;
            (self.fragments[head].frame_used != Some(self.current_frame)).then_some(head)
        });

        let Some(found) = found else {
            // Nothing smaller is free, but what the texture already holds is still valid.
            if let Some(current) = current {
                self.mark_used(current);
                return false;
            }
            if !self.warned_exhausted {
                self.warned_exhausted = true;
                log::warn!(
                    "Shadow atlas ran out of fragments at or below {} texels in frame {}, falling back to cheaper shadows",
                    1_u32 << desired_power,
                    self.current_frame
                );
            }
            return false;
        };

        let found_power = self.fragments[found].power;
        if let (Some(current), Some(current_power)) = (current, current_power) {
            if current_power >= found_power {
                self.mark_used(current);
                return false;
            }
            self.release_fragment(current);
        }

        if let Some(previous_owner) = self.fragments[found].texture.take() {
            if let Some(owner) = self.textures.get_mut(FreelistIndex(previous_owner.idx)) {
                owner.fragment = None;
            }
        }

        self.fragments[found].texture = Some(handle);
        self.textures[FreelistIndex(handle.idx)].fragment = Some(found);
        self.mark_used(found);

        true
    }

    /// Starts a new rendered frame. Views within one frame share a frame number.
    pub fn advance_frame(&mut self) {
        self.current_frame += 1;
    }

    /// Unbinds every fragment and forgets every texture, keeping the frame counter.
    pub fn reset(&mut self) {
        profiling::scope!("ShadowAtlas::reset");

        self.textures.clear();
        self.lru = MultiList::new(usize::from(self.config.max_power) + 1, self.fragments.len());
        for (idx, fragment) in self.fragments.iter_mut().enumerate() {
            fragment.texture = None;
            fragment.frame_used = None;
            self.lru.link_to_tail(usize::from(fragment.power), idx);
        }
    }

    pub fn usage(&self) -> Vec<SizeClassUsage> {
        self.config
            .classes
            .iter()
            .map(|class| {
                let list = usize::from(class.power);
                let mut usage = SizeClassUsage {
                    power: class.power,
                    fragments: self.lru.len(list),
                    bound: 0,
                    used_this_frame: 0,
                };
                for fragment in self.lru.iter(list).map(|f| &self.fragments[f]) {
                    usage.bound += usize::from(fragment.texture.is_some());
                    usage.used_this_frame += usize::from(fragment.frame_used == Some(self.current_frame));
                }
                usage
            })
            .collect()
    }

    fn texture(&self, handle: RawShadowTextureHandle) -> &AtlasTexture {
        match self.textures.get(FreelistIndex(handle.idx)) {
            Some(texture) => texture,
            None => panic!("use of shadow texture {:?} after it was deallocated", handle),
        }
    }

    /// Smallest configured class covering `area`, capped at the largest class
    /// not above `max_power`.
    fn desired_class(&self, max_power: u8, area: f32) -> u8 {
        let (Some(&smallest), Some(&largest)) = (self.class_powers.first(), self.class_powers.last()) else {
            return max_power;
        };
        let cap = self
            .class_powers
            .iter()
            .copied()
            .take_while(|&power| power <= max_power)
            .last()
            .unwrap_or(smallest);
        let covering = self
            .class_powers
            .iter()
            .copied()
            .find(|&power| texel_area(power) >= area)
            .unwrap_or(largest);

        covering.min(cap)
    }

    fn mark_used(&mut self, fragment: usize) {
        self.lru.move_to_tail(fragment);
        self.fragments[fragment].frame_used = Some(self.current_frame);
    }

    fn release_fragment(&mut self, fragment: usize) {
        self.fragments[fragment].texture = None;
        self.lru.move_to_head(fragment);
    }
}

fn texel_area(power: u8) -> f32 {
    let edge = (1_u32 << power) as f32;
    edge * edge
}

/// Lays out every class's fragments in whole blocks, in table order.
fn build_fragments(config: &AtlasConfig) -> Vec<Fragment> {
    let blocks_per_row = config.blocks_per_row();
    let mut fragments = Vec::new();
    let mut next_block = 0;

    for class in &config.classes {
        let fragment_size = 1_u32 << class.power;
        let per_row = config.block_size / fragment_size;
        let per_block = per_row * per_row;

        for i in 0..class.fragments {
            let block = next_block + i / per_block;
            let local = i % per_block;

            let block_offset = UVec2::new(block % blocks_per_row, block / blocks_per_row) * config.block_size;
            let offset = block_offset + UVec2::new(local % per_row, local / per_row) * fragment_size;

            fragments.push(Fragment {
                rect: ShadowRect {
                    offset,
                    size: fragment_size,
                },
                power: class.power,
                texture: None,
                frame_used: None,
            });
        }

        next_block += config.blocks_for(class);
    }

    fragments
}

#[cfg(test)]
mod tests {
    use penumbra_types::RawShadowTextureHandle;

    use super::ShadowAtlas;
    use crate::config::{AtlasConfig, SizeClassConfig};

    /// Classes {16, 8, 4, 2}, two fragments each.
    fn toy_atlas() -> ShadowAtlas {
        ShadowAtlas::new(AtlasConfig {
            size: 64,
            block_size: 16,
            min_power: 1,
            max_power: 4,
            classes: [4, 3, 2, 1]
                .into_iter()
                .map(|power| SizeClassConfig { power, fragments: 2 })
                .collect(),
        })
        .unwrap()
    }

    fn assert_no_overlap(atlas: &ShadowAtlas, handles: &[RawShadowTextureHandle]) {
        let rects: Vec<_> = handles.iter().filter_map(|&h| atlas.rect(h)).collect();
        for (i, a) in rects.iter().enumerate() {
            assert!(a.x() + a.width() <= atlas.size());
            assert!(a.y() + a.height() <= atlas.size());
            for b in &rects[i + 1..] {
                assert!(!a.overlaps(b), "{:?} overlaps {:?}", a, b);
            }
        }
    }

    #[test]
    fn allocate_clamps_and_rounds() {
        let mut atlas = toy_atlas();
        let tiny = atlas.allocate(1);
        let odd = atlas.allocate(5);
        let huge = atlas.allocate(4096);
        assert_eq!(atlas.desired_power(tiny), 1);
        assert_eq!(atlas.desired_power(odd), 3);
        assert_eq!(atlas.desired_power(huge), 4);
        assert!(!atlas.has_valid_texture(tiny));
        assert_eq!(atlas.rect(tiny), None);
    }

    #[test]
    fn overflow_falls_back_to_smaller_class() {
        let mut atlas = toy_atlas();
        let h: Vec<_> = (0..3).map(|_| atlas.allocate(8)).collect();

        assert!(atlas.use_texture(h[0], false, 64.0));
        assert!(atlas.use_texture(h[1], false, 64.0));
        assert!(atlas.use_texture(h[2], false, 64.0));

        assert_eq!(atlas.bound_power(h[0]), Some(3));
        assert_eq!(atlas.bound_power(h[1]), Some(3));
        assert_eq!(atlas.bound_power(h[2]), Some(2));
        assert_ne!(atlas.rect(h[0]), atlas.rect(h[1]));
        assert_no_overlap(&atlas, &h);

        atlas.advance_frame();

        assert!(!atlas.use_texture(h[0], false, 64.0));
        assert!(!atlas.use_texture(h[1], false, 64.0));
        assert!(!atlas.use_texture(h[2], false, 64.0));
        assert_eq!(atlas.bound_power(h[2]), Some(2));
    }

    #[test]
    fn second_use_in_frame_is_a_hit() {
        let mut atlas = toy_atlas();
        let h = atlas.allocate(16);
        assert!(atlas.use_texture(h, false, 200.0));
        let rect = atlas.rect(h);
        assert!(!atlas.use_texture(h, false, 200.0));
        assert_eq!(atlas.rect(h), rect);
    }

    #[test]
    fn lru_evicts_oldest_first() {
        let mut atlas = toy_atlas();
        let old: Vec<_> = (0..2).map(|_| atlas.allocate(8)).collect();
        for &h in &old {
            assert!(atlas.use_texture(h, false, 64.0));
        }

        atlas.advance_frame();

        let new: Vec<_> = (0..2).map(|_| atlas.allocate(8)).collect();
        assert!(atlas.use_texture(new[0], false, 64.0));
        assert!(!atlas.has_valid_texture(old[0]));
        assert!(atlas.has_valid_texture(old[1]));

        assert!(atlas.use_texture(new[1], false, 64.0));
        assert!(!atlas.has_valid_texture(old[1]));
    }

    #[test]
    fn touched_fragments_survive_eviction() {
        let mut atlas = toy_atlas();
        let a = atlas.allocate(8);
        let b = atlas.allocate(8);
        atlas.use_texture(a, false, 64.0);
        atlas.use_texture(b, false, 64.0);

        atlas.advance_frame();
        // a becomes most recently used, so b is the one to go.
        assert!(!atlas.use_texture(a, false, 64.0));
        let c = atlas.allocate(8);
        atlas.advance_frame();
        assert!(atlas.use_texture(c, false, 64.0));
        assert!(atlas.has_valid_texture(a));
        assert!(!atlas.has_valid_texture(b));
    }

    #[test]
    fn never_downgrades_on_shrinking_area() {
        let mut atlas = toy_atlas();
        let h = atlas.allocate(16);
        assert!(atlas.use_texture(h, false, 256.0));
        assert_eq!(atlas.bound_power(h), Some(4));

        for area in [64.0, 16.0, 4.0] {
            atlas.advance_frame();
            assert!(!atlas.use_texture(h, true, area));
            assert_eq!(atlas.bound_power(h), Some(4));
        }
    }

    #[test]
    fn upgrades_when_area_grows_past_hysteresis() {
        let mut atlas = toy_atlas();
        let h = atlas.allocate(16);
        assert!(atlas.use_texture(h, false, 4.0));
        assert_eq!(atlas.bound_power(h), Some(1));

        // One class up is within hysteresis.
        atlas.advance_frame();
        assert!(!atlas.use_texture(h, false, 16.0));
        assert_eq!(atlas.bound_power(h), Some(1));

        // Forced redraws skip hysteresis.
        atlas.advance_frame();
        assert!(atlas.use_texture(h, true, 16.0));
        assert_eq!(atlas.bound_power(h), Some(2));

        // Two classes up always moves.
        atlas.advance_frame();
        assert!(atlas.use_texture(h, false, 256.0));
        assert_eq!(atlas.bound_power(h), Some(4));
    }

    #[test]
    fn exhaustion_reports_no_texture() {
        let mut atlas = toy_atlas();
        let h: Vec<_> = (0..9).map(|_| atlas.allocate(16)).collect();
        for &handle in &h[..8] {
            assert!(atlas.use_texture(handle, false, 256.0));
        }
        assert!(!atlas.use_texture(h[8], false, 256.0));
        assert!(!atlas.has_valid_texture(h[8]));
        assert_no_overlap(&atlas, &h);

        // Next frame everything is evictable again.
        atlas.advance_frame();
        assert!(atlas.use_texture(h[8], false, 256.0));
    }

    #[test]
    fn deallocate_returns_fragment_to_cold_end() {
        let mut atlas = toy_atlas();
        let a = atlas.allocate(8);
        let b = atlas.allocate(8);
        atlas.use_texture(a, false, 64.0);
        atlas.use_texture(b, false, 64.0);
        let b_rect = atlas.rect(b);

        atlas.advance_frame();
        atlas.use_texture(a, false, 64.0);
        atlas.deallocate(b);

        let c = atlas.allocate(8);
        assert!(atlas.use_texture(c, false, 64.0));
        assert_eq!(atlas.rect(c), b_rect);
        assert!(atlas.has_valid_texture(a));
    }

    #[test]
    #[should_panic(expected = "after it was deallocated")]
    fn use_after_deallocate_panics() {
        let mut atlas = toy_atlas();
        let h = atlas.allocate(8);
        atlas.deallocate(h);
        atlas.use_texture(h, false, 64.0);
    }

    #[test]
    fn default_atlas_never_overlaps() {
        let mut atlas = ShadowAtlas::new(AtlasConfig::default()).unwrap();
        let handles: Vec<_> = (0..500).map(|i| atlas.allocate(16 << (i % 5))).collect();
        for frame in 0..4_u32 {
            for (i, &h) in handles.iter().enumerate() {
                let area = ((i as u32 * 37 + frame * 11) % 300) as f32 * 200.0;
                atlas.use_texture(h, frame % 2 == 0, area);
            }
            assert_no_overlap(&atlas, &handles);
            atlas.advance_frame();
        }
    }

    #[test]
    fn small_tables_keep_hysteresis_at_the_top_class() {
        let mut atlas = toy_atlas();
        let h = atlas.allocate(16);
        assert!(atlas.use_texture(h, false, 64.0));
        assert_eq!(atlas.bound_power(h), Some(3));

        atlas.advance_frame();
        assert!(!atlas.use_texture(h, false, 256.0));
        assert_eq!(atlas.bound_power(h), Some(3));
    }

    #[test]
    fn same_frame_requests_never_evict_each_other() {
        let mut atlas = ShadowAtlas::new(AtlasConfig {
            size: 16,
            block_size: 16,
            min_power: 3,
            max_power: 3,
            classes: vec![SizeClassConfig { power: 3, fragments: 2 }],
        })
        .unwrap();
        let h: Vec<_> = (0..3).map(|_| atlas.allocate(8)).collect();

        atlas.advance_frame();
        assert!(atlas.use_texture(h[0], false, 64.0));
        assert!(atlas.use_texture(h[1], false, 64.0));
        let rects = [atlas.rect(h[0]), atlas.rect(h[1])];

        assert!(!atlas.use_texture(h[2], false, 64.0));
        assert!(!atlas.has_valid_texture(h[2]));
        assert_eq!([atlas.rect(h[0]), atlas.rect(h[1])], rects);

        // The stale pair is fair game one frame later, least recently used first.
        atlas.advance_frame();
        assert!(atlas.use_texture(h[2], false, 64.0));
        assert_eq!(atlas.rect(h[2]), rects[0]);
        assert!(!atlas.has_valid_texture(h[0]));
        assert!(atlas.has_valid_texture(h[1]));
    }

    #[test]
    fn gapped_tables_pick_the_covering_class() {
        let mut atlas = ShadowAtlas::new(AtlasConfig {
            size: 512,
            block_size: 256,
            min_power: 4,
            max_power: 8,
            classes: [8, 6, 4]
                .into_iter()
                .map(|power| SizeClassConfig { power, fragments: 2 })
                .collect(),
        })
        .unwrap();

        let h = atlas.allocate(256);
        assert!(atlas.use_texture(h, false, 1000.0));
        assert_eq!(atlas.bound_power(h), Some(6));

        // Capped at the largest class the texture may have.
        let small = atlas.allocate(32);
        assert!(atlas.use_texture(small, false, 1000.0));
        assert_eq!(atlas.bound_power(small), Some(4));

        let big = atlas.allocate(256);
        assert!(atlas.use_texture(big, false, 10.0));
        assert_eq!(atlas.bound_power(big), Some(4));
    }

    #[test]
    fn gapped_partial_layout_never_overlaps() {
        let mut atlas = ShadowAtlas::new(AtlasConfig {
            size: 64,
            block_size: 32,
            min_power: 1,
            max_power: 5,
            classes: vec![
                SizeClassConfig { power: 5, fragments: 1 },
                SizeClassConfig { power: 3, fragments: 20 },
                SizeClassConfig { power: 1, fragments: 3 },
            ],
        })
        .unwrap();
        let handles: Vec<_> = (0..30).map(|i| atlas.allocate(2 << (i % 5))).collect();
        for frame in 0..3_u32 {
            for (i, &h) in handles.iter().enumerate() {
                let area = ((i as u32 * 13 + frame * 7) % 40) as f32 * 30.0;
                atlas.use_texture(h, frame == 1, area);
            }
            assert_no_overlap(&atlas, &handles);
            atlas.advance_frame();
        }
        let fragments: Vec<_> = atlas.usage().iter().map(|class| (class.power, class.fragments)).collect();
        assert_eq!(fragments, [(5, 1), (3, 20), (1, 3)]);
    }

    #[test]
    fn exhaustion_warning_needs_a_texture_left_without_fragment() {
        let mut atlas = ShadowAtlas::new(AtlasConfig {
            size: 32,
            block_size: 16,
            min_power: 2,
            max_power: 4,
            classes: vec![
                SizeClassConfig { power: 4, fragments: 1 },
                SizeClassConfig { power: 2, fragments: 1 },
            ],
        })
        .unwrap();
        let big = atlas.allocate(16);
        let small = atlas.allocate(4);
        assert!(atlas.use_texture(big, false, 256.0));
        assert!(atlas.use_texture(small, false, 16.0));

        // Nothing at or below 4 texels is free, but big keeps what it has.
        atlas.advance_frame();
        assert!(!atlas.use_texture(small, false, 16.0));
        assert!(!atlas.use_texture(big, true, 4.0));
        assert_eq!(atlas.bound_power(big), Some(4));
        assert!(!atlas.warned_exhausted);

        let late = atlas.allocate(4);
        assert!(!atlas.use_texture(late, false, 16.0));
        assert!(!atlas.has_valid_texture(late));
        assert!(atlas.warned_exhausted);

        atlas.reset();
        assert!(atlas.warned_exhausted);
    }

    #[test]
    fn reset_unbinds_everything() {
        let mut atlas = toy_atlas();
        let h = atlas.allocate(8);
        atlas.use_texture(h, false, 64.0);
        let frame = atlas.current_frame();
        atlas.reset();
        assert_eq!(atlas.texture_count(), 0);
        assert_eq!(atlas.current_frame(), frame);
        assert!(atlas.usage().iter().all(|class| class.bound == 0));
    }
}
