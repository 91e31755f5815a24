use glam::Vec3;
use penumbra_types::{CasterId, LeafId, RawShadowHandle, ShadowRect, ShadowTechnique};
use smallvec::SmallVec;

use crate::{
    atlas::ShadowAtlas,
    config::{validate_direction, validate_distance, ShadowCacheConfig},
    error::ShadowCacheError,
    scanner::{BlobbyCandidate, PriorityScanner, ShadowView},
    scene::ShadowScene,
    scheduler::{DirtyScheduler, ProcessStats, ProjectionSettings},
    shadow::{InternalShadow, ShadowDescriptor, ShadowFlags, ShadowProjection, ShadowRegistry},
};

/// A shadow with a valid atlas rectangle this view.
#[derive(Debug, Clone, PartialEq)]
pub struct ShadowDraw {
    pub shadow: RawShadowHandle,
    pub caster: CasterId,
    pub rect: ShadowRect,
    pub projection: ShadowProjection,
    /// Casters of child shadows, drawn into the same rectangle.
    pub children: SmallVec<[CasterId; 4]>,
}

/// What a view has to do with its shadows this frame.
#[derive(Debug, Default, Clone)]
pub struct ShadowFramePlan {
    /// Rectangles that must be rendered before they are sampled. Largest first.
    pub redraw: Vec<ShadowDraw>,
    /// Rectangles whose pixels are still valid.
    pub cached: Vec<ShadowDraw>,
    /// Render to texture shadows that got no usable texture this frame.
    pub fallback: Vec<RawShadowHandle>,
    pub blobby: Vec<BlobbyCandidate>,
}

/// Owns the shadow cache of one level: every shadow, the atlas their textures
/// live in, the dirty scheduler and the per-frame scanner.
///
/// Create one at level load and drop it at level unload.
#[derive(Debug)]
pub struct ShadowManager {
    config: ShadowCacheConfig,
    atlas: ShadowAtlas,
    scheduler: DirtyScheduler,
    scanner: PriorityScanner,
    shadows: ShadowRegistry,
    redraws_this_frame: u32,
}

impl ShadowManager {
    pub fn new(config: ShadowCacheConfig) -> Result<Self, ShadowCacheError> {
        profiling::scope!("ShadowManager::new");

        config.validate()?;
        let atlas = ShadowAtlas::new(config.atlas.clone())?;
        let scheduler = DirtyScheduler::new(projection_settings(&config), config.half_rate);

        log::debug!(
            "Created shadow manager: {}x{} atlas, {} redraws per frame",
            config.atlas.size,
            config.atlas.size,
            config.max_redraws_per_frame
        );

        Ok(Self {
            config,
            atlas,
            scheduler,
            scanner: PriorityScanner::new(),
            shadows: ShadowRegistry::new(),
            redraws_this_frame: 0,
        })
    }

    pub fn config(&self) -> &ShadowCacheConfig {
        &self.config
    }

    pub fn atlas(&self) -> &ShadowAtlas {
        &self.atlas
    }

    pub fn scheduler(&self) -> &DirtyScheduler {
        &self.scheduler
    }

    pub fn shadow(&self, handle: RawShadowHandle) -> Option<&InternalShadow> {
        self.shadows.get(handle)
    }

    pub fn shadow_of(&self, caster: CasterId) -> Option<RawShadowHandle> {
        self.shadows.handle_of(caster)
    }

    pub fn shadow_count(&self) -> usize {
        self.shadows.len()
    }

    pub fn redraws_this_frame(&self) -> u32 {
        self.redraws_this_frame
    }

    /// Registers the shadow of `caster`. It is projected by the next
    /// [`update_dirty_shadows`](Self::update_dirty_shadows).
    pub fn create_shadow(&mut self, caster: CasterId, desc: ShadowDescriptor) -> RawShadowHandle {
        assert!(
            self.shadows.handle_of(caster).is_none(),
            "caster {:?} already has a shadow",
            caster
        );

        let mut shadow = InternalShadow::new(caster, desc);
        if desc.technique == ShadowTechnique::RenderToTexture {
            shadow.texture = Some(self.atlas.allocate(desc.texture_size));
        }
        let handle = self.shadows.insert(shadow);
        self.scheduler.mark_dirty(handle, true);
        handle
    }

    pub fn destroy_shadow(&mut self, handle: RawShadowHandle) {
        assert!(
            self.shadows.contains(handle),
            "destroying shadow {:?} which does not exist",
            handle
        );
        self.scheduler.destroy(handle);
        self.release_shadow(handle);
    }

    pub fn set_shadow_technique(&mut self, handle: RawShadowHandle, technique: ShadowTechnique) {
        let shadow = self.shadow_mut(handle);
        if shadow.technique == technique {
            return;
        }
        shadow.technique = technique;

        let size = shadow.texture_size;
        let wants_texture = technique == ShadowTechnique::RenderToTexture;
        match (shadow.texture, wants_texture) {
            (Some(texture), false) => {
                shadow.texture = None;
                self.atlas.deallocate(texture);
            }
            (None, true) => {
                let texture = self.atlas.allocate(size);
                self.shadow_mut(handle).texture = Some(texture);
            }
            _ => {}
        }

        self.scheduler.mark_dirty(handle, true);
    }

    /// Makes `child` render into the texture of `parent` instead of its own.
    pub fn set_shadow_parent(&mut self, child: RawShadowHandle, parent: Option<RawShadowHandle>) {
        if let Some(parent) = parent {
            let mut ancestor = Some(parent);
            while let Some(current) = ancestor {
                assert_ne!(current, child, "parenting shadow {:?} to {:?} creates a cycle", child, parent);
                ancestor = self.shadow_mut(current).parent;
            }
        }

        if let Some(old) = self.shadow_mut(child).parent.take() {
            self.shadow_mut(old).children.retain(|c| *c != child);
            self.scheduler.mark_dirty(old, true);
        }
        if let Some(parent) = parent {
            self.shadow_mut(parent).children.push(child);
        }
        self.shadow_mut(child).parent = parent;

        self.scheduler.set_parent(child, parent);
        self.scheduler.mark_dirty(child, true);
    }

    /// Safe to call from any thread.
    pub fn mark_dirty(&self, handle: RawShadowHandle, force: bool) {
        self.scheduler.mark_dirty(handle, force);
    }

    /// Marks the shadow of `caster` dirty, if it has one.
    pub fn mark_caster_dirty(&self, caster: CasterId, force: bool) -> bool {
        match self.shadows.handle_of(caster) {
            Some(handle) => {
                self.scheduler.mark_dirty(handle, force);
                true
            }
            None => false,
        }
    }

    pub fn set_half_rate(&mut self, half_rate: bool) {
        self.config.half_rate = half_rate;
        self.scheduler.set_half_rate(half_rate);
    }

    pub fn set_shadow_direction(&mut self, direction: Vec3) -> Result<(), ShadowCacheError> {
        validate_direction(direction)?;
        self.config.shadow_direction = direction;
        self.apply_projection_settings();
        Ok(())
    }

    pub fn set_max_shadow_distance(&mut self, distance: f32) -> Result<(), ShadowCacheError> {
        validate_distance(distance)?;
        self.config.max_shadow_distance = distance;
        self.apply_projection_settings();
        Ok(())
    }

    /// Brings projections of dirty shadows up to date.
    ///
    /// `visit` sees every processed shadow and may destroy shadows through the
    /// scheduler; their storage is released once the walk is over.
    pub fn update_dirty_shadows<F>(&mut self, scene: &dyn ShadowScene, visit: F) -> ProcessStats
    where
        F: FnMut(&mut DirtyScheduler, RawShadowHandle),
    {
        let stats = self.scheduler.process(&mut self.shadows, scene, visit);
        for &handle in &stats.destroyed {
            if self.shadows.contains(handle) {
                self.release_shadow(handle);
            }
        }
        stats
    }

    /// Decides which shadows `view` draws, reuses or drops this frame.
    ///
    /// Views of the same frame are planned in turn; a shadow goes to the first
    /// view that sees it.
    pub fn plan_view(&mut self, view: &ShadowView, leaves: &[LeafId], scene: &dyn ShadowScene) -> ShadowFramePlan {
        profiling::scope!("ShadowManager::plan_view");

        let candidates = self.scanner.find(view, leaves, scene, &self.shadows);
        let mut plan = ShadowFramePlan {
            blobby: candidates.blobby,
            ..Default::default()
        };

        for candidate in candidates.render_to_texture {
            let Some(shadow) = self.shadows.get(candidate.shadow) else {
                continue;
            };
            let force = shadow.needs_redraw();

            let new_fragment = self.atlas.use_texture(candidate.texture, force, candidate.area);
            let (Some(rect), Some(projection)) = (self.atlas.rect(candidate.texture), shadow.projection) else {
                plan.fallback.push(candidate.shadow);
                continue;
            };

            let draw = ShadowDraw {
                shadow: candidate.shadow,
                caster: shadow.caster,
                rect,
                projection,
                children: self.child_casters(candidate.shadow),
            };

            if !(new_fragment || force) {
                plan.cached.push(draw);
                continue;
            }

            let under_cap = self.redraws_this_frame < self.config.max_redraws_per_frame;
            let Some(shadow) = self.shadows.get_mut(candidate.shadow) else {
                continue;
            };
            if under_cap {
                shadow.flags.remove(ShadowFlags::TEXTURE_DIRTY);
                self.redraws_this_frame += 1;
                plan.redraw.push(draw);
            } else {
                // The fragment may hold someone else's pixels now.
                shadow.flags.insert(ShadowFlags::TEXTURE_DIRTY);
                plan.fallback.push(candidate.shadow);
            }
        }

        log::trace!(
            "Shadow plan: {} redraw, {} cached, {} fallback, {} blobby",
            plan.redraw.len(),
            plan.cached.len(),
            plan.fallback.len(),
            plan.blobby.len()
        );

        plan
    }

    /// Starts a new rendered frame. Call once per frame, before planning any view.
    pub fn advance_frame(&mut self) {
        self.atlas.advance_frame();
        self.scanner.advance_frame();
        self.redraws_this_frame = 0;
    }

    /// Drops every shadow and unbinds the whole atlas. The frame counter keeps counting.
    pub fn reset(&mut self) {
        profiling::scope!("ShadowManager::reset");

        self.atlas.reset();
        self.shadows.clear();
        self.scheduler = DirtyScheduler::new(projection_settings(&self.config), self.config.half_rate);
        self.scanner.advance_frame();
        self.redraws_this_frame = 0;

        log::debug!("Shadow manager reset");
    }

    fn shadow_mut(&mut self, handle: RawShadowHandle) -> &mut InternalShadow {
        match self.shadows.get_mut(handle) {
            Some(shadow) => shadow,
            None => panic!("shadow {:?} does not exist", handle),
        }
    }

    fn child_casters(&self, handle: RawShadowHandle) -> SmallVec<[CasterId; 4]> {
        let mut casters = SmallVec::new();
        let mut stack: SmallVec<[RawShadowHandle; 4]> = SmallVec::new();
        if let Some(shadow) = self.shadows.get(handle) {
            stack.extend(shadow.children.iter().copied());
        }
        while let Some(child) = stack.pop() {
            if let Some(shadow) = self.shadows.get(child) {
                casters.push(shadow.caster);
                stack.extend(shadow.children.iter().copied());
            }
        }
        casters
    }

    /// Frees everything a shadow owns once the scheduler has let go of it.
    fn release_shadow(&mut self, handle: RawShadowHandle) {
        let Some(shadow) = self.shadows.remove(handle) else {
            return;
        };

        if let Some(texture) = shadow.texture {
            self.atlas.deallocate(texture);
        }
        self.scanner.forget(handle);

        if let Some(parent) = shadow.parent.and_then(|p| self.shadows.get_mut(p)) {
            parent.children.retain(|c| *c != handle);
            parent.flags |= ShadowFlags::TEXTURE_DIRTY;
        }
        for child in shadow.children {
            if let Some(child_shadow) = self.shadows.get_mut(child) {
                child_shadow.parent = None;
                self.scheduler.set_parent(child, None);
                self.scheduler.mark_dirty(child, true);
            }
        }
    }

    fn apply_projection_settings(&mut self) {
        self.scheduler.set_settings(projection_settings(&self.config));
        for (handle, _) in self.shadows.iter() {
            self.scheduler.mark_dirty(handle, true);
        }
    }
}

fn projection_settings(config: &ShadowCacheConfig) -> ProjectionSettings {
    ProjectionSettings {
        direction: config.shadow_direction.normalize(),
        max_distance: config.max_shadow_distance,
    }
}

#[cfg(test)]
mod tests {
    use glam::{Mat4, UVec2, Vec3, Vec3A};
    use penumbra_types::{
        Aabb, Camera, CameraProjection, CasterFlags, CasterId, Handedness, LeafId, RenderTransform, ShadowTechnique,
    };

    use super::ShadowManager;
    use crate::{
        config::{AtlasConfig, ShadowCacheConfig, SizeClassConfig},
        error::ShadowCacheError,
        scanner::ShadowView,
        scene::ShadowScene,
        shadow::{ShadowDescriptor, ShadowFlags},
        util::typedefs::FastHashMap,
    };

    #[derive(Default)]
    struct Scene {
        origins: FastHashMap<CasterId, Vec3>,
        flags: FastHashMap<CasterId, CasterFlags>,
    }

    impl ShadowScene for Scene {
        fn candidate_casters(&self, _view: &ShadowView, _leaves: &[LeafId]) -> Vec<CasterId> {
            let mut casters: Vec<_> = self.origins.keys().copied().collect();
            casters.sort();
            casters
        }

        fn shadow_bounds(&self, _caster: CasterId, _technique: ShadowTechnique) -> Aabb {
            Aabb::new(Vec3::splat(-0.5), Vec3::splat(0.5))
        }

        fn render_transform(&self, caster: CasterId) -> RenderTransform {
            RenderTransform::from_origin(self.origins[&caster])
        }

        fn caster_flags(&self, caster: CasterId) -> CasterFlags {
            self.flags.get(&caster).copied().unwrap_or_default()
        }
    }

    fn config(max_redraws_per_frame: u32) -> ShadowCacheConfig {
        ShadowCacheConfig {
            atlas: AtlasConfig {
                size: 64,
                block_size: 32,
                min_power: 3,
                max_power: 5,
                classes: vec![
                    SizeClassConfig { power: 5, fragments: 1 },
                    SizeClassConfig { power: 4, fragments: 4 },
                    SizeClassConfig { power: 3, fragments: 16 },
                ],
            },
            max_redraws_per_frame,
            ..Default::default()
        }
    }

    fn view() -> ShadowView {
        ShadowView::new(
            Camera {
                projection: CameraProjection::Perspective { vfov: 60.0, near: 0.1 },
                view: Mat4::look_at_lh(Vec3::new(0.0, 5.0, -20.0), Vec3::ZERO, Vec3::Y),
            },
            Handedness::Left,
            UVec2::new(640, 480),
        )
    }

    fn scene(count: u64) -> Scene {
        let mut scene = Scene::default();
        for i in 0..count {
            scene.origins.insert(CasterId(i), Vec3::new(i as f32 * 2.0 - 4.0, 0.0, 0.0));
        }
        scene
    }

    #[test]
    fn first_frame_redraws_then_caches() {
        let scene = scene(3);
        let mut manager = ShadowManager::new(config(24)).unwrap();
        for i in 0..3 {
            manager.create_shadow(CasterId(i), ShadowDescriptor::default());
        }
        manager.update_dirty_shadows(&scene, |_, _| {});

        manager.advance_frame();
        let plan = manager.plan_view(&view(), &[], &scene);
        assert_eq!(plan.redraw.len(), 3);
        assert!(plan.cached.is_empty());

        manager.advance_frame();
        let plan = manager.plan_view(&view(), &[], &scene);
        assert!(plan.redraw.is_empty());
        assert_eq!(plan.cached.len(), 3);
    }

    #[test]
    fn redraw_cap_falls_back_and_stays_dirty() {
        let scene = scene(3);
        let mut manager = ShadowManager::new(config(2)).unwrap();
        let handles: Vec<_> = (0..3)
            .map(|i| manager.create_shadow(CasterId(i), ShadowDescriptor::default()))
            .collect();
        manager.update_dirty_shadows(&scene, |_, _| {});

        manager.advance_frame();
        let plan = manager.plan_view(&view(), &[], &scene);
        assert_eq!(plan.redraw.len(), 2);
        assert_eq!(plan.fallback.len(), 1);
        assert_eq!(manager.redraws_this_frame(), 2);
        let skipped = plan.fallback[0];
        assert!(manager.shadow(skipped).unwrap().flags.contains(ShadowFlags::TEXTURE_DIRTY));

        manager.advance_frame();
        let plan = manager.plan_view(&view(), &[], &scene);
        assert_eq!(plan.redraw.len(), 1);
        assert_eq!(plan.redraw[0].shadow, skipped);
        assert!(handles.contains(&skipped));
    }

    #[test]
    fn translucent_casters_redraw_every_frame() {
        let mut scene = scene(1);
        scene.flags.insert(CasterId(0), CasterFlags::TRANSLUCENT);
        let mut manager = ShadowManager::new(config(24)).unwrap();
        manager.create_shadow(CasterId(0), ShadowDescriptor::default());

        for _ in 0..3 {
            manager.update_dirty_shadows(&scene, |_, _| {});
            manager.advance_frame();
            let plan = manager.plan_view(&view(), &[], &scene);
            assert_eq!(plan.redraw.len(), 1);
        }
    }

    #[test]
    fn blobby_shadows_skip_the_atlas() {
        let scene = scene(2);
        let mut manager = ShadowManager::new(config(24)).unwrap();
        manager.create_shadow(
            CasterId(0),
            ShadowDescriptor {
                technique: ShadowTechnique::Blobby,
                texture_size: 64,
            },
        );
        let rtt = manager.create_shadow(CasterId(1), ShadowDescriptor::default());
        manager.update_dirty_shadows(&scene, |_, _| {});

        manager.advance_frame();
        let plan = manager.plan_view(&view(), &[], &scene);
        assert_eq!(plan.blobby.len(), 1);
        assert_eq!(plan.redraw.len(), 1);
        assert_eq!(manager.atlas().texture_count(), 1);

        manager.set_shadow_technique(rtt, ShadowTechnique::None);
        assert_eq!(manager.atlas().texture_count(), 0);
        assert!(manager.shadow(rtt).unwrap().texture.is_none());
    }

    #[test]
    fn children_draw_into_parent() {
        let scene = scene(2);
        let mut manager = ShadowManager::new(config(24)).unwrap();
        let parent = manager.create_shadow(CasterId(0), ShadowDescriptor::default());
        let child = manager.create_shadow(CasterId(1), ShadowDescriptor::default());
        manager.set_shadow_parent(child, Some(parent));
        manager.update_dirty_shadows(&scene, |_, _| {});

        manager.advance_frame();
        let plan = manager.plan_view(&view(), &[], &scene);
        assert_eq!(plan.redraw.len(), 1);
        assert_eq!(plan.redraw[0].shadow, parent);
        assert_eq!(plan.redraw[0].children.as_slice(), &[CasterId(1)]);

        manager.destroy_shadow(parent);
        assert!(manager.shadow(child).unwrap().parent.is_none());
        assert!(manager.scheduler().is_dirty(child));
    }

    #[test]
    #[should_panic(expected = "creates a cycle")]
    fn parent_cycles_panic() {
        let mut manager = ShadowManager::new(config(24)).unwrap();
        let a = manager.create_shadow(CasterId(0), ShadowDescriptor::default());
        let b = manager.create_shadow(CasterId(1), ShadowDescriptor::default());
        manager.set_shadow_parent(b, Some(a));
        manager.set_shadow_parent(a, Some(b));
    }

    #[test]
    fn destroyed_during_update_is_released() {
        let scene = scene(2);
        let mut manager = ShadowManager::new(config(24)).unwrap();
        let a = manager.create_shadow(CasterId(0), ShadowDescriptor::default());
        let b = manager.create_shadow(CasterId(1), ShadowDescriptor::default());

        let stats = manager.update_dirty_shadows(&scene, |scheduler, handle| {
            if handle == a {
                scheduler.destroy(b);
            }
        });
        assert_eq!(stats.processed, 1);
        assert_eq!(stats.destroyed, vec![b]);
        assert!(manager.shadow(b).is_none());
        assert_eq!(manager.atlas().texture_count(), 1);
        assert_eq!(manager.shadow_of(CasterId(1)), None);
    }

    #[test]
    fn changing_direction_dirties_everything() {
        let scene = scene(2);
        let mut manager = ShadowManager::new(config(24)).unwrap();
        manager.create_shadow(CasterId(0), ShadowDescriptor::default());
        manager.create_shadow(CasterId(1), ShadowDescriptor::default());
        manager.update_dirty_shadows(&scene, |_, _| {});
        assert_eq!(manager.scheduler().dirty_count(), 0);

        manager.set_shadow_direction(Vec3::new(1.0, -1.0, 0.0)).unwrap();
        assert_eq!(manager.scheduler().dirty_count(), 2);
        manager.update_dirty_shadows(&scene, |_, _| {});
        let handle = manager.shadow_of(CasterId(0)).unwrap();
        let direction = manager.shadow(handle).unwrap().projection.unwrap().direction;
        assert!((direction - Vec3A::new(1.0, -1.0, 0.0).normalize()).length() < 1e-5);

        assert!(matches!(
            manager.set_max_shadow_distance(-1.0),
            Err(ShadowCacheError::InvalidDistance(_))
        ));
    }

    #[test]
    fn reset_forgets_everything() {
        let scene = scene(2);
        let mut manager = ShadowManager::new(config(24)).unwrap();
        manager.create_shadow(CasterId(0), ShadowDescriptor::default());
        manager.update_dirty_shadows(&scene, |_, _| {});
        manager.advance_frame();
        manager.plan_view(&view(), &[], &scene);
        let frame = manager.atlas().current_frame();

        manager.reset();
        assert_eq!(manager.shadow_count(), 0);
        assert_eq!(manager.atlas().texture_count(), 0);
        assert_eq!(manager.atlas().current_frame(), frame);
        assert_eq!(manager.scheduler().dirty_count(), 0);
    }
}
