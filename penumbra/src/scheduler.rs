//! Tracks which shadows need their projection recomputed, and throttles that
//! work across frames.
//!
//! Shadows become dirty when their caster moves, when something forces them,
//! and every frame while their caster is translucent or animating. Insertion is
//! the only operation that may come from other threads, so only the dirty sets
//! sit behind a lock.
//!
//! While [`DirtyScheduler::process`] walks the dirty set, destroying a shadow is
//! queued and only applied once the walk is over.

use std::mem;

use glam::Vec3;
use parking_lot::Mutex;
use penumbra_types::{CasterFlags, RawShadowHandle};

use crate::{
    scene::ShadowScene,
    shadow::{compute_projection, InternalShadow, ShadowFlags, ShadowRegistry},
    util::typedefs::{FastHashMap, FastIndexMap, FastIndexSet},
};

/// Global parameters every shadow projection is built with.
#[derive(Debug, Copy, Clone, PartialEq)]
pub struct ProjectionSettings {
    pub direction: Vec3,
    pub max_distance: f32,
}

/// Outcome of one [`DirtyScheduler::process`] call.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct ProcessStats {
    /// Shadows whose projection was brought up to date.
    pub processed: usize,
    /// Shadows carried over to the next frame by half-rate mode.
    pub deferred: usize,
    /// Shadows that left the set without being processed because they were destroyed.
    pub dropped: usize,
    /// Shadows destroyed during the walk; their storage can now be released.
    pub destroyed: Vec<RawShadowHandle>,
}

#[derive(Debug, Default)]
struct DirtyState {
    /// Dirty shadows in arrival order, with whether they were forced.
    main: FastIndexMap<RawShadowHandle, bool>,
    /// Half-rate carry over from the previous frame, processed first.
    leftover: FastIndexMap<RawShadowHandle, bool>,
    /// Child to parent, for shadows rendered into another shadow's texture.
    parents: FastHashMap<RawShadowHandle, RawShadowHandle>,
}

impl DirtyState {
    fn insert(&mut self, handle: RawShadowHandle, force: bool) {
        if let Some(forced) = self.leftover.get_mut(&handle) {
            *forced |= force;
        } else {
            *self.main.entry(handle).or_insert(false) |= force;
        }
    }

    fn forget(&mut self, handle: RawShadowHandle) {
        self.main.shift_remove(&handle);
        self.leftover.shift_remove(&handle);
        self.parents.remove(&handle);
        self.parents.retain(|_, parent| *parent != handle);
    }
}

#[derive(Debug)]
pub struct DirtyScheduler {
    state: Mutex<DirtyState>,
    /// Shadows that must be dirty again next frame.
    persistent: Vec<RawShadowHandle>,
    pending_destroy: FastIndexSet<RawShadowHandle>,
    iterating: bool,
    half_rate: bool,
    settings: ProjectionSettings,
}

impl DirtyScheduler {
    pub fn new(settings: ProjectionSettings, half_rate: bool) -> Self {
        Self {
            state: Mutex::new(DirtyState::default()),
            persistent: Vec::new(),
            pending_destroy: FastIndexSet::default(),
            iterating: false,
            half_rate,
            settings,
        }
    }

    /// Queues a shadow for reprojection. `force` treats it as moved even if its
    /// transform is unchanged. Parents the shadow renders into are dirtied too.
    ///
    /// Safe to call from any thread.
    pub fn mark_dirty(&self, handle: RawShadowHandle, force: bool) {
        let mut state = self.state.lock();

        let mut next = Some(handle);
        let mut hops = 0;
        while let Some(current) = next {
            state.insert(current, force);
            next = state.parents.get(&current).copied();

            hops += 1;
            if hops > state.parents.len() {
                debug_assert!(next.is_none(), "shadow parent chain of {:?} has a cycle", handle);
                break;
            }
        }
    }

    pub fn is_dirty(&self, handle: RawShadowHandle) -> bool {
        let state = self.state.lock();
        state.main.contains_key(&handle) || state.leftover.contains_key(&handle)
    }

    /// Shadows waiting for reprojection, including half-rate leftovers.
    pub fn dirty_count(&self) -> usize {
        let state = self.state.lock();
        state.main.len() + state.leftover.len()
    }

    pub fn leftover_count(&self) -> usize {
        self.state.lock().leftover.len()
    }

    /// Dirty shadows in the order the next walk visits them.
    pub fn dirty_handles(&self) -> Vec<RawShadowHandle> {
        let state = self.state.lock();
        state.leftover.keys().chain(state.main.keys()).copied().collect()
    }

    pub fn set_parent(&mut self, child: RawShadowHandle, parent: Option<RawShadowHandle>) {
        let state = self.state.get_mut();
        match parent {
            Some(parent) => {
                state.parents.insert(child, parent);
            }
            None => {
                state.parents.remove(&child);
            }
        }
    }

    pub fn half_rate(&self) -> bool {
        self.half_rate
    }

    pub fn set_half_rate(&mut self, half_rate: bool) {
        if self.half_rate == half_rate {
            return;
        }
        log::debug!("Shadow projection updates at {} rate", if half_rate { "half" } else { "full" });

        self.half_rate = half_rate;
        if !half_rate {
            let state = self.state.get_mut();
            let leftover = mem::take(&mut state.leftover);
            let main = mem::replace(&mut state.main, leftover);
            for (handle, forced) in main {
                state.insert(handle, forced);
            }
        }
    }

    pub fn settings(&self) -> ProjectionSettings {
        self.settings
    }

    /// Changes the projection settings. Callers should force every shadow dirty.
    pub fn set_settings(&mut self, settings: ProjectionSettings) {
        self.settings = settings;
    }

    pub fn is_iterating(&self) -> bool {
        self.iterating
    }

    /// Removes a shadow from every set. During a walk this is deferred until
    /// the walk completes; the rest of the walk skips the shadow.
    pub fn destroy(&mut self, handle: RawShadowHandle) {
        if self.iterating {
            self.pending_destroy.insert(handle);
        } else {
            self.state.get_mut().forget(handle);
            self.persistent.retain(|&h| h != handle);
        }
    }

    /// Reprojects dirty shadows.
    ///
    /// `visit` is called after each shadow is brought up to date and may destroy
    /// shadows or mark more dirty through the scheduler it is given. Shadows
    /// marked during the walk are picked up next frame.
    pub fn process<F>(&mut self, shadows: &mut ShadowRegistry, scene: &dyn ShadowScene, mut visit: F) -> ProcessStats
    where
        F: FnMut(&mut DirtyScheduler, RawShadowHandle),
    {
        profiling::scope!("DirtyScheduler::process");

        let mut stats = ProcessStats::default();
        let walk = self.take_walk(&mut stats);

        self.iterating = true;
        for (handle, forced) in walk {
            if self.pending_destroy.contains(&handle) {
                stats.dropped += 1;
                continue;
            }
            let Some(shadow) = shadows.get_mut(handle) else {
                stats.dropped += 1;
                continue;
            };

            let outcome = update_shadow(shadow, scene, self.settings, forced);
            if outcome.texture_dirtied {
                dirty_parent_textures(shadows, handle);
            }
            if outcome.volatile {
                self.persistent.push(handle);
            }
            stats.processed += 1;

            visit(self, handle);
        }
        self.iterating = false;

        let persistent = mem::take(&mut self.persistent);
        let pending = mem::take(&mut self.pending_destroy);
        {
            let state = self.state.get_mut();
            for handle in persistent {
                if !pending.contains(&handle) {
                    state.insert(handle, false);
                }
            }
            for &handle in &pending {
                state.forget(handle);
            }
        }
        stats.destroyed = pending.into_iter().collect();

        log::trace!(
            "Reprojected {} shadows, deferred {}, dropped {}",
            stats.processed,
            stats.deferred,
            stats.dropped
        );

        stats
    }

    /// Takes this frame's share of the dirty set out of the lock.
    fn take_walk(&mut self, stats: &mut ProcessStats) -> Vec<(RawShadowHandle, bool)> {
        let state = self.state.get_mut();
        let main = mem::take(&mut state.main);

        if !self.half_rate {
            return main.into_iter().collect();
        }

        let leftover = mem::take(&mut state.leftover);
        let total = leftover.len() + main.len();
        let budget = ((total + 1) / 2).saturating_sub(leftover.len());

        let mut main: Vec<_> = main.into_iter().collect();
        let deferred = main.split_off(budget.min(main.len()));
        stats.deferred = deferred.len();
        state.leftover = deferred.into_iter().collect();

        leftover.into_iter().chain(main).collect()
    }
}

struct UpdateOutcome {
    texture_dirtied: bool,
    volatile: bool,
}

fn update_shadow(
    shadow: &mut InternalShadow,
    scene: &dyn ShadowScene,
    settings: ProjectionSettings,
    forced: bool,
) -> UpdateOutcome {
    let caster = shadow.caster;
    let transform = scene.render_transform(caster);
    let bounds = scene.shadow_bounds(caster, shadow.technique);

    if forced {
        shadow.last_transform = None;
    }

    let moved = shadow.last_transform != Some(transform);
    let rotated = shadow
        .last_transform
        .map_or(true, |last| last.rotation != transform.rotation);
    let reshaped = shadow.last_bounds != Some(bounds);

    if moved || reshaped || shadow.projection.is_none() {
        shadow.projection = Some(compute_projection(
            &bounds,
            transform,
            settings.direction,
            settings.max_distance,
        ));
        shadow.last_transform = Some(transform);
        shadow.last_bounds = Some(bounds);
    }

    // The texture holds the silhouette, which a translation does not change.
    let texture_dirtied = rotated || reshaped;
    if texture_dirtied {
        shadow.flags |= ShadowFlags::TEXTURE_DIRTY;
    }

    let volatile = scene
        .caster_flags(caster)
        .intersects(CasterFlags::TRANSLUCENT | CasterFlags::ANIMATING);
    shadow.flags.set(ShadowFlags::ALWAYS_DIRTY, volatile);

    UpdateOutcome {
        texture_dirtied,
        volatile,
    }
}

/// Children render into their parents, so a child's new pixels are the parent's too.
fn dirty_parent_textures(shadows: &mut ShadowRegistry, child: RawShadowHandle) {
    let mut next = shadows.get(child).and_then(|s| s.parent);
    let mut hops = 0;
    while let Some(parent) = next {
        let Some(shadow) = shadows.get_mut(parent) else {
            break;
        };
        shadow.flags |= ShadowFlags::TEXTURE_DIRTY;
        next = shadow.parent;

        hops += 1;
        if hops > shadows.len() {
            break;
        }
    }
}
