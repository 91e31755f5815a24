use std::collections::BTreeMap;

use glam::{Quat, Vec3};
use penumbra::{
    types::{Aabb, CasterFlags, CasterId, LeafId, RenderTransform, ShadowTechnique},
    ShadowScene, ShadowView,
};

#[derive(Debug, Clone)]
pub struct TestCaster {
    pub transform: RenderTransform,
    /// Local bounds, used for every technique.
    pub bounds: Aabb,
    pub flags: CasterFlags,
    pub leaf: LeafId,
}

impl TestCaster {
    pub fn at(origin: Vec3) -> Self {
        Self {
            transform: RenderTransform::from_origin(origin),
            bounds: Aabb::new(Vec3::splat(-0.5), Vec3::splat(0.5)),
            flags: CasterFlags::empty(),
            leaf: LeafId(0),
        }
    }

    pub fn leaf(mut self, leaf: LeafId) -> Self {
        self.leaf = leaf;
        self
    }

    pub fn flags(mut self, flags: CasterFlags) -> Self {
        self.flags = flags;
        self
    }

    pub fn half_extents(mut self, half: Vec3) -> Self {
        self.bounds = Aabb::new(-half, half);
        self
    }
}

/// Scripted in-memory world. Casters are enumerated in id order, filtered by leaf.
#[derive(Debug, Default)]
pub struct TestScene {
    casters: BTreeMap<CasterId, TestCaster>,
}

impl TestScene {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, id: CasterId, caster: TestCaster) {
        self.casters.insert(id, caster);
    }

    pub fn remove(&mut self, id: CasterId) -> Option<TestCaster> {
        self.casters.remove(&id)
    }

    pub fn caster_mut(&mut self, id: CasterId) -> &mut TestCaster {
        match self.casters.get_mut(&id) {
            Some(caster) => caster,
            None => panic!("no test caster {:?}", id),
        }
    }

    pub fn translate(&mut self, id: CasterId, offset: Vec3) {
        self.caster_mut(id).transform.origin += offset;
    }

    pub fn rotate(&mut self, id: CasterId, rotation: Quat) {
        let transform = &mut self.caster_mut(id).transform;
        transform.rotation = rotation * transform.rotation;
    }

    fn caster(&self, id: CasterId) -> &TestCaster {
        match self.casters.get(&id) {
            Some(caster) => caster,
            None => panic!("no test caster {:?}", id),
        }
    }
}

impl ShadowScene for TestScene {
    fn candidate_casters(&self, _view: &ShadowView, leaves: &[LeafId]) -> Vec<CasterId> {
        self.casters
            .iter()
            .filter(|(_, caster)| leaves.is_empty() || leaves.contains(&caster.leaf))
            .map(|(&id, _)| id)
            .collect()
    }

    fn shadow_bounds(&self, caster: CasterId, _technique: ShadowTechnique) -> Aabb {
        self.caster(caster).bounds
    }

    fn render_transform(&self, caster: CasterId) -> RenderTransform {
        self.caster(caster).transform
    }

    fn caster_flags(&self, caster: CasterId) -> CasterFlags {
        self.caster(caster).flags
    }
}
