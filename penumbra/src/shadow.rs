//! Registered shadows and their cached projections.

use glam::{Mat4, Vec2, Vec3, Vec3A};
use penumbra_types::{Aabb, CasterId, RawShadowHandle, RawShadowTextureHandle, RenderTransform, ShadowTechnique};
use smallvec::SmallVec;

use crate::util::{
    freelist::{FreelistIndex, FreelistVec},
    typedefs::FastHashMap,
};

bitflags::bitflags! {
    /// Cache state of a shadow's texture.
    #[derive(Debug, Default, Copy, Clone, PartialEq, Eq, Hash)]
    pub struct ShadowFlags: u8 {
        /// Pixels are stale and must be redrawn the next time the shadow is used.
        const TEXTURE_DIRTY = 0b01;
        /// Pixels can never be trusted; redraw on every use.
        const ALWAYS_DIRTY  = 0b10;
    }
}

/// Describes a shadow at creation.
#[derive(Debug, Copy, Clone, PartialEq)]
pub struct ShadowDescriptor {
    pub technique: ShadowTechnique,
    /// Edge length the shadow texture would like, in texels.
    pub texture_size: u32,
}

impl Default for ShadowDescriptor {
    fn default() -> Self {
        Self {
            technique: ShadowTechnique::RenderToTexture,
            texture_size: 64,
        }
    }
}

/// Orthographic projection of a caster along the shadow direction.
#[derive(Debug, Copy, Clone, PartialEq)]
pub struct ShadowProjection {
    /// Center of the caster's near face, as seen from the shadow direction.
    pub origin: Vec3A,
    pub direction: Vec3A,
    /// Half size of the projected caster, perpendicular to `direction`.
    pub extents: Vec2,
    /// Depth of the caster along `direction`.
    pub depth: f32,
    /// How far the shadow reaches past the caster.
    pub max_distance: f32,
    /// Caster bounds in world space.
    pub world_bounds: Aabb,
    /// Maps world space into [0, 1] texture space of the shadow's rectangle.
    pub world_to_texture: Mat4,
}

impl ShadowProjection {
    /// Caster bounds swept along the shadow direction, covering every receiver
    /// the shadow could land on.
    pub fn swept_bounds(&self) -> Aabb {
        let reach = self.direction * (self.depth + self.max_distance);
        self.world_bounds.union(&self.world_bounds.translate(reach))
    }
}

/// Builds the projection of a caster with `local_bounds` placed at `transform`.
pub fn compute_projection(
    local_bounds: &Aabb,
    transform: RenderTransform,
    direction: Vec3,
    max_distance: f32,
) -> ShadowProjection {
    let direction = direction.normalize();
    let world_bounds = local_bounds.transform(transform.to_mat4());

    let up = if direction.y.abs() > 0.99 { Vec3::Z } else { Vec3::Y };
    let light_view = Mat4::look_at_lh(Vec3::ZERO, direction, up);
    let light_bounds = world_bounds.transform(light_view);

    let extents = Vec2::new(light_bounds.half_extents().x, light_bounds.half_extents().y).max(Vec2::splat(1e-4));
    let depth = (light_bounds.max.z - light_bounds.min.z).max(1e-4);
    let center = light_bounds.center();
    let near_center = Vec3::new(center.x, center.y, light_bounds.min.z);
    let origin = light_view.inverse().transform_point3(near_center);

    let to_unit = Mat4::from_translation(Vec3::new(0.5, 0.5, 0.0))
        * Mat4::from_scale(Vec3::new(0.5 / extents.x, 0.5 / extents.y, 1.0 / (depth + max_distance)))
        * Mat4::from_translation(-near_center);

    ShadowProjection {
        origin: origin.into(),
        direction: direction.into(),
        extents,
        depth,
        max_distance,
        world_bounds,
        world_to_texture: to_unit * light_view,
    }
}

/// Internal representation of a shadow.
#[derive(Debug, Clone)]
pub struct InternalShadow {
    pub caster: CasterId,
    pub technique: ShadowTechnique,
    pub texture: Option<RawShadowTextureHandle>,
    pub texture_size: u32,
    /// Shadow this caster renders into instead of owning a texture slot.
    pub parent: Option<RawShadowHandle>,
    pub children: SmallVec<[RawShadowHandle; 2]>,
    pub flags: ShadowFlags,
    pub projection: Option<ShadowProjection>,
    pub last_transform: Option<RenderTransform>,
    pub last_bounds: Option<Aabb>,
}

impl InternalShadow {
    pub fn new(caster: CasterId, desc: ShadowDescriptor) -> Self {
        Self {
            caster,
            technique: desc.technique,
            texture: None,
            texture_size: desc.texture_size,
            parent: None,
            children: SmallVec::new(),
            flags: ShadowFlags::TEXTURE_DIRTY,
            projection: None,
            last_transform: None,
            last_bounds: None,
        }
    }

    /// True if the next use has to redraw the texture regardless of the atlas.
    pub fn needs_redraw(&self) -> bool {
        self.flags
            .intersects(ShadowFlags::TEXTURE_DIRTY | ShadowFlags::ALWAYS_DIRTY)
    }
}

/// Stores every registered shadow and finds them by caster.
#[derive(Debug, Default)]
pub struct ShadowRegistry {
    shadows: FreelistVec<InternalShadow>,
    by_caster: FastHashMap<CasterId, RawShadowHandle>,
}

impl ShadowRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, shadow: InternalShadow) -> RawShadowHandle {
        let caster = shadow.caster;
        let handle = RawShadowHandle::new(self.shadows.push(shadow).0);
        let previous = self.by_caster.insert(caster, handle);
        debug_assert!(previous.is_none(), "caster {:?} already has a shadow", caster);
        handle
    }

    pub fn remove(&mut self, handle: RawShadowHandle) -> Option<InternalShadow> {
        let shadow = self.shadows.remove(FreelistIndex(handle.idx))?;
        self.by_caster.remove(&shadow.caster);
        Some(shadow)
    }

    pub fn get(&self, handle: RawShadowHandle) -> Option<&InternalShadow> {
        self.shadows.get(FreelistIndex(handle.idx))
    }

    pub fn get_mut(&mut self, handle: RawShadowHandle) -> Option<&mut InternalShadow> {
        self.shadows.get_mut(FreelistIndex(handle.idx))
    }

    pub fn contains(&self, handle: RawShadowHandle) -> bool {
        self.shadows.contains(FreelistIndex(handle.idx))
    }

    pub fn handle_of(&self, caster: CasterId) -> Option<RawShadowHandle> {
        self.by_caster.get(&caster).copied()
    }

    pub fn iter(&self) -> impl Iterator<Item = (RawShadowHandle, &InternalShadow)> {
        self.shadows
            .iter()
            .map(|(idx, shadow)| (RawShadowHandle::new(idx.0), shadow))
    }

    pub fn iter_mut(&mut self) -> impl Iterator<Item = (RawShadowHandle, &mut InternalShadow)> {
        self.shadows
            .iter_mut()
            .map(|(idx, shadow)| (RawShadowHandle::new(idx.0), shadow))
    }

    pub fn len(&self) -> usize {
        self.shadows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.shadows.is_empty()
    }

    pub fn clear(&mut self) {
        self.shadows.clear();
        self.by_caster.clear();
    }
}
