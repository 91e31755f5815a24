//! Type declarations for the penumbra shadow texture cache.
//!
//! This is reexported in the penumbra crate proper and includes all the
//! "surface" api arguments.

use std::{fmt::Debug, hash::Hash, marker::PhantomData};

/// Reexport of the glam version penumbra is using.
pub use glam;
use glam::{Mat4, Quat, UVec2, Vec3, Vec3A};
use serde::{Deserialize, Serialize};

/// Non-owning resource handle.
///
/// Handles are handed out by the shadow manager and the atlas. They stay unique
/// for as long as the resource they name is alive; an index may be reused once
/// the resource is destroyed.
pub struct RawResourceHandle<T> {
    /// Underlying value of the handle.
    pub idx: usize,
    _phantom: PhantomData<T>,
}

impl<T> RawResourceHandle<T> {
    /// Creates a new handle with the given value
    pub const fn new(idx: usize) -> Self {
        Self {
            idx,
            _phantom: PhantomData,
        }
    }
}

// Need Debug/Copy/Clone impls that don't require T: Trait.
impl<T> Debug for RawResourceHandle<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RawResourceHandle").field("idx", &self.idx).finish()
    }
}

impl<T> Copy for RawResourceHandle<T> {}

impl<T> Clone for RawResourceHandle<T> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<T> PartialEq for RawResourceHandle<T> {
    fn eq(&self, other: &Self) -> bool {
        self.idx == other.idx
    }
}

impl<T> Eq for RawResourceHandle<T> {}

impl<T> Hash for RawResourceHandle<T> {
    fn hash<H: std::hash::Hasher>(&self, state: &mut H) {
        self.idx.hash(state);
    }
}

/// Tag type for differentiating shadows on the type level.
#[doc(hidden)]
pub struct ShadowTag;
/// Tag type for differentiating atlas textures on the type level.
#[doc(hidden)]
pub struct ShadowTextureTag;

/// Handle to a registered shadow.
pub type RawShadowHandle = RawResourceHandle<ShadowTag>;
/// Handle to a texture slot inside the shadow atlas.
pub type RawShadowTextureHandle = RawResourceHandle<ShadowTextureTag>;

/// Identifier of a shadow casting entity owned by the embedding engine.
#[derive(Debug, Copy, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct CasterId(pub u64);

/// Identifier of a visibility leaf owned by the embedding engine.
#[derive(Debug, Copy, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct LeafId(pub u32);

/// Which technique is used to draw a caster's shadow.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ShadowTechnique {
    /// The caster casts no shadow.
    None,
    /// Cheap approximate shadow, no atlas cost.
    Blobby,
    /// Caster geometry rasterized into its own atlas rectangle.
    RenderToTexture,
}

impl Default for ShadowTechnique {
    fn default() -> Self {
        Self::RenderToTexture
    }
}

bitflags::bitflags! {
    /// Per-frame state of a caster as reported by the scene.
    #[derive(Debug, Default, Copy, Clone, PartialEq, Eq, Hash)]
    pub struct CasterFlags: u8 {
        /// Translucency sorting is camera dependent, so the shadow is never clean.
        const TRANSLUCENT = 0b01;
        /// The caster's geometry animates every frame.
        const ANIMATING   = 0b10;
    }
}

/// Origin and orientation a caster is rendered with.
#[derive(Debug, Copy, Clone, PartialEq)]
pub struct RenderTransform {
    pub origin: Vec3,
    pub rotation: Quat,
}

impl RenderTransform {
    pub const IDENTITY: Self = Self {
        origin: Vec3::ZERO,
        rotation: Quat::IDENTITY,
    };

    pub fn from_origin(origin: Vec3) -> Self {
        Self {
            origin,
            rotation: Quat::IDENTITY,
        }
    }

    pub fn to_mat4(self) -> Mat4 {
        Mat4::from_rotation_translation(self.rotation, self.origin)
    }
}

impl Default for RenderTransform {
    fn default() -> Self {
        Self::IDENTITY
    }
}

/// Axis aligned bounding box.
#[derive(Debug, Copy, Clone, PartialEq)]
pub struct Aabb {
    pub min: Vec3A,
    pub max: Vec3A,
}

impl Aabb {
    pub fn new(min: impl Into<Vec3A>, max: impl Into<Vec3A>) -> Self {
        Self {
            min: min.into(),
            max: max.into(),
        }
    }

    /// Box of the given half size centered on `center`.
    pub fn from_center_half_extents(center: impl Into<Vec3A>, half: impl Into<Vec3A>) -> Self {
        let center = center.into();
        let half = half.into();
        Self {
            min: center - half,
            max: center + half,
        }
    }

    pub fn center(&self) -> Vec3A {
        (self.min + self.max) * 0.5
    }

    pub fn half_extents(&self) -> Vec3A {
        (self.max - self.min) * 0.5
    }

    pub fn union(&self, other: &Aabb) -> Aabb {
        Aabb {
            min: self.min.min(other.min),
            max: self.max.max(other.max),
        }
    }

    pub fn translate(&self, offset: Vec3A) -> Aabb {
        Aabb {
            min: self.min + offset,
            max: self.max + offset,
        }
    }

    pub fn corners(&self) -> [Vec3A; 8] {
        let (min, max) = (self.min, self.max);
        [
            Vec3A::new(min.x, min.y, min.z),
            Vec3A::new(max.x, min.y, min.z),
            Vec3A::new(min.x, max.y, min.z),
            Vec3A::new(max.x, max.y, min.z),
            Vec3A::new(min.x, min.y, max.z),
            Vec3A::new(max.x, min.y, max.z),
            Vec3A::new(min.x, max.y, max.z),
            Vec3A::new(max.x, max.y, max.z),
        ]
    }

    /// Smallest box containing this box after transforming all corners.
    pub fn transform(&self, matrix: Mat4) -> Aabb {
        let mut corners = self.corners().into_iter().map(|c| Vec3A::from(matrix.transform_point3a(c)));
        // corners() always yields eight points.
        let first = corners.next().unwrap_or(self.min);
        let (min, max) = corners.fold((first, first), |(min, max), c| (min.min(c), max.max(c)));
        Aabb { min, max }
    }
}

/// Square rectangle inside the shadow atlas, in texels.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub struct ShadowRect {
    pub offset: UVec2,
    pub size: u32,
}

impl ShadowRect {
    pub fn x(&self) -> u32 {
        self.offset.x
    }

    pub fn y(&self) -> u32 {
        self.offset.y
    }

    pub fn width(&self) -> u32 {
        self.size
    }

    pub fn height(&self) -> u32 {
        self.size
    }

    /// Returns true if the two rectangles share any texel.
    pub fn overlaps(&self, other: &ShadowRect) -> bool {
        let a_end = self.offset + UVec2::splat(self.size);
        let b_end = other.offset + UVec2::splat(other.size);
        self.offset.x < b_end.x && other.offset.x < a_end.x && self.offset.y < b_end.y && other.offset.y < a_end.y
    }
}

/// Describes how the camera should look at the scene.
#[derive(Debug, Default, Copy, Clone)]
pub struct Camera {
    pub projection: CameraProjection,
    /// View matrix
    pub view: Mat4,
}

/// Describes how the world should be projected into the camera.
#[derive(Debug, Copy, Clone)]
pub enum CameraProjection {
    Orthographic {
        /// Size assumes the location is at the center of the camera area.
        size: Vec3A,
    },
    Perspective {
        /// Vertical field of view in degrees.
        vfov: f32,
        /// Near plane distance. All projection uses a infinite far plane.
        near: f32,
    },
    Raw(Mat4),
}

impl Default for CameraProjection {
    fn default() -> Self {
        Self::Perspective { vfov: 60.0, near: 0.1 }
    }
}

/// +X right, +Y up, +Z _into_ the screen is left handed.
/// +X right, +Y up, +Z _out of_ the screen is right handed.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub enum Handedness {
    Left,
    Right,
}

impl Default for Handedness {
    fn default() -> Self {
        Self::Left
    }
}
