//! Per-view shadow candidate discovery and ranking.

use std::cmp::Reverse;

use glam::{Mat4, UVec2, Vec3, Vec3A};
use ordered_float::OrderedFloat;
use penumbra_types::{
    Camera, CameraProjection, CasterId, Handedness, LeafId, RawShadowHandle, RawShadowTextureHandle,
    ShadowTechnique,
};

use crate::{
    scene::ShadowScene,
    shadow::ShadowRegistry,
    util::{
        frustum::{BoundingSphere, Frustum},
        typedefs::FastHashSet,
    },
};

/// A camera shadows are gathered for, with the pixel size of its target.
#[derive(Debug, Clone)]
pub struct ShadowView {
    handedness: Handedness,
    proj: Mat4,
    inv_view: Mat4,
    data: Camera,
    viewport: UVec2,
    frustum: Frustum,
}

impl ShadowView {
    pub fn new(data: Camera, handedness: Handedness, viewport: UVec2) -> Self {
        profiling::scope!("ShadowView::new");

        let viewport = viewport.max(UVec2::ONE);
        let aspect_ratio = viewport.x as f32 / viewport.y as f32;
        let proj = compute_projection_matrix(data, handedness, aspect_ratio);

        Self {
            handedness,
            proj,
            inv_view: data.view.inverse(),
            data,
            viewport,
            frustum: Frustum::from_matrix(proj * data.view),
        }
    }

    pub fn get_data(&self) -> Camera {
        self.data
    }

    pub fn handedness(&self) -> Handedness {
        self.handedness
    }

    pub fn view(&self) -> Mat4 {
        self.data.view
    }

    pub fn proj(&self) -> Mat4 {
        self.proj
    }

    pub fn view_proj(&self) -> Mat4 {
        self.proj * self.data.view
    }

    pub fn viewport(&self) -> UVec2 {
        self.viewport
    }

    pub fn frustum(&self) -> &Frustum {
        &self.frustum
    }

    pub fn location(&self) -> Vec3 {
        self.inv_view.w_axis.truncate()
    }

    /// Approximate pixel area covered by the sphere: its projected diameter, squared.
    pub fn screen_area(&self, sphere: BoundingSphere) -> f32 {
        let full = self.viewport.max_element() as f32;
        let clip = self.view_proj() * Vec3::from(sphere.center).extend(1.0);
        let w = clip.w;

        let diameter = if w <= f32::EPSILON {
            full
        } else {
            sphere.radius * self.proj.y_axis.y.abs() * self.viewport.y as f32 / w
        };
        let diameter = diameter.clamp(0.0, full);

        diameter * diameter
    }
}

fn compute_projection_matrix(data: Camera, handedness: Handedness, aspect_ratio: f32) -> Mat4 {
    match data.projection {
        CameraProjection::Orthographic { size } => {
            let half = size * 0.5;
            if handedness == Handedness::Left {
                Mat4::orthographic_lh(-half.x, half.x, -half.y, half.y, half.z, -half.z)
            } else {
                Mat4::orthographic_rh(-half.x, half.x, -half.y, half.y, half.z, -half.z)
            }
        }
        CameraProjection::Perspective { vfov, near } => {
            if handedness == Handedness::Left {
                Mat4::perspective_infinite_reverse_lh(vfov.to_radians(), aspect_ratio, near)
            } else {
                Mat4::perspective_infinite_reverse_rh(vfov.to_radians(), aspect_ratio, near)
            }
        }
        CameraProjection::Raw(proj) => proj,
    }
}

/// A shadow that wants a texture this frame.
#[derive(Debug, Copy, Clone, PartialEq)]
pub struct ShadowCandidate {
    pub shadow: RawShadowHandle,
    pub texture: RawShadowTextureHandle,
    /// Estimated pixel area on screen.
    pub area: f32,
    pub center: Vec3A,
}

/// A shadow drawn with the cheap technique. Not ranked.
#[derive(Debug, Copy, Clone, PartialEq)]
pub struct BlobbyCandidate {
    pub shadow: RawShadowHandle,
    pub caster: CasterId,
    pub center: Vec3A,
}

#[derive(Debug, Default, Clone)]
pub struct ShadowCandidates {
    /// Sorted by descending area.
    pub render_to_texture: Vec<ShadowCandidate>,
    pub blobby: Vec<BlobbyCandidate>,
}

/// Finds the shadows visible from a view and ranks them by screen area.
///
/// A shadow is handed out to at most one view per frame; later views skip it.
#[derive(Debug, Default)]
pub struct PriorityScanner {
    claimed: FastHashSet<RawShadowHandle>,
}

impl PriorityScanner {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn find(
        &mut self,
        view: &ShadowView,
        leaves: &[LeafId],
        scene: &dyn ShadowScene,
        shadows: &ShadowRegistry,
    ) -> ShadowCandidates {
        profiling::scope!("PriorityScanner::find");

        let mut candidates = ShadowCandidates::default();

        for caster in scene.candidate_casters(view, leaves) {
            let Some(handle) = shadows.handle_of(caster) else {
                continue;
            };
            if self.claimed.contains(&handle) {
                continue;
            }
            let Some(shadow) = shadows.get(handle) else {
                continue;
            };
            // Children are drawn into their parent's texture.
            if shadow.parent.is_some() {
                continue;
            }
            // Not projected yet, the scheduler will get to it.
            let Some(projection) = shadow.projection else {
                continue;
            };
            if !view.frustum().contains_aabb(&projection.swept_bounds()) {
                continue;
            }

            let sphere = BoundingSphere::from_aabb(&projection.world_bounds);
            match shadow.technique {
                ShadowTechnique::None => continue,
                ShadowTechnique::Blobby => candidates.blobby.push(BlobbyCandidate {
                    shadow: handle,
                    caster,
                    center: sphere.center,
                }),
                ShadowTechnique::RenderToTexture => {
                    let Some(texture) = shadow.texture else {
                        continue;
                    };
                    candidates.render_to_texture.push(ShadowCandidate {
                        shadow: handle,
                        texture,
                        area: view.screen_area(sphere),
                        center: sphere.center,
                    });
                }
            }

            self.claimed.insert(handle);
        }

        candidates
            .render_to_texture
            .sort_unstable_by_key(|c| Reverse(OrderedFloat(c.area)));

        log::trace!(
            "Found {} render to texture and {} blobby shadow candidates",
            candidates.render_to_texture.len(),
            candidates.blobby.len()
        );

        candidates
    }

    pub fn is_claimed(&self, handle: RawShadowHandle) -> bool {
        self.claimed.contains(&handle)
    }

    /// Starts a new rendered frame, releasing every claim.
    pub fn advance_frame(&mut self) {
        self.claimed.clear();
    }

    /// Drops a claim of a destroyed shadow so its slot can be reused.
    pub fn forget(&mut self, handle: RawShadowHandle) {
        self.claimed.remove(&handle);
    }
}
