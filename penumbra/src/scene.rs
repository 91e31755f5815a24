use penumbra_types::{Aabb, CasterFlags, CasterId, LeafId, RenderTransform, ShadowTechnique};

use crate::scanner::ShadowView;

/// The embedding engine's view of the world, as far as shadows are concerned.
///
/// Visibility, entity transforms and caster bounds all live outside this crate;
/// the shadow manager only ever asks for them through this trait.
pub trait ShadowScene {
    /// Casters that may be visible from `view`, given the visible `leaves`.
    fn candidate_casters(&self, view: &ShadowView, leaves: &[LeafId]) -> Vec<CasterId>;

    /// Local space bounds of the caster when drawn with `technique`.
    fn shadow_bounds(&self, caster: CasterId, technique: ShadowTechnique) -> Aabb;

    /// Origin and orientation the caster is rendered with this frame.
    fn render_transform(&self, caster: CasterId) -> RenderTransform;

    /// Per-frame caster state. Defaults to a plain opaque, static caster.
    fn caster_flags(&self, _caster: CasterId) -> CasterFlags {
        CasterFlags::empty()
    }
}
