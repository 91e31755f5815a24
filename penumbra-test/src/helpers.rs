use glam::{Mat4, UVec2, Vec3};
use penumbra::{
    types::{Camera, CameraProjection, Handedness},
    ShadowView,
};

/// Routes `log` output through the test harness. Safe to call from every test.
pub fn init_logger() {
    let _ = env_logger::builder().is_test(true).try_init();
}

/// A left handed perspective view from `eye` towards `target`.
pub fn look_at_view(eye: Vec3, target: Vec3, viewport: UVec2) -> ShadowView {
    ShadowView::new(
        Camera {
            projection: CameraProjection::Perspective { vfov: 60.0, near: 0.1 },
            view: Mat4::look_at_lh(eye, target, Vec3::Y),
        },
        Handedness::Left,
        viewport,
    )
}
