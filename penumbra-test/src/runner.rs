use anyhow::{Context, Result};
use glam::Vec3;
use penumbra::{
    types::{CasterId, LeafId, RawShadowHandle},
    ProcessStats, ShadowCacheConfig, ShadowDescriptor, ShadowFramePlan, ShadowManager, ShadowView,
};

use crate::{init_logger, TestCaster, TestScene};

/// A shadow manager driven against a [`TestScene`], one frame at a time.
pub struct TestRunner {
    pub manager: ShadowManager,
    pub scene: TestScene,
}

impl TestRunner {
    pub fn new(config: ShadowCacheConfig) -> Result<Self> {
        init_logger();

        let manager = ShadowManager::new(config).context("Shadow manager initialization failed")?;
        Ok(Self {
            manager,
            scene: TestScene::new(),
        })
    }

    pub fn add_caster(&mut self, id: CasterId, caster: TestCaster, desc: ShadowDescriptor) -> RawShadowHandle {
        self.scene.insert(id, caster);
        self.manager.create_shadow(id, desc)
    }

    pub fn add_cube(&mut self, id: CasterId, origin: Vec3) -> RawShadowHandle {
        self.add_caster(id, TestCaster::at(origin), ShadowDescriptor::default())
    }

    pub fn remove_caster(&mut self, id: CasterId) {
        if let Some(handle) = self.manager.shadow_of(id) {
            self.manager.destroy_shadow(handle);
        }
        self.scene.remove(id);
    }

    /// Reprojects dirty shadows, as the engine would before rendering.
    pub fn update(&mut self) -> ProcessStats {
        self.manager.update_dirty_shadows(&self.scene, |_, _| {})
    }

    /// Runs a whole frame: update, advance, then plan every view in order.
    pub fn frame(&mut self, views: &[(&ShadowView, &[LeafId])]) -> Vec<ShadowFramePlan> {
        self.update();
        self.manager.advance_frame();
        views
            .iter()
            .map(|(view, leaves)| self.manager.plan_view(view, leaves, &self.scene))
            .collect()
    }

    pub fn single_view_frame(&mut self, view: &ShadowView) -> ShadowFramePlan {
        self.update();
        self.manager.advance_frame();
        self.manager.plan_view(view, &[], &self.scene)
    }
}
