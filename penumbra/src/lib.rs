//! Render-to-texture shadow cache.
//!
//! Shadow textures of dynamic casters live in one shared atlas. Every frame,
//! each view asks the [`ShadowManager`] which shadows it sees; they are ranked
//! by screen area and given atlas space in that order, reusing last frame's
//! pixels whenever the caster has not changed.
//!
//! The embedding engine supplies visibility, transforms and bounds through
//! [`ShadowScene`]. Nothing here touches the GPU: the output of a frame is a
//! [`ShadowFramePlan`] listing rectangles to draw and rectangles to sample.

pub mod atlas;
pub mod config;
pub mod error;
pub mod manager;
pub mod scanner;
pub mod scene;
pub mod scheduler;
pub mod shadow;
pub mod util;

pub use atlas::{ShadowAtlas, SizeClassUsage};
pub use config::{AtlasConfig, ShadowCacheConfig, SizeClassConfig};
pub use error::{AtlasConfigError, ShadowCacheError};
pub use manager::{ShadowDraw, ShadowFramePlan, ShadowManager};
/// Reexport of [`penumbra_types`] with the handle and geometry types.
pub use penumbra_types as types;
pub use scanner::{BlobbyCandidate, PriorityScanner, ShadowCandidate, ShadowCandidates, ShadowView};
pub use scene::ShadowScene;
pub use scheduler::{DirtyScheduler, ProcessStats, ProjectionSettings};
pub use shadow::{ShadowDescriptor, ShadowFlags, ShadowProjection};
