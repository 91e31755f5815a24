//! Startup configuration for the shadow cache.

use glam::Vec3;
use serde::{Deserialize, Serialize};

use crate::{
    error::{AtlasConfigError, ShadowCacheError},
    util::{math::round_up_div, typedefs::FastHashSet},
};

/// One entry of the size-class table: `fragments` squares of `1 << power` texels.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SizeClassConfig {
    pub power: u8,
    pub fragments: u32,
}

/// Layout of the shadow atlas.
///
/// The atlas is cut into square blocks of `block_size`. Classes are laid out in
/// table order; each class takes as many whole blocks as its fragments need, and
/// a block only ever holds fragments of a single class.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct AtlasConfig {
    /// Edge length of the atlas texture.
    pub size: u32,
    /// Edge length of one block.
    pub block_size: u32,
    /// Smallest power a texture may ask for.
    pub min_power: u8,
    /// Largest power a texture may ask for.
    pub max_power: u8,
    pub classes: Vec<SizeClassConfig>,
}

impl Default for AtlasConfig {
    fn default() -> Self {
        Self {
            size: 1024,
            block_size: 256,
            min_power: 4,
            max_power: 8,
            classes: vec![
                SizeClassConfig {
                    power: 4,
                    fragments: 256,
                },
                SizeClassConfig {
                    power: 5,
                    fragments: 64,
                },
                SizeClassConfig {
                    power: 6,
                    fragments: 32,
                },
                SizeClassConfig {
                    power: 7,
                    fragments: 24,
                },
                SizeClassConfig {
                    power: 8,
                    fragments: 6,
                },
            ],
        }
    }
}

impl AtlasConfig {
    pub fn blocks_per_row(&self) -> u32 {
        self.size / self.block_size
    }

    /// Number of blocks a class occupies.
    pub fn blocks_for(&self, class: &SizeClassConfig) -> u32 {
        let per_row = self.block_size >> class.power;
        round_up_div(class.fragments, per_row * per_row)
    }

    pub fn validate(&self) -> Result<(), AtlasConfigError> {
        if !self.size.is_power_of_two() {
            return Err(AtlasConfigError::NotPowerOfTwo {
                what: "Atlas size",
                value: self.size,
            });
        }
        if !self.block_size.is_power_of_two() {
            return Err(AtlasConfigError::NotPowerOfTwo {
                what: "Block size",
                value: self.block_size,
            });
        }
        if self.block_size > self.size {
            return Err(AtlasConfigError::BlockLargerThanAtlas {
                block_size: self.block_size,
                atlas_size: self.size,
            });
        }
        if self.min_power > self.max_power {
            return Err(AtlasConfigError::InvertedPowerRange {
                min_power: self.min_power,
                max_power: self.max_power,
            });
        }
        if u32::from(self.max_power) >= u32::BITS || (1_u32 << self.max_power) > self.block_size {
            return Err(AtlasConfigError::ClassLargerThanBlock {
                max_power: self.max_power,
                block_size: self.block_size,
            });
        }
        if self.classes.is_empty() {
            return Err(AtlasConfigError::NoClasses);
        }

        let mut seen = FastHashSet::default();
        let mut required = 0;
        for class in &self.classes {
            if class.power < self.min_power || class.power > self.max_power {
                return Err(AtlasConfigError::ClassOutOfRange {
                    power: class.power,
                    min_power: self.min_power,
                    max_power: self.max_power,
                });
            }
            if !seen.insert(class.power) {
                return Err(AtlasConfigError::DuplicateClass { power: class.power });
            }
            if class.fragments == 0 {
                return Err(AtlasConfigError::EmptyClass { power: class.power });
            }
            required += self.blocks_for(class);
        }

        let available = self.blocks_per_row() * self.blocks_per_row();
        if required > available {
            return Err(AtlasConfigError::TooManyBlocks { required, available });
        }

        Ok(())
    }
}

/// Everything the shadow manager needs at level load.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ShadowCacheConfig {
    pub atlas: AtlasConfig,
    /// Hard cap on shadow textures redrawn per rendered frame, across all views.
    pub max_redraws_per_frame: u32,
    /// Spread projection updates over two frames.
    pub half_rate: bool,
    /// World space direction shadows are cast in.
    pub shadow_direction: Vec3,
    /// How far a shadow reaches from its caster along the shadow direction.
    pub max_shadow_distance: f32,
}

impl Default for ShadowCacheConfig {
    fn default() -> Self {
        Self {
            atlas: AtlasConfig::default(),
            max_redraws_per_frame: 24,
            half_rate: false,
            shadow_direction: Vec3::NEG_Y,
            max_shadow_distance: 50.0,
        }
    }
}

impl ShadowCacheConfig {
    pub fn validate(&self) -> Result<(), ShadowCacheError> {
        self.atlas.validate()?;
        validate_direction(self.shadow_direction)?;
        validate_distance(self.max_shadow_distance)?;
        Ok(())
    }
}

pub(crate) fn validate_direction(direction: Vec3) -> Result<(), ShadowCacheError> {
    if !direction.is_finite() || direction.length_squared() <= f32::EPSILON {
        return Err(ShadowCacheError::InvalidDirection(direction));
    }
    Ok(())
}

pub(crate) fn validate_distance(distance: f32) -> Result<(), ShadowCacheError> {
    if !distance.is_finite() || distance <= 0.0 {
        return Err(ShadowCacheError::InvalidDistance(distance));
    }
    Ok(())
}
