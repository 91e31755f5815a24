use glam::Vec3;
use thiserror::Error;

/// Reason why an atlas size-class table was rejected.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum AtlasConfigError {
    #[error("{what} of {value} is not a power of two")]
    NotPowerOfTwo { what: &'static str, value: u32 },
    #[error("Block size {block_size} is larger than the atlas size {atlas_size}")]
    BlockLargerThanAtlas { block_size: u32, atlas_size: u32 },
    #[error("Minimum power {min_power} is larger than maximum power {max_power}")]
    InvertedPowerRange { min_power: u8, max_power: u8 },
    #[error("Maximum power {max_power} does not fit in a block of {block_size} texels")]
    ClassLargerThanBlock { max_power: u8, block_size: u32 },
    #[error("Size class with power {power} lies outside of [{min_power}, {max_power}]")]
    ClassOutOfRange { power: u8, min_power: u8, max_power: u8 },
    #[error("Size class with power {power} is listed more than once")]
    DuplicateClass { power: u8 },
    #[error("Size class with power {power} has no fragments")]
    EmptyClass { power: u8 },
    #[error("Size classes need {required} blocks but the atlas only holds {available}")]
    TooManyBlocks { required: u32, available: u32 },
    #[error("No size classes were configured")]
    NoClasses,
}

/// Reason why the shadow cache failed to initialize.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ShadowCacheError {
    #[error("Invalid shadow atlas configuration")]
    InvalidAtlas(#[from] AtlasConfigError),
    #[error("Shadow direction {0} must be finite and non-zero")]
    InvalidDirection(Vec3),
    #[error("Maximum shadow distance {0} must be finite and positive")]
    InvalidDistance(f32),
}
