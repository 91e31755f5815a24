//! Utilities shared by the atlas, scanner and scheduler.

pub mod freelist;
pub mod frustum;
pub mod math;
pub mod multilist;
pub mod typedefs;
