mod helpers;
mod runner;
mod scene;

pub use helpers::{init_logger, look_at_view};
pub use runner::TestRunner;
pub use scene::{TestCaster, TestScene};
