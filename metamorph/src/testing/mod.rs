//! Testing utilities: a recording runtime, a pass-through resolver and
//! manifest fixtures.

pub mod fixtures;
pub mod mocks;

pub use fixtures::{pipeline, StaticResolver, SAMPLE_MANIFEST};
pub use mocks::{MockRuntime, RuntimeCall};
