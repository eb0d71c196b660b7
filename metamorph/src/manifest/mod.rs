//! The pipeline manifest: typed model, interpolation and loading.
//!
//! A manifest is loaded in four stages. `${NAME}` placeholders in the raw
//! text are expanded, the text is decoded into a [`Pipeline`], each step's
//! command is split on whitespace, and the result is validated. Loading
//! fails on the first violated invariant; nothing partially loads.

mod interpolate;
mod loader;
mod model;

pub use interpolate::Interpolator;
pub use loader::{load_file, load_str, ManifestOverrides, ORG_VARIABLE};
pub use model::{Backoff, Pipeline, PublishingConfig, Repo, RetryPolicy, Step, Volume};
