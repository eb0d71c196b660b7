//! Cooperative cancellation and cleanup.

mod cleanup;
mod token;

pub use cleanup::{run_with_cleanup, DropGuard};
pub use token::CancellationToken;
