//! Output capture for running processes.
//!
//! Two readers run concurrently, one per stream. Each keeps a private line
//! list and appends to a shared merged list behind a mutex, so lines from
//! the two streams never interleave mid-line.

mod output;
mod reader;

pub use output::{Output, StreamKind};
pub use reader::{capture, CaptureError, CaptureOptions};
