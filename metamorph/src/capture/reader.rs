//! Concurrent line readers for stdout and stderr.

use super::{Output, StreamKind};
use parking_lot::Mutex;
use thiserror::Error;
use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};

/// Options controlling a capture.
#[derive(Debug, Clone, Default)]
pub struct CaptureOptions {
    /// Echo every line to the log as soon as it is read.
    pub stream_output: bool,
    /// Label attached to echoed lines (usually the step name).
    pub label: Option<String>,
}

impl CaptureOptions {
    /// Creates options with streaming disabled.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Enables or disables live echo.
    #[must_use]
    pub const fn with_stream_output(mut self, stream: bool) -> Self {
        self.stream_output = stream;
        self
    }

    /// Sets the echo label.
    #[must_use]
    pub fn with_label(mut self, label: impl Into<String>) -> Self {
        self.label = Some(label.into());
        self
    }
}

/// A reader failed with something other than end-of-stream.
#[derive(Debug, Error)]
#[error("reading {stream} failed: {source}")]
pub struct CaptureError {
    /// The stream whose reader failed.
    pub stream: StreamKind,
    /// The underlying IO error.
    #[source]
    pub source: std::io::Error,
}

/// Reads stdout and stderr concurrently until both reach end-of-stream.
///
/// Each line goes to its own stream's list and to the shared merged list.
/// Both readers always run to completion before this returns, even if one
/// of them failed early; the first failure (stdout checked first) is then
/// returned.
///
/// # Errors
///
/// Returns a [`CaptureError`] if either reader hit an IO error.
pub async fn capture<O, E>(stdout: O, stderr: E, options: &CaptureOptions) -> Result<Output, CaptureError>
where
    O: AsyncRead + Unpin,
    E: AsyncRead + Unpin,
{
    let merged = Mutex::new(Vec::new());

    let (stdout_lines, stderr_lines) = tokio::join!(
        read_lines(StreamKind::Stdout, stdout, &merged, options),
        read_lines(StreamKind::Stderr, stderr, &merged, options),
    );

    let stdout = stdout_lines?;
    let stderr = stderr_lines?;

    Ok(Output {
        stdout,
        stderr,
        merged: merged.into_inner(),
    })
}

async fn read_lines<R>(
    kind: StreamKind,
    reader: R,
    merged: &Mutex<Vec<String>>,
    options: &CaptureOptions,
) -> Result<Vec<String>, CaptureError>
where
    R: AsyncRead + Unpin,
{
    let mut reader = BufReader::new(reader);
    let mut lines = Vec::new();
    let mut buf = Vec::new();

    loop {
        buf.clear();
        let read = reader
            .read_until(b'\n', &mut buf)
            .await
            .map_err(|source| CaptureError { stream: kind, source })?;
        // A final line without a newline still arrives here with read > 0.
        if read == 0 {
            break;
        }

        let line = String::from_utf8_lossy(&buf).into_owned();
        if options.stream_output {
            echo(kind, &line, options.label.as_deref());
        }
        merged.lock().push(line.clone());
        lines.push(line);
    }

    Ok(lines)
}

fn echo(kind: StreamKind, line: &str, label: Option<&str>) {
    let text = line.trim_end_matches(['\r', '\n']);
    match label {
        Some(label) => tracing::info!(target: "metamorph::output", stream = %kind, step = label, "{text}"),
        None => tracing::info!(target: "metamorph::output", stream = %kind, "{text}"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use std::io;

    #[tokio::test]
    async fn test_separates_streams() {
        let out = capture(&b"a\n"[..], &b"b\n"[..], &CaptureOptions::new())
            .await
            .unwrap();

        assert_eq!(out.stdout_lines(), ["a\n".to_string()]);
        assert_eq!(out.stderr_lines(), ["b\n".to_string()]);

        let mut merged = out.merged_lines().to_vec();
        merged.sort();
        assert_eq!(merged, vec!["a\n".to_string(), "b\n".to_string()]);
    }

    #[tokio::test]
    async fn test_flushes_unterminated_final_line() {
        let out = capture(&b"first\nlast"[..], &b""[..], &CaptureOptions::new())
            .await
            .unwrap();

        assert_eq!(out.stdout_lines(), ["first\n".to_string(), "last".to_string()]);
        assert_eq!(out.stdout(), "first\nlast");
        assert!(out.stderr_lines().is_empty());
    }

    #[tokio::test]
    async fn test_many_lines_keep_per_stream_order() {
        let stdout: String = (0..200).map(|i| format!("out {i}\n")).collect();
        let stderr: String = (0..200).map(|i| format!("err {i}\n")).collect();

        let out = capture(
            stdout.as_bytes(),
            stderr.as_bytes(),
            &CaptureOptions::new().with_stream_output(true).with_label("test"),
        )
        .await
        .unwrap();

        assert_eq!(out.stdout(), stdout);
        assert_eq!(out.stderr(), stderr);
        assert_eq!(out.merged_lines().len(), 400);
        assert!(out
            .merged_lines()
            .iter()
            .all(|l| l.ends_with('\n') && (l.starts_with("out ") || l.starts_with("err "))));
    }

    #[tokio::test]
    async fn test_invalid_utf8_is_replaced() {
        let out = capture(&b"ok \xff\n"[..], &b""[..], &CaptureOptions::new())
            .await
            .unwrap();
        assert_eq!(out.stdout(), "ok \u{fffd}\n");
    }

    #[tokio::test]
    async fn test_reader_error_surfaces_after_both_finish() {
        let failing = tokio_test::io::Builder::new()
            .read(b"partial\n")
            .read_error(io::Error::new(io::ErrorKind::BrokenPipe, "pipe closed"))
            .build();

        let err = capture(&b"fine\n"[..], failing, &CaptureOptions::new())
            .await
            .unwrap_err();

        assert_eq!(err.stream, StreamKind::Stderr);
        assert_eq!(err.source.kind(), io::ErrorKind::BrokenPipe);
    }
}
