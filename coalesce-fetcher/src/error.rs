use coalesce::CoalesceError;
use std::backtrace::Backtrace;
use std::error::Error;
use std::fmt;

/// Returns whether terminal output should include backtraces.
fn should_render_backtrace() -> bool {
    matches!(
        std::env::var("RUST_BACKTRACE").as_deref(),
        Ok("1") | Ok("full")
    )
}

/// Result type for fetcher operations.
pub type FetcherResult<T> = Result<T, FetcherError>;

/// Captured backtrace wrapper for error variants that do not carry their own.
pub struct CapturedBacktrace(Backtrace);

impl CapturedBacktrace {
    /// Captures a new backtrace for an error variant.
    fn capture() -> Self {
        Self(Backtrace::capture())
    }
}

impl fmt::Debug for CapturedBacktrace {
    /// Renders the wrapped backtrace for debugging output.
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Error type for the fetcher service.
///
/// Wraps [`CoalesceError`] for request failures and provides variants for
/// infrastructure errors.
#[derive(Debug)]
pub enum FetcherError {
    /// Upstream or coalescing error.
    Coalesce(CoalesceError),
    /// Configuration error.
    Config(Box<dyn Error + Send + Sync>, CapturedBacktrace),
    /// I/O error.
    Io(std::io::Error, CapturedBacktrace),
}

impl FetcherError {
    /// Returns a short category label for this error.
    pub fn category(&self) -> &'static str {
        match self {
            FetcherError::Coalesce(_) => "request error",
            FetcherError::Config(_, _) => "configuration error",
            FetcherError::Io(_, _) => "i/o error",
        }
    }

    /// Returns the backtrace for this error.
    pub fn backtrace(&self) -> Option<&Backtrace> {
        match self {
            FetcherError::Coalesce(err) => err.backtrace(),
            FetcherError::Config(_, cb) => Some(&cb.0),
            FetcherError::Io(_, cb) => Some(&cb.0),
        }
    }

    /// Creates a configuration error from any error source.
    pub fn config<E: Error + Send + Sync + 'static>(err: E) -> Self {
        FetcherError::Config(Box::new(err), CapturedBacktrace::capture())
    }

    /// Returns a user-oriented report for terminal output.
    pub fn render_report(&self) -> String {
        let mut out = String::new();
        out.push_str("fetcher failed\n");
        out.push_str(&format!("category: {}\n", self.category()));
        out.push_str(&format!("error: {}\n", self));

        if !matches!(self, FetcherError::Coalesce(err) if err.errors().is_some()) {
            let mut source = Error::source(self);
            let mut idx = 1usize;
            while let Some(err) = source {
                out.push_str(&format!("cause {idx}: {err}\n"));
                source = err.source();
                idx += 1;
            }
        }

        if should_render_backtrace()
            && let Some(backtrace) = self.backtrace()
        {
            out.push_str("backtrace:\n");
            out.push_str(&backtrace.to_string());
            if !out.ends_with('\n') {
                out.push('\n');
            }
        }

        out
    }
}

impl fmt::Display for FetcherError {
    /// Renders a user-focused one-line description for terminal and log output.
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FetcherError::Coalesce(err) => write!(f, "{err}"),
            FetcherError::Config(source, _) => write!(f, "configuration error: {source}"),
            FetcherError::Io(source, _) => write!(f, "i/o error: {source}"),
        }
    }
}

impl Error for FetcherError {
    /// Returns the direct cause for this error variant.
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            FetcherError::Coalesce(err) => err.source(),
            FetcherError::Config(source, _) => Some(source.as_ref()),
            FetcherError::Io(source, _) => Some(source),
        }
    }
}

impl From<std::io::Error> for FetcherError {
    /// Converts an I/O error into an I/O error variant.
    fn from(err: std::io::Error) -> Self {
        FetcherError::Io(err, CapturedBacktrace::capture())
    }
}

impl From<CoalesceError> for FetcherError {
    /// Converts a coalescing error into a request error variant.
    fn from(err: CoalesceError) -> Self {
        FetcherError::Coalesce(err)
    }
}
