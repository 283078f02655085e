//! Error types and result definitions for coalesced requests.
//!
//! Provides an error system with classification, aggregation, and captured diagnostic
//! metadata. A [`CoalesceError`] is cheap to clone so a single upstream failure can be
//! delivered to every caller waiting on the same in-flight request. Each delivery made
//! through a [`crate::concurrency::continuation::Continuation`] appends the continuation's
//! creation context, so a failure is traceable both to where it originated and to where
//! it was waited on.

use std::backtrace::Backtrace;
use std::borrow::Cow;
use std::error;
use std::fmt;
use std::panic::Location;
use std::sync::Arc;

/// Convenient result type for coalesced operations using [`CoalesceError`] as the error type.
pub type CoalesceResult<T> = Result<T, CoalesceError>;

/// Context captured where a continuation was created.
///
/// Attached to failures delivered through that continuation.
#[derive(Debug, Clone)]
pub struct ErrorOrigin {
    location: &'static Location<'static>,
    backtrace: Arc<Backtrace>,
}

impl ErrorOrigin {
    /// Captures an origin at `location` together with the current backtrace.
    ///
    /// The backtrace honors `RUST_BACKTRACE` and `RUST_LIB_BACKTRACE`, so it is empty unless
    /// backtraces are enabled.
    pub fn capture(location: &'static Location<'static>) -> Self {
        Self {
            location,
            backtrace: Arc::new(Backtrace::capture()),
        }
    }

    /// Returns the source location where the continuation was created.
    pub fn location(&self) -> &'static Location<'static> {
        self.location
    }

    /// Returns the backtrace captured when the continuation was created.
    pub fn backtrace(&self) -> &Backtrace {
        self.backtrace.as_ref()
    }
}

/// Detailed payload stored for single [`CoalesceError`] instances.
#[derive(Debug, Clone)]
struct ErrorPayload {
    kind: ErrorKind,
    description: Cow<'static, str>,
    detail: Option<Cow<'static, str>>,
    source: Option<Arc<dyn error::Error + Send + Sync>>,
    location: &'static Location<'static>,
    backtrace: Arc<Backtrace>,
    origins: Vec<ErrorOrigin>,
}

/// Main error type for coalesced operations.
///
/// [`CoalesceError`] can represent a single error, an error with additional detail, or
/// multiple aggregated errors.
#[derive(Debug, Clone)]
pub struct CoalesceError {
    repr: ErrorRepr,
}

/// Internal representation of error data.
#[derive(Debug, Clone)]
enum ErrorRepr {
    /// Single error payload holding rich metadata.
    Single(ErrorPayload),
    /// Multiple aggregated errors.
    ///
    /// Mainly useful to report the failures of several generations at once.
    Many {
        errors: Vec<CoalesceError>,
        location: &'static Location<'static>,
    },
}

/// Specific categories of errors that can occur while serving coalesced requests.
#[derive(PartialEq, Eq, Copy, Clone, Debug, Hash)]
#[non_exhaustive]
pub enum ErrorKind {
    // Upstream Errors
    UpstreamFailed,
    UpstreamConnectionFailed,
    UpstreamTimeout,
    UpstreamStatus,

    // Coordination Errors
    LeaderAbandoned,
    InvalidState,

    // IO & Serialization Errors
    IoError,
    DeserializationError,

    // Unknown / Uncategorized
    Unknown,
}

impl CoalesceError {
    /// Returns the [`ErrorKind`] of this error.
    ///
    /// For multiple errors, returns the kind of the first error or [`ErrorKind::Unknown`]
    /// if the error list is empty.
    pub fn kind(&self) -> ErrorKind {
        match self.repr {
            ErrorRepr::Single(ref payload) => payload.kind,
            ErrorRepr::Many { ref errors, .. } => errors
                .first()
                .map(|err| err.kind())
                .unwrap_or(ErrorKind::Unknown),
        }
    }

    /// Returns all [`ErrorKind`]s present in this error.
    pub fn kinds(&self) -> Vec<ErrorKind> {
        match self.repr {
            ErrorRepr::Single(ref payload) => vec![payload.kind],
            ErrorRepr::Many { ref errors, .. } => errors
                .iter()
                .flat_map(|err| err.kinds())
                .collect::<Vec<_>>(),
        }
    }

    /// Returns the static description of this error.
    ///
    /// For multiple errors, returns the description of the first error.
    pub fn description(&self) -> Option<&str> {
        match self.repr {
            ErrorRepr::Single(ref payload) => Some(payload.description.as_ref()),
            ErrorRepr::Many { ref errors, .. } => errors.first().and_then(|e| e.description()),
        }
    }

    /// Returns the detailed error information if available.
    ///
    /// For multiple errors, returns the detail of the first error that has one.
    pub fn detail(&self) -> Option<&str> {
        match self.repr {
            ErrorRepr::Single(ref payload) => payload.detail.as_deref(),
            ErrorRepr::Many { ref errors, .. } => errors.iter().find_map(|e| e.detail()),
        }
    }

    /// Returns the aggregated errors, or [`None`] for a single error.
    pub fn errors(&self) -> Option<&[CoalesceError]> {
        match self.repr {
            ErrorRepr::Single(_) => None,
            ErrorRepr::Many { ref errors, .. } => Some(errors),
        }
    }

    /// Returns the captured backtrace for this error.
    pub fn backtrace(&self) -> Option<&Backtrace> {
        match self.repr {
            ErrorRepr::Single(ref payload) => Some(payload.backtrace.as_ref()),
            ErrorRepr::Many { .. } => None,
        }
    }

    /// Returns the captured callsite location for this error.
    pub fn location(&self) -> &'static Location<'static> {
        match self.repr {
            ErrorRepr::Single(ref payload) => payload.location,
            ErrorRepr::Many { location, .. } => location,
        }
    }

    /// Returns the continuation origins appended to this error, oldest first.
    ///
    /// Empty when the error was returned directly rather than delivered through a
    /// continuation.
    pub fn origins(&self) -> &[ErrorOrigin] {
        match self.repr {
            ErrorRepr::Single(ref payload) => &payload.origins,
            ErrorRepr::Many { .. } => &[],
        }
    }

    /// Attaches an originating [`error::Error`] to this error and returns the modified instance.
    ///
    /// Has no effect when called on aggregated errors because aggregates forward the first
    /// contained error as their source.
    pub fn with_source<E>(mut self, source: E) -> Self
    where
        E: error::Error + Send + Sync + 'static,
    {
        if let ErrorRepr::Single(ref mut payload) = self.repr {
            payload.source = Some(Arc::new(source));
        }
        self
    }

    /// Appends a continuation origin to this error and returns the modified instance.
    ///
    /// Aggregated errors forward the origin to each contained error.
    pub fn with_origin(mut self, origin: ErrorOrigin) -> Self {
        match self.repr {
            ErrorRepr::Single(ref mut payload) => payload.origins.push(origin),
            ErrorRepr::Many { ref mut errors, .. } => {
                for error in errors.iter_mut() {
                    *error = error.clone().with_origin(origin.clone());
                }
            }
        }
        self
    }

    /// Creates a [`CoalesceError`] from its components.
    #[track_caller]
    fn from_components(
        kind: ErrorKind,
        description: Cow<'static, str>,
        detail: Option<Cow<'static, str>>,
        source: Option<Arc<dyn error::Error + Send + Sync>>,
    ) -> Self {
        CoalesceError {
            repr: ErrorRepr::Single(ErrorPayload {
                kind,
                description,
                detail,
                source,
                location: Location::caller(),
                backtrace: Arc::new(Backtrace::capture()),
                origins: Vec::new(),
            }),
        }
    }
}

impl PartialEq for CoalesceError {
    fn eq(&self, other: &CoalesceError) -> bool {
        match (&self.repr, &other.repr) {
            (ErrorRepr::Single(a), ErrorRepr::Single(b)) => a.kind == b.kind,
            (
                ErrorRepr::Many {
                    errors: errors_a, ..
                },
                ErrorRepr::Many {
                    errors: errors_b, ..
                },
            ) => {
                errors_a.len() == errors_b.len()
                    && errors_a.iter().zip(errors_b.iter()).all(|(a, b)| a == b)
            }
            _ => false,
        }
    }
}

impl fmt::Display for CoalesceError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> Result<(), fmt::Error> {
        match &self.repr {
            ErrorRepr::Single(payload) => {
                let location = payload.location;
                write!(
                    f,
                    "[{:?}] {} @ {}:{}:{}",
                    payload.kind,
                    payload.description,
                    location.file(),
                    location.line(),
                    location.column()
                )?;

                write_detail(payload.detail.as_deref(), f, 1)?;
                write_backtrace(payload.backtrace.as_ref(), f, 1)?;

                for origin in &payload.origins {
                    let location = origin.location;
                    write!(
                        f,
                        "\n  Awaited through continuation created @ {}:{}:{}",
                        location.file(),
                        location.line(),
                        location.column()
                    )?;
                    write_backtrace(origin.backtrace.as_ref(), f, 2)?;
                }

                Ok(())
            }
            ErrorRepr::Many { errors, location } => {
                let count = errors.len();
                write!(
                    f,
                    "[Many] {} error{} aggregated @ {}:{}:{}",
                    count,
                    if count == 1 { "" } else { "s" },
                    location.file(),
                    location.line(),
                    location.column()
                )?;

                if errors.is_empty() {
                    write!(f, "\n  (no inner errors provided)")?;
                } else {
                    for (index, error) in errors.iter().enumerate() {
                        let rendered = format!("{error}");
                        let mut lines = rendered.lines();
                        if let Some(first_line) = lines.next() {
                            write!(f, "\n  {}. {}", index + 1, first_line)?;
                        } else {
                            write!(f, "\n  {}.", index + 1)?;
                        }

                        for line in lines {
                            if line.is_empty() {
                                write!(f, "\n     ")?;
                            } else {
                                write!(f, "\n     {line}")?;
                            }
                        }
                    }
                }

                Ok(())
            }
        }
    }
}

impl error::Error for CoalesceError {
    fn source(&self) -> Option<&(dyn error::Error + 'static)> {
        match &self.repr {
            ErrorRepr::Single(payload) => payload
                .source
                .as_ref()
                .map(|source| source as &(dyn error::Error + 'static)),
            // For aggregated errors, we forward the first contained error as the source.
            ErrorRepr::Many { errors, .. } => errors
                .first()
                .map(|error| error as &(dyn error::Error + 'static)),
        }
    }
}

/// Writes the captured backtrace with indentation.
fn write_backtrace(
    backtrace: &Backtrace,
    f: &mut fmt::Formatter<'_>,
    indent: usize,
) -> fmt::Result {
    let indent_str = "  ".repeat(indent);

    let rendered_backtrace = format!("{backtrace}");
    if !rendered_backtrace.trim().is_empty() {
        write!(f, "\n{indent_str}Backtrace:")?;
        for line in rendered_backtrace.lines() {
            if line.trim().is_empty() {
                write!(f, "\n{indent_str}  ")?;
            } else {
                write!(f, "\n{indent_str}  {line}")?;
            }
        }
    }

    Ok(())
}

/// Writes the detail block with indentation.
fn write_detail(detail: Option<&str>, f: &mut fmt::Formatter<'_>, indent: usize) -> fmt::Result {
    if let Some(detail) = detail {
        let indent_str = "  ".repeat(indent);
        if detail.trim().is_empty() {
            write!(f, "\n{indent_str}Detail: <empty>")?;
        } else {
            write!(f, "\n{indent_str}Detail:")?;
            for line in detail.lines() {
                if line.trim().is_empty() {
                    write!(f, "\n{indent_str}  ")?;
                } else {
                    write!(f, "\n{indent_str}  {line}")?;
                }
            }
        }
    }

    Ok(())
}

/// Creates a [`CoalesceError`] from an error kind and static description.
impl From<(ErrorKind, &'static str)> for CoalesceError {
    #[track_caller]
    fn from((kind, desc): (ErrorKind, &'static str)) -> CoalesceError {
        CoalesceError::from_components(kind, Cow::Borrowed(desc), None, None)
    }
}

/// Creates a [`CoalesceError`] from an error kind, static description, and dynamic detail.
impl<D> From<(ErrorKind, &'static str, D)> for CoalesceError
where
    D: Into<Cow<'static, str>>,
{
    #[track_caller]
    fn from((kind, desc, detail): (ErrorKind, &'static str, D)) -> CoalesceError {
        CoalesceError::from_components(kind, Cow::Borrowed(desc), Some(detail.into()), None)
    }
}

/// Creates a [`CoalesceError`] from a vector of errors for aggregation.
///
/// If the vector contains exactly one error, returns that error directly without wrapping
/// it in the [`ErrorRepr::Many`] variant.
impl<E> From<Vec<E>> for CoalesceError
where
    E: Into<CoalesceError>,
{
    #[track_caller]
    fn from(errors: Vec<E>) -> CoalesceError {
        let location = Location::caller();

        let mut errors: Vec<CoalesceError> = errors.into_iter().map(Into::into).collect();

        if errors.len() == 1
            && let Some(error) = errors.pop()
        {
            return error;
        }

        CoalesceError {
            repr: ErrorRepr::Many { errors, location },
        }
    }
}

/// Converts [`std::io::Error`] to [`CoalesceError`] with [`ErrorKind::IoError`].
impl From<std::io::Error> for CoalesceError {
    #[track_caller]
    fn from(err: std::io::Error) -> CoalesceError {
        let detail = err.to_string();
        let source = Arc::new(err);
        CoalesceError::from_components(
            ErrorKind::IoError,
            Cow::Borrowed("I/O operation failed"),
            Some(Cow::Owned(detail)),
            Some(source),
        )
    }
}

/// Converts [`serde_json::Error`] to [`CoalesceError`] with the appropriate error kind.
impl From<serde_json::Error> for CoalesceError {
    #[track_caller]
    fn from(err: serde_json::Error) -> CoalesceError {
        let (kind, description) = match err.classify() {
            serde_json::error::Category::Io => (ErrorKind::IoError, "JSON I/O operation failed"),
            serde_json::error::Category::Syntax
            | serde_json::error::Category::Data
            | serde_json::error::Category::Eof => (
                ErrorKind::DeserializationError,
                "JSON deserialization failed",
            ),
        };

        let detail = err.to_string();
        let source = Arc::new(err);
        CoalesceError::from_components(
            kind,
            Cow::Borrowed(description),
            Some(Cow::Owned(detail)),
            Some(source),
        )
    }
}

/// Converts [`reqwest::Error`] to [`CoalesceError`] with the appropriate upstream error kind.
#[cfg(feature = "http")]
impl From<reqwest::Error> for CoalesceError {
    #[track_caller]
    fn from(err: reqwest::Error) -> CoalesceError {
        let (kind, description) = if err.is_timeout() {
            (ErrorKind::UpstreamTimeout, "Upstream request timed out")
        } else if err.is_connect() {
            (
                ErrorKind::UpstreamConnectionFailed,
                "Upstream connection failed",
            )
        } else if err.is_status() {
            (
                ErrorKind::UpstreamStatus,
                "Upstream returned an error status",
            )
        } else if err.is_decode() {
            (
                ErrorKind::DeserializationError,
                "Upstream payload decoding failed",
            )
        } else {
            (ErrorKind::UpstreamFailed, "Upstream request failed")
        };

        let detail = err.to_string();
        let source = Arc::new(err);
        CoalesceError::from_components(
            kind,
            Cow::Borrowed(description),
            Some(Cow::Owned(detail)),
            Some(source),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::coalesce_error;

    #[test]
    fn single_error_exposes_components() {
        let err = coalesce_error!(ErrorKind::UpstreamFailed, "boom", "status 500");

        assert_eq!(err.kind(), ErrorKind::UpstreamFailed);
        assert_eq!(err.description(), Some("boom"));
        assert_eq!(err.detail(), Some("status 500"));
        assert!(err.origins().is_empty());
        assert!(err.errors().is_none());
        assert!(err.location().file().ends_with("error.rs"));
    }

    #[test]
    fn origins_are_appended_in_order_and_rendered() {
        let first = ErrorOrigin::capture(Location::caller());
        let second = ErrorOrigin::capture(Location::caller());

        let err = coalesce_error!(ErrorKind::UpstreamFailed, "boom")
            .with_origin(first)
            .with_origin(second);

        assert_eq!(err.origins().len(), 2);
        assert_eq!(err.description(), Some("boom"));

        let rendered = err.to_string();
        assert!(rendered.starts_with("[UpstreamFailed] boom @ "));
        assert_eq!(
            rendered
                .matches("Awaited through continuation created @")
                .count(),
            2
        );
    }

    #[test]
    fn clones_share_source_and_keep_kind() {
        let io = std::io::Error::other("disk on fire");
        let err = CoalesceError::from(io);
        let cloned = err.clone().with_origin(ErrorOrigin::capture(Location::caller()));

        assert_eq!(err, cloned);
        assert!(error::Error::source(&cloned).is_some());
        assert!(err.origins().is_empty());
        assert_eq!(cloned.origins().len(), 1);
    }

    #[test]
    fn single_element_vector_is_not_aggregated() {
        let err = CoalesceError::from(vec![coalesce_error!(ErrorKind::UpstreamTimeout, "slow")]);

        assert!(err.errors().is_none());
        assert_eq!(err.kind(), ErrorKind::UpstreamTimeout);
    }

    #[test]
    fn aggregated_errors_render_each_entry() {
        let err = CoalesceError::from(vec![
            coalesce_error!(ErrorKind::UpstreamTimeout, "slow"),
            coalesce_error!(ErrorKind::UpstreamStatus, "bad status"),
        ]);

        assert_eq!(
            err.kinds(),
            vec![ErrorKind::UpstreamTimeout, ErrorKind::UpstreamStatus]
        );
        assert_eq!(err.errors().map(<[_]>::len), Some(2));

        let rendered = err.to_string();
        assert!(rendered.starts_with("[Many] 2 errors aggregated @ "));
        assert!(rendered.contains("1. [UpstreamTimeout] slow"));
        assert!(rendered.contains("2. [UpstreamStatus] bad status"));
    }

    #[test]
    fn json_errors_map_to_deserialization() {
        let err: CoalesceError = serde_json::from_str::<serde_json::Value>("{")
            .unwrap_err()
            .into();

        assert_eq!(err.kind(), ErrorKind::DeserializationError);
        assert!(err.detail().is_some());
    }
}
