//! Replay cache error types.

use std::sync::Arc;

/// A clonable trait-object inner error.
#[derive(Clone, Default)]
pub struct DynInnerError(
    pub Option<Arc<dyn std::error::Error + 'static + Send + Sync>>,
);

impl std::fmt::Debug for DynInnerError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        self.0.fmt(f)
    }
}

impl std::fmt::Display for DynInnerError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self.0.as_ref() {
            None => f.write_str("None"),
            Some(s) => s.fmt(f),
        }
    }
}

impl std::error::Error for DynInnerError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        self.0.as_ref().map(|s| {
            let out: &(dyn std::error::Error + 'static) = &**s;
            out
        })
    }
}

impl DynInnerError {
    /// Construct a new DynInnerError from a source error.
    pub fn new<E: std::error::Error + 'static + Send + Sync>(e: E) -> Self {
        Self(Some(Arc::new(e)))
    }
}

/// Machine-readable kind of an error reported by the recording service.
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Hash,
    serde::Serialize,
    serde::Deserialize,
)]
#[serde(rename_all = "camelCase")]
pub enum ProtocolErrorKind {
    /// The focus window changed while the request was in flight.
    FocusWindowChange,
    /// The requested region of the recording is no longer loaded.
    RecordingUnloaded,
    /// The query matched more points than the service will return.
    TooManyPoints,
    /// The query matched more locations than the service will return.
    TooManyLocations,
    /// The request could not be delivered or answered.
    Transport,
    /// The service answered with something that could not be understood.
    MalformedResponse,
}

impl ProtocolErrorKind {
    /// Returns true for the kinds that mean "the world moved under you".
    ///
    /// Such errors are never cached as failures and are always retried
    /// on the next access.
    pub fn is_transient_abort(&self) -> bool {
        matches!(
            self,
            ProtocolErrorKind::FocusWindowChange
                | ProtocolErrorKind::RecordingUnloaded
        )
    }
}

impl std::fmt::Display for ProtocolErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            ProtocolErrorKind::FocusWindowChange => "FocusWindowChange",
            ProtocolErrorKind::RecordingUnloaded => "RecordingUnloaded",
            ProtocolErrorKind::TooManyPoints => "TooManyPoints",
            ProtocolErrorKind::TooManyLocations => "TooManyLocations",
            ProtocolErrorKind::Transport => "Transport",
            ProtocolErrorKind::MalformedResponse => "MalformedResponse",
        };
        f.write_str(s)
    }
}

/// The core replay cache error type.
///
/// This type is required to implement `Clone` to ease the use of
/// shared futures, which require the entire `Result` to be `Clone`.
/// A single failure is also handed to every caller whose request
/// covers the failed range, so it must be cheap to clone.
#[derive(Debug, Clone, thiserror::Error)]
pub enum ReplayError {
    /// An error reported by the recording service.
    #[error("{kind}: {ctx}")]
    Protocol {
        /// The machine-readable kind of this error.
        kind: ProtocolErrorKind,

        /// Any context associated with this error.
        ctx: Arc<str>,
    },

    /// A logic-level invariant was broken. There is no local recovery.
    #[error("invariant violated: {ctx}")]
    Invariant {
        /// Description of the broken invariant.
        ctx: Arc<str>,
    },

    /// Generic internal error.
    #[error("{ctx} (src: {src})")]
    Other {
        /// Any context associated with this error.
        ctx: Arc<str>,

        /// The inner error (if any).
        #[source]
        src: DynInnerError,
    },
}

impl ReplayError {
    /// Construct a protocol error of the given kind.
    pub fn protocol<C: std::fmt::Display>(
        kind: ProtocolErrorKind,
        ctx: C,
    ) -> Self {
        Self::Protocol {
            kind,
            ctx: ctx.to_string().into_boxed_str().into(),
        }
    }

    /// Construct an invariant violation error.
    pub fn invariant<C: std::fmt::Display>(ctx: C) -> Self {
        Self::Invariant {
            ctx: ctx.to_string().into_boxed_str().into(),
        }
    }

    /// Construct an "other" error with an inner source error.
    pub fn other_src<
        C: std::fmt::Display,
        S: std::error::Error + 'static + Send + Sync,
    >(
        ctx: C,
        src: S,
    ) -> Self {
        Self::Other {
            ctx: ctx.to_string().into_boxed_str().into(),
            src: DynInnerError::new(src),
        }
    }

    /// Construct an "other" error.
    pub fn other<C: std::fmt::Display>(ctx: C) -> Self {
        Self::Other {
            ctx: ctx.to_string().into_boxed_str().into(),
            src: DynInnerError::default(),
        }
    }

    /// The protocol error kind, if this error came from the service.
    pub fn protocol_kind(&self) -> Option<ProtocolErrorKind> {
        match self {
            ReplayError::Protocol { kind, .. } => Some(*kind),
            _ => None,
        }
    }

    /// Whether this error is a transient abort rather than a real failure.
    pub fn is_transient_abort(&self) -> bool {
        self.protocol_kind()
            .map(|k| k.is_transient_abort())
            .unwrap_or(false)
    }
}

/// The core replay cache result type.
pub type ReplayResult<T> = Result<T, ReplayError>;
