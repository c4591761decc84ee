//! Vocabulary shared by the DnD and CopyPaste engines.

/// Outcome of looking up `(state, operation)` in an engine's table.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transition<S> {
    /// Operation is valid; state is unchanged.
    Stay,
    /// Operation is valid; move to the given state.
    To(S),
    /// Operation is not valid here: run the engine's full reset and stop.
    Reset,
    /// Run the full reset, then carry on with the operation from the
    /// reset state.
    ResetFirst,
    /// Operation is a no-op here (stale timer, inert engine).
    Ignore,
}

/// Failures reported back to the caller of an engine operation.
///
/// None of these leave the engine in a broken state: a state violation
/// has already been recovered by a full reset when it is reported.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum EngineError {
    #[error("no transport for the negotiated version")]
    NoTransport,
    #[error("engine is inert until a supported version is negotiated")]
    Inert,
    #[error("transfer not allowed by policy")]
    NotAllowed,
    #[error("operation not valid in current state; engine was reset")]
    Recovered,
}

impl EngineError {
    /// Machine-readable reason sent in UI `response` frames.
    pub fn reason(&self) -> &'static str {
        match self {
            EngineError::NoTransport => "no_transport",
            EngineError::Inert => "inert",
            EngineError::NotAllowed => "not_allowed",
            EngineError::Recovered => "state_reset",
        }
    }
}
