/**
 * Error Handling Module
 *
 * DESIGN DECISION: Centralized error types using thiserror for consistent error semantics
 * WHY: Library code must never panic; all fallible operations return Result
 *
 * REASONING CHAIN:
 * 1. thiserror provides ergonomic error derive macros without boilerplate
 * 2. A centralized enum enables consistent error handling across every component
 * 3. Error conversion (From trait) enables the ? operator for error propagation
 * 4. A classify() method lets the pipeline decide retry vs. terminal-reject vs.
 *    critical-alert without callers re-deriving that policy from string matching
 *
 * PATTERN: thiserror-derived error enum with retry classification
 *
 * # Examples
 *
 * ```rust
 * use scb_core::{Error, Result};
 *
 * fn check_confidence(confidence: f64, floor: f64) -> Result<()> {
 *     if confidence < floor {
 *         return Err(Error::ConfidenceBelowFloor { confidence, floor, criticality: "high".into() });
 *     }
 *     Ok(())
 * }
 * ```
 */

use thiserror::Error;

/// How the pipeline should react to a given error (§7).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorClass {
    /// Validator/evaluator terminal reject; no retry, mutation becomes `rejected`.
    Terminal,
    /// Transient failure; retried with backoff up to the configured attempt cap.
    Transient,
    /// Catastrophic; triggers rollback and a priority-1 coherence alert.
    Critical,
    /// Caller-driven cancellation/deadline; not retried automatically.
    Cancelled,
}

/**
 * Primary error type for the coherence bus
 *
 * DESIGN DECISION: Enum-based error type with structured variants
 * WHY: Type-safe error handling with exhaustive pattern matching
 *
 * Each variant represents a distinct failure mode from one of the nine
 * components; structured fields carry the context (domain name, confidence
 * values, offsets) a caller needs without re-parsing a message string.
 */
#[derive(Error, Debug, Clone, PartialEq)]
pub enum Error {
    // ---- Schema & Dependency Validator (§4.D) ----
    /// Mutation payload fails structural schema checks.
    #[error("schema invalid: {0}")]
    SchemaInvalid(String),

    /// Mutation references a domain outside the 8 foundational DomainIds.
    #[error("unknown domain: {0}")]
    UnknownDomain(String),

    /// Applying the mutation would introduce a dependency cycle.
    #[error("cyclic dependency introduced via {0}")]
    CyclicDependency(String),

    /// Domain confidence falls below the criticality floor.
    #[error("confidence {confidence} below floor {floor} for criticality {criticality}")]
    ConfidenceBelowFloor {
        confidence: f64,
        floor: f64,
        criticality: String,
    },

    /// Mutation would remove one of the 8 foundational domains.
    #[error("forbidden removal of foundational domain: {0}")]
    ForbiddenRemoval(String),

    /// Domain field list contains a duplicate field name.
    #[error("duplicate field name: {0}")]
    DuplicateFieldName(String),

    /// A timestamp on the mutation or domain is not UTC.
    #[error("timestamp not UTC: {0}")]
    TimestampNotUtc(String),

    // ---- Evaluator Pool (§4.E) ----
    /// ContradictionEvaluator flagged the mutation against existing tree state.
    #[error("mutation contradicts existing tree (confidence {0:.2})")]
    Contradiction(f64),

    /// UtilityEvaluator's predicted score falls below the configured floor.
    #[error("predicted utility {score:.2} below floor {floor:.2}")]
    UtilityTooLow { score: f64, floor: f64 },

    /// More than the tolerated number of evaluators failed/timed out this round.
    #[error("{0} of 4 evaluators degraded on this mutation")]
    EvaluatorsDegraded(usize),

    /// A single evaluator call exceeded its deadline.
    #[error("evaluator {0} exceeded its deadline")]
    EvaluatorTimeout(String),

    // ---- Knowledge Store (§4.C) ----
    /// Optimistic commit's base version no longer matches the current tree version.
    #[error("commit conflict: base version {base} != current {current}")]
    Conflict { base: u64, current: u64 },

    /// Rebase-and-retry attempts exhausted under sustained contention.
    #[error("contention: rebase retries exhausted after {0} attempts")]
    Contention(usize),

    /// One of the five core invariants no longer holds.
    #[error("invariant violation: {0}")]
    InvariantViolation(String),

    /// Store could not service a request (lock poisoned, persistence layer down).
    #[error("store unavailable: {0}")]
    StoreUnavailable(String),

    // ---- Bus (§4.A) ----
    /// Broker client could not reach the bus.
    #[error("bus unavailable: {0}")]
    BusUnavailable(String),

    /// Channel is past its backpressure threshold and rejected the publish.
    #[error("backpressure on channel {0}")]
    BusBackpressure(String),

    /// Caller referenced a channel name outside the four fixed channels.
    #[error("unknown channel: {0}")]
    UnknownChannel(String),

    // ---- Circuit Breaker (§4.B) ----
    /// Breaker is open for the named dependency; call rejected without dispatch.
    #[error("circuit open for {0}")]
    CircuitOpen(String),

    // ---- Caller-driven ----
    /// Operation was cancelled before completion.
    #[error("cancelled")]
    Cancelled,

    /// Operation's deadline elapsed before completion.
    #[error("deadline exceeded")]
    DeadlineExceeded,

    // ---- Configuration / I/O ----
    /// Configuration validation error (scb.toml, env overrides).
    #[error("configuration error: {0}")]
    Configuration(String),

    /// Generic I/O error (WAL/snapshot file read/write).
    #[error("I/O error: {0}")]
    Io(String),

    /// JSON serialization/deserialization error.
    #[error("serialization error: {0}")]
    Serialization(String),

    /// WAL/snapshot record failed its checksum or framing check.
    #[error("corrupt persistence record: {0}")]
    Corruption(String),

    /// Unexpected internal error (should not occur in normal operation).
    #[error("internal error: {0}")]
    Internal(String),
}

/// Result type alias for coherence bus operations.
pub type Result<T> = std::result::Result<T, Error>;

impl Error {
    /// Classify the error per §7 so the pipeline/CLI can react uniformly.
    pub fn classify(&self) -> ErrorClass {
        use Error::*;
        match self {
            SchemaInvalid(_)
            | UnknownDomain(_)
            | CyclicDependency(_)
            | ConfidenceBelowFloor { .. }
            | ForbiddenRemoval(_)
            | DuplicateFieldName(_)
            | TimestampNotUtc(_)
            | Contradiction(_)
            | UtilityTooLow { .. }
            | EvaluatorsDegraded(_)
            | Contention(_) => ErrorClass::Terminal,

            InvariantViolation(_) => ErrorClass::Critical,

            BusUnavailable(_)
            | BusBackpressure(_)
            | EvaluatorTimeout(_)
            | StoreUnavailable(_)
            | Conflict { .. }
            | CircuitOpen(_) => ErrorClass::Transient,

            Cancelled | DeadlineExceeded => ErrorClass::Cancelled,

            UnknownChannel(_)
            | Configuration(_)
            | Io(_)
            | Serialization(_)
            | Corruption(_)
            | Internal(_) => ErrorClass::Terminal,
        }
    }

    /// Whether the pipeline should retry this error with backoff.
    pub fn is_retryable(&self) -> bool {
        self.classify() == ErrorClass::Transient
    }
}

impl From<serde_json::Error> for Error {
    fn from(err: serde_json::Error) -> Self {
        Error::Serialization(err.to_string())
    }
}

impl From<std::io::Error> for Error {
    fn from(err: std::io::Error) -> Self {
        Error::Io(err.to_string())
    }
}

impl From<toml::de::Error> for Error {
    fn from(err: toml::de::Error) -> Self {
        Error::Configuration(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = Error::CyclicDependency("Organizacion".to_string());
        assert_eq!(err.to_string(), "cyclic dependency introduced via Organizacion");

        let err = Error::UtilityTooLow { score: 0.2, floor: 0.5 };
        assert!(err.to_string().contains("0.20"));

        let err = Error::Cancelled;
        assert_eq!(err.to_string(), "cancelled");
    }

    #[test]
    fn test_error_traits() {
        let err1 = Error::Cancelled;
        let err2 = err1.clone();
        assert_eq!(err1, err2);

        let err3 = Error::UnknownDomain("Widgets".to_string());
        assert_ne!(err1, err3);
    }

    #[test]
    fn test_error_conversion() {
        let json_err = serde_json::from_str::<serde_json::Value>("invalid json");
        assert!(json_err.is_err());
        let err: Error = json_err.unwrap_err().into();
        match err {
            Error::Serialization(_) => {}
            _ => panic!("expected Serialization error"),
        }

        let io_err = std::io::Error::new(std::io::ErrorKind::NotFound, "file not found");
        let err: Error = io_err.into();
        match err {
            Error::Io(msg) => assert!(msg.contains("file not found")),
            _ => panic!("expected Io error"),
        }
    }

    #[test]
    fn test_result_type_alias() {
        fn returns_result() -> Result<i32> {
            Ok(42)
        }

        fn returns_error() -> Result<i32> {
            Err(Error::Cancelled)
        }

        assert_eq!(returns_result().unwrap(), 42);
        assert!(returns_error().is_err());
    }

    #[test]
    fn terminal_errors_classify_correctly() {
        assert_eq!(
            Error::CyclicDependency("Organizacion".into()).classify(),
            ErrorClass::Terminal
        );
        assert!(!Error::CyclicDependency("Organizacion".into()).is_retryable());
    }

    #[test]
    fn transient_errors_are_retryable() {
        assert!(Error::BusUnavailable("down".into()).is_retryable());
        assert!(Error::CircuitOpen("store".into()).is_retryable());
    }

    #[test]
    fn invariant_violation_is_critical() {
        assert_eq!(
            Error::InvariantViolation("coherence_score < 0.7".into()).classify(),
            ErrorClass::Critical
        );
    }
}
