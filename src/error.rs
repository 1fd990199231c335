//! Error taxonomy for the trading engine.
//!
//! Every public, fallible component method returns `Result<T, EngineError>`. No external
//! error type (reqwest, serde_json, a future database driver) is allowed to cross a component
//! boundary — callers wrap it into one of these variants first. Orchestration code (the
//! scheduler, `main`) is free to widen this into `anyhow::Result` with extra `.context(..)`.

use thiserror::Error;

/// The closed error taxonomy described in §7 of the specification.
#[derive(Debug, Error)]
pub enum EngineError {
    /// Ingress-time rejection that is never retried: missing contract address, a NEUTRAL
    /// signal, an unmatched strategy. Recorded verbatim as a signal's `reject_reason`.
    #[error("validation failed: {reason}")]
    Validation { reason: String },

    /// A risk/credit/cooldown/circuit-breaker check failed. Recorded as a risk entry; the
    /// next monitor tick may re-evaluate.
    #[error("gated at {dimension}: {reason}")]
    Gated { dimension: String, reason: String },

    /// A collaborator (Store, Chain Gateway, Market Data, Knowledge Provider) failed or timed
    /// out. The caller aborts this cycle; the scheduler or monitor retries next tick.
    #[error("transient external failure: {source}")]
    TransientExternal {
        #[source]
        source: anyhow::Error,
    },

    /// An on-chain submission failed or an exit got stuck. Carries the retry count so the
    /// repair loop can bound itself to 3 attempts.
    #[error("on-chain failure for execution {execution_id} (retry {retry_count})")]
    OnChainFailure {
        execution_id: String,
        retry_count: u32,
    },

    /// A data invariant was violated: a NaN score, a HOLDING execution with no Position row.
    /// Logged with full context; the repair loop backfills or quarantines.
    #[error("invariant violation: {context}")]
    InvariantViolation { context: String },

    /// Unrecoverable at startup: Store unreachable, required tables missing. The process must
    /// exit.
    #[error("fatal: {reason}")]
    Fatal { reason: String },
}

impl EngineError {
    pub fn validation(reason: impl Into<String>) -> Self {
        Self::Validation {
            reason: reason.into(),
        }
    }

    pub fn gated(dimension: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::Gated {
            dimension: dimension.into(),
            reason: reason.into(),
        }
    }

    pub fn transient(source: impl Into<anyhow::Error>) -> Self {
        Self::TransientExternal {
            source: source.into(),
        }
    }

    pub fn on_chain(execution_id: impl Into<String>, retry_count: u32) -> Self {
        Self::OnChainFailure {
            execution_id: execution_id.into(),
            retry_count,
        }
    }

    pub fn invariant(context: impl Into<String>) -> Self {
        Self::InvariantViolation {
            context: context.into(),
        }
    }

    pub fn fatal(reason: impl Into<String>) -> Self {
        Self::Fatal {
            reason: reason.into(),
        }
    }

    /// True for kinds that the caller should simply move on from this cycle rather than
    /// propagate loudly (Gated, TransientExternal) — used by monitors deciding whether to log
    /// at `warn!` vs `error!`.
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            Self::Gated { .. } | Self::TransientExternal { .. } | Self::OnChainFailure { .. }
        )
    }
}

pub type EngineResult<T> = Result<T, EngineError>;
