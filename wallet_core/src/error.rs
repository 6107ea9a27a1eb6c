use thiserror::Error;

use crate::agreement::{AgreementId, AgreementStatus, EscrowAction};
use crate::authority::AuthorityError;
use crate::mining::MiningStatus;

#[derive(Debug, Error)]
pub enum WalletError {
    #[error("invalid request: {0}")]
    Validation(String),

    #[error("unknown agreement: {0}")]
    UnknownAgreement(AgreementId),

    #[error("{action} is not available to this wallet while the agreement is {status}")]
    ActionNotOffered {
        action: EscrowAction,
        status: AgreementStatus,
    },

    #[error("a mining job is already {0}")]
    JobInProgress(MiningStatus),

    #[error("cannot reset a mining job that is {0}")]
    ResetNotAllowed(MiningStatus),

    /// The authority refused the request; the reason is its own text.
    #[error("{0}")]
    Rejected(String),

    #[error("transport error: {0}")]
    Transport(String),

    #[error("keystore error: {0}")]
    Keystore(String),

    #[error("wallet store error: {0}")]
    Store(String),

    #[error("config error: {0}")]
    Config(String),
}

/// Coarse classification of a [`WalletError`].
///
/// Every kind is recoverable: the caller may re-issue the action once the
/// local state is back in a consistent initial or terminal state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Detected locally; no request reached the authority.
    Validation,
    /// The authority refused the request on business rules.
    Rejection,
    /// The request did not complete.
    Transport,
    /// Local I/O (wallet store, keystore, configuration).
    Local,
}

impl WalletError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Validation(_)
            | Self::UnknownAgreement(_)
            | Self::ActionNotOffered { .. }
            | Self::JobInProgress(_)
            | Self::ResetNotAllowed(_) => ErrorKind::Validation,
            Self::Rejected(_) => ErrorKind::Rejection,
            Self::Transport(_) => ErrorKind::Transport,
            Self::Keystore(_) | Self::Store(_) | Self::Config(_) => ErrorKind::Local,
        }
    }
}

impl From<AuthorityError> for WalletError {
    fn from(e: AuthorityError) -> Self {
        match e {
            AuthorityError::Rejected(reason) => Self::Rejected(reason),
            AuthorityError::Transport(detail) => Self::Transport(detail),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejection_reason_is_surfaced_verbatim() {
        let err: WalletError =
            AuthorityError::Rejected("Solo el vendedor puede confirmar envío".into()).into();
        assert_eq!(err.to_string(), "Solo el vendedor puede confirmar envío");
        assert_eq!(err.kind(), ErrorKind::Rejection);
    }

    #[test]
    fn transport_failures_are_classified() {
        let err: WalletError = AuthorityError::Transport("connection refused".into()).into();
        assert_eq!(err.kind(), ErrorKind::Transport);
    }

    #[test]
    fn local_guards_are_validation_errors() {
        let err = WalletError::JobInProgress(MiningStatus::Mining);
        assert_eq!(err.kind(), ErrorKind::Validation);
        assert_eq!(err.to_string(), "a mining job is already mining");
    }
}
