use chainballot_protocol::{CandidateId, ElectionId, Error as ProtocolError};
use log::{debug, error};
use rocket::{
    http::Status,
    response::{status::Custom, Responder},
    serde::json::Json,
    Request,
};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::ledger::{is_duplicate_vote_reason, LedgerError};
use crate::store::StoreError;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, Error)]
pub enum Error {
    #[error("No election found for {0}")]
    ElectionNotFound(String),
    #[error("Invalid voter code")]
    InvalidVoterCode,
    #[error("This voter code has already been used")]
    AlreadyUsed,
    #[error("Candidate {candidate_id} does not stand in election {election_id}")]
    UnknownCandidate {
        election_id: ElectionId,
        candidate_id: CandidateId,
    },
    #[error("Invalid private key: {0}")]
    InvalidKey(String),
    #[error("Invalid public key: {0}")]
    InvalidPublicKey(String),
    #[error("Invalid signature: {0}")]
    InvalidSignature(String),
    #[error("You have already voted in this election.")]
    DuplicateVote,
    #[error("Ledger unreachable: {0}")]
    Transport(String),
    #[error("Ledger rejected the vote: {0}")]
    LedgerRevert(String),
    #[error("Entropy source failed: {0}")]
    Entropy(String),
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error("{1}")]
    Status(Status, String),
}

impl Error {
    /// Stable machine-readable name of this error.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::ElectionNotFound(_) => "election_not_found",
            Self::InvalidVoterCode => "invalid_voter_code",
            Self::AlreadyUsed => "already_used",
            Self::UnknownCandidate { .. } => "unknown_candidate",
            Self::InvalidKey(_) => "invalid_key",
            Self::InvalidPublicKey(_) => "invalid_public_key",
            Self::InvalidSignature(_) => "invalid_signature",
            Self::DuplicateVote => "duplicate_vote",
            Self::Transport(_) => "transport_error",
            Self::LedgerRevert(_) => "ledger_revert",
            Self::Entropy(_) => "entropy",
            Self::Store(_) => "store",
            Self::Status(..) => "request_failed",
        }
    }

    pub fn status(&self) -> Status {
        match self {
            Self::ElectionNotFound(_) => Status::NotFound,
            Self::InvalidVoterCode => Status::Unauthorized,
            Self::AlreadyUsed | Self::DuplicateVote => Status::Conflict,
            Self::UnknownCandidate { .. } => Status::UnprocessableEntity,
            Self::InvalidKey(_) | Self::InvalidPublicKey(_) | Self::InvalidSignature(_) => {
                Status::BadRequest
            }
            Self::Transport(_) => Status::ServiceUnavailable,
            Self::LedgerRevert(_) => Status::BadGateway,
            Self::Entropy(_) => Status::InternalServerError,
            Self::Store(e) => match e {
                StoreError::NotFound => Status::NotFound,
                StoreError::AlreadyVoted(_) | StoreError::DuplicateKey => Status::Conflict,
                StoreError::Inconsistent(_) | StoreError::Db(_) => Status::InternalServerError,
            },
            Self::Status(status, _) => *status,
        }
    }

    /// Only transport failures may be retried; every other outcome is final.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Transport(_))
    }

    /// Shorthand for a 404 with a message.
    pub fn not_found(what: impl AsRef<str>) -> Self {
        Self::Status(Status::NotFound, format!("Not found: {}", what.as_ref()))
    }
}

impl From<ProtocolError> for Error {
    fn from(err: ProtocolError) -> Self {
        match err {
            ProtocolError::InvalidKey(reason) => Self::InvalidKey(reason.to_string()),
            ProtocolError::InvalidPublicKey(reason) => Self::InvalidPublicKey(reason),
            ProtocolError::MalformedSignature(reason) => Self::InvalidSignature(reason),
            ProtocolError::InvalidSignature => {
                Self::InvalidSignature("signature does not match the ballot".to_string())
            }
            ProtocolError::Signing => Self::Status(
                Status::InternalServerError,
                "Failed to sign ballot".to_string(),
            ),
            ProtocolError::Entropy(e) => Self::Entropy(e.to_string()),
        }
    }
}

impl From<LedgerError> for Error {
    fn from(err: LedgerError) -> Self {
        match err {
            LedgerError::Transport(reason) => Self::Transport(reason),
            LedgerError::Revert(reason) if is_duplicate_vote_reason(&reason) => Self::DuplicateVote,
            LedgerError::Revert(reason) => Self::LedgerRevert(reason),
        }
    }
}

/// JSON body of every error response.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorBody {
    pub error: String,
    pub message: String,
    pub retryable: bool,
}

impl From<&Error> for ErrorBody {
    fn from(err: &Error) -> Self {
        Self {
            error: err.kind().to_string(),
            message: err.to_string(),
            retryable: err.is_retryable(),
        }
    }
}

impl<'r, 'o: 'r> Responder<'r, 'o> for Error {
    fn respond_to(self, req: &'r Request<'_>) -> rocket::response::Result<'o> {
        let status = self.status();
        if status.code >= 500 {
            error!("{} {}: {self}", req.method(), req.uri());
        } else {
            debug!("{} {}: {self}", req.method(), req.uri());
        }
        Custom(status, Json(ErrorBody::from(&self))).respond_to(req)
    }
}
