//! Error types for rfp-intake.

use std::time::Duration;

/// Top-level error type.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Database error: {0}")]
    Database(#[from] DatabaseError),

    #[error("Mail error: {0}")]
    Mail(#[from] MailError),

    #[error("LLM error: {0}")]
    Llm(#[from] LlmError),

    #[error("Assist error: {0}")]
    Assist(#[from] AssistError),

    #[error("Intake error: {0}")]
    Intake(#[from] IntakeError),

    #[error("{0}")]
    Procurement(#[from] ProcurementError),
}

/// Configuration-related errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Missing required environment variable: {0}")]
    MissingEnvVar(String),

    #[error("Missing required configuration: {key}. {hint}")]
    MissingRequired { key: String, hint: String },

    #[error("Invalid configuration value for {key}: {message}")]
    InvalidValue { key: String, message: String },
}

/// Database-related errors.
#[derive(Debug, thiserror::Error)]
pub enum DatabaseError {
    #[error("Connection pool error: {0}")]
    Pool(String),

    #[error("Query failed: {0}")]
    Query(String),

    #[error("Entity not found: {entity} with id {id}")]
    NotFound { entity: String, id: String },

    #[error("Constraint violation: {0}")]
    Constraint(String),

    #[error("Migration failed: {0}")]
    Migration(String),

    #[error("Serialization error: {0}")]
    Serialization(String),
}

/// Mailbox (IMAP) errors.
#[derive(Debug, thiserror::Error)]
pub enum MailError {
    #[error("Failed to connect to {host}:{port}: {reason}")]
    Connect {
        host: String,
        port: u16,
        reason: String,
    },

    #[error("TLS error: {0}")]
    Tls(String),

    #[error("IMAP login failed for {user}")]
    AuthFailed { user: String },

    #[error("IMAP command {command} failed: {response}")]
    Command { command: String, response: String },

    #[error("IMAP connection closed by server")]
    Closed,

    #[error("Unparseable IMAP response: {0}")]
    Protocol(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Mailbox task failed: {0}")]
    Task(String),
}

/// LLM provider errors.
#[derive(Debug, thiserror::Error)]
pub enum LlmError {
    #[error("Provider {provider} request failed: {reason}")]
    RequestFailed { provider: String, reason: String },

    #[error("Provider {provider} rate limited, retry after {retry_after:?}")]
    RateLimited {
        provider: String,
        retry_after: Option<Duration>,
    },

    #[error("Authentication failed for provider {provider}")]
    AuthFailed { provider: String },
}

/// Errors from the AI-backed procurement helpers (RFP structuring,
/// proposal parsing, comparison).
#[derive(Debug, thiserror::Error)]
pub enum AssistError {
    #[error("LLM call failed: {0}")]
    Llm(#[from] LlmError),

    #[error("{task}: model returned invalid JSON ({reason})")]
    InvalidResponse {
        task: &'static str,
        reason: String,
        raw: String,
    },

    #[error("{task}: {reason}")]
    Incomplete { task: &'static str, reason: String },
}

/// Proposal-ingestion errors. A message that fails with one of these is
/// left unseen so the next poll retries it.
#[derive(Debug, thiserror::Error)]
pub enum IntakeError {
    #[error("Proposal parsing failed: {0}")]
    Parse(#[from] AssistError),

    #[error("Storage failed: {0}")]
    Store(#[from] DatabaseError),
}

/// Errors from buyer-side RFP and proposal operations.
#[derive(Debug, thiserror::Error)]
pub enum ProcurementError {
    #[error("RFP {0} not found")]
    RfpNotFound(uuid::Uuid),

    #[error("Vendor {0} not found")]
    VendorNotFound(uuid::Uuid),

    #[error("Proposal {0} not found")]
    ProposalNotFound(uuid::Uuid),

    #[error("No proposals found for RFP {0}")]
    NoProposals(uuid::Uuid),

    #[error("No vendors selected")]
    NoRecipients,

    #[error("Vendor {0} is inactive")]
    VendorInactive(String),

    #[error("RFP {rfp_id} is {status} and cannot be dispatched")]
    Closed { rfp_id: uuid::Uuid, status: String },
}

/// Result type alias.
pub type Result<T> = std::result::Result<T, Error>;
