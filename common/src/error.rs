use async_openai::error::{ApiError, OpenAIError};
use surrealdb::error::{Api as SurrealApi, Db as SurrealDb};
use thiserror::Error;
use tokio::task::JoinError;

/// Message shown to users when a capability or store stays unreachable after retries.
pub const TEMPORARILY_UNAVAILABLE: &str =
    "The service is temporarily unavailable, please try again in a moment.";

// Core internal errors
#[derive(Error, Debug)]
pub enum AppError {
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),
    #[error("Embedding unavailable: {0}")]
    EmbeddingUnavailable(String),
    #[error("Retrieval unavailable: {0}")]
    RetrievalUnavailable(String),
    #[error("Rerank unavailable: {0}")]
    RerankUnavailable(String),
    #[error("Generation failed: {0}")]
    GenerationFailed(String),
    #[error("Ingestion failed for document {document_id}: {reason}")]
    IngestionPartialFailure { document_id: String, reason: String },
    #[error("Database error: {0}")]
    Database(#[from] surrealdb::Error),
    #[error("OpenAI error: {0}")]
    OpenAI(#[from] OpenAIError),
    #[error("Configuration error: {0}")]
    Config(#[from] config::ConfigError),
    #[error("Not found: {0}")]
    NotFound(String),
    #[error("Validation error: {0}")]
    Validation(String),
    #[error("LLM parsing error: {0}")]
    LLMParsing(String),
    #[error("Task join error: {0}")]
    Join(#[from] JoinError),
    #[error("IoError: {0}")]
    Io(#[from] std::io::Error),
    #[error("Reqwest error: {0}")]
    Reqwest(#[from] reqwest::Error),
    #[error("Anyhow error: {0}")]
    Anyhow(#[from] anyhow::Error),
    #[error("Timed out: {0}")]
    Timeout(String),
    #[error("Transient provider error: {0}")]
    Transient(String),
    #[error("Request cancelled")]
    Cancelled,
    #[error("Internal service error: {0}")]
    InternalError(String),
}

impl AppError {
    /// Whether a retry of the same call may succeed.
    ///
    /// Validation and configuration problems never are, and neither are the
    /// `*Unavailable` variants, which already represent an exhausted retry budget.
    pub fn is_transient(&self) -> bool {
        match self {
            Self::Io(_) | Self::Timeout(_) | Self::Transient(_) => true,
            Self::Database(err) => is_transient_database(err),
            Self::OpenAI(err) => match err {
                OpenAIError::Reqwest(_) | OpenAIError::StreamError(_) => true,
                OpenAIError::ApiError(api) => is_transient_api(api),
                _ => false,
            },
            Self::Reqwest(err) => {
                err.is_timeout()
                    || err.is_connect()
                    || err.status().map_or(true, |status| {
                        status.is_server_error() || status.as_u16() == 429
                    })
            }
            _ => false,
        }
    }

    /// Text suitable for showing to the person who asked the question.
    pub fn user_message(&self) -> String {
        match self {
            Self::EmbeddingUnavailable(_)
            | Self::RetrievalUnavailable(_)
            | Self::RerankUnavailable(_)
            | Self::GenerationFailed(_)
            | Self::Database(_)
            | Self::Timeout(_)
            | Self::Transient(_) => TEMPORARILY_UNAVAILABLE.to_string(),
            Self::Validation(message) | Self::InvalidConfig(message) => message.clone(),
            Self::Cancelled => "The request was cancelled.".to_string(),
            other => format!("I encountered an error processing your question: {other}"),
        }
    }
}

/// Connection loss, datastore hiccups and transaction conflicts. Query,
/// schema and serialization errors fail the same way on every attempt.
fn is_transient_database(err: &surrealdb::Error) -> bool {
    matches!(
        err,
        surrealdb::Error::Api(
            SurrealApi::Http(_)
                | SurrealApi::Ws(_)
                | SurrealApi::ConnectionUninitialised
                | SurrealApi::InternalError(_)
        ) | surrealdb::Error::Db(
            SurrealDb::Ds(_)
                | SurrealDb::TxFailure
                | SurrealDb::TxRetryable
                | SurrealDb::QueryTimedout
        )
    )
}

/// Provider errors without a type come from proxies and gateways and are
/// retried; typed ones only when they are server-side or rate limits.
fn is_transient_api(err: &ApiError) -> bool {
    let rate_limited = err.code.as_deref() == Some("rate_limit_exceeded");
    match err.r#type.as_deref() {
        None => true,
        Some("server_error" | "rate_limit_exceeded") => true,
        Some(_) => rate_limited,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn api_error(kind: Option<&str>, code: Option<&str>) -> AppError {
        AppError::OpenAI(OpenAIError::ApiError(ApiError {
            message: "provider said no".into(),
            r#type: kind.map(str::to_string),
            param: None,
            code: code.map(str::to_string),
        }))
    }

    #[test]
    fn classifies_transient_errors() {
        assert!(AppError::Timeout("embed".into()).is_transient());
        assert!(AppError::Transient("503".into()).is_transient());
        assert!(!AppError::Validation("bad".into()).is_transient());
        assert!(!AppError::InvalidConfig("overlap".into()).is_transient());
        assert!(!AppError::RetrievalUnavailable("down".into()).is_transient());
    }

    #[test]
    fn unavailable_errors_share_user_message() {
        let retrieval = AppError::RetrievalUnavailable("store down".into()).user_message();
        let generation = AppError::GenerationFailed("model down".into()).user_message();
        assert_eq!(retrieval, TEMPORARILY_UNAVAILABLE);
        assert_eq!(generation, TEMPORARILY_UNAVAILABLE);
        assert!(!retrieval.contains("store down"));
    }

    #[test]
    fn validation_message_is_passed_through() {
        let err = AppError::Validation("Please ask a question".into());
        assert_eq!(err.user_message(), "Please ask a question");
    }

    #[test]
    fn provider_request_errors_are_not_retried() {
        let too_long = api_error(
            Some("invalid_request_error"),
            Some("context_length_exceeded"),
        );
        assert!(!too_long.is_transient());
        assert!(!api_error(Some("insufficient_quota"), Some("insufficient_quota")).is_transient());
        assert!(api_error(Some("server_error"), None).is_transient());
        assert!(api_error(Some("requests"), Some("rate_limit_exceeded")).is_transient());
        assert!(api_error(None, None).is_transient());
    }

    #[test]
    fn only_connection_class_database_errors_are_transient() {
        let query = AppError::Database(surrealdb::Error::Api(SurrealApi::Query(
            "Incorrect vector dimension (2). Expected a vector of 3 dimension.".into(),
        )));
        let schema = AppError::Database(surrealdb::Error::Db(SurrealDb::Thrown("bad".into())));
        let socket = AppError::Database(surrealdb::Error::Api(SurrealApi::Ws("reset".into())));
        let conflict = AppError::Database(surrealdb::Error::Db(SurrealDb::TxRetryable));

        assert!(!query.is_transient());
        assert!(!schema.is_transient());
        assert!(socket.is_transient());
        assert!(conflict.is_transient());
    }
}
