use std::sync::OnceLock;

use actix_web::error::JsonPayloadError;
use actix_web::http::StatusCode;
use actix_web::{HttpRequest, HttpResponse, ResponseError};
use serde_json::json;

use crate::contract::service::ContractError;

static SHOW_DETAILS: OnceLock<bool> = OnceLock::new();

/// Whether error bodies carry a `details` field. Unset means shown.
pub fn set_show_details(show: bool) {
    if SHOW_DETAILS.set(show).is_err() {
        log::debug!("Error detail visibility already configured");
    }
}

fn show_details() -> bool {
    *SHOW_DETAILS.get().unwrap_or(&true)
}

#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    #[error("{0}")]
    Validation(String),
    #[error("You have reached the maximum number of submissions ({max}) for this cycle")]
    CapReached { max: u32, status: StatusCode },
    #[error("Transaction failed: {0}")]
    TransactionFailed(String),
    #[error("{context}: {source}")]
    Upstream {
        context: &'static str,
        #[source]
        source: ContractError,
    },
    #[error("{0}")]
    Internal(String),
    #[error("Request processing took too long")]
    Timeout,
}

impl ApiError {
    pub fn validation(message: impl Into<String>) -> Self {
        ApiError::Validation(message.into())
    }

    /// Gate failure: the contract could not be read.
    pub fn validating(source: ContractError) -> Self {
        ApiError::Upstream {
            context: "Error validating submission",
            source,
        }
    }

    /// Read failure outside the submission pipeline.
    pub fn fetching(source: ContractError) -> Self {
        ApiError::Upstream {
            context: "Error fetching submission data from blockchain",
            source,
        }
    }

    /// Maps a failed `registerValidSubmission` into the client-facing taxonomy.
    pub fn registering(source: ContractError, max: u32) -> Self {
        if let ContractError::Reverted { tx_id: Some(tx_id), .. } = &source {
            log::warn!("registerValidSubmission reverted on-chain in {}", tx_id);
        }
        match source.revert_reason() {
            Some(reason) if reason.contains("Max submissions") => ApiError::CapReached {
                max,
                status: StatusCode::FORBIDDEN,
            },
            Some(reason) => ApiError::TransactionFailed(reason.to_string()),
            None => ApiError::Upstream {
                context: "Error registering submission",
                source,
            },
        }
    }

    fn details(&self) -> Option<String> {
        match self {
            ApiError::Upstream { source, .. } => Some(format!("{:?}", source)),
            _ => None,
        }
    }
}

impl ResponseError for ApiError {
    fn status_code(&self) -> StatusCode {
        match self {
            ApiError::Validation(_) => StatusCode::BAD_REQUEST,
            ApiError::CapReached { status, .. } => *status,
            ApiError::TransactionFailed(_) => StatusCode::BAD_REQUEST,
            ApiError::Upstream { .. } | ApiError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
            ApiError::Timeout => StatusCode::GATEWAY_TIMEOUT,
        }
    }

    fn error_response(&self) -> HttpResponse {
        let status = self.status_code();
        if status.is_server_error() {
            log::error!("{}", self);
        } else {
            log::warn!("{}", self);
        }

        let mut body = json!({
            "status": "error",
            "error": status.canonical_reason().unwrap_or("Error"),
            "message": self.to_string(),
        });
        if let Some(details) = self.details().filter(|_| show_details()) {
            body["details"] = json!(details);
        }
        HttpResponse::build(status).json(body)
    }
}

/// `JsonConfig` error handler: malformed or oversized bodies become 400s in the common shape.
pub fn json_error_handler(err: JsonPayloadError, _req: &HttpRequest) -> actix_web::Error {
    let message = match &err {
        JsonPayloadError::Overflow { .. } | JsonPayloadError::OverflowKnownLength { .. } => {
            "Request body is too large".to_string()
        }
        JsonPayloadError::ContentType => "Content-Type must be application/json".to_string(),
        other => format!("Invalid request body: {}", other),
    };
    ApiError::Validation(message).into()
}
