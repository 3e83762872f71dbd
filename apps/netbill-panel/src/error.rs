use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use netbill_shared::api::ErrorBody;
use thiserror::Error;
use tracing::{error, warn};

use crate::auth::AuthError;
use crate::crypto::CryptoError;
use crate::mikrotik::RouterError;
use crate::services::billing_service::BillingError;
use crate::services::campaign_service::CampaignError;

/// Error surfaced at the HTTP boundary.
#[derive(Debug, Error)]
pub enum AppError {
    #[error("{0}")]
    InputInvalid(String),

    #[error("{0}")]
    Unauthorized(String),

    #[error("token expired")]
    TokenExpired,

    #[error("token invalid")]
    TokenInvalid,

    #[error("{0}")]
    Forbidden(String),

    #[error("missing features: {0:?}")]
    FeatureMissing(Vec<String>),

    #[error("csrf token missing")]
    CsrfMissing,

    #[error("csrf token mismatch")]
    CsrfMismatch,

    #[error("{0}")]
    NotFound(String),

    #[error("{0}")]
    Conflict(String),

    #[error("payload too large")]
    PayloadTooLarge,

    #[error("unsupported media type: {0}")]
    UnsupportedMediaType(String),

    #[error("{0}")]
    RouterUnreachable(String),

    #[error("{0}")]
    RouterError(String),

    #[error(transparent)]
    Internal(#[from] anyhow::Error),
}

pub type AppResult<T> = Result<T, AppError>;

impl AppError {
    pub fn status(&self) -> StatusCode {
        match self {
            AppError::InputInvalid(_) => StatusCode::BAD_REQUEST,
            AppError::Unauthorized(_) | AppError::TokenExpired | AppError::TokenInvalid => StatusCode::UNAUTHORIZED,
            AppError::Forbidden(_) | AppError::FeatureMissing(_) | AppError::CsrfMissing | AppError::CsrfMismatch => {
                StatusCode::FORBIDDEN
            }
            AppError::NotFound(_) => StatusCode::NOT_FOUND,
            AppError::Conflict(_) => StatusCode::CONFLICT,
            AppError::PayloadTooLarge => StatusCode::PAYLOAD_TOO_LARGE,
            AppError::UnsupportedMediaType(_) => StatusCode::UNSUPPORTED_MEDIA_TYPE,
            AppError::RouterError(_) => StatusCode::BAD_GATEWAY,
            AppError::RouterUnreachable(_) => StatusCode::GATEWAY_TIMEOUT,
            AppError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    pub fn code(&self) -> &'static str {
        match self {
            AppError::InputInvalid(_) => "input_invalid",
            AppError::Unauthorized(_) => "unauthorized",
            AppError::TokenExpired => "token_expired",
            AppError::TokenInvalid => "token_invalid",
            AppError::Forbidden(_) | AppError::FeatureMissing(_) => "forbidden",
            AppError::CsrfMissing => "csrf_missing",
            AppError::CsrfMismatch => "csrf_mismatch",
            AppError::NotFound(_) => "not_found",
            AppError::Conflict(_) => "conflict",
            AppError::PayloadTooLarge => "payload_too_large",
            AppError::UnsupportedMediaType(_) => "unsupported_media_type",
            AppError::RouterUnreachable(_) => "router_unreachable",
            AppError::RouterError(_) => "router_error",
            AppError::Internal(_) => "internal",
        }
    }

    pub fn body(&self) -> ErrorBody {
        let message = match self {
            AppError::Internal(_) => Some("Internal server error".to_string()),
            AppError::FeatureMissing(_) => Some("Feature not available on current plan".to_string()),
            other => Some(other.to_string()),
        };
        let features = match self {
            AppError::FeatureMissing(features) => features.clone(),
            _ => Vec::new(),
        };
        ErrorBody {
            error: self.code().to_string(),
            message,
            features,
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        match &self {
            AppError::Internal(e) => error!("Internal error: {:#}", e),
            AppError::RouterUnreachable(msg) | AppError::RouterError(msg) => warn!("Router failure: {}", msg),
            _ => {}
        }
        (self.status(), Json(self.body())).into_response()
    }
}

impl From<CryptoError> for AppError {
    fn from(e: CryptoError) -> Self {
        AppError::Internal(anyhow::Error::new(e))
    }
}

impl From<RouterError> for AppError {
    fn from(e: RouterError) -> Self {
        match e {
            RouterError::Unreachable { .. } => AppError::RouterUnreachable(e.to_string()),
            RouterError::Device { .. } => AppError::RouterError(e.to_string()),
        }
    }
}

impl From<AuthError> for AppError {
    fn from(e: AuthError) -> Self {
        match e {
            AuthError::InvalidCredentials | AuthError::UserDisabled => AppError::Unauthorized(e.to_string()),
            AuthError::TokenExpired => AppError::TokenExpired,
            AuthError::TokenInvalid | AuthError::TokenRevoked => AppError::TokenInvalid,
            AuthError::EmailTaken | AuthError::SlugTaken => AppError::Conflict(e.to_string()),
            AuthError::WeakPassword | AuthError::InvalidInput(_) => AppError::InputInvalid(e.to_string()),
            AuthError::Hashing(msg) => AppError::Internal(anyhow::anyhow!("password hashing failed: {}", msg)),
            AuthError::Internal(inner) => AppError::Internal(inner),
        }
    }
}

impl From<BillingError> for AppError {
    fn from(e: BillingError) -> Self {
        match e {
            BillingError::InvoiceNotFound | BillingError::ClientNotFound => AppError::NotFound(e.to_string()),
            BillingError::InvoiceAlreadyPaid
            | BillingError::InvoiceCancelled
            | BillingError::NotCancellable
            | BillingError::NumberConflict => AppError::Conflict(e.to_string()),
            BillingError::Overpayment { .. } | BillingError::InvalidInput(_) => AppError::InputInvalid(e.to_string()),
            BillingError::Internal(inner) => AppError::Internal(inner),
        }
    }
}

impl From<CampaignError> for AppError {
    fn from(e: CampaignError) -> Self {
        match e {
            CampaignError::InvalidInput(_) | CampaignError::NoRecipients => AppError::InputInvalid(e.to_string()),
            CampaignError::GroupNotFound | CampaignError::NotFound => AppError::NotFound(e.to_string()),
            CampaignError::Internal(inner) => AppError::Internal(inner),
        }
    }
}
