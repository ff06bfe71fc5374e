use crate::api::middleware::client_addr;
use crate::api::params::{ClaimRequest, ClickRequest, parse_body};
use crate::app_state::{AppState, ClickRejected};
use crate::error::GatewayError;
use crate::token::SessionToken;
use axum::extract::{ConnectInfo, Extension, Path};
use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Json, Response};
use bytes::Bytes;
use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use tracing::{debug, warn};

#[derive(Debug, Serialize, Deserialize)]
pub struct StatusResponse {
    pub success: bool,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ClickResponse {
    pub success: bool,
    pub clicks: Option<u64>,
    pub token: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ClicksResponse {
    pub success: bool,
    pub clicks: u64,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ClaimResponse {
    pub success: bool,
    pub clicks: u64,
    pub token: String,
    pub claim: String,
    pub signature: String,
    pub contract: String,
    pub recipient: String,
    pub amount: String,
    pub signer: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct SignerResponse {
    pub success: bool,
    pub address: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct FailureResponse {
    pub success: bool,
    pub message: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub invalid: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub clicks: Option<u64>,
}

impl FailureResponse {
    fn from_error(error: &GatewayError) -> Self {
        let invalid = match error {
            GatewayError::Validation(fields) => fields.iter().map(|f| f.to_string()).collect(),
            _ => Vec::new(),
        };
        Self {
            success: false,
            message: error.public_message(),
            invalid,
            clicks: None,
        }
    }
}

fn failure(error: &GatewayError) -> Response {
    (error.status_code(), Json(FailureResponse::from_error(error))).into_response()
}

/// Body for a refused token request: the token is echoed back so the
/// client can retry with it
fn token_refusal(status: StatusCode, token: &SessionToken, clicks: Option<u64>) -> Response {
    (
        status,
        Json(ClickResponse {
            success: false,
            clicks,
            token: token.to_hex(),
        }),
    )
        .into_response()
}

pub async fn index() -> impl IntoResponse {
    (StatusCode::OK, Json(StatusResponse { success: true }))
}

pub async fn signer(Extension(state): Extension<AppState>) -> impl IntoResponse {
    (
        StatusCode::OK,
        Json(SignerResponse {
            success: true,
            address: state.signer_address().to_checksum(None),
        }),
    )
}

pub async fn click(
    Extension(state): Extension<AppState>,
    ConnectInfo(peer): ConnectInfo<SocketAddr>,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    let request: ClickRequest = match parse_body(&body) {
        Ok(request) => request,
        Err(error) => {
            warn!(%peer, "Malformed click body");
            return failure(&error);
        }
    };

    let addr = client_addr(&headers, peer, state.behind_proxy);
    let requested = request.token_text();

    match state.click(requested.as_deref(), addr).await {
        Ok(accepted) => (
            StatusCode::OK,
            Json(ClickResponse {
                success: true,
                clicks: Some(accepted.clicks),
                token: accepted.token.to_hex(),
            }),
        )
            .into_response(),
        Err(ClickRejected {
            error,
            token: Some(token),
            clicks,
        }) => token_refusal(error.status_code(), &token, clicks),
        Err(ClickRejected { error, .. }) => failure(&error),
    }
}

pub async fn clicks(
    Extension(state): Extension<AppState>,
    Path(token): Path<String>,
) -> Response {
    let Ok(token) = token.parse::<SessionToken>() else {
        debug!(token = %token, "Clicks query with malformed token");
        return failure(&GatewayError::Validation(vec!["token"]));
    };

    match state.clicks(&token).await {
        Ok(clicks) => (
            StatusCode::OK,
            Json(ClicksResponse {
                success: true,
                clicks,
            }),
        )
            .into_response(),
        Err(error) => failure(&error),
    }
}

pub async fn claim(Extension(state): Extension<AppState>, body: Bytes) -> Response {
    let valid = match parse_body::<ClaimRequest>(&body).and_then(|request| request.validate()) {
        Ok(valid) => valid,
        Err(error) => {
            warn!(%error, "Invalid claim request");
            return failure(&error);
        }
    };

    match state
        .claim(valid.token, valid.recipient, valid.contract)
        .await
    {
        Ok(claim) => (
            StatusCode::OK,
            Json(ClaimResponse {
                success: true,
                clicks: claim.clicks,
                token: claim.token.to_hex(),
                claim: claim.digest_hex(),
                signature: claim.signature.to_hex(),
                contract: claim.contract.to_checksum(None),
                recipient: claim.recipient.to_checksum(None),
                amount: claim.amount.to_string(),
                signer: state.signer_address().to_checksum(None),
            }),
        )
            .into_response(),
        Err(GatewayError::LockContention) => {
            token_refusal(StatusCode::CONFLICT, &valid.token, None)
        }
        Err(error @ GatewayError::NotFound) => (
            error.status_code(),
            Json(FailureResponse {
                clicks: Some(0),
                ..FailureResponse::from_error(&error)
            }),
        )
            .into_response(),
        Err(error) => failure(&error),
    }
}
