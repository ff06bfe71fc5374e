use crate::claim::{Address, parse_address};
use crate::error::GatewayError;
use crate::token::SessionToken;
use serde::Deserialize;
use serde::de::DeserializeOwned;
use serde_json::Value;

/// Body of `POST /click`. Any other fields are ignored.
#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct ClickRequest {
    pub token: Option<Value>,
}

impl ClickRequest {
    /// The presented token as text. A non-string token is kept as its JSON
    /// rendering so it fails validation like any other malformed token.
    pub fn token_text(&self) -> Option<String> {
        match self.token.as_ref()? {
            Value::Null => None,
            Value::String(s) => Some(s.clone()),
            other => Some(other.to_string()),
        }
    }
}

/// Body of `POST /claim`
#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct ClaimRequest {
    pub token: Option<Value>,
    pub recipient: Option<Value>,
    pub contract: Option<Value>,
}

/// A claim request whose fields all parsed
#[derive(Debug, Clone, Copy)]
pub struct ValidClaim {
    pub token: SessionToken,
    pub recipient: Address,
    pub contract: Address,
}

impl ClaimRequest {
    /// Parse every field, reporting all invalid ones at once
    pub fn validate(&self) -> Result<ValidClaim, GatewayError> {
        let token = string_field(&self.token).and_then(|s| s.parse::<SessionToken>().ok());
        let recipient = string_field(&self.recipient).and_then(|s| parse_address(s).ok());
        let contract = string_field(&self.contract).and_then(|s| parse_address(s).ok());

        match (token, recipient, contract) {
            (Some(token), Some(recipient), Some(contract)) => Ok(ValidClaim {
                token,
                recipient,
                contract,
            }),
            (token, recipient, contract) => {
                let mut invalid = Vec::new();
                if token.is_none() {
                    invalid.push("token");
                }
                if recipient.is_none() {
                    invalid.push("recipient");
                }
                if contract.is_none() {
                    invalid.push("contract");
                }
                Err(GatewayError::Validation(invalid))
            }
        }
    }
}

fn string_field(value: &Option<Value>) -> Option<&str> {
    value.as_ref().and_then(Value::as_str)
}

/// Parse a JSON request body regardless of its content type
pub fn parse_body<T: DeserializeOwned>(body: &[u8]) -> Result<T, GatewayError> {
    if body.iter().all(u8::is_ascii_whitespace) {
        return Err(GatewayError::Validation(vec!["body"]));
    }
    serde_json::from_slice(body).map_err(|_| GatewayError::Validation(vec!["body"]))
}
