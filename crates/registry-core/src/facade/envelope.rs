//! Response envelope: exactly one of `payload` or `error` is present.

use serde::{Deserialize, Serialize};

use crate::error::{ErrorBody, RegistryError, Result};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Envelope<T> {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub payload: Option<T>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<ErrorBody>,
}

impl<T> Envelope<T> {
    pub fn ok(payload: T) -> Self {
        Envelope {
            payload: Some(payload),
            error: None,
        }
    }

    pub fn err(error: ErrorBody) -> Self {
        Envelope {
            payload: None,
            error: Some(error),
        }
    }

    pub fn is_ok(&self) -> bool {
        self.payload.is_some() && self.error.is_none()
    }

    /// Unwrap into the payload or the carried error.
    ///
    /// An envelope with both or neither half is a protocol violation.
    pub fn into_result(self) -> Result<T> {
        match (self.payload, self.error) {
            (Some(payload), None) => Ok(payload),
            (None, Some(error)) => Err(RegistryError::from(error)),
            (Some(_), Some(_)) => Err(RegistryError::Protocol(
                "response carries both payload and error".to_string(),
            )),
            (None, None) => Err(RegistryError::Protocol(
                "response carries neither payload nor error".to_string(),
            )),
        }
    }
}

impl<T> From<Result<T>> for Envelope<T> {
    fn from(result: Result<T>) -> Self {
        match result {
            Ok(payload) => Envelope::ok(payload),
            Err(err) => Envelope::err(err.to_body()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorCode;
    use serde_json::json;

    #[test]
    fn success_omits_error() {
        let value = serde_json::to_value(Envelope::ok(json!({"id": "x"}))).unwrap();
        assert_eq!(value, json!({ "payload": { "id": "x" } }));
    }

    #[test]
    fn failure_omits_payload() {
        let env: Envelope<()> =
            Envelope::from(Err(RegistryError::invalid_argument("name is required")));
        let value = serde_json::to_value(&env).unwrap();
        assert!(value.get("payload").is_none());
        assert_eq!(value["error"]["code"], "invalid_argument");
        assert!(!env.is_ok());
    }

    #[test]
    fn into_result_rejects_malformed_envelopes() {
        let both: Envelope<u32> = Envelope {
            payload: Some(1),
            error: Some(ErrorBody {
                code: ErrorCode::Internal,
                message: "x".to_string(),
                retryable: false,
            }),
        };
        assert!(matches!(both.into_result(), Err(RegistryError::Protocol(_))));

        let neither: Envelope<u32> = serde_json::from_value(json!({})).unwrap();
        assert!(matches!(neither.into_result(), Err(RegistryError::Protocol(_))));
    }

    #[derive(Debug, PartialEq, Deserialize)]
    struct Named {
        name: String,
    }

    fn decode<T: serde::de::DeserializeOwned>(value: serde_json::Value) -> Envelope<T> {
        serde_json::from_value(value).unwrap()
    }

    #[test]
    fn payload_types_need_not_implement_default() {
        let env: Envelope<Named> = decode(json!({ "payload": { "name": "gpt" } }));
        assert_eq!(
            env.into_result().unwrap(),
            Named {
                name: "gpt".to_string()
            }
        );

        let env: Envelope<Named> = decode(json!({
            "error": { "code": "not_found", "message": "model not found: x", "retryable": false }
        }));
        assert_eq!(env.into_result().unwrap_err().code(), ErrorCode::NotFound);
    }
}
