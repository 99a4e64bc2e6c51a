//! Wire envelope for the cloud signaling protocol.
//!
//! Requests carry an action tag, a base64-encoded JSON payload, and the
//! recipient client id; responses select behavior through `messageType`.

use base64::{engine::general_purpose::STANDARD as BASE64, Engine as _};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use crate::error::{AppError, Result};

pub const ACTION_SDP_OFFER: &str = "SDP_OFFER";
pub const ACTION_ICE_CANDIDATE: &str = "ICE_CANDIDATE";

pub const MSG_SDP_ANSWER: &str = "SDP_ANSWER";
pub const MSG_ICE_CANDIDATE: &str = "ICE_CANDIDATE";
pub const MSG_STATUS_RESPONSE: &str = "STATUS_RESPONSE";

/// Outbound request envelope
#[derive(Debug, Serialize)]
struct SignalRequest<'a> {
    action: &'a str,
    #[serde(rename = "messagePayload")]
    message_payload: String,
    #[serde(rename = "recipientClientId")]
    recipient_client_id: &'a str,
}

/// Inbound response envelope
#[derive(Debug, Deserialize)]
pub struct SignalEnvelope {
    #[serde(rename = "messageType")]
    pub message_type: Option<String>,
    #[serde(rename = "messagePayload")]
    pub message_payload: Option<String>,
    #[serde(rename = "statusResponse")]
    pub status_response: Option<serde_json::Value>,
}

/// Session description payload embedded in the envelope
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SdpPayload {
    #[serde(rename = "type")]
    pub kind: String,
    pub sdp: String,
}

/// ICE candidate payload embedded in the envelope
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IceCandidatePayload {
    pub candidate: String,
    #[serde(rename = "sdpMid", skip_serializing_if = "Option::is_none")]
    pub sdp_mid: Option<String>,
    #[serde(rename = "sdpMLineIndex", skip_serializing_if = "Option::is_none")]
    pub sdp_mline_index: Option<u16>,
}

fn encode_payload<T: Serialize>(payload: &T) -> Result<String> {
    Ok(BASE64.encode(serde_json::to_vec(payload)?))
}

pub fn decode_payload<T: DeserializeOwned>(encoded: &str) -> Result<T> {
    let bytes = BASE64
        .decode(encoded)
        .map_err(|e| AppError::Protocol(format!("invalid base64 payload: {}", e)))?;
    serde_json::from_slice(&bytes)
        .map_err(|e| AppError::Protocol(format!("invalid JSON payload: {}", e)))
}

/// Build an SDP offer request
pub fn offer(sdp: &str, client_id: &str) -> Result<String> {
    let payload = SdpPayload {
        kind: "offer".into(),
        sdp: sdp.to_owned(),
    };
    let request = SignalRequest {
        action: ACTION_SDP_OFFER,
        message_payload: encode_payload(&payload)?,
        recipient_client_id: client_id,
    };
    Ok(serde_json::to_string(&request)?)
}

/// Build an ICE candidate request
pub fn ice_candidate(candidate: &IceCandidatePayload, client_id: &str) -> Result<String> {
    let request = SignalRequest {
        action: ACTION_ICE_CANDIDATE,
        message_payload: encode_payload(candidate)?,
        recipient_client_id: client_id,
    };
    Ok(serde_json::to_string(&request)?)
}

/// Parse an inbound envelope
pub fn parse_envelope(raw: &str) -> Result<SignalEnvelope> {
    serde_json::from_str(raw).map_err(|e| AppError::Protocol(format!("invalid envelope: {}", e)))
}

/// Extract the answer SDP from an `SDP_ANSWER` envelope.
///
/// The payload is usually `{type, sdp}` JSON; some firmware sends the
/// decoded document directly, in which case the decoded text is the answer.
pub fn answer_sdp(envelope: &SignalEnvelope) -> Result<String> {
    let encoded = envelope
        .message_payload
        .as_deref()
        .ok_or_else(|| AppError::Protocol("SDP answer missing messagePayload".into()))?;
    let bytes = BASE64
        .decode(encoded)
        .map_err(|e| AppError::Protocol(format!("invalid base64 payload: {}", e)))?;
    let decoded = String::from_utf8(bytes)
        .map_err(|e| AppError::Protocol(format!("answer payload is not UTF-8: {}", e)))?;
    let value: serde_json::Value = serde_json::from_str(&decoded)
        .map_err(|e| AppError::Protocol(format!("invalid JSON payload: {}", e)))?;
    match value.get("sdp").and_then(|v| v.as_str()) {
        Some(sdp) => Ok(sdp.to_owned()),
        None if value.is_object() => {
            Err(AppError::Protocol("answer payload has no sdp field".into()))
        }
        None => Ok(decoded),
    }
}

/// Extract the candidate from an `ICE_CANDIDATE` envelope
pub fn remote_candidate(envelope: &SignalEnvelope) -> Result<IceCandidatePayload> {
    let encoded = envelope
        .message_payload
        .as_deref()
        .ok_or_else(|| AppError::Protocol("ICE candidate missing messagePayload".into()))?;
    decode_payload(encoded)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn wrap(message_type: &str, payload: &serde_json::Value) -> String {
        serde_json::json!({
            "messageType": message_type,
            "messagePayload": BASE64.encode(payload.to_string()),
        })
        .to_string()
    }

    #[test]
    fn offer_envelope_shape() {
        let raw = offer("v=0\r\no=- 0 0 IN IP4 0.0.0.0\r\n", "client-1").unwrap();
        let value: serde_json::Value = serde_json::from_str(&raw).unwrap();
        assert_eq!(value["action"], "SDP_OFFER");
        assert_eq!(value["recipientClientId"], "client-1");

        let payload: SdpPayload =
            decode_payload(value["messagePayload"].as_str().unwrap()).unwrap();
        assert_eq!(payload.kind, "offer");
        assert!(payload.sdp.starts_with("v=0"));
    }

    #[test]
    fn candidate_envelope_round_trip() {
        let candidate = IceCandidatePayload {
            candidate: "candidate:1 1 udp 2130706431 192.0.2.1 54400 typ host".into(),
            sdp_mid: Some("0".into()),
            sdp_mline_index: Some(0),
        };
        let raw = ice_candidate(&candidate, "client-1").unwrap();
        let value: serde_json::Value = serde_json::from_str(&raw).unwrap();
        assert_eq!(value["action"], "ICE_CANDIDATE");

        let decoded: IceCandidatePayload =
            decode_payload(value["messagePayload"].as_str().unwrap()).unwrap();
        assert_eq!(decoded.candidate, candidate.candidate);
        assert_eq!(decoded.sdp_mid.as_deref(), Some("0"));
        assert_eq!(decoded.sdp_mline_index, Some(0));
    }

    #[test]
    fn answer_sdp_from_json_payload() {
        let raw = wrap(
            MSG_SDP_ANSWER,
            &serde_json::json!({"type": "answer", "sdp": "v=0\r\nanswer"}),
        );
        let envelope = parse_envelope(&raw).unwrap();
        assert_eq!(envelope.message_type.as_deref(), Some(MSG_SDP_ANSWER));
        assert_eq!(answer_sdp(&envelope).unwrap(), "v=0\r\nanswer");
    }

    #[test]
    fn answer_sdp_missing_payload() {
        let envelope = parse_envelope(r#"{"messageType": "SDP_ANSWER"}"#).unwrap();
        assert!(matches!(
            answer_sdp(&envelope),
            Err(AppError::Protocol(_))
        ));
    }

    #[test]
    fn answer_sdp_invalid_base64() {
        let envelope = parse_envelope(
            r#"{"messageType": "SDP_ANSWER", "messagePayload": "%%%not-base64%%%"}"#,
        )
        .unwrap();
        assert!(matches!(answer_sdp(&envelope), Err(AppError::Protocol(_))));
    }

    #[test]
    fn answer_sdp_invalid_json() {
        let raw = serde_json::json!({
            "messageType": "SDP_ANSWER",
            "messagePayload": BASE64.encode("v=0 not json"),
        })
        .to_string();
        let envelope = parse_envelope(&raw).unwrap();
        assert!(matches!(answer_sdp(&envelope), Err(AppError::Protocol(_))));
    }

    #[test]
    fn remote_candidate_decodes() {
        let raw = wrap(
            MSG_ICE_CANDIDATE,
            &serde_json::json!({
                "candidate": "candidate:2 1 udp 1694498815 198.51.100.4 61000 typ srflx",
                "sdpMid": "1",
                "sdpMLineIndex": 1,
            }),
        );
        let envelope = parse_envelope(&raw).unwrap();
        let candidate = remote_candidate(&envelope).unwrap();
        assert!(candidate.candidate.contains("srflx"));
        assert_eq!(candidate.sdp_mline_index, Some(1));
    }

    #[test]
    fn unknown_message_type_still_parses() {
        let envelope = parse_envelope(r#"{"messageType": "SOMETHING_NEW"}"#).unwrap();
        assert_eq!(envelope.message_type.as_deref(), Some("SOMETHING_NEW"));
        assert!(envelope.message_payload.is_none());
    }

    #[test]
    fn malformed_envelope_is_an_error() {
        assert!(matches!(parse_envelope("{not json"), Err(AppError::Protocol(_))));
    }
}
