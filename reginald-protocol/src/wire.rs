//! PP framing and JSON-RPC-2.0 message envelope.
//!
//! Framing: `Content-Length: <n>\r\n\r\n<n bytes of JSON>`. Reads accept a
//! bare `\n` terminator for the header block and for each header line;
//! writes always emit `\r\n`.

use crate::error::{PpError, WireError};
use serde::{Deserialize, Serialize};
use serde_json::Value as Json;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

/// A request ID: either an integer or a string, per JSON-RPC 2.0.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(untagged)]
pub enum RequestId {
    /// Integer ID. Reginald always allocates these; string IDs are only
    /// ever echoed back if a peer happens to send one.
    Number(i64),
    /// String ID.
    String(String),
}

impl std::fmt::Display for RequestId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RequestId::Number(n) => write!(f, "{n}"),
            RequestId::String(s) => write!(f, "{s}"),
        }
    }
}

/// The raw wire envelope, deserialized with all fields optional so the
/// message-kind rules below can be applied explicitly rather than relying
/// on serde's (untagged) guesswork.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
struct RawEnvelope {
    jsonrpc: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    id: Option<RequestId>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    method: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    params: Option<Json>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    result: Option<Json>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    error: Option<PpError>,
}

/// The literal protocol version string required in every envelope.
pub const JSONRPC_VERSION: &str = "2.0";

/// A decoded PP message, one of request / response / notification per the
/// envelope's field presence.
#[derive(Debug, Clone, PartialEq)]
pub enum Message {
    /// A call expecting a response, correlated by `id`.
    Request {
        /// Request ID.
        id: RequestId,
        /// Method name.
        method: String,
        /// Method parameters.
        params: Json,
    },
    /// A successful or failed reply to a previously-sent request.
    Response {
        /// The ID of the original request.
        id: RequestId,
        /// The outcome.
        outcome: Outcome,
    },
    /// A one-way message with no `id` and no reply expected.
    Notification {
        /// Method name.
        method: String,
        /// Method parameters.
        params: Json,
    },
}

/// The success/error outcome of a [`Message::Response`].
#[derive(Debug, Clone, PartialEq)]
pub enum Outcome {
    /// Success, carrying the method's result payload.
    Success(Json),
    /// Failure, carrying a PP error payload.
    Error(PpError),
}

impl Message {
    /// Build a request envelope.
    pub fn request(id: RequestId, method: impl Into<String>, params: Json) -> Self {
        Message::Request {
            id,
            method: method.into(),
            params,
        }
    }

    /// Build a success response envelope.
    pub fn success(id: RequestId, result: Json) -> Self {
        Message::Response {
            id,
            outcome: Outcome::Success(result),
        }
    }

    /// Build an error response envelope.
    pub fn error(id: RequestId, error: PpError) -> Self {
        Message::Response {
            id,
            outcome: Outcome::Error(error),
        }
    }

    /// Build a notification envelope.
    pub fn notification(method: impl Into<String>, params: Json) -> Self {
        Message::Notification {
            method: method.into(),
            params,
        }
    }

    fn into_raw(self) -> RawEnvelope {
        match self {
            Message::Request { id, method, params } => RawEnvelope {
                jsonrpc: JSONRPC_VERSION.to_string(),
                id: Some(id),
                method: Some(method),
                params: Some(params),
                result: None,
                error: None,
            },
            Message::Response { id, outcome } => match outcome {
                Outcome::Success(result) => RawEnvelope {
                    jsonrpc: JSONRPC_VERSION.to_string(),
                    id: Some(id),
                    method: None,
                    params: None,
                    result: Some(result),
                    error: None,
                },
                Outcome::Error(error) => RawEnvelope {
                    jsonrpc: JSONRPC_VERSION.to_string(),
                    id: Some(id),
                    method: None,
                    params: None,
                    result: None,
                    error: Some(error),
                },
            },
            Message::Notification { method, params } => RawEnvelope {
                jsonrpc: JSONRPC_VERSION.to_string(),
                id: None,
                method: Some(method),
                params: Some(params),
                result: None,
                error: None,
            },
        }
    }

    fn from_raw(raw: RawEnvelope) -> Result<Self, WireError> {
        if raw.jsonrpc != JSONRPC_VERSION {
            return Err(WireError::Protocol(format!(
                "expected jsonrpc \"2.0\", got {:?}",
                raw.jsonrpc
            )));
        }

        // Message-kind determination, in order:
        // 1. `error` present -> response (error form).
        // 2. else `result` present -> response (success form).
        // 3. else `id` present -> request.
        // 4. else -> notification.
        //
        // A `method` alongside `result`/`error` is always a protocol
        // violation, regardless of `id`.
        if (raw.error.is_some() || raw.result.is_some()) && raw.method.is_some() {
            return Err(WireError::Protocol(
                "message has both a `method` and a `result`/`error`".to_string(),
            ));
        }

        if let Some(error) = raw.error {
            let id = raw.id.ok_or_else(|| {
                WireError::Protocol("error response missing `id`".to_string())
            })?;
            return Ok(Message::Response {
                id,
                outcome: Outcome::Error(error),
            });
        }

        if let Some(result) = raw.result {
            let id = raw.id.ok_or_else(|| {
                WireError::Protocol("success response missing `id`".to_string())
            })?;
            return Ok(Message::Response {
                id,
                outcome: Outcome::Success(result),
            });
        }

        if let Some(id) = raw.id {
            let method = raw.method.ok_or_else(|| {
                WireError::Protocol("request missing `method`".to_string())
            })?;
            return Ok(Message::Request {
                id,
                method,
                params: raw.params.unwrap_or(Json::Null),
            });
        }

        let method = raw
            .method
            .ok_or_else(|| WireError::Protocol("notification missing `method`".to_string()))?;
        Ok(Message::Notification {
            method,
            params: raw.params.unwrap_or(Json::Null),
        })
    }
}

/// Encode a message as a full framed byte sequence
/// (`Content-Length: ...\r\n\r\n<json>`).
pub fn encode(message: &Message) -> Vec<u8> {
    let raw = message.clone().into_raw();
    let body = serde_json::to_vec(&raw).expect("Message always serializes");
    let mut out = Vec::with_capacity(body.len() + 32);
    out.extend_from_slice(format!("Content-Length: {}\r\n\r\n", body.len()).as_bytes());
    out.extend_from_slice(&body);
    out
}

/// Write a framed message to an async writer and flush.
pub async fn write_message<W: AsyncWrite + Unpin>(
    writer: &mut W,
    message: &Message,
) -> Result<(), WireError> {
    let bytes = encode(message);
    writer.write_all(&bytes).await?;
    writer.flush().await?;
    Ok(())
}

/// Read one framed message from an async reader.
///
/// Returns `Err(WireError::Eof)` if the stream ends before any header
/// bytes are read (a clean disconnect); any other truncation is a framing
/// error.
pub async fn read_message<R: AsyncRead + Unpin>(reader: &mut R) -> Result<Message, WireError> {
    let headers = read_headers(reader).await?;

    let content_length = headers
        .iter()
        .find(|(name, _)| name.eq_ignore_ascii_case("content-length"))
        .ok_or_else(|| WireError::Framing("missing Content-Length header".to_string()))?
        .1
        .trim()
        .parse::<i64>()
        .map_err(|_| WireError::Framing("Content-Length is not an integer".to_string()))?;

    if content_length <= 0 {
        return Err(WireError::Framing(format!(
            "Content-Length must be positive, got {content_length}"
        )));
    }

    let mut body = vec![0u8; content_length as usize];
    reader
        .read_exact(&mut body)
        .await
        .map_err(|_| WireError::Framing("stream ended mid-body".to_string()))?;

    let raw: RawEnvelope = serde_json::from_slice(&body)?;
    Message::from_raw(raw)
}

/// Read the header block, terminated by an empty line (`\r\n` or bare
/// `\n`). Returns a list of `(name, value)` pairs, case preserved.
async fn read_headers<R: AsyncRead + Unpin>(
    reader: &mut R,
) -> Result<Vec<(String, String)>, WireError> {
    let mut headers = Vec::new();
    let mut saw_any_byte = false;

    loop {
        let line = match read_line(reader).await? {
            Some(line) => line,
            None => {
                if saw_any_byte || !headers.is_empty() {
                    return Err(WireError::Framing(
                        "stream ended inside header block".to_string(),
                    ));
                }
                return Err(WireError::Eof);
            }
        };
        saw_any_byte = true;

        if line.is_empty() {
            break;
        }

        let (name, value) = line
            .split_once(':')
            .ok_or_else(|| WireError::Framing(format!("malformed header line {line:?}")))?;
        headers.push((name.trim().to_string(), value.trim().to_string()));
    }

    Ok(headers)
}

/// Read one line, stripping a trailing `\r\n` or bare `\n`. Returns `None`
/// on a clean EOF with no bytes read.
async fn read_line<R: AsyncRead + Unpin>(reader: &mut R) -> Result<Option<String>, WireError> {
    let mut buf = Vec::new();
    let mut byte = [0u8; 1];

    loop {
        let n = reader.read(&mut byte).await?;
        if n == 0 {
            if buf.is_empty() {
                return Ok(None);
            }
            break;
        }
        if byte[0] == b'\n' {
            if buf.last() == Some(&b'\r') {
                buf.pop();
            }
            break;
        }
        buf.push(byte[0]);
    }

    String::from_utf8(buf)
        .map(Some)
        .map_err(|_| WireError::Framing("header line is not valid UTF-8".to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::duplex;

    #[tokio::test]
    async fn request_round_trips() {
        let (mut client, mut server) = duplex(4096);
        let msg = Message::request(RequestId::Number(1), "handshake", serde_json::json!({"a": 1}));
        write_message(&mut client, &msg).await.unwrap();
        let decoded = read_message(&mut server).await.unwrap();
        assert_eq!(msg, decoded);
    }

    #[tokio::test]
    async fn response_and_notification_round_trip() {
        let (mut client, mut server) = duplex(4096);
        let msg = Message::success(RequestId::Number(7), serde_json::json!({"ok": true}));
        write_message(&mut client, &msg).await.unwrap();
        assert_eq!(msg, read_message(&mut server).await.unwrap());

        let note = Message::notification("log", serde_json::json!({"level": "info"}));
        write_message(&mut client, &note).await.unwrap();
        assert_eq!(note, read_message(&mut server).await.unwrap());
    }

    #[tokio::test]
    async fn bare_lf_accepted_on_read() {
        let (mut client, mut server) = duplex(4096);
        let body = br#"{"jsonrpc":"2.0","method":"exit"}"#;
        let framed = format!("Content-Length: {}\n\n", body.len());
        client.write_all(framed.as_bytes()).await.unwrap();
        client.write_all(body).await.unwrap();
        let decoded = read_message(&mut server).await.unwrap();
        assert_eq!(
            decoded,
            Message::Notification {
                method: "exit".to_string(),
                params: Json::Null
            }
        );
    }

    #[tokio::test]
    async fn zero_content_length_is_fatal() {
        let (mut client, mut server) = duplex(4096);
        client
            .write_all(b"Content-Length: 0\r\n\r\n")
            .await
            .unwrap();
        let err = read_message(&mut server).await.unwrap_err();
        assert!(matches!(err, WireError::Framing(_)));
    }

    #[tokio::test]
    async fn unknown_top_level_field_is_rejected() {
        let (mut client, mut server) = duplex(4096);
        let body = br#"{"jsonrpc":"2.0","method":"log","bogus":true}"#;
        let framed = format!("Content-Length: {}\r\n\r\n", body.len());
        client.write_all(framed.as_bytes()).await.unwrap();
        client.write_all(body).await.unwrap();
        let err = read_message(&mut server).await.unwrap_err();
        assert!(matches!(err, WireError::Json(_)));
    }

    #[tokio::test]
    async fn int_with_fractional_part_is_rejected_by_value_layer() {
        // Wire envelope accepts arbitrary JSON in `params`; fractional
        // rejection is enforced by `Value::from_json`, not by the codec.
        let raw: Json = serde_json::json!({"count": 3.5});
        let err = crate::value::Value::from_json(raw.get("count").unwrap()).unwrap_err();
        assert!(matches!(err, crate::error::ValueError::NonIntegral(_)));
    }

    #[tokio::test]
    async fn error_response_round_trips() {
        let (mut client, mut server) = duplex(4096);
        let err = PpError::invalid_params("bad shape");
        let msg = Message::error(RequestId::String("abc".to_string()), err);
        write_message(&mut client, &msg).await.unwrap();
        assert_eq!(msg, read_message(&mut server).await.unwrap());
    }

    #[tokio::test]
    async fn method_with_result_is_protocol_violation() {
        let (mut client, mut server) = duplex(4096);
        let body = br#"{"jsonrpc":"2.0","id":1,"method":"log","result":{}}"#;
        let framed = format!("Content-Length: {}\r\n\r\n", body.len());
        client.write_all(framed.as_bytes()).await.unwrap();
        client.write_all(body).await.unwrap();
        let err = read_message(&mut server).await.unwrap_err();
        assert!(matches!(err, WireError::Protocol(_)));
    }
}
