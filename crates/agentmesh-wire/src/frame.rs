//! Wire frame types and framed TCP io.
//!
//! Each frame is a 4-byte big-endian length header followed by a JSON
//! body. The body is a [`Frame`]: a frame id plus a tagged kind.

use agentmesh_types::agent::{AgentId, ServiceSpec};
use agentmesh_types::envelope::Envelope;
use agentmesh_types::error::{MeshError, MeshResult};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use tokio::io::{AsyncReadExt, AsyncWriteExt};

/// Maximum single frame size (16 MB).
pub const MAX_FRAME_SIZE: u32 = 16 * 1024 * 1024;

/// A wire protocol frame.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Frame {
    /// Unique frame id; responses echo the id of the request they answer.
    pub id: String,
    /// Frame variant.
    #[serde(flatten)]
    pub kind: FrameKind,
}

impl Frame {
    /// Build a frame with a fresh random id.
    pub fn new(kind: FrameKind) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            kind,
        }
    }

    /// Build a response frame answering the given request id.
    pub fn reply(request_id: impl Into<String>, response: Response) -> Self {
        Self {
            id: request_id.into(),
            kind: FrameKind::Response(response),
        }
    }
}

/// The different kinds of wire frames.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum FrameKind {
    /// Request from an agent to the network.
    #[serde(rename = "request")]
    Request(Request),
    /// Response to a request.
    #[serde(rename = "response")]
    Response(Response),
    /// One-way notification (no response expected).
    #[serde(rename = "notification")]
    Notification(Notification),
}

/// An adapter requested during registration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AdapterRequest {
    /// Protocol name the adapter binds.
    pub protocol: String,
    /// Opaque adapter-specific configuration.
    #[serde(default)]
    pub config: HashMap<String, String>,
}

impl AdapterRequest {
    /// Request an adapter with empty configuration.
    pub fn new(protocol: impl Into<String>) -> Self {
        Self {
            protocol: protocol.into(),
            config: HashMap::new(),
        }
    }
}

/// Request frames.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "method")]
pub enum Request {
    /// Join the network. Must be the first frame on a new connection.
    #[serde(rename = "register")]
    Register {
        /// Unique agent id chosen by the connecting agent.
        agent_id: AgentId,
        /// Human-readable agent name.
        name: String,
        /// Adapters the agent wants bound; all must reference enabled
        /// protocols or the whole registration is rejected.
        #[serde(default)]
        adapters: Vec<AdapterRequest>,
        /// Services the agent declares.
        #[serde(default)]
        services: Vec<ServiceSpec>,
        /// Topics the agent subscribes to immediately.
        #[serde(default)]
        subscriptions: Vec<String>,
        /// Credential for networks with an authentication scheme.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        credential: Option<String>,
    },
    /// Route an envelope to its destination (recipient or topic).
    #[serde(rename = "send")]
    Send {
        /// The envelope to route.
        envelope: Envelope,
    },
    /// Invoke a declared service on the envelope's recipient and await
    /// the reply.
    #[serde(rename = "call")]
    Call {
        /// Service name on the recipient.
        service: String,
        /// Request envelope; the destination must be a recipient.
        envelope: Envelope,
    },
    /// Subscribe to a topic.
    #[serde(rename = "subscribe")]
    Subscribe { topic: String },
    /// Unsubscribe from a topic.
    #[serde(rename = "unsubscribe")]
    Unsubscribe { topic: String },
    /// Invoke a protocol-specific call on one of the sender's bound
    /// adapters (e.g. an agent_discovery query).
    #[serde(rename = "protocol")]
    Protocol {
        /// Protocol name; must be bound on this connection.
        protocol: String,
        /// Protocol-specific action name.
        action: String,
        /// Protocol-specific request body.
        #[serde(default)]
        payload: Vec<u8>,
        /// Credential for policy-gated protocols.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        credential: Option<String>,
    },
}

/// Response frames.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "method")]
pub enum Response {
    /// Registration accepted.
    #[serde(rename = "register_ack")]
    RegisterAck {
        /// The network's unique id.
        network_id: String,
        /// The network's display name.
        network_name: String,
    },
    /// Generic success for requests with no body.
    #[serde(rename = "ok")]
    Ok,
    /// Result of a service call.
    #[serde(rename = "call_result")]
    CallResult {
        /// Reply envelope; `correlation_id` links it to the request.
        envelope: Envelope,
    },
    /// Result of a protocol-specific call.
    #[serde(rename = "protocol_result")]
    ProtocolResult {
        /// Protocol-specific response body.
        #[serde(default)]
        payload: Vec<u8>,
    },
    /// Error response.
    #[serde(rename = "error")]
    Error {
        /// Error code (matches `MeshError::code`).
        code: i32,
        /// Error message.
        message: String,
    },
}

/// Notification frames (one-way, no response).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "event")]
pub enum Notification {
    /// An envelope delivered to this agent (direct send or topic fanout).
    #[serde(rename = "deliver")]
    Deliver {
        /// The delivered envelope.
        envelope: Envelope,
    },
    /// A service invocation this agent must answer with `call_reply`.
    #[serde(rename = "call_request")]
    CallRequest {
        /// Correlation id the reply must echo.
        correlation_id: String,
        /// Service being invoked.
        service: String,
        /// The caller's request envelope.
        envelope: Envelope,
    },
    /// Answer to a previously delivered `call_request`.
    #[serde(rename = "call_reply")]
    CallReply {
        /// Correlation id from the `call_request`.
        correlation_id: String,
        /// Service-specific reply body.
        #[serde(default)]
        payload: Vec<u8>,
    },
    /// Peer is closing the connection.
    #[serde(rename = "goodbye")]
    Goodbye,
}

/// Encode a frame to bytes (4-byte big-endian length + JSON).
pub fn encode_frame(frame: &Frame) -> MeshResult<Vec<u8>> {
    let json = serde_json::to_vec(frame)?;
    let len = json.len() as u32;
    let mut bytes = Vec::with_capacity(4 + json.len());
    bytes.extend_from_slice(&len.to_be_bytes());
    bytes.extend_from_slice(&json);
    Ok(bytes)
}

/// Decode the length prefix from a 4-byte header.
pub fn decode_length(header: &[u8; 4]) -> u32 {
    u32::from_be_bytes(*header)
}

/// Parse a JSON body into a Frame.
pub fn decode_frame(body: &[u8]) -> MeshResult<Frame> {
    Ok(serde_json::from_slice(body)?)
}

/// Write a framed message to a TCP stream.
pub async fn write_frame(
    writer: &mut tokio::net::tcp::OwnedWriteHalf,
    frame: &Frame,
) -> MeshResult<()> {
    let bytes = encode_frame(frame)?;
    writer.write_all(&bytes).await?;
    writer.flush().await?;
    Ok(())
}

/// Read a framed message from a TCP stream.
///
/// EOF on the length header means the peer closed the connection.
pub async fn read_frame(reader: &mut tokio::net::tcp::OwnedReadHalf) -> MeshResult<Frame> {
    let mut header = [0u8; 4];
    match reader.read_exact(&mut header).await {
        Ok(_) => {}
        Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => {
            return Err(MeshError::ConnectionClosed("peer closed".to_string()));
        }
        Err(e) => return Err(MeshError::Io(e)),
    }

    let len = decode_length(&header);
    if len > MAX_FRAME_SIZE {
        return Err(MeshError::FrameTooLarge {
            size: len,
            max: MAX_FRAME_SIZE,
        });
    }

    let mut body = vec![0u8; len as usize];
    reader.read_exact(&mut body).await?;
    decode_frame(&body)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_encode_decode_roundtrip() {
        let frame = Frame::new(FrameKind::Request(Request::Subscribe {
            topic: "general".to_string(),
        }));
        let bytes = encode_frame(&frame).unwrap();
        let len = decode_length(&[bytes[0], bytes[1], bytes[2], bytes[3]]);
        assert_eq!(len as usize, bytes.len() - 4);
        let decoded = decode_frame(&bytes[4..]).unwrap();
        assert_eq!(decoded.id, frame.id);
        match decoded.kind {
            FrameKind::Request(Request::Subscribe { topic }) => assert_eq!(topic, "general"),
            other => panic!("Expected Subscribe, got {other:?}"),
        }
    }

    #[test]
    fn test_register_serialization() {
        let frame = Frame::new(FrameKind::Request(Request::Register {
            agent_id: AgentId::new("agent1"),
            name: "Agent One".to_string(),
            adapters: vec![AdapterRequest::new("simple_messaging")],
            services: vec![ServiceSpec::new("echo", "Echo the payload back")],
            subscriptions: vec!["general".to_string()],
            credential: None,
        }));
        let json = serde_json::to_string(&frame).unwrap();
        assert!(json.contains("\"method\":\"register\""));
        assert!(json.contains("simple_messaging"));
        assert!(!json.contains("credential"));
        let decoded: Frame = serde_json::from_str(&json).unwrap();
        match decoded.kind {
            FrameKind::Request(Request::Register {
                agent_id, adapters, ..
            }) => {
                assert_eq!(agent_id.as_str(), "agent1");
                assert_eq!(adapters.len(), 1);
            }
            other => panic!("Expected Register, got {other:?}"),
        }
    }

    #[test]
    fn test_error_response() {
        let frame = Frame::reply(
            "req-1",
            Response::Error {
                code: 5,
                message: "Unknown agent: ghost".to_string(),
            },
        );
        let json = serde_json::to_string(&frame).unwrap();
        let decoded: Frame = serde_json::from_str(&json).unwrap();
        assert_eq!(decoded.id, "req-1");
        match decoded.kind {
            FrameKind::Response(Response::Error { code, message }) => {
                assert_eq!(code, 5);
                assert!(message.contains("ghost"));
            }
            other => panic!("Expected Error, got {other:?}"),
        }
    }

    #[test]
    fn test_deliver_notification_serialization() {
        let envelope = Envelope::publish("simple_messaging", "a1", "general", b"hi".to_vec());
        let frame = Frame::new(FrameKind::Notification(Notification::Deliver {
            envelope: envelope.clone(),
        }));
        let json = serde_json::to_string(&frame).unwrap();
        assert!(json.contains("\"event\":\"deliver\""));
        let decoded: Frame = serde_json::from_str(&json).unwrap();
        match decoded.kind {
            FrameKind::Notification(Notification::Deliver { envelope: e }) => {
                assert_eq!(e, envelope);
            }
            other => panic!("Expected Deliver, got {other:?}"),
        }
    }

    #[test]
    fn test_oversized_frame_rejected() {
        // Hand-build a header claiming a body larger than the limit.
        let header = (MAX_FRAME_SIZE + 1).to_be_bytes();
        assert_eq!(decode_length(&header), MAX_FRAME_SIZE + 1);
    }

    #[tokio::test]
    async fn test_framed_io_over_tcp() {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        let server = tokio::spawn(async move {
            let (stream, _) = listener.accept().await.unwrap();
            let (mut reader, _writer) = stream.into_split();
            read_frame(&mut reader).await.unwrap()
        });

        let stream = tokio::net::TcpStream::connect(addr).await.unwrap();
        let (_reader, mut writer) = stream.into_split();
        let frame = Frame::new(FrameKind::Request(Request::Unsubscribe {
            topic: "general".to_string(),
        }));
        write_frame(&mut writer, &frame).await.unwrap();

        let received = server.await.unwrap();
        assert_eq!(received.id, frame.id);
    }
}
