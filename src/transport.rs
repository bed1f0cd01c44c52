//! Request transport between providers and nodes
//!
//! Protocol code talks to nodes only through [`NodeTransport`]. Two
//! implementations are provided:
//! - [`LocalTransport`], an in-process registry of node handlers used by
//!   tests, benches and the local simulation
//! - [`TcpTransport`] plus [`serve`], a length-prefixed JSON framing over TCP
//!   for nodes running as separate processes

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::RwLock;
use tracing::{debug, info, warn};

use crate::directory::Node;
use crate::error::{JodiError, Result};
use crate::messages::{NodeRequest, NodeResponse, NodeType};

/// Maximum frame size (1MB)
pub const MAX_MESSAGE_SIZE: usize = 1024 * 1024;

/// Sends one request to one node and waits for its answer.
#[async_trait]
pub trait NodeTransport: Send + Sync {
    async fn send(&self, node: &Node, request: NodeRequest) -> Result<NodeResponse>;
}

/// Server side of a node: turns a request into a response.
#[async_trait]
pub trait NodeHandler: Send + Sync {
    fn node_type(&self) -> NodeType;

    async fn handle(&self, request: NodeRequest) -> NodeResponse;
}

#[derive(Clone)]
struct LocalEndpoint {
    handler: Arc<dyn NodeHandler>,
    latency: Duration,
}

/// In-process transport keyed by node address.
///
/// Requests and responses pass through their JSON encoding so the wire
/// validation runs exactly as it would over the network. Nodes marked
/// unavailable in the directory fail with `TransportFailure`.
#[derive(Clone, Default)]
pub struct LocalTransport {
    endpoints: Arc<RwLock<HashMap<String, LocalEndpoint>>>,
}

impl LocalTransport {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn register(&self, address: impl Into<String>, handler: Arc<dyn NodeHandler>) {
        self.endpoints.write().await.insert(
            address.into(),
            LocalEndpoint {
                handler,
                latency: Duration::ZERO,
            },
        );
    }

    /// Delay every answer from `address` by `latency`.
    pub async fn set_latency(&self, address: &str, latency: Duration) {
        if let Some(endpoint) = self.endpoints.write().await.get_mut(address) {
            endpoint.latency = latency;
        }
    }

    pub async fn deregister(&self, address: &str) {
        self.endpoints.write().await.remove(address);
    }
}

#[async_trait]
impl NodeTransport for LocalTransport {
    async fn send(&self, node: &Node, request: NodeRequest) -> Result<NodeResponse> {
        if !node.available {
            return Err(JodiError::TransportFailure(format!("node {} is unavailable", node.fqdn)));
        }
        let endpoint = self
            .endpoints
            .read()
            .await
            .get(&node.address)
            .cloned()
            .ok_or_else(|| JodiError::TransportFailure(format!("nothing listening at {}", node.address)))?;

        let request: NodeRequest = serde_json::from_slice(&serde_json::to_vec(&request)?)?;
        if !endpoint.latency.is_zero() {
            tokio::time::sleep(endpoint.latency).await;
        }
        let response = endpoint.handler.handle(request).await;
        Ok(serde_json::from_slice(&serde_json::to_vec(&response)?)?)
    }
}

/// Client side of the framed TCP transport; one connection per request.
#[derive(Clone, Debug, Default)]
pub struct TcpTransport;

impl TcpTransport {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl NodeTransport for TcpTransport {
    async fn send(&self, node: &Node, request: NodeRequest) -> Result<NodeResponse> {
        let mut stream = TcpStream::connect(&node.address)
            .await
            .map_err(|e| JodiError::TransportFailure(format!("failed to connect to {}: {}", node.address, e)))?;
        write_frame(&mut stream, &request)
            .await
            .map_err(|e| JodiError::TransportFailure(format!("send to {} failed: {}", node.address, e)))?;
        read_frame(&mut stream).await.map_err(|e| match e {
            JodiError::Io(msg) => JodiError::TransportFailure(format!("read from {} failed: {}", node.address, msg)),
            other => other,
        })
    }
}

/// Write one frame: a 4-byte big-endian length followed by the JSON body.
pub async fn write_frame<W, T>(stream: &mut W, msg: &T) -> Result<()>
where
    W: AsyncWrite + Unpin,
    T: Serialize,
{
    let data = serde_json::to_vec(msg)?;
    if data.len() > MAX_MESSAGE_SIZE {
        return Err(JodiError::InvalidParameter(format!("message too large: {} bytes", data.len())));
    }

    let len = data.len() as u32;
    stream.write_all(&len.to_be_bytes()).await?;
    stream.write_all(&data).await?;
    stream.flush().await?;
    Ok(())
}

async fn read_frame_bytes<R>(stream: &mut R) -> Result<Vec<u8>>
where
    R: AsyncRead + Unpin,
{
    let mut len_bytes = [0u8; 4];
    stream.read_exact(&mut len_bytes).await?;

    let len = u32::from_be_bytes(len_bytes) as usize;
    if len > MAX_MESSAGE_SIZE {
        return Err(JodiError::Serialization(format!("message too large: {} bytes", len)));
    }

    let mut data = vec![0u8; len];
    stream.read_exact(&mut data).await?;
    Ok(data)
}

/// Read one frame and decode its JSON body.
pub async fn read_frame<R, T>(stream: &mut R) -> Result<T>
where
    R: AsyncRead + Unpin,
    T: DeserializeOwned,
{
    let data = read_frame_bytes(stream).await?;
    Ok(serde_json::from_slice(&data)?)
}

/// Accept connections forever, answering each frame with `handler`.
pub async fn serve(listener: TcpListener, handler: Arc<dyn NodeHandler>) -> Result<()> {
    info!(
        addr = %listener.local_addr()?,
        node_type = ?handler.node_type(),
        "node listening"
    );
    loop {
        let (stream, peer) = match listener.accept().await {
            Ok(accepted) => accepted,
            Err(e) => {
                warn!("failed to accept connection: {}", e);
                continue;
            }
        };
        let handler = Arc::clone(&handler);
        tokio::spawn(async move {
            if let Err(e) = handle_connection(stream, handler).await {
                debug!(%peer, "connection closed: {}", e);
            }
        });
    }
}

async fn handle_connection(mut stream: TcpStream, handler: Arc<dyn NodeHandler>) -> Result<()> {
    loop {
        let data = read_frame_bytes(&mut stream).await?;
        let response = match serde_json::from_slice::<NodeRequest>(&data) {
            Ok(request) => handler.handle(request).await,
            Err(e) => NodeResponse::BadRequest {
                message: format!("malformed request: {}", e),
            },
        };
        write_frame(&mut stream, &response).await?;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct HealthOnly;

    #[async_trait]
    impl NodeHandler for HealthOnly {
        fn node_type(&self) -> NodeType {
            NodeType::MessageStore
        }

        async fn handle(&self, request: NodeRequest) -> NodeResponse {
            match request {
                NodeRequest::Health => NodeResponse::Health {
                    node_type: self.node_type(),
                },
                other => NodeResponse::BadRequest {
                    message: format!("unsupported: {}", other.name()),
                },
            }
        }
    }

    #[tokio::test]
    async fn test_local_transport_routes_by_address() {
        let transport = LocalTransport::new();
        transport.register("ms-0:10431", Arc::new(HealthOnly)).await;

        let node = Node::new("ms-0", "ms-0:10431");
        let response = transport.send(&node, NodeRequest::Health).await.unwrap();
        assert_eq!(response.into_health().unwrap(), NodeType::MessageStore);

        let missing = Node::new("ms-1", "ms-1:10431");
        let err = transport.send(&missing, NodeRequest::Health).await.unwrap_err();
        assert!(matches!(err, JodiError::TransportFailure(_)));
    }

    #[tokio::test]
    async fn test_unavailable_node_fails() {
        let transport = LocalTransport::new();
        transport.register("ms-0:10431", Arc::new(HealthOnly)).await;
        let mut node = Node::new("ms-0", "ms-0:10431");
        node.available = false;
        let err = transport.send(&node, NodeRequest::Health).await.unwrap_err();
        assert!(matches!(err, JodiError::TransportFailure(_)));
    }

    #[tokio::test(start_paused = true)]
    async fn test_latency_is_applied() {
        let transport = LocalTransport::new();
        transport.register("slow", Arc::new(HealthOnly)).await;
        transport.set_latency("slow", Duration::from_secs(5)).await;
        let node = Node::new("slow", "slow");

        let result = tokio::time::timeout(Duration::from_secs(1), transport.send(&node, NodeRequest::Health)).await;
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn test_frame_round_trip() {
        let (mut client, mut server) = tokio::io::duplex(4096);
        write_frame(&mut client, &NodeRequest::Health).await.unwrap();
        let received: NodeRequest = read_frame(&mut server).await.unwrap();
        assert_eq!(received, NodeRequest::Health);
    }

    #[tokio::test]
    async fn test_oversized_frame_rejected() {
        let (mut client, mut server) = tokio::io::duplex(64);
        let len = (MAX_MESSAGE_SIZE as u32 + 1).to_be_bytes();
        client.write_all(&len).await.unwrap();
        let err = read_frame::<_, NodeRequest>(&mut server).await.unwrap_err();
        assert!(matches!(err, JodiError::Serialization(_)));
    }

    #[tokio::test]
    async fn test_tcp_transport_against_serve() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let server = tokio::spawn(serve(listener, Arc::new(HealthOnly)));

        let node = Node::new("ms-0", addr.to_string());
        let response = TcpTransport::new().send(&node, NodeRequest::Health).await.unwrap();
        assert_eq!(response.into_health().unwrap(), NodeType::MessageStore);

        server.abort();
    }

    #[tokio::test]
    async fn test_tcp_connect_failure_is_transport_failure() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);

        let node = Node::new("gone", addr.to_string());
        let err = TcpTransport::new().send(&node, NodeRequest::Health).await.unwrap_err();
        assert!(matches!(err, JodiError::TransportFailure(_)));
    }
}
