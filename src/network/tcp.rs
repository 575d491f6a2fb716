//! Framed TCP transport.
//!
//! Every frame is a `u32` length prefix followed by a bincode encoded
//! [`ClientFrame`] or [`ServerFrame`]. A connection starts with an
//! `Authenticate` / `Authenticated` exchange; afterwards requests and
//! responses are matched through their correlation id, so several requests
//! can be in flight on one connection.

use std::sync::atomic::AtomicU64;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use dashmap::DashMap;
use futures::stream::SplitSink;
use futures::stream::SplitStream;
use futures::SinkExt;
use futures::StreamExt;
use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde::Serialize;
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio::sync::oneshot;
use tokio_util::bytes::Bytes;
use tokio_util::codec::Framed;
use tokio_util::codec::LengthDelimitedCodec;
use tokio_util::sync::CancellationToken;
use tracing::debug;
use tracing::trace;
use tracing::warn;

use super::Connector;
use super::MemberChannel;
use crate::constants::MAX_FRAME_LENGTH;
use crate::constants::OUTBOUND_QUEUE_CAPACITY;
use crate::ClientConfig;
use crate::Error;
use crate::Member;
use crate::NetworkError;
use crate::Operation;
use crate::OperationResult;
use crate::Result;

pub type FramedStream = Framed<TcpStream, LengthDelimitedCodec>;

/// Frames sent by the client
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum ClientFrame {
    Authenticate {
        cluster_name: String,
        client_name: String,
    },
    Ping {
        correlation_id: u64,
    },
    Invoke {
        correlation_id: u64,
        operation: Operation,
    },
}

/// Frames sent by a member
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum ServerFrame {
    Authenticated {
        member: Member,
    },
    /// The member belongs to another cluster or refused the client
    AuthenticationFailed {
        reason: String,
    },
    Pong {
        correlation_id: u64,
    },
    Response {
        correlation_id: u64,
        result: std::result::Result<OperationResult, String>,
    },
}

impl ServerFrame {
    fn correlation_id(&self) -> Option<u64> {
        match self {
            ServerFrame::Pong { correlation_id } | ServerFrame::Response { correlation_id, .. } => {
                Some(*correlation_id)
            }
            _ => None,
        }
    }
}

/// Wraps a socket with the length-delimited codec used on both sides
pub fn framed(stream: TcpStream) -> FramedStream {
    let codec = LengthDelimitedCodec::builder()
        .max_frame_length(MAX_FRAME_LENGTH)
        .new_codec();
    Framed::new(stream, codec)
}

pub fn encode_frame<T: Serialize>(frame: &T) -> std::result::Result<Bytes, NetworkError> {
    Ok(Bytes::from(bincode::serialize(frame)?))
}

pub fn decode_frame<T: DeserializeOwned>(bytes: &[u8]) -> std::result::Result<T, NetworkError> {
    Ok(bincode::deserialize(bytes)?)
}

/// Opens authenticated TCP channels to members
#[derive(Debug, Clone)]
pub struct TcpConnector {
    cluster_name: String,
    client_name: String,
    connect_timeout: Duration,
}

impl TcpConnector {
    pub fn new(
        cluster_name: impl Into<String>,
        client_name: impl Into<String>,
        connect_timeout: Duration,
    ) -> Self {
        Self {
            cluster_name: cluster_name.into(),
            client_name: client_name.into(),
            connect_timeout,
        }
    }

    pub fn from_config(config: &ClientConfig) -> Self {
        Self::new(
            config.cluster.cluster_name.clone(),
            config.cluster.client_name.clone(),
            config.network.connect_timeout(),
        )
    }

    async fn handshake(
        &self,
        address: &str,
    ) -> Result<TcpChannel> {
        let stream = TcpStream::connect(address).await.map_err(NetworkError::from)?;
        stream.set_nodelay(true).map_err(NetworkError::from)?;
        let local_address = stream.local_addr().ok().map(|a| a.to_string());
        let mut framed = framed(stream);

        let authenticate = ClientFrame::Authenticate {
            cluster_name: self.cluster_name.clone(),
            client_name: self.client_name.clone(),
        };
        framed.send(encode_frame(&authenticate)?).await.map_err(NetworkError::from)?;

        let reply = match framed.next().await {
            Some(Ok(bytes)) => decode_frame::<ServerFrame>(&bytes)?,
            Some(Err(e)) => return Err(NetworkError::from(e).into()),
            None => {
                return Err(NetworkError::Handshake {
                    address: address.to_string(),
                    reason: "connection closed during handshake".to_string(),
                }
                .into())
            }
        };

        match reply {
            ServerFrame::Authenticated { member } => {
                debug!(%member, ?local_address, "authenticated");
                Ok(TcpChannel::spawn(member, local_address, framed))
            }
            ServerFrame::AuthenticationFailed { reason } => Err(Error::Configuration(format!(
                "member at {address} rejected cluster {}: {reason}",
                self.cluster_name
            ))),
            other => Err(NetworkError::Handshake {
                address: address.to_string(),
                reason: format!("unexpected frame {other:?}"),
            }
            .into()),
        }
    }
}

#[async_trait]
impl Connector for TcpConnector {
    async fn connect(
        &self,
        address: &str,
    ) -> Result<Arc<dyn MemberChannel>> {
        match tokio::time::timeout(self.connect_timeout, self.handshake(address)).await {
            Ok(channel) => Ok(Arc::new(channel?)),
            Err(_) => Err(NetworkError::Timeout {
                address: address.to_string(),
                duration: self.connect_timeout,
            }
            .into()),
        }
    }
}

type Pending = Arc<DashMap<u64, oneshot::Sender<ServerFrame>>>;

/// One authenticated connection; a reader and a writer task own the socket halves
pub struct TcpChannel {
    member: Member,
    local_address: Option<String>,
    outbound: mpsc::Sender<ClientFrame>,
    pending: Pending,
    next_correlation_id: AtomicU64,
    closed: CancellationToken,
}

impl std::fmt::Debug for TcpChannel {
    fn fmt(
        &self,
        f: &mut std::fmt::Formatter<'_>,
    ) -> std::fmt::Result {
        f.debug_struct("TcpChannel")
            .field("member", &self.member)
            .field("local_address", &self.local_address)
            .field("closed", &self.closed.is_cancelled())
            .finish()
    }
}

impl TcpChannel {
    fn spawn(
        member: Member,
        local_address: Option<String>,
        framed: FramedStream,
    ) -> Self {
        let (sink, stream) = framed.split();
        let (outbound, rx) = mpsc::channel(OUTBOUND_QUEUE_CAPACITY);
        let pending: Pending = Arc::new(DashMap::new());
        let closed = CancellationToken::new();

        tokio::spawn(write_loop(sink, rx, closed.clone()));
        tokio::spawn(read_loop(stream, pending.clone(), closed.clone(), member.clone()));

        Self {
            member,
            local_address,
            outbound,
            pending,
            next_correlation_id: AtomicU64::new(1),
            closed,
        }
    }

    async fn request(
        &self,
        frame: impl FnOnce(u64) -> ClientFrame,
    ) -> std::result::Result<ServerFrame, NetworkError> {
        if self.closed.is_cancelled() {
            return Err(NetworkError::NotSent);
        }
        let correlation_id = self.next_correlation_id.fetch_add(1, Ordering::Relaxed);
        let (tx, rx) = oneshot::channel();
        self.pending.insert(correlation_id, tx);

        if self.outbound.send(frame(correlation_id)).await.is_err() {
            self.pending.remove(&correlation_id);
            return Err(NetworkError::NotSent);
        }

        tokio::select! {
            biased;
            reply = rx => reply.map_err(|_| NetworkError::Disconnected),
            _ = self.closed.cancelled() => {
                self.pending.remove(&correlation_id);
                Err(NetworkError::Disconnected)
            }
        }
    }
}

impl Drop for TcpChannel {
    fn drop(&mut self) {
        self.closed.cancel();
    }
}

#[async_trait]
impl MemberChannel for TcpChannel {
    fn member(&self) -> Member {
        self.member.clone()
    }

    fn local_address(&self) -> Option<String> {
        self.local_address.clone()
    }

    async fn ping(&self) -> std::result::Result<(), NetworkError> {
        match self.request(|correlation_id| ClientFrame::Ping { correlation_id }).await? {
            ServerFrame::Pong { .. } => Ok(()),
            other => Err(NetworkError::Codec(format!("expected pong, got {other:?}"))),
        }
    }

    async fn invoke(
        &self,
        operation: Operation,
    ) -> Result<OperationResult> {
        let reply = self
            .request(|correlation_id| ClientFrame::Invoke {
                correlation_id,
                operation,
            })
            .await?;
        match reply {
            ServerFrame::Response { result: Ok(result), .. } => Ok(result),
            ServerFrame::Response { result: Err(reason), .. } => Err(Error::Remote(reason)),
            other => Err(NetworkError::Codec(format!("expected response, got {other:?}")).into()),
        }
    }

    async fn closed(&self) {
        self.closed.cancelled().await
    }

    fn close(&self) {
        self.closed.cancel();
    }
}

async fn write_loop(
    mut sink: SplitSink<FramedStream, Bytes>,
    mut rx: mpsc::Receiver<ClientFrame>,
    closed: CancellationToken,
) {
    loop {
        let frame = tokio::select! {
            _ = closed.cancelled() => break,
            frame = rx.recv() => match frame {
                Some(frame) => frame,
                None => break,
            },
        };
        let bytes = match encode_frame(&frame) {
            Ok(bytes) => bytes,
            Err(e) => {
                warn!("dropping unencodable frame: {}", e);
                continue;
            }
        };
        if let Err(e) = sink.send(bytes).await {
            debug!("write failed, closing channel: {}", e);
            break;
        }
    }
    closed.cancel();
    let _ = sink.close().await;
}

async fn read_loop(
    mut stream: SplitStream<FramedStream>,
    pending: Pending,
    closed: CancellationToken,
    member: Member,
) {
    loop {
        let next = tokio::select! {
            _ = closed.cancelled() => break,
            next = stream.next() => next,
        };
        let bytes = match next {
            Some(Ok(bytes)) => bytes,
            Some(Err(e)) => {
                debug!(%member, "read failed, closing channel: {}", e);
                break;
            }
            None => {
                debug!(%member, "channel closed by peer");
                break;
            }
        };

        let frame = match decode_frame::<ServerFrame>(&bytes) {
            Ok(frame) => frame,
            Err(e) => {
                warn!(%member, "undecodable frame: {}", e);
                continue;
            }
        };
        match frame.correlation_id() {
            Some(correlation_id) => {
                if let Some((_, tx)) = pending.remove(&correlation_id) {
                    let _ = tx.send(frame);
                } else {
                    trace!(correlation_id, "response without waiter");
                }
            }
            None => warn!(%member, ?frame, "unexpected frame after handshake"),
        }
    }
    closed.cancel();
    // waiters see their sender dropped and report Disconnected
    pending.clear();
}
