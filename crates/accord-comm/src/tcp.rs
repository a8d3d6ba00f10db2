//! TCP transport between agents.
//!
//! Each frame is a 4-byte big-endian length followed by a JSON body. The
//! dialing side opens with `Handshake` carrying its agent id and waits for
//! `HandshakeAck` from the listener; after that both sides exchange
//! `Envelope` frames.

use std::io;
use std::sync::{Arc, Weak};

use accord_core::serialize::{from_json_bytes, to_json_bytes};
use accord_core::{AgentId, Message};
use serde::{Deserialize, Serialize};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;
use tokio::task::AbortHandle;
use tracing::{debug, error, info, warn};

use crate::connection::Transport;
use crate::error::CommError;
use crate::manager::CommunicationManager;

/// Largest frame body accepted or produced (10 MiB)
pub const DEFAULT_MAX_FRAME_SIZE: usize = 10 * 1024 * 1024;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "body", rename_all = "snake_case")]
pub enum Frame {
    Handshake { agent_id: AgentId },
    HandshakeAck { agent_id: AgentId },
    Envelope(Message),
}

/// Length-prefixed encoding of one frame
pub fn encode_frame(frame: &Frame, max_size: usize) -> Result<Vec<u8>, CommError> {
    let body = to_json_bytes(frame)?;
    if body.len() > max_size {
        return Err(CommError::Codec(format!(
            "frame of {} bytes exceeds limit of {}",
            body.len(),
            max_size
        )));
    }

    let mut buf = Vec::with_capacity(4 + body.len());
    buf.extend_from_slice(&(body.len() as u32).to_be_bytes());
    buf.extend_from_slice(&body);
    Ok(buf)
}

/// Read one frame. `None` means the peer closed the stream cleanly.
pub async fn read_frame<R>(reader: &mut R, max_size: usize) -> Result<Option<Frame>, CommError>
where
    R: AsyncRead + Unpin,
{
    let mut len_bytes = [0u8; 4];
    match reader.read_exact(&mut len_bytes).await {
        Ok(_) => {}
        Err(e) if e.kind() == io::ErrorKind::UnexpectedEof => return Ok(None),
        Err(e) => return Err(e.into()),
    }

    let len = u32::from_be_bytes(len_bytes) as usize;
    if len > max_size {
        return Err(CommError::Codec(format!(
            "incoming frame of {} bytes exceeds limit of {}",
            len, max_size
        )));
    }

    let mut body = vec![0u8; len];
    reader.read_exact(&mut body).await?;
    Ok(Some(from_json_bytes(&body)?))
}

pub async fn write_frame<W>(writer: &mut W, frame: &Frame, max_size: usize) -> Result<(), CommError>
where
    W: AsyncWrite + Unpin,
{
    let bytes = encode_frame(frame, max_size)?;
    writer.write_all(&bytes).await?;
    writer.flush().await?;
    Ok(())
}

enum Outbound {
    Frame(Vec<u8>),
    Close,
}

/// Handle to a live TCP connection. Writes go through a channel to a
/// dedicated writer task.
pub struct TcpTransport {
    peer: AgentId,
    outbound: mpsc::UnboundedSender<Outbound>,
    reader: AbortHandle,
    max_frame_size: usize,
}

impl Transport for TcpTransport {
    fn send(&self, message: &Message) -> Result<(), CommError> {
        let bytes = encode_frame(&Frame::Envelope(message.clone()), self.max_frame_size)?;
        self.outbound
            .send(Outbound::Frame(bytes))
            .map_err(|_| CommError::Transport(format!("connection to {} is closed", self.peer)))
    }

    fn close(&self) {
        let _ = self.outbound.send(Outbound::Close);
        self.reader.abort();
    }

    fn is_open(&self) -> bool {
        !self.outbound.is_closed()
    }
}

impl Drop for TcpTransport {
    fn drop(&mut self) {
        self.reader.abort();
    }
}

/// Dial an agent and complete the client side of the handshake
pub(crate) async fn dial(
    manager: &Arc<CommunicationManager>,
    agent_id: &str,
    address: &str,
) -> Result<(u64, Arc<dyn Transport>), CommError> {
    let max = manager.config().max_frame_size;
    let stream = TcpStream::connect(address).await?;
    stream.set_nodelay(true)?;
    let (mut reader, mut writer) = stream.into_split();

    let hello = Frame::Handshake {
        agent_id: manager.agent_id().to_string(),
    };
    write_frame(&mut writer, &hello, max).await?;

    match read_frame(&mut reader, max).await? {
        Some(Frame::HandshakeAck { agent_id: remote }) if remote == agent_id => {}
        Some(Frame::HandshakeAck { agent_id: remote }) => {
            return Err(CommError::Transport(format!(
                "expected agent {} at {}, found {}",
                agent_id, address, remote
            )));
        }
        Some(_) => {
            return Err(CommError::Transport(format!(
                "unexpected frame during handshake with {}",
                address
            )));
        }
        None => {
            return Err(CommError::Transport(format!(
                "{} closed the connection during handshake",
                address
            )));
        }
    }

    debug!("Handshake with {} at {} complete", agent_id, address);
    Ok(spawn_connection(manager, agent_id, reader, writer))
}

/// Accept inbound connections until the manager goes away
pub(crate) async fn accept_loop(manager: Weak<CommunicationManager>, listener: TcpListener) {
    loop {
        let (stream, addr) = match listener.accept().await {
            Ok(accepted) => accepted,
            Err(e) => {
                error!("Error accepting connection: {}", e);
                continue;
            }
        };

        let Some(manager) = manager.upgrade() else {
            break;
        };
        debug!("Accepted connection from {}", addr);

        tokio::spawn(async move {
            let timeout = manager.config().handshake_timeout;
            match tokio::time::timeout(timeout, accept_handshake(&manager, stream)).await {
                Ok(Ok((agent_id, connection_id, transport))) => {
                    manager.install_connection(&agent_id, connection_id, transport).await;
                }
                Ok(Err(e)) => warn!("Handshake from {} failed: {}", addr, e),
                Err(_) => warn!("Handshake from {} timed out", addr),
            }
        });
    }

    info!("Connection listener stopped");
}

async fn accept_handshake(
    manager: &Arc<CommunicationManager>,
    stream: TcpStream,
) -> Result<(AgentId, u64, Arc<dyn Transport>), CommError> {
    let max = manager.config().max_frame_size;
    stream.set_nodelay(true)?;
    let (mut reader, mut writer) = stream.into_split();

    let agent_id = match read_frame(&mut reader, max).await? {
        Some(Frame::Handshake { agent_id }) if !agent_id.is_empty() => agent_id,
        Some(_) => return Err(CommError::Transport("expected handshake frame".to_string())),
        None => return Err(CommError::Transport("closed before handshake".to_string())),
    };

    let ack = Frame::HandshakeAck {
        agent_id: manager.agent_id().to_string(),
    };
    write_frame(&mut writer, &ack, max).await?;

    info!("Agent {} connected", agent_id);
    let (connection_id, transport) = spawn_connection(manager, &agent_id, reader, writer);
    Ok((agent_id, connection_id, transport))
}

fn spawn_connection(
    manager: &Arc<CommunicationManager>,
    agent_id: &str,
    reader: OwnedReadHalf,
    writer: OwnedWriteHalf,
) -> (u64, Arc<dyn Transport>) {
    let connection_id = manager.next_connection_id();
    let max_frame_size = manager.config().max_frame_size;
    let (outbound, rx) = mpsc::unbounded_channel();

    tokio::spawn(write_loop(writer, rx, agent_id.to_string()));
    let read_task = tokio::spawn(read_loop(
        Arc::downgrade(manager),
        reader,
        agent_id.to_string(),
        connection_id,
        max_frame_size,
    ));

    let transport = TcpTransport {
        peer: agent_id.to_string(),
        outbound,
        reader: read_task.abort_handle(),
        max_frame_size,
    };
    (connection_id, Arc::new(transport))
}

async fn write_loop(mut writer: OwnedWriteHalf, mut rx: mpsc::UnboundedReceiver<Outbound>, peer: AgentId) {
    while let Some(outbound) = rx.recv().await {
        match outbound {
            Outbound::Frame(bytes) => {
                if let Err(e) = writer.write_all(&bytes).await {
                    warn!("Write to {} failed: {}", peer, e);
                    break;
                }
            }
            Outbound::Close => break,
        }
    }

    let _ = writer.shutdown().await;
    debug!("Writer for {} stopped", peer);
}

async fn read_loop(
    manager: Weak<CommunicationManager>,
    mut reader: OwnedReadHalf,
    peer: AgentId,
    connection_id: u64,
    max_frame_size: usize,
) {
    let reason = loop {
        match read_frame(&mut reader, max_frame_size).await {
            Ok(Some(Frame::Envelope(message))) => {
                let Some(manager) = manager.upgrade() else {
                    return;
                };
                manager.handle_incoming(message).await;
            }
            Ok(Some(other)) => debug!("Ignoring {:?} from {}", other, peer),
            Ok(None) => break "closed by peer".to_string(),
            Err(e) => break e.to_string(),
        }
    };

    if let Some(manager) = manager.upgrade() {
        manager.connection_lost(&peer, connection_id, &reason).await;
    }
}
