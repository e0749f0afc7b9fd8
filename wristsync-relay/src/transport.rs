//! TCP relay between the phone and watch roles: handshake + encrypted frames.
//!
//! One peer at a time. The phone listens and replaces its connection when the watch
//! reconnects; the watch dials and retries on a fixed interval. Reachability is true only
//! while a handshaken connection is live. Nothing is queued while unreachable.

use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use tokio::io::{AsyncRead, AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;
use wristsync_core::identity::{decrypt_wire, encrypt_wire, PublicKey, SessionKeys, WIRE_TAG_LEN};
use wristsync_core::wire::{decode_frame, encode_frame, LEN_SIZE, MAX_FRAME_LEN};
use wristsync_core::{Activatable, Keypair, Message, MessageTransport, SendError, PROTOCOL_VERSION};

const HANDSHAKE_FIXED: usize = 1 + 32 + 2; // version + public_key + identifier length
const MAX_IDENTIFIER_LEN: usize = 256;
/// Largest sealed frame a peer may send: a full plaintext frame plus the AEAD tag.
const MAX_SEALED_LEN: u32 = MAX_FRAME_LEN + (LEN_SIZE + WIRE_TAG_LEN) as u32;

/// Which end of the link this process plays.
#[derive(Debug, Clone)]
pub enum Role {
    /// Serving device: accept the watch on `bind`.
    Phone { bind: SocketAddr },
    /// Requesting device: dial `peer`, retrying every `reconnect_interval`.
    Watch {
        peer: String,
        reconnect_interval: Duration,
    },
}

struct Shared {
    identifier: String,
    reachable: AtomicBool,
    generation: AtomicU64,
    writer: Mutex<Option<(u64, mpsc::UnboundedSender<Message>)>>,
    inbound: mpsc::UnboundedSender<Message>,
}

impl Shared {
    fn install_writer(&self, tx: mpsc::UnboundedSender<Message>) -> u64 {
        let generation = self.generation.fetch_add(1, Ordering::SeqCst) + 1;
        *self.writer.lock().unwrap_or_else(PoisonError::into_inner) = Some((generation, tx));
        self.reachable.store(true, Ordering::SeqCst);
        generation
    }

    /// Only the connection that installed the current writer may clear it.
    fn remove_writer(&self, generation: u64) {
        let mut slot = self.writer.lock().unwrap_or_else(PoisonError::into_inner);
        if matches!(&*slot, Some((g, _)) if *g == generation) {
            *slot = None;
            self.reachable.store(false, Ordering::SeqCst);
        }
    }
}

/// [`MessageTransport`] over TCP. Inbound messages go to the receiver returned by [`TcpRelay::new`].
pub struct TcpRelay {
    role: Role,
    activated: AtomicBool,
    shared: Arc<Shared>,
}

impl TcpRelay {
    pub fn new(
        role: Role,
        identifier: String,
    ) -> (Arc<Self>, mpsc::UnboundedReceiver<Message>) {
        let (inbound, inbound_rx) = mpsc::unbounded_channel();
        let relay = Arc::new(Self {
            role,
            activated: AtomicBool::new(false),
            shared: Arc::new(Shared {
                identifier,
                reachable: AtomicBool::new(false),
                generation: AtomicU64::new(0),
                writer: Mutex::new(None),
                inbound,
            }),
        });
        (relay, inbound_rx)
    }
}

impl Activatable for TcpRelay {
    /// Must be called from within a tokio runtime.
    fn activate(&self) {
        if self.activated.swap(true, Ordering::SeqCst) {
            return;
        }
        let shared = self.shared.clone();
        match self.role.clone() {
            Role::Phone { bind } => {
                tokio::spawn(async move {
                    if let Err(e) = accept_loop(shared, bind).await {
                        tracing::error!(%bind, error = %e, "listener stopped");
                    }
                });
            }
            Role::Watch {
                peer,
                reconnect_interval,
            } => {
                tokio::spawn(connect_loop(shared, peer, reconnect_interval));
            }
        }
    }
}

impl MessageTransport for TcpRelay {
    fn is_reachable(&self) -> bool {
        self.shared.reachable.load(Ordering::SeqCst)
    }

    fn send(&self, message: Message) -> Result<(), SendError> {
        let slot = self
            .shared
            .writer
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        match &*slot {
            Some((_, tx)) => tx.send(message).map_err(|_| SendError::Closed),
            None => Err(SendError::Unreachable),
        }
    }
}

async fn accept_loop(shared: Arc<Shared>, bind: SocketAddr) -> std::io::Result<()> {
    let listener = TcpListener::bind(bind).await?;
    tracing::info!(%bind, "waiting for watch");
    loop {
        let (mut stream, from) = listener.accept().await?;
        let shared = shared.clone();
        tokio::spawn(async move {
            match handshake_accept(&mut stream, &shared.identifier).await {
                Ok((peer, keys)) => {
                    tracing::info!(%from, %peer, "watch connected");
                    run_connection(stream, peer, keys, shared).await;
                }
                Err(e) => tracing::warn!(%from, error = %e, "handshake failed"),
            }
        });
    }
}

async fn connect_loop(shared: Arc<Shared>, peer_addr: String, reconnect_interval: Duration) {
    loop {
        match TcpStream::connect(peer_addr.as_str()).await {
            Ok(mut stream) => match handshake_connect(&mut stream, &shared.identifier).await {
                Ok((peer, keys)) => {
                    tracing::info!(addr = %peer_addr, %peer, "phone connected");
                    run_connection(stream, peer, keys, shared.clone()).await;
                }
                Err(e) => tracing::warn!(addr = %peer_addr, error = %e, "handshake failed"),
            },
            Err(e) => tracing::debug!(addr = %peer_addr, error = %e, "phone not reachable"),
        }
        tokio::time::sleep(reconnect_interval).await;
    }
}

fn handshake_bytes(identifier: &str, public_key: &PublicKey) -> Vec<u8> {
    let mut end = identifier.len().min(MAX_IDENTIFIER_LEN);
    while !identifier.is_char_boundary(end) {
        end -= 1;
    }
    let id = &identifier.as_bytes()[..end];
    let mut out = Vec::with_capacity(HANDSHAKE_FIXED + id.len());
    out.push(PROTOCOL_VERSION);
    out.extend_from_slice(public_key.as_bytes());
    out.extend_from_slice(&(id.len() as u16).to_le_bytes());
    out.extend_from_slice(id);
    out
}

/// Read the peer's hello; returns its identifier and public key.
async fn read_handshake<R: AsyncRead + Unpin>(r: &mut R) -> std::io::Result<(String, PublicKey)> {
    let mut buf = [0u8; HANDSHAKE_FIXED];
    r.read_exact(&mut buf).await?;
    if buf[0] != PROTOCOL_VERSION {
        return Err(std::io::Error::new(
            std::io::ErrorKind::InvalidData,
            "unsupported protocol version",
        ));
    }
    let mut public_key = [0u8; 32];
    public_key.copy_from_slice(&buf[1..33]);
    let id_len = u16::from_le_bytes([buf[33], buf[34]]) as usize;
    if id_len > MAX_IDENTIFIER_LEN {
        return Err(std::io::Error::new(
            std::io::ErrorKind::InvalidData,
            "identifier too long",
        ));
    }
    let mut id = vec![0u8; id_len];
    r.read_exact(&mut id).await?;
    let identifier = String::from_utf8(id)
        .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidData, e))?;
    Ok((identifier, PublicKey(public_key)))
}

/// Phone side. Both halves use a fresh keypair per handshake.
async fn handshake_accept(
    stream: &mut TcpStream,
    identifier: &str,
) -> std::io::Result<(String, SessionKeys)> {
    let keypair = Keypair::generate();
    let (mut r, mut w) = stream.split();
    let (peer, peer_public) = read_handshake(&mut r).await?;
    w.write_all(&handshake_bytes(identifier, keypair.public_key())).await?;
    w.flush().await?;
    let keys = SessionKeys::for_phone(&keypair.shared_secret(&peer_public));
    Ok((peer, keys))
}

async fn handshake_connect(
    stream: &mut TcpStream,
    identifier: &str,
) -> std::io::Result<(String, SessionKeys)> {
    let keypair = Keypair::generate();
    let (mut r, mut w) = stream.split();
    w.write_all(&handshake_bytes(identifier, keypair.public_key())).await?;
    w.flush().await?;
    let (peer, peer_public) = read_handshake(&mut r).await?;
    let keys = SessionKeys::for_watch(&keypair.shared_secret(&peer_public));
    Ok((peer, keys))
}

async fn run_connection(stream: TcpStream, peer: String, keys: SessionKeys, shared: Arc<Shared>) {
    let (tx, mut rx) = mpsc::unbounded_channel::<Message>();
    let generation = shared.install_writer(tx);
    let (mut reader, mut writer) = stream.into_split();
    let SessionKeys { send, recv } = keys;

    let writer_task = tokio::spawn(async move {
        let mut write_nonce: u64 = 0;
        while let Some(message) = rx.recv().await {
            let frame = match encode_frame(&message) {
                Ok(f) => f,
                Err(e) => {
                    tracing::warn!(kind = message.kind(), error = %e, "encode failed; dropped");
                    continue;
                }
            };
            let cipher = match encrypt_wire(&send, write_nonce, &frame) {
                Ok(c) => c,
                Err(e) => {
                    tracing::warn!(error = %e, "encrypt failed; dropped");
                    continue;
                }
            };
            write_nonce = write_nonce.saturating_add(1);
            let len = cipher.len() as u32;
            if writer.write_all(&len.to_le_bytes()).await.is_err()
                || writer.write_all(&cipher).await.is_err()
                || writer.flush().await.is_err()
            {
                break;
            }
        }
    });

    let mut read_nonce: u64 = 0;
    loop {
        let mut len_buf = [0u8; LEN_SIZE];
        if reader.read_exact(&mut len_buf).await.is_err() {
            break;
        }
        let len = u32::from_le_bytes(len_buf);
        if len > MAX_SEALED_LEN {
            tracing::warn!(%peer, len, "oversized frame; closing");
            break;
        }
        let mut cipher = vec![0u8; len as usize];
        if reader.read_exact(&mut cipher).await.is_err() {
            break;
        }
        let plain = match decrypt_wire(&recv, read_nonce, &cipher) {
            Ok(p) => p,
            Err(e) => {
                tracing::warn!(%peer, error = %e, "bad frame; closing");
                break;
            }
        };
        read_nonce = read_nonce.saturating_add(1);
        match decode_frame(&plain) {
            Ok((message, _)) => {
                if shared.inbound.send(message).is_err() {
                    break;
                }
            }
            Err(e) => tracing::warn!(%peer, error = %e, "undecodable message skipped"),
        }
    }

    shared.remove_writer(generation);
    writer_task.abort();
    tracing::info!(%peer, "peer disconnected");
}
