//! Native SMB2 session layer over TCP.
//!
//! Speaks dialects 2.0.2 and 2.1 with NTLMv2 authentication, one request in
//! flight per session. Messages are signed when the server requires it.

mod ntlm;
mod wire;

#[cfg(test)]
mod loopback;

use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use async_trait::async_trait;
use bytes::{Bytes, BytesMut};
use dualstore_core::normalize::{FILETIME_TICKS_PER_SECOND, FILETIME_UNIX_OFFSET};
use tokio::io::AsyncWriteExt;
use tokio::net::TcpStream;
use tokio::sync::Mutex;
use tracing::{debug, info, instrument};

use crate::error::ShareError;
use crate::status::NtStatus;
use crate::transport::{FileId, OpenOptions, ShareConnector, ShareSession, ShareTarget};

use self::ntlm::{Challenge, Credentials};
use self::wire::{Command, Header, Message, NegotiateReply, SessionSetupReply};

pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// Opens SMB2 sessions over TCP.
#[derive(Debug, Clone)]
pub struct Smb2Connector {
    timeout: Duration,
}

impl Smb2Connector {
    pub fn new() -> Self {
        Self {
            timeout: DEFAULT_REQUEST_TIMEOUT,
        }
    }

    /// Bound on the TCP connect and on each request/reply exchange.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }
}

impl Default for Smb2Connector {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ShareConnector for Smb2Connector {
    #[instrument(skip(self, target), fields(unc = %target.unc(), port = target.port), level = "debug")]
    async fn connect(&self, target: &ShareTarget) -> Result<Arc<dyn ShareSession>, ShareError> {
        let session = Smb2Session::establish(target, self.timeout).await?;
        Ok(Arc::new(session))
    }
}

/// The socket and message sequence of one connection.
struct Channel {
    stream: TcpStream,
    next_message_id: u64,
}

impl Channel {
    /// Send one request and wait for its final reply. Interim replies and
    /// unsolicited messages are skipped.
    async fn exchange(
        &mut self,
        mut header: Header,
        body: &[u8],
        signing_key: Option<&[u8; 16]>,
    ) -> Result<Message, ShareError> {
        header.message_id = self.next_message_id;
        self.next_message_id += 1;

        let mut message = wire::encode_message(&header, body);
        if let Some(key) = signing_key {
            wire::sign(&mut message, key)?;
        }
        let framed = wire::frame(&message)?;
        self.stream
            .write_all(&framed)
            .await
            .map_err(wire::transport)?;

        loop {
            let reply = Message::parse(wire::read_frame(&mut self.stream).await?)?;
            if reply.header.message_id != header.message_id {
                debug!(
                    "Skipping unsolicited reply (message {}, command 0x{:04x})",
                    reply.header.message_id, reply.header.command
                );
                continue;
            }
            if reply.header.is_interim() {
                continue;
            }
            return Ok(reply);
        }
    }
}

/// A tree-connected SMB2 session.
pub struct Smb2Session {
    channel: Mutex<Channel>,
    session_id: u64,
    tree_id: u32,
    signing_key: Option<[u8; 16]>,
    max_read: u32,
    max_write: u32,
    max_transact: u32,
    timeout: Duration,
}

impl Smb2Session {
    async fn establish(target: &ShareTarget, timeout: Duration) -> Result<Self, ShareError> {
        let address = (target.server.as_str(), target.port);
        let stream = with_timeout(timeout, "connecting", async {
            TcpStream::connect(address).await.map_err(|e| {
                ShareError::Transport(format!(
                    "cannot reach {}:{}: {}",
                    target.server, target.port, e
                ))
            })
        })
        .await?;
        stream.set_nodelay(true).map_err(wire::transport)?;

        let mut channel = Channel {
            stream,
            next_message_id: 0,
        };

        let negotiated = with_timeout(timeout, "negotiating", async {
            let reply = channel
                .exchange(
                    Header::request(Command::Negotiate),
                    &wire::negotiate_request(*uuid::Uuid::new_v4().as_bytes()),
                    None,
                )
                .await?;
            expect_success(&reply)?;
            NegotiateReply::parse(&reply)
        })
        .await?;
        debug!(
            "Negotiated dialect {:?}, signing required: {}",
            negotiated.dialect,
            negotiated.signing_required()
        );

        let credentials = Credentials::new(&target.username, &target.password);
        let (session_id, session_key, guest) = with_timeout(timeout, "authenticating", async {
            authenticate(&mut channel, &credentials).await
        })
        .await?;

        let signing_key = match (negotiated.signing_required(), guest) {
            (true, false) => Some(session_key),
            _ => None,
        };

        let unc = target.unc();
        let tree_id = with_timeout(timeout, "connecting to the share", async {
            let mut header = Header::request(Command::TreeConnect);
            header.session_id = session_id;
            let reply = channel
                .exchange(header, &wire::tree_connect_request(&unc), signing_key.as_ref())
                .await?;
            expect_success(&reply)?;
            Ok(reply.header.tree_id)
        })
        .await?;

        info!(
            "SMB2 session to {} established ({:?}{})",
            unc,
            negotiated.dialect,
            if signing_key.is_some() { ", signed" } else { "" }
        );

        Ok(Self {
            channel: Mutex::new(channel),
            session_id,
            tree_id,
            signing_key,
            max_read: negotiated.max_read.clamp(1, wire::MAX_SINGLE_CREDIT_PAYLOAD),
            max_write: negotiated.max_write.clamp(1, wire::MAX_SINGLE_CREDIT_PAYLOAD),
            max_transact: negotiated
                .max_transact
                .clamp(1, wire::MAX_SINGLE_CREDIT_PAYLOAD),
            timeout,
        })
    }

    /// One tree-scoped request; any non-success status is an error.
    async fn call(&self, command: Command, body: BytesMut) -> Result<Message, ShareError> {
        let mut header = Header::request(command);
        header.session_id = self.session_id;
        header.tree_id = self.tree_id;

        let reply = with_timeout(self.timeout, command_label(command), async {
            let mut channel = self.channel.lock().await;
            channel
                .exchange(header, &body, self.signing_key.as_ref())
                .await
        })
        .await?;
        expect_success(&reply)?;
        Ok(reply)
    }

    async fn read_once(&self, file: FileId, offset: u64, length: u32) -> Result<Bytes, ShareError> {
        let reply = self
            .call(Command::Read, wire::read_request(file, offset, length))
            .await?;
        wire::parse_read_reply(&reply)
    }
}

#[async_trait]
impl ShareSession for Smb2Session {
    async fn create(&self, path: &str, options: &OpenOptions) -> Result<FileId, ShareError> {
        let reply = self
            .call(Command::Create, wire::create_request(path, options))
            .await?;
        wire::parse_create_reply(&reply)
    }

    async fn query_directory(
        &self,
        directory: FileId,
        pattern: &str,
        restart_scan: bool,
    ) -> Result<Bytes, ShareError> {
        let body =
            wire::query_directory_request(directory, pattern, restart_scan, self.max_transact);
        let reply = self.call(Command::QueryDirectory, body).await?;
        wire::parse_query_directory_reply(&reply)
    }

    /// Reads up to `length` bytes, splitting into requests the server
    /// accepts. A short reply ends the read early.
    async fn read(&self, file: FileId, offset: u64, length: u32) -> Result<Bytes, ShareError> {
        let mut out = BytesMut::new();
        while (out.len() as u32) < length {
            let want = (length - out.len() as u32).min(self.max_read);
            let position = offset + out.len() as u64;
            match self.read_once(file, position, want).await {
                Ok(chunk) => {
                    let short = (chunk.len() as u32) < want;
                    out.extend_from_slice(&chunk);
                    if short {
                        break;
                    }
                }
                Err(e) if e.is_status(NtStatus::END_OF_FILE) && !out.is_empty() => break,
                Err(e) => return Err(e),
            }
        }
        Ok(out.freeze())
    }

    async fn write(&self, file: FileId, offset: u64, data: &[u8]) -> Result<u32, ShareError> {
        let mut written = 0usize;
        for chunk in data.chunks(self.max_write as usize) {
            let reply = self
                .call(
                    Command::Write,
                    wire::write_request(file, offset + written as u64, chunk),
                )
                .await?;
            let count = wire::parse_write_reply(&reply)? as usize;
            written += count;
            if count < chunk.len() {
                break;
            }
        }
        Ok(written as u32)
    }

    async fn close(&self, file: FileId) -> Result<(), ShareError> {
        self.call(Command::Close, wire::close_request(file)).await?;
        Ok(())
    }
}

/// Two-leg NTLMv2 session setup. Returns the session id, the session key
/// and whether the server downgraded the login to guest.
async fn authenticate(
    channel: &mut Channel,
    credentials: &Credentials,
) -> Result<(u64, [u8; 16], bool), ShareError> {
    let init = ntlm::spnego_init(&ntlm::negotiate_message());
    let reply = channel
        .exchange(
            Header::request(Command::SessionSetup),
            &wire::session_setup_request(&init),
            None,
        )
        .await?;
    if reply.header.status != NtStatus::MORE_PROCESSING_REQUIRED {
        expect_success(&reply)?;
        return Err(ShareError::Protocol(
            "server skipped the NTLM challenge".into(),
        ));
    }
    let session_id = reply.header.session_id;
    let setup = SessionSetupReply::parse(&reply)?;
    let token = ntlm::find_ntlm_token(&setup.security_buffer)
        .ok_or_else(|| ShareError::Protocol("no NTLM challenge in session setup reply".into()))?;
    let challenge = Challenge::parse(token)?;

    let auth = ntlm::authenticate(credentials, &challenge, rand::random(), filetime_now())?;
    let mut header = Header::request(Command::SessionSetup);
    header.session_id = session_id;
    let reply = channel
        .exchange(
            header,
            &wire::session_setup_request(&ntlm::spnego_response(&auth.message)),
            None,
        )
        .await?;
    expect_success(&reply)?;
    let setup = SessionSetupReply::parse(&reply)?;
    Ok((session_id, auth.session_key, setup.is_guest_or_null()))
}

fn expect_success(reply: &Message) -> Result<(), ShareError> {
    match reply.header.status {
        NtStatus::SUCCESS => Ok(()),
        status => Err(ShareError::Status(status)),
    }
}

async fn with_timeout<T>(
    timeout: Duration,
    what: &str,
    fut: impl std::future::Future<Output = Result<T, ShareError>>,
) -> Result<T, ShareError> {
    tokio::time::timeout(timeout, fut)
        .await
        .map_err(|_| ShareError::Timeout(format!("timed out {} after {:?}", what, timeout)))?
}

fn command_label(command: Command) -> &'static str {
    match command {
        Command::Negotiate => "NEGOTIATE",
        Command::SessionSetup => "SESSION_SETUP",
        Command::TreeConnect => "TREE_CONNECT",
        Command::Create => "CREATE",
        Command::Close => "CLOSE",
        Command::Read => "READ",
        Command::Write => "WRITE",
        Command::QueryDirectory => "QUERY_DIRECTORY",
    }
}

fn filetime_now() -> u64 {
    let unix = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs() as i64)
        .unwrap_or(0);
    (unix * FILETIME_TICKS_PER_SECOND + FILETIME_UNIX_OFFSET) as u64
}
