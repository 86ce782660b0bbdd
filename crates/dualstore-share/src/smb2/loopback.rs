//! In-process SMB2 server for session tests.
//!
//! Serves one share out of memory, checks NTLMv2 proofs against a fixed
//! password and, when asked to, verifies request signatures.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use bytes::{BufMut, BytesMut};
use tokio::io::AsyncWriteExt;
use tokio::net::{TcpListener, TcpStream};

use super::ntlm::tests::{av_pair, challenge_message};
use super::ntlm::{self, Credentials};
use super::wire::{self, Command, Header, Message, FLAGS_SERVER_TO_REDIR, FLAGS_SIGNED};
use crate::status::NtStatus;

const SERVER_CHALLENGE: [u8; 8] = [0x5a, 0x11, 0x22, 0x33, 0x44, 0x55, 0x66, 0x77];
const SESSION_ID: u64 = 0x0000_1000_0000_0041;
const TREE_ID: u32 = 5;
const INVALID_PARAMETER: NtStatus = NtStatus(0xC000_000D);
const NOT_SUPPORTED: NtStatus = NtStatus(0xC000_00BB);

#[derive(Debug, Clone)]
pub(crate) struct ServerOptions {
    pub share: String,
    pub password: String,
    pub require_signing: bool,
    /// Largest READ/WRITE/QUERY_DIRECTORY payload the server accepts.
    pub max_io: u32,
}

impl Default for ServerOptions {
    fn default() -> Self {
        Self {
            share: "media".into(),
            password: "hunter2".into(),
            require_signing: false,
            max_io: 64 * 1024,
        }
    }
}

struct OpenHandle {
    path: String,
    directory: bool,
    enumerated: bool,
}

#[derive(Default)]
struct ShareState {
    directories: HashMap<String, Vec<u8>>,
    files: HashMap<String, Vec<u8>>,
    handles: HashMap<u64, OpenHandle>,
    next_handle: u64,
    user: Option<String>,
    signed_requests: usize,
    bad_signatures: usize,
}

pub(crate) struct LoopbackServer {
    port: u16,
    state: Arc<Mutex<ShareState>>,
}

impl LoopbackServer {
    pub async fn start(options: ServerOptions) -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        let state = Arc::new(Mutex::new(ShareState::default()));

        let shared = Arc::clone(&state);
        tokio::spawn(async move {
            while let Ok((socket, _)) = listener.accept().await {
                tokio::spawn(serve(socket, options.clone(), Arc::clone(&shared)));
            }
        });

        Self { port, state }
    }

    pub fn port(&self) -> u16 {
        self.port
    }

    /// Register a directory with its FILE_DIRECTORY_INFORMATION listing.
    pub fn add_directory(&self, path: &str, listing: Vec<u8>) {
        self.state
            .lock()
            .unwrap()
            .directories
            .insert(path.to_string(), listing);
    }

    pub fn add_file(&self, path: &str, content: Vec<u8>) {
        self.state
            .lock()
            .unwrap()
            .files
            .insert(path.to_string(), content);
    }

    pub fn file(&self, path: &str) -> Option<Vec<u8>> {
        self.state.lock().unwrap().files.get(path).cloned()
    }

    pub fn authenticated_user(&self) -> Option<String> {
        self.state.lock().unwrap().user.clone()
    }

    pub fn open_handles(&self) -> usize {
        self.state.lock().unwrap().handles.len()
    }

    pub fn signed_requests(&self) -> usize {
        self.state.lock().unwrap().signed_requests
    }

    pub fn bad_signatures(&self) -> usize {
        self.state.lock().unwrap().bad_signatures
    }
}

struct Reply {
    status: NtStatus,
    body: Vec<u8>,
}

impl Reply {
    fn ok(body: BytesMut) -> Self {
        Self {
            status: NtStatus::SUCCESS,
            body: body.to_vec(),
        }
    }

    fn error(status: NtStatus) -> Self {
        let mut body = BytesMut::new();
        body.put_u16_le(9);
        body.put_u8(0);
        body.put_u8(0);
        body.put_u32_le(0);
        body.put_u8(0);
        Self {
            status,
            body: body.to_vec(),
        }
    }
}

/// Per-connection authentication progress.
#[derive(Default)]
struct Conn {
    session_key: Option<[u8; 16]>,
}

async fn serve(mut socket: TcpStream, options: ServerOptions, state: Arc<Mutex<ShareState>>) {
    let mut conn = Conn::default();
    while let Ok(raw) = wire::read_frame(&mut socket).await {
        let Ok(request) = Message::parse(raw.clone()) else {
            return;
        };
        let reply = handle(&options, &state, &mut conn, &request, &raw);

        let header = Header {
            status: reply.status,
            command: request.header.command,
            credits: 32,
            flags: FLAGS_SERVER_TO_REDIR,
            message_id: request.header.message_id,
            tree_id: if request.header.command == Command::TreeConnect as u16 {
                TREE_ID
            } else {
                request.header.tree_id
            },
            session_id: if request.header.command == Command::Negotiate as u16 {
                0
            } else {
                SESSION_ID
            },
        };
        let message = wire::encode_message(&header, &reply.body);
        let framed = wire::frame(&message).unwrap();
        if socket.write_all(&framed).await.is_err() {
            return;
        }
    }
}

fn handle(
    options: &ServerOptions,
    state: &Mutex<ShareState>,
    conn: &mut Conn,
    request: &Message,
    raw: &[u8],
) -> Reply {
    let command = request.header.command;
    let mut state = state.lock().unwrap();

    if let (true, Some(key)) = (options.require_signing, conn.session_key) {
        let signed = request.header.flags & FLAGS_SIGNED != 0;
        if signed && raw[48..64] == wire::signature(raw, &key).unwrap() {
            state.signed_requests += 1;
        } else {
            state.bad_signatures += 1;
            return Reply::error(NtStatus::ACCESS_DENIED);
        }
    }

    let body = request.body();
    match command {
        c if c == Command::Negotiate as u16 => negotiate(options),
        c if c == Command::SessionSetup as u16 => session_setup(options, &mut state, conn, request),
        c if c == Command::TreeConnect as u16 => {
            let path = utf16(&field_buffer(request, body, 4, 6));
            if path.rsplit('\\').next() == Some(options.share.as_str()) {
                let mut out = BytesMut::new();
                out.put_u16_le(16);
                // disk share
                out.put_u8(0x01);
                out.put_u8(0);
                out.put_u32_le(0);
                out.put_u32_le(0);
                out.put_u32_le(0x001F_01FF);
                Reply::ok(out)
            } else {
                Reply::error(NtStatus::BAD_NETWORK_NAME)
            }
        }
        c if c == Command::Create as u16 => create(&mut state, request, body),
        c if c == Command::QueryDirectory as u16 => {
            let id = wire::read_u64(body, 8).unwrap();
            let restart = body[3] & 0x01 != 0;
            let output_len = wire::read_u32(body, 28).unwrap();
            if output_len > options.max_io {
                return Reply::error(INVALID_PARAMETER);
            }
            let listing = match state.handles.get(&id) {
                Some(h) if h.directory => state.directories.get(&h.path).cloned(),
                _ => return Reply::error(INVALID_PARAMETER),
            };
            let handle = state.handles.get_mut(&id).unwrap();
            if handle.enumerated && !restart {
                return Reply::error(NtStatus::NO_MORE_FILES);
            }
            handle.enumerated = true;
            let listing = listing.unwrap_or_default();
            let mut out = BytesMut::new();
            out.put_u16_le(9);
            out.put_u16_le((wire::HEADER_LEN + 8) as u16);
            out.put_u32_le(listing.len() as u32);
            out.put_slice(&listing);
            Reply::ok(out)
        }
        c if c == Command::Read as u16 => {
            let length = wire::read_u32(body, 4).unwrap();
            let offset = wire::read_u64(body, 8).unwrap() as usize;
            let id = wire::read_u64(body, 16).unwrap();
            if length > options.max_io {
                return Reply::error(INVALID_PARAMETER);
            }
            let Some(content) = state
                .handles
                .get(&id)
                .and_then(|h| state.files.get(&h.path))
            else {
                return Reply::error(INVALID_PARAMETER);
            };
            if offset >= content.len() {
                return Reply::error(NtStatus::END_OF_FILE);
            }
            let end = (offset + length as usize).min(content.len());
            let data = &content[offset..end];
            let mut out = BytesMut::new();
            out.put_u16_le(17);
            out.put_u8((wire::HEADER_LEN + 16) as u8);
            out.put_u8(0);
            out.put_u32_le(data.len() as u32);
            out.put_u32_le(0);
            out.put_u32_le(0);
            out.put_slice(data);
            Reply::ok(out)
        }
        c if c == Command::Write as u16 => {
            let data_offset = wire::read_u16(body, 2).unwrap() as usize;
            let length = wire::read_u32(body, 4).unwrap() as usize;
            let offset = wire::read_u64(body, 8).unwrap() as usize;
            let id = wire::read_u64(body, 16).unwrap();
            if length as u32 > options.max_io {
                return Reply::error(INVALID_PARAMETER);
            }
            let data = request.buffer(data_offset, length).unwrap();
            let Some(path) = state.handles.get(&id).map(|h| h.path.clone()) else {
                return Reply::error(INVALID_PARAMETER);
            };
            let file = state.files.entry(path).or_default();
            if file.len() < offset + length {
                file.resize(offset + length, 0);
            }
            file[offset..offset + length].copy_from_slice(&data);
            let mut out = BytesMut::new();
            out.put_u16_le(17);
            out.put_u16_le(0);
            out.put_u32_le(length as u32);
            out.put_u32_le(0);
            out.put_u16_le(0);
            out.put_u16_le(0);
            out.put_u8(0);
            Reply::ok(out)
        }
        c if c == Command::Close as u16 => {
            let id = wire::read_u64(body, 8).unwrap();
            if state.handles.remove(&id).is_none() {
                return Reply::error(INVALID_PARAMETER);
            }
            let mut out = BytesMut::new();
            out.put_u16_le(60);
            out.put_slice(&[0u8; 58]);
            Reply::ok(out)
        }
        _ => Reply::error(NOT_SUPPORTED),
    }
}

fn negotiate(options: &ServerOptions) -> Reply {
    let mut security_mode = wire::NEGOTIATE_SIGNING_ENABLED;
    if options.require_signing {
        security_mode |= wire::NEGOTIATE_SIGNING_REQUIRED;
    }
    let mut out = BytesMut::new();
    out.put_u16_le(65);
    out.put_u16_le(security_mode);
    out.put_u16_le(0x0210);
    out.put_u16_le(0);
    out.put_slice(&[0x42u8; 16]);
    out.put_u32_le(0);
    out.put_u32_le(options.max_io);
    out.put_u32_le(options.max_io);
    out.put_u32_le(options.max_io);
    out.put_u64_le(0);
    out.put_u64_le(0);
    out.put_u16_le((wire::HEADER_LEN + 64) as u16);
    out.put_u16_le(0);
    out.put_u32_le(0);
    out.put_u8(0);
    Reply::ok(out)
}

fn session_setup(
    options: &ServerOptions,
    state: &mut ShareState,
    conn: &mut Conn,
    request: &Message,
) -> Reply {
    let body = request.body();
    let buffer = field_buffer(request, body, 12, 14);
    let Some(token) = ntlm::find_ntlm_token(&buffer) else {
        return Reply::error(INVALID_PARAMETER);
    };

    match wire::read_u32(token, 8).unwrap() {
        1 => {
            let mut info = av_pair(0x0002, &wire::utf16le("HOME"));
            info.extend(av_pair(0x0000, &[]));
            let challenge = challenge_message(SERVER_CHALLENGE, &info);
            let mut out = session_setup_reply(&challenge);
            out.status = NtStatus::MORE_PROCESSING_REQUIRED;
            out
        }
        3 => {
            let nt = ntlm_field(token, 20);
            let domain = utf16(&ntlm_field(token, 28));
            let user = utf16(&ntlm_field(token, 36));
            if nt.len() < 16 {
                return Reply::error(NtStatus::LOGON_FAILURE);
            }
            let claimed = format!(r"{}\{}", domain, user);
            let ntowf = ntlm::ntowf_v2(&Credentials::new(&claimed, &options.password)).unwrap();
            let mut proof = [0u8; 16];
            proof.copy_from_slice(&nt[..16]);
            let expected = ntlm::nt_proof(&ntowf, &SERVER_CHALLENGE, &nt[16..]).unwrap();
            if proof != expected {
                return Reply::error(NtStatus::LOGON_FAILURE);
            }
            conn.session_key = Some(ntlm::session_base_key(&ntowf, &proof).unwrap());
            state.user = Some(claimed);
            session_setup_reply(&[])
        }
        _ => Reply::error(INVALID_PARAMETER),
    }
}

fn session_setup_reply(token: &[u8]) -> Reply {
    let mut out = BytesMut::new();
    out.put_u16_le(9);
    out.put_u16_le(0);
    out.put_u16_le((wire::HEADER_LEN + 8) as u16);
    out.put_u16_le(token.len() as u16);
    if token.is_empty() {
        out.put_u8(0);
    } else {
        out.put_slice(token);
    }
    Reply::ok(out)
}

fn create(state: &mut ShareState, request: &Message, body: &[u8]) -> Reply {
    let name = utf16(&field_buffer(request, body, 44, 46));
    let disposition = wire::read_u32(body, 36).unwrap();
    let directory = wire::read_u32(body, 40).unwrap() & 0x01 != 0;

    let exists = if directory {
        state.directories.contains_key(&name)
    } else if disposition == 0x05 {
        state.files.insert(name.clone(), Vec::new());
        true
    } else {
        state.files.contains_key(&name)
    };
    if !exists {
        return Reply::error(NtStatus::OBJECT_NAME_NOT_FOUND);
    }

    state.next_handle += 1;
    let id = state.next_handle;
    state.handles.insert(
        id,
        OpenHandle {
            path: name,
            directory,
            enumerated: false,
        },
    );

    let mut out = BytesMut::new();
    out.put_u16_le(89);
    out.put_u8(0);
    out.put_u8(0);
    // CreateAction: opened
    out.put_u32_le(1);
    out.put_slice(&[0u8; 48]);
    out.put_u32_le(if directory { 0x10 } else { 0x80 });
    out.put_u32_le(0);
    out.put_u64_le(id);
    out.put_u64_le(id);
    out.put_u32_le(0);
    out.put_u32_le(0);
    out.put_u8(0);
    Reply::ok(out)
}

/// Buffer described by a u16 offset/length pair inside a request body.
fn field_buffer(request: &Message, body: &[u8], offset_at: usize, len_at: usize) -> Vec<u8> {
    let offset = wire::read_u16(body, offset_at).unwrap() as usize;
    let len = wire::read_u16(body, len_at).unwrap() as usize;
    request.buffer(offset, len).unwrap().to_vec()
}

/// Payload of an NTLM security-buffer field (len, maxlen, offset).
fn ntlm_field(token: &[u8], at: usize) -> Vec<u8> {
    let len = wire::read_u16(token, at).unwrap() as usize;
    let offset = wire::read_u32(token, at + 4).unwrap() as usize;
    token[offset..offset + len].to_vec()
}

fn utf16(bytes: &[u8]) -> String {
    let units: Vec<u16> = bytes
        .chunks_exact(2)
        .map(|c| u16::from_le_bytes([c[0], c[1]]))
        .collect();
    String::from_utf16_lossy(&units)
}
