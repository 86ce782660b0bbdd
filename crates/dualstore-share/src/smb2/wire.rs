//! SMB2 message layout: the 64-byte header, Direct TCP framing, and the
//! request/response bodies the session issues.
//!
//! Offsets inside response bodies are counted from the start of the SMB2
//! header, so responses keep the whole message around.

use bytes::{BufMut, Bytes, BytesMut};
use hmac::{Hmac, Mac};
use sha2::Sha256;
use tokio::io::{AsyncRead, AsyncReadExt};

use crate::error::ShareError;
use crate::status::NtStatus;
use crate::transport::{FileId, OpenOptions};

pub const HEADER_LEN: usize = 64;
pub const PROTOCOL_ID: [u8; 4] = [0xFE, b'S', b'M', b'B'];
const SIGNATURE_RANGE: std::ops::Range<usize> = 48..64;

/// Largest frame accepted from a server.
pub const MAX_FRAME_LEN: usize = 8 * 1024 * 1024;
/// Per-request payload ceiling without multi-credit support.
pub const MAX_SINGLE_CREDIT_PAYLOAD: u32 = 64 * 1024;

pub const FLAGS_SERVER_TO_REDIR: u32 = 0x0000_0001;
pub const FLAGS_ASYNC_COMMAND: u32 = 0x0000_0002;
pub const FLAGS_SIGNED: u32 = 0x0000_0008;

pub const NEGOTIATE_SIGNING_ENABLED: u16 = 0x0001;
pub const NEGOTIATE_SIGNING_REQUIRED: u16 = 0x0002;

pub const SESSION_FLAG_IS_GUEST: u16 = 0x0001;
pub const SESSION_FLAG_IS_NULL: u16 = 0x0002;

const FILE_DIRECTORY_INFORMATION_CLASS: u8 = 0x01;
const RESTART_SCANS: u8 = 0x01;
const FILE_DIRECTORY_FILE: u32 = 0x0000_0001;
const FILE_NON_DIRECTORY_FILE: u32 = 0x0000_0040;
const IMPERSONATION_LEVEL: u32 = 0x0000_0002;
const CREDIT_REQUEST: u16 = 32;
const PROCESS_ID: u32 = 0x0000_FEFF;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u16)]
pub enum Command {
    Negotiate = 0x0000,
    SessionSetup = 0x0001,
    TreeConnect = 0x0003,
    Create = 0x0005,
    Close = 0x0006,
    Read = 0x0008,
    Write = 0x0009,
    QueryDirectory = 0x000E,
}

/// Dialects this client speaks, in preference order on the wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Dialect {
    Smb202,
    Smb210,
}

impl Dialect {
    pub const OFFERED: [Dialect; 2] = [Dialect::Smb202, Dialect::Smb210];

    pub fn wire_value(&self) -> u16 {
        match self {
            Dialect::Smb202 => 0x0202,
            Dialect::Smb210 => 0x0210,
        }
    }

    pub fn from_wire(value: u16) -> Option<Self> {
        Self::OFFERED.into_iter().find(|d| d.wire_value() == value)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Header {
    pub status: NtStatus,
    pub command: u16,
    pub credits: u16,
    pub flags: u32,
    pub message_id: u64,
    pub tree_id: u32,
    pub session_id: u64,
}

impl Header {
    pub fn request(command: Command) -> Self {
        Self {
            status: NtStatus::SUCCESS,
            command: command as u16,
            credits: CREDIT_REQUEST,
            flags: 0,
            message_id: 0,
            tree_id: 0,
            session_id: 0,
        }
    }

    pub fn encode(&self, out: &mut BytesMut) {
        out.put_slice(&PROTOCOL_ID);
        out.put_u16_le(HEADER_LEN as u16);
        // CreditCharge: zero without multi-credit support
        out.put_u16_le(0);
        out.put_u32_le(self.status.0);
        out.put_u16_le(self.command);
        out.put_u16_le(self.credits);
        out.put_u32_le(self.flags);
        // NextCommand
        out.put_u32_le(0);
        out.put_u64_le(self.message_id);
        out.put_u32_le(PROCESS_ID);
        out.put_u32_le(self.tree_id);
        out.put_u64_le(self.session_id);
        out.put_slice(&[0u8; 16]);
    }

    pub fn decode(message: &[u8]) -> Result<Self, ShareError> {
        if message.len() < HEADER_LEN || message[..4] != PROTOCOL_ID {
            return Err(ShareError::Protocol("reply is not an SMB2 message".into()));
        }
        let flags = read_u32(message, 16)?;
        let tree_id = if flags & FLAGS_ASYNC_COMMAND != 0 {
            0
        } else {
            read_u32(message, 36)?
        };
        Ok(Self {
            status: NtStatus(read_u32(message, 8)?),
            command: read_u16(message, 12)?,
            credits: read_u16(message, 14)?,
            flags,
            message_id: read_u64(message, 24)?,
            tree_id,
            session_id: read_u64(message, 40)?,
        })
    }

    pub fn is_interim(&self) -> bool {
        self.status == NtStatus::PENDING && self.flags & FLAGS_ASYNC_COMMAND != 0
    }
}

/// One decoded reply.
#[derive(Debug, Clone)]
pub struct Message {
    pub header: Header,
    raw: Bytes,
}

impl Message {
    pub fn parse(raw: Bytes) -> Result<Self, ShareError> {
        let header = Header::decode(&raw)?;
        Ok(Self { header, raw })
    }

    pub fn body(&self) -> &[u8] {
        &self.raw[HEADER_LEN..]
    }

    /// Variable-length buffer addressed from the start of the header.
    pub fn buffer(&self, offset: usize, len: usize) -> Result<Bytes, ShareError> {
        if len == 0 {
            return Ok(Bytes::new());
        }
        let end = offset
            .checked_add(len)
            .filter(|end| offset >= HEADER_LEN && *end <= self.raw.len())
            .ok_or_else(|| {
                ShareError::Protocol(format!(
                    "buffer {}+{} outside a {}-byte reply",
                    offset,
                    len,
                    self.raw.len()
                ))
            })?;
        Ok(self.raw.slice(offset..end))
    }
}

/// Header plus body, ready for signing and framing.
pub fn encode_message(header: &Header, body: &[u8]) -> BytesMut {
    let mut out = BytesMut::with_capacity(HEADER_LEN + body.len());
    header.encode(&mut out);
    out.put_slice(body);
    out
}

/// SMB 2.x signature: HMAC-SHA256 over the message with a zeroed
/// signature field, truncated to 16 bytes.
pub fn signature(message: &[u8], key: &[u8; 16]) -> Result<[u8; 16], ShareError> {
    let mut mac = Hmac::<Sha256>::new_from_slice(key)
        .map_err(|e| ShareError::Protocol(format!("signing key rejected: {}", e)))?;
    mac.update(&message[..SIGNATURE_RANGE.start]);
    mac.update(&[0u8; 16]);
    mac.update(&message[SIGNATURE_RANGE.end..]);
    let digest = mac.finalize().into_bytes();
    let mut out = [0u8; 16];
    out.copy_from_slice(&digest[..16]);
    Ok(out)
}

/// Set the signed flag and write the signature in place.
pub fn sign(message: &mut [u8], key: &[u8; 16]) -> Result<(), ShareError> {
    let flags = read_u32(message, 16)? | FLAGS_SIGNED;
    message[16..20].copy_from_slice(&flags.to_le_bytes());
    let sig = signature(message, key)?;
    message[SIGNATURE_RANGE].copy_from_slice(&sig);
    Ok(())
}

/// Direct TCP transport framing: a zero byte and a 24-bit big-endian length.
pub fn frame(message: &[u8]) -> Result<BytesMut, ShareError> {
    if message.len() > 0x00FF_FFFF {
        return Err(ShareError::Protocol(format!(
            "message of {} bytes exceeds the transport frame limit",
            message.len()
        )));
    }
    let mut out = BytesMut::with_capacity(4 + message.len());
    out.put_u32(message.len() as u32);
    out.put_slice(message);
    Ok(out)
}

pub async fn read_frame<R: AsyncRead + Unpin>(reader: &mut R) -> Result<Bytes, ShareError> {
    let mut prefix = [0u8; 4];
    reader.read_exact(&mut prefix).await.map_err(transport)?;
    if prefix[0] != 0 {
        return Err(ShareError::Protocol(format!(
            "unexpected frame type 0x{:02x}",
            prefix[0]
        )));
    }
    let len = u32::from_be_bytes(prefix) as usize;
    if len > MAX_FRAME_LEN {
        return Err(ShareError::Protocol(format!("frame of {} bytes is too large", len)));
    }
    let mut body = vec![0u8; len];
    reader.read_exact(&mut body).await.map_err(transport)?;
    Ok(Bytes::from(body))
}

pub(crate) fn transport(err: std::io::Error) -> ShareError {
    ShareError::Transport(err.to_string())
}

pub fn utf16le(s: &str) -> Vec<u8> {
    s.encode_utf16().flat_map(|u| u.to_le_bytes()).collect()
}

fn put_file_id(out: &mut BytesMut, file: FileId) {
    out.put_u64_le(file.persistent);
    out.put_u64_le(file.volatile);
}

pub fn negotiate_request(client_guid: [u8; 16]) -> BytesMut {
    let mut out = BytesMut::with_capacity(36 + 2 * Dialect::OFFERED.len());
    out.put_u16_le(36);
    out.put_u16_le(Dialect::OFFERED.len() as u16);
    out.put_u16_le(NEGOTIATE_SIGNING_ENABLED);
    out.put_u16_le(0);
    // Capabilities
    out.put_u32_le(0);
    out.put_slice(&client_guid);
    // ClientStartTime
    out.put_u64_le(0);
    for dialect in Dialect::OFFERED {
        out.put_u16_le(dialect.wire_value());
    }
    out
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NegotiateReply {
    pub security_mode: u16,
    pub dialect: Dialect,
    pub max_transact: u32,
    pub max_read: u32,
    pub max_write: u32,
}

impl NegotiateReply {
    pub fn parse(message: &Message) -> Result<Self, ShareError> {
        let body = message.body();
        let revision = read_u16(body, 4)?;
        let dialect = Dialect::from_wire(revision).ok_or_else(|| {
            ShareError::Protocol(format!("server selected unsupported dialect 0x{:04x}", revision))
        })?;
        Ok(Self {
            security_mode: read_u16(body, 2)?,
            dialect,
            max_transact: read_u32(body, 28)?,
            max_read: read_u32(body, 32)?,
            max_write: read_u32(body, 36)?,
        })
    }

    pub fn signing_required(&self) -> bool {
        self.security_mode & NEGOTIATE_SIGNING_REQUIRED != 0
    }
}

pub fn session_setup_request(token: &[u8]) -> BytesMut {
    let mut out = BytesMut::with_capacity(24 + token.len());
    out.put_u16_le(25);
    // Flags
    out.put_u8(0);
    out.put_u8(NEGOTIATE_SIGNING_ENABLED as u8);
    // Capabilities, Channel
    out.put_u32_le(0);
    out.put_u32_le(0);
    out.put_u16_le((HEADER_LEN + 24) as u16);
    out.put_u16_le(token.len() as u16);
    // PreviousSessionId
    out.put_u64_le(0);
    out.put_slice(token);
    out
}

#[derive(Debug, Clone)]
pub struct SessionSetupReply {
    pub session_flags: u16,
    pub security_buffer: Bytes,
}

impl SessionSetupReply {
    pub fn parse(message: &Message) -> Result<Self, ShareError> {
        let body = message.body();
        let offset = read_u16(body, 4)? as usize;
        let len = read_u16(body, 6)? as usize;
        Ok(Self {
            session_flags: read_u16(body, 2)?,
            security_buffer: message.buffer(offset, len)?,
        })
    }

    pub fn is_guest_or_null(&self) -> bool {
        self.session_flags & (SESSION_FLAG_IS_GUEST | SESSION_FLAG_IS_NULL) != 0
    }
}

pub fn tree_connect_request(unc: &str) -> BytesMut {
    let path = utf16le(unc);
    let mut out = BytesMut::with_capacity(8 + path.len());
    out.put_u16_le(9);
    out.put_u16_le(0);
    out.put_u16_le((HEADER_LEN + 8) as u16);
    out.put_u16_le(path.len() as u16);
    out.put_slice(&path);
    out
}

pub fn create_request(path: &str, options: &OpenOptions) -> BytesMut {
    let name = utf16le(path);
    let mut out = BytesMut::with_capacity(56 + name.len().max(2));
    out.put_u16_le(57);
    // SecurityFlags, RequestedOplockLevel (none)
    out.put_u8(0);
    out.put_u8(0);
    out.put_u32_le(IMPERSONATION_LEVEL);
    // SmbCreateFlags, Reserved
    out.put_u64_le(0);
    out.put_u64_le(0);
    out.put_u32_le(options.desired_access);
    out.put_u32_le(options.file_attributes);
    out.put_u32_le(options.share_access);
    out.put_u32_le(options.disposition.wire_value());
    out.put_u32_le(if options.directory {
        FILE_DIRECTORY_FILE
    } else {
        FILE_NON_DIRECTORY_FILE
    });
    out.put_u16_le((HEADER_LEN + 56) as u16);
    out.put_u16_le(name.len() as u16);
    // CreateContextsOffset, CreateContextsLength
    out.put_u32_le(0);
    out.put_u32_le(0);
    if name.is_empty() {
        // the buffer must be at least one byte even for the share root
        out.put_u16_le(0);
    } else {
        out.put_slice(&name);
    }
    out
}

pub fn parse_create_reply(message: &Message) -> Result<FileId, ShareError> {
    let body = message.body();
    Ok(FileId {
        persistent: read_u64(body, 64)?,
        volatile: read_u64(body, 72)?,
    })
}

pub fn close_request(file: FileId) -> BytesMut {
    let mut out = BytesMut::with_capacity(24);
    out.put_u16_le(24);
    // Flags, Reserved
    out.put_u16_le(0);
    out.put_u32_le(0);
    put_file_id(&mut out, file);
    out
}

pub fn query_directory_request(
    directory: FileId,
    pattern: &str,
    restart_scan: bool,
    output_len: u32,
) -> BytesMut {
    let name = utf16le(pattern);
    let mut out = BytesMut::with_capacity(32 + name.len());
    out.put_u16_le(33);
    out.put_u8(FILE_DIRECTORY_INFORMATION_CLASS);
    out.put_u8(if restart_scan { RESTART_SCANS } else { 0 });
    // FileIndex
    out.put_u32_le(0);
    put_file_id(&mut out, directory);
    out.put_u16_le((HEADER_LEN + 32) as u16);
    out.put_u16_le(name.len() as u16);
    out.put_u32_le(output_len);
    out.put_slice(&name);
    out
}

pub fn parse_query_directory_reply(message: &Message) -> Result<Bytes, ShareError> {
    let body = message.body();
    let offset = read_u16(body, 2)? as usize;
    let len = read_u32(body, 4)? as usize;
    message.buffer(offset, len)
}

pub fn read_request(file: FileId, offset: u64, length: u32) -> BytesMut {
    let mut out = BytesMut::with_capacity(49);
    out.put_u16_le(49);
    // Padding: where the server should place the data
    out.put_u8((HEADER_LEN + 16) as u8);
    out.put_u8(0);
    out.put_u32_le(length);
    out.put_u64_le(offset);
    put_file_id(&mut out, file);
    // MinimumCount, Channel, RemainingBytes
    out.put_u32_le(0);
    out.put_u32_le(0);
    out.put_u32_le(0);
    // ReadChannelInfoOffset, ReadChannelInfoLength
    out.put_u16_le(0);
    out.put_u16_le(0);
    out.put_u8(0);
    out
}

pub fn parse_read_reply(message: &Message) -> Result<Bytes, ShareError> {
    let body = message.body();
    let offset = *body
        .get(2)
        .ok_or_else(|| ShareError::Protocol("truncated READ reply".into()))? as usize;
    let len = read_u32(body, 4)? as usize;
    message.buffer(offset, len)
}

pub fn write_request(file: FileId, offset: u64, data: &[u8]) -> BytesMut {
    let mut out = BytesMut::with_capacity(48 + data.len());
    out.put_u16_le(49);
    out.put_u16_le((HEADER_LEN + 48) as u16);
    out.put_u32_le(data.len() as u32);
    out.put_u64_le(offset);
    put_file_id(&mut out, file);
    // Channel, RemainingBytes
    out.put_u32_le(0);
    out.put_u32_le(0);
    // WriteChannelInfoOffset, WriteChannelInfoLength, Flags
    out.put_u16_le(0);
    out.put_u16_le(0);
    out.put_u32_le(0);
    out.put_slice(data);
    out
}

pub fn parse_write_reply(message: &Message) -> Result<u32, ShareError> {
    read_u32(message.body(), 4)
}

fn field<const N: usize>(buf: &[u8], at: usize) -> Result<[u8; N], ShareError> {
    buf.get(at..at + N)
        .and_then(|s| s.try_into().ok())
        .ok_or_else(|| ShareError::Protocol(format!("reply truncated at offset {}", at)))
}

pub fn read_u16(buf: &[u8], at: usize) -> Result<u16, ShareError> {
    field::<2>(buf, at).map(u16::from_le_bytes)
}

pub fn read_u32(buf: &[u8], at: usize) -> Result<u32, ShareError> {
    field::<4>(buf, at).map(u32::from_le_bytes)
}

pub fn read_u64(buf: &[u8], at: usize) -> Result<u64, ShareError> {
    field::<8>(buf, at).map(u64::from_le_bytes)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn reply(header: Header, body: &[u8]) -> Message {
        let mut h = header;
        h.flags |= FLAGS_SERVER_TO_REDIR;
        Message::parse(encode_message(&h, body).freeze()).unwrap()
    }

    #[test]
    fn test_header_layout() {
        let mut header = Header::request(Command::Create);
        header.message_id = 9;
        header.tree_id = 7;
        header.session_id = 0x1122_3344;
        let raw = encode_message(&header, &[]);

        assert_eq!(raw.len(), HEADER_LEN);
        assert_eq!(&raw[..4], &PROTOCOL_ID);
        assert_eq!(read_u16(&raw, 4).unwrap(), 64);
        assert_eq!(read_u16(&raw, 12).unwrap(), Command::Create as u16);
        assert_eq!(read_u64(&raw, 24).unwrap(), 9);
        assert_eq!(read_u32(&raw, 36).unwrap(), 7);
        assert_eq!(Header::decode(&raw).unwrap(), header);
    }

    #[test]
    fn test_async_interim_reply() {
        let mut header = Header::request(Command::Read);
        header.status = NtStatus::PENDING;
        header.flags = FLAGS_ASYNC_COMMAND;
        let msg = reply(header, &[]);
        assert!(msg.header.is_interim());
        assert_eq!(msg.header.tree_id, 0);
    }

    #[test]
    fn test_frame_prefix() {
        let framed = frame(&[0xAB; 300]).unwrap();
        assert_eq!(&framed[..4], &[0, 0, 0x01, 0x2C]);
        assert_eq!(framed.len(), 304);
    }

    #[tokio::test]
    async fn test_read_frame_rejects_session_service_packets() {
        let mut input: &[u8] = &[0x85, 0, 0, 0];
        let err = read_frame(&mut input).await.unwrap_err();
        assert!(matches!(err, ShareError::Protocol(_)));

        let mut input: &[u8] = &[0, 0, 0, 2, 0xFE, 0x53];
        assert_eq!(read_frame(&mut input).await.unwrap().as_ref(), &[0xFE, 0x53]);
    }

    #[test]
    fn test_signature_covers_whole_message() {
        let key = [7u8; 16];
        let file = FileId {
            persistent: 1,
            volatile: 2,
        };
        let mut msg = encode_message(&Header::request(Command::Close), &close_request(file));
        sign(&mut msg, &key).unwrap();

        let flags = read_u32(&msg, 16).unwrap();
        assert_ne!(flags & FLAGS_SIGNED, 0);
        assert_eq!(&msg[48..64], &signature(&msg, &key).unwrap());

        let mut tampered = msg.clone();
        tampered[70] ^= 0xFF;
        assert_ne!(signature(&tampered, &key).unwrap(), signature(&msg, &key).unwrap());
    }

    #[test]
    fn test_fixed_body_sizes() {
        let id = FileId {
            persistent: 1,
            volatile: 2,
        };
        assert_eq!(negotiate_request([0; 16]).len(), 36 + 4);
        assert_eq!(session_setup_request(&[]).len(), 24);
        assert_eq!(close_request(id).len(), 24);
        assert_eq!(read_request(id, 0, 10).len(), 49);
        assert_eq!(write_request(id, 0, b"abc").len(), 48 + 3);
        assert_eq!(query_directory_request(id, "*", true, 1024).len(), 32 + 2);
        // share root still carries a name buffer
        assert_eq!(create_request("", &OpenOptions::list_directory()).len(), 58);
    }

    #[test]
    fn test_create_request_options() {
        let body = create_request(r"docs\a.txt", &OpenOptions::read_file());
        assert_eq!(read_u32(&body, 36).unwrap(), 1);
        assert_eq!(read_u32(&body, 40).unwrap(), FILE_NON_DIRECTORY_FILE);
        assert_eq!(read_u16(&body, 44).unwrap(), 120);
        assert_eq!(&body[56..], utf16le(r"docs\a.txt").as_slice());

        let body = create_request("docs", &OpenOptions::list_directory());
        assert_eq!(read_u32(&body, 40).unwrap(), FILE_DIRECTORY_FILE);
    }

    #[test]
    fn test_parse_replies() {
        // READ reply: data placed right after the 16-byte fixed part
        let mut body = BytesMut::new();
        body.put_u16_le(17);
        body.put_u8((HEADER_LEN + 16) as u8);
        body.put_u8(0);
        body.put_u32_le(5);
        body.put_u32_le(0);
        body.put_u32_le(0);
        body.put_slice(b"hello");
        let msg = reply(Header::request(Command::Read), &body);
        assert_eq!(parse_read_reply(&msg).unwrap().as_ref(), b"hello");

        // buffer pointing past the end of the reply
        let mut body = BytesMut::new();
        body.put_u16_le(9);
        body.put_u16_le((HEADER_LEN + 8) as u16);
        body.put_u32_le(4096);
        let msg = reply(Header::request(Command::QueryDirectory), &body);
        assert!(matches!(
            parse_query_directory_reply(&msg),
            Err(ShareError::Protocol(_))
        ));
    }

    #[test]
    fn test_negotiate_reply() {
        let mut body = BytesMut::new();
        body.put_u16_le(65);
        body.put_u16_le(NEGOTIATE_SIGNING_ENABLED | NEGOTIATE_SIGNING_REQUIRED);
        body.put_u16_le(0x0210);
        body.put_u16_le(0);
        body.put_slice(&[0u8; 16]);
        body.put_u32_le(0);
        body.put_u32_le(1 << 20);
        body.put_u32_le(1 << 16);
        body.put_u32_le(1 << 16);
        body.put_u64_le(0);
        body.put_u64_le(0);
        body.put_u16_le(0);
        body.put_u16_le(0);
        body.put_u32_le(0);
        let reply = NegotiateReply::parse(&reply(Header::request(Command::Negotiate), &body)).unwrap();
        assert_eq!(reply.dialect, Dialect::Smb210);
        assert!(reply.signing_required());
        assert_eq!(reply.max_read, 1 << 16);
    }
}
