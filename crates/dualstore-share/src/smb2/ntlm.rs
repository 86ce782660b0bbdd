//! NTLMv2 authentication carried in SPNEGO tokens.
//!
//! Only the client side is implemented, without key exchange: the exported
//! session key is the NTLMv2 session base key.

use hmac::{Hmac, Mac};
use md4::{Digest, Md4};
use md5::Md5;

use crate::error::ShareError;
use crate::smb2::wire::{read_u16, read_u32, utf16le};

pub const NTLMSSP_SIGNATURE: &[u8; 8] = b"NTLMSSP\0";

const NEGOTIATE_MESSAGE: u32 = 1;
const CHALLENGE_MESSAGE: u32 = 2;
const AUTHENTICATE_MESSAGE: u32 = 3;

pub const NEGOTIATE_UNICODE: u32 = 0x0000_0001;
pub const REQUEST_TARGET: u32 = 0x0000_0004;
pub const NEGOTIATE_SIGN: u32 = 0x0000_0010;
pub const NEGOTIATE_NTLM: u32 = 0x0000_0200;
pub const NEGOTIATE_ALWAYS_SIGN: u32 = 0x0000_8000;
pub const NEGOTIATE_EXTENDED_SESSIONSECURITY: u32 = 0x0008_0000;
pub const NEGOTIATE_TARGET_INFO: u32 = 0x0080_0000;
pub const NEGOTIATE_128: u32 = 0x2000_0000;
pub const NEGOTIATE_56: u32 = 0x8000_0000;

pub const CLIENT_FLAGS: u32 = NEGOTIATE_UNICODE
    | REQUEST_TARGET
    | NEGOTIATE_SIGN
    | NEGOTIATE_NTLM
    | NEGOTIATE_ALWAYS_SIGN
    | NEGOTIATE_EXTENDED_SESSIONSECURITY
    | NEGOTIATE_TARGET_INFO
    | NEGOTIATE_128
    | NEGOTIATE_56;

const AV_EOL: u16 = 0x0000;
const AV_TIMESTAMP: u16 = 0x0007;

const AUTHENTICATE_HEADER_LEN: usize = 64;

/// SPNEGO mechanism OID 1.3.6.1.5.5.2
const SPNEGO_OID: &[u8] = &[0x2b, 0x06, 0x01, 0x05, 0x05, 0x02];
/// NTLMSSP mechanism OID 1.3.6.1.4.1.311.2.2.10
const NTLMSSP_OID: &[u8] = &[0x2b, 0x06, 0x01, 0x04, 0x01, 0x82, 0x37, 0x02, 0x02, 0x0a];

type HmacMd5 = Hmac<Md5>;

/// Account to authenticate as. `DOMAIN\user` and `user@domain` forms are
/// split into their parts.
#[derive(Clone, PartialEq, Eq)]
pub struct Credentials {
    pub domain: String,
    pub user: String,
    password: String,
}

impl Credentials {
    pub fn new(username: &str, password: &str) -> Self {
        let username = username.trim();
        let (domain, user) = if let Some((domain, user)) = username.split_once('\\') {
            (domain, user)
        } else if let Some((user, domain)) = username.rsplit_once('@') {
            (domain, user)
        } else {
            ("", username)
        };
        Self {
            domain: domain.to_string(),
            user: user.to_string(),
            password: password.to_string(),
        }
    }
}

impl std::fmt::Debug for Credentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Credentials")
            .field("domain", &self.domain)
            .field("user", &self.user)
            .field("password", &"<redacted>")
            .finish()
    }
}

pub fn negotiate_message() -> Vec<u8> {
    let mut out = Vec::with_capacity(32);
    out.extend_from_slice(NTLMSSP_SIGNATURE);
    out.extend_from_slice(&NEGOTIATE_MESSAGE.to_le_bytes());
    out.extend_from_slice(&CLIENT_FLAGS.to_le_bytes());
    // empty DomainNameFields and WorkstationFields
    out.extend_from_slice(&[0u8; 16]);
    out
}

/// The parts of a CHALLENGE_MESSAGE the response depends on.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Challenge {
    pub flags: u32,
    pub server_challenge: [u8; 8],
    pub target_info: Vec<u8>,
}

impl Challenge {
    pub fn parse(token: &[u8]) -> Result<Self, ShareError> {
        if token.len() < 48 || &token[..8] != NTLMSSP_SIGNATURE {
            return Err(ShareError::Protocol("malformed NTLM challenge".into()));
        }
        if read_u32(token, 8)? != CHALLENGE_MESSAGE {
            return Err(ShareError::Protocol("expected an NTLM challenge message".into()));
        }
        let mut server_challenge = [0u8; 8];
        server_challenge.copy_from_slice(&token[24..32]);

        let info_len = read_u16(token, 40)? as usize;
        let info_offset = read_u32(token, 44)? as usize;
        let target_info = token
            .get(info_offset..info_offset + info_len)
            .ok_or_else(|| ShareError::Protocol("NTLM target info out of bounds".into()))?
            .to_vec();

        Ok(Self {
            flags: read_u32(token, 20)?,
            server_challenge,
            target_info,
        })
    }

    /// Server time from the MsvAvTimestamp pair, if present.
    pub fn timestamp(&self) -> Option<u64> {
        let mut rest = self.target_info.as_slice();
        while rest.len() >= 4 {
            let id = u16::from_le_bytes([rest[0], rest[1]]);
            let len = u16::from_le_bytes([rest[2], rest[3]]) as usize;
            let value = rest.get(4..4 + len)?;
            match id {
                AV_EOL => return None,
                AV_TIMESTAMP if len == 8 => {
                    let mut ts = [0u8; 8];
                    ts.copy_from_slice(value);
                    return Some(u64::from_le_bytes(ts));
                }
                _ => rest = &rest[4 + len..],
            }
        }
        None
    }
}

/// AUTHENTICATE_MESSAGE plus the session key it establishes.
pub struct Authentication {
    pub message: Vec<u8>,
    pub session_key: [u8; 16],
}

/// MD4 of the UTF-16LE password.
pub fn nt_hash(password: &str) -> [u8; 16] {
    let mut hasher = Md4::new();
    hasher.update(utf16le(password));
    let digest = hasher.finalize();
    let mut out = [0u8; 16];
    out.copy_from_slice(&digest);
    out
}

pub fn ntowf_v2(credentials: &Credentials) -> Result<[u8; 16], ShareError> {
    let identity = format!("{}{}", credentials.user.to_uppercase(), credentials.domain);
    hmac_md5(&nt_hash(&credentials.password), &[utf16le(&identity).as_slice()])
}

/// LMv2 response: HMAC over both challenges, followed by the client challenge.
pub fn lm_v2_response(
    ntowf: &[u8; 16],
    server_challenge: &[u8; 8],
    client_challenge: &[u8; 8],
) -> Result<Vec<u8>, ShareError> {
    let proof = hmac_md5(ntowf, &[&server_challenge[..], &client_challenge[..]])?;
    let mut out = proof.to_vec();
    out.extend_from_slice(client_challenge);
    Ok(out)
}

/// The NTLMv2 client blob hashed into the NT response.
pub fn client_blob(timestamp: u64, client_challenge: &[u8; 8], target_info: &[u8]) -> Vec<u8> {
    let mut blob = Vec::with_capacity(32 + target_info.len());
    blob.extend_from_slice(&[0x01, 0x01, 0, 0, 0, 0, 0, 0]);
    blob.extend_from_slice(&timestamp.to_le_bytes());
    blob.extend_from_slice(client_challenge);
    blob.extend_from_slice(&[0u8; 4]);
    blob.extend_from_slice(target_info);
    blob.extend_from_slice(&[0u8; 4]);
    blob
}

/// NTProofStr over the server challenge and client blob.
pub fn nt_proof(
    ntowf: &[u8; 16],
    server_challenge: &[u8; 8],
    blob: &[u8],
) -> Result<[u8; 16], ShareError> {
    hmac_md5(ntowf, &[&server_challenge[..], blob])
}

/// Without key exchange this is also the signing key.
pub fn session_base_key(ntowf: &[u8; 16], proof: &[u8; 16]) -> Result<[u8; 16], ShareError> {
    hmac_md5(ntowf, &[&proof[..]])
}

pub fn authenticate(
    credentials: &Credentials,
    challenge: &Challenge,
    client_challenge: [u8; 8],
    now: u64,
) -> Result<Authentication, ShareError> {
    let ntowf = ntowf_v2(credentials)?;

    let server_time = challenge.timestamp();
    let blob = client_blob(
        server_time.unwrap_or(now),
        &client_challenge,
        &challenge.target_info,
    );
    let proof = nt_proof(&ntowf, &challenge.server_challenge, &blob)?;
    let mut nt_response = proof.to_vec();
    nt_response.extend_from_slice(&blob);

    // a server timestamp means the LM response must be empty
    let lm_response = match server_time {
        Some(_) => vec![0u8; 24],
        None => lm_v2_response(&ntowf, &challenge.server_challenge, &client_challenge)?,
    };
    let session_key = session_base_key(&ntowf, &proof)?;

    let domain = utf16le(&credentials.domain);
    let user = utf16le(&credentials.user);
    let workstation: Vec<u8> = Vec::new();
    let flags = (challenge.flags & CLIENT_FLAGS) | NEGOTIATE_UNICODE;

    let payload: [&[u8]; 5] = [&domain, &user, &workstation, &lm_response, &nt_response];
    let mut offsets = [0u32; 5];
    let mut cursor = AUTHENTICATE_HEADER_LEN;
    for (slot, part) in offsets.iter_mut().zip(payload.iter()) {
        *slot = cursor as u32;
        cursor += part.len();
    }

    let mut message = Vec::with_capacity(cursor);
    message.extend_from_slice(NTLMSSP_SIGNATURE);
    message.extend_from_slice(&AUTHENTICATE_MESSAGE.to_le_bytes());
    // field order on the wire: LM, NT, domain, user, workstation, session key
    for idx in [3usize, 4, 0, 1, 2] {
        put_fields(&mut message, payload[idx].len(), offsets[idx]);
    }
    put_fields(&mut message, 0, cursor as u32);
    message.extend_from_slice(&flags.to_le_bytes());
    for part in payload {
        message.extend_from_slice(part);
    }

    Ok(Authentication {
        message,
        session_key,
    })
}

fn put_fields(out: &mut Vec<u8>, len: usize, offset: u32) {
    out.extend_from_slice(&(len as u16).to_le_bytes());
    out.extend_from_slice(&(len as u16).to_le_bytes());
    out.extend_from_slice(&offset.to_le_bytes());
}

fn hmac_md5(key: &[u8], parts: &[&[u8]]) -> Result<[u8; 16], ShareError> {
    let mut mac = HmacMd5::new_from_slice(key)
        .map_err(|e| ShareError::Protocol(format!("HMAC key rejected: {}", e)))?;
    for part in parts {
        mac.update(part);
    }
    let digest = mac.finalize().into_bytes();
    let mut out = [0u8; 16];
    out.copy_from_slice(&digest);
    Ok(out)
}

/// Wrap an NTLM NEGOTIATE_MESSAGE in a SPNEGO NegTokenInit.
pub fn spnego_init(mech_token: &[u8]) -> Vec<u8> {
    let mech_types = der(0x30, &der(0x06, NTLMSSP_OID));
    let mut init = der(0xa0, &mech_types);
    init.extend(der(0xa2, &der(0x04, mech_token)));
    let neg_token_init = der(0xa0, &der(0x30, &init));

    let mut inner = der(0x06, SPNEGO_OID);
    inner.extend(neg_token_init);
    der(0x60, &inner)
}

/// Wrap an NTLM AUTHENTICATE_MESSAGE in a SPNEGO NegTokenResp.
pub fn spnego_response(response_token: &[u8]) -> Vec<u8> {
    der(0xa1, &der(0x30, &der(0xa2, &der(0x04, response_token))))
}

/// Locate the NTLM message inside a security buffer, wrapped or raw.
pub fn find_ntlm_token(buffer: &[u8]) -> Option<&[u8]> {
    buffer
        .windows(NTLMSSP_SIGNATURE.len())
        .position(|w| w == NTLMSSP_SIGNATURE)
        .map(|pos| &buffer[pos..])
}

fn der(tag: u8, content: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(content.len() + 4);
    out.push(tag);
    let len = content.len();
    if len < 0x80 {
        out.push(len as u8);
    } else if len <= 0xFF {
        out.extend_from_slice(&[0x81, len as u8]);
    } else {
        out.extend_from_slice(&[0x82, (len >> 8) as u8, len as u8]);
    }
    out.extend_from_slice(content);
    out
}
