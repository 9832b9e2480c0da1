//! The WebSocket opening handshake (RFC 6455 §4), including origin
//! validation and `Sec-WebSocket-Accept` computation.
//!
//! `Sec-WebSocket-Accept` only needs a SHA-1 digest of a short,
//! attacker-uncontrolled string (the client's nonce concatenated with a
//! fixed GUID); pulling in a general-purpose crypto crate for that single
//! digest would be a heavier dependency than the job warrants, so SHA-1
//! is rolled here directly, scoped to exactly this use.

use base64::Engine as _;
use loopserve_parser::Status;

use crate::request::OwnedHeaders;
use crate::response::Response;

const WS_GUID: &str = "258EAFA5-E914-47DA-95CA-C5AB0DC85B11";

/// Failures validating a WebSocket upgrade request.
#[derive(Debug, thiserror::Error, PartialEq, Eq, Clone)]
pub enum HandshakeError {
    /// `Upgrade: websocket` was missing or had a different value.
    #[error("missing or invalid Upgrade header")]
    NotAnUpgrade,
    /// `Connection: Upgrade` was missing from the comma-separated list.
    #[error("missing Connection: Upgrade")]
    NotUpgradeConnection,
    /// `Sec-WebSocket-Key` was missing or not valid base64.
    #[error("missing or invalid Sec-WebSocket-Key")]
    InvalidKey,
    /// `Sec-WebSocket-Version` was not `13`.
    #[error("unsupported Sec-WebSocket-Version")]
    UnsupportedVersion,
    /// The request's `Origin` was not in the server's allow-list.
    #[error("origin not allowed")]
    OriginNotAllowed,
}

/// Validates the handshake request headers against RFC 6455 §4.2.1 and,
/// if `allowed_origins` is non-empty, against the `Origin` allow-list
/// (exact match or a literal `*` wildcard entry).
pub fn validate_request(
    headers: &OwnedHeaders,
    allowed_origins: &[String],
) -> Result<String, HandshakeError> {
    let upgrade = headers.get("upgrade").unwrap_or("");
    if !upgrade.eq_ignore_ascii_case("websocket") {
        return Err(HandshakeError::NotAnUpgrade);
    }

    let connection = headers.get("connection").unwrap_or("");
    if !connection
        .split(',')
        .any(|tok| tok.trim().eq_ignore_ascii_case("upgrade"))
    {
        return Err(HandshakeError::NotUpgradeConnection);
    }

    let version = headers.get("sec-websocket-version").unwrap_or("");
    if version.trim() != "13" {
        return Err(HandshakeError::UnsupportedVersion);
    }

    let key = headers
        .get("sec-websocket-key")
        .filter(|k| !k.trim().is_empty())
        .ok_or(HandshakeError::InvalidKey)?;

    if !allowed_origins.is_empty() {
        let origin = headers.get("origin").unwrap_or("");
        let allowed = allowed_origins
            .iter()
            .any(|o| o == "*" || o.eq_ignore_ascii_case(origin));
        if !allowed {
            return Err(HandshakeError::OriginNotAllowed);
        }
    }

    Ok(key.to_string())
}

/// Computes `Sec-WebSocket-Accept` from the client's `Sec-WebSocket-Key`.
pub fn compute_accept_key(client_key: &str) -> String {
    let mut input = client_key.as_bytes().to_vec();
    input.extend_from_slice(WS_GUID.as_bytes());
    let digest = sha1(&input);
    base64::engine::general_purpose::STANDARD.encode(digest)
}

/// Builds the `101 Switching Protocols` response completing the
/// handshake, optionally negotiating one of `sub_protocol`.
pub fn build_upgrade_response(client_key: &str, sub_protocol: Option<&str>) -> Response {
    let accept = compute_accept_key(client_key);
    let mut response = Response::new(Status::SwitchingProtocols)
        .header("Upgrade", "websocket")
        .header("Connection", "Upgrade")
        .header("Sec-WebSocket-Accept", accept);
    if let Some(proto) = sub_protocol {
        response = response.header("Sec-WebSocket-Protocol", proto);
    }
    response
}

/// A from-scratch SHA-1 (FIPS 180-4), sufficient for the handshake's
/// single fixed-format digest. Not constant-time; not suitable for
/// anything beyond this non-adversarial, fixed-shape input.
fn sha1(message: &[u8]) -> [u8; 20] {
    let mut h0: u32 = 0x67452301;
    let mut h1: u32 = 0xEFCDAB89;
    let mut h2: u32 = 0x98BADCFE;
    let mut h3: u32 = 0x10325476;
    let mut h4: u32 = 0xC3D2E1F0;

    let mut data = message.to_vec();
    let bit_len = (message.len() as u64) * 8;
    data.push(0x80);
    while data.len() % 64 != 56 {
        data.push(0);
    }
    data.extend_from_slice(&bit_len.to_be_bytes());

    for chunk in data.chunks_exact(64) {
        let mut w = [0u32; 80];
        for (i, word) in chunk.chunks_exact(4).enumerate() {
            w[i] = u32::from_be_bytes([word[0], word[1], word[2], word[3]]);
        }
        for i in 16..80 {
            w[i] = (w[i - 3] ^ w[i - 8] ^ w[i - 14] ^ w[i - 16]).rotate_left(1);
        }

        let (mut a, mut b, mut c, mut d, mut e) = (h0, h1, h2, h3, h4);
        for (i, &word) in w.iter().enumerate() {
            let (f, k) = match i {
                0..=19 => ((b & c) | ((!b) & d), 0x5A827999u32),
                20..=39 => (b ^ c ^ d, 0x6ED9EBA1),
                40..=59 => ((b & c) | (b & d) | (c & d), 0x8F1BBCDC),
                _ => (b ^ c ^ d, 0xCA62C1D6),
            };
            let temp = a
                .rotate_left(5)
                .wrapping_add(f)
                .wrapping_add(e)
                .wrapping_add(k)
                .wrapping_add(word);
            e = d;
            d = c;
            c = b.rotate_left(30);
            b = a;
            a = temp;
        }

        h0 = h0.wrapping_add(a);
        h1 = h1.wrapping_add(b);
        h2 = h2.wrapping_add(c);
        h3 = h3.wrapping_add(d);
        h4 = h4.wrapping_add(e);
    }

    let mut out = [0u8; 20];
    out[0..4].copy_from_slice(&h0.to_be_bytes());
    out[4..8].copy_from_slice(&h1.to_be_bytes());
    out[8..12].copy_from_slice(&h2.to_be_bytes());
    out[12..16].copy_from_slice(&h3.to_be_bytes());
    out[16..20].copy_from_slice(&h4.to_be_bytes());
    out
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn matches_the_rfc_6455_worked_example() {
        // RFC 6455 §1.3's worked example.
        assert_eq!(
            compute_accept_key("dGhlIHNhbXBsZSBub25jZQ=="),
            "s3pPLMBiTxaQ9kYGzzhZRbK+xOo="
        );
    }

    #[test]
    fn sha1_matches_known_vectors() {
        assert_eq!(
            sha1(b"abc")
                .iter()
                .map(|b| format!("{b:02x}"))
                .collect::<String>(),
            "a9993e364706816aba3e25717850c26c9cd0d89"
        );
        assert_eq!(
            sha1(b"")
                .iter()
                .map(|b| format!("{b:02x}"))
                .collect::<String>(),
            "da39a3ee5e6b4b0d3255bfef95601890afd80709"
        );
    }

    #[test]
    fn rejects_missing_upgrade_header() {
        let headers = OwnedHeaders::default();
        assert_eq!(
            validate_request(&headers, &[]),
            Err(HandshakeError::NotAnUpgrade)
        );
    }
}
