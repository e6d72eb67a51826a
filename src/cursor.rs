//! Signed, time-bounded resumption cursors (spec §3.1, §4.A, §6).
//!
//! Wire format: base64url of
//! `version(1) || stream_id_len(2 BE) || stream_id || offset_len(2 BE) ||
//! offset || issued_at_ms(8 BE) || hmac_sha256(preceding)[..16]`.
//!
//! The secret is process-lifetime: generated on first use unless the host
//! configures one, and rotating it invalidates outstanding cursors (clients
//! fall back to `offset=-1`, which is an accepted degradation per spec §9).

use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine};
use chrono::{DateTime, Utc};
use hmac::{Hmac, Mac};
use rand::RngCore;
use sha2::Sha256;
use std::time::Duration;

type HmacSha256 = Hmac<Sha256>;

const VERSION: u8 = 0x01;
const MAC_LEN: usize = 16;

/// Outcome of verifying a cursor presented by a client.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CursorVerification {
    Valid(u64),
    Invalid,
    Expired,
}

#[derive(Clone)]
pub struct CursorPolicy {
    secret: [u8; 32],
    ttl: Duration,
}

impl CursorPolicy {
    /// Build a policy with an explicit secret (e.g. configured by an operator
    /// who wants cursors to survive a restart).
    pub fn with_secret(secret: [u8; 32], ttl: Duration) -> Self {
        Self { secret, ttl }
    }

    /// Build a policy with a freshly generated, process-lifetime secret.
    pub fn generate(ttl: Duration) -> Self {
        let mut secret = [0u8; 32];
        rand::thread_rng().fill_bytes(&mut secret);
        Self { secret, ttl }
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    /// Issue a cursor for `(stream_id, offset)`, timestamped at `now`.
    pub fn issue_at(&self, stream_id: &str, offset: u64, now: DateTime<Utc>) -> String {
        let offset_str = offset.to_string();
        let payload = self.encode_payload(stream_id, &offset_str, now.timestamp_millis());
        let mac = self.mac(&payload);
        let mut out = payload;
        out.extend_from_slice(&mac[..MAC_LEN]);
        URL_SAFE_NO_PAD.encode(out)
    }

    pub fn issue(&self, stream_id: &str, offset: u64) -> String {
        self.issue_at(stream_id, offset, Utc::now())
    }

    /// Verify a cursor presented for `stream_id` at time `now`. Constant-time
    /// with respect to the MAC comparison.
    pub fn verify_at(&self, stream_id: &str, token: &str, now: DateTime<Utc>) -> CursorVerification {
        let Some(raw) = URL_SAFE_NO_PAD.decode(token).ok() else {
            return CursorVerification::Invalid;
        };
        if raw.len() <= MAC_LEN {
            return CursorVerification::Invalid;
        }
        let (payload, mac_tag) = raw.split_at(raw.len() - MAC_LEN);
        if self.verify_mac(payload, mac_tag).is_err() {
            return CursorVerification::Invalid;
        }
        let Some((parsed_stream_id, offset, issued_at_ms)) = decode_payload(payload) else {
            return CursorVerification::Invalid;
        };
        if parsed_stream_id != stream_id {
            return CursorVerification::Invalid;
        }
        let issued_at = match DateTime::<Utc>::from_timestamp_millis(issued_at_ms) {
            Some(t) => t,
            None => return CursorVerification::Invalid,
        };
        let age = now.signed_duration_since(issued_at);
        if age.num_milliseconds() < 0 || age.to_std().unwrap_or(Duration::MAX) > self.ttl {
            return CursorVerification::Expired;
        }
        CursorVerification::Valid(offset)
    }

    pub fn verify(&self, stream_id: &str, token: &str) -> CursorVerification {
        self.verify_at(stream_id, token, Utc::now())
    }

    fn encode_payload(&self, stream_id: &str, offset_str: &str, issued_at_ms: i64) -> Vec<u8> {
        let mut buf = Vec::with_capacity(1 + 2 + stream_id.len() + 2 + offset_str.len() + 8);
        buf.push(VERSION);
        buf.extend_from_slice(&(stream_id.len() as u16).to_be_bytes());
        buf.extend_from_slice(stream_id.as_bytes());
        buf.extend_from_slice(&(offset_str.len() as u16).to_be_bytes());
        buf.extend_from_slice(offset_str.as_bytes());
        buf.extend_from_slice(&issued_at_ms.to_be_bytes());
        buf
    }

    fn mac(&self, payload: &[u8]) -> Vec<u8> {
        let mut mac = HmacSha256::new_from_slice(&self.secret).expect("hmac accepts any key length");
        mac.update(payload);
        mac.finalize().into_bytes().to_vec()
    }

    fn verify_mac(&self, payload: &[u8], tag: &[u8]) -> Result<(), ()> {
        let mut mac = HmacSha256::new_from_slice(&self.secret).expect("hmac accepts any key length");
        mac.update(payload);
        // truncated MAC: `verify_slice` does a constant-time comparison of
        // the provided tag against the prefix of the computed MAC.
        mac.verify_truncated_left(tag).map_err(|_| ())
    }
}

fn decode_payload(payload: &[u8]) -> Option<(String, u64, i64)> {
    let mut cursor = payload;
    let version = *cursor.first()?;
    if version != VERSION {
        return None;
    }
    cursor = &cursor[1..];

    let stream_id_len = u16::from_be_bytes(cursor.get(0..2)?.try_into().ok()?) as usize;
    cursor = &cursor[2..];
    let stream_id = String::from_utf8(cursor.get(0..stream_id_len)?.to_vec()).ok()?;
    cursor = &cursor[stream_id_len..];

    let offset_len = u16::from_be_bytes(cursor.get(0..2)?.try_into().ok()?) as usize;
    cursor = &cursor[2..];
    let offset_str = std::str::from_utf8(cursor.get(0..offset_len)?).ok()?;
    let offset: u64 = offset_str.parse().ok()?;
    cursor = &cursor[offset_len..];

    let issued_at_ms = i64::from_be_bytes(cursor.get(0..8)?.try_into().ok()?);

    Some((stream_id, offset, issued_at_ms))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration as ChronoDuration;

    fn policy() -> CursorPolicy {
        CursorPolicy::generate(Duration::from_secs(600))
    }

    #[test]
    fn round_trips_within_ttl() {
        let p = policy();
        let token = p.issue("/streams/a", 42);
        assert_eq!(p.verify("/streams/a", &token), CursorVerification::Valid(42));
    }

    #[test]
    fn expires_after_ttl() {
        let p = policy();
        let issued_at = Utc::now() - ChronoDuration::seconds(601);
        let token = p.issue_at("/streams/a", 1, issued_at);
        assert_eq!(p.verify("/streams/a", &token), CursorVerification::Expired);
    }

    #[test]
    fn rejects_wrong_stream() {
        let p = policy();
        let token = p.issue("/streams/a", 1);
        assert_eq!(p.verify("/streams/b", &token), CursorVerification::Invalid);
    }

    #[test]
    fn rejects_tampering() {
        let p = policy();
        let token = p.issue("/streams/a", 1);
        let mut bytes = URL_SAFE_NO_PAD.decode(&token).unwrap();
        let last = bytes.len() - 1;
        bytes[last] ^= 0xFF;
        let tampered = URL_SAFE_NO_PAD.encode(bytes);
        assert_eq!(p.verify("/streams/a", &tampered), CursorVerification::Invalid);
    }

    #[test]
    fn rejects_garbage_token() {
        let p = policy();
        assert_eq!(p.verify("/streams/a", "not-base64!!"), CursorVerification::Invalid);
    }

    #[test]
    fn rotating_secret_invalidates_outstanding_cursors() {
        let p1 = policy();
        let token = p1.issue("/streams/a", 1);
        let p2 = policy();
        assert_eq!(p2.verify("/streams/a", &token), CursorVerification::Invalid);
    }
}
