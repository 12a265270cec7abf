//! `UUID()` / `NOW()` token rewriting.
//!
//! With server-side generation, the two clusters would each evaluate
//! `uuid()`/`now()` themselves and diverge on every such insert. The
//! rewriter replaces the tokens with proxy-issued time-based UUIDs
//! *before* fan-out, so both clusters receive identical literals.
//!
//! A cheap case-insensitive scan of the raw body keeps full decode off
//! the common path; only frames that actually carry a token are decoded
//! and re-encoded. Prepared statements (EXECUTE) are not rewritten.
//!
//! The scan is textual and will also match tokens inside string
//! literals or comments; such statements are rewritten too. That
//! matches the scanner's contract of never requiring a CQL parse.

use bytes::{Bytes, BytesMut};
use tracing::{debug, warn};
use uuid::{Context, Timestamp, Uuid};

use crate::codec::{body_prefix_len, Batch, BatchStatement, Query, Value};
use crate::error::Result;
use crate::inspect::FrameKind;
use crate::protocol::{opcode, Frame, HEADER_SIZE};

/// Token replaced by a generated UUID.
const UUID_TOKEN: &str = "UUID()";

/// Token replaced by a generated time-UUID.
const NOW_TOKEN: &str = "NOW()";

/// Generator for time-based (version 1) UUIDs.
///
/// One per rewriter; the shared context's clock sequence keeps UUIDs
/// generated in the same clock tick distinct.
#[derive(Debug)]
pub struct TimeUuidGen {
    context: Context,
    node_id: [u8; 6],
}

impl TimeUuidGen {
    /// Create a generator with a process-derived node id.
    pub fn new() -> Self {
        let seed = seed_u64();
        let mut node_id = [0u8; 6];
        node_id.copy_from_slice(&seed.to_be_bytes()[2..]);
        // Multicast bit set, as required for non-MAC node ids.
        node_id[0] |= 0x01;

        Self {
            context: Context::new(seed as u16),
            node_id,
        }
    }

    /// Generate the next time-UUID.
    pub fn next(&self) -> Uuid {
        Uuid::new_v1(Timestamp::now(&self.context), &self.node_id)
    }
}

impl Default for TimeUuidGen {
    fn default() -> Self {
        Self::new()
    }
}

/// Simple seed from system time and process id.
fn seed_u64() -> u64 {
    use std::time::{SystemTime, UNIX_EPOCH};

    let nanos = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_nanos() as u64)
        .unwrap_or(0);
    let pid = std::process::id() as u64;
    nanos.wrapping_mul(0x517cc1b727220a95) ^ pid
}

/// Rewrites `UUID()`/`NOW()` tokens in QUERY and BATCH frames.
pub struct QueryRewriter {
    uuid_gen: TimeUuidGen,
}

impl QueryRewriter {
    /// Create a rewriter with a fresh UUID generator.
    pub fn new() -> Self {
        Self {
            uuid_gen: TimeUuidGen::new(),
        }
    }

    /// Rewrite a frame if it needs it; otherwise hand the buffer back
    /// untouched.
    ///
    /// Runs once per client frame, before fan-out, so both upstreams
    /// observe the same generated values. A decode failure forwards the
    /// original buffer and logs a warning: forward progress over
    /// rewrite fidelity.
    pub fn maybe_rewrite(&self, kind: FrameKind, frame: Bytes) -> Bytes {
        if kind != FrameKind::Query && kind != FrameKind::Batch {
            return frame;
        }
        if !contains_token(&frame[HEADER_SIZE..]) {
            return frame;
        }

        match self.rewrite(frame.clone()) {
            Ok(Some(rewritten)) => rewritten,
            Ok(None) => frame,
            Err(e) => {
                warn!("Forwarding frame unrewritten, decode failed: {e}");
                frame
            }
        }
    }

    /// Full decode / replace / re-encode. `Ok(None)` means the frame
    /// did not qualify and the original buffer should be used.
    fn rewrite(&self, frame: Bytes) -> Result<Option<Bytes>> {
        let parsed = Frame::parse(frame)?;
        let prefix_len = body_prefix_len(&parsed.header, &parsed.body)?;
        let prefix = parsed.body.slice(..prefix_len);
        let rest = parsed.body.slice(prefix_len..);

        let new_rest = match parsed.opcode() {
            opcode::QUERY => {
                let mut query = Query::decode(rest)?;
                if !is_rewritable_statement(&query.query) {
                    return Ok(None);
                }
                query.query = self.replace_tokens(&query.query);
                debug!("Rewrote query: {}", query.query);
                query.encode()
            }
            opcode::BATCH => {
                let mut batch = Batch::decode(rest)?;
                for (statement, values) in &mut batch.statements {
                    if let BatchStatement::Text(query) = statement {
                        *query = self.replace_tokens(query);
                    }
                    for value in values {
                        self.replace_value(value);
                    }
                }
                batch.encode()
            }
            _ => return Ok(None),
        };

        let mut body = BytesMut::with_capacity(prefix.len() + new_rest.len());
        body.extend_from_slice(&prefix);
        body.extend_from_slice(&new_rest);

        Ok(Some(Frame::new(parsed.header, body.freeze()).encode()))
    }

    /// Replace every occurrence of both tokens, each with a distinct
    /// generated UUID.
    fn replace_tokens(&self, query: &str) -> String {
        let replaced = self.replace_token(query, UUID_TOKEN);
        self.replace_token(&replaced, NOW_TOKEN)
    }

    /// Replace every case-insensitive occurrence of one token.
    fn replace_token(&self, query: &str, token: &str) -> String {
        let upper = query.to_ascii_uppercase();
        let mut out = String::with_capacity(query.len());
        let mut pos = 0;
        while let Some(found) = upper[pos..].find(token) {
            let found = pos + found;
            out.push_str(&query[pos..found]);
            out.push_str(&self.uuid_gen.next().to_string());
            pos = found + token.len();
        }
        out.push_str(&query[pos..]);
        out
    }

    /// Replace a bound value whose trimmed text form is a token.
    fn replace_value(&self, value: &mut Value) {
        if let Value::Some(bytes) = value {
            if let Ok(text) = std::str::from_utf8(bytes) {
                let trimmed = text.trim();
                if trimmed.eq_ignore_ascii_case(UUID_TOKEN) || trimmed.eq_ignore_ascii_case(NOW_TOKEN)
                {
                    let uuid = self.uuid_gen.next().to_string();
                    debug!("Replaced bound value {trimmed} with {uuid}");
                    *bytes = Bytes::from(uuid.into_bytes());
                }
            }
        }
    }
}

impl Default for QueryRewriter {
    fn default() -> Self {
        Self::new()
    }
}

/// Statements that qualify for token replacement: INSERT, UPDATE, or an
/// inline BEGIN BATCH wrapping either (cqlsh submits batches as QUERY
/// frames).
fn is_rewritable_statement(query: &str) -> bool {
    let upper = query.trim_start().to_ascii_uppercase();
    upper.starts_with("INSERT")
        || upper.starts_with("UPDATE")
        || (upper.starts_with("BEGIN BATCH")
            && (upper.contains("INSERT") || upper.contains("UPDATE")))
}

/// Cheap scan for either token, ASCII case-insensitive, no allocation.
fn contains_token(body: &[u8]) -> bool {
    contains_ignore_ascii(body, UUID_TOKEN.as_bytes())
        || contains_ignore_ascii(body, NOW_TOKEN.as_bytes())
}

fn contains_ignore_ascii(haystack: &[u8], needle: &[u8]) -> bool {
    if needle.is_empty() || haystack.len() < needle.len() {
        return false;
    }
    haystack
        .windows(needle.len())
        .any(|window| window.eq_ignore_ascii_case(needle))
}
