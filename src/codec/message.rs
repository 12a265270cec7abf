//! Typed message bodies for the few frames the proxy must understand.
//!
//! The proxy forwards almost everything as opaque bytes. Full decode is
//! only needed for:
//! - QUERY and BATCH requests, when token rewriting is enabled
//! - SUPPORTED responses, when configured versions override the server's
//! - ERROR responses it synthesizes itself
//!
//! Decoders model exactly the fields a rewrite touches and keep the rest
//! as opaque tails, so re-encoding reproduces the remaining bytes
//! verbatim.

use bytes::{Buf, BufMut, Bytes, BytesMut};

use super::primitives::{
    bytes_map_len, read_byte, read_int, read_long_string, read_short, read_short_bytes,
    read_string, read_value, write_long_string, write_short_bytes, write_string,
    write_string_multimap, write_value, Value,
};
use crate::error::{ProxyError, Result};
use crate::protocol::{flags, FrameHeader};

/// Byte length of the envelope fields that precede the message body
/// proper (tracing id, warnings, custom payload), derived from the
/// header flags.
///
/// The prefix is carried through rewrites as an opaque slice.
///
/// # Errors
///
/// Compressed bodies cannot be decoded; the caller falls back to
/// forwarding the original buffer.
pub fn body_prefix_len(header: &FrameHeader, body: &Bytes) -> Result<usize> {
    if flags::has_flag(header.flags, flags::COMPRESSED) {
        return Err(ProxyError::Codec(
            "Compressed frame bodies are not decoded".to_string(),
        ));
    }

    let mut probe = body.clone();

    if header.is_response() {
        if flags::has_flag(header.flags, flags::TRACING) {
            if probe.remaining() < 16 {
                return Err(ProxyError::Codec("Truncated tracing id".to_string()));
            }
            probe.advance(16);
        }
        if flags::has_flag(header.flags, flags::WARNING) {
            let count = read_short(&mut probe)? as usize;
            for _ in 0..count {
                let len = read_short(&mut probe)? as usize;
                if probe.remaining() < len {
                    return Err(ProxyError::Codec("Truncated warning".to_string()));
                }
                probe.advance(len);
            }
        }
    }

    if flags::has_flag(header.flags, flags::CUSTOM_PAYLOAD) {
        let rest = probe.clone();
        let len = bytes_map_len(&rest)?;
        probe.advance(len);
    }

    Ok(body.len() - probe.len())
}

/// A QUERY request body: the statement text plus opaque query
/// parameters (consistency, bound values, paging state, …) that a
/// rewrite never touches.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Query {
    /// Statement text.
    pub query: String,
    /// Everything after the `[long string]`, re-encoded verbatim.
    pub tail: Bytes,
}

impl Query {
    /// Decode from a body (prefix already stripped).
    pub fn decode(mut body: Bytes) -> Result<Self> {
        let query = read_long_string(&mut body)?;
        Ok(Self { query, tail: body })
    }

    /// Encode back into a body.
    pub fn encode(&self) -> Bytes {
        let mut buf = BytesMut::with_capacity(4 + self.query.len() + self.tail.len());
        write_long_string(&mut buf, &self.query);
        buf.put_slice(&self.tail);
        buf.freeze()
    }
}

/// One statement inside a BATCH: either inline text or a prepared id.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BatchStatement {
    /// Kind 0: inline statement text.
    Text(String),
    /// Kind 1: prepared statement id, never rewritten.
    Prepared(Bytes),
}

/// A BATCH request body: type byte, statements with their bound values,
/// and an opaque tail (consistency and batch flags).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Batch {
    /// Batch type (0 logged, 1 unlogged, 2 counter).
    pub batch_type: u8,
    /// Statements, each with its bound values.
    pub statements: Vec<(BatchStatement, Vec<Value>)>,
    /// Everything after the statement list, re-encoded verbatim.
    pub tail: Bytes,
}

impl Batch {
    /// Decode from a body (prefix already stripped).
    pub fn decode(mut body: Bytes) -> Result<Self> {
        let batch_type = read_byte(&mut body)?;
        let count = read_short(&mut body)? as usize;

        let mut statements = Vec::with_capacity(count);
        for _ in 0..count {
            let kind = read_byte(&mut body)?;
            let statement = match kind {
                0 => BatchStatement::Text(read_long_string(&mut body)?),
                1 => BatchStatement::Prepared(read_short_bytes(&mut body)?),
                other => {
                    return Err(ProxyError::Codec(format!(
                        "Unknown batch statement kind {other}"
                    )))
                }
            };

            let value_count = read_short(&mut body)? as usize;
            let mut values = Vec::with_capacity(value_count);
            for _ in 0..value_count {
                values.push(read_value(&mut body)?);
            }
            statements.push((statement, values));
        }

        Ok(Self {
            batch_type,
            statements,
            tail: body,
        })
    }

    /// Encode back into a body.
    pub fn encode(&self) -> Bytes {
        let mut buf = BytesMut::new();
        buf.put_u8(self.batch_type);
        buf.put_u16(self.statements.len() as u16);

        for (statement, values) in &self.statements {
            match statement {
                BatchStatement::Text(query) => {
                    buf.put_u8(0);
                    write_long_string(&mut buf, query);
                }
                BatchStatement::Prepared(id) => {
                    buf.put_u8(1);
                    write_short_bytes(&mut buf, id);
                }
            }
            buf.put_u16(values.len() as u16);
            for value in values {
                write_value(&mut buf, value);
            }
        }

        buf.put_slice(&self.tail);
        buf.freeze()
    }
}

/// A SUPPORTED response body: the advertised option multimap.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Supported {
    /// Options in the server's key order.
    pub options: Vec<(String, Vec<String>)>,
}

impl Supported {
    /// Decode from a body (prefix already stripped).
    pub fn decode(mut body: Bytes) -> Result<Self> {
        let options = super::primitives::read_string_multimap(&mut body)?;
        Ok(Self { options })
    }

    /// Encode back into a body.
    pub fn encode(&self) -> Bytes {
        let mut buf = BytesMut::new();
        write_string_multimap(&mut buf, &self.options);
        buf.freeze()
    }

    /// Replace an option's values in place, or append the key if the
    /// server did not advertise it.
    pub fn set(&mut self, key: &str, values: Vec<String>) {
        for (existing, existing_values) in &mut self.options {
            if existing == key {
                *existing_values = values;
                return;
            }
        }
        self.options.push((key.to_string(), values));
    }

    /// Look up an option's values.
    pub fn get(&self, key: &str) -> Option<&[String]> {
        self.options
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.as_slice())
    }
}

/// An ERROR response body: error code plus message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ErrorBody {
    /// CQL error code (0x000A protocol error, 0x0000 server error).
    pub code: i32,
    /// Human-readable message.
    pub message: String,
}

impl ErrorBody {
    /// Decode from a body (prefix already stripped).
    pub fn decode(mut body: Bytes) -> Result<Self> {
        let code = read_int(&mut body)?;
        let message = read_string(&mut body)?;
        Ok(Self { code, message })
    }

    /// Encode into a body.
    pub fn encode(&self) -> Bytes {
        let mut buf = BytesMut::with_capacity(4 + 2 + self.message.len());
        buf.put_i32(self.code);
        write_string(&mut buf, &self.message);
        buf.freeze()
    }
}
