//! CQL notation primitives.
//!
//! Checked readers and writers for the notations the native protocol
//! composes bodies from: `[string]`, `[long string]`, `[string list]`,
//! `[string multimap]`, `[short bytes]`, `[value]` and the `[bytes map]`
//! used by custom payloads. Readers never panic on truncated input;
//! every read is length-checked and surfaces a codec error instead.

use bytes::{Buf, BufMut, Bytes, BytesMut};

use crate::error::{ProxyError, Result};

fn need(buf: &Bytes, n: usize, what: &str) -> Result<()> {
    if buf.remaining() < n {
        return Err(ProxyError::Codec(format!(
            "Truncated {}: need {} bytes, have {}",
            what,
            n,
            buf.remaining()
        )));
    }
    Ok(())
}

/// Read a `[short]` (u16 BE).
pub fn read_short(buf: &mut Bytes) -> Result<u16> {
    need(buf, 2, "[short]")?;
    Ok(buf.get_u16())
}

/// Read an `[int]` (i32 BE).
pub fn read_int(buf: &mut Bytes) -> Result<i32> {
    need(buf, 4, "[int]")?;
    Ok(buf.get_i32())
}

/// Read a `[byte]`.
pub fn read_byte(buf: &mut Bytes) -> Result<u8> {
    need(buf, 1, "[byte]")?;
    Ok(buf.get_u8())
}

/// Read a `[string]` (u16 length + UTF-8 bytes).
pub fn read_string(buf: &mut Bytes) -> Result<String> {
    let len = read_short(buf)? as usize;
    need(buf, len, "[string]")?;
    let bytes = buf.copy_to_bytes(len);
    String::from_utf8(bytes.to_vec())
        .map_err(|e| ProxyError::Codec(format!("Invalid UTF-8 in [string]: {e}")))
}

/// Read a `[long string]` (i32 length + UTF-8 bytes).
pub fn read_long_string(buf: &mut Bytes) -> Result<String> {
    let len = read_int(buf)?;
    if len < 0 {
        return Err(ProxyError::Codec(format!(
            "Negative [long string] length {len}"
        )));
    }
    let len = len as usize;
    need(buf, len, "[long string]")?;
    let bytes = buf.copy_to_bytes(len);
    String::from_utf8(bytes.to_vec())
        .map_err(|e| ProxyError::Codec(format!("Invalid UTF-8 in [long string]: {e}")))
}

/// Read a `[short bytes]` (u16 length + bytes).
pub fn read_short_bytes(buf: &mut Bytes) -> Result<Bytes> {
    let len = read_short(buf)? as usize;
    need(buf, len, "[short bytes]")?;
    Ok(buf.copy_to_bytes(len))
}

/// Read a `[string list]` (u16 count + strings).
pub fn read_string_list(buf: &mut Bytes) -> Result<Vec<String>> {
    let count = read_short(buf)? as usize;
    let mut list = Vec::with_capacity(count);
    for _ in 0..count {
        list.push(read_string(buf)?);
    }
    Ok(list)
}

/// Read a `[string multimap]` (u16 count + key/string-list pairs).
///
/// Returned as pairs to preserve the server's key order across a
/// rewrite.
pub fn read_string_multimap(buf: &mut Bytes) -> Result<Vec<(String, Vec<String>)>> {
    let count = read_short(buf)? as usize;
    let mut map = Vec::with_capacity(count);
    for _ in 0..count {
        let key = read_string(buf)?;
        let values = read_string_list(buf)?;
        map.push((key, values));
    }
    Ok(map)
}

/// A `[value]`: i32 length, where -1 is null and -2 is not-set.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Value {
    /// Regular value bytes (may be empty).
    Some(Bytes),
    /// Length -1.
    Null,
    /// Length -2 (protocol v4+).
    NotSet,
}

/// Read a `[value]`.
pub fn read_value(buf: &mut Bytes) -> Result<Value> {
    let len = read_int(buf)?;
    match len {
        -1 => Ok(Value::Null),
        -2 => Ok(Value::NotSet),
        n if n < 0 => Err(ProxyError::Codec(format!("Invalid [value] length {n}"))),
        n => {
            let n = n as usize;
            need(buf, n, "[value]")?;
            Ok(Value::Some(buf.copy_to_bytes(n)))
        }
    }
}

/// Write a `[string]`.
pub fn write_string(buf: &mut BytesMut, s: &str) {
    buf.put_u16(s.len() as u16);
    buf.put_slice(s.as_bytes());
}

/// Write a `[long string]`.
pub fn write_long_string(buf: &mut BytesMut, s: &str) {
    buf.put_i32(s.len() as i32);
    buf.put_slice(s.as_bytes());
}

/// Write a `[short bytes]`.
pub fn write_short_bytes(buf: &mut BytesMut, b: &[u8]) {
    buf.put_u16(b.len() as u16);
    buf.put_slice(b);
}

/// Write a `[string list]`.
pub fn write_string_list(buf: &mut BytesMut, list: &[String]) {
    buf.put_u16(list.len() as u16);
    for s in list {
        write_string(buf, s);
    }
}

/// Write a `[string multimap]`.
pub fn write_string_multimap(buf: &mut BytesMut, map: &[(String, Vec<String>)]) {
    buf.put_u16(map.len() as u16);
    for (key, values) in map {
        write_string(buf, key);
        write_string_list(buf, values);
    }
}

/// Write a `[value]`.
pub fn write_value(buf: &mut BytesMut, value: &Value) {
    match value {
        Value::Some(b) => {
            buf.put_i32(b.len() as i32);
            buf.put_slice(b);
        }
        Value::Null => buf.put_i32(-1),
        Value::NotSet => buf.put_i32(-2),
    }
}

/// Byte length of a `[bytes map]` (u16 count + `[string][bytes]` pairs)
/// starting at the beginning of `buf`, without materializing it.
///
/// Used to carry a request's custom payload through a rewrite as an
/// opaque prefix.
pub fn bytes_map_len(buf: &Bytes) -> Result<usize> {
    let mut probe = buf.clone();
    let count = read_short(&mut probe)? as usize;
    for _ in 0..count {
        let key_len = read_short(&mut probe)? as usize;
        need(&probe, key_len, "[bytes map] key")?;
        probe.advance(key_len);
        let value_len = read_int(&mut probe)?;
        if value_len > 0 {
            need(&probe, value_len as usize, "[bytes map] value")?;
            probe.advance(value_len as usize);
        }
    }
    Ok(buf.len() - probe.len())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_string_roundtrip() {
        let mut buf = BytesMut::new();
        write_string(&mut buf, "CQL_VERSION");
        let mut bytes = buf.freeze();
        assert_eq!(read_string(&mut bytes).unwrap(), "CQL_VERSION");
        assert!(bytes.is_empty());
    }

    #[test]
    fn test_long_string_roundtrip() {
        let mut buf = BytesMut::new();
        write_long_string(&mut buf, "SELECT * FROM system.local");
        let mut bytes = buf.freeze();
        assert_eq!(
            read_long_string(&mut bytes).unwrap(),
            "SELECT * FROM system.local"
        );
    }

    #[test]
    fn test_truncated_string_is_error() {
        let mut bytes = Bytes::from_static(&[0x00, 0x10, b'a', b'b']);
        let err = read_string(&mut bytes).unwrap_err();
        assert!(err.to_string().contains("Truncated"));
    }

    #[test]
    fn test_truncated_short_is_error() {
        let mut bytes = Bytes::from_static(&[0x00]);
        assert!(read_short(&mut bytes).is_err());
    }

    #[test]
    fn test_string_multimap_roundtrip_preserves_order() {
        let map = vec![
            (
                "PROTOCOL_VERSIONS".to_string(),
                vec!["3/v3".to_string(), "4/v4".to_string()],
            ),
            (
                "COMPRESSION".to_string(),
                vec!["snappy".to_string(), "lz4".to_string()],
            ),
            ("CQL_VERSION".to_string(), vec!["3.4.4".to_string()]),
        ];
        let mut buf = BytesMut::new();
        write_string_multimap(&mut buf, &map);
        let mut bytes = buf.freeze();
        assert_eq!(read_string_multimap(&mut bytes).unwrap(), map);
    }

    #[test]
    fn test_value_variants() {
        let mut buf = BytesMut::new();
        write_value(&mut buf, &Value::Some(Bytes::from_static(b"uuid()")));
        write_value(&mut buf, &Value::Null);
        write_value(&mut buf, &Value::NotSet);
        write_value(&mut buf, &Value::Some(Bytes::new()));

        let mut bytes = buf.freeze();
        assert_eq!(
            read_value(&mut bytes).unwrap(),
            Value::Some(Bytes::from_static(b"uuid()"))
        );
        assert_eq!(read_value(&mut bytes).unwrap(), Value::Null);
        assert_eq!(read_value(&mut bytes).unwrap(), Value::NotSet);
        assert_eq!(read_value(&mut bytes).unwrap(), Value::Some(Bytes::new()));
    }

    #[test]
    fn test_short_bytes_roundtrip() {
        let mut buf = BytesMut::new();
        write_short_bytes(&mut buf, &[0xDE, 0xAD, 0xBE, 0xEF]);
        let mut bytes = buf.freeze();
        assert_eq!(
            read_short_bytes(&mut bytes).unwrap(),
            Bytes::from_static(&[0xDE, 0xAD, 0xBE, 0xEF])
        );
    }

    #[test]
    fn test_bytes_map_len() {
        // count=1, key "k", value of 3 bytes
        let mut buf = BytesMut::new();
        buf.put_u16(1);
        write_string(&mut buf, "k");
        buf.put_i32(3);
        buf.put_slice(&[1, 2, 3]);
        buf.put_slice(b"trailing");

        let bytes = buf.freeze();
        let len = bytes_map_len(&bytes).unwrap();
        assert_eq!(len, bytes.len() - "trailing".len());
    }

    #[test]
    fn test_bytes_map_len_null_value() {
        let mut buf = BytesMut::new();
        buf.put_u16(1);
        write_string(&mut buf, "key");
        buf.put_i32(-1);

        let bytes = buf.freeze();
        assert_eq!(bytes_map_len(&bytes).unwrap(), bytes.len());
    }
}
