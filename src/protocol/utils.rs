//! Helper functions shared by the smart protocol handlers: pkt-line parsing
//! and encoding over in-memory buffers.

use bytes::{Buf, BufMut, Bytes, BytesMut};

/// Read a packet line from the given bytes buffer.
///
/// Returns a tuple of (bytes_consumed, packet_data); a flush-pkt consumes 4
/// bytes and yields empty data, and a short or malformed buffer consumes 0.
pub fn read_pkt_line(bytes: &mut Bytes) -> (usize, Bytes) {
    if bytes.len() < 4 {
        return (0, Bytes::new());
    }

    let pkt_length = bytes.copy_to_bytes(4);
    let pkt_length_str = match core::str::from_utf8(&pkt_length) {
        Ok(s) => s,
        Err(_) => {
            tracing::warn!("Invalid UTF-8 in packet length: {:?}", pkt_length);
            return (0, Bytes::new());
        }
    };

    let pkt_length = match usize::from_str_radix(pkt_length_str, 16) {
        Ok(len) => len,
        Err(_) => {
            tracing::warn!("Invalid hex packet length: {:?}", pkt_length_str);
            return (0, Bytes::new());
        }
    };

    // 0000 flush, 0001 delim, 0002 response-end: all data-free.
    if pkt_length <= 2 {
        return (4, Bytes::new());
    }

    if pkt_length < 4 {
        tracing::warn!("Invalid packet length: {pkt_length}");
        return (0, Bytes::new());
    }

    let data_length = pkt_length - 4;
    if bytes.len() < data_length {
        tracing::warn!(
            "Insufficient data: need {} bytes, have {}",
            data_length,
            bytes.len()
        );
        return (0, Bytes::new());
    }

    let pkt_line = bytes.copy_to_bytes(data_length);
    (pkt_length, pkt_line)
}

/// Append one pkt-line with its length prefix.
pub fn add_pkt_line_string(pkt_line_stream: &mut BytesMut, buf_str: String) {
    add_pkt_line_bytes(pkt_line_stream, buf_str.as_bytes());
}

/// Append one binary pkt-line with its length prefix.
pub fn add_pkt_line_bytes(pkt_line_stream: &mut BytesMut, data: &[u8]) {
    let length = data.len() + 4;
    pkt_line_stream.put(Bytes::from(format!("{length:04x}")));
    pkt_line_stream.put(data);
}

/// Read until whitespace or NUL and return the extracted string.
pub fn read_until_white_space(bytes: &mut Bytes) -> String {
    let mut buf = Vec::new();
    while bytes.has_remaining() {
        let c = bytes.get_u8();
        if c.is_ascii_whitespace() || c == 0 {
            break;
        }
        buf.push(c);
    }
    match String::from_utf8(buf) {
        Ok(s) => s,
        Err(e) => {
            tracing::warn!("Invalid UTF-8 in protocol data: {}", e);
            String::new()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::types::PKT_LINE_END_MARKER;

    /// Encoding then decoding one line round-trips.
    #[test]
    fn pkt_line_round_trip() {
        let mut out = BytesMut::new();
        add_pkt_line_string(&mut out, "want 1234\n".to_string());
        out.put(&PKT_LINE_END_MARKER[..]);

        let mut bytes = out.freeze();
        let (consumed, line) = read_pkt_line(&mut bytes);
        assert_eq!(consumed, 14);
        assert_eq!(line.as_ref(), b"want 1234\n");

        let (consumed, line) = read_pkt_line(&mut bytes);
        assert_eq!(consumed, 4);
        assert!(line.is_empty());
    }

    /// Truncated buffers consume nothing.
    #[test]
    fn truncated_pkt_line() {
        let mut bytes = Bytes::from_static(b"00");
        assert_eq!(read_pkt_line(&mut bytes), (0, Bytes::new()));

        let mut bytes = Bytes::from_static(b"0008ab");
        let (consumed, _) = read_pkt_line(&mut bytes);
        assert_eq!(consumed, 0);
    }

    /// Token scanning stops at whitespace and NUL.
    #[test]
    fn token_scanning() {
        let mut bytes = Bytes::from_static(b"want deadbeef\0caps here");
        assert_eq!(read_until_white_space(&mut bytes), "want");
        assert_eq!(read_until_white_space(&mut bytes), "deadbeef");
        assert_eq!(read_until_white_space(&mut bytes), "caps");
    }
}
