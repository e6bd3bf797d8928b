use std::io::{Cursor, Read};

use bytes::BufMut;

use crate::ofp_message::OfpSerializationError;

/// Declares the zero-sized codec type that carries the per-version parse/marshal functions
/// of a message type.
macro_rules! create_empty_wrapper {
    ($wrapped_name:ident, $wrapper_name:ident) => {
        #[doc = concat!("Wire codec for `", stringify!($wrapped_name), "`.")]
        pub(crate) struct $wrapper_name;
    };
}

pub fn write_padding_bytes<B: BufMut>(bytes: &mut B, count: usize) {
    bytes.put_bytes(0, count);
}

/// Pads `bytes` with zeros until its length is a multiple of 8.
pub fn pad_to_8(bytes: &mut Vec<u8>) {
    let rem = bytes.len() % 8;
    if rem != 0 {
        write_padding_bytes(bytes, 8 - rem);
    }
}

pub fn remaining(bytes: &Cursor<&[u8]>) -> usize {
    bytes.get_ref().len().saturating_sub(bytes.position() as usize)
}

pub fn skip(bytes: &mut Cursor<&[u8]>, count: usize) -> Result<(), OfpSerializationError> {
    ensure_remaining(bytes, count)?;
    bytes.set_position(bytes.position() + count as u64);
    Ok(())
}

pub fn ensure_remaining(bytes: &Cursor<&[u8]>, needed: usize) -> Result<(), OfpSerializationError> {
    let available = remaining(bytes);
    if available < needed {
        Err(OfpSerializationError::Truncated { needed, available })
    } else {
        Ok(())
    }
}

pub fn read_bytes(bytes: &mut Cursor<&[u8]>, count: usize) -> Result<Vec<u8>, OfpSerializationError> {
    ensure_remaining(bytes, count)?;
    let mut arr = vec![0; count];
    bytes.read_exact(&mut arr)?;
    Ok(arr)
}

pub fn read_rest(bytes: &mut Cursor<&[u8]>) -> Vec<u8> {
    let start = bytes.position() as usize;
    let rest = bytes.get_ref()[start.min(bytes.get_ref().len())..].to_vec();
    bytes.set_position(bytes.get_ref().len() as u64);
    rest
}

pub fn read_hw_addr(bytes: &mut Cursor<&[u8]>) -> Result<[u8; 6], OfpSerializationError> {
    ensure_remaining(bytes, 6)?;
    let mut arr = [0u8; 6];
    bytes.read_exact(&mut arr)?;
    Ok(arr)
}

/// Reads a NUL padded string occupying exactly `max_capacity` bytes.
pub fn read_fixed_size_string(
    bytes: &mut Cursor<&[u8]>,
    max_capacity: usize,
) -> Result<String, OfpSerializationError> {
    let raw = read_bytes(bytes, max_capacity)?;
    let end = raw.iter().position(|c| *c == 0).unwrap_or(raw.len());
    Ok(String::from_utf8_lossy(&raw[..end]).into_owned())
}

/// Writes `s` into a field of exactly `capacity` bytes, truncating and always NUL terminating.
pub fn write_fixed_size_string<B: BufMut>(bytes: &mut B, s: &str, capacity: usize) {
    let raw = s.as_bytes();
    let len = raw.len().min(capacity - 1);
    bytes.put_slice(&raw[..len]);
    write_padding_bytes(bytes, capacity - len);
}

/// 1.0 port numbers are 16 bits; the reserved range `0xff00..` maps onto `0xffffff00..`.
pub fn port_from_0x01(p: u16) -> u32 {
    if p >= 0xff00 {
        0xffff_0000 | p as u32
    } else {
        p as u32
    }
}

pub fn port_to_0x01(p: u32) -> Result<u16, OfpSerializationError> {
    if p >= 0xffff_ff00 {
        Ok((p & 0xffff) as u16)
    } else if p < 0xff00 {
        Ok(p as u16)
    } else {
        Err(OfpSerializationError::unexpected(
            format!("0x{:x}", p),
            "port number",
            "1.0 port",
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fixed_size_string() {
        let mut buf = Vec::new();
        write_fixed_size_string(&mut buf, "switch-1", 16);
        assert_eq!(buf.len(), 16);

        let mut cursor = Cursor::new(&buf[..]);
        assert_eq!(read_fixed_size_string(&mut cursor, 16).unwrap(), "switch-1");
        assert_eq!(remaining(&cursor), 0);
    }

    #[test]
    fn test_fixed_size_string_truncates() {
        let mut buf = Vec::new();
        write_fixed_size_string(&mut buf, "0123456789", 4);
        assert_eq!(buf, b"012\0".to_vec());
    }

    #[test]
    fn test_read_past_end() {
        let data = [1u8, 2, 3];
        let mut cursor = Cursor::new(&data[..]);
        assert!(read_bytes(&mut cursor, 4).is_err());
        assert!(skip(&mut cursor, 3).is_ok());
        assert!(read_rest(&mut cursor).is_empty());
    }

    #[test]
    fn test_port_conversion() {
        assert_eq!(port_from_0x01(3), 3);
        assert_eq!(port_from_0x01(0xfffd), 0xffff_fffd);
        assert_eq!(port_to_0x01(0xffff_ffff).unwrap(), 0xffff);
        assert_eq!(port_to_0x01(12).unwrap(), 12);
        assert!(port_to_0x01(0x1_0000).is_err());
    }

    #[test]
    fn test_pad_to_8() {
        let mut v = vec![1, 2, 3];
        pad_to_8(&mut v);
        assert_eq!(v.len(), 8);
        pad_to_8(&mut v);
        assert_eq!(v.len(), 8);
    }
}
