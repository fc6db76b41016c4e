use bytes::{Buf, BufMut};
use serde::Deserialize;

/// On-storage serialization format of an SSTable.
#[derive(Deserialize, Clone, Copy, PartialEq, Eq, Debug)]
pub enum TableFormat {
    V1,
}

impl TableFormat {
    pub fn encode(&self, buf: &mut impl BufMut) {
        let v = match self {
            Self::V1 => 1,
        };
        buf.put_u8(v);
    }

    pub fn decode(buf: &mut impl Buf) -> Result<Self, anyhow::Error> {
        match buf.get_u8() {
            1 => Ok(Self::V1),
            _ => Err(anyhow::anyhow!("not a valid table format")),
        }
    }
}

pub fn append_u64_le(buf: &mut Vec<u8>, v: u64) {
    buf.put_u64_le(v);
}

/// Read a little-endian u64 from the front of `buf`.
///
/// # Panics
///
/// Panics if `buf` holds fewer than 8 bytes.
pub fn read_u64_le(mut buf: &[u8]) -> u64 {
    buf.get_u64_le()
}

pub fn append_u64_be(buf: &mut Vec<u8>, v: u64) {
    buf.put_u64(v);
}

/// Read a big-endian u64 from the front of `buf`.
///
/// # Panics
///
/// Panics if `buf` holds fewer than 8 bytes.
pub fn read_u64_be(mut buf: &[u8]) -> u64 {
    buf.get_u64()
}

/// Encode the `(db, table, shard)` key-space prefix. All fields are
/// big-endian so encoded prefixes sort the same way the ids do.
pub fn encode_key_prefix(buf: &mut Vec<u8>, db_id: u64, table_id: u64, shard_id: u64) {
    buf.put_u64(db_id);
    buf.put_u64(table_id);
    buf.put_u64(shard_id);
}

/// Byte-wise big-endian increment with carry. Used to turn an inclusive
/// fixed-length key into the exclusive end of a half-open scan range.
///
/// # Panics
///
/// Panics if every byte is `0xff`.
pub fn increment_bytes_be(bytes: &[u8]) -> Vec<u8> {
    let mut buf = bytes.to_vec();
    for i in (0..buf.len()).rev() {
        if buf[i] != u8::MAX {
            buf[i] += 1;
            return buf;
        }
        buf[i] = 0;
    }
    panic!("cannot increment key of all 0xff bytes");
}

/// The immediate lexicographic successor of `bytes`: the smallest key
/// strictly greater than it. Unlike [`increment_bytes_be`] it never skips
/// keys, so it is the safe resume point for live iterators.
pub fn successor(bytes: &[u8]) -> Vec<u8> {
    let mut buf = Vec::with_capacity(bytes.len() + 1);
    buf.extend_from_slice(bytes);
    buf.push(0x00);
    buf
}

#[cfg(test)]
mod tests {
    use test_log::test;

    use super::*;

    #[test]
    fn test_u64_coding() {
        let mut buf = vec![];
        append_u64_le(&mut buf, 0xdead_beef_cafe_f00d);
        assert_eq!(read_u64_le(&buf), 0xdead_beef_cafe_f00d);

        let mut buf = vec![];
        append_u64_be(&mut buf, 42);
        assert_eq!(read_u64_be(&buf), 42);
        assert_eq!(&buf[..7], &[0u8; 7]);
    }

    #[test]
    fn test_key_prefix_ordering() {
        let mut p1 = vec![];
        encode_key_prefix(&mut p1, 1, 1, 0);
        let mut p2 = vec![];
        encode_key_prefix(&mut p2, 1, 2, 0);
        let mut p3 = vec![];
        encode_key_prefix(&mut p3, 2, 0, 0);
        assert!(p1 < p2);
        assert!(p2 < p3);
        assert_eq!(p1.len(), 24);
    }

    #[test]
    fn test_increment_bytes_be() {
        assert_eq!(increment_bytes_be(b"a"), b"b".to_vec());
        assert_eq!(increment_bytes_be(&[0x00, 0xff]), vec![0x01, 0x00]);
        assert_eq!(increment_bytes_be(&[0xfe, 0xff, 0xff]), vec![0xff, 0x00, 0x00]);
    }

    #[test]
    #[should_panic]
    fn test_increment_bytes_be_overflow() {
        increment_bytes_be(&[0xff, 0xff]);
    }

    #[test]
    fn test_successor_is_immediate() {
        let key = b"a".to_vec();
        let next = successor(&key);
        assert!(next > key);
        assert_eq!(next, b"a\x00".to_vec());
        assert!(successor(&[0xff]) > vec![0xff]);
    }

    #[test]
    fn test_table_format_codec() {
        let mut buf = vec![];
        TableFormat::V1.encode(&mut buf);
        assert_eq!(TableFormat::decode(&mut &buf[..]).unwrap(), TableFormat::V1);
        assert!(TableFormat::decode(&mut &[0u8][..]).is_err());
    }
}
