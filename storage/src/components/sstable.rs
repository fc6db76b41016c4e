use bytes::{Buf, BufMut, Bytes, BytesMut};
use cirruskv_common::coding::TableFormat;
use uuid::Uuid;

use super::KeyValue;
use crate::iterator::{Iterator, Seek};
use crate::{Error, Result};

/// Random 16-byte id assigned when a table is built.
pub type SsTableId = Uuid;

const DEFAULT_BUFFER_CAPACITY: usize = 256 * 1024; // 256 KiB
const DEFAULT_ENTRIES_CAPACITY: usize = 1024;

/// Immutable sorted string table.
///
/// # Format (V1)
///
/// ```plain
/// | format (1B) | prefix len (2B) | prefix | data len (4B) | data | N (4B) | offsets (4B * N) |
/// ```
///
/// `data` holds entries back to back, each as
/// `| suffix len (4B) | key suffix | value len (4B) | value |` with the
/// common key prefix stripped; `offsets` index into `data`.
pub struct SsTable {
    format: TableFormat,
    common_prefix: Bytes,
    data_start: usize,
    offsets: Vec<usize>,
    buf: Bytes,
}

impl SsTable {
    pub fn decode(buf: Bytes) -> Result<Self> {
        let mut c = &buf[..];
        let format = TableFormat::decode(&mut take(&mut c, 1)?).map_err(Error::decode_error)?;
        let prefix_len = take(&mut c, 2)?.get_u16() as usize;
        let common_prefix = Bytes::copy_from_slice(take(&mut c, prefix_len)?);
        let data_len = take(&mut c, 4)?.get_u32() as usize;
        let data_start = buf.len() - c.len();
        take(&mut c, data_len)?;
        let count = take(&mut c, 4)?.get_u32() as usize;
        let mut offsets = Vec::with_capacity(count);
        for _ in 0..count {
            let offset = take(&mut c, 4)?.get_u32() as usize;
            if offset >= data_len && !(offset == 0 && data_len == 0) {
                return Err(Error::DecodeError("entry offset out of bounds".to_string()));
            }
            offsets.push(offset);
        }
        if !c.is_empty() {
            return Err(Error::DecodeError("trailing bytes after offsets".to_string()));
        }
        Ok(Self {
            format,
            common_prefix,
            data_start,
            offsets,
            buf,
        })
    }

    /// The serialized form uploaded to the object store.
    pub fn serialize(&self) -> Bytes {
        self.buf.clone()
    }

    pub fn format(&self) -> TableFormat {
        self.format
    }

    pub fn size_bytes(&self) -> usize {
        self.buf.len()
    }

    pub fn num_entries(&self) -> usize {
        self.offsets.len()
    }

    pub fn common_prefix(&self) -> &Bytes {
        &self.common_prefix
    }

    /// Decode the entry at `idx`. The key is reassembled from the common
    /// prefix and the stored suffix; the value aliases the table buffer.
    ///
    /// # Panics
    ///
    /// Panics if `idx` is out of bounds.
    pub fn entry(&self, idx: usize) -> KeyValue {
        let mut pos = self.data_start + self.offsets[idx];
        let mut c = &self.buf[pos..];
        let suffix_len = c.get_u32() as usize;
        pos += 4;
        let mut key = BytesMut::with_capacity(self.common_prefix.len() + suffix_len);
        key.put_slice(&self.common_prefix);
        key.put_slice(&self.buf[pos..pos + suffix_len]);
        pos += suffix_len;
        let mut c = &self.buf[pos..];
        let value_len = c.get_u32() as usize;
        pos += 4;
        KeyValue {
            key: key.freeze(),
            value: self.buf.slice(pos..pos + value_len),
        }
    }

    pub fn key_at(&self, idx: usize) -> Bytes {
        self.entry(idx).key
    }

    /// Index of the first entry with key `>= key`, or `num_entries()` if all
    /// keys are smaller.
    pub fn lower_bound(&self, key: &[u8]) -> usize {
        let mut left = 0;
        let mut right = self.num_entries();
        while left < right {
            let mid = left + (right - left) / 2;
            if self.key_at(mid).as_ref() < key {
                left = mid + 1;
            } else {
                right = mid;
            }
        }
        left
    }

    pub fn smallest_key(&self) -> Option<Bytes> {
        if self.offsets.is_empty() {
            None
        } else {
            Some(self.key_at(0))
        }
    }

    pub fn largest_key(&self) -> Option<Bytes> {
        if self.offsets.is_empty() {
            None
        } else {
            Some(self.key_at(self.num_entries() - 1))
        }
    }
}

fn take<'a>(c: &mut &'a [u8], n: usize) -> Result<&'a [u8]> {
    if c.len() < n {
        return Err(Error::DecodeError("unexpected end of table".to_string()));
    }
    let (head, tail) = c.split_at(n);
    *c = tail;
    Ok(head)
}

/// Streaming builder over strictly-ascending entries sharing `common_prefix`.
pub struct SsTableBuilder {
    format: TableFormat,
    common_prefix: Bytes,
    data: BytesMut,
    offsets: Vec<usize>,
    smallest_key: Option<Bytes>,
    largest_key: Option<Bytes>,
}

impl SsTableBuilder {
    /// `size_hint` and `entries_hint` pre-size the build buffers; they are
    /// estimates and do not bound the table.
    pub fn new(
        format: TableFormat,
        size_hint: usize,
        entries_hint: usize,
        common_prefix: Bytes,
    ) -> Self {
        Self {
            format,
            common_prefix,
            data: BytesMut::with_capacity(size_hint.max(DEFAULT_BUFFER_CAPACITY)),
            offsets: Vec::with_capacity(entries_hint.max(DEFAULT_ENTRIES_CAPACITY)),
            smallest_key: None,
            largest_key: None,
        }
    }

    pub fn add(&mut self, key: &[u8], value: &[u8]) -> Result<()> {
        let suffix = key.strip_prefix(self.common_prefix.as_ref()).ok_or_else(|| {
            Error::EncodeError("key does not share the table common prefix".to_string())
        })?;
        if let Some(last) = &self.largest_key {
            if key <= last.as_ref() {
                return Err(Error::EncodeError(
                    "keys must be added in strictly ascending order".to_string(),
                ));
            }
        }
        self.offsets.push(self.data.len());
        self.data.put_u32(suffix.len() as u32);
        self.data.put_slice(suffix);
        self.data.put_u32(value.len() as u32);
        self.data.put_slice(value);
        let key = Bytes::copy_from_slice(key);
        if self.smallest_key.is_none() {
            self.smallest_key = Some(key.clone());
        }
        self.largest_key = Some(key);
        Ok(())
    }

    pub fn approximate_len(&self) -> usize {
        self.data.len() + self.offsets.len() * 4
    }

    pub fn num_entries(&self) -> usize {
        self.offsets.len()
    }

    /// Finish the table and return it together with its smallest and largest
    /// keys (both empty for an empty table).
    pub fn build(self) -> Result<(SsTable, Bytes, Bytes)> {
        if self.common_prefix.len() > u16::MAX as usize {
            return Err(Error::EncodeError("common prefix too long".to_string()));
        }
        let mut buf = BytesMut::with_capacity(
            1 + 2 + self.common_prefix.len() + 4 + self.data.len() + 4 + self.offsets.len() * 4,
        );
        self.format.encode(&mut buf);
        buf.put_u16(self.common_prefix.len() as u16);
        buf.put_slice(&self.common_prefix);
        buf.put_u32(self.data.len() as u32);
        let data_start = buf.len();
        buf.put_slice(&self.data);
        buf.put_u32(self.offsets.len() as u32);
        for offset in &self.offsets {
            buf.put_u32(*offset as u32);
        }
        let table = SsTable {
            format: self.format,
            common_prefix: self.common_prefix,
            data_start,
            offsets: self.offsets,
            buf: buf.freeze(),
        };
        let smallest_key = self.smallest_key.unwrap_or_default();
        let largest_key = self.largest_key.unwrap_or_default();
        Ok((table, smallest_key, largest_key))
    }
}

/// Serialize everything `iter` yields into one table.
pub async fn build_sstable(
    format: TableFormat,
    size_hint: usize,
    entries_hint: usize,
    common_prefix: Bytes,
    iter: &mut dyn Iterator,
) -> Result<(SsTable, Bytes, Bytes)> {
    let mut builder = SsTableBuilder::new(format, size_hint, entries_hint, common_prefix);
    iter.seek(Seek::First).await?;
    while iter.is_valid() {
        builder.add(iter.key(), iter.value())?;
        iter.next().await?;
    }
    builder.build()
}

#[cfg(test)]
mod tests {
    use test_log::test;

    use super::*;

    fn build_table_for_test(kvs: &[(&str, &str)], prefix: &str) -> (SsTable, Bytes, Bytes) {
        let mut builder =
            SsTableBuilder::new(TableFormat::V1, 0, 0, Bytes::copy_from_slice(prefix.as_bytes()));
        for (key, value) in kvs {
            builder.add(key.as_bytes(), value.as_bytes()).unwrap();
        }
        builder.build().unwrap()
    }

    #[test]
    fn test_build_and_decode() {
        let (table, smallest, largest) =
            build_table_for_test(&[("k01", "v01"), ("k02", "v02"), ("k05", "v05")], "k0");
        assert_eq!(smallest, Bytes::from("k01"));
        assert_eq!(largest, Bytes::from("k05"));
        assert_eq!(table.num_entries(), 3);

        let decoded = SsTable::decode(table.serialize()).unwrap();
        assert_eq!(decoded.common_prefix(), &Bytes::from("k0"));
        assert_eq!(decoded.entry(0).key, Bytes::from("k01"));
        assert_eq!(decoded.entry(2).value, Bytes::from("v05"));
    }

    #[test]
    fn test_lower_bound() {
        let (table, _, _) = build_table_for_test(&[("k01", "a"), ("k03", "b"), ("k05", "c")], "k0");
        assert_eq!(table.lower_bound(b"k00"), 0);
        assert_eq!(table.lower_bound(b"k01"), 0);
        assert_eq!(table.lower_bound(b"k02"), 1);
        assert_eq!(table.lower_bound(b"k05"), 2);
        assert_eq!(table.lower_bound(b"k06"), 3);
    }

    #[test]
    fn test_empty_table() {
        let (table, smallest, largest) = build_table_for_test(&[], "");
        assert_eq!(table.num_entries(), 0);
        assert!(smallest.is_empty());
        assert!(largest.is_empty());
        let decoded = SsTable::decode(table.serialize()).unwrap();
        assert_eq!(decoded.num_entries(), 0);
    }

    #[test]
    fn test_rejects_unordered_and_foreign_keys() {
        let mut builder = SsTableBuilder::new(TableFormat::V1, 0, 0, Bytes::from("k"));
        builder.add(b"k2", b"v").unwrap();
        assert!(builder.add(b"k1", b"v").is_err());
        assert!(builder.add(b"x9", b"v").is_err());
    }

    #[test]
    fn test_decode_rejects_garbage() {
        assert!(SsTable::decode(Bytes::from_static(b"")).is_err());
        assert!(SsTable::decode(Bytes::from_static(b"\xffgarbage")).is_err());
        let (table, _, _) = build_table_for_test(&[("k1", "v1")], "");
        let buf = table.serialize();
        assert!(SsTable::decode(buf.slice(..buf.len() - 1)).is_err());
    }
}
