//! Log record format for the file backend
//!
//! Binary format: [op(u8)] [key_len(u32)] [key_bytes] [value_len(u32)] [value_bytes] [checksum(u64)]
//! Integers are little endian; the checksum is xxhash64 of everything before it.

use bytes::Bytes;

/// Record operation type
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum RecordOp {
    /// Key set to value
    Set = 1,
    /// Key removed
    Remove = 2,
}

impl RecordOp {
    /// Convert from u8
    pub fn from_u8(value: u8) -> Option<Self> {
        match value {
            1 => Some(RecordOp::Set),
            2 => Some(RecordOp::Remove),
            _ => None,
        }
    }
}

/// One entry of the append-only log
#[derive(Debug, Clone, PartialEq)]
pub struct Record {
    pub op: RecordOp,
    pub key: String,
    /// Empty for removals
    pub value: Bytes,
}

/// Smallest possible record: op + key_len + value_len + checksum
const MIN_RECORD_LEN: usize = 1 + 4 + 4 + 8;

impl Record {
    /// A set record
    pub fn set(key: impl Into<String>, value: Bytes) -> Self {
        Record {
            op: RecordOp::Set,
            key: key.into(),
            value,
        }
    }

    /// A removal record
    pub fn remove(key: impl Into<String>) -> Self {
        Record {
            op: RecordOp::Remove,
            key: key.into(),
            value: Bytes::new(),
        }
    }

    /// Serialize to bytes with checksum
    ///
    /// Fails if the key or value is longer than a u32 length prefix can describe.
    pub fn to_bytes(&self) -> Result<Vec<u8>, String> {
        let key_len = field_len("key", self.key.len())?;
        let value_len = field_len("value", self.value.len())?;

        let mut buf = Vec::with_capacity(MIN_RECORD_LEN + self.key.len() + self.value.len());

        buf.push(self.op as u8);

        buf.extend_from_slice(&key_len.to_le_bytes());
        buf.extend_from_slice(self.key.as_bytes());

        buf.extend_from_slice(&value_len.to_le_bytes());
        buf.extend_from_slice(&self.value);

        let checksum = xxhash_rust::xxh64::xxh64(&buf, 0);
        buf.extend_from_slice(&checksum.to_le_bytes());

        Ok(buf)
    }

    /// Deserialize from bytes with checksum verification
    ///
    /// Returns the record and the number of bytes it occupied.
    pub fn from_bytes(data: &[u8]) -> Result<(Self, usize), String> {
        if data.len() < MIN_RECORD_LEN {
            return Err("Insufficient data".to_string());
        }

        let mut pos = 0;

        let op = RecordOp::from_u8(data[pos]).ok_or("Invalid operation type")?;
        pos += 1;

        let key_len = read_u32(data, pos).ok_or("Missing key length")? as usize;
        pos += 4;
        if pos + key_len > data.len() {
            return Err("Invalid key length".to_string());
        }
        let key = std::str::from_utf8(&data[pos..pos + key_len])
            .map_err(|_| "Key is not valid UTF-8")?
            .to_string();
        pos += key_len;

        let value_len = read_u32(data, pos).ok_or("Missing value length")? as usize;
        pos += 4;
        if pos + value_len > data.len() {
            return Err("Invalid value length".to_string());
        }
        let value = Bytes::copy_from_slice(&data[pos..pos + value_len]);
        pos += value_len;

        if pos + 8 > data.len() {
            return Err("Missing checksum".to_string());
        }
        let stored_checksum = u64::from_le_bytes(
            data[pos..pos + 8].try_into().map_err(|_| "Invalid checksum")?,
        );
        let calculated_checksum = xxhash_rust::xxh64::xxh64(&data[..pos], 0);
        if stored_checksum != calculated_checksum {
            return Err(format!(
                "Checksum mismatch: expected {}, got {}",
                stored_checksum, calculated_checksum
            ));
        }
        pos += 8;

        Ok((Record { op, key, value }, pos))
    }
}

/// Length prefix of one field
fn field_len(field: &str, len: usize) -> Result<u32, String> {
    u32::try_from(len).map_err(|_| format!("{} of {} bytes exceeds the record limit", field, len))
}

fn read_u32(data: &[u8], pos: usize) -> Option<u32> {
    let bytes = data.get(pos..pos + 4)?;
    Some(u32::from_le_bytes(bytes.try_into().ok()?))
}
