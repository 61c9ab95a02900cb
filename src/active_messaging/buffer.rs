use crate::error::Result;

use serde::de::DeserializeOwned;
use serde::Serialize;

/// Growable message buffer with a read cursor.
///
/// Values are appended with [put][Buffer::put] and read back in the same order
/// with [get][Buffer::get], both in bincode encoding.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Buffer {
    data: Vec<u8>,
    pos: usize,
}

impl Buffer {
    pub fn new() -> Buffer {
        Default::default()
    }

    pub fn from_bytes(data: Vec<u8>) -> Buffer {
        Buffer { data, pos: 0 }
    }

    pub fn put<T: Serialize + ?Sized>(&mut self, value: &T) -> Result<()> {
        bincode::serialize_into(&mut self.data, value)?;
        Ok(())
    }

    pub fn get<T: DeserializeOwned>(&mut self) -> Result<T> {
        let mut rest = &self.data[self.pos..];
        let before = rest.len();
        let value = bincode::deserialize_from(&mut rest)?;
        self.pos += before - rest.len();
        Ok(value)
    }

    /// read cursor, in bytes from the start
    pub fn position(&self) -> usize {
        self.pos
    }

    pub fn size(&self) -> usize {
        self.data.len()
    }

    pub fn remaining(&self) -> usize {
        self.data.len() - self.pos
    }

    pub fn is_exhausted(&self) -> bool {
        self.pos >= self.data.len()
    }

    pub fn rewind(&mut self) {
        self.pos = 0;
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.data
    }

    pub fn into_bytes(self) -> Vec<u8> {
        self.data
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn values_come_back_in_order() {
        let mut buf = Buffer::new();
        buf.put(&7u32).unwrap();
        buf.put("trace").unwrap();
        buf.put(&vec![1.5f64, 2.5]).unwrap();
        assert_eq!(buf.position(), 0);

        assert_eq!(buf.get::<u32>().unwrap(), 7);
        assert_eq!(buf.position(), 4);
        assert_eq!(buf.get::<String>().unwrap(), "trace");
        assert_eq!(buf.get::<Vec<f64>>().unwrap(), vec![1.5, 2.5]);
        assert!(buf.is_exhausted());
        assert_eq!(buf.remaining(), 0);
    }

    #[test]
    fn reading_past_the_end_is_a_codec_error() {
        let mut buf = Buffer::from_bytes(vec![1, 0]);
        let err = buf.get::<u64>().unwrap_err();
        assert!(matches!(err, crate::Error::Codec(_)));
        assert!(!err.is_fatal());
    }
}
