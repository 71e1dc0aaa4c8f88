use crate::{Error, Result};
use std::io::{self, Write};

// https://github.com/bitcoin/bitcoin/blob/0903ce8dbc25d3823b03d52f6e6bff74d19e801e/src/serialize.h#L305
pub fn write_compact_size<W: Write>(writer: &mut W, size: u64) -> io::Result<()> {
    if size < 253 {
        writer.write_all(&[size as u8])?;
    } else if size <= 0xFFFF {
        writer.write_all(&[253])?;
        writer.write_all(&(size as u16).to_le_bytes())?;
    } else if size <= 0xFFFF_FFFF {
        writer.write_all(&[254])?;
        writer.write_all(&(size as u32).to_le_bytes())?;
    } else {
        writer.write_all(&[255])?;
        writer.write_all(&size.to_le_bytes())?;
    }
    Ok(())
}

/// Writes `bytes` prefixed by its CompactSize length.
pub fn write_var_bytes<W: Write>(writer: &mut W, bytes: &[u8]) -> io::Result<()> {
    write_compact_size(writer, bytes.len() as u64)?;
    writer.write_all(bytes)
}

/// Cursor over a byte slice that fails with [`Error::Decode`] instead of panicking.
pub struct Reader<'a> {
    data: &'a [u8],
}

impl<'a> Reader<'a> {
    pub fn new(data: &'a [u8]) -> Self {
        Self { data }
    }

    pub fn remaining(&self) -> usize {
        self.data.len()
    }

    pub fn take(&mut self, len: usize) -> Result<&'a [u8]> {
        if self.data.len() < len {
            return Err(Error::Decode(format!(
                "expected {len} more bytes, found {}",
                self.data.len()
            )));
        }
        let (head, tail) = self.data.split_at(len);
        self.data = tail;
        Ok(head)
    }

    pub fn take_array<const N: usize>(&mut self) -> Result<[u8; N]> {
        let mut out = [0u8; N];
        out.copy_from_slice(self.take(N)?);
        Ok(out)
    }

    pub fn read_u8(&mut self) -> Result<u8> {
        Ok(self.take_array::<1>()?[0])
    }

    pub fn read_u32_le(&mut self) -> Result<u32> {
        self.take_array().map(u32::from_le_bytes)
    }

    pub fn read_u32_be(&mut self) -> Result<u32> {
        self.take_array().map(u32::from_be_bytes)
    }

    pub fn read_i64_le(&mut self) -> Result<i64> {
        self.take_array().map(i64::from_le_bytes)
    }

    pub fn read_compact_size(&mut self) -> Result<u64> {
        match self.read_u8()? {
            253 => self.take_array().map(|b| u16::from_le_bytes(b) as u64),
            254 => self.take_array().map(|b| u32::from_le_bytes(b) as u64),
            255 => self.take_array().map(u64::from_le_bytes),
            n => Ok(n as u64),
        }
    }

    pub fn read_var_bytes(&mut self) -> Result<&'a [u8]> {
        let len = self.read_compact_size()?;
        let len = usize::try_from(len)
            .map_err(|_| Error::Decode(format!("length {len} overflows usize")))?;
        self.take(len)
    }

    /// Fails unless every byte has been consumed.
    pub fn finish(self) -> Result<()> {
        if self.data.is_empty() {
            Ok(())
        } else {
            Err(Error::Decode(format!("{} trailing bytes", self.data.len())))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn compact_size_boundaries() {
        for size in [0u64, 252, 253, 0xFFFF, 0x10000, 0xFFFF_FFFF, 0x1_0000_0000] {
            let mut buf = Vec::new();
            write_compact_size(&mut buf, size).unwrap();
            let expected_len = match size {
                0..=252 => 1,
                253..=0xFFFF => 3,
                0x10000..=0xFFFF_FFFF => 5,
                _ => 9,
            };
            assert_eq!(buf.len(), expected_len);
            let mut reader = Reader::new(&buf);
            assert_eq!(reader.read_compact_size().unwrap(), size);
            reader.finish().unwrap();
        }
    }

    #[test]
    fn short_input_is_an_error() {
        let mut reader = Reader::new(&[1, 2]);
        assert!(matches!(reader.read_u32_le(), Err(Error::Decode(_))));
    }
}
