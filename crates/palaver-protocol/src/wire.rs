use bytes::{Buf, BufMut};
use crc::{Crc, CRC_32_ISO_HDLC};

use crate::error::ProtocolError;

/// Significant length of a fixed string field. On the wire a string field is
/// one length byte followed by 29 data bytes, of which the first `len` are
/// meaningful.
pub const STRING_FIELD: usize = 29;

/// Byte offset of the CRC-32 word inside every packet.
pub const CRC_FIELD_OFFSET: usize = 20;

const CRC32: Crc<u32> = Crc::<u32>::new(&CRC_32_ISO_HDLC);

/// CRC-32 over the whole packet with the 4-byte CRC field treated as zero.
pub fn compute_crc(packet: &[u8]) -> u32 {
    debug_assert!(packet.len() >= CRC_FIELD_OFFSET + 4);
    let mut digest = CRC32.digest();
    digest.update(&packet[..CRC_FIELD_OFFSET]);
    digest.update(&[0u8; 4]);
    digest.update(&packet[CRC_FIELD_OFFSET + 4..]);
    digest.finalize()
}

/// Compute the CRC and write it into the CRC field.
pub fn splice_crc(packet: &mut [u8]) {
    let crc = compute_crc(packet);
    packet[CRC_FIELD_OFFSET..CRC_FIELD_OFFSET + 4].copy_from_slice(&crc.to_le_bytes());
}

/// Check the carried CRC against a fresh computation.
pub fn verify_crc(packet: &[u8]) -> Result<(), ProtocolError> {
    let carried = u32::from_le_bytes(
        packet[CRC_FIELD_OFFSET..CRC_FIELD_OFFSET + 4]
            .try_into()
            .expect("4-byte slice"),
    );
    let computed = compute_crc(packet);
    if carried != computed {
        return Err(ProtocolError::CrcMismatch { carried, computed });
    }
    Ok(())
}

/// Little-endian cursor over a received payload.
pub struct Reader<'a> {
    buf: &'a [u8],
}

impl<'a> Reader<'a> {
    pub fn new(buf: &'a [u8]) -> Self {
        Self { buf }
    }

    pub fn remaining(&self) -> usize {
        self.buf.len()
    }

    fn need(&self, n: usize) -> Result<(), ProtocolError> {
        if self.buf.len() < n {
            return Err(ProtocolError::Truncated { expected: n, got: self.buf.len() });
        }
        Ok(())
    }

    pub fn u8(&mut self) -> Result<u8, ProtocolError> {
        self.need(1)?;
        Ok(self.buf.get_u8())
    }

    pub fn u16(&mut self) -> Result<u16, ProtocolError> {
        self.need(2)?;
        Ok(self.buf.get_u16_le())
    }

    pub fn u32(&mut self) -> Result<u32, ProtocolError> {
        self.need(4)?;
        Ok(self.buf.get_u32_le())
    }

    /// Fixed 30-byte string field: length byte + 29 data bytes.
    pub fn string29(&mut self) -> Result<String, ProtocolError> {
        self.need(1 + STRING_FIELD)?;
        let len = self.buf.get_u8() as usize;
        if len > STRING_FIELD {
            return Err(ProtocolError::StringTooLong(len));
        }
        let s = std::str::from_utf8(&self.buf[..len])
            .map_err(|_| ProtocolError::InvalidUtf8)?
            .to_owned();
        self.buf.advance(STRING_FIELD);
        Ok(s)
    }

    /// The rest of the payload as UTF-8 text.
    pub fn text(&mut self) -> Result<String, ProtocolError> {
        let s = std::str::from_utf8(self.buf)
            .map_err(|_| ProtocolError::InvalidUtf8)?
            .to_owned();
        self.buf.advance(self.buf.len());
        Ok(s)
    }
}

/// Little-endian packet builder.
pub struct Writer {
    buf: Vec<u8>,
}

impl Writer {
    pub fn new() -> Self {
        Self { buf: Vec::new() }
    }

    pub fn with_capacity(cap: usize) -> Self {
        Self { buf: Vec::with_capacity(cap) }
    }

    pub fn u8(&mut self, v: u8) {
        self.buf.put_u8(v);
    }

    pub fn u16(&mut self, v: u16) {
        self.buf.put_u16_le(v);
    }

    pub fn u32(&mut self, v: u32) {
        self.buf.put_u32_le(v);
    }

    pub fn zeroes(&mut self, n: usize) {
        self.buf.put_bytes(0, n);
    }

    /// Fixed 30-byte string field. Longer input is truncated to the last
    /// char boundary within 29 bytes, matching the original's strncpy
    /// behaviour.
    pub fn string29(&mut self, s: &str) {
        let mut len = s.len().min(STRING_FIELD);
        while !s.is_char_boundary(len) {
            len -= 1;
        }
        self.buf.put_u8(len as u8);
        self.buf.put_slice(&s.as_bytes()[..len]);
        self.buf.put_bytes(0, STRING_FIELD - len);
    }

    /// Free-form text, written to the end of the packet.
    pub fn text(&mut self, s: &str) {
        self.buf.put_slice(s.as_bytes());
    }

    pub fn len(&self) -> usize {
        self.buf.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buf.is_empty()
    }

    pub fn finish(self) -> Vec<u8> {
        self.buf
    }
}

impl Default for Writer {
    fn default() -> Self {
        Self::new()
    }
}
