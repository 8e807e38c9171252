/// Attempted to write past the end of the destination buffer
#[derive(Copy, Clone, Debug, PartialEq, Eq, thiserror::Error)]
#[error("attempted to write {0} bytes with {1} bytes remaining")]
pub(crate) struct InsufficientWriteSpace(pub(crate) usize, pub(crate) usize);

/// write cursor over a fixed-size frame buffer
pub(crate) struct WriteCursor<'a> {
    dest: &'a mut [u8],
    pos: usize,
}

impl<'a> WriteCursor<'a> {
    pub(crate) fn new(dest: &'a mut [u8]) -> WriteCursor<'a> {
        WriteCursor { dest, pos: 0 }
    }

    pub(crate) fn remaining(&self) -> usize {
        self.dest.len() - self.pos
    }

    pub(crate) fn written(&self) -> &[u8] {
        &self.dest[..self.pos]
    }

    pub(crate) fn write_u8(&mut self, value: u8) -> Result<(), InsufficientWriteSpace> {
        match self.dest.get_mut(self.pos) {
            Some(x) => {
                *x = value;
                self.pos += 1;
                Ok(())
            }
            None => Err(InsufficientWriteSpace(1, 0)),
        }
    }

    pub(crate) fn write_u16_be(&mut self, value: u16) -> Result<(), InsufficientWriteSpace> {
        if self.remaining() < 2 {
            // don't write any bytes if there's isn't space for the whole thing
            return Err(InsufficientWriteSpace(2, self.remaining()));
        }
        let upper = ((value & 0xFF00) >> 8) as u8;
        let lower = (value & 0x00FF) as u8;
        self.write_u8(upper)?;
        self.write_u8(lower)
    }

    pub(crate) fn write_bytes(&mut self, bytes: &[u8]) -> Result<(), InsufficientWriteSpace> {
        if self.remaining() < bytes.len() {
            return Err(InsufficientWriteSpace(bytes.len(), self.remaining()));
        }
        self.dest[self.pos..self.pos + bytes.len()].copy_from_slice(bytes);
        self.pos += bytes.len();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn u16_write_is_all_or_nothing() {
        let mut buffer = [0u8; 3];
        let mut cursor = WriteCursor::new(&mut buffer);
        cursor.write_u16_be(0x0102).unwrap();
        assert_eq!(cursor.write_u16_be(0x0304), Err(InsufficientWriteSpace(2, 1)));
        assert_eq!(cursor.written(), &[0x01, 0x02]);
    }

    #[test]
    fn byte_write_is_all_or_nothing() {
        let mut buffer = [0u8; 4];
        let mut cursor = WriteCursor::new(&mut buffer);
        cursor.write_u8(0xAA).unwrap();
        assert_eq!(
            cursor.write_bytes(&[1, 2, 3, 4]),
            Err(InsufficientWriteSpace(4, 3))
        );
        cursor.write_bytes(&[1, 2, 3]).unwrap();
        assert_eq!(cursor.remaining(), 0);
        assert_eq!(cursor.written(), &[0xAA, 1, 2, 3]);
    }
}
