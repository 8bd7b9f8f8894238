/// Bounds-checked reader over a block payload. Every accessor returns `None` instead of reading
/// past the end.
pub(crate) struct ByteCursor<'a> {
    data: &'a [u8],
    pos: usize,
}

impl<'a> ByteCursor<'a> {
    pub(crate) fn new(data: &'a [u8]) -> Self {
        Self { data, pos: 0 }
    }

    pub(crate) fn take(&mut self, len: usize) -> Option<&'a [u8]> {
        let end = self.pos.checked_add(len)?;
        let slice = self.data.get(self.pos..end)?;
        self.pos = end;
        Some(slice)
    }

    pub(crate) fn skip(&mut self, len: usize) -> Option<()> {
        self.take(len).map(|_| ())
    }

    pub(crate) fn u32_le(&mut self) -> Option<u32> {
        let raw = self.take(4)?;
        Some(u32::from_le_bytes([raw[0], raw[1], raw[2], raw[3]]))
    }

    pub(crate) fn u32_be(&mut self) -> Option<u32> {
        let raw = self.take(4)?;
        Some(u32::from_be_bytes([raw[0], raw[1], raw[2], raw[3]]))
    }

    /// Read a 32-bit length and then that many bytes.
    pub(crate) fn prefixed_le(&mut self) -> Option<&'a [u8]> {
        let len = self.u32_le()?;
        self.take(usize::try_from(len).ok()?)
    }

    pub(crate) fn prefixed_be(&mut self) -> Option<&'a [u8]> {
        let len = self.u32_be()?;
        self.take(usize::try_from(len).ok()?)
    }
}
