/// Cumulative receive buffer owned by a decoder.
///
/// Bytes arrive in arbitrary chunks through [`ReadBuffer::extend`] and are released with
/// [`ReadBuffer::advance`] once a decode step commits to them.
#[derive(Debug, Default)]
pub struct ReadBuffer {
    data: Vec<u8>,
    pos: usize,
}

impl ReadBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append newly received bytes. Consumed bytes are compacted away first.
    pub fn extend(&mut self, bytes: &[u8]) {
        if self.pos > 0 && self.pos >= self.data.len() / 2 {
            self.data.drain(..self.pos);
            self.pos = 0;
        }
        self.data.extend_from_slice(bytes);
    }

    /// Unconsumed bytes
    #[inline]
    pub fn remaining(&self) -> &[u8] {
        &self.data[self.pos..]
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.data.len() - self.pos
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Mark `n` bytes as consumed.
    #[inline]
    pub fn advance(&mut self, n: usize) {
        debug_assert!(n <= self.len());
        self.pos = (self.pos + n).min(self.data.len());
        if self.pos == self.data.len() {
            self.data.clear();
            self.pos = 0;
        }
    }

    pub fn clear(&mut self) {
        self.data.clear();
        self.pos = 0;
    }

    pub fn cursor(&self) -> Cursor<'_> {
        Cursor::new(self.remaining())
    }
}

/// Saved cursor position for [`Cursor::rewind`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Mark(usize);

/// A read position over a borrowed byte slice.
///
/// Readers that may have to give up halfway (not enough bytes yet) take a [`Mark`] first and
/// rewind to it, so nothing is consumed unless the whole read commits.
#[derive(Debug, Clone)]
pub struct Cursor<'a> {
    data: &'a [u8],
    pos: usize,
}

impl<'a> Cursor<'a> {
    pub fn new(data: &'a [u8]) -> Self {
        Self { data, pos: 0 }
    }

    #[inline]
    pub fn mark(&self) -> Mark {
        Mark(self.pos)
    }

    #[inline]
    pub fn rewind(&mut self, mark: Mark) {
        self.pos = mark.0;
    }

    /// Bytes consumed since the cursor was created
    #[inline]
    pub fn position(&self) -> usize {
        self.pos
    }

    #[inline]
    pub fn remaining(&self) -> &'a [u8] {
        &self.data[self.pos..]
    }

    #[inline]
    pub fn remaining_len(&self) -> usize {
        self.data.len() - self.pos
    }

    #[inline]
    pub fn peek_u8(&self) -> Option<u8> {
        self.data.get(self.pos).copied()
    }

    /// Consume exactly `n` bytes, or nothing when fewer are available.
    #[inline]
    pub fn take(&mut self, n: usize) -> Option<&'a [u8]> {
        if self.remaining_len() < n {
            return None;
        }
        let out = &self.data[self.pos..self.pos + n];
        self.pos += n;
        Some(out)
    }

    /// Consume up to `n` bytes.
    #[inline]
    pub fn take_up_to(&mut self, n: usize) -> &'a [u8] {
        let n = n.min(self.remaining_len());
        let out = &self.data[self.pos..self.pos + n];
        self.pos += n;
        out
    }
}
