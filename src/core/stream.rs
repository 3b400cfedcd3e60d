use super::error::{PDFError, PDFResult};
use std::rc::Rc;

/// The bytes backing a document.
///
/// Either an in-process copy owned by the document, or caller-lent memory
/// whose lifetime the caller guarantees to exceed the document's. The core
/// never mutates the window either way.
pub enum ByteSource {
    /// Owned in-process copy
    Owned(Vec<u8>),
    /// Caller-lent memory (C boundary); freed by the caller after close
    Borrowed { ptr: *const u8, len: usize },
}

impl ByteSource {
    /// Returns the full byte window.
    #[inline]
    pub fn as_slice(&self) -> &[u8] {
        match self {
            ByteSource::Owned(bytes) => bytes,
            // SAFETY: the caller of `PDFDocument::open_memory_unsafe` guarantees
            // the pointed-to memory stays valid and unmodified until close.
            ByteSource::Borrowed { ptr, len } => unsafe { std::slice::from_raw_parts(*ptr, *len) },
        }
    }

    #[inline]
    pub fn len(&self) -> usize {
        match self {
            ByteSource::Owned(bytes) => bytes.len(),
            ByteSource::Borrowed { len, .. } => *len,
        }
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// A read cursor over a shared byte window.
///
/// Sub-streams share the same window through the `Rc`, so slicing out an
/// object or a content stream never copies file bytes.
#[derive(Clone)]
pub struct Stream {
    bytes: Rc<ByteSource>,
    /// Current read position (absolute offset into the window)
    pos: usize,
    /// Starting offset of this view
    start: usize,
    /// Length of the view from `start`
    length: usize,
}

impl Stream {
    /// Creates a view of `length` bytes starting at `start`.
    pub fn new(bytes: Rc<ByteSource>, start: usize, length: usize) -> Self {
        Stream {
            bytes,
            pos: start,
            start,
            length,
        }
    }

    /// Creates a stream owning a fresh byte vector (tests, decoded payloads).
    pub fn from_bytes(bytes: Vec<u8>) -> Self {
        let length = bytes.len();
        Self::new(Rc::new(ByteSource::Owned(bytes)), 0, length)
    }

    #[inline]
    pub fn length(&self) -> usize {
        self.length
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.length == 0
    }

    /// Current absolute position in the window.
    #[inline]
    pub fn pos(&self) -> usize {
        self.pos
    }

    pub fn set_pos(&mut self, pos: usize) -> PDFResult<()> {
        if pos > self.start + self.length {
            return Err(PDFError::InvalidByteRange {
                begin: pos,
                end: self.start + self.length,
            });
        }
        self.pos = pos;
        Ok(())
    }

    /// Reads one byte, advancing the position.
    #[inline]
    pub fn get_byte(&mut self) -> PDFResult<u8> {
        if self.pos >= self.start + self.length {
            return Err(PDFError::UnexpectedEndOfStream);
        }
        let byte = self.bytes.as_slice()[self.pos];
        self.pos += 1;
        Ok(byte)
    }

    /// Reads one byte without advancing.
    #[inline]
    pub fn peek_byte(&self) -> PDFResult<u8> {
        if self.pos >= self.start + self.length {
            return Err(PDFError::UnexpectedEndOfStream);
        }
        Ok(self.bytes.as_slice()[self.pos])
    }

    /// Borrows `length` bytes at the current position, advancing past them.
    pub fn get_slice(&mut self, length: usize) -> PDFResult<&[u8]> {
        let end = self.pos + length;
        if end > self.start + self.length {
            return Err(PDFError::UnexpectedEndOfStream);
        }
        let slice = &self.bytes.as_slice()[self.pos..end];
        self.pos = end;
        Ok(slice)
    }

    /// Borrows an absolute byte range without moving the cursor.
    pub fn get_byte_range(&self, begin: usize, end: usize) -> PDFResult<&[u8]> {
        if begin > end || end > self.start + self.length {
            return Err(PDFError::InvalidByteRange { begin, end });
        }
        Ok(&self.bytes.as_slice()[begin..end])
    }

    pub fn reset(&mut self) {
        self.pos = self.start;
    }

    pub fn skip(&mut self, n: usize) -> PDFResult<()> {
        self.set_pos(self.pos + n)
    }

    /// Creates a sub-view sharing the same window.
    pub fn make_sub_stream(&self, start: usize, length: usize) -> PDFResult<Stream> {
        if start + length > self.bytes.len() {
            return Err(PDFError::InvalidByteRange {
                begin: start,
                end: start + length,
            });
        }
        Ok(Stream::new(Rc::clone(&self.bytes), start, length))
    }

    /// The whole backing window, independent of this view.
    #[inline]
    pub fn window(&self) -> &[u8] {
        self.bytes.as_slice()
    }

    /// Shared handle to the backing window.
    pub fn source(&self) -> Rc<ByteSource> {
        Rc::clone(&self.bytes)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_stream_creation() {
        let stream = Stream::from_bytes(vec![1, 2, 3, 4, 5]);
        assert_eq!(stream.length(), 5);
        assert_eq!(stream.pos(), 0);
        assert!(!stream.is_empty());
    }

    #[test]
    fn test_get_byte() {
        let mut stream = Stream::from_bytes(vec![10, 20, 30]);
        assert_eq!(stream.get_byte().unwrap(), 10);
        assert_eq!(stream.get_byte().unwrap(), 20);
        assert_eq!(stream.pos(), 2);
    }

    #[test]
    fn test_peek_does_not_advance() {
        let stream_data = vec![10, 20];
        let mut stream = Stream::from_bytes(stream_data);
        assert_eq!(stream.peek_byte().unwrap(), 10);
        assert_eq!(stream.pos(), 0);
        assert_eq!(stream.get_byte().unwrap(), 10);
    }

    #[test]
    fn test_get_slice() {
        let mut stream = Stream::from_bytes(vec![1, 2, 3, 4, 5]);
        assert_eq!(stream.get_slice(3).unwrap(), &[1, 2, 3]);
        assert_eq!(stream.pos(), 3);
        assert!(stream.get_slice(3).is_err());
    }

    #[test]
    fn test_end_of_stream() {
        let mut stream = Stream::from_bytes(vec![1]);
        stream.get_byte().unwrap();
        assert_eq!(stream.get_byte(), Err(PDFError::UnexpectedEndOfStream));
    }

    #[test]
    fn test_sub_stream_shares_window() {
        let stream = Stream::from_bytes((0u8..10).collect());
        let mut sub = stream.make_sub_stream(2, 4).unwrap();
        assert_eq!(sub.length(), 4);
        assert_eq!(sub.get_byte().unwrap(), 2);
        assert_eq!(sub.window().len(), 10);
    }

    #[test]
    fn test_borrowed_source() {
        let data = vec![7u8, 8, 9];
        let source = ByteSource::Borrowed {
            ptr: data.as_ptr(),
            len: data.len(),
        };
        assert_eq!(source.as_slice(), &[7, 8, 9]);
        drop(data);
    }
}
