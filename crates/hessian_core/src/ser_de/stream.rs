//! Buffered byte access used by the readers and writers.

use std::io::{self, Read, Write};

use super::err::{Error, SerDeResult};
use super::text;

/// Read buffer size
const INPUT_SIZE: usize = 1024;
/// Write buffer size
const OUTPUT_SIZE: usize = 8 * 1024;

/// Bytes kept on each side of the cursor in error context dumps.
const CONTEXT_WINDOW: usize = 24;

/// Buffered view over a byte source.
///
/// The last consumed byte stays in the buffer until the next refill, which is
/// what lets a reader step back over a tag for diagnostics.
pub(crate) struct ByteViewer<R> {
    source: R,
    buffer: Box<[u8; INPUT_SIZE]>,
    offset: usize,
    length: usize,
}

impl<R: Read> ByteViewer<R> {
    pub fn new(source: R) -> Self {
        Self {
            source,
            buffer: Box::new([0; INPUT_SIZE]),
            offset: 0,
            length: 0,
        }
    }

    /// Refill the buffer. Returns false at end of stream.
    fn fill(&mut self) -> SerDeResult<bool> {
        loop {
            match self.source.read(&mut self.buffer[..]) {
                Ok(n) => {
                    self.offset = 0;
                    self.length = n;
                    return Ok(n > 0);
                }
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => return Err(e.into()),
            }
        }
    }

    /// Look at the next byte without consuming it.
    pub fn peek(&mut self) -> SerDeResult<Option<u8>> {
        if self.offset >= self.length && !self.fill()? {
            return Ok(None);
        }
        Ok(Some(self.buffer[self.offset]))
    }

    /// Next byte, or `None` at end of stream.
    pub fn read_byte(&mut self) -> SerDeResult<Option<u8>> {
        let next = self.peek()?;
        if next.is_some() {
            self.offset += 1;
        }
        Ok(next)
    }

    pub fn next_byte(&mut self) -> SerDeResult<u8> {
        self.read_byte()?.ok_or_else(Error::unexpected_eof)
    }

    pub fn next_bytes_fixed<const N: usize>(&mut self) -> SerDeResult<[u8; N]> {
        let mut out = [0; N];
        self.read_into(&mut out)?;
        Ok(out)
    }

    /// Fill `out` completely.
    pub fn read_into(&mut self, out: &mut [u8]) -> SerDeResult<()> {
        let mut written = 0;
        while written < out.len() {
            if self.offset >= self.length && !self.fill()? {
                return Err(Error::unexpected_eof());
            }
            let n = (self.length - self.offset).min(out.len() - written);
            out[written..written + n].copy_from_slice(&self.buffer[self.offset..self.offset + n]);
            self.offset += n;
            written += n;
        }
        Ok(())
    }

    pub fn next_u16(&mut self) -> SerDeResult<usize> {
        Ok(u16::from_be_bytes(self.next_bytes_fixed()?) as usize)
    }

    /// Step back over the byte just consumed, if it is still buffered.
    pub fn unread(&mut self, expected: u8) -> bool {
        match self.offset.checked_sub(1) {
            Some(prev) if self.buffer[prev] == expected => {
                self.offset = prev;
                true
            }
            _ => false,
        }
    }

    /// Dump of the buffered bytes around the last consumed byte, `[before] X [after]`.
    pub fn context(&self) -> String {
        if self.offset == 0 {
            let end = self.length.min(CONTEXT_WINDOW);
            return format!("[] [{}]", text::escape_bytes(&self.buffer[..end]));
        }
        let current = self.offset - 1;
        let start = current.saturating_sub(CONTEXT_WINDOW);
        let end = self.length.min(self.offset + CONTEXT_WINDOW);
        format!(
            "[{}] {} [{}]",
            text::escape_bytes(&self.buffer[start..current]),
            text::escape_bytes(&self.buffer[current..self.offset]),
            text::escape_bytes(&self.buffer[self.offset..end]),
        )
    }
}

/// Fixed-size output buffer flushed into a sink when full.
pub(crate) struct ByteSink<W> {
    sink: W,
    buffer: Vec<u8>,
}

impl<W: Write> ByteSink<W> {
    pub fn new(sink: W) -> Self {
        Self {
            sink,
            buffer: Vec::with_capacity(OUTPUT_SIZE),
        }
    }

    /// Make room for `headroom` bytes so a multi-byte tag is never split by a flush.
    pub fn reserve(&mut self, headroom: usize) -> SerDeResult<()> {
        if self.buffer.len() + headroom > OUTPUT_SIZE {
            self.flush_buffer()?;
        }
        Ok(())
    }

    /// Direct access for tag bytes; call [ByteSink::reserve] first.
    pub fn buffer(&mut self) -> &mut Vec<u8> {
        &mut self.buffer
    }

    pub fn push(&mut self, byte: u8) {
        self.buffer.push(byte);
    }

    pub fn extend(&mut self, bytes: &[u8]) {
        self.buffer.extend_from_slice(bytes);
    }

    /// Copy payload bytes, flushing as often as needed.
    pub fn write_raw(&mut self, mut bytes: &[u8]) -> SerDeResult<()> {
        while !bytes.is_empty() {
            let space = OUTPUT_SIZE.saturating_sub(self.buffer.len());
            if space == 0 {
                self.flush_buffer()?;
                continue;
            }
            let n = space.min(bytes.len());
            self.buffer.extend_from_slice(&bytes[..n]);
            bytes = &bytes[n..];
        }
        Ok(())
    }

    pub fn flush_buffer(&mut self) -> SerDeResult<()> {
        if !self.buffer.is_empty() {
            self.sink.write_all(&self.buffer)?;
            self.buffer.clear();
        }
        Ok(())
    }

    pub fn flush(&mut self) -> SerDeResult<()> {
        self.flush_buffer()?;
        self.sink.flush()?;
        Ok(())
    }

    pub fn into_inner(mut self) -> SerDeResult<W> {
        self.flush()?;
        Ok(self.sink)
    }
}
