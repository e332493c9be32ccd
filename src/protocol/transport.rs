use std::io::{self, BufReader, BufWriter, Read, Write};

use bytes::{BufMut, BytesMut};
use thiserror::Error;

use crate::packstream::PackStreamError;

use super::handshake::HandshakeError;

/// Largest payload a single chunk can carry.
pub const MAX_CHUNK_SIZE: usize = u16::MAX as usize;

/// Default cap on a reassembled message.
pub const DEFAULT_MAX_MESSAGE_SIZE: usize = 16 * 1024 * 1024;

const INITIAL_MESSAGE_CAPACITY: usize = 4096;

#[derive(Debug, Error)]
pub enum TransportError {
    #[error("failed to decode message: {0}")]
    Decode(#[from] PackStreamError),
    #[error("message too short: {0} bytes")]
    MessageTooShort(usize),
    #[error("message exceeds {limit} bytes")]
    MessageTooLarge { limit: usize },
    #[error("message is not a structure (marker 0x{0:02X})")]
    NotAStructure(u8),
    #[error("handshake failed: {0}")]
    Handshake(#[from] HandshakeError),
    #[error("Transport IO Error: {0}")]
    Io(#[from] io::Error),
}

impl TransportError {
    /// True when the peer simply went away rather than misbehaving.
    pub fn is_disconnect(&self) -> bool {
        match self {
            TransportError::Io(e) | TransportError::Handshake(HandshakeError::Io(e)) => matches!(
                e.kind(),
                io::ErrorKind::UnexpectedEof
                    | io::ErrorKind::ConnectionReset
                    | io::ErrorKind::ConnectionAborted
                    | io::ErrorKind::BrokenPipe
            ),
            _ => false,
        }
    }
}

/// Buffered reader and writer for chunked Bolt frames.
///
/// The message buffer is reused across reads so a long-lived connection only
/// grows it to the size of the largest message it has seen.
pub struct ChunkedTransport<R: Read, W: Write> {
    reader: BufReader<R>,
    writer: BufWriter<W>,
    message: BytesMut,
    max_message_size: usize,
    header: [u8; 2],
}

impl<R: Read, W: Write> ChunkedTransport<R, W> {
    pub fn new(reader: R, writer: W) -> Self {
        Self::with_capacity(8192, 8192, reader, writer)
    }

    pub fn with_capacity(read_size: usize, write_size: usize, reader: R, writer: W) -> Self {
        Self {
            reader: BufReader::with_capacity(read_size, reader),
            writer: BufWriter::with_capacity(write_size, writer),
            message: BytesMut::with_capacity(INITIAL_MESSAGE_CAPACITY),
            max_message_size: DEFAULT_MAX_MESSAGE_SIZE,
            header: [0; 2],
        }
    }

    /// Caps the size of a reassembled message. A peer that goes past it is
    /// cut off before the excess chunk is buffered.
    pub fn with_max_message_size(mut self, limit: usize) -> Self {
        self.max_message_size = limit;
        self
    }

    /// Reads raw bytes outside of chunk framing; used by the handshake.
    pub fn read_exact(&mut self, buf: &mut [u8]) -> io::Result<()> {
        self.reader.read_exact(buf)
    }

    /// Writes raw bytes outside of chunk framing and flushes them.
    pub fn write_raw(&mut self, buf: &[u8]) -> io::Result<()> {
        self.writer.write_all(buf)?;
        self.writer.flush()
    }

    /// Blocks until every chunk of the next message, up to and including the
    /// zero length terminator, has arrived. An empty slice is a no-op message.
    pub fn read_message(&mut self) -> Result<&[u8], TransportError> {
        self.message.clear();

        loop {
            self.reader.read_exact(&mut self.header)?;
            let size = u16::from_be_bytes(self.header) as usize;
            if size == 0 {
                break;
            }

            let start = self.message.len();
            if start + size > self.max_message_size {
                return Err(TransportError::MessageTooLarge {
                    limit: self.max_message_size,
                });
            }
            self.message.resize(start + size, 0);
            self.reader.read_exact(&mut self.message[start..])?;
        }

        Ok(&self.message)
    }

    /// Writes one message and flushes it to the peer.
    pub fn write_chunk(&mut self, payload: &[u8]) -> Result<(), TransportError> {
        self.queue_chunk(payload)?;
        self.flush()
    }

    /// Writes one message into the output buffer without flushing, so a run
    /// of messages can leave in as few writes as possible.
    pub fn queue_chunk(&mut self, payload: &[u8]) -> Result<(), TransportError> {
        let mut framed = BytesMut::with_capacity(payload.len() + 4);
        frame(payload, &mut framed);
        self.writer.write_all(&framed)?;
        Ok(())
    }

    pub fn flush(&mut self) -> Result<(), TransportError> {
        self.writer.flush()?;
        Ok(())
    }

    /// The underlying writer. Anything still buffered has not reached it.
    #[cfg(test)]
    pub(crate) fn writer_mut(&mut self) -> &mut W {
        self.writer.get_mut()
    }

    pub fn into_parts(self) -> (R, W) {
        let reader = self.reader.into_inner();
        let writer = match self.writer.into_inner() {
            Ok(w) => w,
            Err(e) => e.into_inner().into_parts().0,
        };
        (reader, writer)
    }
}

/// Splits `payload` into chunks of at most [`MAX_CHUNK_SIZE`] bytes and ends
/// it with the zero length terminator.
pub(crate) fn frame(payload: &[u8], buf: &mut BytesMut) {
    for chunk in payload.chunks(MAX_CHUNK_SIZE) {
        buf.put_u16(chunk.len() as u16);
        buf.put_slice(chunk);
    }
    buf.put_u16(0);
}

#[cfg(test)]
mod tests {
    use std::io::Cursor;

    use super::*;

    fn transport(input: Vec<u8>) -> ChunkedTransport<Cursor<Vec<u8>>, Vec<u8>> {
        ChunkedTransport::new(Cursor::new(input), Vec::new())
    }

    fn written(t: ChunkedTransport<Cursor<Vec<u8>>, Vec<u8>>) -> Vec<u8> {
        t.into_parts().1
    }

    #[test]
    fn write_chunk_frames_payload() {
        let mut t = transport(vec![]);
        t.write_chunk(&[0xB0, 0x02]).unwrap();
        assert_eq!(written(t), vec![0x00, 0x02, 0xB0, 0x02, 0x00, 0x00]);
    }

    #[test]
    fn read_single_chunk_message() {
        let mut t = transport(vec![0x00, 0x02, 0xB0, 0x0F, 0x00, 0x00]);
        assert_eq!(t.read_message().unwrap(), &[0xB0, 0x0F]);
    }

    #[test]
    fn read_multi_chunk_message() {
        let mut t = transport(vec![
            0x00, 0x01, 0xB1, 0x00, 0x02, 0x10, 0x80, 0x00, 0x00, 0x00, 0x01, 0xC0, 0x00, 0x00,
        ]);
        assert_eq!(t.read_message().unwrap(), &[0xB1, 0x10, 0x80]);
        assert_eq!(t.read_message().unwrap(), &[0xC0]);
    }

    #[test]
    fn lone_terminator_is_empty_message() {
        let mut t = transport(vec![0x00, 0x00, 0x00, 0x01, 0x01, 0x00, 0x00]);
        assert!(t.read_message().unwrap().is_empty());
        assert_eq!(t.read_message().unwrap(), &[0x01]);
    }

    #[test]
    fn written_messages_read_back() {
        let small: Vec<u8> = (0..=255).collect();
        let large: Vec<u8> = (0..200_000u32).map(|i| (i % 251) as u8).collect();

        for payload in [small, large] {
            let mut w = transport(vec![]);
            w.write_chunk(&payload).unwrap();
            let mut r = transport(written(w));
            assert_eq!(r.read_message().unwrap(), payload.as_slice());
        }
    }

    #[test]
    fn large_payload_is_split_at_chunk_limit() {
        let payload = vec![7u8; MAX_CHUNK_SIZE + 10];
        let mut t = transport(vec![]);
        t.write_chunk(&payload).unwrap();
        let out = written(t);

        assert_eq!(&out[..2], &[0xFF, 0xFF]);
        let second = 2 + MAX_CHUNK_SIZE;
        assert_eq!(&out[second..second + 2], &[0x00, 0x0A]);
        assert_eq!(&out[out.len() - 2..], &[0x00, 0x00]);
        assert_eq!(out.len(), payload.len() + 6);
    }

    #[test]
    fn queued_chunks_wait_for_flush() {
        let mut t = transport(vec![]);
        t.queue_chunk(&[0x01]).unwrap();
        t.queue_chunk(&[0x02]).unwrap();
        assert!(t.writer.get_ref().is_empty());
        t.flush().unwrap();
        assert_eq!(
            t.writer.get_ref(),
            &vec![0x00, 0x01, 0x01, 0x00, 0x00, 0x00, 0x01, 0x02, 0x00, 0x00]
        );
    }

    #[test]
    fn truncated_chunk_is_io_error() {
        let mut t = transport(vec![0x00, 0x05, 0x01]);
        let err = t.read_message().unwrap_err();
        assert!(err.is_disconnect());
    }

    #[test]
    fn oversized_message_is_rejected() {
        let mut input = vec![0x00, 0x04, 1, 2, 3, 4];
        input.extend_from_slice(&[0x00, 0x04, 5, 6, 7, 8, 0x00, 0x00]);

        let mut t = transport(input.clone()).with_max_message_size(6);
        let err = t.read_message().unwrap_err();
        assert!(matches!(err, TransportError::MessageTooLarge { limit: 6 }));
        assert!(!err.is_disconnect());

        let mut t = transport(input).with_max_message_size(8);
        assert_eq!(t.read_message().unwrap(), &[1, 2, 3, 4, 5, 6, 7, 8]);
    }
}
