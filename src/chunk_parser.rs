use bytes::{Buf, BytesMut};

/// Origin stream of a log line.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum LogStream {
    Stdout,
    Stderr,
    Tty,
}

impl LogStream {
    pub const fn as_str(self) -> &'static str {
        match self {
            LogStream::Stdout => "stdout",
            LogStream::Stderr => "stderr",
            LogStream::Tty => "tty",
        }
    }
}

const FRAME_HEADER_LEN: usize = 8;

/// Header of the frame currently being consumed: origin stream and payload
/// bytes still owed.
#[derive(Debug)]
struct Frame {
    stream: LogStream,
    remaining: usize,
}

/// Decodes the engine's log transport into `(line, stream)` pairs.
///
/// A TTY container's endpoint returns a raw byte stream; everything else is
/// framed with an 8-byte header (`stream_type u8`, three reserved bytes,
/// payload length `u32` big-endian). Frames of one stream may end mid-line,
/// so partial lines are carried per stream and completed by the next frame
/// of the same stream. Input arrives in chunks of arbitrary size; a header,
/// payload, or line split across chunk boundaries must reassemble exactly.
///
/// The parser is synchronous and single-owner; it holds no more buffered
/// data than one pending header plus the unterminated tail of each stream.
#[derive(Debug)]
pub struct ChunkParser {
    tty: bool,
    buffer: BytesMut,
    frame: Option<Frame>,
    partial: [BytesMut; 2],
}

impl ChunkParser {
    pub fn new(tty: bool) -> Self {
        ChunkParser {
            tty,
            buffer: BytesMut::new(),
            frame: None,
            partial: [BytesMut::new(), BytesMut::new()],
        }
    }

    /// Consumes one chunk, invoking `emit` once per completed line with the
    /// trailing newline stripped.
    pub fn feed(&mut self, chunk: &[u8], mut emit: impl FnMut(String, LogStream)) {
        if self.tty {
            self.split_lines(LogStream::Tty, chunk, &mut emit);
            return;
        }

        self.buffer.extend_from_slice(chunk);
        loop {
            let frame = match self.frame.take() {
                Some(frame) => frame,
                None => {
                    if self.buffer.len() < FRAME_HEADER_LEN {
                        return;
                    }
                    let stream = match self.buffer[0] {
                        2 => LogStream::Stderr,
                        // 0 is stdin, which the logs endpoint should never
                        // produce; fold it into stdout rather than dropping
                        // the payload.
                        _ => LogStream::Stdout,
                    };
                    let length = u32::from_be_bytes([
                        self.buffer[4],
                        self.buffer[5],
                        self.buffer[6],
                        self.buffer[7],
                    ]) as usize;
                    self.buffer.advance(FRAME_HEADER_LEN);
                    Frame {
                        stream,
                        remaining: length,
                    }
                }
            };

            let take = frame.remaining.min(self.buffer.len());
            let payload = self.buffer.split_to(take);
            self.split_lines(frame.stream, &payload, &mut emit);

            let remaining = frame.remaining - take;
            if remaining > 0 {
                self.frame = Some(Frame {
                    stream: frame.stream,
                    remaining,
                });
                return;
            }
            if self.buffer.is_empty() {
                return;
            }
        }
    }

    fn split_lines(
        &mut self,
        stream: LogStream,
        mut payload: &[u8],
        emit: &mut impl FnMut(String, LogStream),
    ) {
        let partial = match stream {
            LogStream::Stderr => &mut self.partial[1],
            _ => &mut self.partial[0],
        };

        while let Some(newline) = payload.iter().position(|&byte| byte == b'\n') {
            partial.extend_from_slice(&payload[..newline]);
            let line = String::from_utf8_lossy(partial).into_owned();
            partial.clear();
            emit(line, stream);
            payload = &payload[newline + 1..];
        }
        partial.extend_from_slice(payload);
    }
}
