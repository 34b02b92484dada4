use std::fmt;
use std::io::{self, Cursor, Read, Write};

/// Payloads at or under this size (plus recipient overhead) are
/// transformed in memory.
pub const DEFAULT_BUFFER_LIMIT: u64 = 1024 * 1024;

/// Approximate header bytes each recipient adds to the ciphertext.
pub const RECIPIENT_OVERHEAD: u64 = 256;

/// First plaintext byte of every message: no signature follows.
pub const FRAME_PLAIN: u8 = 0x00;
/// First plaintext byte of a signed message: a 64-byte Ed25519 signature
/// follows, then the message.
pub const FRAME_SIGNED: u8 = 0x01;
pub const SIGNATURE_LEN: usize = 64;

/// Whether a payload is transformed whole in memory or incrementally.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransformMode {
    Buffered,
    Streaming,
}

impl TransformMode {
    /// Buffered only when the size is known and the payload plus the
    /// per-recipient header fits under `buffer_limit`.
    pub fn select(size_hint: Option<u64>, recipients: usize, buffer_limit: u64) -> Self {
        match size_hint {
            Some(size) => {
                let overhead = RECIPIENT_OVERHEAD.saturating_mul(recipients as u64);
                if size.saturating_add(overhead) <= buffer_limit {
                    Self::Buffered
                } else {
                    Self::Streaming
                }
            }
            None => Self::Streaming,
        }
    }
}

impl fmt::Display for TransformMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Buffered => write!(f, "buffered"),
            Self::Streaming => write!(f, "streaming"),
        }
    }
}

/// Input to an encrypt or decrypt operation.
pub struct Payload<'a> {
    pub reader: Box<dyn Read + 'a>,
    /// Total size in bytes, when known up front.
    pub size_hint: Option<u64>,
}

impl<'a> Payload<'a> {
    pub fn from_reader(reader: impl Read + 'a, size_hint: Option<u64>) -> Self {
        Self {
            reader: Box::new(reader),
            size_hint,
        }
    }

    pub fn from_bytes(bytes: Vec<u8>) -> Payload<'static> {
        let size = bytes.len() as u64;
        Payload {
            reader: Box::new(Cursor::new(bytes)),
            size_hint: Some(size),
        }
    }

    pub fn read_all(&mut self) -> io::Result<Vec<u8>> {
        let mut buf = Vec::with_capacity(self.size_hint.unwrap_or(0).min(DEFAULT_BUFFER_LIMIT) as usize);
        self.reader.read_to_end(&mut buf)?;
        Ok(buf)
    }
}

/// What an encrypt or decrypt call did.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransformReport {
    pub mode: TransformMode,
    pub bytes_written: u64,
    pub recipients: usize,
    /// Sender whose signature was checked, for decrypt-then-verify.
    pub verified_sender: Option<String>,
}

/// A decrypted plaintext with its frame tag removed.
#[derive(Debug, PartialEq, Eq)]
pub enum Frame<'a> {
    Plain(&'a [u8]),
    Signed {
        signature: &'a [u8],
        message: &'a [u8],
    },
}

impl<'a> Frame<'a> {
    pub fn message(&self) -> &'a [u8] {
        match self {
            Self::Plain(message) => message,
            Self::Signed { message, .. } => message,
        }
    }
}

pub fn seal_plain(plaintext: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(1 + plaintext.len());
    out.push(FRAME_PLAIN);
    out.extend_from_slice(plaintext);
    out
}

pub fn seal_signed(signature: &[u8; SIGNATURE_LEN], plaintext: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(1 + SIGNATURE_LEN + plaintext.len());
    out.push(FRAME_SIGNED);
    out.extend_from_slice(signature);
    out.extend_from_slice(plaintext);
    out
}

/// Parse a framed plaintext. `None` for an unknown tag or a truncated frame.
pub fn open_frame(data: &[u8]) -> Option<Frame<'_>> {
    let (&tag, rest) = data.split_first()?;
    match tag {
        FRAME_PLAIN => Some(Frame::Plain(rest)),
        FRAME_SIGNED if rest.len() >= SIGNATURE_LEN => {
            let (signature, message) = rest.split_at(SIGNATURE_LEN);
            Some(Frame::Signed { signature, message })
        }
        _ => None,
    }
}

/// Prepend the plain frame tag to a streamed plaintext.
pub fn framed_plain<R: Read>(reader: R) -> io::Chain<&'static [u8], R> {
    (&[FRAME_PLAIN][..]).chain(reader)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum FrameState {
    Tag,
    Signature(usize),
    Message,
}

/// Writer that removes the frame from a streamed plaintext, passing only
/// the message through. Used on the streaming decrypt path.
pub struct FrameStrippingWriter<W: Write> {
    inner: W,
    state: FrameState,
    signed: bool,
    written: u64,
}

impl<W: Write> FrameStrippingWriter<W> {
    pub fn new(inner: W) -> Self {
        Self {
            inner,
            state: FrameState::Tag,
            signed: false,
            written: 0,
        }
    }

    /// Whether the whole frame header has been seen.
    pub fn is_complete(&self) -> bool {
        self.state == FrameState::Message
    }

    pub fn is_signed(&self) -> bool {
        self.signed
    }

    /// Flush and return the number of message bytes written to `inner`.
    pub fn finish(mut self) -> io::Result<u64> {
        self.inner.flush()?;
        Ok(self.written)
    }
}

impl<W: Write> Write for FrameStrippingWriter<W> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let mut rest = buf;
        while !rest.is_empty() {
            match self.state {
                FrameState::Tag => {
                    self.state = match rest[0] {
                        FRAME_PLAIN => FrameState::Message,
                        FRAME_SIGNED => {
                            self.signed = true;
                            FrameState::Signature(SIGNATURE_LEN)
                        }
                        tag => {
                            return Err(io::Error::new(
                                io::ErrorKind::InvalidData,
                                format!("unknown message frame tag {tag:#04x}"),
                            ));
                        }
                    };
                    rest = &rest[1..];
                }
                FrameState::Signature(remaining) => {
                    let skipped = remaining.min(rest.len());
                    rest = &rest[skipped..];
                    self.state = match remaining - skipped {
                        0 => FrameState::Message,
                        left => FrameState::Signature(left),
                    };
                }
                FrameState::Message => {
                    self.inner.write_all(rest)?;
                    self.written += rest.len() as u64;
                    rest = &[];
                }
            }
        }
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        self.inner.flush()
    }
}
