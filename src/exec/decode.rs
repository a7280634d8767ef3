//! Output decoding
//!
//! Applied the same way to buffered output and to streamed chunks.

/// Text encodings an output channel can be decoded with
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TextEncoding {
    Utf8,
    /// ISO-8859-1; every byte maps to one char
    Latin1,
    Ascii,
}

impl TextEncoding {
    pub fn from_label(label: &str) -> Option<Self> {
        match label.trim().to_lowercase().replace('_', "-").as_str() {
            "utf-8" | "utf8" => Some(Self::Utf8),
            "latin-1" | "latin1" | "iso-8859-1" | "iso8859-1" => Some(Self::Latin1),
            "ascii" | "us-ascii" => Some(Self::Ascii),
            _ => None,
        }
    }

    /// Decode, replacing anything not representable.
    pub fn decode(&self, bytes: &[u8]) -> String {
        match self {
            Self::Utf8 => String::from_utf8_lossy(bytes).into_owned(),
            Self::Latin1 => bytes.iter().map(|&b| b as char).collect(),
            Self::Ascii => bytes
                .iter()
                .map(|&b| if b.is_ascii() { b as char } else { char::REPLACEMENT_CHARACTER })
                .collect(),
        }
    }
}

/// How exec output is turned into values
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Decode {
    /// Keep raw bytes
    Raw,
    /// Use whatever the first frame of the channel declares, else UTF-8
    #[default]
    ServerDeclared,
    Encoding(TextEncoding),
}

/// Output of one channel, or one chunk of it
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ExecOutput {
    Text(String),
    Bytes(Vec<u8>),
}

impl ExecOutput {
    pub fn is_empty(&self) -> bool {
        match self {
            Self::Text(s) => s.is_empty(),
            Self::Bytes(b) => b.is_empty(),
        }
    }

    pub fn as_bytes(&self) -> &[u8] {
        match self {
            Self::Text(s) => s.as_bytes(),
            Self::Bytes(b) => b,
        }
    }

    /// Text view; raw bytes are decoded lossily as UTF-8.
    pub fn to_text(&self) -> String {
        match self {
            Self::Text(s) => s.clone(),
            Self::Bytes(b) => String::from_utf8_lossy(b).into_owned(),
        }
    }
}

impl Default for ExecOutput {
    fn default() -> Self {
        Self::Text(String::new())
    }
}

impl PartialEq<&str> for ExecOutput {
    fn eq(&self, other: &&str) -> bool {
        matches!(self, Self::Text(s) if s == other)
    }
}

/// Per-channel decoder. The declared encoding is fixed by the first frame.
#[derive(Debug, Clone)]
pub struct ChannelDecoder {
    policy: Decode,
    declared: Option<Option<TextEncoding>>,
    /// Start of a UTF-8 sequence cut off at the end of the last chunk
    pending: Vec<u8>,
}

impl ChannelDecoder {
    pub fn new(policy: Decode) -> Self {
        Self {
            policy,
            declared: None,
            pending: Vec::new(),
        }
    }

    /// Record a frame. Text frames declare UTF-8; binary frames declare nothing.
    pub fn observe(&mut self, text_frame: bool) {
        if self.declared.is_none() {
            self.declared = Some(text_frame.then_some(TextEncoding::Utf8));
        }
    }

    fn encoding(&self) -> Option<TextEncoding> {
        match self.policy {
            Decode::Raw => None,
            Decode::Encoding(encoding) => Some(encoding),
            Decode::ServerDeclared => Some(self.declared.flatten().unwrap_or(TextEncoding::Utf8)),
        }
    }

    pub fn decode(&self, bytes: Vec<u8>) -> ExecOutput {
        match self.encoding() {
            Some(encoding) => ExecOutput::Text(encoding.decode(&bytes)),
            None => ExecOutput::Bytes(bytes),
        }
    }

    /// Decode one streamed chunk.
    ///
    /// A multi-byte UTF-8 sequence split across frames is held back and
    /// completed by the next chunk, so the chunks concatenate to what
    /// [`ChannelDecoder::decode`] gives for the whole stream.
    pub fn decode_chunk(&mut self, bytes: Vec<u8>) -> ExecOutput {
        if self.encoding() != Some(TextEncoding::Utf8) {
            return self.decode(bytes);
        }
        let mut buf = std::mem::take(&mut self.pending);
        buf.extend_from_slice(&bytes);
        let keep = incomplete_utf8_tail(&buf);
        self.pending = buf.split_off(buf.len() - keep);
        self.decode(buf)
    }

    /// Whatever is still held back once the channel has ended.
    pub fn flush(&mut self) -> Option<ExecOutput> {
        if self.pending.is_empty() {
            return None;
        }
        let rest = std::mem::take(&mut self.pending);
        Some(self.decode(rest))
    }

    /// Empty value of the right shape, returned in streaming mode.
    pub fn empty(&self) -> ExecOutput {
        self.decode(Vec::new())
    }
}

/// Length of a truncated (not invalid) UTF-8 sequence at the end of `bytes`.
fn incomplete_utf8_tail(bytes: &[u8]) -> usize {
    let mut start = 0;
    loop {
        match std::str::from_utf8(&bytes[start..]) {
            Ok(_) => return 0,
            Err(e) => match e.error_len() {
                None => return bytes.len() - start - e.valid_up_to(),
                Some(invalid) => start += e.valid_up_to() + invalid,
            },
        }
    }
}
