//! Charset and line-break handling for whole-file text I/O.
//!
//! Backends move raw bytes; [`decode`] and [`encode`] turn them into editor
//! text and back according to [`FileParams`].

use encoding_rs::{Encoding, UTF_16BE, UTF_16LE};
use serde::{Deserialize, Serialize};

use crate::errors::FileError;

/// Line terminator written by `save_file`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LineBreak {
    Lf,
    CrLf,
    Cr,
}

impl LineBreak {
    pub fn as_str(&self) -> &'static str {
        match self {
            LineBreak::Lf => "\n",
            LineBreak::CrLf => "\r\n",
            LineBreak::Cr => "\r",
        }
    }

    /// The host platform's native terminator.
    pub fn platform() -> Self {
        if cfg!(windows) {
            LineBreak::CrLf
        } else {
            LineBreak::Lf
        }
    }

    /// Rewrite every `\r\n`, `\r` and `\n` in `text` to this terminator.
    pub fn normalize(&self, text: &str) -> String {
        let target = self.as_str();
        let mut out = String::with_capacity(text.len());
        let mut chars = text.chars().peekable();
        while let Some(c) = chars.next() {
            match c {
                '\r' => {
                    if chars.peek() == Some(&'\n') {
                        chars.next();
                    }
                    out.push_str(target);
                }
                '\n' => out.push_str(target),
                other => out.push(other),
            }
        }
        out
    }
}

impl Default for LineBreak {
    fn default() -> Self {
        Self::platform()
    }
}

/// Options for [`load_file`](super::Filesystem::load_file) and
/// [`save_file`](super::Filesystem::save_file).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FileParams {
    /// WHATWG encoding label, e.g. `"utf-8"`, `"windows-1251"`, `"utf-16le"`.
    pub charset: String,
    pub linebreak: LineBreak,
}

impl Default for FileParams {
    fn default() -> Self {
        Self {
            charset: "UTF-8".to_string(),
            linebreak: LineBreak::platform(),
        }
    }
}

impl FileParams {
    pub fn new(charset: &str, linebreak: LineBreak) -> Self {
        Self {
            charset: charset.to_string(),
            linebreak,
        }
    }

    fn encoding(&self) -> Result<&'static Encoding, FileError> {
        Encoding::for_label(self.charset.trim().as_bytes())
            .ok_or_else(|| FileError::Unsupported(format!("charset '{}'", self.charset)))
    }
}

/// Decode file bytes into text. A byte-order mark overrides the charset.
pub fn decode(bytes: &[u8], params: &FileParams) -> Result<String, FileError> {
    let encoding = params.encoding()?;
    let (text, _, had_errors) = encoding.decode(bytes);
    if had_errors {
        tracing::debug!(
            "Malformed {} sequences replaced while decoding",
            encoding.name()
        );
    }
    Ok(text.into_owned())
}

/// Normalize line breaks and encode text for writing.
pub fn encode(text: &str, params: &FileParams) -> Result<Vec<u8>, FileError> {
    let encoding = params.encoding()?;
    let text = params.linebreak.normalize(text);

    // encoding_rs has no UTF-16 encoder; its `encode` silently falls back
    // to UTF-8 for those.
    if encoding == UTF_16LE {
        return Ok(text.encode_utf16().flat_map(u16::to_le_bytes).collect());
    }
    if encoding == UTF_16BE {
        return Ok(text.encode_utf16().flat_map(u16::to_be_bytes).collect());
    }

    let (bytes, _, had_errors) = encoding.encode(&text);
    if had_errors {
        return Err(FileError::OperationFailed(format!(
            "text contains characters not representable in {}",
            encoding.name()
        )));
    }
    Ok(bytes.into_owned())
}
