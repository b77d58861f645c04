use std::fmt::Display;
use std::str::FromStr;

use thiserror::Error;

pub const FIELD_DELIMITER: char = '|';
pub const LINE_TERMINATOR: u8 = b'\n';
pub const READ_CHUNK_SIZE: usize = 1024;
pub const MAX_PENDING_FRAGMENT: usize = 64 * 1024;
pub const DEFAULT_PORT: u16 = 65433;

pub const HEARTBEAT: &str = "HEARTBEAT";
pub const MAP_EXIT: &str = "MAP_EXIT";
pub const REPUTATION: &str = "REP";
pub const POSITION: &str = "POS";
pub const SPECTATE: &str = "SPECTATE";

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ProtocolError {
    #[error("{keyword}: missing argument {index}")]
    MissingArgument { keyword: String, index: usize },

    #[error("{keyword}: argument {index} ({value:?}) is not a valid {expected}")]
    InvalidArgument {
        keyword: String,
        index: usize,
        value: String,
        expected: &'static str,
    },
}

/// Replaces every character outside printable ASCII (32..=126) with `?`.
pub fn sanitize(field: &str) -> String {
    field
        .chars()
        .map(|c| if (' '..='~').contains(&c) { c } else { '?' })
        .collect()
}

/// Encodes a command line as `field|field|...|\n`.
///
/// Every field, including the last, is followed by the delimiter. The
/// delimiter itself is not escaped inside argument values.
pub fn encode<S: AsRef<str>>(command: &str, args: &[S]) -> Vec<u8> {
    let mut line = String::with_capacity(command.len() + 1 + args.len() * 8);
    line.push_str(&sanitize(command));
    line.push(FIELD_DELIMITER);
    for arg in args {
        line.push_str(&sanitize(arg.as_ref()));
        line.push(FIELD_DELIMITER);
    }
    line.push(LINE_TERMINATOR as char);
    line.into_bytes()
}

/// A client to server command: keyword plus stringified scalar arguments.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutboundCommand {
    pub keyword: String,
    pub args: Vec<String>,
}

impl OutboundCommand {
    pub fn new(keyword: impl Into<String>) -> Self {
        Self {
            keyword: keyword.into(),
            args: Vec::new(),
        }
    }

    pub fn arg(mut self, value: impl Display) -> Self {
        self.args.push(value.to_string());
        self
    }

    pub fn encode(&self) -> Vec<u8> {
        encode(&self.keyword, &self.args)
    }
}

/// One decoded line from the server.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct InboundMessage {
    fields: Vec<String>,
}

impl InboundMessage {
    /// Splits a line (without terminator) on `|`. A single trailing empty
    /// field left by a trailing delimiter is dropped.
    pub fn parse(line: &str) -> Self {
        if line.is_empty() {
            return Self::default();
        }

        let mut fields: Vec<String> = line.split(FIELD_DELIMITER).map(str::to_owned).collect();
        if fields.len() > 1 && fields.last().is_some_and(|f| f.is_empty()) {
            fields.pop();
        }
        Self { fields }
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    pub fn keyword(&self) -> &str {
        self.fields.first().map(String::as_str).unwrap_or("")
    }

    pub fn args(&self) -> &[String] {
        self.fields.get(1..).unwrap_or(&[])
    }

    pub fn fields(&self) -> &[String] {
        &self.fields
    }

    /// Positional argument `index` (0 is the first field after the keyword).
    pub fn arg(&self, index: usize) -> Result<&str, ProtocolError> {
        self.args()
            .get(index)
            .map(String::as_str)
            .ok_or_else(|| ProtocolError::MissingArgument {
                keyword: self.keyword().to_owned(),
                index,
            })
    }

    pub fn optional_arg(&self, index: usize) -> Option<&str> {
        self.args().get(index).map(String::as_str)
    }

    pub fn parse_arg<T: FromStr>(&self, index: usize) -> Result<T, ProtocolError> {
        let raw = self.arg(index)?;
        raw.trim()
            .parse()
            .map_err(|_| ProtocolError::InvalidArgument {
                keyword: self.keyword().to_owned(),
                index,
                value: raw.to_owned(),
                expected: std::any::type_name::<T>(),
            })
    }
}

/// Turns a byte stream into lines, carrying an unterminated tail across reads.
#[derive(Debug, Default)]
pub struct Framer {
    pending: Vec<u8>,
    discarded: usize,
}

impl Framer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feeds one chunk and returns every message completed by it.
    pub fn feed(&mut self, chunk: &[u8]) -> Vec<InboundMessage> {
        let mut messages = Vec::new();
        let mut rest = chunk;

        while let Some(pos) = rest.iter().position(|&b| b == LINE_TERMINATOR) {
            let (head, tail) = rest.split_at(pos);
            rest = &tail[1..];

            if self.discarded > 0 {
                // Tail end of an oversized line; drop it with the rest.
                self.discarded = 0;
                self.pending.clear();
                continue;
            }

            self.pending.extend_from_slice(head);
            let mut line = String::from_utf8_lossy(&self.pending).into_owned();
            if line.ends_with('\r') {
                line.pop();
            }
            self.pending.clear();
            messages.push(InboundMessage::parse(&line));
        }

        if self.discarded > 0 {
            self.discarded += rest.len();
        } else {
            self.pending.extend_from_slice(rest);
            if self.pending.len() > MAX_PENDING_FRAGMENT {
                self.discarded = self.pending.len();
                self.pending.clear();
            }
        }

        messages
    }

    /// Bytes of an unterminated line currently held back.
    pub fn pending_len(&self) -> usize {
        self.pending.len()
    }

    /// True while the framer is skipping an oversized line.
    pub fn is_discarding(&self) -> bool {
        self.discarded > 0
    }

    pub fn reset(&mut self) {
        self.pending.clear();
        self.discarded = 0;
    }
}
