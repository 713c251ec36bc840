// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Newline framing for the probe protocol.
//!
//! Unlike `tokio_util::codec::LinesCodec`, decoding never fails on content: invalid
//! UTF-8 is replaced, and an over-long line is reported as [`Line::Oversized`] and then
//! skipped up to the next newline, so one bad line cannot end the stream. The limit
//! applies to the line text, so a CRLF terminator does not count against it.

use std::{cmp, io};

use bytes::{Buf, BytesMut};
use tokio_util::codec::Decoder;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Line {
    /// A complete line without its terminator.
    Text(String),
    /// A line longer than the configured maximum; its bytes are discarded.
    Oversized,
}

#[derive(Debug, Clone)]
pub struct LineCodec {
    max_length: usize,
    // Bytes already searched for a newline.
    next_index: usize,
    is_discarding: bool,
}

impl LineCodec {
    #[must_use]
    pub fn new(max_length: usize) -> Self {
        Self {
            max_length,
            next_index: 0,
            is_discarding: false,
        }
    }

    fn to_line(&self, bytes: &[u8]) -> Line {
        let text = bytes.strip_suffix(b"\r").unwrap_or(bytes);
        if text.len() > self.max_length {
            return Line::Oversized;
        }
        Line::Text(String::from_utf8_lossy(text).into_owned())
    }
}

impl Decoder for LineCodec {
    type Item = Line;
    type Error = io::Error;

    fn decode(&mut self, buf: &mut BytesMut) -> Result<Option<Line>, io::Error> {
        loop {
            // Text, an optional '\r' and the '\n'.
            let read_to = cmp::min(self.max_length.saturating_add(2), buf.len());
            let newline = buf[self.next_index..read_to]
                .iter()
                .position(|b| *b == b'\n');

            match (self.is_discarding, newline) {
                (true, Some(offset)) => {
                    buf.advance(self.next_index + offset + 1);
                    self.is_discarding = false;
                    self.next_index = 0;
                }
                (true, None) => {
                    buf.advance(read_to);
                    self.next_index = 0;
                    if buf.is_empty() {
                        return Ok(None);
                    }
                }
                (false, Some(offset)) => {
                    let end = self.next_index + offset;
                    self.next_index = 0;
                    let line = buf.split_to(end + 1);
                    return Ok(Some(self.to_line(&line[..end])));
                }
                (false, None) if buf.len() > self.max_length.saturating_add(1) => {
                    self.is_discarding = true;
                    self.next_index = 0;
                    return Ok(Some(Line::Oversized));
                }
                (false, None) => {
                    self.next_index = read_to;
                    return Ok(None);
                }
            }
        }
    }

    fn decode_eof(&mut self, buf: &mut BytesMut) -> Result<Option<Line>, io::Error> {
        if let Some(line) = self.decode(buf)? {
            return Ok(Some(line));
        }
        self.next_index = 0;
        if buf.is_empty() || self.is_discarding {
            buf.clear();
            return Ok(None);
        }
        let line = buf.split_to(buf.len());
        Ok(Some(self.to_line(&line)))
    }
}
