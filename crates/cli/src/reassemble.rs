// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Incremental line reassembly for multiplexed stdout/stderr streams.
//!
//! Each selector owns a carry buffer holding the not-yet-terminated tail
//! of its stream. A multi-byte UTF-8 sequence cut by a chunk boundary is
//! held back as raw bytes and decoded together with the next chunk, so the
//! emitted lines do not depend on where the transport split the payload.

use crate::event::Selector;

#[derive(Debug, Default)]
struct Carry {
    text: String,
    /// Incomplete trailing UTF-8 sequence from the previous chunk.
    pending: Vec<u8>,
}

impl Carry {
    /// Decode `bytes` (prefixed by any pending partial sequence) and return
    /// the text that is complete enough to use now.
    fn decode(&mut self, bytes: &[u8]) -> String {
        let mut data = std::mem::take(&mut self.pending);
        data.extend_from_slice(bytes);
        let cut = complete_prefix_len(&data);
        self.pending = data.split_off(cut);
        String::from_utf8_lossy(&data).into_owned()
    }

    fn drain_pending(&mut self) -> String {
        let pending = std::mem::take(&mut self.pending);
        String::from_utf8_lossy(&pending).into_owned()
    }
}

/// Per-session line reassembler with one carry buffer per selector.
#[derive(Debug, Default)]
pub struct LineReassembler {
    carries: [Carry; 3],
}

impl LineReassembler {
    pub fn new() -> Self {
        Self::default()
    }

    fn slot(&mut self, selector: Selector) -> &mut Carry {
        match selector {
            Selector::Stdout => &mut self.carries[0],
            Selector::Stderr => &mut self.carries[1],
            Selector::Merged => &mut self.carries[2],
        }
    }

    /// Append a chunk to `selector`'s carry buffer and return every line it
    /// completes, in order. Empty lines between two `\n` are returned as `""`.
    pub fn feed(&mut self, selector: Selector, bytes: &[u8]) -> Vec<String> {
        let carry = self.slot(selector);
        let decoded = carry.decode(bytes);
        carry.text.push_str(&decoded);

        let buf = std::mem::take(&mut carry.text);
        match buf.rsplit_once('\n') {
            Some((complete, tail)) => {
                carry.text = tail.to_owned();
                complete.split('\n').map(|line| strip_cr(line).to_owned()).collect()
            }
            None => {
                carry.text = buf;
                Vec::new()
            }
        }
    }

    /// Decode a TTY chunk without line splitting.
    ///
    /// Returns `None` when the chunk held nothing but the start of a
    /// multi-byte character.
    pub fn forward_raw(&mut self, bytes: &[u8]) -> Option<String> {
        Some(self.slot(Selector::Merged).decode(bytes)).filter(|text| !text.is_empty())
    }

    /// Emit the remaining carry content of `selector` as a final line.
    pub fn flush(&mut self, selector: Selector) -> Option<String> {
        let carry = self.slot(selector);
        let tail = carry.drain_pending();
        let mut text = std::mem::take(&mut carry.text);
        text.push_str(&tail);
        Some(strip_cr(&text).to_owned()).filter(|line| !line.is_empty())
    }

    /// Flush every selector (stdout, stderr, merged) at session end.
    pub fn flush_all(&mut self) -> Vec<(Selector, String)> {
        [Selector::Stdout, Selector::Stderr, Selector::Merged]
            .into_iter()
            .filter_map(|selector| self.flush(selector).map(|line| (selector, line)))
            .collect()
    }
}

fn strip_cr(line: &str) -> &str {
    line.strip_suffix('\r').unwrap_or(line)
}

/// Length of the prefix of `data` that does not end inside a multi-byte
/// UTF-8 sequence.
fn complete_prefix_len(data: &[u8]) -> usize {
    let len = data.len();
    for i in (len.saturating_sub(3)..len).rev() {
        let byte = data[i];
        if byte & 0xC0 == 0x80 {
            continue;
        }
        let width = match byte {
            0xC2..=0xDF => 2,
            0xE0..=0xEF => 3,
            0xF0..=0xF4 => 4,
            _ => 1,
        };
        return if len - i < width { i } else { len };
    }
    len
}

#[cfg(test)]
#[path = "reassemble_tests.rs"]
mod tests;
