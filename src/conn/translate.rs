//! Line-ending translation for typed input
//!
//! With translation on, the two-byte escape `\n` is first turned into a real
//! line feed, then every line feed not already preceded by a carriage return
//! goes out as CR LF. Typing `GET / HTTP/1.0\n` and pressing return therefore
//! sends a request line followed by an empty line.

use bytes::BufMut;

/// Stateful LF to CRLF translator; state carries across chunk boundaries
#[derive(Debug, Default)]
pub struct LineTranslator {
    pending_backslash: bool,
    last_was_cr: bool,
}

impl LineTranslator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Translate one chunk of input
    pub fn translate<B: BufMut>(&mut self, input: &[u8], out: &mut B) {
        for &byte in input {
            if self.pending_backslash {
                self.pending_backslash = false;
                if byte == b'n' {
                    self.push_line_feed(out);
                    continue;
                }
                self.push(b'\\', out);
            }

            match byte {
                b'\\' => self.pending_backslash = true,
                b'\n' => self.push_line_feed(out),
                _ => self.push(byte, out),
            }
        }
    }

    /// Flush a backslash held back at the end of the input
    pub fn finish<B: BufMut>(&mut self, out: &mut B) {
        if self.pending_backslash {
            self.pending_backslash = false;
            self.push(b'\\', out);
        }
    }

    fn push<B: BufMut>(&mut self, byte: u8, out: &mut B) {
        out.put_u8(byte);
        self.last_was_cr = byte == b'\r';
    }

    fn push_line_feed<B: BufMut>(&mut self, out: &mut B) {
        if !self.last_was_cr {
            out.put_u8(b'\r');
        }
        out.put_u8(b'\n');
        self.last_was_cr = false;
    }
}
