//! Small incremental line-buffering helper shared by every adapter.
//!
//! `reqwest`'s `bytes_stream()` hands back arbitrarily-sized chunks of the
//! response body, which may split an SSE line across two `Bytes` values.
//! This buffers incomplete trailing data between reads so each adapter sees
//! whole lines, the way `httpx.Response.aiter_lines()` does in the Python
//! original.

pub struct LineBuffer {
    buf: String,
}

impl LineBuffer {
    pub fn new() -> Self {
        LineBuffer { buf: String::new() }
    }

    /// Feed in a chunk of bytes, returning any complete (newline-terminated)
    /// lines it completed. Incomplete trailing data is retained for the
    /// next call.
    pub fn feed(&mut self, bytes: &[u8]) -> Vec<String> {
        self.buf.push_str(&String::from_utf8_lossy(bytes));
        let mut lines = Vec::new();
        while let Some(idx) = self.buf.find('\n') {
            let line: String = self.buf.drain(..=idx).collect();
            let line = line.trim_end_matches(['\r', '\n']);
            lines.push(line.to_string());
        }
        lines
    }
}

impl Default for LineBuffer {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn feed_splits_complete_lines_and_buffers_remainder() {
        let mut buf = LineBuffer::new();
        let lines = buf.feed(b"data: hello\ndata: wor");
        assert_eq!(lines, vec!["data: hello".to_string()]);
        let lines = buf.feed(b"ld\n");
        assert_eq!(lines, vec!["data: world".to_string()]);
    }

    #[test]
    fn feed_handles_crlf() {
        let mut buf = LineBuffer::new();
        let lines = buf.feed(b"data: hi\r\n");
        assert_eq!(lines, vec!["data: hi".to_string()]);
    }
}
