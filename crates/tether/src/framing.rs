use tracing::warn;

const DEFAULT_MAX_FRAME_BYTES: usize = 8 * 1024 * 1024;

/// Push-based newline framer for byte-oriented adapters.
///
/// An incoming chunk may contain zero, one, or many complete frames plus a
/// partial trailing frame; the partial is buffered across chunks. Frames are
/// bounded: once a frame exceeds the limit its bytes are discarded until the
/// terminating newline, and the frame is dropped with a warning. Blank
/// frames are skipped, trailing carriage returns stripped.
#[derive(Debug)]
pub struct FrameBuffer {
    max_frame_bytes: usize,
    current: Vec<u8>,
    observed_bytes: usize,
    discarding: bool,
}

impl Default for FrameBuffer {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_FRAME_BYTES)
    }
}

impl FrameBuffer {
    pub fn new(max_frame_bytes: usize) -> Self {
        Self {
            max_frame_bytes,
            current: Vec::new(),
            observed_bytes: 0,
            discarding: false,
        }
    }

    /// Feeds one chunk and returns every frame it completed.
    pub fn push(&mut self, chunk: &[u8]) -> Vec<String> {
        let mut frames = Vec::new();
        let mut rest = chunk;
        loop {
            match rest.iter().position(|b| *b == b'\n') {
                None => {
                    self.observe(rest);
                    return frames;
                }
                Some(newline_idx) => {
                    self.observe(&rest[..newline_idx]);
                    if let Some(frame) = self.finish_frame() {
                        frames.push(frame);
                    }
                    rest = &rest[newline_idx + 1..];
                }
            }
        }
    }

    /// Flushes a trailing unterminated frame at end-of-stream.
    pub fn finish(&mut self) -> Option<String> {
        if self.current.is_empty() && !self.discarding {
            return None;
        }
        self.finish_frame()
    }

    fn observe(&mut self, segment: &[u8]) {
        self.observed_bytes = self.observed_bytes.saturating_add(segment.len());
        if self.observed_bytes > self.max_frame_bytes && !self.discarding {
            self.discarding = true;
            self.current.clear();
        }
        if !self.discarding {
            self.current.extend_from_slice(segment);
        }
    }

    fn finish_frame(&mut self) -> Option<String> {
        let discarded = self.discarding;
        let observed_bytes = self.observed_bytes;
        let bytes = std::mem::take(&mut self.current);
        self.observed_bytes = 0;
        self.discarding = false;

        if discarded {
            warn!(
                observed_bytes,
                max_frame_bytes = self.max_frame_bytes,
                "dropping oversized frame"
            );
            return None;
        }

        let frame = match String::from_utf8(bytes) {
            Ok(frame) => frame,
            Err(_) => {
                warn!("dropping frame with invalid UTF-8");
                return None;
            }
        };
        let frame = frame.strip_suffix('\r').unwrap_or(&frame).to_string();
        if frame.trim().is_empty() {
            return None;
        }
        Some(frame)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn partial_frames_buffer_across_chunks() {
        let mut buffer = FrameBuffer::default();
        assert!(buffer.push(b"{\"a\":").is_empty());
        assert_eq!(buffer.push(b"1}\n{\"b\":2}\n"), vec!["{\"a\":1}", "{\"b\":2}"]);
    }

    #[test]
    fn blank_frames_are_skipped_and_cr_stripped() {
        let mut buffer = FrameBuffer::default();
        assert_eq!(buffer.push(b"\n  \nhello\r\n"), vec!["hello"]);
    }

    #[test]
    fn oversized_frame_is_discarded_and_parsing_continues() {
        let mut buffer = FrameBuffer::new(8);
        let mut input = Vec::new();
        input.extend_from_slice(b"ok\n");
        input.extend_from_slice(&vec![b'x'; 64]);
        input.extend_from_slice(b"\nnext\n");
        assert_eq!(buffer.push(&input), vec!["ok", "next"]);
    }

    #[test]
    fn finish_flushes_a_trailing_frame() {
        let mut buffer = FrameBuffer::default();
        assert!(buffer.push(b"tail").is_empty());
        assert_eq!(buffer.finish().as_deref(), Some("tail"));
        assert!(buffer.finish().is_none());
    }
}
