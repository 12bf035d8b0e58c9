use crate::error::DecodeError;
use crate::protocol::AgUiEvent;

const DATA_PREFIX: &str = "data:";

/// Splits an incoming byte stream into newline-terminated frames.
///
/// Bytes are buffered until a `\n` arrives, so a multi-byte character that
/// straddles two chunks is only decoded once it is whole.
#[derive(Debug, Default)]
pub struct FrameSplitter {
    pending: Vec<u8>,
}

impl FrameSplitter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends `chunk` and returns every frame it completed, in order.
    pub fn push(&mut self, chunk: &[u8]) -> Vec<String> {
        self.pending.extend_from_slice(chunk);

        let Some(last_newline) = self.pending.iter().rposition(|b| *b == b'\n') else {
            return Vec::new();
        };

        let rest = self.pending.split_off(last_newline + 1);
        let complete = std::mem::replace(&mut self.pending, rest);

        complete[..last_newline]
            .split(|b| *b == b'\n')
            .map(decode_line)
            .collect()
    }

    /// Returns the unterminated tail, if any, once the stream has ended.
    pub fn finish(&mut self) -> Option<String> {
        if self.pending.is_empty() {
            return None;
        }
        let tail = std::mem::take(&mut self.pending);
        Some(decode_line(&tail))
    }
}

fn decode_line(line: &[u8]) -> String {
    let line = line.strip_suffix(b"\r").unwrap_or(line);
    String::from_utf8_lossy(line).into_owned()
}

/// Decodes one frame.
///
/// Returns `None` for anything that is not a `data:` frame (blank keep-alive
/// lines, comments, `event:`/`id:` fields).
pub fn decode_frame(frame: &str) -> Option<Result<AgUiEvent, DecodeError>> {
    let payload = frame.strip_prefix(DATA_PREFIX)?;
    let payload = payload.strip_prefix(' ').unwrap_or(payload);
    Some(serde_json::from_str(payload).map_err(DecodeError::from))
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn split_all(chunks: &[&[u8]]) -> Vec<String> {
        let mut splitter = FrameSplitter::new();
        let mut frames = Vec::new();
        for chunk in chunks {
            frames.extend(splitter.push(chunk));
        }
        frames.extend(splitter.finish());
        frames
    }

    #[test]
    fn keeps_partial_line_until_terminated() {
        let mut splitter = FrameSplitter::new();
        assert!(splitter.push(b"data: {\"type\"").is_empty());
        assert_eq!(
            splitter.push(b": \"RUN_STARTED\"}\n\n"),
            vec!["data: {\"type\": \"RUN_STARTED\"}".to_string(), String::new()]
        );
        assert_eq!(splitter.finish(), None);
    }

    #[test]
    fn strips_carriage_returns() {
        assert_eq!(
            split_all(&[b"data: a\r\n\r\ndata: b\r\n".as_slice()]),
            vec!["data: a", "", "data: b"]
        );
    }

    #[test]
    fn multibyte_character_split_across_chunks() {
        let text = "data: caf\u{e9} \u{1f980}\n";
        let bytes = text.as_bytes();
        let frames = split_all(&[&bytes[..10], &bytes[10..14], &bytes[14..]]);
        assert_eq!(frames, vec!["data: caf\u{e9} \u{1f980}"]);
    }

    #[test]
    fn flush_yields_unterminated_tail() {
        let mut splitter = FrameSplitter::new();
        assert_eq!(splitter.push(b"one\ntwo"), vec!["one"]);
        assert_eq!(splitter.finish(), Some("two".to_string()));
        assert_eq!(splitter.finish(), None);
    }

    #[test]
    fn ignores_non_data_frames() {
        assert!(decode_frame("").is_none());
        assert!(decode_frame(": keep-alive").is_none());
        assert!(decode_frame("event: message").is_none());
    }

    #[test]
    fn decodes_data_frame_with_or_without_space() {
        let spaced = decode_frame("data: {\"type\":\"RUN_ERROR\",\"message\":\"x\"}");
        let tight = decode_frame("data:{\"type\":\"RUN_ERROR\",\"message\":\"x\"}");
        assert_eq!(spaced.unwrap().unwrap(), AgUiEvent::run_error("x"));
        assert_eq!(tight.unwrap().unwrap(), AgUiEvent::run_error("x"));
    }

    #[test]
    fn malformed_payload_is_a_decode_error() {
        assert!(matches!(decode_frame("data: {not json"), Some(Err(_))));
        assert!(matches!(decode_frame("data: {\"delta\":\"x\"}"), Some(Err(_))));
    }

    proptest! {
        #[test]
        fn frames_do_not_depend_on_chunk_boundaries(
            text in "(data: [a-z\u{e9}\u{4e16}\u{1f980} ]{0,12}(\r)?\n){0,8}[a-z]{0,4}",
            cuts in proptest::collection::vec(any::<prop::sample::Index>(), 0..8),
        ) {
            let bytes = text.as_bytes();
            let mut offsets: Vec<usize> = cuts.iter().map(|i| i.index(bytes.len() + 1)).collect();
            offsets.sort_unstable();

            let mut chunks: Vec<&[u8]> = Vec::new();
            let mut start = 0;
            for offset in offsets {
                chunks.push(&bytes[start..offset]);
                start = offset;
            }
            chunks.push(&bytes[start..]);

            prop_assert_eq!(split_all(&chunks), split_all(&[bytes]));
        }
    }
}
