use unicode_width::UnicodeWidthChar;

/// Longest UTF-8 encoding of a scalar.
const MAX_UTF8_LEN: usize = 4;

/// Event produced by the byte stream decoder.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DecodeEvent {
    /// A decoded Unicode scalar with its display width (0, 1 or 2).
    Scalar { ch: char, width: u8 },
    /// A C0 control byte (0x00-0x1F) or DEL (0x7F).
    Control(u8),
    /// Bytes that do not form valid UTF-8. Decoding resumes at the
    /// next byte.
    Invalid,
}

/// Display width of a scalar: east-asian width plus an emoji override.
pub fn scalar_width(ch: char) -> u8 {
    if is_emoji_presentation(ch) {
        return 2;
    }
    UnicodeWidthChar::width(ch).unwrap_or(0).min(2) as u8
}

/// Blocks that render double-width in emoji presentation even where the
/// east-asian tables call them neutral.
fn is_emoji_presentation(ch: char) -> bool {
    matches!(
        u32::from(ch),
        0x1F300..=0x1F5FF   // misc symbols and pictographs
        | 0x1F600..=0x1F64F // emoticons
        | 0x1F680..=0x1F6FF // transport and map
        | 0x1F900..=0x1F9FF // supplemental symbols
        | 0x1FA70..=0x1FAFF // extended-A symbols
    )
}

fn utf8_expected_len(lead: u8) -> Option<usize> {
    match lead {
        0xC2..=0xDF => Some(2),
        0xE0..=0xEF => Some(3),
        0xF0..=0xF4 => Some(4),
        _ => None,
    }
}

/// Incremental UTF-8 decoder feeding the escape-sequence parser.
///
/// A multi-byte sequence split across `feed` calls is buffered until it
/// completes, an incompatible byte arrives (the partial flushes as
/// `Invalid` and the byte is reprocessed), or `flush` is called.
#[derive(Debug, Default)]
pub struct ByteDecoder {
    pending: [u8; MAX_UTF8_LEN],
    pending_len: usize,
}

impl ByteDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Decode a chunk of bytes, invoking `emit` for every event.
    ///
    /// Concatenating chunks yields the same scalars as decoding the
    /// concatenation in one call.
    pub fn feed(&mut self, bytes: &[u8], emit: &mut dyn FnMut(DecodeEvent)) {
        let mut i = 0;
        while i < bytes.len() {
            let b = bytes[i];

            if self.pending_len > 0 {
                if (0x80..=0xBF).contains(&b) {
                    self.pending[self.pending_len] = b;
                    self.pending_len += 1;
                    let expected = utf8_expected_len(self.pending[0]).unwrap_or(1);
                    if self.pending_len == expected {
                        self.emit_pending(emit);
                    }
                    i += 1;
                } else {
                    // Incompatible byte: the held prefix is invalid and the
                    // byte is reprocessed from scratch.
                    self.pending_len = 0;
                    emit(DecodeEvent::Invalid);
                }
                continue;
            }

            match b {
                0x00..=0x1F | 0x7F => emit(DecodeEvent::Control(b)),
                0x20..=0x7E => {
                    let ch = b as char;
                    emit(DecodeEvent::Scalar {
                        ch,
                        width: scalar_width(ch),
                    });
                }
                _ => match utf8_expected_len(b) {
                    Some(_) => {
                        self.pending[0] = b;
                        self.pending_len = 1;
                    }
                    None => emit(DecodeEvent::Invalid),
                },
            }
            i += 1;
        }
    }

    /// Emit `Invalid` for any held partial sequence and reset.
    pub fn flush(&mut self, emit: &mut dyn FnMut(DecodeEvent)) {
        if self.pending_len > 0 {
            self.pending_len = 0;
            emit(DecodeEvent::Invalid);
        }
    }

    /// True when a partial multi-byte sequence is buffered.
    pub fn has_partial(&self) -> bool {
        self.pending_len > 0
    }

    fn emit_pending(&mut self, emit: &mut dyn FnMut(DecodeEvent)) {
        let len = self.pending_len;
        self.pending_len = 0;
        // from_utf8 rejects overlong encodings and surrogates.
        match std::str::from_utf8(&self.pending[..len]) {
            Ok(s) => {
                if let Some(ch) = s.chars().next() {
                    emit(DecodeEvent::Scalar {
                        ch,
                        width: scalar_width(ch),
                    });
                }
            }
            Err(_) => emit(DecodeEvent::Invalid),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn collect(decoder: &mut ByteDecoder, bytes: &[u8]) -> Vec<DecodeEvent> {
        let mut events = Vec::new();
        decoder.feed(bytes, &mut |ev| events.push(ev));
        events
    }

    #[test]
    fn ascii_and_controls() {
        let mut decoder = ByteDecoder::new();
        let events = collect(&mut decoder, b"a\nb");
        assert_eq!(
            events,
            vec![
                DecodeEvent::Scalar { ch: 'a', width: 1 },
                DecodeEvent::Control(0x0A),
                DecodeEvent::Scalar { ch: 'b', width: 1 },
            ]
        );
    }

    #[test]
    fn cjk_is_wide() {
        let mut decoder = ByteDecoder::new();
        let events = collect(&mut decoder, "世".as_bytes());
        assert_eq!(
            events,
            vec![DecodeEvent::Scalar {
                ch: '世',
                width: 2
            }]
        );
    }

    #[test]
    fn combining_mark_is_zero_width() {
        let mut decoder = ByteDecoder::new();
        let events = collect(&mut decoder, "\u{0301}".as_bytes());
        assert_eq!(
            events,
            vec![DecodeEvent::Scalar {
                ch: '\u{0301}',
                width: 0
            }]
        );
    }

    #[test]
    fn emoji_override_is_wide() {
        assert_eq!(scalar_width('\u{1F600}'), 2);
    }

    #[test]
    fn split_sequence_across_feeds() {
        let mut decoder = ByteDecoder::new();
        let mut events = collect(&mut decoder, &[0xE4, 0xB8]);
        assert!(events.is_empty());
        assert!(decoder.has_partial());
        events.extend(collect(&mut decoder, &[0x96, 0xE7, 0x95, 0x8C]));
        assert_eq!(
            events,
            vec![
                DecodeEvent::Scalar {
                    ch: '\u{4E16}',
                    width: 2
                },
                DecodeEvent::Scalar {
                    ch: '\u{754C}',
                    width: 2
                },
            ]
        );
    }

    #[test]
    fn incompatible_byte_flushes_invalid_and_reprocesses() {
        let mut decoder = ByteDecoder::new();
        // 0xE4 expects continuations; 'x' is not one.
        let events = collect(&mut decoder, &[0xE4, b'x']);
        assert_eq!(
            events,
            vec![
                DecodeEvent::Invalid,
                DecodeEvent::Scalar { ch: 'x', width: 1 }
            ]
        );
    }

    #[test]
    fn flush_emits_invalid_for_partial() {
        let mut decoder = ByteDecoder::new();
        collect(&mut decoder, &[0xF0, 0x9F]);
        let mut events = Vec::new();
        decoder.flush(&mut |ev| events.push(ev));
        assert_eq!(events, vec![DecodeEvent::Invalid]);
        assert!(!decoder.has_partial());
    }

    #[test]
    fn stray_continuation_is_invalid() {
        let mut decoder = ByteDecoder::new();
        let events = collect(&mut decoder, &[0x80, b'a']);
        assert_eq!(
            events,
            vec![
                DecodeEvent::Invalid,
                DecodeEvent::Scalar { ch: 'a', width: 1 }
            ]
        );
    }

    proptest! {
        /// Decoding any valid UTF-8 in arbitrary chunk splits yields the
        /// same scalar sequence as decoding it in one call.
        #[test]
        fn chunk_split_invariant(s in "\\PC{0,64}", split in 0usize..64) {
            let bytes = s.as_bytes();
            let mut whole = ByteDecoder::new();
            let mut expected = Vec::new();
            whole.feed(bytes, &mut |ev| expected.push(ev));

            let split = split.min(bytes.len());
            let mut chunked = ByteDecoder::new();
            let mut actual = Vec::new();
            chunked.feed(&bytes[..split], &mut |ev| actual.push(ev));
            chunked.feed(&bytes[split..], &mut |ev| actual.push(ev));

            prop_assert_eq!(expected, actual);
        }
    }
}
