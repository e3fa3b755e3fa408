//! Incremental UTF-8 character validator.
//!
//! Bytes are fed one at a time; the validator holds the prefix of the
//! character being assembled until it is either complete or proven
//! invalid.

use crate::cost::MAX_CHAR_LEN;

/// A character being assembled.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Utf8 {
    buf: [u8; MAX_CHAR_LEN],
    len: usize,
    /// Expected total length, known from the lead byte.
    need: usize,
}

impl Utf8 {
    /// Try to extend the character with `b`.
    ///
    /// Returns false, leaving the state untouched, if `b` cannot be the
    /// next byte of a valid character. An empty validator accepts any
    /// ASCII or lead byte.
    pub fn add(&mut self, b: u8) -> bool {
        if self.len == 0 {
            let need = match b {
                0x00..=0x7f => 1,
                0xc2..=0xdf => 2,
                0xe0..=0xef => 3,
                0xf0..=0xf4 => 4,
                _ => return false,
            };
            self.need = need;
        } else {
            if self.is_complete() {
                return false;
            }
            let (lo, hi) = if self.len == 1 {
                match self.buf[0] {
                    0xe0 => (0xa0, 0xbf),
                    0xed => (0x80, 0x9f),
                    0xf0 => (0x90, 0xbf),
                    0xf4 => (0x80, 0x8f),
                    _ => (0x80, 0xbf),
                }
            } else {
                (0x80, 0xbf)
            };
            if b < lo || b > hi {
                return false;
            }
        }
        self.buf[self.len] = b;
        self.len += 1;
        true
    }

    pub fn is_started(&self) -> bool {
        self.len > 0
    }

    pub fn is_complete(&self) -> bool {
        self.len > 0 && self.len == self.need
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.buf[..self.len]
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub fn reset(&mut self) {
        *self = Utf8::default();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn feed(bytes: &[u8]) -> (Utf8, usize) {
        let mut utf8 = Utf8::default();
        let accepted = bytes.iter().take_while(|&&b| utf8.add(b)).count();
        (utf8, accepted)
    }

    #[test]
    fn ascii_completes_immediately() {
        let (utf8, n) = feed(b"A");
        assert_eq!(n, 1);
        assert!(utf8.is_complete());
        assert_eq!(utf8.as_bytes(), b"A");
    }

    #[test]
    fn multibyte_characters() {
        for s in ["é", "€", "😀"] {
            let (utf8, n) = feed(s.as_bytes());
            assert_eq!(n, s.len());
            assert!(utf8.is_complete(), "{s}");
        }
    }

    #[test]
    fn partial_character_is_started_not_complete() {
        let (utf8, n) = feed(&"€".as_bytes()[..2]);
        assert_eq!(n, 2);
        assert!(utf8.is_started());
        assert!(!utf8.is_complete());
    }

    #[test]
    fn invalid_lead_bytes() {
        for b in [0x80u8, 0xbf, 0xc0, 0xc1, 0xf5, 0xff] {
            let mut utf8 = Utf8::default();
            assert!(!utf8.add(b), "{b:#x}");
            assert!(utf8.is_empty());
        }
    }

    #[test]
    fn overlong_and_surrogate_second_bytes() {
        // overlong three-byte form
        assert_eq!(feed(&[0xe0, 0x80]).1, 1);
        // UTF-16 surrogate
        assert_eq!(feed(&[0xed, 0xa0]).1, 1);
        // overlong four-byte form
        assert_eq!(feed(&[0xf0, 0x80]).1, 1);
        // beyond U+10FFFF
        assert_eq!(feed(&[0xf4, 0x90]).1, 1);
    }

    #[test]
    fn complete_character_takes_no_more_bytes() {
        let mut utf8 = Utf8::default();
        assert!(utf8.add(b'x'));
        assert!(!utf8.add(b'y'));
        utf8.reset();
        assert!(utf8.is_empty());
    }
}
