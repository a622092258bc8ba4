use serde::Serialize;
use strum_macros::Display;
use tracing::trace;

use super::characteristic::SpaCharacteristic;

/// ATT header bytes subtracted from the MTU for one write.
const ATT_WRITE_OVERHEAD: u16 = 3;

/// Leading flag of a chunked write frame.
#[derive(Debug, Clone, Copy, Eq, PartialEq, Display)]
pub enum ChunkFlag {
    #[strum(to_string = "0")]
    Start,
    #[strum(to_string = "2")]
    Continue,
    #[strum(to_string = "9")]
    End,
}

impl ChunkFlag {
    pub(crate) fn from_char(flag: char) -> Option<Self> {
        match flag {
            '0' => Some(Self::Start),
            '2' => Some(Self::Continue),
            '9' => Some(Self::End),
            _ => None,
        }
    }

    fn as_char(self) -> char {
        match self {
            Self::Start => '0',
            Self::Continue => '2',
            Self::End => '9',
        }
    }
}

/// In-progress chunked write. Names at most one characteristic.
#[derive(Debug, Clone, Default, Eq, PartialEq, Serialize)]
pub struct PartialWrite {
    characteristic: Option<SpaCharacteristic>,
    buffer: String,
    length: usize,
}

impl PartialWrite {
    /// Characteristic currently being reassembled.
    #[must_use]
    pub fn characteristic(&self) -> Option<SpaCharacteristic> {
        self.characteristic
    }

    #[must_use]
    pub fn buffer(&self) -> &str {
        &self.buffer
    }

    /// Payload characters accepted so far, flags excluded.
    #[must_use]
    pub fn length(&self) -> usize {
        self.length
    }

    #[must_use]
    pub fn is_pending(&self) -> bool {
        self.characteristic.is_some()
    }

    pub(crate) fn begin(&mut self, characteristic: SpaCharacteristic, payload: &str) {
        self.characteristic = Some(characteristic);
        self.buffer = payload.to_string();
        self.length = payload.chars().count();
        trace!(%characteristic, "chunked write started");
    }

    pub(crate) fn append(&mut self, payload: &str) {
        self.buffer.push_str(payload);
        self.length += payload.chars().count();
    }

    /// Buffer plus the final payload; the buffer itself is left untouched.
    pub(crate) fn assembled(&self, payload: &str) -> String {
        let mut full = String::with_capacity(self.buffer.len() + payload.len());
        full.push_str(&self.buffer);
        full.push_str(payload);
        full
    }

    pub(crate) fn reset(&mut self) {
        *self = Self::default();
    }
}

/// Splits a value into the writes a client sends at the given MTU.
///
/// Values that fit in one write and do not start with a flag character are
/// sent as-is. Everything else is framed as a start frame, zero or more
/// continue frames and an end frame.
///
/// ```
/// use spa_sim::spa::frame_value;
///
/// assert_eq!(vec!["38.5"], frame_value("38.5", 23));
/// assert_eq!(vec!["0abc", "2def", "9g"], frame_value("abcdefg", 7));
/// ```
#[must_use]
pub fn frame_value(value: &str, mtu: u16) -> Vec<String> {
    let write_size = usize::from(mtu.saturating_sub(ATT_WRITE_OVERHEAD).max(2));
    let starts_with_flag = value.chars().next().and_then(ChunkFlag::from_char).is_some();
    if value.len() <= write_size && !starts_with_flag {
        return vec![value.to_string()];
    }

    let payload_size = write_size - 1;
    let mut payloads: Vec<&str> = Vec::new();
    let mut rest = value;
    while !rest.is_empty() {
        let mut split = 0;
        for (index, character) in rest.char_indices() {
            let end = index + character.len_utf8();
            if end > payload_size && split > 0 {
                break;
            }
            split = end;
        }
        let (head, tail) = rest.split_at(split);
        payloads.push(head);
        rest = tail;
    }
    if payloads.len() < 2 {
        payloads.push("");
    }

    let last = payloads.len() - 1;
    payloads
        .into_iter()
        .enumerate()
        .map(|(index, payload)| {
            let flag = match index {
                0 => ChunkFlag::Start,
                i if i == last => ChunkFlag::End,
                _ => ChunkFlag::Continue,
            };
            let mut frame = String::with_capacity(payload.len() + 1);
            frame.push(flag.as_char());
            frame.push_str(payload);
            frame
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;
    use rstest::rstest;

    use super::*;

    #[test]
    fn partial_write_tracks_payload_length() {
        let mut partial = PartialWrite::default();
        partial.begin(SpaCharacteristic::Session, "AB");
        partial.append("CDE");

        assert_eq!(Some(SpaCharacteristic::Session), partial.characteristic());
        assert_eq!("ABCDEFG", partial.assembled("FG"));
        assert_eq!("ABCDE", partial.buffer());
        assert_eq!(5, partial.length());

        partial.append("é");
        assert_eq!(6, partial.length());

        partial.reset();
        assert!(!partial.is_pending());
    }

    #[rstest]
    #[case::fits("42", 23, vec!["42"])]
    #[case::exact_fit("abcd", 7, vec!["abcd"])]
    #[case::split("abcdefg", 7, vec!["0abc", "2def", "9g"])]
    #[case::two_frames("abcdef", 7, vec!["0abc", "9def"])]
    #[case::leading_flag("20", 23, vec!["020", "9"])]
    #[case::tiny_mtu("abc", 0, vec!["0a", "2b", "9c"])]
    fn frames_follow_the_mtu(#[case] value: &str, #[case] mtu: u16, #[case] expected: Vec<&str>) {
        assert_eq!(expected, frame_value(value, mtu));
    }

    #[test]
    fn multibyte_characters_are_never_split() {
        let frames = frame_value("ééé", 6);

        assert_eq!(vec!["0é", "2é", "9é"], frames);
    }
}
