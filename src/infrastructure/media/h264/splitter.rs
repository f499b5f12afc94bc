//! Annex-B NAL unit splitter

/// Lazy iterator over the NAL units of an Annex-B buffer.
///
/// A start code is a run of two or more zero bytes followed by `0x01`, so
/// both `00 00 01` and `00 00 00 01` are accepted. Bytes before the first
/// start code are skipped. A buffer without any start code is yielded as a
/// single unit. Start codes are not part of the yielded slices.
#[derive(Debug, Clone)]
pub struct NalUnits<'a> {
    data: &'a [u8],
    /// Offset of the next unit's first byte, `None` when exhausted
    next: Option<usize>,
}

impl<'a> NalUnits<'a> {
    pub fn new(data: &'a [u8]) -> Self {
        let next = match find_start_code(data, 0) {
            Some((_, end)) => Some(end),
            None if data.is_empty() => None,
            None => Some(0),
        };
        Self { data, next }
    }
}

impl<'a> Iterator for NalUnits<'a> {
    type Item = &'a [u8];

    fn next(&mut self) -> Option<Self::Item> {
        let start = self.next?;
        match find_start_code(self.data, start) {
            Some((code_start, code_end)) => {
                self.next = Some(code_end);
                Some(&self.data[start..code_start])
            }
            None => {
                self.next = None;
                Some(&self.data[start..])
            }
        }
    }
}

/// Locate the next start code at or after `from`: (first zero, first byte after 0x01)
fn find_start_code(data: &[u8], from: usize) -> Option<(usize, usize)> {
    let mut zeros = 0usize;
    for (offset, &byte) in data.get(from..)?.iter().enumerate() {
        match byte {
            0x00 => zeros += 1,
            0x01 if zeros >= 2 => {
                let pos = from + offset;
                return Some((pos - zeros, pos + 1));
            }
            _ => zeros = 0,
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_three_and_four_byte_codes() {
        let data = [0, 0, 0, 1, 0x67, 0xAA, 0, 0, 1, 0x68, 0xBB, 0, 0, 0, 1, 0x65, 0xCC, 0xDD];
        let units: Vec<&[u8]> = NalUnits::new(&data).collect();
        assert_eq!(units, vec![&[0x67, 0xAA][..], &[0x68, 0xBB][..], &[0x65, 0xCC, 0xDD][..]]);
    }

    #[test]
    fn test_no_start_code_is_one_unit() {
        let data = [0x65, 0x88, 0x84];
        let units: Vec<&[u8]> = NalUnits::new(&data).collect();
        assert_eq!(units, vec![&data[..]]);
    }

    #[test]
    fn test_leading_garbage_dropped() {
        let data = [0xFF, 0xEE, 0, 0, 1, 0x41, 0x01];
        let units: Vec<&[u8]> = NalUnits::new(&data).collect();
        assert_eq!(units, vec![&[0x41, 0x01][..]]);
    }

    #[test]
    fn test_empty_buffer() {
        assert_eq!(NalUnits::new(&[]).count(), 0);
    }

    #[test]
    fn test_single_zero_then_one_is_payload() {
        let data = [0, 0, 1, 0x41, 0x00, 0x01, 0x02];
        let units: Vec<&[u8]> = NalUnits::new(&data).collect();
        assert_eq!(units, vec![&[0x41, 0x00, 0x01, 0x02][..]]);
    }

    #[test]
    fn test_reassembles_original() {
        let segments: [&[u8]; 4] = [&[0x67, 1, 2, 3], &[0x68, 4], &[0x65, 5, 6, 7, 8], &[0x41, 9]];
        let mut stream = Vec::new();
        for (i, segment) in segments.iter().enumerate() {
            if i % 2 == 0 {
                stream.extend_from_slice(&[0, 0, 0, 1]);
            } else {
                stream.extend_from_slice(&[0, 0, 1]);
            }
            stream.extend_from_slice(segment);
        }

        let units: Vec<&[u8]> = NalUnits::new(&stream).collect();
        assert_eq!(units.len(), segments.len());

        let mut rebuilt = Vec::new();
        for (i, unit) in units.iter().enumerate() {
            assert!(!unit.is_empty());
            if i % 2 == 0 {
                rebuilt.extend_from_slice(&[0, 0, 0, 1]);
            } else {
                rebuilt.extend_from_slice(&[0, 0, 1]);
            }
            rebuilt.extend_from_slice(unit);
        }
        assert_eq!(rebuilt, stream);
    }

    #[test]
    fn test_restartable() {
        let data = [0, 0, 1, 0x41, 0, 0, 1, 0x42];
        let splitter = NalUnits::new(&data);
        let first: Vec<&[u8]> = splitter.clone().collect();
        let second: Vec<&[u8]> = splitter.collect();
        assert_eq!(first, second);
    }
}
