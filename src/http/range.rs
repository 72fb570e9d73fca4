// -----------------------------------------------------------------------------
// ----- RangeSpec -------------------------------------------------------------

/// Inclusive byte range derived from a client `Range` header, standard
/// HTTP 206 semantics: absent or malformed means the whole file, `end` is
/// clamped to the last byte.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct RangeSpec {
    pub start: u64,
    pub end: u64,
}

impl RangeSpec {
    pub fn length(&self) -> u64 {
        self.end - self.start + 1
    }
}

// -----------------------------------------------------------------------------
// ----- Parsing ---------------------------------------------------------------

/// `size` must be non-zero; empty objects are handled before range math.
pub fn parse_range(header: Option<&str>, size: u64) -> RangeSpec {
    debug_assert!(size > 0);

    let mut start = 0u64;
    let mut end = size - 1;

    if let Some(spec) = header.and_then(|h| h.strip_prefix("bytes=")) {
        let mut parts = spec.splitn(2, '-');
        let from = parts.next().unwrap_or("");
        let to = parts.next().unwrap_or("");

        if let Ok(v) = from.parse::<u64>() {
            start = v;
        }
        if !to.is_empty() {
            if let Ok(v) = to.parse::<u64>() {
                end = v;
            }
        }
    }

    if end >= size {
        end = size - 1;
    }
    if start > end {
        start = end;
    }

    RangeSpec { start, end }
}

// -----------------------------------------------------------------------------
// ----- Tests -----------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn absent_header_means_whole_file() {
        assert_eq!(parse_range(None, 1000), RangeSpec { start: 0, end: 999 });
    }

    #[test]
    fn parses_bounded_range() {
        assert_eq!(
            parse_range(Some("bytes=100-199"), 1000),
            RangeSpec { start: 100, end: 199 }
        );
    }

    #[test]
    fn open_ended_range_runs_to_last_byte() {
        assert_eq!(
            parse_range(Some("bytes=500-"), 1000),
            RangeSpec { start: 500, end: 999 }
        );
    }

    #[test]
    fn end_is_clamped_to_file_size() {
        assert_eq!(
            parse_range(Some("bytes=0-999999"), 1000),
            RangeSpec { start: 0, end: 999 }
        );
    }

    #[test]
    fn malformed_header_falls_back_to_whole_file() {
        assert_eq!(
            parse_range(Some("bytes=abc-def"), 1000),
            RangeSpec { start: 0, end: 999 }
        );
        assert_eq!(
            parse_range(Some("chunks=1-2"), 1000),
            RangeSpec { start: 0, end: 999 }
        );
    }

    #[test]
    fn inverted_range_collapses_instead_of_underflowing() {
        let spec = parse_range(Some("bytes=900-100"), 1000);
        assert!(spec.start <= spec.end);
        assert!(spec.length() >= 1);
    }
}

// -----------------------------------------------------------------------------
// -----------------------------------------------------------------------------
