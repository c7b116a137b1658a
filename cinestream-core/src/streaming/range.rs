//! HTTP byte-range planning (RFC 7233 single ranges).

use super::StreamingError;

/// The inclusive byte span to serve and how to describe it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RangePlan {
    pub start: u64,
    pub end: u64,
    pub total: u64,
    /// `true` for a 206 response, `false` for a full 200 body
    pub partial: bool,
}

impl RangePlan {
    /// Whole file, no range requested.
    pub fn full(total: u64) -> Self {
        Self {
            start: 0,
            end: total.saturating_sub(1),
            total,
            partial: false,
        }
    }

    /// Resolves an optional `Range` header against a file of `total` bytes.
    ///
    /// Accepts `bytes=a-b`, `bytes=a-` and `bytes=-n`. An end past the file
    /// is clamped to the last byte.
    ///
    /// # Errors
    ///
    /// - `StreamingError::MalformedRange` - Header is not a single byte range
    /// - `StreamingError::RangeNotSatisfiable` - Range starts past the file
    ///
    /// # Examples
    /// ```
    /// use cinestream_core::streaming::RangePlan;
    ///
    /// let plan = RangePlan::resolve(Some("bytes=100-199"), 1000).unwrap();
    /// assert_eq!((plan.start, plan.end, plan.content_length()), (100, 199, 100));
    /// ```
    pub fn resolve(header: Option<&str>, total: u64) -> Result<Self, StreamingError> {
        let Some(header) = header else {
            return Ok(Self::full(total));
        };

        let malformed = || StreamingError::MalformedRange {
            header: header.to_string(),
        };

        let spec = header.trim().strip_prefix("bytes=").ok_or_else(malformed)?;
        if spec.contains(',') {
            return Err(malformed());
        }
        let (start_str, end_str) = spec.split_once('-').ok_or_else(malformed)?;
        let (start_str, end_str) = (start_str.trim(), end_str.trim());

        let (start, end) = match (start_str.is_empty(), end_str.is_empty()) {
            (true, true) => return Err(malformed()),
            // Suffix form: the last `n` bytes
            (true, false) => {
                let suffix: u64 = end_str.parse().map_err(|_| malformed())?;
                if suffix == 0 || total == 0 {
                    return Err(StreamingError::RangeNotSatisfiable { total });
                }
                (total.saturating_sub(suffix), total - 1)
            }
            (false, true) => {
                let start: u64 = start_str.parse().map_err(|_| malformed())?;
                (start, total.saturating_sub(1))
            }
            (false, false) => {
                let start: u64 = start_str.parse().map_err(|_| malformed())?;
                let end: u64 = end_str.parse().map_err(|_| malformed())?;
                if end < start {
                    return Err(malformed());
                }
                (start, end.min(total.saturating_sub(1)))
            }
        };

        if start >= total {
            return Err(StreamingError::RangeNotSatisfiable { total });
        }

        Ok(Self {
            start,
            end,
            total,
            partial: true,
        })
    }

    pub fn content_length(&self) -> u64 {
        if self.total == 0 {
            0
        } else {
            self.end - self.start + 1
        }
    }

    /// `Content-Range` value for partial responses.
    pub fn content_range(&self) -> Option<String> {
        self.partial
            .then(|| format!("bytes {}-{}/{}", self.start, self.end, self.total))
    }
}
