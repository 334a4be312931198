//! Byte ceiling enforcement for streamed bodies

use super::UploadError;

/// Size policy resolved for one upload
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SizeBound {
    /// A `content-length` was declared; the body must match it exactly
    Exact(u64),
    /// No declared length, but the configured maximum applies
    AtMost(u64),
    /// Neither a declared length nor a maximum
    Unbounded,
}

impl SizeBound {
    /// Ceiling the limiter enforces, if any
    pub fn limit(&self) -> Option<u64> {
        match self {
            SizeBound::Exact(n) | SizeBound::AtMost(n) => Some(*n),
            SizeBound::Unbounded => None,
        }
    }

    /// Size the finished file must have, if one was declared
    pub fn exact(&self) -> Option<u64> {
        match self {
            SizeBound::Exact(n) => Some(*n),
            _ => None,
        }
    }
}

/// Running byte counter with an optional ceiling.
///
/// `observe` must be called once per chunk, in stream order. Once the total
/// exceeds the limit the limiter stays failed and rejects every later chunk.
#[derive(Debug, Clone)]
pub struct SizeLimiter {
    limit: Option<u64>,
    observed: u64,
    exceeded: bool,
}

impl SizeLimiter {
    pub fn new(limit: Option<u64>) -> Self {
        Self {
            limit,
            observed: 0,
            exceeded: false,
        }
    }

    pub fn unbounded() -> Self {
        Self::new(None)
    }

    /// Account for a chunk of `len` bytes
    pub fn observe(&mut self, len: usize) -> Result<(), UploadError> {
        if self.exceeded {
            return Err(self.too_large());
        }

        self.observed = self.observed.saturating_add(len as u64);

        if let Some(limit) = self.limit {
            if self.observed > limit {
                self.exceeded = true;
                return Err(self.too_large());
            }
        }

        Ok(())
    }

    /// Bytes seen so far
    pub fn observed(&self) -> u64 {
        self.observed
    }

    pub fn limit(&self) -> Option<u64> {
        self.limit
    }

    pub fn is_exceeded(&self) -> bool {
        self.exceeded
    }

    fn too_large(&self) -> UploadError {
        UploadError::PayloadTooLarge(format!(
            "Data size is bigger than the maximum allowed size ({}): upload aborted.",
            self.limit.unwrap_or_default()
        ))
    }
}

impl From<SizeBound> for SizeLimiter {
    fn from(bound: SizeBound) -> Self {
        Self::new(bound.limit())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unbounded_never_fails() {
        let mut limiter = SizeLimiter::unbounded();
        for _ in 0..1000 {
            limiter.observe(1 << 20).unwrap();
        }
        assert_eq!(limiter.observed(), 1000 << 20);
    }

    #[test]
    fn test_limit_reached_exactly_is_accepted() {
        let mut limiter = SizeLimiter::new(Some(3));
        limiter.observe(1).unwrap();
        limiter.observe(2).unwrap();
        assert!(!limiter.is_exceeded());
    }

    #[test]
    fn test_fails_on_first_chunk_over_limit() {
        let mut limiter = SizeLimiter::new(Some(5));
        limiter.observe(3).unwrap();
        let err = limiter.observe(3).unwrap_err();
        assert!(matches!(err, UploadError::PayloadTooLarge(_)));
        assert_eq!(limiter.observed(), 6);
    }

    #[test]
    fn test_stays_failed() {
        let mut limiter = SizeLimiter::new(Some(1));
        assert!(limiter.observe(2).is_err());
        assert!(limiter.observe(0).is_err());
        assert!(limiter.is_exceeded());
    }

    #[test]
    fn test_bound_limits() {
        assert_eq!(SizeBound::Exact(10).limit(), Some(10));
        assert_eq!(SizeBound::AtMost(50).limit(), Some(50));
        assert_eq!(SizeBound::Unbounded.limit(), None);
        assert_eq!(SizeBound::AtMost(50).exact(), None);
        assert_eq!(SizeLimiter::from(SizeBound::Exact(7)).limit(), Some(7));
    }
}
