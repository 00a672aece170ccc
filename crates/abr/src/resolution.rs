use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Video resolution information.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Resolution {
    pub width: u32,
    pub height: u32,
}

/// Error parsing or validating a resolution.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ResolutionError {
    #[error("invalid resolution '{0}', expected WIDTHxHEIGHT")]
    Malformed(String),
    #[error("resolution {0}x{1} out of range")]
    OutOfRange(u32, u32),
}

impl Resolution {
    #[inline]
    pub fn new(width: u32, height: u32) -> Self {
        Self { width, height }
    }

    /// Parse a `WIDTHxHEIGHT` string such as `1920x1080`.
    ///
    /// Dimensions must be non-zero and at most 8192 on either axis.
    pub fn parse(s: &str) -> Result<Self, ResolutionError> {
        let (w, h) = s
            .split_once(['x', 'X'])
            .ok_or_else(|| ResolutionError::Malformed(s.to_string()))?;
        let width: u32 = w
            .trim()
            .parse()
            .map_err(|_| ResolutionError::Malformed(s.to_string()))?;
        let height: u32 = h
            .trim()
            .parse()
            .map_err(|_| ResolutionError::Malformed(s.to_string()))?;

        let res = Self::new(width, height);
        if !res.is_valid() {
            return Err(ResolutionError::OutOfRange(width, height));
        }
        Ok(res)
    }

    /// Whether the resolution is usable as an encode target.
    pub fn is_valid(&self) -> bool {
        (1..=8192).contains(&self.width) && (1..=8192).contains(&self.height)
    }

    /// Total pixel count.
    #[inline]
    pub fn pixels(&self) -> u64 {
        self.width as u64 * self.height as u64
    }

    /// Scale by a factor, rounding each dimension down to the nearest even
    /// number (H.264 4:2:0 requires even dimensions).
    pub fn scaled(&self, factor: f64) -> Self {
        let even = |v: f64| (((v.round() as u32).max(2)) / 2) * 2;
        Self::new(
            even(self.width as f64 * factor),
            even(self.height as f64 * factor),
        )
    }
}

impl std::fmt::Display for Resolution {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}x{}", self.width, self.height)
    }
}
