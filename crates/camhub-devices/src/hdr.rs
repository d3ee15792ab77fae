//! Multi-exposure (HDR) bracketing parameters and ladder computation.

use serde::{Deserialize, Serialize};

use camhub_core::{CameraError, Frame, Result, ValueRange};

/// Upper bound on requested bracket levels.
pub const MAX_HDR_LEVELS: u32 = 64;

/// Parameters of one bracket.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HdrOptions {
    /// Exposure levels requested before clamping and deduplication
    pub levels: u32,
    /// Ratio between neighbouring levels
    pub multiplier: f64,
    /// Output path pattern; `{exposure}` and `{index}` are substituted
    #[serde(default)]
    pub save_path_pattern: Option<String>,
    /// Return the frames instead of a success flag
    #[serde(default = "default_return_images")]
    pub return_images: bool,
}

fn default_return_images() -> bool {
    true
}

impl Default for HdrOptions {
    fn default() -> Self {
        Self {
            levels: 3,
            multiplier: 2.0,
            save_path_pattern: None,
            return_images: true,
        }
    }
}

impl HdrOptions {
    pub fn new(levels: u32, multiplier: f64) -> Self {
        Self {
            levels,
            multiplier,
            ..Self::default()
        }
    }

    pub fn with_save_pattern(mut self, pattern: impl Into<String>) -> Self {
        self.save_path_pattern = Some(pattern.into());
        self
    }

    pub fn with_return_images(mut self, return_images: bool) -> Self {
        self.return_images = return_images;
        self
    }

    pub fn validate(&self) -> Result<()> {
        if self.levels == 0 || self.levels > MAX_HDR_LEVELS {
            return Err(CameraError::Configuration(format!(
                "HDR levels must be between 1 and {}, got {}",
                MAX_HDR_LEVELS, self.levels
            )));
        }
        if !self.multiplier.is_finite() || self.multiplier <= 0.0 {
            return Err(CameraError::Configuration(format!(
                "HDR multiplier must be positive, got {}",
                self.multiplier
            )));
        }
        Ok(())
    }
}

/// One successfully captured bracket level.
#[derive(Debug, Clone)]
pub struct HdrFrame {
    pub exposure: f64,
    pub frame: Frame,
}

/// Result of a bracket.
#[derive(Debug, Clone)]
pub enum HdrOutput {
    /// Frames of the levels that succeeded, in ascending exposure order
    Images(Vec<HdrFrame>),
    /// Whether every level succeeded
    Completed(bool),
}

impl HdrOutput {
    pub fn images(&self) -> Option<&[HdrFrame]> {
        match self {
            Self::Images(frames) => Some(frames),
            Self::Completed(_) => None,
        }
    }
}

/// Exposure ladder around `original`: level `i` is
/// `original * multiplier^(i - (levels - 1) / 2)`, clamped into `range`,
/// deduplicated and sorted ascending.
pub fn exposure_ladder(
    original: f64,
    range: ValueRange,
    levels: u32,
    multiplier: f64,
) -> Result<Vec<f64>> {
    if !range.is_valid() {
        return Err(CameraError::Configuration(format!(
            "Invalid exposure range [{}, {}]",
            range.min, range.max
        )));
    }

    let center = (levels as f64 - 1.0) / 2.0;
    let mut ladder: Vec<f64> = (0..levels)
        .map(|i| range.clamp(original * multiplier.powf(i as f64 - center)))
        .collect();
    ladder.sort_by(|a, b| a.total_cmp(b));
    ladder.dedup();
    Ok(ladder)
}

/// Substitute `{exposure}` and `{index}` in a save pattern.
pub fn expand_pattern(pattern: &str, exposure: f64, index: usize) -> String {
    pattern
        .replace("{exposure}", &format!("{}", exposure.round() as i64))
        .replace("{index}", &index.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_symmetric_ladder() {
        let ladder = exposure_ladder(20000.0, ValueRange::new(10.0, 1_000_000.0), 3, 2.0).unwrap();
        assert_eq!(ladder, vec![10000.0, 20000.0, 40000.0]);
    }

    #[test]
    fn test_even_levels_center_between() {
        let ladder = exposure_ladder(1000.0, ValueRange::new(1.0, 1e9), 2, 4.0).unwrap();
        assert_eq!(ladder, vec![500.0, 2000.0]);
    }

    #[test]
    fn test_clamping_collapses_extremes() {
        let ladder = exposure_ladder(100.0, ValueRange::new(80.0, 150.0), 5, 2.0).unwrap();
        assert_eq!(ladder, vec![80.0, 100.0, 150.0]);
        assert!(ladder.windows(2).all(|w| w[0] < w[1]));
    }

    #[test]
    fn test_invalid_range() {
        let err = exposure_ladder(100.0, ValueRange::new(200.0, 100.0), 3, 2.0).unwrap_err();
        assert!(matches!(err, CameraError::Configuration(_)));
    }

    #[test]
    fn test_options_validation() {
        assert!(HdrOptions::new(0, 2.0).validate().is_err());
        assert!(HdrOptions::new(MAX_HDR_LEVELS, 2.0).validate().is_ok());
        assert!(HdrOptions::new(MAX_HDR_LEVELS + 1, 2.0).validate().is_err());
        assert!(HdrOptions::new(u32::MAX, 2.0).validate().is_err());
        assert!(HdrOptions::new(3, 0.0).validate().is_err());
        assert!(HdrOptions::new(3, f64::NAN).validate().is_err());
        assert!(HdrOptions::default().validate().is_ok());
    }

    #[test]
    fn test_expand_pattern() {
        assert_eq!(expand_pattern("out/hdr_{index}_{exposure}.png", 2500.4, 1), "out/hdr_1_2500.png");
    }
}
