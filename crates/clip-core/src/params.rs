//! Volume and pan conversions between the API and output devices

use serde::{Deserialize, Serialize};

/// Lowest attenuation an output device can represent (silence)
pub const MILLIBEL_MIN: i16 = i16::MIN;

/// Full pan range on either side, in permille
pub const PERMILLE_RANGE: i16 = 1000;

/// Linear volume (clamped 0.0-1.0)
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Volume(f32);

impl Volume {
    pub const SILENT: Self = Self(0.0);
    pub const FULL: Self = Self(1.0);

    /// Out-of-range input is clamped, never rejected. NaN maps to silence.
    #[inline]
    pub fn new(value: f32) -> Self {
        if value.is_nan() {
            Self::SILENT
        } else {
            Self(value.clamp(0.0, 1.0))
        }
    }

    #[inline]
    pub fn get(self) -> f32 {
        self.0
    }

    /// Logarithmic attenuation: `2000 * log10(v)`, floored at [`MILLIBEL_MIN`].
    #[inline]
    pub fn to_millibels(self) -> Millibels {
        if self.0 <= 0.0 {
            return Millibels::MIN;
        }
        let mb = (2000.0 * self.0.log10()).round() as i32;
        Millibels(mb.max(MILLIBEL_MIN as i32) as i16)
    }
}

impl Default for Volume {
    fn default() -> Self {
        Self::FULL
    }
}

/// Device volume level in millibels (0 = unattenuated)
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Millibels(pub i16);

impl Millibels {
    pub const MAX: Self = Self(0);
    pub const MIN: Self = Self(MILLIBEL_MIN);
}

/// Stereo position (clamped -1.0 left to 1.0 right)
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Pan(f32);

impl Pan {
    pub const CENTER: Self = Self(0.0);

    #[inline]
    pub fn new(value: f32) -> Self {
        if value.is_nan() {
            Self::CENTER
        } else {
            Self(value.clamp(-1.0, 1.0))
        }
    }

    #[inline]
    pub fn get(self) -> f32 {
        self.0
    }

    /// Symmetric integer mapping onto -1000..=1000
    #[inline]
    pub fn to_permille(self) -> Permille {
        Permille((self.0 * PERMILLE_RANGE as f32).round() as i16)
    }
}

impl Default for Pan {
    fn default() -> Self {
        Self::CENTER
    }
}

/// Device stereo position in permille
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Permille(pub i16);

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn test_volume_clamps() {
        assert_relative_eq!(Volume::new(1.5).get(), 1.0);
        assert_relative_eq!(Volume::new(-3.0).get(), 0.0);
        assert_relative_eq!(Volume::new(0.25).get(), 0.25);
        assert_relative_eq!(Volume::new(f32::NAN).get(), 0.0);
    }

    #[test]
    fn test_volume_to_millibels() {
        assert_eq!(Volume::FULL.to_millibels(), Millibels::MAX);
        assert_eq!(Volume::SILENT.to_millibels(), Millibels::MIN);
        // -20 dB
        assert_eq!(Volume::new(0.1).to_millibels(), Millibels(-2000));
        // roughly -6 dB
        assert_eq!(Volume::new(0.5).to_millibels(), Millibels(-602));
    }

    #[test]
    fn test_tiny_volume_floors_at_min() {
        assert_eq!(Volume::new(1e-30).to_millibels(), Millibels::MIN);
    }

    #[test]
    fn test_pan_to_permille() {
        assert_eq!(Pan::new(-1.0).to_permille(), Permille(-1000));
        assert_eq!(Pan::new(1.0).to_permille(), Permille(1000));
        assert_eq!(Pan::new(0.25).to_permille(), Permille(250));
        assert_eq!(Pan::new(7.0).to_permille(), Permille(1000));
        assert_eq!(Pan::CENTER.to_permille(), Permille(0));
    }
}
