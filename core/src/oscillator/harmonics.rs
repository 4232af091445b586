use std::f32::consts::PI;

/// Maximum number of harmonics in a table.
pub const MAX_HARMONICS: usize = 128;

/// Raw value of a harmonic magnitude or phase that means "unchanged".
pub const NEUTRAL: u8 = 64;

/// How the raw magnitude knob maps to a linear magnitude.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum MagnitudeType {
    #[default]
    Linear,
    /// -40dB range
    Db40,
    /// -60dB range
    Db60,
    /// -80dB range
    Db80,
    /// -100dB range
    Db100,
}

impl MagnitudeType {
    fn floor(&self) -> Option<f32> {
        match self {
            MagnitudeType::Linear => None,
            MagnitudeType::Db40 => Some(0.01),
            MagnitudeType::Db60 => Some(0.001),
            MagnitudeType::Db80 => Some(0.0001),
            MagnitudeType::Db100 => Some(0.00001),
        }
    }
}

/// One harmonic of a table. Both values are raw `0..=127` knobs, 64 being
/// neutral. A magnitude of exactly 64 disables the harmonic.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct Harmonic {
    pub mag: u8,
    pub phase: u8,
}

impl Default for Harmonic {
    fn default() -> Self {
        Self {
            mag: NEUTRAL,
            phase: NEUTRAL,
        }
    }
}

impl Harmonic {
    pub fn new(mag: u8, phase: u8) -> Self {
        Self { mag, phase }
    }

    #[inline(always)]
    pub fn is_enabled(&self) -> bool {
        self.mag != NEUTRAL
    }
}

/// Harmonic magnitudes and phases, starting from the fundamental. The DC
/// component is never part of the table.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct HarmonicTable {
    pub magnitude_type: MagnitudeType,
    harmonics: Vec<Harmonic>,
}

impl Default for HarmonicTable {
    /// A plain sine: full fundamental, every other harmonic disabled.
    fn default() -> Self {
        let mut table = Self::silent();
        table.set(1, Harmonic::new(127, NEUTRAL));
        table
    }
}

impl HarmonicTable {
    /// A table where every harmonic is disabled.
    pub fn silent() -> Self {
        Self {
            magnitude_type: MagnitudeType::Linear,
            harmonics: vec![Harmonic::default(); MAX_HARMONICS],
        }
    }

    /// Number of harmonics in the table.
    pub fn len(&self) -> usize {
        self.harmonics.len()
    }

    pub fn is_empty(&self) -> bool {
        self.harmonics.iter().all(|h| !h.is_enabled())
    }

    /// Harmonic `n`, 1 being the fundamental.
    pub fn get(&self, n: usize) -> Harmonic {
        n.checked_sub(1)
            .and_then(|i| self.harmonics.get(i))
            .copied()
            .unwrap_or_default()
    }

    /// Sets harmonic `n`, 1 being the fundamental. Out of range harmonics,
    /// including the DC slot 0, are ignored.
    pub fn set(&mut self, n: usize, harmonic: Harmonic) {
        if let Some(h) = n.checked_sub(1).and_then(|i| self.harmonics.get_mut(i)) {
            *h = harmonic;
        }
    }

    /// Iterator of `(harmonic number, harmonic)` pairs.
    pub fn iter(&self) -> impl Iterator<Item = (usize, &Harmonic)> {
        self.harmonics.iter().enumerate().map(|(i, h)| (i + 1, h))
    }

    /// Linear signed magnitude of a harmonic. Exactly zero when disabled.
    pub fn magnitude(&self, harmonic: &Harmonic) -> f32 {
        if !harmonic.is_enabled() {
            return 0.0;
        }
        let h = 1.0 - (harmonic.mag as f32 / 64.0 - 1.0).abs();
        let mag = match self.magnitude_type.floor() {
            None => 1.0 - h,
            Some(floor) => (h * floor.ln()).exp(),
        };
        if harmonic.mag < NEUTRAL {
            -mag
        } else {
            mag
        }
    }

    /// Phase of a harmonic in radians, relative to its own period.
    pub fn phase(&self, harmonic: &Harmonic) -> f32 {
        (harmonic.phase as f32 - 64.0) / 64.0 * PI
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_neutral_is_exactly_disabled() {
        let table = HarmonicTable::silent();
        for magnitude_type in [
            MagnitudeType::Linear,
            MagnitudeType::Db40,
            MagnitudeType::Db100,
        ] {
            let table = HarmonicTable {
                magnitude_type,
                ..table.clone()
            };
            assert_eq!(table.magnitude(&Harmonic::new(64, 10)), 0.0);
        }
    }

    #[test]
    fn test_magnitude_encoding() {
        let table = HarmonicTable::silent();
        assert!((table.magnitude(&Harmonic::new(127, 64)) - 63.0 / 64.0).abs() < 1e-6);
        assert!((table.magnitude(&Harmonic::new(0, 64)) + 1.0).abs() < 1e-6);

        let log = HarmonicTable {
            magnitude_type: MagnitudeType::Db40,
            ..HarmonicTable::silent()
        };
        assert!((log.magnitude(&Harmonic::new(0, 64)) + 1.0).abs() < 1e-6);
        assert!(log.magnitude(&Harmonic::new(96, 64)) < 0.2);
    }

    #[test]
    fn test_dc_slot_ignored() {
        let mut table = HarmonicTable::silent();
        table.set(0, Harmonic::new(127, 64));
        assert!(table.is_empty());
        assert_eq!(table.get(0), Harmonic::default());
    }
}
