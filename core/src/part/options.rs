use crate::{
    controller::{ControllerParams, PortamentoParams},
    helpers::{db_to_rap, key_log2_freq, velocity_scale},
    polyphony::PolyphonyOptions,
};

/// Lowest part volume in dB.
pub const MIN_PART_VOLUME_DB: f32 = -40.0;
/// Highest part volume in dB.
pub const MAX_PART_VOLUME_DB: f32 = 13.333;

/// Converts a 0..=127 volume to dB. 96 is unity gain.
pub fn part_volume_db(volume: u8) -> f32 {
    ((volume.min(127) as f32 - 96.0) / 96.0 * 40.0).clamp(MIN_PART_VOLUME_DB, MAX_PART_VOLUME_DB)
}

/// Settings of a single part, everything except its instrument.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct PartOptions {
    /// A disabled part ignores new notes and renders silence.
    pub enabled: bool,
    pub volume: u8,
    /// 0 is left, 64 is center and 127 is right.
    pub panning: u8,
    pub min_key: u8,
    pub max_key: u8,
    /// Transposition in semitones, offset by 64.
    pub key_shift: u8,
    pub velocity_sense: u8,
    pub velocity_offset: u8,
    pub polyphony: PolyphonyOptions,
    pub controller: ControllerParams,
    pub portamento: PortamentoParams,
}

impl Default for PartOptions {
    fn default() -> Self {
        Self {
            enabled: true,
            volume: 96,
            panning: 64,
            min_key: 0,
            max_key: 127,
            key_shift: 64,
            velocity_sense: 64,
            velocity_offset: 64,
            polyphony: PolyphonyOptions::default(),
            controller: ControllerParams::default(),
            portamento: PortamentoParams::default(),
        }
    }
}

impl PartOptions {
    /// Whether a note on of `key` starts notes on this part.
    pub fn plays(&self, key: u8) -> bool {
        self.enabled && (self.min_key..=self.max_key).contains(&key)
    }

    /// Sensed velocity of a MIDI velocity, between 0 and 1.
    pub fn velocity(&self, vel: u8) -> f32 {
        let sensed = velocity_scale(vel.min(127) as f32 / 127.0, self.velocity_sense);
        let offset = (self.velocity_offset as f32 - 64.0) / 64.0;
        (sensed + offset).clamp(0.0, 1.0)
    }

    /// Tuned pitch of a key, with the key shift applied.
    pub fn key_log2_freq(&self, key: u8) -> f32 {
        let shift = self.key_shift.min(127) as f32 - 64.0;
        key_log2_freq(key) + shift / 12.0
    }

    pub fn volume_db(&self) -> f32 {
        part_volume_db(self.volume)
    }

    pub fn gain(&self) -> f32 {
        db_to_rap(self.volume_db())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_volume_curve() {
        assert_eq!(part_volume_db(96), 0.0);
        assert_eq!(part_volume_db(0), -40.0);
        assert!((part_volume_db(127) - 12.916_667).abs() < 1e-4);
        assert_eq!(PartOptions::default().gain(), 1.0);
    }

    #[test]
    fn test_velocity_sensing() {
        let options = PartOptions::default();
        assert_eq!(options.velocity(127), 1.0);
        assert!((options.velocity(64) - 64.0 / 127.0).abs() < 1e-6);
        assert_eq!(options.velocity(0), 0.0);

        let insensitive = PartOptions {
            velocity_sense: 127,
            ..Default::default()
        };
        assert_eq!(insensitive.velocity(10), 1.0);

        let offset = PartOptions {
            velocity_offset: 96,
            ..Default::default()
        };
        assert!((offset.velocity(32) - (32.0 / 127.0 + 0.5)).abs() < 1e-6);
        assert_eq!(offset.velocity(120), 1.0);
    }

    #[test]
    fn test_key_range_and_shift() {
        let options = PartOptions {
            min_key: 36,
            max_key: 72,
            key_shift: 76,
            ..Default::default()
        };
        assert!(options.plays(36));
        assert!(options.plays(72));
        assert!(!options.plays(35));
        assert!(!options.plays(73));
        assert!((options.key_log2_freq(57) - key_log2_freq(69)).abs() < 1e-6);

        let disabled = PartOptions {
            enabled: false,
            ..Default::default()
        };
        assert!(!disabled.plays(60));
    }
}
