/// Envelope follower of a single channel. The loudness rises quickly and
/// falls slowly, and the signal is divided by it.
#[derive(Debug, Clone)]
struct ChannelLimiter {
    loudness: f32,
    attack: f32,
    falloff: f32,
}

impl ChannelLimiter {
    fn new(attack: f32, falloff: f32) -> Self {
        Self {
            loudness: 1.0,
            attack,
            falloff,
        }
    }

    #[inline(always)]
    fn limit(&mut self, val: f32) -> f32 {
        let abs = val.abs();
        let rate = if self.loudness > abs {
            self.falloff
        } else {
            self.attack
        };
        self.loudness = ((self.loudness * rate + abs) / (rate + 1.0)).max(1.0);
        val / self.loudness
    }
}

/// Keeps the mixed output of all parts from clipping.
#[derive(Debug, Clone)]
pub struct VolumeLimiter {
    channels: Vec<ChannelLimiter>,
}

impl VolumeLimiter {
    /// Builds a limiter for interleaved audio. The attack and falloff
    /// times are scaled so the limiter sounds the same at any sample rate.
    pub fn new(channel_count: u16, sample_rate: u32) -> Self {
        let scale = sample_rate as f32 / 44100.0;
        let attack = 100.0 * scale;
        let falloff = 16000.0 * scale;
        Self {
            channels: (0..channel_count.max(1))
                .map(|_| ChannelLimiter::new(attack, falloff))
                .collect(),
        }
    }

    /// Limits an interleaved buffer in place.
    pub fn limit(&mut self, smps: &mut [f32]) {
        let count = self.channels.len();
        for (i, s) in smps.iter_mut().enumerate() {
            *s = self.channels[i % count].limit(*s);
        }
    }

    /// Resets the followers, used after the output was silent for a while.
    pub fn reset(&mut self) {
        for channel in self.channels.iter_mut() {
            channel.loudness = 1.0;
        }
    }
}
