use crate::config::SynthConfig;

/// Which pitch distances glide.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum PortamentoThreshold {
    /// Only distances up to the threshold glide.
    Below,
    /// Only distances of at least the threshold glide.
    #[default]
    Above,
}

#[derive(Debug, Clone, Copy, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct PortamentoParams {
    /// Glide even without the portamento pedal.
    pub enabled: bool,
    /// Only glide while another note is still held.
    pub auto: bool,
    /// Glide time, 0 to 127.
    pub time: u8,
    /// Above 64 upward glides are slower than downward ones, below 64 the
    /// other way round.
    pub up_down_stretch: u8,
    /// Threshold in semitones.
    pub threshold: u8,
    pub threshold_kind: PortamentoThreshold,
}

impl Default for PortamentoParams {
    fn default() -> Self {
        Self {
            enabled: false,
            auto: true,
            time: 64,
            up_down_stretch: 64,
            threshold: 3,
            threshold_kind: PortamentoThreshold::Above,
        }
    }
}

impl PortamentoParams {
    /// Glide time in seconds from `from` to `to`, both log2 frequencies.
    /// `None` when the glide is disabled for this direction or distance.
    pub fn glide_time(&self, from: f32, to: f32) -> Option<f32> {
        let mut time = 100f32.powf(self.time as f32 / 127.0) / 50.0;

        let stretch = self.up_down_stretch as f32;
        if stretch >= 64.0 && to < from {
            if stretch == 127.0 {
                return None;
            }
            time *= 0.1f32.powf((stretch - 64.0) / 63.0);
        }
        if stretch < 64.0 && to > from {
            if stretch == 0.0 {
                return None;
            }
            time *= 0.1f32.powf((64.0 - stretch) / 64.0);
        }

        let distance = (to - from).abs();
        let threshold = self.threshold as f32 / 12.0;
        let glides = match self.threshold_kind {
            PortamentoThreshold::Below => distance - 0.000_01 <= threshold,
            PortamentoThreshold::Above => distance + 0.000_01 >= threshold,
        };
        glides.then_some(time)
    }
}

/// A pitch glide shared by the notes of a part.
#[derive(Debug, Clone, Default)]
pub struct Portamento {
    active: bool,
    x: f32,
    dx: f32,
    origin_delta_log2: f32,
    delta_log2: f32,
    target_log2: f32,
}

impl Portamento {
    pub fn new() -> Self {
        Default::default()
    }

    /// Starts a glide from `from_log2` to `to_log2`. If a glide is already
    /// running, the new one starts from its current pitch. Returns whether
    /// the new note glides.
    pub fn start(
        &mut self,
        params: &PortamentoParams,
        enabled: bool,
        config: &SynthConfig,
        held_note: bool,
        from_log2: f32,
        to_log2: f32,
    ) -> bool {
        let from_log2 = if self.active {
            self.target_log2 + self.delta_log2
        } else {
            from_log2
        };
        self.active = false;

        if !enabled || (params.auto && !held_note) || from_log2 == to_log2 {
            return false;
        }
        let Some(time) = params.glide_time(from_log2, to_log2) else {
            return false;
        };

        self.x = 0.0;
        self.dx = config.buffer_size_f() / (time * config.sample_rate_f());
        self.origin_delta_log2 = from_log2 - to_log2;
        self.delta_log2 = self.origin_delta_log2;
        self.target_log2 = to_log2;
        self.active = true;
        true
    }

    /// Advances the glide by one block.
    pub fn update(&mut self) {
        if !self.active {
            return;
        }
        self.x += self.dx;
        if self.x > 1.0 {
            self.x = 1.0;
            self.active = false;
        }
        self.delta_log2 = (1.0 - self.x) * self.origin_delta_log2;
    }

    #[inline(always)]
    pub fn is_active(&self) -> bool {
        self.active
    }

    /// Current pitch offset from the target in octaves, zero once done.
    #[inline(always)]
    pub fn delta_log2(&self) -> f32 {
        if self.active {
            self.delta_log2
        } else {
            0.0
        }
    }
}
