use crate::config::SynthConfig;

/// Maximum amount of breakpoints in an envelope.
pub const MAX_ENVELOPE_POINTS: usize = 40;

/// Floor of the dB envelopes. Reaching it means silence.
pub const MIN_ENVELOPE_DB: f32 = -40.0;

/// What an envelope drives, which decides how its raw point values are
/// converted.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum EnvelopeMode {
    /// Linear amplitude, 0 to 1.
    AdsrLinear,
    /// Amplitude in dB, from `MIN_ENVELOPE_DB` to 0.
    #[default]
    AdsrDb,
    /// Frequency offset in cents.
    AsrFrequency,
    /// Filter cutoff offset in octaves.
    AdsrFilter,
    /// Bandwidth offset.
    AsrBandwidth,
}

/// One breakpoint: the time it takes to reach the point and its raw value.
#[derive(Debug, Copy, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct EnvelopePoint {
    /// Seconds.
    pub dt: f32,
    /// Raw value, 0 to 127.
    pub val: u8,
}

impl EnvelopePoint {
    pub fn new(dt: f32, val: u8) -> Self {
        Self { dt, val }
    }
}

/// Converts a raw `0..=127` time knob to seconds. 0 is instant and 127 is
/// about 41 seconds.
pub fn envelope_dt(raw: u8) -> f32 {
    (2f32.powf(raw as f32 / 127.0 * 12.0) - 1.0) * 0.01
}

/// The breakpoint description of an envelope.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct EnvelopeParams {
    pub mode: EnvelopeMode,
    /// The `dt` of the first point is unused, the envelope starts on it.
    pub points: Vec<EnvelopePoint>,
    /// The point held while the key is down. `None` disables sustain.
    pub sustain: Option<usize>,
    /// How much the times shrink for higher notes, 64 is one octave per
    /// doubling.
    pub stretch: u8,
    /// Jump straight to the release segment when the key is released.
    pub forced_release: bool,
    /// Interpolate amplitude envelopes linearly instead of in dB.
    pub linear: bool,
    /// Loop back to the start while sustaining.
    pub repeating: bool,
}

impl Default for EnvelopeParams {
    fn default() -> Self {
        Self::adsr_db(0.0, envelope_dt(40), 127, envelope_dt(25))
    }
}

impl EnvelopeParams {
    fn new(mode: EnvelopeMode, points: Vec<EnvelopePoint>, sustain: usize) -> Self {
        Self {
            mode,
            points,
            sustain: Some(sustain),
            stretch: 64,
            forced_release: true,
            linear: false,
            repeating: false,
        }
    }

    fn adsr_points(a_dt: f32, d_dt: f32, s_val: u8, r_dt: f32) -> Vec<EnvelopePoint> {
        vec![
            EnvelopePoint::new(0.0, 0),
            EnvelopePoint::new(a_dt, 127),
            EnvelopePoint::new(d_dt, s_val),
            EnvelopePoint::new(r_dt, 0),
        ]
    }

    /// Attack, decay, sustain and release of an amplitude in dB.
    pub fn adsr_db(a_dt: f32, d_dt: f32, s_val: u8, r_dt: f32) -> Self {
        Self::new(
            EnvelopeMode::AdsrDb,
            Self::adsr_points(a_dt, d_dt, s_val, r_dt),
            2,
        )
    }

    /// Attack, decay, sustain and release of a linear amplitude.
    pub fn adsr_linear(a_dt: f32, d_dt: f32, s_val: u8, r_dt: f32) -> Self {
        Self::new(
            EnvelopeMode::AdsrLinear,
            Self::adsr_points(a_dt, d_dt, s_val, r_dt),
            2,
        )
    }

    /// Moves from `a_val` to neutral, holds, then moves to `r_val`.
    pub fn asr(mode: EnvelopeMode, a_val: u8, a_dt: f32, r_val: u8, r_dt: f32) -> Self {
        Self::new(
            mode,
            vec![
                EnvelopePoint::new(0.0, a_val),
                EnvelopePoint::new(a_dt, 64),
                EnvelopePoint::new(r_dt, r_val),
            ],
            1,
        )
    }

    /// Filter envelope, sustaining on the neutral cutoff.
    pub fn adsr_filter(a_val: u8, a_dt: f32, d_val: u8, d_dt: f32, r_dt: f32, r_val: u8) -> Self {
        Self::new(
            EnvelopeMode::AdsrFilter,
            vec![
                EnvelopePoint::new(0.0, a_val),
                EnvelopePoint::new(a_dt, d_val),
                EnvelopePoint::new(d_dt, 64),
                EnvelopePoint::new(r_dt, r_val),
            ],
            2,
        )
    }

    pub fn with_stretch(mut self, stretch: u8) -> Self {
        self.stretch = stretch;
        self
    }

    pub fn with_forced_release(mut self, forced_release: bool) -> Self {
        self.forced_release = forced_release;
        self
    }

    pub fn global_amplitude() -> Self {
        Self::adsr_db(0.0, envelope_dt(40), 127, envelope_dt(25))
    }

    pub fn global_frequency() -> Self {
        Self::asr(
            EnvelopeMode::AsrFrequency,
            64,
            envelope_dt(50),
            64,
            envelope_dt(60),
        )
        .with_stretch(0)
        .with_forced_release(false)
    }

    pub fn global_filter() -> Self {
        Self::adsr_filter(64, envelope_dt(40), 64, envelope_dt(70), envelope_dt(60), 64)
            .with_stretch(0)
    }

    pub fn voice_amplitude() -> Self {
        Self::adsr_db(0.0, envelope_dt(100), 127, envelope_dt(100))
    }

    pub fn voice_frequency() -> Self {
        Self::asr(
            EnvelopeMode::AsrFrequency,
            30,
            envelope_dt(40),
            64,
            envelope_dt(60),
        )
        .with_stretch(0)
        .with_forced_release(false)
    }

    pub fn voice_filter() -> Self {
        Self::adsr_filter(90, envelope_dt(70), 40, envelope_dt(70), envelope_dt(10), 40)
            .with_stretch(0)
    }

    pub fn modulator_frequency() -> Self {
        Self::asr(
            EnvelopeMode::AsrFrequency,
            20,
            envelope_dt(90),
            40,
            envelope_dt(80),
        )
        .with_stretch(0)
        .with_forced_release(false)
    }

    pub fn modulator_amplitude() -> Self {
        Self::adsr_linear(envelope_dt(80), envelope_dt(90), 127, envelope_dt(100))
    }

    /// Whether amplitude output goes through the dB curve.
    fn is_db(&self) -> bool {
        self.mode == EnvelopeMode::AdsrDb && !self.linear
    }

    fn convert(&self, val: u8) -> f32 {
        let v = val as f32;
        match self.mode {
            EnvelopeMode::AdsrLinear => v / 127.0,
            EnvelopeMode::AdsrDb if self.linear => v / 127.0,
            EnvelopeMode::AdsrDb => (1.0 - v / 127.0) * MIN_ENVELOPE_DB,
            EnvelopeMode::AsrFrequency => {
                let cents = (2f32.powf(6.0 * (v - 64.0).abs() / 64.0) - 1.0) * 100.0;
                if val < 64 {
                    -cents
                } else {
                    cents
                }
            }
            EnvelopeMode::AdsrFilter => (v - 64.0) / 64.0 * 6.0,
            EnvelopeMode::AsrBandwidth => (v - 64.0) / 64.0 * 10.0,
        }
    }

    /// The value the envelope treats as silence, for modes that have one.
    fn silence(&self) -> Option<f32> {
        match self.mode {
            EnvelopeMode::AdsrDb if self.is_db() => Some(MIN_ENVELOPE_DB),
            EnvelopeMode::AdsrDb | EnvelopeMode::AdsrLinear => Some(0.0),
            _ => None,
        }
    }
}

/// Maps an envelope dB value to a linear amplitude. The floor maps to
/// exactly zero.
#[inline(always)]
pub fn env_db_to_rap(db: f32) -> f32 {
    (10f32.powf(db / 20.0) - 0.01) / 0.99
}

#[inline(always)]
pub fn env_rap_to_db(rap: f32) -> f32 {
    20.0 * (rap * 0.99 + 0.01).log10()
}

/// Runtime state of one envelope, advanced once per block.
#[derive(Debug, Clone)]
pub struct EnvelopeGenerator {
    len: usize,
    values: [f32; MAX_ENVELOPE_POINTS],
    dts: [f32; MAX_ENVELOPE_POINTS],
    sustain: Option<usize>,
    forced_release: bool,
    repeating: bool,
    db: bool,
    zero_release: bool,

    current: usize,
    t: f32,
    inct: f32,
    released: bool,
    finished: bool,
    last_out: f32,
}

impl EnvelopeGenerator {
    /// Builds the envelope for a note of `base_freq` Hz. Point lists longer
    /// than `MAX_ENVELOPE_POINTS` are truncated and an out of range sustain
    /// point is clamped to the last point.
    pub fn new(params: &EnvelopeParams, base_freq: f32, config: &SynthConfig) -> Self {
        let mut values = [0.0; MAX_ENVELOPE_POINTS];
        let mut dts = [0.0; MAX_ENVELOPE_POINTS];

        let mut points: Vec<EnvelopePoint> = params
            .points
            .iter()
            .take(MAX_ENVELOPE_POINTS)
            .copied()
            .collect();
        while points.len() < 2 {
            let last = points.last().copied().unwrap_or(EnvelopePoint::new(0.0, 0));
            points.push(last);
        }
        let len = points.len();

        let stretch = (440.0 / base_freq.max(1.0)).powf(params.stretch as f32 / 64.0);
        let block_dt = config.dt();

        for (i, point) in points.iter().enumerate() {
            values[i] = params.convert(point.val);
            let time = point.dt.max(0.0) * stretch;
            dts[i] = if time > block_dt {
                block_dt / time
            } else {
                2.0
            };
        }

        let sustain = params.sustain.map(|s| s.min(len - 1));
        let zero_release = match (params.silence(), sustain) {
            (Some(floor), Some(s)) => values[s..len].iter().all(|v| *v == floor),
            _ => false,
        };

        Self {
            len,
            values,
            dts,
            sustain,
            forced_release: params.forced_release,
            repeating: params.repeating,
            db: params.is_db(),
            zero_release,
            current: 1,
            t: 0.0,
            inct: dts[1],
            released: false,
            finished: false,
            last_out: values[0],
        }
    }

    #[inline(always)]
    pub fn finished(&self) -> bool {
        self.finished
    }

    #[inline(always)]
    pub fn released(&self) -> bool {
        self.released
    }

    /// Index of the segment being traversed, the point it moves towards.
    pub fn current_point(&self) -> usize {
        self.current
    }

    pub fn release_key(&mut self) {
        if self.released {
            return;
        }
        self.released = true;
        if self.forced_release {
            self.t = 0.0;
        }
    }

    /// Stop the envelope on the spot. Used when a note is killed.
    pub fn force_finish(&mut self) {
        self.finished = true;
    }

    fn dt_at(&self, i: usize) -> f32 {
        if i < self.len {
            self.dts[i]
        } else {
            2.0
        }
    }

    fn is_sustaining(&self) -> bool {
        !self.released && self.sustain.map(|s| s + 1) == Some(self.current)
    }

    /// Output for this block, in the envelope's own units.
    pub fn envout(&mut self) -> f32 {
        if self.finished || self.current >= self.len {
            self.finished = true;
            self.last_out = self.values[self.len - 1];
            return self.last_out;
        }

        if self.is_sustaining() {
            if let Some(s) = self.sustain {
                self.last_out = self.values[s];
            }
            if self.zero_release {
                self.finished = true;
            }
            return self.last_out;
        }

        if self.released && self.forced_release {
            let release_point = match self.sustain {
                Some(s) => (s + 1).min(self.len - 1),
                None => self.len - 1,
            };
            let out =
                self.last_out + (self.values[release_point] - self.last_out) * self.t.min(1.0);
            self.t += self.dts[release_point];
            if self.t >= 1.0 {
                self.current = self.sustain.map(|s| s + 2).unwrap_or(self.len);
                self.forced_release = false;
                self.t = 0.0;
                self.inct = self.dt_at(self.current);
                if self.current >= self.len || self.sustain.is_none() {
                    self.finished = true;
                }
            }
            return out;
        }

        let cur = self.current;
        let out = if self.inct >= 1.0 {
            self.values[cur]
        } else {
            self.values[cur - 1] + (self.values[cur] - self.values[cur - 1]) * self.t
        };

        self.t += self.inct;
        if self.t >= 1.0 {
            if cur >= self.len - 1 {
                self.finished = true;
            } else if self.repeating && Some(cur) == self.sustain && !self.released {
                self.values[0] = self.values[cur];
                self.current = 1;
            } else {
                self.current += 1;
            }
            self.t = 0.0;
            self.inct = self.dt_at(self.current);
        }

        self.last_out = out;
        out
    }

    /// Output for this block of a dB envelope, as a linear amplitude. The
    /// first segment is interpolated linearly in amplitude.
    pub fn envout_db(&mut self) -> f32 {
        let first_segment = self.current == 1
            && !self.finished
            && !self.is_sustaining()
            && (!self.released || !self.forced_release);

        if !first_segment {
            return env_db_to_rap(self.envout());
        }

        let v1 = env_db_to_rap(self.values[0]);
        let v2 = env_db_to_rap(self.values[1]);
        let mut out = v1 + (v2 - v1) * self.t;

        self.t += self.inct;
        if self.t >= 1.0 {
            self.t = 0.0;
            self.inct = self.dt_at(2);
            self.current += 1;
            out = v2;
            if self.current >= self.len {
                self.finished = true;
            }
        }

        self.last_out = if out > 0.001 {
            env_rap_to_db(out)
        } else {
            MIN_ENVELOPE_DB
        };
        out
    }

    /// Output for this block as an amplitude multiplier, using the curve the
    /// envelope was configured with.
    pub fn amplitude(&mut self) -> f32 {
        if self.db {
            self.envout_db()
        } else {
            self.envout()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config() -> SynthConfig {
        // 10ms blocks so that 40ms segments take exactly four blocks.
        SynthConfig::new(1000, 10, 256)
    }

    fn run(env: &mut EnvelopeGenerator, blocks: usize) -> Vec<f32> {
        (0..blocks)
            .map(|_| (env.envout() * 10000.0).round() / 10000.0)
            .collect()
    }

    fn linear(sustain: Option<usize>) -> EnvelopeParams {
        EnvelopeParams {
            sustain,
            stretch: 0,
            forced_release: false,
            ..EnvelopeParams::adsr_linear(0.04, 0.04, 64, 0.04)
        }
    }

    #[test]
    fn test_linear_adsr() {
        let mut env = EnvelopeGenerator::new(&linear(Some(2)), 440.0, &config());
        let round = |v: Vec<f32>| -> Vec<f32> {
            v.into_iter()
                .map(|v| (v * 10000.0).round() / 10000.0)
                .collect()
        };
        let s = 64.0f32 / 127.0;

        let expected = vec![
            0.0,
            0.25,
            0.5,
            0.75,
            1.0,
            1.0 + (s - 1.0) * 0.25,
            1.0 + (s - 1.0) * 0.5,
            1.0 + (s - 1.0) * 0.75,
            s,
            s,
            s,
        ];
        assert_eq!(run(&mut env, 11), round(expected));

        env.release_key();
        let expected = vec![s, s - s * 0.25, s - s * 0.5, s - s * 0.75, 0.0, 0.0];
        assert_eq!(run(&mut env, 6), round(expected));
        assert!(env.finished());
    }

    #[test]
    fn test_knots_are_exact() {
        let params = EnvelopeParams {
            mode: EnvelopeMode::AdsrFilter,
            points: vec![
                EnvelopePoint::new(0.0, 10),
                EnvelopePoint::new(0.04, 100),
                EnvelopePoint::new(0.08, 30),
                EnvelopePoint::new(0.02, 127),
            ],
            sustain: None,
            stretch: 0,
            forced_release: false,
            linear: false,
            repeating: false,
        };
        let mut env = EnvelopeGenerator::new(&params, 440.0, &config());
        let values: Vec<f32> = (0..20).map(|_| env.envout()).collect();

        let convert = |v: u8| params.convert(v);
        assert_eq!(values[0], convert(10));
        assert_eq!(values[4], convert(100));
        assert_eq!(values[12], convert(30));
        assert!(env.finished());

        let last = env.envout();
        assert_eq!(last, convert(127));
        assert_eq!(env.envout(), last);
    }

    #[test]
    fn test_forced_release_jumps_to_release() {
        let params = EnvelopeParams {
            forced_release: true,
            ..linear(Some(2))
        };
        let mut env = EnvelopeGenerator::new(&params, 440.0, &config());
        assert_eq!(run(&mut env, 3), vec![0.0, 0.25, 0.5]);

        env.release_key();
        assert_eq!(run(&mut env, 5), vec![0.5, 0.375, 0.25, 0.125, 0.0]);
        assert!(env.finished());
    }

    #[test]
    fn test_sustain_at_first_point() {
        let mut env = EnvelopeGenerator::new(&linear(Some(0)), 440.0, &config());
        assert_eq!(run(&mut env, 3), vec![0.0, 0.0, 0.0]);
        assert!(!env.finished());
    }

    #[test]
    fn test_repeating_loops_on_sustain() {
        let params = EnvelopeParams {
            mode: EnvelopeMode::AdsrLinear,
            points: vec![
                EnvelopePoint::new(0.0, 0),
                EnvelopePoint::new(0.02, 127),
                EnvelopePoint::new(0.02, 0),
            ],
            sustain: Some(1),
            stretch: 0,
            forced_release: false,
            linear: false,
            repeating: true,
        };
        let mut env = EnvelopeGenerator::new(&params, 440.0, &config());
        // After the first loop the start value is the sustain value.
        assert_eq!(run(&mut env, 5), vec![0.0, 0.5, 1.0, 1.0, 1.0]);
        assert!(!env.finished());
    }

    #[test]
    fn test_zero_release_finishes_while_sustaining() {
        let params = EnvelopeParams {
            stretch: 0,
            ..EnvelopeParams::adsr_db(0.0, 0.02, 0, 0.04)
        };
        let mut env = EnvelopeGenerator::new(&params, 440.0, &config());
        for _ in 0..10 {
            env.envout_db();
        }
        assert!(env.finished());

        // Other modes never take the shortcut.
        let params = EnvelopeParams {
            stretch: 0,
            ..EnvelopeParams::asr(EnvelopeMode::AsrFrequency, 64, 0.02, 64, 0.02)
        };
        let mut env = EnvelopeGenerator::new(&params, 440.0, &config());
        for _ in 0..10 {
            env.envout();
        }
        assert!(!env.finished());
    }

    #[test]
    fn test_db_attack_is_linear_in_amplitude() {
        let params = EnvelopeParams {
            stretch: 0,
            ..EnvelopeParams::adsr_db(0.04, 0.04, 127, 0.04)
        };
        let mut env = EnvelopeGenerator::new(&params, 440.0, &config());
        let out: Vec<f32> = (0..5)
            .map(|_| (env.envout_db() * 10000.0).round() / 10000.0)
            .collect();
        // The last attack block already lands on the peak.
        assert_eq!(out, vec![0.0, 0.25, 0.5, 1.0, 1.0]);
    }

    #[test]
    fn test_db_floor_is_silent() {
        assert!(env_db_to_rap(MIN_ENVELOPE_DB).abs() < 1e-6);
        assert!((env_db_to_rap(0.0) - 1.0).abs() < 1e-6);
        assert!((env_rap_to_db(0.5) - -5.9342).abs() < 1e-3);
    }

    #[test]
    fn test_point_count_is_clamped() {
        let params = EnvelopeParams {
            points: vec![EnvelopePoint::new(0.01, 64); 100],
            sustain: Some(90),
            ..EnvelopeParams::default()
        };
        let env = EnvelopeGenerator::new(&params, 440.0, &config());
        assert_eq!(env.len, MAX_ENVELOPE_POINTS);
        assert_eq!(env.sustain, Some(MAX_ENVELOPE_POINTS - 1));
    }

    #[test]
    fn test_presets() {
        let amp = EnvelopeParams::global_amplitude();
        assert_eq!(amp.points.len(), 4);
        assert_eq!(amp.sustain, Some(2));
        assert!(amp.forced_release);
        assert!((envelope_dt(40) - 0.127).abs() < 1e-3);

        let freq = EnvelopeParams::global_frequency();
        assert_eq!(freq.points.len(), 3);
        assert_eq!(freq.sustain, Some(1));
        assert!(!freq.forced_release);
    }
}
