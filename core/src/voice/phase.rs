/// Fractional bits of an oscillator position.
pub const PHASE_FRAC_BITS: u32 = 32;

const FRAC_SCALE: f64 = (1u64 << PHASE_FRAC_BITS) as f64;

/// Position inside a waveform table as a whole sample index plus a fixed
/// point fraction. Whole indices wrap with the table mask, so a table must
/// have a power of two length.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct OscPhase {
    pos: usize,
    frac: u32,
}

/// Distance an [`OscPhase`] moves every sample.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct OscIncrement {
    whole: usize,
    frac: u32,
}

impl OscIncrement {
    /// Increment for playing a `size` long table at `freq` Hz. The speed is
    /// limited to one table length per sample.
    pub fn from_freq(freq: f32, size: usize, sample_rate: f32) -> Self {
        let speed = freq.abs() as f64 * size as f64 / sample_rate as f64;
        if !speed.is_finite() || speed <= 0.0 {
            return Self::default();
        }
        let speed = speed.min(size as f64);
        let whole = speed.floor();
        Self {
            whole: whole as usize,
            frac: ((speed - whole) * FRAC_SCALE) as u32,
        }
    }

    /// Samples per output sample.
    pub fn speed(&self) -> f64 {
        self.whole as f64 + self.frac as f64 / FRAC_SCALE
    }
}

impl OscPhase {
    pub fn new(pos: usize, mask: usize) -> Self {
        Self {
            pos: pos & mask,
            frac: 0,
        }
    }

    #[inline(always)]
    pub fn pos(&self) -> usize {
        self.pos
    }

    /// The fraction between `pos` and the next sample, in `[0, 1)`.
    #[inline(always)]
    pub fn frac(&self) -> f32 {
        (self.frac as f64 / FRAC_SCALE) as f32
    }

    /// Position in samples as a float, for diagnostics and tests.
    pub fn position(&self) -> f64 {
        self.pos as f64 + self.frac as f64 / FRAC_SCALE
    }

    #[inline(always)]
    pub fn advance(&mut self, inc: OscIncrement, mask: usize) {
        let (frac, carry) = self.frac.overflowing_add(inc.frac);
        self.frac = frac;
        self.pos = (self.pos + inc.whole + carry as usize) & mask;
    }

    /// Linear interpolation between the two table samples around the phase.
    #[inline(always)]
    pub fn sample(&self, table: &[f32], mask: usize) -> f32 {
        let a = table[self.pos];
        let b = table[(self.pos + 1) & mask];
        a + (b - a) * self.frac()
    }

    /// This phase moved by a possibly negative amount of samples.
    #[inline(always)]
    pub fn offset(&self, samples: f32, mask: usize) -> Self {
        let total = self.frac as f64 / FRAC_SCALE + samples as f64;
        if !total.is_finite() {
            return *self;
        }
        let whole = total.floor();
        let frac = ((total - whole) * FRAC_SCALE) as u32;
        let pos = (self.pos as i64).wrapping_add(whole as i64) & mask as i64;
        Self {
            pos: pos as usize,
            frac,
        }
    }
}
