use rand::{rngs::SmallRng, Rng, SeedableRng};

/// The random number context threaded through every randomized operation.
pub type NoteRng = SmallRng;

/// Creates a deterministic random context from a seed.
pub fn note_rng(seed: u64) -> NoteRng {
    SmallRng::seed_from_u64(seed)
}

/// Uniform random value in `[0, 1)`.
#[inline(always)]
pub fn rnd(rng: &mut NoteRng) -> f32 {
    rng.gen::<f32>()
}

/// Relative amplitude change below which a new amplitude is applied to a
/// whole block instead of being interpolated.
pub const AMPLITUDE_INTERPOLATION_THRESHOLD: f32 = 0.0001;

/// The scale used by the velocity sensing curve.
pub const VELOCITY_MAX_SCALE: f32 = 8.0;

/// Floor under which filter and oscillator state is flushed to zero.
pub const DENORMAL_THRESHOLD: f32 = 1e-20;

#[inline(always)]
pub fn above_amplitude_threshold(a: f32, b: f32) -> bool {
    (2.0 * (b - a).abs() / (b + a + 0.000_000_000_1).abs()) > AMPLITUDE_INTERPOLATION_THRESHOLD
}

#[inline(always)]
pub fn interpolate_amplitude(a: f32, b: f32, x: usize, size: usize) -> f32 {
    a + (b - a) * x as f32 / size as f32
}

#[inline(always)]
pub fn db_to_rap(db: f32) -> f32 {
    10f32.powf(db / 20.0)
}

#[inline(always)]
pub fn rap_to_db(rap: f32) -> f32 {
    20.0 * rap.log10()
}

/// Velocity sensing curve. A sensing of 127 ignores the velocity entirely,
/// 64 is linear and lower values make the response steeper.
pub fn velocity_scale(velocity: f32, sensing: u8) -> f32 {
    let x = VELOCITY_MAX_SCALE.powf((64.0 - sensing as f32) / 64.0);
    if sensing == 127 || velocity > 0.99 {
        1.0
    } else {
        velocity.max(0.0).powf(x)
    }
}

/// Half cosine fade in over a window derived from how fast the signal in
/// the buffer crosses zero. Slow signals get a longer window.
pub fn fade_in(smps: &mut [f32], adjustment: f32) {
    let len = smps.len();
    if len == 0 {
        return;
    }
    let zero_crossings = smps
        .windows(2)
        .filter(|w| w[0] < 0.0 && w[1] > 0.0)
        .count();

    let window = ((len as f32 - 1.0) / (zero_crossings + 1) as f32 / 3.0).max(8.0) * adjustment;
    let n = (window as usize).min(len);
    for (i, s) in smps.iter_mut().take(n).enumerate() {
        *s *= 0.5 - (i as f32 / n as f32 * std::f32::consts::PI).cos() * 0.5;
    }
}

/// Linear fade out across the whole buffer.
pub fn fade_out(smps: &mut [f32]) {
    let len = smps.len() as f32;
    for (i, s) in smps.iter_mut().enumerate() {
        *s *= 1.0 - i as f32 / len;
    }
}

/// Flushes denormal sized values to zero.
#[inline(always)]
pub fn flush_denormal(v: f32) -> f32 {
    if v.abs() < DENORMAL_THRESHOLD {
        0.0
    } else {
        v
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_velocity_scale() {
        assert_eq!(velocity_scale(0.5, 127), 1.0);
        assert!((velocity_scale(0.5, 64) - 0.5).abs() < 1e-6);
        assert!(velocity_scale(0.5, 0) < velocity_scale(0.5, 64));
        assert_eq!(velocity_scale(1.0, 0), 1.0);
    }

    #[test]
    fn test_amplitude_threshold() {
        assert!(!above_amplitude_threshold(0.5, 0.5));
        assert!(above_amplitude_threshold(0.5, 0.6));
        assert_eq!(interpolate_amplitude(0.0, 1.0, 64, 256), 0.25);
    }

    #[test]
    fn test_fade_in_starts_silent() {
        let mut smps = vec![1.0f32; 256];
        fade_in(&mut smps, 1.0);
        assert_eq!(smps[0], 0.0);
        assert_eq!(smps[255], 1.0);
        for w in smps.windows(2) {
            assert!(w[1] >= w[0]);
        }
    }

    #[test]
    fn test_db_rap() {
        assert!((db_to_rap(-6.0206) - 0.5).abs() < 1e-4);
        assert!((rap_to_db(db_to_rap(-12.0)) + 12.0).abs() < 1e-4);
    }

    #[test]
    fn test_seeded_rng_is_deterministic() {
        let mut a = note_rng(7);
        let mut b = note_rng(7);
        for _ in 0..16 {
            let v = rnd(&mut a);
            assert_eq!(v, rnd(&mut b));
            assert!((0.0..1.0).contains(&v));
        }
    }
}
