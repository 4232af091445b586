use crate::config::SynthConfig;

/// Length of a legato cross fade in seconds.
pub const LEGATO_FADE_TIME: f32 = 0.005;

/// The pitch and velocity a note is started or moved with.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct NoteTrigger {
    pub log2_freq: f32,
    pub velocity: f32,
    pub portamento: bool,
    pub seed: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LegatoState {
    Normal,
    /// Fading in after a legato event on a silent note.
    FadeIn { remaining: usize },
    /// Fading out after a legato event on a sounding note.
    FadeOut { remaining: usize },
    /// Silent while the re-triggered note runs in step with the new one.
    CatchUp { remaining: usize },
}

/// Legato transitions of one note.
///
/// A legato note is played by a pair of notes. On every legato event the
/// audible one fades out while the silent one fades in at the new pitch.
/// Once faded out, the formerly audible note is re-triggered silently at a
/// pitch that compensates the time it spent fading, and after the same
/// window it moves to the new pitch too, ready for the next event.
#[derive(Debug, Clone)]
pub struct Legato {
    state: LegatoState,
    silent: bool,
    fade_len: usize,
    step: f32,
    target: NoteTrigger,
    last_log2_freq: f32,
}

impl Legato {
    pub fn new(config: &SynthConfig, target: NoteTrigger, silent: bool) -> Self {
        let fade_len = Self::fade_len(config);
        Self {
            state: LegatoState::Normal,
            silent,
            fade_len,
            step: 1.0 / fade_len as f32,
            target,
            last_log2_freq: target.log2_freq,
        }
    }

    /// Amount of samples in a fade, never zero.
    pub fn fade_len(config: &SynthConfig) -> usize {
        ((config.sample_rate_f() * LEGATO_FADE_TIME) as usize).max(1)
    }

    #[inline(always)]
    pub fn state(&self) -> LegatoState {
        self.state
    }

    #[inline(always)]
    pub fn is_silent(&self) -> bool {
        self.silent
    }

    /// Gain change per sample during a fade.
    #[inline(always)]
    pub fn step(&self) -> f32 {
        self.step
    }

    pub fn target(&self) -> NoteTrigger {
        self.target
    }

    /// A new legato note arrived. Returns the parameters the note has to
    /// switch to right away, or `None` when the switch happens after the
    /// fade out.
    pub fn start(&mut self, target: NoteTrigger) -> Option<NoteTrigger> {
        if let LegatoState::CatchUp { .. } = self.state {
            // Still silent from the previous event, only the target moves.
            self.last_log2_freq = self.target.log2_freq;
            self.target = target;
            return None;
        }

        self.last_log2_freq = self.target.log2_freq;
        self.target = target;
        if self.silent {
            self.state = LegatoState::FadeIn {
                remaining: self.fade_len,
            };
            Some(target)
        } else {
            self.state = LegatoState::FadeOut {
                remaining: self.fade_len,
            };
            None
        }
    }

    /// Apply the transition to a rendered block. Returns the parameters the
    /// note has to be re-triggered with before the next block, if any.
    pub fn apply(&mut self, left: &mut [f32], right: &mut [f32]) -> Option<NoteTrigger> {
        let len = left.len().min(right.len());
        let mut retrigger = None;

        let mut i = 0;
        while i < len {
            match self.state {
                LegatoState::Normal => {
                    if self.silent {
                        left[i..len].fill(0.0);
                        right[i..len].fill(0.0);
                    }
                    break;
                }
                LegatoState::FadeIn { remaining } => {
                    self.silent = false;
                    let gain = if remaining <= 1 {
                        self.state = LegatoState::Normal;
                        1.0
                    } else {
                        self.state = LegatoState::FadeIn {
                            remaining: remaining - 1,
                        };
                        (self.fade_len - remaining + 1) as f32 * self.step
                    };
                    left[i] *= gain;
                    right[i] *= gain;
                }
                LegatoState::FadeOut { remaining } => {
                    let gain = if remaining <= 1 {
                        self.silent = true;
                        self.state = LegatoState::CatchUp {
                            remaining: self.fade_len,
                        };
                        retrigger = Some(self.catch_up_target());
                        0.0
                    } else {
                        self.state = LegatoState::FadeOut {
                            remaining: remaining - 1,
                        };
                        (remaining - 1) as f32 * self.step
                    };
                    left[i] *= gain;
                    right[i] *= gain;
                }
                LegatoState::CatchUp { remaining } => {
                    left[i] = 0.0;
                    right[i] = 0.0;
                    if remaining <= 1 {
                        self.state = LegatoState::Normal;
                        retrigger = Some(self.target);
                    } else {
                        self.state = LegatoState::CatchUp {
                            remaining: remaining - 1,
                        };
                    }
                }
            }
            i += 1;
        }

        retrigger
    }

    /// The pitch that lets the silent note catch up with the audible one
    /// for the time it stayed at the old pitch while fading out.
    fn catch_up_target(&self) -> NoteTrigger {
        NoteTrigger {
            log2_freq: 2.0 * self.target.log2_freq - self.last_log2_freq,
            ..self.target
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config() -> SynthConfig {
        SynthConfig::new(44100, 64, 1024)
    }

    fn target(log2_freq: f32) -> NoteTrigger {
        NoteTrigger {
            log2_freq,
            velocity: 1.0,
            portamento: false,
            seed: 0,
        }
    }

    /// Runs blocks of ones through the transition and records the gain of
    /// every sample, along with the retriggers.
    fn run(legato: &mut Legato, blocks: usize) -> (Vec<f32>, Vec<NoteTrigger>) {
        let mut gains = Vec::new();
        let mut retriggers = Vec::new();
        for _ in 0..blocks {
            let mut l = [1.0f32; 64];
            let mut r = [1.0f32; 64];
            if let Some(t) = legato.apply(&mut l, &mut r) {
                retriggers.push(t);
            }
            assert_eq!(l, r);
            gains.extend_from_slice(&l);
        }
        (gains, retriggers)
    }

    #[test]
    fn test_fade_len_is_positive() {
        assert_eq!(Legato::fade_len(&config()), 220);
        assert_eq!(Legato::fade_len(&SynthConfig::new(100, 64, 1024)), 1);
    }

    #[test]
    fn test_fade_out_catch_up_sequence() {
        let mut legato = Legato::new(&config(), target(8.0), false);
        assert_eq!(legato.start(target(9.0)), None);

        let (gains, retriggers) = run(&mut legato, 10);
        let fade = Legato::fade_len(&config());

        let step = legato.step();
        let mut prev = 1.0;
        for g in gains.iter() {
            assert!((g - prev).abs() <= step + 1e-6);
            prev = *g;
        }

        // Silent from the end of the fade out onwards.
        assert!(gains[fade - 1] == 0.0);
        assert!(gains[fade - 2] > 0.0);
        assert!(gains[fade..].iter().all(|g| *g == 0.0));

        assert_eq!(retriggers.len(), 2);
        assert!((retriggers[0].log2_freq - 10.0).abs() < 1e-6);
        assert_eq!(retriggers[1], target(9.0));
        assert_eq!(legato.state(), LegatoState::Normal);
        assert!(legato.is_silent());
    }

    #[test]
    fn test_transition_takes_two_windows() {
        let mut legato = Legato::new(&config(), target(8.0), false);
        legato.start(target(9.0));
        let fade = Legato::fade_len(&config());

        let mut frames = 0;
        while legato.state() != LegatoState::Normal {
            let mut l = [1.0f32];
            let mut r = [1.0f32];
            legato.apply(&mut l, &mut r);
            frames += 1;
        }
        assert_eq!(frames, 2 * fade);
    }

    #[test]
    fn test_silent_note_fades_in() {
        let mut legato = Legato::new(&config(), target(8.0), true);
        assert_eq!(legato.start(target(9.0)), Some(target(9.0)));
        let (gains, retriggers) = run(&mut legato, 5);
        assert!(retriggers.is_empty());

        let fade = Legato::fade_len(&config());
        let step = legato.step();
        let mut prev = 0.0;
        for g in gains.iter() {
            assert!(*g - prev <= step + 1e-6);
            prev = *g;
        }
        assert!((gains[fade - 1] - 1.0).abs() < 1e-4);
        assert!(gains[fade..].iter().all(|g| *g == 1.0));
        assert!(!legato.is_silent());
    }

    #[test]
    fn test_pair_cross_fade_is_smooth() {
        let mut out = Legato::new(&config(), target(8.0), false);
        let mut inn = Legato::new(&config(), target(8.0), true);
        out.start(target(9.0));
        inn.start(target(9.0));
        let (a, _) = run(&mut out, 8);
        let (b, _) = run(&mut inn, 8);
        for (x, y) in a.iter().zip(b.iter()) {
            assert!((x + y - 1.0).abs() < 1e-3);
        }
    }

    #[test]
    fn test_silent_note_stays_silent() {
        let mut legato = Legato::new(&config(), target(8.0), true);
        let (gains, _) = run(&mut legato, 2);
        assert!(gains.iter().all(|g| *g == 0.0));
    }
}
