use std::f32::consts::PI;

/// The catalogue of base waveforms a harmonic table can be built on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum BaseFunction {
    /// The closed form case, harmonics are inserted directly as sines.
    #[default]
    Sine,
    Triangle,
    Pulse,
    Saw,
    Power,
    Gauss,
    Diode,
    AbsSine,
    PulseSine,
    StretchSine,
    Chirp,
    AbsStretchSine,
    Chebyshev,
    Sqr,
    Spike,
    Circle,
}

/// Phase warping applied before a base function (or a finished waveform)
/// is evaluated.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum PhaseModulation {
    #[default]
    None,
    Rev,
    Sine,
    Power,
}

/// Phase warping with its three raw `0..=127` parameters.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct PhaseWarp {
    pub kind: PhaseModulation,
    pub par1: u8,
    pub par2: u8,
    pub par3: u8,
}

/// Scaled warp parameters, ready to be applied to a phase.
#[derive(Debug, Clone, Copy)]
pub(crate) struct WarpCoefficients {
    kind: PhaseModulation,
    p1: f32,
    p2: f32,
    p3: f32,
}

impl PhaseWarp {
    /// Coefficients for warping a base function.
    pub(crate) fn base_coefficients(&self) -> WarpCoefficients {
        self.coefficients(5.0, 7.0, 10.0, self.par2 as f32 / 127.0)
    }

    /// Coefficients for warping a finished waveform. The depth curves are
    /// steeper and the offset is centered.
    pub(crate) fn oscil_coefficients(&self) -> WarpCoefficients {
        self.coefficients(7.0, 9.0, 100.0, 0.5 - self.par2 as f32 / 127.0)
    }

    fn coefficients(&self, exp: f32, power_exp: f32, div: f32, p2: f32) -> WarpCoefficients {
        let mut p1 = self.par1 as f32 / 127.0;
        let mut p3 = self.par3 as f32 / 127.0;
        match self.kind {
            PhaseModulation::None => {}
            PhaseModulation::Rev => {
                p1 = (2f32.powf(p1 * exp) - 1.0) / div;
                p3 = (2f32.powf(p3 * 5.0) - 1.0).floor();
                if p3 < 0.9999 {
                    p3 = -1.0;
                }
            }
            PhaseModulation::Sine => {
                p1 = (2f32.powf(p1 * exp) - 1.0) / div;
                p3 = 1.0 + (2f32.powf(p3 * 5.0) - 1.0).floor();
            }
            PhaseModulation::Power => {
                p1 = (2f32.powf(p1 * power_exp) - 1.0) / div;
                p3 = 0.01 + (2f32.powf(p3 * 16.0) - 1.0) / 10.0;
            }
        }
        WarpCoefficients {
            kind: self.kind,
            p1,
            p2,
            p3,
        }
    }
}

impl WarpCoefficients {
    /// Warp a phase in `[0, 1)`, wrapping the result back into `[0, 1)`.
    pub(crate) fn warp(&self, t: f32) -> f32 {
        let t = match self.kind {
            PhaseModulation::None => t,
            PhaseModulation::Rev => t * self.p3 + ((t + self.p2) * 2.0 * PI).sin() * self.p1,
            PhaseModulation::Sine => t + ((t * self.p3 + self.p2) * 2.0 * PI).sin() * self.p1,
            PhaseModulation::Power => {
                t + ((1.0 - ((t + self.p2) * 2.0 * PI).cos()) * 0.5).powf(self.p3) * self.p1
            }
        };
        let t = t - t.floor();
        if t >= 1.0 {
            0.0
        } else {
            t
        }
    }
}

/// Convert the raw shape knob into the function parameter.
#[inline(always)]
pub fn shape_parameter(par: u8) -> f32 {
    if par == 64 {
        0.5
    } else {
        (par as f32 + 0.5) / 128.0
    }
}

impl BaseFunction {
    /// Evaluate the function at phase `x` in `[0, 1)` with shape `a`.
    pub fn eval(&self, x: f32, a: f32) -> f32 {
        match self {
            BaseFunction::Sine => (2.0 * PI * x).sin(),
            BaseFunction::Triangle => triangle(x, a),
            BaseFunction::Pulse => {
                if x.rem_euclid(1.0) < a {
                    -1.0
                } else {
                    1.0
                }
            }
            BaseFunction::Saw => saw(x, a),
            BaseFunction::Power => {
                let a = a.clamp(0.00001, 0.99999);
                x.rem_euclid(1.0).powf(((a - 0.5) * 10.0).exp()) * 2.0 - 1.0
            }
            BaseFunction::Gauss => {
                let x = x.rem_euclid(1.0) * 2.0 - 1.0;
                let a = a.max(0.00001);
                (-x * x * ((a * 8.0).exp() + 5.0)).exp() * 2.0 - 1.0
            }
            BaseFunction::Diode => {
                let a = a.clamp(0.00001, 0.99999) * 2.0 - 1.0;
                let x = (((x + 0.5) * 2.0 * PI).cos() - a).max(0.0);
                x / (1.0 - a) * 2.0 - 1.0
            }
            BaseFunction::AbsSine => {
                let a = a.clamp(0.00001, 0.99999);
                (x.rem_euclid(1.0).powf(((a - 0.5) * 5.0).exp()) * PI).sin() * 2.0 - 1.0
            }
            BaseFunction::PulseSine => {
                let a = a.max(0.00001);
                let x = ((x.rem_euclid(1.0) - 0.5) * ((a - 0.5) * 128f32.ln()).exp())
                    .clamp(-0.5, 0.5);
                (x * PI * 2.0).sin()
            }
            BaseFunction::StretchSine => {
                let x = (x + 0.5).rem_euclid(1.0) * 2.0 - 1.0;
                let mut a = (a - 0.5) * 4.0;
                if a > 0.0 {
                    a *= 2.0;
                }
                let b = x.abs().powf(3f32.powf(a)).copysign(x);
                -(b * PI).sin()
            }
            BaseFunction::Chirp => {
                let x = x.rem_euclid(1.0) * 2.0 * PI;
                let mut a = (a - 0.5) * 4.0;
                if a < 0.0 {
                    a *= 2.0;
                }
                let a = 3f32.powf(a);
                (x / 2.0).sin() * (a * x * x).sin()
            }
            BaseFunction::AbsStretchSine => {
                let x = (x + 0.5).rem_euclid(1.0) * 2.0 - 1.0;
                let a = 3f32.powf((a - 0.5) * 9.0);
                let b = x.abs().powf(a).copysign(x);
                -(b * PI).sin().powi(2)
            }
            BaseFunction::Chebyshev => {
                let a = a * a * a * 30.0 + 1.0;
                ((x * 2.0 - 1.0).clamp(-1.0, 1.0).acos() * a).cos()
            }
            BaseFunction::Sqr => {
                let a = a * a * a * a * 160.0 + 0.001;
                -((x * 2.0 * PI).sin() * a).atan()
            }
            BaseFunction::Spike => spike(x, a),
            BaseFunction::Circle => circle(x, a),
        }
    }
}

fn triangle(x: f32, a: f32) -> f32 {
    let x = (x + 0.25).rem_euclid(1.0);
    let a = (1.0 - a).max(0.00001);
    let x = if x < 0.5 {
        x * 4.0 - 1.0
    } else {
        (1.0 - x) * 4.0 - 1.0
    };
    (x / -a).clamp(-1.0, 1.0)
}

fn saw(x: f32, a: f32) -> f32 {
    let a = a.clamp(0.00001, 0.99999);
    let x = x.rem_euclid(1.0);
    if x < a {
        x / a * 2.0 - 1.0
    } else {
        (1.0 - x) / (1.0 - a) * 2.0 - 1.0
    }
}

fn spike(x: f32, a: f32) -> f32 {
    let b = a * 0.66666;
    if b <= 0.0 {
        return 0.0;
    }
    if x < 0.5 {
        if x < 0.5 - b / 2.0 {
            0.0
        } else {
            (x + b / 2.0 - 0.5) * (2.0 / b) * (2.0 / b)
        }
    } else if x > 0.5 + b / 2.0 {
        0.0
    } else {
        (1.0 - (x - 0.5) * (2.0 / b)) * (2.0 / b)
    }
}

fn circle(x: f32, a: f32) -> f32 {
    let b = 2.0 - a * 2.0;
    let x = x * 4.0;
    let (x, sign) = if x < 2.0 { (x - 1.0, 1.0) } else { (x - 3.0, -1.0) };
    if x < -b || x > b || b <= 0.0 {
        0.0
    } else {
        sign * (1.0 - x * x / (b * b)).max(0.0).sqrt()
    }
}

/// Fill `smps` with one period of the base function, applying the phase warp.
pub fn render_base_function(func: BaseFunction, par: u8, warp: &PhaseWarp, smps: &mut [f32]) {
    let a = shape_parameter(par);
    let coefficients = warp.base_coefficients();
    let n = smps.len() as f32;
    for (i, s) in smps.iter_mut().enumerate() {
        let t = coefficients.warp(i as f32 / n);
        *s = func.eval(t, a);
    }
}
