/// Nonlinear transfer curves applied to a normalized waveform.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum WaveShapeKind {
    #[default]
    None,
    Arctangent,
    Asymmetric,
    Pow,
    Sine,
    Quantize,
    Zigzag,
    Limiter,
    UpperLimiter,
    LowerLimiter,
    InverseLimiter,
    Clip,
    Asym2,
    Pow2,
    Sigmoid,
    TanhLimiter,
    Cubic,
    Square,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct WaveShape {
    pub kind: WaveShapeKind,
    pub drive: u8,
    pub offset: u8,
    pub par: u8,
}

impl Default for WaveShape {
    fn default() -> Self {
        Self {
            kind: WaveShapeKind::None,
            drive: 64,
            offset: 64,
            par: 32,
        }
    }
}

/// Residual of the four point polyBLAMP used to round the corners of the
/// limiter curves.
fn polyblamp_residual(smp: f32, ws: f32, d_max: f32) -> f32 {
    if d_max == 0.0 {
        return 0.0;
    }
    let dist = smp.abs() - ws;
    if dist.abs() >= d_max {
        return 0.0;
    }

    let res = if dist < -d_max / 2.0 {
        let d1 = (dist + d_max) / d_max * 2.0;
        d1.powi(5) / 120.0
    } else if dist < 0.0 {
        let d1 = (dist + d_max / 2.0) / d_max * 2.0;
        -d1.powi(5) / 40.0 + d1.powi(4) / 24.0 + d1.powi(3) / 12.0 + d1.powi(2) / 12.0 + d1 / 24.0
            + 1.0 / 120.0
    } else if dist < d_max / 2.0 {
        let d1 = dist / d_max * 2.0;
        d1.powi(5) / 40.0 - d1.powi(4) / 12.0 + d1.powi(2) / 3.0 - d1 / 2.0 + 7.0 / 30.0
    } else {
        let d1 = (dist - d_max / 2.0) / d_max * 2.0;
        -d1.powi(5) / 120.0 + d1.powi(4) / 24.0 - d1.powi(3) / 12.0 + d1.powi(2) / 12.0
            - d1 / 24.0
            + 1.0 / 120.0
    };
    res * d_max / 2.0
}

fn soft_limit(x: f32, ws: f32, par: f32) -> f32 {
    let res = polyblamp_residual(x, ws, par);
    if x >= 0.0 {
        if x > ws {
            ws - res
        } else {
            x - res
        }
    } else if x < -ws {
        -ws + res
    } else {
        x + res
    }
}

fn sigmoid(x: f32) -> f32 {
    0.5 - 1.0 / (x.clamp(-10.0, 10.0).exp() + 1.0)
}

impl WaveShape {
    /// Apply the curve to every sample of the buffer in place.
    pub fn apply(&self, smps: &mut [f32]) {
        let mut ws = self.drive as f32 / 127.0;
        let mut par = self.par as f32 / 127.0;
        let offs = (self.offset as f32 - 64.0) / 64.0;

        match self.kind {
            WaveShapeKind::None => {}
            WaveShapeKind::Arctangent => {
                ws = 10f32.powf(ws * ws * 3.0) - 1.0 + 0.001;
                let norm = ws.atan();
                for s in smps.iter_mut() {
                    *s = ((*s + offs) * ws).atan() / norm - offs;
                }
            }
            WaveShapeKind::Asymmetric => {
                ws = ws * ws * 32.0 + 0.0001;
                let tmpv = if ws < 1.0 { ws.sin() + 0.1 } else { 1.1 };
                for s in smps.iter_mut() {
                    *s = (*s * (0.1 + ws - ws * *s)).sin() / tmpv;
                }
            }
            WaveShapeKind::Pow => {
                ws = ws * ws * ws * 20.0 + 0.0001;
                for s in smps.iter_mut() {
                    let x = *s * ws;
                    *s = if x.abs() < 1.0 {
                        let y = (x - x * x * x) * 3.0;
                        if ws < 1.0 {
                            y / ws
                        } else {
                            y
                        }
                    } else {
                        0.0
                    };
                }
            }
            WaveShapeKind::Sine => {
                ws = ws * ws * ws * 32.0 + 0.0001;
                let tmpv = if ws < 1.57 { ws.sin() } else { 1.0 };
                for s in smps.iter_mut() {
                    *s = (*s * ws).sin() / tmpv;
                }
            }
            WaveShapeKind::Quantize => {
                ws = ws * ws + 0.000001;
                for s in smps.iter_mut() {
                    *s = (*s / ws + 0.5).floor() * ws;
                }
            }
            WaveShapeKind::Zigzag => {
                ws = ws * ws * ws * 32.0 + 0.0001;
                let tmpv = if ws < 1.0 { ws.sin() } else { 1.0 };
                for s in smps.iter_mut() {
                    *s = (*s * ws).sin().asin() / tmpv;
                }
            }
            WaveShapeKind::Limiter => {
                ws = 2f32.powf(-ws * ws * 8.0);
                par = (par / 4.0).min(ws - 0.01).max(0.0);
                let offset_out = soft_limit(offs, ws, par);
                for s in smps.iter_mut() {
                    *s = (soft_limit(*s + offs, ws, par) - offset_out) / ws;
                }
            }
            WaveShapeKind::UpperLimiter => {
                ws = 2f32.powf(-ws * ws * 8.0);
                for s in smps.iter_mut() {
                    *s = s.min(ws) * 2.0;
                }
            }
            WaveShapeKind::LowerLimiter => {
                ws = 2f32.powf(-ws * ws * 8.0);
                for s in smps.iter_mut() {
                    *s = s.max(-ws) * 2.0;
                }
            }
            WaveShapeKind::InverseLimiter => {
                ws = (2f32.powf(ws * 6.0) - 1.0) / 2f32.powf(6.0);
                par = par.min(ws - 0.01).max(0.0);
                for s in smps.iter_mut() {
                    let x = *s + offs;
                    let res = polyblamp_residual(x, ws, par);
                    let y = if x >= 0.0 {
                        if x > ws {
                            x - ws + res
                        } else {
                            res
                        }
                    } else if x < -ws {
                        x + ws - res
                    } else {
                        -res
                    };
                    *s = y - offs;
                }
            }
            WaveShapeKind::Clip => {
                ws = 5f32.powf(ws * ws) - 1.0;
                for s in smps.iter_mut() {
                    let x = *s * (ws + 0.5) * 0.9999;
                    *s = x - (0.5 + x).floor();
                }
            }
            WaveShapeKind::Asym2 => {
                ws = ws * ws * ws * 30.0 + 0.001;
                let tmpv = if ws < 0.3 { ws } else { 1.0 };
                for s in smps.iter_mut() {
                    let x = *s * ws;
                    *s = if x > -2.0 && x < 1.0 {
                        x * (1.0 - x) * (x + 2.0) / tmpv
                    } else {
                        0.0
                    };
                }
            }
            WaveShapeKind::Pow2 => {
                ws = ws * ws * ws * 32.0 + 0.0001;
                let tmpv = if ws < 1.0 { ws * (1.0 + ws) / 2.0 } else { 1.0 };
                for s in smps.iter_mut() {
                    let x = *s * ws;
                    *s = if x > -1.0 && x < 1.618034 {
                        x * (1.0 - x) / tmpv
                    } else if x > 0.0 {
                        -1.0
                    } else {
                        -2.0
                    };
                }
            }
            WaveShapeKind::Sigmoid => {
                ws = ws.powi(5) * 80.0 + 0.0001;
                let tmpv = if ws > 10.0 { 0.5 } else { sigmoid(ws) };
                let offset_out = sigmoid(offs * ws);
                for s in smps.iter_mut() {
                    *s = (sigmoid((*s + offs) * ws) - offset_out) / tmpv;
                }
            }
            WaveShapeKind::TanhLimiter => {
                par = 20.0 * par * par + 0.1 * par + 1.0;
                ws = ws * ws * 35.0 + 1.0;
                let shape = |x: f32| x / (1.0 + x.abs().powf(par)).powf(1.0 / par);
                let offset_out = shape(offs);
                for s in smps.iter_mut() {
                    *s = shape(*s * ws + offs) - offset_out;
                }
            }
            WaveShapeKind::Cubic => {
                ws = ws * ws * ws * 20.0 + 0.168;
                let shape = |x: f32| {
                    if x.abs() < 1.0 {
                        1.5 * (x - x * x * x / 3.0)
                    } else {
                        x.signum()
                    }
                };
                let offset_out = 1.5 * (offs - offs * offs * offs / 3.0);
                for s in smps.iter_mut() {
                    *s = shape(*s * ws + offs) - offset_out;
                }
            }
            WaveShapeKind::Square => {
                ws = ws * ws * ws * 20.0 + 0.168;
                let shape = |x: f32| {
                    if x.abs() < 1.0 {
                        x * (2.0 - x.abs())
                    } else {
                        x.signum()
                    }
                };
                let offset_out = offs * (2.0 - offs.abs());
                for s in smps.iter_mut() {
                    *s = shape(*s * ws + offs) - offset_out;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_arctangent_is_odd_without_offset() {
        let shape = WaveShape {
            kind: WaveShapeKind::Arctangent,
            drive: 90,
            ..Default::default()
        };
        let mut smps = vec![-0.5, 0.5, 1.0, -1.0];
        shape.apply(&mut smps);
        assert!((smps[0] + smps[1]).abs() < 1e-6);
        assert!((smps[2] - 1.0).abs() < 1e-5);
    }

    #[test]
    fn test_limiter_is_bounded() {
        let shape = WaveShape {
            kind: WaveShapeKind::Limiter,
            drive: 64,
            ..Default::default()
        };
        let mut smps: Vec<f32> = (0..64).map(|i| (i as f32 / 32.0) - 1.0).collect();
        shape.apply(&mut smps);
        for s in smps {
            assert!(s.is_finite());
            assert!(s.abs() <= 1.0 + 1e-4);
        }
    }
}
