mod portamento;
pub use portamento::*;

/// MIDI controller numbers understood by [`Controller::set_controller`].
pub mod cc {
    pub const MOD_WHEEL: u8 = 0x01;
    pub const DATA_ENTRY_MSB: u8 = 0x06;
    pub const VOLUME: u8 = 0x07;
    pub const PAN: u8 = 0x0A;
    pub const EXPRESSION: u8 = 0x0B;
    pub const DATA_ENTRY_LSB: u8 = 0x26;
    pub const SUSTAIN: u8 = 0x40;
    pub const PORTAMENTO: u8 = 0x41;
    pub const FILTER_Q: u8 = 0x47;
    pub const FILTER_CUTOFF: u8 = 0x4A;
    pub const BANDWIDTH: u8 = 0x4B;
    pub const FM_AMP: u8 = 0x4C;
    pub const RESONANCE_CENTER: u8 = 0x4D;
    pub const RESONANCE_BANDWIDTH: u8 = 0x4E;
    pub const RPN_LSB: u8 = 0x64;
    pub const RPN_MSB: u8 = 0x65;
    pub const ALL_SOUNDS_OFF: u8 = 0x78;
    pub const RESET_ALL_CONTROLLERS: u8 = 0x79;
    pub const ALL_NOTES_OFF: u8 = 0x7B;
}

/// How strongly each controller acts, and which ones are received.
#[derive(Debug, Clone, Copy, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct ControllerParams {
    /// Pitch wheel range in cents.
    pub bend_range: i16,
    pub pan_depth: u8,
    pub filter_cutoff_depth: u8,
    pub filter_q_depth: u8,
    pub bandwidth_depth: u8,
    pub bandwidth_exponential: bool,
    pub mod_wheel_depth: u8,
    pub mod_wheel_exponential: bool,
    pub resonance_center_depth: u8,
    pub resonance_bandwidth_depth: u8,
    pub receive_expression: bool,
    pub receive_fm_amp: bool,
    pub receive_volume: bool,
    pub receive_sustain: bool,
    pub receive_portamento: bool,
}

impl Default for ControllerParams {
    fn default() -> Self {
        Self {
            bend_range: 200,
            pan_depth: 64,
            filter_cutoff_depth: 64,
            filter_q_depth: 64,
            bandwidth_depth: 64,
            bandwidth_exponential: false,
            mod_wheel_depth: 80,
            mod_wheel_exponential: false,
            resonance_center_depth: 64,
            resonance_bandwidth_depth: 64,
            receive_expression: true,
            receive_fm_amp: true,
            receive_volume: true,
            receive_sustain: true,
            receive_portamento: true,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct RawValues {
    pitch_wheel: i16,
    expression: u8,
    pan: u8,
    filter_cutoff: u8,
    filter_q: u8,
    bandwidth: u8,
    mod_wheel: u8,
    fm_amp: u8,
    volume: u8,
    sustain: u8,
    portamento: u8,
    resonance_center: u8,
    resonance_bandwidth: u8,
}

impl Default for RawValues {
    fn default() -> Self {
        Self {
            pitch_wheel: 0,
            expression: 127,
            pan: 64,
            filter_cutoff: 64,
            filter_q: 64,
            bandwidth: 64,
            mod_wheel: 64,
            fm_amp: 127,
            volume: 127,
            sustain: 0,
            portamento: 0,
            resonance_center: 64,
            resonance_bandwidth: 64,
        }
    }
}

/// MIDI controller state of a part and the modulation values derived from
/// it. Notes read it once per block.
#[derive(Debug, Clone)]
pub struct Controller {
    pub params: ControllerParams,
    pub portamento: PortamentoParams,

    raw: RawValues,
    rpn: (i8, i8),
    bend_range_msb: u8,
    bend_range_lsb: u8,

    pitch_bend: f32,
    expression: f32,
    pan: f32,
    filter_cutoff: f32,
    filter_q: f32,
    bandwidth: f32,
    mod_wheel: f32,
    fm_amp: f32,
    volume: f32,
    sustain: bool,
    portamento_on: bool,
    resonance_center: f32,
    resonance_bandwidth: f32,
}

impl Default for Controller {
    fn default() -> Self {
        Self::new(ControllerParams::default())
    }
}

/// Result of a controller message that the part has to act on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ControllerAction {
    None,
    SustainChanged(bool),
    AllSoundsOff,
    AllNotesOff,
}

impl Controller {
    pub fn new(params: ControllerParams) -> Self {
        let mut ctl = Self {
            params,
            portamento: PortamentoParams::default(),
            raw: RawValues::default(),
            rpn: (-1, -1),
            bend_range_msb: (params.bend_range / 100).clamp(0, 127) as u8,
            bend_range_lsb: (params.bend_range % 100).clamp(0, 127) as u8,
            pitch_bend: 1.0,
            expression: 1.0,
            pan: 0.0,
            filter_cutoff: 0.0,
            filter_q: 1.0,
            bandwidth: 1.0,
            mod_wheel: 1.0,
            fm_amp: 1.0,
            volume: 1.0,
            sustain: false,
            portamento_on: false,
            resonance_center: 1.0,
            resonance_bandwidth: 1.0,
        };
        ctl.update_all();
        ctl
    }

    /// Restores every controller to its default position.
    pub fn reset_all(&mut self) {
        self.raw = RawValues::default();
        self.rpn = (-1, -1);
        self.update_all();
    }

    fn update_all(&mut self) {
        self.update_pitch_wheel();
        self.update_expression();
        self.update_pan();
        self.update_filter_cutoff();
        self.update_filter_q();
        self.update_bandwidth();
        self.update_mod_wheel();
        self.update_fm_amp();
        self.update_volume();
        self.update_sustain();
        self.update_portamento();
        self.update_resonance();
    }

    /// Handles a MIDI control change message.
    pub fn set_controller(&mut self, controller: u8, value: u8) -> ControllerAction {
        let value = value.min(127);
        match controller {
            cc::MOD_WHEEL => {
                self.raw.mod_wheel = value;
                self.update_mod_wheel();
            }
            cc::VOLUME => {
                self.raw.volume = value;
                self.update_volume();
            }
            cc::PAN => {
                self.raw.pan = value;
                self.update_pan();
            }
            cc::EXPRESSION => {
                self.raw.expression = value;
                self.update_expression();
            }
            cc::SUSTAIN => {
                let was = self.sustain;
                self.raw.sustain = value;
                self.update_sustain();
                if was != self.sustain {
                    return ControllerAction::SustainChanged(self.sustain);
                }
            }
            cc::PORTAMENTO => {
                self.raw.portamento = value;
                self.update_portamento();
            }
            cc::FILTER_Q => {
                self.raw.filter_q = value;
                self.update_filter_q();
            }
            cc::FILTER_CUTOFF => {
                self.raw.filter_cutoff = value;
                self.update_filter_cutoff();
            }
            cc::BANDWIDTH => {
                self.raw.bandwidth = value;
                self.update_bandwidth();
            }
            cc::FM_AMP => {
                self.raw.fm_amp = value;
                self.update_fm_amp();
            }
            cc::RESONANCE_CENTER => {
                self.raw.resonance_center = value;
                self.update_resonance();
            }
            cc::RESONANCE_BANDWIDTH => {
                self.raw.resonance_bandwidth = value;
                self.update_resonance();
            }
            cc::RPN_LSB => self.rpn.0 = value as i8,
            cc::RPN_MSB => self.rpn.1 = value as i8,
            cc::DATA_ENTRY_MSB | cc::DATA_ENTRY_LSB => {
                // RPN 0, 0 is the pitch bend range
                if self.rpn == (0, 0) {
                    if controller == cc::DATA_ENTRY_MSB {
                        self.bend_range_msb = value;
                    } else {
                        self.bend_range_lsb = value;
                    }
                    self.params.bend_range =
                        self.bend_range_msb as i16 * 100 + self.bend_range_lsb as i16;
                    self.update_pitch_wheel();
                }
            }
            cc::ALL_SOUNDS_OFF => return ControllerAction::AllSoundsOff,
            cc::RESET_ALL_CONTROLLERS => {
                let was = self.sustain;
                self.reset_all();
                if was {
                    return ControllerAction::SustainChanged(false);
                }
            }
            cc::ALL_NOTES_OFF => return ControllerAction::AllNotesOff,
            _ => log::trace!("Ignoring controller {}", controller),
        }
        ControllerAction::None
    }

    /// Sets the pitch wheel, from -8192 to 8191.
    pub fn set_pitch_wheel(&mut self, value: i16) {
        self.raw.pitch_wheel = value.clamp(-8192, 8191);
        self.update_pitch_wheel();
    }

    /// Sets the pitch wheel range in cents.
    pub fn set_bend_range(&mut self, cents: i16) {
        self.params.bend_range = cents;
        self.update_pitch_wheel();
    }

    fn update_pitch_wheel(&mut self) {
        let cents = self.raw.pitch_wheel as f32 / 8192.0 * self.params.bend_range as f32;
        self.pitch_bend = 2f32.powf(cents / 1200.0);
    }

    fn update_expression(&mut self) {
        self.expression = if self.params.receive_expression {
            self.raw.expression as f32 / 127.0
        } else {
            1.0
        };
    }

    fn update_pan(&mut self) {
        self.pan =
            (self.raw.pan as f32 / 128.0 - 0.5) * (self.params.pan_depth as f32 / 64.0);
    }

    fn update_filter_cutoff(&mut self) {
        // In octaves, 3.3219 is log2(10)
        self.filter_cutoff = (self.raw.filter_cutoff as f32 - 64.0)
            * self.params.filter_cutoff_depth as f32
            / 4096.0
            * 3.321_928;
    }

    fn update_filter_q(&mut self) {
        self.filter_q = 30f32.powf(
            (self.raw.filter_q as f32 - 64.0) / 64.0 * (self.params.filter_q_depth as f32 / 64.0),
        );
    }

    fn update_bandwidth(&mut self) {
        let value = self.raw.bandwidth as f32;
        let depth = self.params.bandwidth_depth as f32;
        self.bandwidth = if self.params.bandwidth_exponential {
            25f32.powf((value - 64.0) / 64.0 * (depth / 64.0))
        } else {
            let mut scale = 25f32.powf((depth / 127.0).powf(1.5)) - 1.0;
            if value < 64.0 && depth >= 64.0 {
                scale = 1.0;
            }
            ((value / 64.0 - 1.0) * scale + 1.0).max(0.01)
        };
    }

    fn update_mod_wheel(&mut self) {
        let value = self.raw.mod_wheel as f32;
        let depth = self.params.mod_wheel_depth as f32;
        self.mod_wheel = if self.params.mod_wheel_exponential {
            25f32.powf((value - 64.0) / 64.0 * (depth / 80.0))
        } else {
            let mut scale = 25f32.powf((depth / 127.0).powf(1.5) * 2.0) / 25.0;
            if value < 64.0 && depth >= 64.0 {
                scale = 1.0;
            }
            ((value / 64.0 - 1.0) * scale + 1.0).max(0.0)
        };
    }

    fn update_fm_amp(&mut self) {
        self.fm_amp = if self.params.receive_fm_amp {
            self.raw.fm_amp as f32 / 127.0
        } else {
            1.0
        };
    }

    fn update_volume(&mut self) {
        self.volume = if self.params.receive_volume {
            self.raw.volume as f32 / 127.0
        } else {
            1.0
        };
    }

    fn update_sustain(&mut self) {
        self.sustain = self.params.receive_sustain && self.raw.sustain >= 64;
    }

    fn update_portamento(&mut self) {
        if self.params.receive_portamento {
            self.portamento_on = self.raw.portamento >= 64;
        }
    }

    fn update_resonance(&mut self) {
        self.resonance_center = 3f32.powf(
            (self.raw.resonance_center as f32 - 64.0) / 64.0
                * (self.params.resonance_center_depth as f32 / 64.0),
        );
        self.resonance_bandwidth = 1.5f32.powf(
            (self.raw.resonance_bandwidth as f32 - 64.0) / 64.0
                * (self.params.resonance_bandwidth_depth as f32 / 127.0),
        );
    }

    /// Frequency multiplier of the pitch wheel.
    #[inline(always)]
    pub fn pitch_bend(&self) -> f32 {
        self.pitch_bend
    }

    #[inline(always)]
    pub fn expression(&self) -> f32 {
        self.expression
    }

    /// Panning offset, from -0.5 to 0.5 at the default depth.
    #[inline(always)]
    pub fn pan(&self) -> f32 {
        self.pan
    }

    /// Filter cutoff offset in octaves.
    #[inline(always)]
    pub fn filter_cutoff(&self) -> f32 {
        self.filter_cutoff
    }

    /// Filter Q multiplier.
    #[inline(always)]
    pub fn filter_q(&self) -> f32 {
        self.filter_q
    }

    /// Bandwidth multiplier for unison and fine detune.
    #[inline(always)]
    pub fn bandwidth(&self) -> f32 {
        self.bandwidth
    }

    /// Depth multiplier of the frequency LFOs.
    #[inline(always)]
    pub fn mod_wheel(&self) -> f32 {
        self.mod_wheel
    }

    /// Modulator amplitude multiplier.
    #[inline(always)]
    pub fn fm_amp(&self) -> f32 {
        self.fm_amp
    }

    #[inline(always)]
    pub fn volume(&self) -> f32 {
        self.volume
    }

    #[inline(always)]
    pub fn sustain(&self) -> bool {
        self.sustain
    }

    #[inline(always)]
    pub fn portamento_enabled(&self) -> bool {
        self.portamento_on || self.portamento.enabled
    }

    #[inline(always)]
    pub fn resonance_center(&self) -> f32 {
        self.resonance_center
    }

    #[inline(always)]
    pub fn resonance_bandwidth(&self) -> f32 {
        self.resonance_bandwidth
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_are_neutral() {
        let ctl = Controller::default();
        assert_eq!(ctl.pitch_bend(), 1.0);
        assert_eq!(ctl.expression(), 1.0);
        assert_eq!(ctl.pan(), 0.0);
        assert_eq!(ctl.filter_cutoff(), 0.0);
        assert_eq!(ctl.filter_q(), 1.0);
        assert_eq!(ctl.bandwidth(), 1.0);
        assert_eq!(ctl.mod_wheel(), 1.0);
        assert_eq!(ctl.fm_amp(), 1.0);
        assert_eq!(ctl.resonance_center(), 1.0);
        assert_eq!(ctl.resonance_bandwidth(), 1.0);
        assert!(!ctl.sustain());
    }

    #[test]
    fn test_pitch_wheel() {
        let mut ctl = Controller::default();
        ctl.set_pitch_wheel(8191);
        assert!((ctl.pitch_bend() - 2f32.powf(2.0 / 12.0)).abs() < 1e-3);
        ctl.set_pitch_wheel(-8192);
        assert!((ctl.pitch_bend() - 2f32.powf(-2.0 / 12.0)).abs() < 1e-4);
    }

    #[test]
    fn test_bend_range_rpn() {
        let mut ctl = Controller::default();
        ctl.set_controller(cc::RPN_MSB, 0);
        ctl.set_controller(cc::RPN_LSB, 0);
        ctl.set_controller(cc::DATA_ENTRY_MSB, 12);
        ctl.set_controller(cc::DATA_ENTRY_LSB, 0);
        assert_eq!(ctl.params.bend_range, 1200);
        ctl.set_pitch_wheel(-8192);
        assert!((ctl.pitch_bend() - 0.5).abs() < 1e-4);
    }

    #[test]
    fn test_sustain_changes() {
        let mut ctl = Controller::default();
        assert_eq!(
            ctl.set_controller(cc::SUSTAIN, 127),
            ControllerAction::SustainChanged(true)
        );
        assert_eq!(ctl.set_controller(cc::SUSTAIN, 100), ControllerAction::None);
        assert_eq!(
            ctl.set_controller(cc::RESET_ALL_CONTROLLERS, 0),
            ControllerAction::SustainChanged(false)
        );
        assert!(!ctl.sustain());
    }

    #[test]
    fn test_filter_cutoff_is_in_octaves() {
        let mut ctl = Controller::default();
        ctl.set_controller(cc::FILTER_CUTOFF, 127);
        assert!(ctl.filter_cutoff() > 3.0 && ctl.filter_cutoff() < 3.4);
        ctl.set_controller(cc::FILTER_CUTOFF, 0);
        assert!((ctl.filter_cutoff() + 3.321_928).abs() < 1e-4);
    }

    #[test]
    fn test_mod_wheel_never_negative() {
        let mut ctl = Controller::default();
        ctl.set_controller(cc::MOD_WHEEL, 0);
        assert_eq!(ctl.mod_wheel(), 0.0);
        ctl.set_controller(cc::MOD_WHEEL, 127);
        assert!(ctl.mod_wheel() > 1.0);
    }
}
