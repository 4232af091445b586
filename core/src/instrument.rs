use crate::{
    config::{SynthConfig, ThreadCount},
    controller::Controller,
    pad::{PadError, PadParams, PadSynth},
    polyphony::NoteFactory,
    voice::{AdditiveParams, AdditiveSynth, NoteTrigger, SynthNote},
};

/// Most kit items an instrument holds.
pub const MAX_KIT_ITEMS: usize = 16;

/// Which kit items play a key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum KitMode {
    /// Only the first item plays, whatever its key range.
    #[default]
    Off,
    /// Every item whose key range holds the key plays.
    Multi,
    /// The first item whose key range holds the key plays.
    Single,
}

/// One layer of an instrument: a set of engines over a key range.
#[derive(Debug, Clone)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct KitItem {
    pub enabled: bool,
    pub muted: bool,
    pub min_key: u8,
    pub max_key: u8,
    pub additive: Option<AdditiveParams>,
    pub pad: Option<PadParams>,
}

impl Default for KitItem {
    fn default() -> Self {
        Self {
            enabled: true,
            muted: false,
            min_key: 0,
            max_key: 127,
            additive: Some(AdditiveParams::default()),
            pad: None,
        }
    }
}

impl KitItem {
    pub fn engines(&self) -> usize {
        if !self.enabled {
            return 0;
        }
        self.additive.is_some() as usize + self.pad.is_some() as usize
    }

    pub fn is_active(&self) -> bool {
        self.engines() > 0
    }

    pub fn plays(&self, key: u8) -> bool {
        !self.muted && (self.min_key..=self.max_key).contains(&key)
    }
}

#[derive(Debug, Clone)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct InstrumentParams {
    pub kit_mode: KitMode,
    /// At most [`MAX_KIT_ITEMS`], extra items are ignored.
    pub items: Vec<KitItem>,
}

impl Default for InstrumentParams {
    fn default() -> Self {
        Self {
            kit_mode: KitMode::Off,
            items: vec![KitItem::default()],
        }
    }
}

/// Walks the items that play `key`, in order.
fn playing_items<'a, T>(
    mode: KitMode,
    items: impl Iterator<Item = (&'a KitItem, T)>,
    key: u8,
) -> impl Iterator<Item = (&'a KitItem, T)> {
    let mut done = false;
    items.filter_map(move |(item, extra)| {
        if done || (mode != KitMode::Off && !item.plays(key)) {
            return None;
        }
        done = mode == KitMode::Off || (mode == KitMode::Single && item.is_active());
        Some((item, extra))
    })
}

struct KitEngines {
    additive: Option<AdditiveSynth>,
    pad: Option<PadSynth>,
}

/// The engines of every kit item, ready to start notes.
pub struct Instrument {
    params: InstrumentParams,
    config: SynthConfig,
    threads: ThreadCount,
    engines: Vec<KitEngines>,
}

impl Instrument {
    /// Builds the instrument. Wavetable banks are generated in the
    /// background on `threads`.
    pub fn new(
        config: SynthConfig,
        params: InstrumentParams,
        threads: ThreadCount,
    ) -> Result<Self, PadError> {
        let mut instrument = Self {
            params: InstrumentParams {
                kit_mode: params.kit_mode,
                items: Vec::new(),
            },
            config,
            threads,
            engines: Vec::new(),
        };
        instrument.set_params(params)?;
        Ok(instrument)
    }

    pub fn params(&self) -> &InstrumentParams {
        &self.params
    }

    /// Replaces every kit item. Notes that are already playing keep the
    /// parameters they started with.
    pub fn set_params(&mut self, mut params: InstrumentParams) -> Result<(), PadError> {
        params.items.truncate(MAX_KIT_ITEMS);
        let mut engines = Vec::with_capacity(params.items.len());
        for item in params.items.iter() {
            let pad = match &item.pad {
                Some(pad) => Some(PadSynth::new(self.config, pad.clone(), self.threads)?),
                None => None,
            };
            engines.push(KitEngines {
                additive: item
                    .additive
                    .clone()
                    .map(|additive| AdditiveSynth::new(self.config, additive)),
                pad,
            });
        }
        self.engines = engines;
        self.params = params;
        Ok(())
    }

    /// Blocks until every wavetable bank is generated.
    pub fn wait_for_banks(&mut self) -> Result<(), PadError> {
        for pad in self.engines.iter_mut().filter_map(|e| e.pad.as_mut()) {
            pad.wait()?;
        }
        Ok(())
    }
}

impl NoteFactory for Instrument {
    fn usage(&self, key: u8) -> usize {
        playing_items(self.params.kit_mode, self.params.items.iter().map(|i| (i, ())), key)
            .map(|(item, _)| item.engines())
            .sum()
    }

    fn spawn(
        &mut self,
        ctl: &Controller,
        key: u8,
        trigger: NoteTrigger,
        silent: bool,
        out: &mut Vec<Box<dyn SynthNote>>,
    ) {
        let items = self.params.items.iter().zip(self.engines.iter_mut());
        for (item, engines) in playing_items(self.params.kit_mode, items, key) {
            if !item.enabled {
                continue;
            }
            if let Some(additive) = engines.additive.as_mut() {
                match additive.note(ctl, trigger, silent) {
                    Ok(note) => out.push(Box::new(note)),
                    Err(err) => log::warn!("Dropped an additive note of key {}: {}", key, err),
                }
            }
            if let Some(pad) = engines.pad.as_ref() {
                match pad.note(ctl, trigger, silent) {
                    Ok(note) => out.push(Box::new(note)),
                    Err(err) => log::warn!("Dropped a PAD note of key {}: {}", key, err),
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{helpers::key_log2_freq, pad::PadQuality};

    fn trigger(key: u8) -> NoteTrigger {
        NoteTrigger {
            log2_freq: key_log2_freq(key),
            velocity: 0.8,
            portamento: false,
            seed: 1,
        }
    }

    fn ranged(min_key: u8, max_key: u8) -> KitItem {
        KitItem {
            min_key,
            max_key,
            ..Default::default()
        }
    }

    fn spawn(instrument: &mut Instrument, key: u8) -> usize {
        let mut out = Vec::new();
        instrument.spawn(&Controller::default(), key, trigger(key), false, &mut out);
        out.len()
    }

    fn instrument(kit_mode: KitMode, items: Vec<KitItem>) -> Instrument {
        Instrument::new(
            SynthConfig::default(),
            InstrumentParams { kit_mode, items },
            ThreadCount::None,
        )
        .unwrap()
    }

    #[test]
    fn test_kit_off_uses_first_item() {
        let mut inst = instrument(KitMode::Off, vec![ranged(0, 10), ranged(0, 127)]);
        // The key range is ignored without kit mode.
        assert_eq!(inst.usage(60), 1);
        assert_eq!(spawn(&mut inst, 60), 1);
    }

    #[test]
    fn test_multi_kit_layers_items() {
        let mut inst = instrument(
            KitMode::Multi,
            vec![ranged(0, 63), ranged(60, 127), ranged(0, 127)],
        );
        assert_eq!(inst.usage(30), 2);
        assert_eq!(inst.usage(61), 3);
        assert_eq!(inst.usage(100), 2);
        assert_eq!(spawn(&mut inst, 61), 3);
    }

    #[test]
    fn test_single_kit_stops_at_first_active_item() {
        let inactive = KitItem {
            enabled: false,
            ..Default::default()
        };
        let mut inst = instrument(
            KitMode::Single,
            vec![inactive, ranged(50, 70), ranged(0, 127)],
        );
        assert_eq!(inst.usage(60), 1);
        assert_eq!(inst.usage(20), 1);
        assert_eq!(spawn(&mut inst, 60), 1);
    }

    #[test]
    fn test_muted_item_is_skipped() {
        let muted = KitItem {
            muted: true,
            ..Default::default()
        };
        let inst = instrument(KitMode::Multi, vec![muted, ranged(0, 127)]);
        assert_eq!(inst.usage(60), 1);
    }

    #[test]
    fn test_engines_are_counted_per_item() {
        let both = KitItem {
            pad: Some(PadParams {
                quality: PadQuality {
                    sample_size: 0,
                    octaves: 0,
                    samples_per_octave: 1,
                    ..Default::default()
                },
                ..Default::default()
            }),
            ..Default::default()
        };
        let mut inst = instrument(KitMode::Off, vec![both]);
        inst.wait_for_banks().unwrap();
        assert_eq!(inst.usage(60), 2);
        assert_eq!(spawn(&mut inst, 60), 2);
    }

    #[test]
    fn test_items_are_capped() {
        let inst = instrument(KitMode::Multi, vec![KitItem::default(); 20]);
        assert_eq!(inst.params().items.len(), MAX_KIT_ITEMS);
        assert_eq!(inst.usage(60), MAX_KIT_ITEMS);
    }
}
