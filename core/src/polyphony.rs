use rand::{Rng, SeedableRng};

use crate::{
    config::SynthConfig,
    controller::{Controller, Portamento},
    helpers::{sum_into, NoteRng},
    voice::{NoteError, NoteTrigger, ReleaseType, SynthNote},
};

/// Most note groups a part can hold at once.
pub const POLYPHONY: usize = 60;

/// Average amount of notes a group is expected to hold. Together with
/// [`POLYPHONY`] it bounds the amount of notes of a part.
pub const EXPECTED_USAGE: usize = 3;

/// Key limit used when the configured one is 0.
pub const DEFAULT_KEY_LIMIT: usize = POLYPHONY - 5;

/// Builds the notes that a key starts.
pub trait NoteFactory {
    /// Amount of notes a key would start.
    fn usage(&self, key: u8) -> usize;

    /// Pushes the notes started by `key` onto `out`. A note that fails to
    /// build is left out.
    fn spawn(
        &mut self,
        ctl: &Controller,
        key: u8,
        trigger: NoteTrigger,
        silent: bool,
        out: &mut Vec<Box<dyn SynthNote>>,
    );
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum PolyMode {
    #[default]
    Poly,
    /// One note at a time. A new key moves the sounding note with a short
    /// fade out and a silent retrigger.
    Mono,
    /// One note at a time, crossfaded into a silent pair on every new key.
    Legato,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct PolyphonyOptions {
    pub mode: PolyMode,
    /// Keep notes playing after their key is released until the next note.
    pub latch: bool,
    /// Most keys playing at once, 0 uses [`DEFAULT_KEY_LIMIT`].
    pub key_limit: u8,
    /// Most notes playing at once, 0 disables the limit.
    pub voice_limit: u8,
}

/// Where a group of notes is in its lifetime.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeyState {
    Playing,
    /// The key was released while the sustain pedal was held.
    Sustained,
    Released,
    /// Stolen, ends on the next block.
    Entombed,
    /// The key was released in latch mode.
    Latched,
}

impl KeyState {
    /// Whether the group still counts as a held key.
    #[inline(always)]
    fn running(self) -> bool {
        matches!(
            self,
            KeyState::Playing | KeyState::Sustained | KeyState::Latched
        )
    }

    #[inline(always)]
    fn dying(self) -> bool {
        matches!(self, KeyState::Released | KeyState::Entombed)
    }
}

/// The notes started by one note on event.
struct NoteGroup {
    key: u8,
    state: KeyState,
    sustainable: bool,
    /// Blocks rendered since the group started.
    age: u64,
    /// The silent half of a legato pair.
    legato_mirror: bool,
    notes: Vec<Box<dyn SynthNote>>,
}

impl NoteGroup {
    fn release(&mut self) {
        self.state = KeyState::Released;
        for note in self.notes.iter_mut() {
            note.signal_release(ReleaseType::Standard);
        }
    }

    fn entomb(&mut self) {
        self.state = KeyState::Entombed;
        for note in self.notes.iter_mut() {
            note.signal_release(ReleaseType::Kill);
        }
    }
}

#[derive(Debug, Clone, Copy, Default)]
struct MonoEntry {
    velocity: f32,
    log2_freq: f32,
}

/// Decides which notes of a part exist: starts, releases, steals and moves
/// them according to the play mode, the pedals and the limits.
pub struct PolyphonyManager {
    config: SynthConfig,
    options: PolyphonyOptions,
    groups: Vec<NoteGroup>,

    mono_memory: Vec<u8>,
    mono_entries: [MonoEntry; 128],
    last_key: Option<u8>,
    last_log2_freq: Option<f32>,
    legato_valid: bool,

    portamento: Portamento,
    kill_all: bool,
    rng: NoteRng,

    note_left: Vec<f32>,
    note_right: Vec<f32>,
}

impl PolyphonyManager {
    pub fn new(config: SynthConfig, options: PolyphonyOptions) -> Self {
        Self {
            config,
            options,
            groups: Vec::with_capacity(POLYPHONY),
            mono_memory: Vec::with_capacity(128),
            mono_entries: [MonoEntry::default(); 128],
            last_key: None,
            last_log2_freq: None,
            legato_valid: false,
            portamento: Portamento::new(),
            kill_all: false,
            rng: NoteRng::seed_from_u64(0),
            note_left: vec![0.0; config.buffer_size],
            note_right: vec![0.0; config.buffer_size],
        }
    }

    pub fn options(&self) -> PolyphonyOptions {
        self.options
    }

    /// Applies new options. A lower voice limit steals notes right away.
    pub fn set_options(&mut self, options: PolyphonyOptions) {
        self.options = options;
        if options.mode == PolyMode::Poly {
            self.mono_memory.clear();
        }
        if self.options.voice_limit != 0 {
            self.limit_voices(None, 0);
        }
    }

    /// Reseeds the random source of new notes.
    pub fn seed(&mut self, seed: u64) {
        self.rng = NoteRng::seed_from_u64(seed);
    }

    pub fn portamento(&self) -> &Portamento {
        &self.portamento
    }

    /// Held keys in the order they were pressed, in mono and legato modes.
    pub fn mono_memory(&self) -> &[u8] {
        &self.mono_memory
    }

    /// Amount of keys that are held, sustained or latched.
    pub fn running_keys(&self) -> usize {
        let mut seen = [false; 128];
        let mut count = 0;
        for group in self.groups.iter().filter(|g| g.state.running()) {
            let seen = &mut seen[group.key as usize & 0x7F];
            if !*seen {
                *seen = true;
                count += 1;
            }
        }
        count
    }

    /// Amount of notes that count against the voice limit, the silent
    /// legato pairs included.
    pub fn running_voices(&self) -> usize {
        self.groups
            .iter()
            .filter(|g| g.state != KeyState::Entombed)
            .map(|g| g.notes.len())
            .sum()
    }

    /// Amount of notes that exist, including dying ones.
    pub fn note_count(&self) -> usize {
        self.groups.iter().map(|g| g.notes.len()).sum()
    }

    pub fn key_state(&self, key: u8) -> Option<KeyState> {
        self.groups
            .iter()
            .rev()
            .find(|g| g.key == key && !g.legato_mirror)
            .map(|g| g.state)
    }

    fn has_running_note(&self) -> bool {
        self.groups.iter().any(|g| g.state.running())
    }

    fn pool_full(&self, usage: usize) -> bool {
        self.groups.len() >= POLYPHONY
            || self.note_count() + usage > POLYPHONY * EXPECTED_USAGE
    }

    fn mono(&self) -> bool {
        self.options.mode == PolyMode::Mono
    }

    fn legato_mode(&self) -> bool {
        self.options.mode == PolyMode::Legato
    }

    fn push_mono_memory(&mut self, key: u8) {
        self.mono_memory.retain(|k| *k != key);
        self.mono_memory.push(key);
    }

    fn pop_mono_memory(&mut self, key: u8) {
        self.mono_memory.retain(|k| *k != key);
    }

    /// Starts a key. `velocity` is the sensed velocity in `0..=1` and
    /// `log2_freq` the tuned pitch of the key.
    pub fn note_on(
        &mut self,
        factory: &mut dyn NoteFactory,
        ctl: &Controller,
        key: u8,
        velocity: f32,
        log2_freq: f32,
    ) -> Result<(), NoteError> {
        let key = key & 0x7F;
        let running = self.has_running_note();
        let doing_legato = running
            && match self.options.mode {
                PolyMode::Poly => false,
                PolyMode::Mono => true,
                PolyMode::Legato => self.legato_valid,
            };

        let usage = factory.usage(key);
        if self.pool_full(usage) {
            return Err(NoteError::PoolFull);
        }
        // A legato key starts a silent pair next to the audible notes.
        let needed = if self.legato_mode() { usage * 2 } else { usage };
        let voice_limit = self.options.voice_limit as usize;
        if voice_limit != 0 && needed > voice_limit && !doing_legato {
            log::warn!(
                "Key {} needs {} voices, more than the limit of {}",
                key,
                needed,
                voice_limit
            );
            return Err(NoteError::PoolFull);
        }

        if self.mono() || self.legato_mode() {
            self.push_mono_memory(key);
            self.mono_entries[key as usize] = MonoEntry {
                velocity,
                log2_freq,
            };
        } else {
            self.mono_memory.clear();
        }

        if (self.mono() || self.legato_mode()) && !doing_legato {
            for group in self.groups.iter_mut().filter(|g| g.state.running()) {
                group.release();
            }
        }
        self.legato_valid = self.legato_mode();
        self.last_key = Some(key);

        let from = self.last_log2_freq.unwrap_or(log2_freq);
        let glides = (self.options.mode == PolyMode::Poly || running)
            && self.portamento.start(
                &ctl.portamento,
                ctl.portamento_enabled(),
                &self.config,
                running,
                from,
                log2_freq,
            );
        self.last_log2_freq = Some(log2_freq);

        let trigger = NoteTrigger {
            log2_freq,
            velocity,
            portamento: glides,
            seed: self.rng.gen(),
        };

        if doing_legato {
            for group in self.groups.iter_mut().filter(|g| !g.state.dying()) {
                group.key = key;
                for note in group.notes.iter_mut() {
                    note.legato(trigger);
                }
            }
            return Ok(());
        }

        if self.options.mode == PolyMode::Poly {
            self.make_unsustainable(key);
        }
        if self.options.latch {
            for group in self
                .groups
                .iter_mut()
                .filter(|g| g.state == KeyState::Latched)
            {
                group.release();
            }
        }

        self.limit_voices(Some(key), needed);
        self.spawn_group(factory, ctl, key, trigger, false)?;
        if self.legato_mode() && self.groups.len() < POLYPHONY {
            // The silent half failing only costs the smooth transition.
            if let Err(err) = self.spawn_group(factory, ctl, key, trigger, true) {
                log::warn!("Failed to start the legato pair of key {}: {}", key, err);
            }
        }

        self.enforce_key_limit();
        Ok(())
    }

    fn spawn_group(
        &mut self,
        factory: &mut dyn NoteFactory,
        ctl: &Controller,
        key: u8,
        trigger: NoteTrigger,
        silent: bool,
    ) -> Result<(), NoteError> {
        let mut notes = Vec::new();
        factory.spawn(ctl, key, trigger, silent, &mut notes);
        if notes.is_empty() {
            return Err(NoteError::NoVoices);
        }

        self.groups.push(NoteGroup {
            key,
            state: KeyState::Playing,
            sustainable: true,
            age: 0,
            legato_mirror: silent,
            notes,
        });
        Ok(())
    }

    fn make_unsustainable(&mut self, key: u8) {
        for group in self.groups.iter_mut().filter(|g| g.key == key) {
            group.sustainable = false;
            if group.state == KeyState::Sustained {
                group.release();
            }
        }
    }

    /// Releases a key, honoring the sustain pedal, latch and mono memory.
    pub fn note_off(&mut self, factory: &mut dyn NoteFactory, ctl: &Controller, key: u8) {
        let key = key & 0x7F;
        if !self.mono_memory.is_empty() {
            self.pop_mono_memory(key);
        }

        let renote = (self.mono() || self.legato_mode()) && !self.mono_memory.is_empty();
        let mut wants_renote = false;
        for group in self
            .groups
            .iter_mut()
            .filter(|g| g.key == key && g.state == KeyState::Playing)
        {
            if self.options.latch {
                group.state = KeyState::Latched;
            } else if !ctl.sustain() {
                if renote {
                    wants_renote = true;
                } else {
                    group.release();
                }
            } else if group.sustainable {
                group.state = KeyState::Sustained;
            } else {
                group.release();
            }
        }

        if wants_renote {
            self.mono_renote(factory, ctl);
        }
    }

    /// Plays the most recent key that is still held.
    fn mono_renote(&mut self, factory: &mut dyn NoteFactory, ctl: &Controller) {
        let Some(&key) = self.mono_memory.last() else {
            return;
        };
        self.pop_mono_memory(key);
        let entry = self.mono_entries[key as usize];
        log::trace!("Renoting held key {}", key);
        if let Err(err) = self.note_on(factory, ctl, key, entry.velocity, entry.log2_freq) {
            log::debug!("Failed to renote key {}: {}", key, err);
        }
    }

    /// The sustain pedal went up.
    pub fn release_sustained(&mut self, factory: &mut dyn NoteFactory, ctl: &Controller) {
        if (self.mono() || self.legato_mode())
            && self.mono_memory.last().is_some_and(|k| Some(*k) != self.last_key)
        {
            self.mono_renote(factory, ctl);
        }

        for group in self
            .groups
            .iter_mut()
            .filter(|g| g.state == KeyState::Sustained)
        {
            group.release();
        }
    }

    /// Releases every note that hasn't been released yet.
    pub fn release_all(&mut self) {
        for group in self
            .groups
            .iter_mut()
            .filter(|g| g.state != KeyState::Released)
        {
            group.release();
        }
    }

    /// Silences the part over the next block.
    pub fn kill_all(&mut self) {
        self.kill_all = true;
    }

    /// Drops every note right away.
    pub fn clear(&mut self) {
        self.groups.clear();
        self.mono_memory.clear();
        self.kill_all = false;
    }

    fn playing_notes_mut(
        &mut self,
        key: u8,
    ) -> impl Iterator<Item = &mut Box<dyn SynthNote>> + '_ {
        self.groups
            .iter_mut()
            .filter(move |g| g.key == key && g.state == KeyState::Playing)
            .flat_map(|g| g.notes.iter_mut())
    }

    /// Polyphonic aftertouch.
    pub fn set_velocity(&mut self, key: u8, velocity: f32) {
        if self.options.mode != PolyMode::Poly {
            self.mono_entries[key as usize & 0x7F].velocity = velocity;
        }
        for note in self.playing_notes_mut(key) {
            note.set_velocity(velocity);
        }
    }

    pub fn set_pitch(&mut self, key: u8, log2_freq: f32) {
        if self.options.mode != PolyMode::Poly {
            self.mono_entries[key as usize & 0x7F].log2_freq = log2_freq;
        }
        for note in self.playing_notes_mut(key) {
            note.set_pitch(log2_freq);
        }
    }

    pub fn set_filter_cutoff(&mut self, key: u8, octaves: f32) {
        for note in self.playing_notes_mut(key) {
            note.set_filter_cutoff(octaves);
        }
    }

    /// Steals notes so that `incoming` more fit under the voice limit.
    fn limit_voices(&mut self, preferred: Option<u8>, incoming: usize) {
        let limit = self.options.voice_limit as usize;
        if limit == 0 {
            return;
        }
        while self.running_voices() + incoming > limit {
            let Some(index) = self.steal_candidate(preferred) else {
                break;
            };
            log::trace!("Stealing key {}", self.groups[index].key);
            self.groups[index].entomb();
            self.entomb_mirror_of(index);
        }
    }

    /// Entombs the legato pair of a stolen group.
    fn entomb_mirror_of(&mut self, index: usize) {
        let key = self.groups[index].key;
        for group in self
            .groups
            .iter_mut()
            .filter(|g| g.legato_mirror && g.key == key && g.state != KeyState::Entombed)
        {
            group.entomb();
        }
    }

    /// The least intrusive group to steal: released before sustained before
    /// latched before playing, the oldest first, preferring the same key.
    /// A silent pair is only taken on its own once its audible half is gone.
    fn steal_candidate(&self, preferred: Option<u8>) -> Option<usize> {
        let rank = |state: KeyState| match state {
            KeyState::Released => Some(0),
            KeyState::Sustained => Some(1),
            KeyState::Latched => Some(2),
            KeyState::Playing => Some(3),
            KeyState::Entombed => None,
        };
        self.groups
            .iter()
            .enumerate()
            .filter_map(|(i, g)| rank(g.state).map(|r| (i, r, g)))
            .min_by(|(_, ra, a), (_, rb, b)| {
                ra.cmp(rb)
                    .then_with(|| (Some(b.key) == preferred).cmp(&(Some(a.key) == preferred)))
                    .then_with(|| b.age.cmp(&a.age))
                    .then_with(|| a.legato_mirror.cmp(&b.legato_mirror))
            })
            .map(|(i, _, _)| i)
    }

    fn enforce_key_limit(&mut self) {
        let limit = match self.options.key_limit {
            0 => DEFAULT_KEY_LIMIT,
            limit => limit as usize,
        };
        while self.running_keys() > limit {
            // Oldest running group, or the oldest of any when none runs.
            let Some(index) = self
                .groups
                .iter()
                .enumerate()
                .filter(|(_, g)| g.state.running() && !g.legato_mirror)
                .max_by_key(|(_, g)| g.age)
                .map(|(i, _)| i)
            else {
                break;
            };
            let group = &mut self.groups[index];
            if group.state == KeyState::Sustained {
                group.notes.clear();
                group.state = KeyState::Entombed;
            } else {
                group.entomb();
            }
            self.entomb_mirror_of(index);
        }
    }

    /// Renders one block of every note into `left` and `right`, adding to
    /// their content.
    pub fn render(&mut self, ctl: &Controller, left: &mut [f32], right: &mut [f32]) {
        let len = left.len().min(right.len()).min(self.config.buffer_size);
        let (left, right) = (&mut left[..len], &mut right[..len]);
        let (note_left, note_right) = (&mut self.note_left[..len], &mut self.note_right[..len]);

        for group in self.groups.iter_mut() {
            group.age += 1;
            for note in group.notes.iter_mut() {
                note.noteout(ctl, &self.portamento, note_left, note_right);
                sum_into(note_left, left);
                sum_into(note_right, right);
            }
            group.notes.retain(|n| !n.finished());
        }
        self.groups.retain(|g| !g.notes.is_empty());

        if self.kill_all {
            for (i, (l, r)) in left.iter_mut().zip(right.iter_mut()).enumerate() {
                let fade = (len - i) as f32 / len as f32;
                *l *= fade;
                *r *= fade;
            }
            self.clear();
        }
        self.portamento.update();
    }
}
