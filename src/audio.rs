//! Note playback
//!
//! The simulation only ever calls [`AudioEngine::play_note`]. Engines:
//! - [`NoteLog`]: records every note (headless runner, tests)
//! - [`SilentAudio`]: discards everything
//! - `WebAudioSynth` (wasm only): procedural Web Audio voices, no sample
//!   files needed

use std::cell::RefCell;
use std::rc::Rc;

use crate::error::AudioError;

/// Anything that can play a MIDI note.
pub trait AudioEngine {
    /// Select an instrument preset.
    fn load(&mut self, instrument: &str) -> Result<(), AudioError>;

    /// Play a note.
    ///
    /// `pitch` and `velocity` are MIDI values (0-127), `duration` is in
    /// seconds.
    fn play_note(&mut self, pitch: u8, velocity: u8, duration: f32);
}

/// Audio engine shared between the simulation and the application layer.
pub type SharedAudio = Rc<RefCell<dyn AudioEngine>>;

/// Instrument presets understood by the built-in engines
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Instrument {
    /// Mellow struck bar (triangle, fast decay)
    #[default]
    Marimba,
    /// Pure tone with a long tail
    Sine,
    /// Hollow square lead
    Square,
    /// Bright saw
    Sawtooth,
}

impl Instrument {
    pub fn as_str(&self) -> &'static str {
        match self {
            Instrument::Marimba => "marimba",
            Instrument::Sine => "sine",
            Instrument::Square => "square",
            Instrument::Sawtooth => "sawtooth",
        }
    }

    pub fn from_name(name: &str) -> Option<Self> {
        match name.to_lowercase().as_str() {
            "marimba" => Some(Instrument::Marimba),
            "sine" => Some(Instrument::Sine),
            "square" => Some(Instrument::Square),
            "sawtooth" | "saw" => Some(Instrument::Sawtooth),
            _ => None,
        }
    }

    /// Fraction of the note length the voice rings before it is cut
    pub fn release_factor(&self) -> f64 {
        match self {
            Instrument::Marimba => 1.5,
            Instrument::Sine => 3.0,
            Instrument::Square | Instrument::Sawtooth => 1.0,
        }
    }
}

/// Equal-temperament frequency of a MIDI note (A4 = 69 = 440 Hz)
pub fn midi_to_frequency(pitch: u8) -> f32 {
    440.0 * 2f32.powf((pitch as f32 - 69.0) / 12.0)
}

/// Gain for a MIDI velocity
pub fn velocity_to_gain(velocity: u8) -> f32 {
    velocity.min(127) as f32 / 127.0
}

/// A note that was played
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct NoteEvent {
    pub pitch: u8,
    pub velocity: u8,
    pub duration: f32,
}

/// Records played notes.
///
/// Clones share the same log, so a caller can keep one clone and hand
/// another to the simulation.
#[derive(Debug, Clone, Default)]
pub struct NoteLog {
    notes: Rc<RefCell<Vec<NoteEvent>>>,
    instrument: Rc<RefCell<Option<Instrument>>>,
}

impl NoteLog {
    pub fn new() -> Self {
        Self::default()
    }

    /// All notes played so far, oldest first
    pub fn notes(&self) -> Vec<NoteEvent> {
        self.notes.borrow().clone()
    }

    pub fn len(&self) -> usize {
        self.notes.borrow().len()
    }

    pub fn is_empty(&self) -> bool {
        self.notes.borrow().is_empty()
    }

    pub fn clear(&self) {
        self.notes.borrow_mut().clear();
    }

    pub fn instrument(&self) -> Option<Instrument> {
        *self.instrument.borrow()
    }
}

impl AudioEngine for NoteLog {
    fn load(&mut self, instrument: &str) -> Result<(), AudioError> {
        let preset = Instrument::from_name(instrument)
            .ok_or_else(|| AudioError::UnknownInstrument(instrument.to_string()))?;
        *self.instrument.borrow_mut() = Some(preset);
        log::info!("Instrument loaded: {}", preset.as_str());
        Ok(())
    }

    fn play_note(&mut self, pitch: u8, velocity: u8, duration: f32) {
        log::debug!("Note: pitch {pitch} velocity {velocity} for {duration}s");
        self.notes.borrow_mut().push(NoteEvent {
            pitch,
            velocity,
            duration,
        });
    }
}

/// Discards every note.
#[derive(Debug, Clone, Copy, Default)]
pub struct SilentAudio;

impl AudioEngine for SilentAudio {
    fn load(&mut self, _instrument: &str) -> Result<(), AudioError> {
        Ok(())
    }

    fn play_note(&mut self, _pitch: u8, _velocity: u8, _duration: f32) {}
}

#[cfg(target_arch = "wasm32")]
pub use web_synth::WebAudioSynth;

#[cfg(target_arch = "wasm32")]
mod web_synth {
    use web_sys::{AudioContext, GainNode, OscillatorNode, OscillatorType};

    use super::{AudioEngine, Instrument, midi_to_frequency, velocity_to_gain};
    use crate::error::AudioError;

    /// Web Audio voice per note: one oscillator through a decaying gain.
    pub struct WebAudioSynth {
        ctx: Option<AudioContext>,
        instrument: Instrument,
        master_volume: f32,
        muted: bool,
    }

    impl Default for WebAudioSynth {
        fn default() -> Self {
            Self::new()
        }
    }

    impl WebAudioSynth {
        pub fn new() -> Self {
            // May fail outside a secure context
            let ctx = AudioContext::new().ok();
            if ctx.is_none() {
                log::warn!("Failed to create AudioContext - audio disabled");
            }
            Self {
                ctx,
                instrument: Instrument::default(),
                master_volume: 0.8,
                muted: false,
            }
        }

        /// Resume audio context (required after user gesture)
        pub fn resume(&self) {
            if let Some(ctx) = &self.ctx {
                let _ = ctx.resume();
            }
        }

        /// Set master volume (0.0 - 1.0)
        pub fn set_master_volume(&mut self, vol: f32) {
            self.master_volume = vol.clamp(0.0, 1.0);
        }

        pub fn set_muted(&mut self, muted: bool) {
            self.muted = muted;
        }

        fn effective_volume(&self) -> f32 {
            if self.muted { 0.0 } else { self.master_volume }
        }

        fn oscillator_type(&self) -> OscillatorType {
            match self.instrument {
                Instrument::Marimba => OscillatorType::Triangle,
                Instrument::Sine => OscillatorType::Sine,
                Instrument::Square => OscillatorType::Square,
                Instrument::Sawtooth => OscillatorType::Sawtooth,
            }
        }

        /// Create an oscillator wired through a gain node to the output
        fn create_osc(
            &self,
            ctx: &AudioContext,
            freq: f32,
            osc_type: OscillatorType,
        ) -> Option<(OscillatorNode, GainNode)> {
            let osc = ctx.create_oscillator().ok()?;
            let gain = ctx.create_gain().ok()?;

            osc.set_type(osc_type);
            osc.frequency().set_value(freq);
            osc.connect_with_audio_node(&gain).ok()?;
            gain.connect_with_audio_node(&ctx.destination()).ok()?;

            Some((osc, gain))
        }
    }

    impl AudioEngine for WebAudioSynth {
        fn load(&mut self, instrument: &str) -> Result<(), AudioError> {
            if self.ctx.is_none() {
                return Err(AudioError::Unavailable("no AudioContext".to_string()));
            }
            self.instrument = Instrument::from_name(instrument)
                .ok_or_else(|| AudioError::UnknownInstrument(instrument.to_string()))?;
            log::info!("Instrument loaded: {}", self.instrument.as_str());
            Ok(())
        }

        fn play_note(&mut self, pitch: u8, velocity: u8, duration: f32) {
            let vol = self.effective_volume() * velocity_to_gain(velocity);
            if vol <= 0.0 {
                return;
            }

            let Some(ctx) = &self.ctx else { return };

            // Browsers start the context suspended until a user gesture
            if ctx.state() == web_sys::AudioContextState::Suspended {
                let _ = ctx.resume();
            }

            let Some((osc, gain)) =
                self.create_osc(ctx, midi_to_frequency(pitch), self.oscillator_type())
            else {
                return;
            };
            let t = ctx.current_time();
            let end = t + duration as f64 * self.instrument.release_factor();

            gain.gain().set_value_at_time(vol * 0.5, t).ok();
            gain.gain().exponential_ramp_to_value_at_time(0.01, end).ok();

            osc.start().ok();
            osc.stop_with_when(end + 0.05).ok();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_midi_to_frequency() {
        assert!((midi_to_frequency(69) - 440.0).abs() < 0.001);
        assert!((midi_to_frequency(81) - 880.0).abs() < 0.01);
        // Middle C
        assert!((midi_to_frequency(60) - 261.63).abs() < 0.01);
    }

    #[test]
    fn test_velocity_to_gain_clamps() {
        assert_eq!(velocity_to_gain(0), 0.0);
        assert_eq!(velocity_to_gain(127), 1.0);
        assert_eq!(velocity_to_gain(200), 1.0);
    }

    #[test]
    fn test_note_log_shared_between_clones() {
        let log = NoteLog::new();
        let mut engine = log.clone();
        engine.play_note(67, 90, 0.2);
        engine.play_note(60, 81, 0.2);

        assert_eq!(log.len(), 2);
        assert_eq!(log.notes()[0].pitch, 67);

        log.clear();
        assert!(engine.is_empty());
    }

    #[test]
    fn test_note_log_load_instrument() {
        let mut log = NoteLog::new();
        assert!(log.load("Marimba").is_ok());
        assert_eq!(log.instrument(), Some(Instrument::Marimba));
        assert_eq!(
            log.load("kazoo"),
            Err(AudioError::UnknownInstrument("kazoo".to_string()))
        );
        // A failed load keeps the previous preset
        assert_eq!(log.instrument(), Some(Instrument::Marimba));
    }
}
