pub mod clock;
pub mod error;
pub mod feedback;
pub mod input;
pub mod metronome;
pub mod midi;
pub mod session;

pub use clock::{Clock, ManualClock, MonotonicClock};
pub use error::StoreError;
pub use feedback::{FeedbackSummary, HitRow, Quality, SlotPosition};
pub use input::{
    HitCallback, HitInputAdapter, HitSource, InputDevice, KeyOutcome, KeyboardSource, NoteOn,
    SetupReport, SetupState,
};
pub use metronome::{MetronomeController, MetronomePhase};
pub use midi::{MidiManager, MidirSource};
pub use session::{ConnectionStatus, IgnoreWindow, SessionStore, SessionTicket, StoreNotice, TakeTicket};
