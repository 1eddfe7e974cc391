pub mod drill;
pub mod error;
pub mod events;
pub mod messages;
pub mod session;

pub use crate::drill::{
    Drill, DrillList, DrillSummary, TimingWindows, VelocityTargets, MAX_TEMPO_BPM, MIN_TEMPO_BPM,
};
pub use crate::error::DomainError;
pub use crate::events::{HitEvent, HitFeedback, InputType, RollingScore};
pub use crate::messages::{
    InboundMessage, MetronomeAction, MetronomeControl, MetronomeState, MetronomeTick,
    OutboundMessage, SessionStart,
};
pub use crate::session::{Session, SessionCreate, SessionStatus, TakeMetrics, TakeSummary};
