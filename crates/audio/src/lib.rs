pub mod backend;
pub mod click;

pub use backend::{ClickError, ClickSink, CpalClickSink, NullClickSink};
pub use click::{ClickEnvelope, ClickKind};
