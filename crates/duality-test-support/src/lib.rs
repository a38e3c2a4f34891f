//! Shared test fixtures and doubles for the Duality campaign engine.

mod clock;
mod consumer;
mod events;
mod projector;
mod registry;
mod seed;

pub use clock::FixedClock;
pub use consumer::{FailingConsumer, RecordingConsumer};
pub use events::{fixed_time, sample_event};
pub use projector::{FailingProjector, RecordingProjector};
pub use registry::StaticEventRegistry;
pub use seed::seed_character;
