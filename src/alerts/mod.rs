pub mod channels;
pub mod engine;

pub use channels::{AlertPayload, Notifier};
pub use engine::AlertEngine;
