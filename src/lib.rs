pub mod types {
    pub mod events;
}

pub mod calls;
pub mod client;
pub mod config;
pub mod relay;
pub mod transport;

pub use calls::{CallError, CallSnapshot, Envelope, MediaEngine, MediaEvent};
pub use client::CallClient;
pub use config::{CandidatePolicy, ClientConfig};
pub use types::events::Event;
