//! Adapters between the engine and the Kubernetes API

mod events;
mod merge_patch;
mod ownership;
mod random;
mod secrets;
mod status;
mod targets;

pub use events::*;
pub use ownership::*;
pub use random::*;
pub use secrets::*;
pub use status::*;
pub use targets::*;

pub mod patch {
    //! JSON merge patch helpers
    pub use super::merge_patch::{diff, is_empty};
}
