//! Network-free building blocks for the SubText client: response parsing,
//! message segmentation, the session state machine, and local credential storage.

pub mod analysis;
pub mod chat;
pub mod error;
pub mod events;
pub mod segmentation;
pub mod session;
pub mod store;
