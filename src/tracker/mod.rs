pub mod client;
pub mod events;
pub mod query;
pub mod types;

pub use client::TrackerClient;
