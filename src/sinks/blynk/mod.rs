//! Mobile app bridge over the Blynk legacy TCP protocol.
//!
//! The client keeps one logged-in session to the Blynk server. App widgets
//! reach the controller as [`BridgeEvent`]s, outbound virtual pin writes go
//! through the cloneable [`BlynkBridge`] handle.

mod client;
pub mod protocol;

pub use client::{BlynkBridge, BlynkClient, BlynkError, BridgeEvent};
