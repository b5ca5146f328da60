//! Thermofan library.
//!
//! Temperature-driven fan control for single-board computers: the SoC
//! temperature is sampled and smoothed, a hysteresis pair switches the fan,
//! and readings plus fan state are published to a local MQTT broker,
//! ThingSpeak and the Blynk mobile app.

pub mod command;
pub mod config;
pub mod control;
pub mod controller;
pub mod error;
pub mod hw;
pub mod instance_lock;
pub mod scheduler;
pub mod sinks;

#[cfg(test)]
mod testing;
