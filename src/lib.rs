//! # Quad Bridge Library
//!
//! Bridge a message-bus control plane to a radio-linked quadrotor.
//!
//! This library provides the core functionality for flying small radio-linked
//! quadrotors from a message bus: velocity commands in, telemetry and
//! parameters out, with a setpoint watchdog that keeps the vehicle out of its
//! onboard command-timeout failsafe.

pub mod bus;
pub mod config;
pub mod error;
pub mod link;
pub mod params;
pub mod session;
pub mod telemetry;
pub mod units;
