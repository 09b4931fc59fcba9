//! Application layer orchestrating bookings against the ports.
//!
//! `BookingEngine` runs every client, companion and system action. The webhook processor
//! and the expiration sweeper feed their events back through the same engine, so every
//! write passes the same state machine and version check.

pub mod effects;
pub mod engine;
pub mod sweeper;
pub mod webhook;
