//! Domain layer: booking state, money and the ports the application talks through.

pub mod actor;
pub mod booking;
pub mod commission;
pub mod money;
pub mod notification;
pub mod payment;
pub mod ports;
pub mod profile;
pub mod state_machine;
