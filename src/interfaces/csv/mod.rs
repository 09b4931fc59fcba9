//! Booking snapshots as CSV, one booking per row with a header line.

pub mod booking_reader;
pub mod booking_writer;
