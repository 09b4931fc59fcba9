use crate::domain::booking::Booking;
use crate::error::Result;
use std::io::Write;

/// Writes bookings as CSV in the column order the reader expects.
pub struct BookingWriter<W: Write> {
    writer: csv::Writer<W>,
}

impl<W: Write> BookingWriter<W> {
    pub fn new(sink: W) -> Self {
        Self {
            writer: csv::Writer::from_writer(sink),
        }
    }

    /// Writes every booking, oldest first, then flushes.
    pub fn write_bookings(&mut self, mut bookings: Vec<Booking>) -> Result<()> {
        bookings.sort_by(|a, b| a.created_at.cmp(&b.created_at).then_with(|| a.id.cmp(&b.id)));
        for booking in &bookings {
            self.writer.serialize(booking)?;
        }
        self.writer.flush()?;
        Ok(())
    }
}
