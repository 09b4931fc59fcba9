use crate::domain::booking::Booking;
use crate::error::{BookingError, Result};
use std::io::Read;

/// Reads a booking snapshot from a CSV source.
///
/// This reader wraps `csv::Reader` and yields one `Result<Booking>` per row. Whitespace
/// around fields is trimmed and an empty optional column reads as `None`.
pub struct BookingReader<R: Read> {
    reader: csv::Reader<R>,
}

impl<R: Read> BookingReader<R> {
    /// Creates a new `BookingReader` from any `Read` source (e.g., File, Stdin).
    pub fn new(source: R) -> Self {
        let reader = csv::ReaderBuilder::new()
            .trim(csv::Trim::All)
            .flexible(true)
            .from_reader(source);
        Self { reader }
    }

    /// Lazily deserializes bookings so a large snapshot is never held in memory at once.
    pub fn bookings(self) -> impl Iterator<Item = Result<Booking>> {
        self.reader
            .into_deserialize()
            .map(|result| result.map_err(BookingError::from))
    }
}
