#[derive(Debug, Clone, thiserror::Error)]
pub enum ScheduleError {
    /// The requested time is not on the grid for that date (outside working
    /// hours, off-pitch, or a closed day).
    #[error("No such slot for this date")]
    NoSuchSlot,

    /// Lost the reservation race. A frequent, expected outcome.
    #[error("Slot is already booked")]
    AlreadyBooked,

    #[error("Database error: {0}")]
    DatabaseError(String),
}
