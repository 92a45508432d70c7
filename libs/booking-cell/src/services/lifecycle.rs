use crate::models::{AppointmentStatus, BookingError};

/// The appointment state machine, kept as a pure transition table.
///
/// Enforcement happens twice: here for a fast local answer, and again in the
/// storage layer via status-guarded updates so that two racing writers cannot
/// both apply a transition.
pub struct AppointmentLifecycle;

impl AppointmentLifecycle {
    /// Statuses reachable from `from` in one step.
    pub fn allowed_transitions(from: &AppointmentStatus) -> &'static [AppointmentStatus] {
        match from {
            AppointmentStatus::Pending => &[
                AppointmentStatus::Confirmed,
                AppointmentStatus::Cancelled,
                AppointmentStatus::Expired,
            ],
            AppointmentStatus::Confirmed => {
                &[AppointmentStatus::Cancelled, AppointmentStatus::Completed]
            }
            // Terminal states
            AppointmentStatus::Cancelled
            | AppointmentStatus::Completed
            | AppointmentStatus::Expired => &[],
        }
    }

    pub fn can_transition(from: &AppointmentStatus, to: &AppointmentStatus) -> bool {
        Self::allowed_transitions(from).contains(to)
    }

    pub fn check_transition(
        from: &AppointmentStatus,
        to: &AppointmentStatus,
    ) -> Result<(), BookingError> {
        if Self::can_transition(from, to) {
            Ok(())
        } else {
            Err(BookingError::InvalidStatusTransition(from.clone()))
        }
    }

    /// States that still hold a slot reservation. Leaving this set must
    /// release the slot exactly once. Used both as a cancel guard and by the
    /// orphan sweep to decide which appointments account for a booked slot.
    pub fn live_statuses() -> &'static [AppointmentStatus] {
        &[AppointmentStatus::Pending, AppointmentStatus::Confirmed]
    }

    pub fn holds_slot(status: &AppointmentStatus) -> bool {
        Self::live_statuses().contains(status)
    }
}
