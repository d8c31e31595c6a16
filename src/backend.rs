use crate::error::BackendError;
use crate::types::{
    Appointment, AppointmentDetails, AppointmentFilter, AppointmentUpdate, NewAppointment,
    OAuthProfile, ProfileUpdate, Role, Session, Timeslot, User,
};
use chrono::{DateTime, DurationRound, TimeDelta, Utc};
use tokio_stream::wrappers::WatchStream;
use uuid::Uuid;

pub trait BookingBackend: Clone + Send + Sync + 'static {
    /// Yields the currently bookable timeslots now and after every change.
    fn timeslot_stream(&self) -> WatchStream<Vec<Timeslot>>;
    fn timeslots(&self) -> Result<Vec<Timeslot>, BackendError>;
    fn add_timeslot(&self, datetime: DateTime<Utc>) -> Result<Timeslot, BackendError>;
    /// Bulk insert, skipping past and duplicate datetimes. Returns how many were added.
    fn add_timeslots(&self, datetimes: Vec<DateTime<Utc>>) -> Result<usize, BackendError>;
    fn remove_timeslot(&self, id: Uuid) -> Result<(), BackendError>;

    fn appointments(&self, filter: AppointmentFilter)
        -> Result<Vec<AppointmentDetails>, BackendError>;
    fn appointment(&self, id: Uuid) -> Result<Appointment, BackendError>;
    fn book_appointment(&self, new: NewAppointment) -> Result<Appointment, BackendError>;
    fn update_appointment(
        &self,
        id: Uuid,
        update: AppointmentUpdate,
    ) -> Result<Appointment, BackendError>;
    fn cancel_appointment(&self, id: Uuid) -> Result<(), BackendError>;

    fn sign_in(&self, profile: OAuthProfile, expires: DateTime<Utc>)
        -> Result<Session, BackendError>;
    fn sign_out(&self, session_token: &str) -> Result<(), BackendError>;
    fn user_for_session(&self, session_token: &str) -> Result<User, BackendError>;
    fn user_by_email(&self, email: &str) -> Result<User, BackendError>;
    fn update_profile(&self, user_id: Uuid, update: ProfileUpdate) -> Result<User, BackendError>;
    fn set_role(&self, email: &str, role: Role) -> Result<User, BackendError>;
}

/// Only future slots that nobody holds can be offered to clients.
pub fn bookable(timeslots: Vec<Timeslot>, now: DateTime<Utc>) -> Vec<Timeslot> {
    timeslots
        .into_iter()
        .filter(|timeslot| timeslot.is_available && timeslot.datetime >= now)
        .collect()
}

pub fn check_bookable(timeslot: &Timeslot, now: DateTime<Utc>) -> Result<(), BackendError> {
    if !timeslot.is_available {
        return Err(BackendError::AlreadyBooked);
    }
    if timeslot.datetime < now {
        return Err(BackendError::Validation("Timeslot already passed".into()));
    }
    Ok(())
}

pub fn check_pickup(pickup_at_home: bool, user: Option<&User>) -> Result<(), BackendError> {
    if !pickup_at_home {
        return Ok(());
    }
    match user {
        Some(user) if user.has_address() => Ok(()),
        _ => Err(BackendError::AddressRequired),
    }
}

pub fn check_new_timeslot(
    datetime: DateTime<Utc>,
    existing: &[Timeslot],
    now: DateTime<Utc>,
) -> Result<(), BackendError> {
    if datetime < now {
        return Err(BackendError::Validation(
            "Timeslots can't be created in the past".into(),
        ));
    }
    let minute = truncate_to_minute(datetime);
    if existing
        .iter()
        .any(|timeslot| truncate_to_minute(timeslot.datetime) == minute)
    {
        return Err(BackendError::Conflict(
            "A timeslot for this date and time already exists".into(),
        ));
    }
    Ok(())
}

fn truncate_to_minute(datetime: DateTime<Utc>) -> DateTime<Utc> {
    datetime
        .duration_trunc(TimeDelta::minutes(1))
        .unwrap_or(datetime)
}
