use crate::{
    backend::BookingBackend,
    error::BackendError,
    types::{
        Appointment, AppointmentDetails, AppointmentFilter, AppointmentUpdate, NewAppointment,
        normalize_email, OAuthProfile, ProfileUpdate, Role, Session, Timeslot, User,
    },
};
use chrono::{DateTime, Utc};
use futures::StreamExt;
use std::{
    collections::HashMap,
    sync::{
        atomic::{AtomicBool, AtomicU64, Ordering},
        Arc, Mutex,
    },
    time::Duration,
};
use tokio::sync::watch::{self, Sender};
use tokio::time::timeout;
use tokio_stream::wrappers::WatchStream;
use uuid::Uuid;

pub async fn read_from_timeslot_stream(stream: &mut WatchStream<Vec<Timeslot>>) -> Vec<Timeslot> {
    timeout(Duration::from_secs(1), stream.next())
        .await
        .expect("No timeslot update received")
        .expect("Timeslot stream closed")
}

pub fn address() -> ProfileUpdate {
    ProfileUpdate {
        zip_code: "01310100".into(),
        address_street: "Avenida Paulista".into(),
        address_number: "1000".into(),
        address_complement: Some("Apto 12".into()),
        name: None,
    }
}

pub struct MockBackendInner {
    pub success: AtomicBool,
    pub calls_to_timeslots: AtomicU64,
    pub calls_to_add_timeslot: AtomicU64,
    pub calls_to_add_timeslots: AtomicU64,
    pub calls_to_remove_timeslot: AtomicU64,
    pub calls_to_appointments: AtomicU64,
    pub calls_to_book_appointment: AtomicU64,
    pub calls_to_update_appointment: AtomicU64,
    pub calls_to_cancel_appointment: AtomicU64,
    pub calls_to_sign_in: AtomicU64,
    pub calls_to_sign_out: AtomicU64,
    pub calls_to_update_profile: AtomicU64,
    pub timeslots: Mutex<Vec<Timeslot>>,
    pub appointments: Mutex<Vec<AppointmentDetails>>,
    pub sessions: Mutex<HashMap<String, User>>,
    pub last_filter: Mutex<Option<AppointmentFilter>>,
    pub last_booking: Mutex<Option<NewAppointment>>,
    sender: Sender<Vec<Timeslot>>,
}

#[derive(Clone)]
pub struct MockBackend(pub Arc<MockBackendInner>);

impl MockBackendInner {
    fn new() -> Self {
        let (sender, _) = watch::channel(vec![]);
        Self {
            success: AtomicBool::new(true),
            calls_to_timeslots: AtomicU64::default(),
            calls_to_add_timeslot: AtomicU64::default(),
            calls_to_add_timeslots: AtomicU64::default(),
            calls_to_remove_timeslot: AtomicU64::default(),
            calls_to_appointments: AtomicU64::default(),
            calls_to_book_appointment: AtomicU64::default(),
            calls_to_update_appointment: AtomicU64::default(),
            calls_to_cancel_appointment: AtomicU64::default(),
            calls_to_sign_in: AtomicU64::default(),
            calls_to_sign_out: AtomicU64::default(),
            calls_to_update_profile: AtomicU64::default(),
            timeslots: Mutex::default(),
            appointments: Mutex::default(),
            sessions: Mutex::default(),
            last_filter: Mutex::default(),
            last_booking: Mutex::default(),
            sender,
        }
    }
}

impl MockBackend {
    pub fn new() -> Self {
        Self(Arc::new(MockBackendInner::new()))
    }

    /// Registers a user reachable through the returned session token.
    pub fn add_session(&self, role: Role) -> (String, User) {
        let mut user = User::new(format!("{}@example.com", Uuid::new_v4().simple()), None);
        user.role = role;
        let token = Uuid::new_v4().simple().to_string();
        self.0
            .sessions
            .lock()
            .unwrap()
            .insert(token.clone(), user.clone());
        (token, user)
    }

    pub fn publish_timeslots(&self, timeslots: Vec<Timeslot>) {
        self.0.sender.send_replace(timeslots);
    }

    fn result(&self) -> Result<(), BackendError> {
        match self.0.success.load(Ordering::SeqCst) {
            true => Ok(()),
            false => Err(BackendError::Database("Supposed to fail".into())),
        }
    }
}

impl BookingBackend for MockBackend {
    fn timeslot_stream(&self) -> WatchStream<Vec<Timeslot>> {
        WatchStream::new(self.0.sender.subscribe())
    }

    fn timeslots(&self) -> Result<Vec<Timeslot>, BackendError> {
        self.0.calls_to_timeslots.fetch_add(1, Ordering::SeqCst);
        self.result()?;
        Ok(self.0.timeslots.lock().unwrap().clone())
    }

    fn add_timeslot(&self, datetime: DateTime<Utc>) -> Result<Timeslot, BackendError> {
        self.0.calls_to_add_timeslot.fetch_add(1, Ordering::SeqCst);
        self.result()?;
        Ok(Timeslot {
            id: Uuid::new_v4(),
            datetime,
            is_available: true,
        })
    }

    fn add_timeslots(&self, datetimes: Vec<DateTime<Utc>>) -> Result<usize, BackendError> {
        self.0.calls_to_add_timeslots.fetch_add(1, Ordering::SeqCst);
        self.result()?;
        Ok(datetimes.len())
    }

    fn remove_timeslot(&self, _id: Uuid) -> Result<(), BackendError> {
        self.0
            .calls_to_remove_timeslot
            .fetch_add(1, Ordering::SeqCst);
        self.result()
    }

    fn appointments(
        &self,
        filter: AppointmentFilter,
    ) -> Result<Vec<AppointmentDetails>, BackendError> {
        self.0.calls_to_appointments.fetch_add(1, Ordering::SeqCst);
        self.result()?;
        *self.0.last_filter.lock().unwrap() = Some(filter);
        Ok(self.0.appointments.lock().unwrap().clone())
    }

    fn appointment(&self, id: Uuid) -> Result<Appointment, BackendError> {
        self.0
            .appointments
            .lock()
            .unwrap()
            .iter()
            .find(|details| details.appointment.id == id)
            .map(|details| details.appointment.clone())
            .ok_or(BackendError::NotFound("Appointment"))
    }

    fn book_appointment(&self, new: NewAppointment) -> Result<Appointment, BackendError> {
        self.0
            .calls_to_book_appointment
            .fetch_add(1, Ordering::SeqCst);
        self.result()?;
        *self.0.last_booking.lock().unwrap() = Some(new.clone());
        Ok(Appointment {
            id: Uuid::new_v4(),
            timeslot_id: new.timeslot_id,
            pet_name: new.pet_name,
            species: new.species,
            reason: new.reason,
            pickup_at_home: new.pickup_at_home,
            user_id: new.user_id,
        })
    }

    fn update_appointment(
        &self,
        id: Uuid,
        update: AppointmentUpdate,
    ) -> Result<Appointment, BackendError> {
        self.0
            .calls_to_update_appointment
            .fetch_add(1, Ordering::SeqCst);
        self.result()?;
        let mut appointment = self.appointment(id)?;
        appointment.pet_name = update.pet_name;
        appointment.species = update.species;
        appointment.reason = update.reason;
        appointment.pickup_at_home = update.pickup_at_home;
        Ok(appointment)
    }

    fn cancel_appointment(&self, _id: Uuid) -> Result<(), BackendError> {
        self.0
            .calls_to_cancel_appointment
            .fetch_add(1, Ordering::SeqCst);
        self.result()
    }

    fn sign_in(
        &self,
        profile: OAuthProfile,
        expires: DateTime<Utc>,
    ) -> Result<Session, BackendError> {
        self.0.calls_to_sign_in.fetch_add(1, Ordering::SeqCst);
        self.result()?;
        let user = User::new(profile.email, profile.name);
        let session = Session::new(user.id, expires);
        self.0
            .sessions
            .lock()
            .unwrap()
            .insert(session.session_token.clone(), user);
        Ok(session)
    }

    fn sign_out(&self, session_token: &str) -> Result<(), BackendError> {
        self.0.calls_to_sign_out.fetch_add(1, Ordering::SeqCst);
        self.0.sessions.lock().unwrap().remove(session_token);
        Ok(())
    }

    fn user_for_session(&self, session_token: &str) -> Result<User, BackendError> {
        self.0
            .sessions
            .lock()
            .unwrap()
            .get(session_token)
            .cloned()
            .ok_or(BackendError::Unauthorized)
    }

    fn user_by_email(&self, email: &str) -> Result<User, BackendError> {
        self.0
            .sessions
            .lock()
            .unwrap()
            .values()
            .find(|user| user.email == normalize_email(email))
            .cloned()
            .ok_or(BackendError::NotFound("User"))
    }

    fn update_profile(&self, user_id: Uuid, update: ProfileUpdate) -> Result<User, BackendError> {
        self.0
            .calls_to_update_profile
            .fetch_add(1, Ordering::SeqCst);
        self.result()?;
        let mut sessions = self.0.sessions.lock().unwrap();
        let user = sessions
            .values_mut()
            .find(|user| user.id == user_id)
            .ok_or(BackendError::NotFound("User"))?;
        user.apply_profile(update);
        Ok(user.clone())
    }

    fn set_role(&self, email: &str, role: Role) -> Result<User, BackendError> {
        let mut sessions = self.0.sessions.lock().unwrap();
        let user = sessions
            .values_mut()
            .find(|user| user.email == normalize_email(email))
            .ok_or(BackendError::NotFound("User"))?;
        user.role = role;
        Ok(user.clone())
    }
}
