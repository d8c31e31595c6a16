use crate::{
    backend::{bookable, check_bookable, check_new_timeslot, check_pickup, BookingBackend},
    error::BackendError,
    types::{
        Appointment, AppointmentDetails, AppointmentFilter, AppointmentUpdate, NewAppointment,
        normalize_email, OAuthProfile, ProfileUpdate, Role, Session, Timeslot, User,
    },
};
use chrono::{DateTime, Utc};
use std::{
    collections::{HashMap, HashSet},
    sync::{Arc, Mutex, MutexGuard},
};
use tokio::sync::watch::{self, Sender};
use tokio_stream::wrappers::WatchStream;
use tracing::error;
use uuid::Uuid;

#[derive(Debug, Default)]
struct Store {
    timeslots: HashMap<Uuid, Timeslot>,
    appointments: HashMap<Uuid, Appointment>,
    users: HashMap<Uuid, User>,
    accounts: HashSet<(String, String)>,
    sessions: HashMap<String, Session>,
}

impl Store {
    fn sorted_timeslots(&self) -> Vec<Timeslot> {
        let mut timeslots: Vec<Timeslot> = self.timeslots.values().cloned().collect();
        timeslots.sort_unstable_by(|a, b| a.datetime.cmp(&b.datetime));
        timeslots
    }

    fn user_by_email(&self, email: &str) -> Option<&User> {
        let email = normalize_email(email);
        self.users.values().find(|user| user.email == email)
    }

    fn user_mut_by_email(&mut self, email: &str) -> Option<&mut User> {
        let email = normalize_email(email);
        self.users.values_mut().find(|user| user.email == email)
    }
}

/// Non-persistent backend, used when no database is configured.
#[derive(Debug, Clone)]
pub struct LocalBackend {
    store: Arc<Mutex<Store>>,
    sender: Sender<Vec<Timeslot>>,
}

impl Default for LocalBackend {
    fn default() -> Self {
        let (sender, _) = watch::channel(vec![]);
        Self {
            store: Arc::default(),
            sender,
        }
    }
}

impl LocalBackend {
    fn store(&self) -> Result<MutexGuard<'_, Store>, BackendError> {
        self.store.lock().map_err(|err| {
            error!(?err, "Local store lock poisoned");
            BackendError::Database("Local store unavailable".into())
        })
    }

    fn send_timeslots(&self) {
        match self.store() {
            Ok(store) => {
                let timeslots = bookable(store.sorted_timeslots(), Utc::now());
                drop(store);
                self.sender.send_replace(timeslots);
            }
            Err(err) => error!(?err, "Failed to send current timeslots"),
        }
    }
}

impl BookingBackend for LocalBackend {
    fn timeslot_stream(&self) -> WatchStream<Vec<Timeslot>> {
        let stream = WatchStream::new(self.sender.subscribe());
        self.send_timeslots();
        stream
    }

    fn timeslots(&self) -> Result<Vec<Timeslot>, BackendError> {
        Ok(self.store()?.sorted_timeslots())
    }

    fn add_timeslot(&self, datetime: DateTime<Utc>) -> Result<Timeslot, BackendError> {
        let mut store = self.store()?;
        let existing: Vec<Timeslot> = store.timeslots.values().cloned().collect();
        if let Err(err) = check_new_timeslot(datetime, &existing, Utc::now()) {
            error!(%err, "Timeslot can't be added");
            return Err(err);
        }

        let timeslot = Timeslot {
            id: Uuid::new_v4(),
            datetime,
            is_available: true,
        };
        store.timeslots.insert(timeslot.id, timeslot.clone());
        drop(store);

        self.send_timeslots();
        Ok(timeslot)
    }

    fn add_timeslots(&self, datetimes: Vec<DateTime<Utc>>) -> Result<usize, BackendError> {
        let now = Utc::now();
        let mut store = self.store()?;
        let mut existing: Vec<Timeslot> = store.timeslots.values().cloned().collect();
        let mut added = 0;

        for datetime in datetimes {
            if check_new_timeslot(datetime, &existing, now).is_err() {
                continue;
            }
            let timeslot = Timeslot {
                id: Uuid::new_v4(),
                datetime,
                is_available: true,
            };
            store.timeslots.insert(timeslot.id, timeslot.clone());
            existing.push(timeslot);
            added += 1;
        }
        drop(store);

        self.send_timeslots();
        Ok(added)
    }

    fn remove_timeslot(&self, id: Uuid) -> Result<(), BackendError> {
        let mut store = self.store()?;
        if !store.timeslots.contains_key(&id) {
            let err = BackendError::NotFound("Timeslot");
            error!(%err, "Timeslot can't be removed");
            return Err(err);
        }
        if store
            .appointments
            .values()
            .any(|appointment| appointment.timeslot_id == id)
        {
            return Err(BackendError::Conflict(
                "Timeslot is booked. Cancel the appointment first".into(),
            ));
        }
        store.timeslots.remove(&id);
        drop(store);

        self.send_timeslots();
        Ok(())
    }

    fn appointments(
        &self,
        filter: AppointmentFilter,
    ) -> Result<Vec<AppointmentDetails>, BackendError> {
        let store = self.store()?;
        let mut appointments: Vec<AppointmentDetails> = store
            .appointments
            .values()
            .filter_map(|appointment| {
                let datetime = store.timeslots.get(&appointment.timeslot_id)?.datetime;
                if !filter.matches(appointment, datetime) {
                    return None;
                }
                let user = appointment.user_id.and_then(|id| store.users.get(&id));
                Some(AppointmentDetails {
                    appointment: appointment.clone(),
                    datetime,
                    user_email: user.map(|user| user.email.clone()),
                    user_name: user.and_then(|user| user.name.clone()),
                })
            })
            .collect();
        appointments.sort_unstable_by(|a, b| a.datetime.cmp(&b.datetime));
        Ok(appointments)
    }

    fn appointment(&self, id: Uuid) -> Result<Appointment, BackendError> {
        self.store()?
            .appointments
            .get(&id)
            .cloned()
            .ok_or(BackendError::NotFound("Appointment"))
    }

    fn book_appointment(&self, new: NewAppointment) -> Result<Appointment, BackendError> {
        let mut guard = self.store()?;
        let store = &mut *guard;

        let Some(timeslot) = store.timeslots.get_mut(&new.timeslot_id) else {
            let err = BackendError::NotFound("Timeslot");
            error!(%err, "Timeslot can't be booked");
            return Err(err);
        };
        let user = new.user_id.and_then(|id| store.users.get(&id));
        if let Err(err) = check_bookable(timeslot, Utc::now())
            .and_then(|_| check_pickup(new.pickup_at_home, user))
        {
            error!(%err, "Timeslot can't be booked");
            return Err(err);
        }
        timeslot.is_available = false;

        let appointment = Appointment {
            id: Uuid::new_v4(),
            timeslot_id: new.timeslot_id,
            pet_name: new.pet_name,
            species: new.species,
            reason: new.reason,
            pickup_at_home: new.pickup_at_home,
            user_id: new.user_id,
        };
        store.appointments.insert(appointment.id, appointment.clone());
        drop(guard);

        self.send_timeslots();
        Ok(appointment)
    }

    fn update_appointment(
        &self,
        id: Uuid,
        update: AppointmentUpdate,
    ) -> Result<Appointment, BackendError> {
        let mut store = self.store()?;
        let user_id = store
            .appointments
            .get(&id)
            .ok_or(BackendError::NotFound("Appointment"))?
            .user_id;

        let user = user_id.and_then(|user_id| store.users.get(&user_id));
        check_pickup(update.pickup_at_home, user)?;

        let appointment = store
            .appointments
            .get_mut(&id)
            .ok_or(BackendError::NotFound("Appointment"))?;
        appointment.pet_name = update.pet_name;
        appointment.species = update.species;
        appointment.reason = update.reason;
        appointment.pickup_at_home = update.pickup_at_home;
        Ok(appointment.clone())
    }

    fn cancel_appointment(&self, id: Uuid) -> Result<(), BackendError> {
        let mut store = self.store()?;
        let Some(appointment) = store.appointments.remove(&id) else {
            let err = BackendError::NotFound("Appointment");
            error!(%err, "Appointment can't be cancelled");
            return Err(err);
        };
        if let Some(timeslot) = store.timeslots.get_mut(&appointment.timeslot_id) {
            timeslot.is_available = true;
        }
        drop(store);

        self.send_timeslots();
        Ok(())
    }

    fn sign_in(
        &self,
        profile: OAuthProfile,
        expires: DateTime<Utc>,
    ) -> Result<Session, BackendError> {
        let mut store = self.store()?;

        let user_id = match store.user_mut_by_email(&profile.email) {
            Some(user) => {
                if user.name.is_none() {
                    user.name = profile.name;
                }
                user.id
            }
            None => {
                let user = User::new(normalize_email(&profile.email), profile.name);
                let id = user.id;
                store.users.insert(id, user);
                id
            }
        };
        store
            .accounts
            .insert((profile.provider, profile.provider_account_id));

        let session = Session::new(user_id, expires);
        store
            .sessions
            .insert(session.session_token.clone(), session.clone());
        Ok(session)
    }

    fn sign_out(&self, session_token: &str) -> Result<(), BackendError> {
        self.store()?.sessions.remove(session_token);
        Ok(())
    }

    fn user_for_session(&self, session_token: &str) -> Result<User, BackendError> {
        let store = self.store()?;
        let session = store
            .sessions
            .get(session_token)
            .filter(|session| session.expires > Utc::now())
            .ok_or(BackendError::Unauthorized)?;
        store
            .users
            .get(&session.user_id)
            .cloned()
            .ok_or(BackendError::Unauthorized)
    }

    fn user_by_email(&self, email: &str) -> Result<User, BackendError> {
        self.store()?
            .user_by_email(email)
            .cloned()
            .ok_or(BackendError::NotFound("User"))
    }

    fn update_profile(&self, user_id: Uuid, update: ProfileUpdate) -> Result<User, BackendError> {
        let mut store = self.store()?;
        let user = store
            .users
            .get_mut(&user_id)
            .ok_or(BackendError::NotFound("User"))?;
        user.apply_profile(update);
        Ok(user.clone())
    }

    fn set_role(&self, email: &str, role: Role) -> Result<User, BackendError> {
        let mut store = self.store()?;
        let user = store
            .user_mut_by_email(email)
            .ok_or(BackendError::NotFound("User"))?;
        user.role = role;
        Ok(user.clone())
    }
}
