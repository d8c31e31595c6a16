use crate::backend::{bookable, check_bookable, check_new_timeslot, check_pickup, BookingBackend};
use crate::error::BackendError;
use crate::schema::{accounts, appointments, sessions, timeslots, users};
use crate::types::{
    Appointment, AppointmentDetails, AppointmentFilter, AppointmentUpdate, NewAppointment,
    normalize_email, OAuthProfile, ProfileUpdate, Role, Session, Timeslot, User,
};
use chrono::{DateTime, Utc};
use diesel::prelude::*;
use diesel::{Connection, ConnectionError, PgConnection};
use std::sync::{Arc, Mutex, MutexGuard};
use tokio::sync::watch::{self, Sender};
use tokio_stream::wrappers::WatchStream;
use tracing::error;
use uuid::Uuid;

#[derive(Insertable)]
#[diesel(table_name = users)]
struct NewUser<'a> {
    id: Uuid,
    email: &'a str,
    name: Option<&'a str>,
    role: &'a str,
}

#[derive(Insertable)]
#[diesel(table_name = accounts)]
struct NewAccount<'a> {
    user_id: Uuid,
    provider: &'a str,
    provider_account_id: &'a str,
}

#[derive(Insertable)]
#[diesel(table_name = sessions)]
struct NewSession<'a> {
    session_token: &'a str,
    user_id: Uuid,
    expires: DateTime<Utc>,
}

#[derive(Clone)]
pub struct DatabaseInterface {
    connection: Arc<Mutex<PgConnection>>,
    sender: Sender<Vec<Timeslot>>,
}

impl DatabaseInterface {
    pub fn new(database_url: &str) -> Result<Self, ConnectionError> {
        let connection = Self::establish_connection(database_url)?;
        let (sender, _) = watch::channel(vec![]);
        Ok(Self {
            connection: Arc::new(Mutex::new(connection)),
            sender,
        })
    }

    fn establish_connection(database_url: &str) -> Result<PgConnection, diesel::ConnectionError> {
        PgConnection::establish(database_url)
    }

    fn connection(&self) -> Result<MutexGuard<'_, PgConnection>, BackendError> {
        self.connection.lock().map_err(|err| {
            error!(?err, "Database connection lock poisoned");
            BackendError::Database("Database connection unavailable".into())
        })
    }

    fn send_timeslots(&self) {
        match self.timeslots() {
            Ok(timeslots) => {
                self.sender.send_replace(bookable(timeslots, Utc::now()));
            }
            Err(err) => error!(?err, "Failed to send current timeslots"),
        }
    }

    #[cfg(test)]
    fn remove_everything(&self) {
        let mut connection = self.connection().unwrap();
        diesel::delete(appointments::table)
            .execute(&mut *connection)
            .unwrap();
        diesel::delete(timeslots::table)
            .execute(&mut *connection)
            .unwrap();
        diesel::delete(users::table)
            .execute(&mut *connection)
            .unwrap();
    }
}

fn find_user(connection: &mut PgConnection, id: Uuid) -> Result<Option<User>, BackendError> {
    Ok(users::table.find(id).first::<User>(connection).optional()?)
}

impl BookingBackend for DatabaseInterface {
    fn timeslot_stream(&self) -> WatchStream<Vec<Timeslot>> {
        let stream = WatchStream::new(self.sender.subscribe());
        self.send_timeslots();
        stream
    }

    fn timeslots(&self) -> Result<Vec<Timeslot>, BackendError> {
        let mut connection = self.connection()?;
        timeslots::table
            .order(timeslots::datetime.asc())
            .select(Timeslot::as_select())
            .load(&mut *connection)
            .map_err(|err| {
                error!(%err, "Failed to read timeslots from Database");
                err.into()
            })
    }

    fn add_timeslot(&self, datetime: DateTime<Utc>) -> Result<Timeslot, BackendError> {
        let mut connection = self.connection()?;
        let timeslot = connection.transaction::<_, BackendError, _>(|connection| {
            let existing = timeslots::table
                .select(Timeslot::as_select())
                .load(connection)?;
            check_new_timeslot(datetime, &existing, Utc::now())?;

            let timeslot = Timeslot {
                id: Uuid::new_v4(),
                datetime,
                is_available: true,
            };
            diesel::insert_into(timeslots::table)
                .values(&timeslot)
                .execute(connection)?;
            Ok(timeslot)
        });
        drop(connection);

        match timeslot {
            Ok(timeslot) => {
                self.send_timeslots();
                Ok(timeslot)
            }
            Err(err) => {
                error!(%err, "Timeslot can't be added");
                Err(err)
            }
        }
    }

    fn add_timeslots(&self, datetimes: Vec<DateTime<Utc>>) -> Result<usize, BackendError> {
        let now = Utc::now();
        let mut connection = self.connection()?;
        let added = connection.transaction::<_, BackendError, _>(|connection| {
            let mut existing = timeslots::table
                .select(Timeslot::as_select())
                .load(connection)?;

            let mut new_timeslots = Vec::new();
            for datetime in datetimes {
                if check_new_timeslot(datetime, &existing, now).is_err() {
                    continue;
                }
                let timeslot = Timeslot {
                    id: Uuid::new_v4(),
                    datetime,
                    is_available: true,
                };
                existing.push(timeslot.clone());
                new_timeslots.push(timeslot);
            }

            if new_timeslots.is_empty() {
                return Ok(0);
            }
            Ok(diesel::insert_into(timeslots::table)
                .values(&new_timeslots)
                .execute(connection)?)
        })?;
        drop(connection);

        self.send_timeslots();
        Ok(added)
    }

    fn remove_timeslot(&self, id: Uuid) -> Result<(), BackendError> {
        let mut connection = self.connection()?;
        let result = connection.transaction::<_, BackendError, _>(|connection| {
            let booked: i64 = appointments::table
                .filter(appointments::timeslot_id.eq(id))
                .count()
                .get_result(connection)?;
            if booked > 0 {
                return Err(BackendError::Conflict(
                    "Timeslot is booked. Cancel the appointment first".into(),
                ));
            }

            match diesel::delete(timeslots::table.find(id)).execute(connection)? {
                0 => Err(BackendError::NotFound("Timeslot")),
                _ => Ok(()),
            }
        });
        drop(connection);

        if let Err(err) = result {
            error!(%err, "Deletion of timeslot failed");
            return Err(err);
        }
        self.send_timeslots();
        Ok(())
    }

    fn appointments(
        &self,
        filter: AppointmentFilter,
    ) -> Result<Vec<AppointmentDetails>, BackendError> {
        let mut connection = self.connection()?;

        let mut query = appointments::table
            .inner_join(timeslots::table)
            .left_join(users::table)
            .select((
                Appointment::as_select(),
                timeslots::datetime,
                users::email.nullable(),
                users::name.nullable(),
            ))
            .order(timeslots::datetime.asc())
            .into_boxed();
        if let Some(user_id) = filter.user_id {
            query = query.filter(appointments::user_id.eq(user_id));
        }
        if let Some((start, end)) = filter.between {
            query = query
                .filter(timeslots::datetime.ge(start))
                .filter(timeslots::datetime.lt(end));
        }

        let rows: Vec<(Appointment, DateTime<Utc>, Option<String>, Option<String>)> =
            query.load(&mut *connection)?;
        Ok(rows
            .into_iter()
            .map(|(appointment, datetime, user_email, user_name)| AppointmentDetails {
                appointment,
                datetime,
                user_email,
                user_name,
            })
            .collect())
    }

    fn appointment(&self, id: Uuid) -> Result<Appointment, BackendError> {
        let mut connection = self.connection()?;
        appointments::table
            .find(id)
            .select(Appointment::as_select())
            .first(&mut *connection)
            .optional()?
            .ok_or(BackendError::NotFound("Appointment"))
    }

    fn book_appointment(&self, new: NewAppointment) -> Result<Appointment, BackendError> {
        let mut connection = self.connection()?;
        let result = connection.transaction::<_, BackendError, _>(|connection| {
            let timeslot = timeslots::table
                .find(new.timeslot_id)
                .select(Timeslot::as_select())
                .for_update()
                .first(connection)
                .optional()?
                .ok_or(BackendError::NotFound("Timeslot"))?;
            check_bookable(&timeslot, Utc::now())?;

            let user = match new.user_id {
                Some(user_id) => find_user(connection, user_id)?,
                None => None,
            };
            check_pickup(new.pickup_at_home, user.as_ref())?;

            diesel::update(timeslots::table.find(timeslot.id))
                .set(timeslots::is_available.eq(false))
                .execute(connection)?;

            let appointment = Appointment {
                id: Uuid::new_v4(),
                timeslot_id: timeslot.id,
                pet_name: new.pet_name,
                species: new.species,
                reason: new.reason,
                pickup_at_home: new.pickup_at_home,
                user_id: new.user_id,
            };
            diesel::insert_into(appointments::table)
                .values(&appointment)
                .execute(connection)?;
            Ok(appointment)
        });
        drop(connection);

        match result {
            Ok(appointment) => {
                self.send_timeslots();
                Ok(appointment)
            }
            Err(err) => {
                error!(%err, "Timeslot can't be booked");
                Err(err)
            }
        }
    }

    fn update_appointment(
        &self,
        id: Uuid,
        update: AppointmentUpdate,
    ) -> Result<Appointment, BackendError> {
        let mut connection = self.connection()?;
        connection.transaction::<_, BackendError, _>(|connection| {
            let appointment = appointments::table
                .find(id)
                .select(Appointment::as_select())
                .first(connection)
                .optional()?
                .ok_or(BackendError::NotFound("Appointment"))?;

            let user = match appointment.user_id {
                Some(user_id) => find_user(connection, user_id)?,
                None => None,
            };
            check_pickup(update.pickup_at_home, user.as_ref())?;

            Ok(diesel::update(appointments::table.find(id))
                .set((
                    appointments::pet_name.eq(update.pet_name),
                    appointments::species.eq(update.species),
                    appointments::reason.eq(update.reason),
                    appointments::pickup_at_home.eq(update.pickup_at_home),
                ))
                .returning(Appointment::as_returning())
                .get_result(connection)?)
        })
    }

    fn cancel_appointment(&self, id: Uuid) -> Result<(), BackendError> {
        let mut connection = self.connection()?;
        let result = connection.transaction::<_, BackendError, _>(|connection| {
            let appointment = diesel::delete(appointments::table.find(id))
                .returning(Appointment::as_returning())
                .get_result(connection)
                .optional()?
                .ok_or(BackendError::NotFound("Appointment"))?;

            diesel::update(timeslots::table.find(appointment.timeslot_id))
                .set(timeslots::is_available.eq(true))
                .execute(connection)?;
            Ok(())
        });
        drop(connection);

        if let Err(err) = result {
            error!(%err, "Appointment can't be cancelled");
            return Err(err);
        }
        self.send_timeslots();
        Ok(())
    }

    fn sign_in(
        &self,
        profile: OAuthProfile,
        expires: DateTime<Utc>,
    ) -> Result<Session, BackendError> {
        let email = normalize_email(&profile.email);
        let mut connection = self.connection()?;
        connection.transaction::<_, BackendError, _>(|connection| {
            let existing = users::table
                .filter(users::email.eq(&email))
                .first::<User>(connection)
                .optional()?;

            let user_id = match existing {
                Some(user) => {
                    if user.name.is_none() && profile.name.is_some() {
                        diesel::update(users::table.find(user.id))
                            .set(users::name.eq(&profile.name))
                            .execute(connection)?;
                    }
                    user.id
                }
                None => {
                    let id = Uuid::new_v4();
                    diesel::insert_into(users::table)
                        .values(&NewUser {
                            id,
                            email: &email,
                            name: profile.name.as_deref(),
                            role: Role::User.as_str(),
                        })
                        .execute(connection)?;
                    id
                }
            };

            diesel::insert_into(accounts::table)
                .values(&NewAccount {
                    user_id,
                    provider: &profile.provider,
                    provider_account_id: &profile.provider_account_id,
                })
                .on_conflict_do_nothing()
                .execute(connection)?;

            let session = Session::new(user_id, expires);
            diesel::insert_into(sessions::table)
                .values(&NewSession {
                    session_token: &session.session_token,
                    user_id,
                    expires,
                })
                .execute(connection)?;
            Ok(session)
        })
    }

    fn sign_out(&self, session_token: &str) -> Result<(), BackendError> {
        let mut connection = self.connection()?;
        diesel::delete(sessions::table.find(session_token)).execute(&mut *connection)?;
        Ok(())
    }

    fn user_for_session(&self, session_token: &str) -> Result<User, BackendError> {
        let mut connection = self.connection()?;
        sessions::table
            .inner_join(users::table)
            .filter(sessions::session_token.eq(session_token))
            .filter(sessions::expires.gt(Utc::now()))
            .select(users::all_columns)
            .first::<User>(&mut *connection)
            .optional()?
            .ok_or(BackendError::Unauthorized)
    }

    fn user_by_email(&self, email: &str) -> Result<User, BackendError> {
        let email = normalize_email(email);
        let mut connection = self.connection()?;
        users::table
            .filter(users::email.eq(&email))
            .first::<User>(&mut *connection)
            .optional()?
            .ok_or(BackendError::NotFound("User"))
    }

    fn update_profile(&self, user_id: Uuid, update: ProfileUpdate) -> Result<User, BackendError> {
        let mut connection = self.connection()?;
        connection.transaction::<_, BackendError, _>(|connection| {
            let mut user = find_user(connection, user_id)?.ok_or(BackendError::NotFound("User"))?;
            user.apply_profile(update);

            diesel::update(users::table.find(user_id))
                .set((
                    users::zip_code.eq(&user.zip_code),
                    users::address_street.eq(&user.address_street),
                    users::address_number.eq(&user.address_number),
                    users::address_complement.eq(&user.address_complement),
                    users::name.eq(&user.name),
                ))
                .execute(connection)?;
            Ok(user)
        })
    }

    fn set_role(&self, email: &str, role: Role) -> Result<User, BackendError> {
        let email = normalize_email(email);
        let mut connection = self.connection()?;
        diesel::update(users::table.filter(users::email.eq(&email)))
            .set(users::role.eq(role.as_str()))
            .get_result::<User>(&mut *connection)
            .optional()?
            .ok_or(BackendError::NotFound("User"))
    }
}
