use crate::schema::{appointments, timeslots};
use chrono::{DateTime, Utc};
use diesel::prelude::*;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Queryable, Selectable, Insertable)]
#[diesel(table_name = timeslots)]
pub struct Timeslot {
    pub id: Uuid,
    pub datetime: DateTime<Utc>,
    pub is_available: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Queryable, Selectable, Insertable)]
#[diesel(table_name = appointments)]
pub struct Appointment {
    pub id: Uuid,
    pub timeslot_id: Uuid,
    pub pet_name: String,
    pub species: String,
    pub reason: String,
    pub pickup_at_home: bool,
    pub user_id: Option<Uuid>,
}

/// An appointment together with the time of its slot and the booking user.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AppointmentDetails {
    #[serde(flatten)]
    pub appointment: Appointment,
    pub datetime: DateTime<Utc>,
    pub user_email: Option<String>,
    pub user_name: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AppointmentsOverview {
    pub past: Vec<AppointmentDetails>,
    pub upcoming: Vec<AppointmentDetails>,
}

impl AppointmentsOverview {
    pub fn split(appointments: Vec<AppointmentDetails>, now: DateTime<Utc>) -> Self {
        let (past, upcoming) = appointments
            .into_iter()
            .partition(|appointment| appointment.datetime < now);
        Self { past, upcoming }
    }
}

#[derive(Debug, Clone)]
pub struct NewAppointment {
    pub timeslot_id: Uuid,
    pub pet_name: String,
    pub species: String,
    pub reason: String,
    pub pickup_at_home: bool,
    pub user_id: Option<Uuid>,
}

#[derive(Debug, Clone)]
pub struct AppointmentUpdate {
    pub pet_name: String,
    pub species: String,
    pub reason: String,
    pub pickup_at_home: bool,
}

#[derive(Debug, Clone, Default)]
pub struct AppointmentFilter {
    pub user_id: Option<Uuid>,
    pub between: Option<(DateTime<Utc>, DateTime<Utc>)>,
}

impl AppointmentFilter {
    pub fn matches(&self, appointment: &Appointment, datetime: DateTime<Utc>) -> bool {
        if let Some(user_id) = self.user_id {
            if appointment.user_id != Some(user_id) {
                return false;
            }
        }
        match self.between {
            Some((start, end)) => datetime >= start && datetime < end,
            None => true,
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    #[default]
    User,
    Admin,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::User => "user",
            Role::Admin => "admin",
        }
    }
}

impl From<String> for Role {
    fn from(role: String) -> Self {
        match role.as_str() {
            "admin" => Role::Admin,
            _ => Role::User,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Queryable)]
pub struct User {
    pub id: Uuid,
    pub email: String,
    pub name: Option<String>,
    #[diesel(deserialize_as = String)]
    pub role: Role,
    #[serde(serialize_with = "serialize_zip_code")]
    pub zip_code: Option<String>,
    pub address_street: Option<String>,
    pub address_number: Option<String>,
    pub address_complement: Option<String>,
}

impl User {
    pub fn new(email: String, name: Option<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            email,
            name,
            role: Role::User,
            zip_code: None,
            address_street: None,
            address_number: None,
            address_complement: None,
        }
    }

    pub fn is_admin(&self) -> bool {
        self.role == Role::Admin
    }

    /// Home pickup needs at least zip code, street and number.
    pub fn has_address(&self) -> bool {
        [&self.zip_code, &self.address_street, &self.address_number]
            .iter()
            .all(|field| field.as_deref().is_some_and(|value| !value.trim().is_empty()))
    }

    pub fn apply_profile(&mut self, update: ProfileUpdate) {
        self.zip_code = Some(update.zip_code);
        self.address_street = Some(update.address_street);
        self.address_number = Some(update.address_number);
        self.address_complement = update.address_complement;
        if let Some(name) = update.name {
            self.name = Some(name);
        }
    }
}

/// Address fields saved lazily, the first time home pickup is requested.
#[derive(Debug, Clone, PartialEq)]
pub struct ProfileUpdate {
    pub zip_code: String,
    pub address_street: String,
    pub address_number: String,
    pub address_complement: Option<String>,
    pub name: Option<String>,
}

/// Identity handed over by the OAuth provider after a successful sign-in.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OAuthProfile {
    pub provider: String,
    pub provider_account_id: String,
    pub email: String,
    pub name: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Queryable)]
pub struct Session {
    pub session_token: String,
    pub user_id: Uuid,
    pub expires: DateTime<Utc>,
}

impl Session {
    pub fn new(user_id: Uuid, expires: DateTime<Utc>) -> Self {
        Self {
            session_token: Uuid::new_v4().simple().to_string(),
            user_id,
            expires,
        }
    }
}

/// Emails are matched case-insensitively and stored lowercase.
pub fn normalize_email(email: &str) -> String {
    email.trim().to_lowercase()
}

/// Zip codes are stored as eight digits and shown as `12345-678`.
pub fn normalize_zip_code(zip_code: &str) -> String {
    zip_code.chars().filter(char::is_ascii_digit).collect()
}

pub fn format_zip_code(zip_code: &str) -> String {
    if zip_code.len() == 8 && zip_code.chars().all(|c| c.is_ascii_digit()) {
        format!("{}-{}", &zip_code[..5], &zip_code[5..])
    } else {
        zip_code.to_string()
    }
}

fn serialize_zip_code<S>(zip_code: &Option<String>, serializer: S) -> Result<S::Ok, S::Error>
where
    S: serde::Serializer,
{
    match zip_code {
        Some(zip_code) => serializer.serialize_some(&format_zip_code(zip_code)),
        None => serializer.serialize_none(),
    }
}
