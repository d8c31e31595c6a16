use crate::auth::{adapter_auth, admin_auth, resolve_session, user_auth, MaybeUser, SessionToken};
use crate::backend::{bookable, BookingBackend};
use crate::configuration::Configuration;
use crate::error::BackendError;
use crate::schedule::{day_bounds, distinct_dates, local_date};
use crate::types::{
    normalize_email, normalize_zip_code, Appointment, AppointmentFilter, AppointmentUpdate,
    AppointmentsOverview, NewAppointment, OAuthProfile, ProfileUpdate, Session, Timeslot, User,
};
use crate::AppState;
use axum::extract::{Path, Query};
use axum::http::header;
use axum::middleware;
use axum::response::sse::{Event, KeepAlive, Sse};
use axum::response::Response;
use axum::{extract::State, http::StatusCode, response::IntoResponse, Extension, Json};
use axum::{
    routing::{delete, get, post, put},
    Router,
};
use axum_valid::Valid;
use chrono::{DateTime, NaiveDate, Utc};
use futures::{Stream, StreamExt};
use lazy_static::lazy_static;
use regex::Regex;
use serde::{Deserialize, Serialize};
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::{error, info};
use uuid::Uuid;
use validator::{Validate, ValidationError};

lazy_static! {
    static ref ZIP_CODE: Regex = Regex::new(r"^\d{5}-?\d{3}$").unwrap();
}

fn not_blank(value: &str) -> Result<(), ValidationError> {
    if value.trim().is_empty() {
        return Err(ValidationError::new("blank"));
    }
    Ok(())
}

#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
struct BookingRequest {
    timeslot_id: Uuid,
    #[validate(custom(function = "not_blank", message = "Pet name is required"))]
    pet_name: String,
    #[validate(custom(function = "not_blank", message = "Species is required"))]
    species: String,
    #[validate(custom(function = "not_blank", message = "Reason is required"))]
    reason: String,
    #[serde(default)]
    pickup_at_home: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
struct UpdateAppointmentRequest {
    #[validate(custom(function = "not_blank", message = "Pet name is required"))]
    pet_name: String,
    #[validate(custom(function = "not_blank", message = "Species is required"))]
    species: String,
    #[validate(custom(function = "not_blank", message = "Reason is required"))]
    reason: String,
    #[serde(default)]
    pickup_at_home: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
struct ProfileRequest {
    #[validate(regex(path = *ZIP_CODE, message = "Zip code must have 8 digits"))]
    zip_code: String,
    #[validate(custom(function = "not_blank", message = "Street is required"))]
    address_street: String,
    #[validate(custom(function = "not_blank", message = "Number is required"))]
    address_number: String,
    address_complement: Option<String>,
    name: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
struct SessionRequest {
    #[validate(custom(function = "not_blank"))]
    provider: String,
    #[validate(custom(function = "not_blank"))]
    provider_account_id: String,
    #[validate(email)]
    email: String,
    name: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct AddTimeslotRequest {
    datetime: DateTime<Utc>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
struct DateQuery {
    date: Option<NaiveDate>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct UserProfile {
    user: User,
    appointments: AppointmentsOverview,
}

impl IntoResponse for BackendError {
    fn into_response(self) -> Response {
        let status = match &self {
            BackendError::NotFound(_) => StatusCode::NOT_FOUND,
            BackendError::AlreadyBooked
            | BackendError::Conflict(_)
            | BackendError::AddressRequired => StatusCode::CONFLICT,
            BackendError::Validation(_) => StatusCode::BAD_REQUEST,
            BackendError::Unauthorized => StatusCode::UNAUTHORIZED,
            BackendError::Forbidden(_) => StatusCode::FORBIDDEN,
            BackendError::Database(_) => StatusCode::INTERNAL_SERVER_ERROR,
        };
        let message = match self {
            BackendError::Database(err) => {
                error!(%err, "Request failed");
                "Database Error".to_string()
            }
            err => err.to_string(),
        };
        (status, message).into_response()
    }
}

fn optional_text(value: Option<String>) -> Option<String> {
    value
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty())
}

fn day_filter(
    date: Option<NaiveDate>,
) -> Result<Option<(DateTime<Utc>, DateTime<Utc>)>, BackendError> {
    date.map(|date| {
        day_bounds(date).ok_or_else(|| BackendError::Validation(format!("Invalid date {date}")))
    })
    .transpose()
}

pub fn create_app<T: BookingBackend, C: Configuration>(backend: T, configuration: C) -> Router {
    let state = AppState {
        backend,
        configuration,
    };

    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    let public = Router::new()
        .route("/timeslots", get(get_timeslots::<T, C>))
        .route("/timeslots/dates", get(get_available_dates::<T, C>))
        .route("/timeslots/stream", get(timeslot_stream::<T, C>))
        .route("/appointments", post(book_appointment::<T, C>));

    let adapter = Router::new()
        .route("/auth/session", post(create_session::<T, C>))
        .route_layer(middleware::from_fn_with_state(
            state.clone(),
            adapter_auth::<T, C>,
        ));

    let signed_in = Router::new()
        .route("/me", get(get_me).put(update_me::<T, C>))
        .route("/me/appointments", get(get_my_appointments::<T, C>))
        .route(
            "/appointments/{id}",
            put(update_appointment::<T, C>).delete(cancel_appointment::<T, C>),
        )
        .route("/signout", post(sign_out::<T, C>))
        .route_layer(middleware::from_fn(user_auth));

    let admin = Router::new()
        .route(
            "/admin/timeslots",
            get(get_all_timeslots::<T, C>).post(add_timeslot::<T, C>),
        )
        .route("/admin/timeslots/{id}", delete(remove_timeslot::<T, C>))
        .route("/admin/appointments", get(get_appointments::<T, C>))
        .route("/admin/booked_dates", get(get_booked_dates::<T, C>))
        .route("/admin/users/{email}", get(get_user_profile::<T, C>))
        .route_layer(middleware::from_fn(admin_auth));

    Router::new()
        .merge(public)
        .merge(adapter)
        .merge(signed_in)
        .merge(admin)
        .layer(middleware::from_fn_with_state(
            state.clone(),
            resolve_session::<T, C>,
        ))
        .with_state(state)
        .layer(cors)
        .layer(TraceLayer::new_for_http())
}

async fn get_timeslots<T: BookingBackend, C: Configuration>(
    State(state): State<AppState<T, C>>,
    Query(query): Query<DateQuery>,
) -> Result<Json<Vec<Timeslot>>, BackendError> {
    let mut timeslots = bookable(state.backend.timeslots()?, Utc::now());
    if let Some(date) = query.date {
        timeslots.retain(|timeslot| local_date(timeslot.datetime) == date);
    }
    Ok(Json(timeslots))
}

async fn get_available_dates<T: BookingBackend, C: Configuration>(
    State(state): State<AppState<T, C>>,
) -> Result<Json<Vec<NaiveDate>>, BackendError> {
    let timeslots = bookable(state.backend.timeslots()?, Utc::now());
    Ok(Json(distinct_dates(
        timeslots.into_iter().map(|timeslot| timeslot.datetime),
    )))
}

async fn timeslot_stream<T: BookingBackend, C: Configuration>(
    State(state): State<AppState<T, C>>,
) -> Sse<impl Stream<Item = Result<Event, axum::Error>>> {
    // slots may have passed since the last change was published
    let stream = state
        .backend
        .timeslot_stream()
        .map(|timeslots| Event::default().json_data(bookable(timeslots, Utc::now())));
    Sse::new(stream).keep_alive(KeepAlive::default())
}

async fn book_appointment<T: BookingBackend, C: Configuration>(
    State(state): State<AppState<T, C>>,
    MaybeUser(user): MaybeUser,
    Valid(Json(booking)): Valid<Json<BookingRequest>>,
) -> Result<(StatusCode, Json<Appointment>), BackendError> {
    let appointment = state.backend.book_appointment(NewAppointment {
        timeslot_id: booking.timeslot_id,
        pet_name: booking.pet_name.trim().to_string(),
        species: booking.species.trim().to_string(),
        reason: booking.reason.trim().to_string(),
        pickup_at_home: booking.pickup_at_home,
        user_id: user.map(|user| user.id),
    })?;
    info!(id = %appointment.id, timeslot = %appointment.timeslot_id, "Appointment booked");
    Ok((StatusCode::CREATED, Json(appointment)))
}

async fn create_session<T: BookingBackend, C: Configuration>(
    State(state): State<AppState<T, C>>,
    Valid(Json(request)): Valid<Json<SessionRequest>>,
) -> Result<impl IntoResponse, BackendError> {
    let lifetime = state.configuration.session_lifetime();
    let session: Session = state.backend.sign_in(
        OAuthProfile {
            provider: request.provider,
            provider_account_id: request.provider_account_id,
            email: normalize_email(&request.email),
            name: optional_text(request.name),
        },
        Utc::now() + lifetime,
    )?;
    info!(user = %session.user_id, "Session created");

    let cookie = format!(
        "{}={}; Path=/; Max-Age={}; HttpOnly; SameSite=Lax",
        state.configuration.session_cookie_name(),
        session.session_token,
        lifetime.num_seconds()
    );
    Ok((StatusCode::CREATED, [(header::SET_COOKIE, cookie)], Json(session)))
}

async fn get_me(Extension(user): Extension<User>) -> Json<User> {
    Json(user)
}

async fn update_me<T: BookingBackend, C: Configuration>(
    State(state): State<AppState<T, C>>,
    Extension(user): Extension<User>,
    Valid(Json(profile)): Valid<Json<ProfileRequest>>,
) -> Result<Json<User>, BackendError> {
    let user = state.backend.update_profile(
        user.id,
        ProfileUpdate {
            zip_code: normalize_zip_code(&profile.zip_code),
            address_street: profile.address_street.trim().to_string(),
            address_number: profile.address_number.trim().to_string(),
            address_complement: optional_text(profile.address_complement),
            name: optional_text(profile.name),
        },
    )?;
    Ok(Json(user))
}

async fn get_my_appointments<T: BookingBackend, C: Configuration>(
    State(state): State<AppState<T, C>>,
    Extension(user): Extension<User>,
) -> Result<Json<AppointmentsOverview>, BackendError> {
    let appointments = state.backend.appointments(AppointmentFilter {
        user_id: Some(user.id),
        between: None,
    })?;
    Ok(Json(AppointmentsOverview::split(appointments, Utc::now())))
}

/// Appointments may be changed by the client who booked them or by staff.
fn authorize_appointment<T: BookingBackend>(
    backend: &T,
    user: &User,
    id: Uuid,
) -> Result<(), BackendError> {
    let appointment = backend.appointment(id)?;
    if user.is_admin() || appointment.user_id == Some(user.id) {
        return Ok(());
    }
    Err(BackendError::Forbidden(
        "Appointment belongs to another client".into(),
    ))
}

async fn update_appointment<T: BookingBackend, C: Configuration>(
    State(state): State<AppState<T, C>>,
    Extension(user): Extension<User>,
    Path(id): Path<Uuid>,
    Valid(Json(update)): Valid<Json<UpdateAppointmentRequest>>,
) -> Result<Json<Appointment>, BackendError> {
    authorize_appointment(&state.backend, &user, id)?;
    let appointment = state.backend.update_appointment(
        id,
        AppointmentUpdate {
            pet_name: update.pet_name.trim().to_string(),
            species: update.species.trim().to_string(),
            reason: update.reason.trim().to_string(),
            pickup_at_home: update.pickup_at_home,
        },
    )?;
    Ok(Json(appointment))
}

async fn cancel_appointment<T: BookingBackend, C: Configuration>(
    State(state): State<AppState<T, C>>,
    Extension(user): Extension<User>,
    Path(id): Path<Uuid>,
) -> Result<(StatusCode, String), BackendError> {
    authorize_appointment(&state.backend, &user, id)?;
    state.backend.cancel_appointment(id)?;
    info!(%id, "Appointment cancelled");
    Ok((StatusCode::OK, "Appointment cancelled successfully".to_string()))
}

async fn sign_out<T: BookingBackend, C: Configuration>(
    State(state): State<AppState<T, C>>,
    Extension(SessionToken(token)): Extension<SessionToken>,
) -> Result<impl IntoResponse, BackendError> {
    state.backend.sign_out(&token)?;
    let expired_cookie = format!(
        "{}=; Path=/; Max-Age=0; HttpOnly; SameSite=Lax",
        state.configuration.session_cookie_name()
    );
    Ok((
        StatusCode::OK,
        [(header::SET_COOKIE, expired_cookie)],
        "Signed out".to_string(),
    ))
}

async fn get_all_timeslots<T: BookingBackend, C: Configuration>(
    State(state): State<AppState<T, C>>,
) -> Result<Json<Vec<Timeslot>>, BackendError> {
    Ok(Json(state.backend.timeslots()?))
}

async fn add_timeslot<T: BookingBackend, C: Configuration>(
    State(state): State<AppState<T, C>>,
    Json(request): Json<AddTimeslotRequest>,
) -> Result<(StatusCode, Json<Timeslot>), BackendError> {
    let timeslot = state.backend.add_timeslot(request.datetime)?;
    Ok((StatusCode::CREATED, Json(timeslot)))
}

async fn remove_timeslot<T: BookingBackend, C: Configuration>(
    State(state): State<AppState<T, C>>,
    Path(id): Path<Uuid>,
) -> Result<(StatusCode, String), BackendError> {
    state.backend.remove_timeslot(id)?;
    Ok((StatusCode::OK, "Timeslot removed successfully".to_string()))
}

async fn get_appointments<T: BookingBackend, C: Configuration>(
    State(state): State<AppState<T, C>>,
    Query(query): Query<DateQuery>,
) -> Result<impl IntoResponse, BackendError> {
    let appointments = state.backend.appointments(AppointmentFilter {
        user_id: None,
        between: day_filter(query.date)?,
    })?;
    Ok(Json(appointments))
}

async fn get_booked_dates<T: BookingBackend, C: Configuration>(
    State(state): State<AppState<T, C>>,
) -> Result<Json<Vec<NaiveDate>>, BackendError> {
    let timeslots = state.backend.timeslots()?;
    Ok(Json(distinct_dates(
        timeslots
            .into_iter()
            .filter(|timeslot| !timeslot.is_available)
            .map(|timeslot| timeslot.datetime),
    )))
}

async fn get_user_profile<T: BookingBackend, C: Configuration>(
    State(state): State<AppState<T, C>>,
    Path(email): Path<String>,
) -> Result<Json<UserProfile>, BackendError> {
    let user = state.backend.user_by_email(&email)?;
    let appointments = state.backend.appointments(AppointmentFilter {
        user_id: Some(user.id),
        between: None,
    })?;
    Ok(Json(UserProfile {
        user,
        appointments: AppointmentsOverview::split(appointments, Utc::now()),
    }))
}
