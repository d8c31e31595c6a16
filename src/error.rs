use thiserror::Error;

#[derive(Debug, Error, PartialEq)]
pub enum BackendError {
    #[error("{0} does not exist")]
    NotFound(&'static str),

    #[error("Timeslot was already booked")]
    AlreadyBooked,

    #[error("{0}")]
    Conflict(String),

    #[error("{0}")]
    Validation(String),

    #[error("Home pickup requires a saved address")]
    AddressRequired,

    #[error("Not signed in")]
    Unauthorized,

    #[error("Not allowed: {0}")]
    Forbidden(String),

    #[error("Database error: {0}")]
    Database(String),
}

impl From<diesel::result::Error> for BackendError {
    fn from(err: diesel::result::Error) -> Self {
        match err {
            diesel::result::Error::DatabaseError(
                diesel::result::DatabaseErrorKind::UniqueViolation,
                info,
            ) => BackendError::Conflict(info.message().to_string()),
            err => BackendError::Database(err.to_string()),
        }
    }
}
