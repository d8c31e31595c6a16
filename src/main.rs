use std::time::Duration;

use crate::{
    backend::BookingBackend,
    configuration::Configuration,
    configuration_handler::{Command, ConfigurationHandler},
    database_interface::DatabaseInterface,
    http::create_app,
    local_backend::LocalBackend,
    types::Role,
};
use chrono::Local;
use tokio::time::sleep;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

mod auth;
mod backend;
mod configuration;
mod configuration_handler;
mod database_interface;
mod error;
mod http;
mod local_backend;
mod schedule;
mod schema;
#[cfg(test)]
mod testutils;
mod types;

#[derive(Clone)]
pub(crate) struct AppState<T, C> {
    backend: T,
    configuration: C,
}

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    let configuration = ConfigurationHandler::parse_arguments();

    if let Some(database_url) = configuration.database_url() {
        let backend = loop {
            match DatabaseInterface::new(&database_url) {
                Ok(backend) => {
                    info!("Successfully connected to database");
                    break backend;
                }
                Err(err) => {
                    error!(
                        ?err,
                        "Failed to establish database connection. Retry in 1 sec. \
                         You may want to restart it with database disabled (impersistent data)."
                    );
                    sleep(Duration::from_secs(1)).await;
                }
            }
        };
        run(backend, configuration).await;
    } else if let Some(command) = configuration
        .command
        .as_ref()
        .filter(|command| command.requires_database())
    {
        error!(?command, "No database configured. Set DATABASE_URL to run this command");
        std::process::exit(1);
    } else {
        warn!("No database configured, appointments are kept in memory only");
        run(LocalBackend::default(), configuration).await;
    }
}

async fn run<T: BookingBackend>(backend: T, configuration: ConfigurationHandler) {
    match configuration.command.clone() {
        None | Some(Command::Serve) => serve(backend, configuration).await,
        Some(Command::Seed) => seed(&backend),
        Some(Command::GrantAdmin { email }) => set_role(&backend, &email, Role::Admin),
        Some(Command::RevokeAdmin { email }) => set_role(&backend, &email, Role::User),
    }
}

async fn serve<T: BookingBackend>(backend: T, configuration: ConfigurationHandler) {
    println!("#############");
    println!("# AgendaVet #");
    println!("#############");

    let address = format!("{}:{}", configuration.host(), configuration.port());
    let listener = match tokio::net::TcpListener::bind(&address).await {
        Ok(listener) => listener,
        Err(err) => {
            error!(?err, "Failed to bind {address}");
            std::process::exit(1);
        }
    };
    info!("Accessible at {address}");

    let app = create_app(backend, configuration);
    if let Err(err) = axum::serve(listener, app).await {
        error!(?err, "Server stopped");
        std::process::exit(1);
    }
}

fn seed<T: BookingBackend>(backend: &T) {
    let datetimes = schedule::seed_datetimes(Local::now().date_naive())
        .into_iter()
        .filter_map(schedule::to_utc)
        .collect();

    match backend.add_timeslots(datetimes) {
        Ok(added) => info!(added, "Timeslots for the next month have been added"),
        Err(err) => {
            error!(%err, "Error adding timeslots");
            std::process::exit(1);
        }
    }
}

fn set_role<T: BookingBackend>(backend: &T, email: &str, role: Role) {
    match backend.set_role(email, role) {
        Ok(user) => info!(email = %user.email, role = user.role.as_str(), "Role updated"),
        Err(err) => {
            error!(%err, "Failed to update role of {email}");
            std::process::exit(1);
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::testutils::MockBackend;
    use crate::types::OAuthProfile;
    use chrono::{Duration, Utc};
    use std::sync::atomic::Ordering;

    #[test]
    fn test_seed_inserts_upcoming_timeslots_at_once() {
        let mock_backend = MockBackend::new();
        seed(&mock_backend);
        assert_eq!(
            mock_backend.0.calls_to_add_timeslots.load(Ordering::SeqCst),
            1
        );
    }

    #[test]
    fn test_set_role_of_signed_up_user() {
        let local_backend = LocalBackend::default();
        local_backend
            .sign_in(
                OAuthProfile {
                    provider: "google".into(),
                    provider_account_id: "1234".into(),
                    email: "vet@example.com".into(),
                    name: None,
                },
                Utc::now() + Duration::days(1),
            )
            .unwrap();

        set_role(&local_backend, "Vet@Example.com", Role::Admin);
        assert!(local_backend.user_by_email("vet@example.com").unwrap().is_admin());
    }
}
