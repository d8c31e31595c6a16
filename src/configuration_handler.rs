use crate::configuration::Configuration;
use chrono::Duration;
use clap::{Parser, Subcommand};

#[derive(Debug, Clone, Parser)]
#[command(name = "agenda_vet", about = "Veterinary clinic appointment booking service")]
pub struct ConfigurationHandler {
    /// Address the HTTP server binds to
    #[arg(long, env = "HOST", default_value = "0.0.0.0")]
    host: String,

    #[arg(short, long, env = "PORT", default_value = "3000")]
    port: String,

    /// PostgreSQL connection URL. Without it everything is kept in memory.
    #[arg(short, long, env = "DATABASE_URL")]
    database_url: Option<String>,

    #[arg(long, env = "SESSION_COOKIE_NAME", default_value = "session_token")]
    session_cookie_name: String,

    #[arg(long, env = "SESSION_LIFETIME_DAYS", default_value_t = 30)]
    session_lifetime_days: i64,

    /// Secret expected in the `x-auth-secret` header when creating sessions
    #[arg(long, env = "AUTH_SECRET")]
    auth_secret: Option<String>,

    #[command(subcommand)]
    pub command: Option<Command>,
}

#[derive(Debug, Clone, Subcommand)]
pub enum Command {
    /// Run the HTTP server (default)
    Serve,
    /// Insert weekday timeslots for the next month
    Seed,
    /// Give a signed-up user the admin role
    GrantAdmin { email: String },
    /// Take the admin role away from a user
    RevokeAdmin { email: String },
}

impl Command {
    /// Everything but the server works on stored data, which memory would lose on exit.
    pub fn requires_database(&self) -> bool {
        !matches!(self, Command::Serve)
    }
}

impl ConfigurationHandler {
    pub fn parse_arguments() -> Self {
        dotenvy::dotenv().ok();
        Self::parse()
    }
}

impl Configuration for ConfigurationHandler {
    fn host(&self) -> String {
        self.host.clone()
    }

    fn port(&self) -> String {
        self.port.clone()
    }

    fn database_url(&self) -> Option<String> {
        self.database_url.clone().filter(|url| !url.is_empty())
    }

    fn session_cookie_name(&self) -> String {
        self.session_cookie_name.clone()
    }

    fn session_lifetime(&self) -> Duration {
        Duration::days(self.session_lifetime_days)
    }

    fn auth_secret(&self) -> Option<String> {
        self.auth_secret.clone().filter(|secret| !secret.is_empty())
    }
}
