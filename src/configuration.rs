use chrono::Duration;

pub trait Configuration: Clone + Send + Sync + 'static {
    fn host(&self) -> String;
    fn port(&self) -> String;
    fn database_url(&self) -> Option<String>;
    fn session_cookie_name(&self) -> String;
    fn session_lifetime(&self) -> Duration;
    /// Shared secret of the OAuth service that hands over signed-in users.
    fn auth_secret(&self) -> Option<String>;
}
