//! Connection configuration types.

use std::sync::Arc;
use std::time::Duration;

use crate::mailbox_name::{MailboxNameCodec, ModifiedUtf7};
use crate::protocol::{DEFAULT_BODY_BUFFER, Keepalive, Settings};

/// Default limit for connecting and logging in.
pub const DEFAULT_CONN_TIMEOUT: Duration = Duration::from_secs(10);

/// Default limit for the credential exchange.
pub const DEFAULT_AUTH_TIMEOUT: Duration = Duration::from_secs(5);

/// Connection security mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Security {
    /// No encryption (port 143). **Not recommended for production.**
    None,
    /// Start with plaintext, upgrade with STARTTLS (port 143).
    StartTls,
    /// TLS from the start (port 993). **Recommended.**
    #[default]
    Implicit,
}

impl Security {
    /// Returns the default port for this security mode.
    #[must_use]
    pub const fn default_port(self) -> u16 {
        match self {
            Self::None | Self::StartTls => 143,
            Self::Implicit => 993,
        }
    }
}

/// Whether a plain connection upgrades with STARTTLS.
///
/// [`Security::StartTls`] behaves like [`AutoTls::Required`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum AutoTls {
    /// Stay in plaintext.
    #[default]
    Never,
    /// Upgrade when the server advertises STARTTLS.
    Always,
    /// Upgrade, failing when STARTTLS is not advertised.
    Required,
}

/// Login credentials.
#[derive(Clone, Default, PartialEq, Eq)]
pub enum Credentials {
    /// No login; the server must greet with PREAUTH.
    #[default]
    None,
    /// `LOGIN user password`.
    Login {
        /// User name.
        user: String,
        /// Password.
        password: String,
    },
    /// `AUTHENTICATE XOAUTH` with a pre-built token.
    XOAuth(String),
    /// `AUTHENTICATE XOAUTH2` with a pre-built token.
    XOAuth2(String),
}

impl Credentials {
    /// Builds `LOGIN` credentials.
    #[must_use]
    pub fn login(user: impl Into<String>, password: impl Into<String>) -> Self {
        Self::Login {
            user: user.into(),
            password: password.into(),
        }
    }
}

impl std::fmt::Debug for Credentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::None => f.write_str("None"),
            Self::Login { user, .. } => {
                f.debug_struct("Login").field("user", user).finish_non_exhaustive()
            }
            Self::XOAuth(_) => f.write_str("XOAuth(..)"),
            Self::XOAuth2(_) => f.write_str("XOAuth2(..)"),
        }
    }
}

/// IMAP connection configuration.
#[derive(Debug, Clone)]
pub struct Config {
    /// Server hostname.
    pub host: String,
    /// Server port.
    pub port: u16,
    /// Security mode.
    pub security: Security,
    /// STARTTLS policy for plain connections.
    pub auto_tls: AutoTls,
    /// Login credentials.
    pub credentials: Credentials,
    /// Limit for the whole connect and login sequence.
    pub conn_timeout: Duration,
    /// Limit for the credential exchange.
    pub auth_timeout: Duration,
    /// Maximum socket inactivity; `None` waits forever.
    pub socket_timeout: Option<Duration>,
    /// Keepalive scheduling; `None` disables it.
    pub keepalive: Option<Keepalive>,
    /// Capacity, in chunks, of each body stream.
    pub body_buffer: usize,
    /// Mailbox-name codec.
    pub codec: Arc<dyn MailboxNameCodec>,
    /// TLS client configuration; the webpki roots are used when `None`.
    pub tls: Option<Arc<rustls::ClientConfig>>,
}

impl Config {
    /// Creates a new configuration with implicit TLS on port 993.
    #[must_use]
    pub fn new(host: impl Into<String>) -> Self {
        ConfigBuilder::new(host).build()
    }

    /// Creates a configuration builder.
    #[must_use]
    pub fn builder(host: impl Into<String>) -> ConfigBuilder {
        ConfigBuilder::new(host)
    }

    /// Whether STARTTLS must be negotiated on a plain connection.
    #[must_use]
    pub fn starttls_policy(&self) -> AutoTls {
        match self.security {
            Security::StartTls => AutoTls::Required,
            Security::Implicit => AutoTls::Never,
            Security::None => self.auto_tls,
        }
    }

    pub(crate) fn settings(&self) -> Settings {
        Settings {
            keepalive: self.keepalive,
            body_buffer: self.body_buffer,
            codec: Arc::clone(&self.codec),
        }
    }
}

/// Builder for connection configuration.
#[derive(Debug, Clone)]
pub struct ConfigBuilder {
    host: String,
    port: Option<u16>,
    security: Security,
    auto_tls: AutoTls,
    credentials: Credentials,
    conn_timeout: Duration,
    auth_timeout: Duration,
    socket_timeout: Option<Duration>,
    keepalive: Option<Keepalive>,
    body_buffer: usize,
    codec: Arc<dyn MailboxNameCodec>,
    tls: Option<Arc<rustls::ClientConfig>>,
}

impl ConfigBuilder {
    /// Creates a new builder with the given hostname.
    #[must_use]
    pub fn new(host: impl Into<String>) -> Self {
        Self {
            host: host.into(),
            port: None,
            security: Security::Implicit,
            auto_tls: AutoTls::Never,
            credentials: Credentials::None,
            conn_timeout: DEFAULT_CONN_TIMEOUT,
            auth_timeout: DEFAULT_AUTH_TIMEOUT,
            socket_timeout: None,
            keepalive: Some(Keepalive::default()),
            body_buffer: DEFAULT_BODY_BUFFER,
            codec: Arc::new(ModifiedUtf7),
            tls: None,
        }
    }

    /// Sets the port.
    #[must_use]
    pub const fn port(mut self, port: u16) -> Self {
        self.port = Some(port);
        self
    }

    /// Sets the security mode.
    #[must_use]
    pub const fn security(mut self, security: Security) -> Self {
        self.security = security;
        self
    }

    /// Sets the STARTTLS policy for plain connections.
    #[must_use]
    pub const fn auto_tls(mut self, auto_tls: AutoTls) -> Self {
        self.auto_tls = auto_tls;
        self
    }

    /// Logs in with user name and password.
    #[must_use]
    pub fn login(mut self, user: impl Into<String>, password: impl Into<String>) -> Self {
        self.credentials = Credentials::login(user, password);
        self
    }

    /// Sets the credentials.
    #[must_use]
    pub fn credentials(mut self, credentials: Credentials) -> Self {
        self.credentials = credentials;
        self
    }

    /// Sets the connect and login timeout.
    #[must_use]
    pub const fn conn_timeout(mut self, timeout: Duration) -> Self {
        self.conn_timeout = timeout;
        self
    }

    /// Sets the credential exchange timeout.
    #[must_use]
    pub const fn auth_timeout(mut self, timeout: Duration) -> Self {
        self.auth_timeout = timeout;
        self
    }

    /// Sets the socket inactivity timeout.
    #[must_use]
    pub const fn socket_timeout(mut self, timeout: Duration) -> Self {
        self.socket_timeout = Some(timeout);
        self
    }

    /// Sets keepalive scheduling; `None` disables it.
    #[must_use]
    pub const fn keepalive(mut self, keepalive: Option<Keepalive>) -> Self {
        self.keepalive = keepalive;
        self
    }

    /// Sets the capacity of body streams.
    #[must_use]
    pub const fn body_buffer(mut self, chunks: usize) -> Self {
        self.body_buffer = chunks;
        self
    }

    /// Sets the mailbox-name codec.
    #[must_use]
    pub fn codec(mut self, codec: Arc<dyn MailboxNameCodec>) -> Self {
        self.codec = codec;
        self
    }

    /// Uses a custom TLS client configuration.
    #[must_use]
    pub fn tls_config(mut self, config: Arc<rustls::ClientConfig>) -> Self {
        self.tls = Some(config);
        self
    }

    /// Builds the configuration.
    #[must_use]
    pub fn build(self) -> Config {
        Config {
            host: self.host,
            port: self.port.unwrap_or_else(|| self.security.default_port()),
            security: self.security,
            auto_tls: self.auto_tls,
            credentials: self.credentials,
            conn_timeout: self.conn_timeout,
            auth_timeout: self.auth_timeout,
            socket_timeout: self.socket_timeout,
            keepalive: self.keepalive,
            body_buffer: self.body_buffer,
            codec: self.codec,
            tls: self.tls,
        }
    }
}

#[cfg(test)]
#[allow(
    clippy::unwrap_used,
    clippy::redundant_clone,
    clippy::manual_string_new,
    clippy::needless_collect,
    clippy::unreadable_literal,
    clippy::used_underscore_items,
    clippy::similar_names
)]
mod tests {
    use super::*;
    use crate::mailbox_name::Utf8Names;

    #[test]
    fn test_default_ports() {
        assert_eq!(Security::None.default_port(), 143);
        assert_eq!(Security::StartTls.default_port(), 143);
        assert_eq!(Security::Implicit.default_port(), 993);
    }

    #[test]
    fn test_config_defaults() {
        let config = Config::new("imap.example.com");
        assert_eq!(config.host, "imap.example.com");
        assert_eq!(config.port, 993);
        assert_eq!(config.security, Security::Implicit);
        assert_eq!(config.conn_timeout, Duration::from_secs(10));
        assert_eq!(config.auth_timeout, Duration::from_secs(5));
        assert_eq!(config.socket_timeout, None);
        assert_eq!(config.keepalive, Some(Keepalive::default()));
        assert_eq!(config.body_buffer, 16);
        assert_eq!(config.credentials, Credentials::None);
    }

    #[test]
    fn test_config_builder() {
        let config = Config::builder("imap.example.com")
            .security(Security::None)
            .auto_tls(AutoTls::Always)
            .login("foo", "bar")
            .conn_timeout(Duration::from_secs(3))
            .socket_timeout(Duration::from_secs(60))
            .keepalive(None)
            .body_buffer(4)
            .codec(Arc::new(Utf8Names))
            .build();

        assert_eq!(config.port, 143);
        assert_eq!(config.starttls_policy(), AutoTls::Always);
        assert_eq!(config.credentials, Credentials::login("foo", "bar"));
        assert_eq!(config.conn_timeout, Duration::from_secs(3));
        assert_eq!(config.socket_timeout, Some(Duration::from_secs(60)));
        let settings = config.settings();
        assert!(settings.keepalive.is_none());
        assert_eq!(settings.body_buffer, 4);
    }

    #[test]
    fn test_starttls_policy_follows_security() {
        let implicit = Config::builder("h").auto_tls(AutoTls::Required).build();
        assert_eq!(implicit.starttls_policy(), AutoTls::Never);
        let starttls = Config::builder("h").security(Security::StartTls).build();
        assert_eq!(starttls.starttls_policy(), AutoTls::Required);
    }

    #[test]
    fn test_credentials_debug_hides_secrets() {
        let text = format!("{:?}", Credentials::login("alice", "hunter2"));
        assert!(text.contains("alice"));
        assert!(!text.contains("hunter2"));
        assert_eq!(format!("{:?}", Credentials::XOAuth2("tok".into())), "XOAuth2(..)");
    }
}
