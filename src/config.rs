//! Listener and IMAP connection configuration
//!
//! All options are fixed when a [`MailListener`](crate::MailListener)
//! is built. They can be assembled in code or loaded from environment
//! variables (and a `.env` file) with [`ListenerConfig::from_env`].

use crate::error::{Error, Result};
use crate::label::{Label, LabelMode};
use crate::parser::ParserOptions;
use std::env;
use std::fmt;
use std::num::NonZeroUsize;
use std::str::FromStr;
use std::time::Duration;
use tracing::warn;

/// Default IDLE re-issue interval.
pub const DEFAULT_IDLE_TIMEOUT_SECS: u64 = 300;

/// Default NOOP poll interval for servers without IDLE.
pub const DEFAULT_POLL_INTERVAL_SECS: u64 = 60;

/// Default number of messages fetched concurrently per discovery run.
pub const DEFAULT_FETCH_CONCURRENCY: usize = 8;

/// How the transport is secured.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum TlsMode {
    /// TLS from the first byte (usually port 993).
    #[default]
    Implicit,
    /// Plain TCP upgraded with `STARTTLS` (usually port 143).
    StartTls,
}

impl TlsMode {
    #[must_use]
    pub const fn default_port(self) -> u16 {
        match self {
            Self::Implicit => 993,
            Self::StartTls => 143,
        }
    }
}

impl FromStr for TlsMode {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "implicit" | "tls" | "ssl" => Ok(Self::Implicit),
            "starttls" => Ok(Self::StartTls),
            other => Err(Error::Config(format!("Invalid TLS mode: {other}"))),
        }
    }
}

/// How the session authenticates.
#[derive(Clone, PartialEq, Eq)]
pub enum Credentials {
    /// `LOGIN user password`
    Password { username: String, password: String },
    /// `AUTHENTICATE XOAUTH2` with a bearer token
    XOAuth2 {
        username: String,
        access_token: String,
    },
}

impl Credentials {
    #[must_use]
    pub fn username(&self) -> &str {
        match self {
            Self::Password { username, .. } | Self::XOAuth2 { username, .. } => username,
        }
    }
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Password { username, .. } => f
                .debug_struct("Password")
                .field("username", username)
                .field("password", &"<redacted>")
                .finish(),
            Self::XOAuth2 { username, .. } => f
                .debug_struct("XOAuth2")
                .field("username", username)
                .field("access_token", &"<redacted>")
                .finish(),
        }
    }
}

/// IMAP connection parameters, passed through to the session unmodified.
#[derive(Debug, Clone)]
pub struct ImapConfig {
    pub host: String,
    pub port: u16,
    pub credentials: Credentials,
    pub tls: TlsMode,
    /// Accept self-signed or otherwise unverifiable certificates
    /// (local bridges such as Proton Bridge).
    pub accept_invalid_certs: bool,
    pub connect_timeout: Option<Duration>,
    pub auth_timeout: Option<Duration>,
    /// Log every protocol command at info level instead of trace.
    pub debug: bool,
    pub label_mode: LabelMode,
}

impl ImapConfig {
    /// Password-authenticated config over implicit TLS with defaults
    /// for everything else.
    #[must_use]
    pub fn new(
        host: impl Into<String>,
        username: impl Into<String>,
        password: impl Into<String>,
    ) -> Self {
        Self {
            host: host.into(),
            port: TlsMode::Implicit.default_port(),
            credentials: Credentials::Password {
                username: username.into(),
                password: password.into(),
            },
            tls: TlsMode::Implicit,
            accept_invalid_certs: false,
            connect_timeout: None,
            auth_timeout: None,
            debug: false,
            label_mode: LabelMode::Keywords,
        }
    }

    /// Load IMAP configuration from environment variables
    ///
    /// Reads from `.env` file if present. Required variables:
    /// - `IMAP_USERNAME`
    /// - `IMAP_PASSWORD` or `IMAP_XOAUTH2_TOKEN`
    ///
    /// Optional (with defaults):
    /// - `IMAP_HOST` (default: `127.0.0.1`)
    /// - `IMAP_TLS` (`implicit` or `starttls`, default: `implicit`)
    /// - `IMAP_PORT` (default: 993 for implicit TLS, 143 for STARTTLS)
    /// - `IMAP_ACCEPT_INVALID_CERTS`, `IMAP_DEBUG` (default: false)
    /// - `IMAP_CONNECT_TIMEOUT_MS`, `IMAP_AUTH_TIMEOUT_MS` (default: none)
    /// - `IMAP_LABEL_MODE` (`keywords` or `gmail`, default: `keywords`)
    ///
    /// # Errors
    ///
    /// Returns [`Error::Config`] if a required variable is missing or a
    /// value cannot be parsed.
    pub fn from_env() -> Result<Self> {
        dotenvy::dotenv().ok();
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Same as [`ImapConfig::from_env`], reading values through `lookup`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Config`] on missing or malformed values.
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let tls = lookup("IMAP_TLS")
            .map(|v| v.parse::<TlsMode>())
            .transpose()?
            .unwrap_or_default();

        let username = lookup("IMAP_USERNAME")
            .ok_or_else(|| Error::Config("IMAP_USERNAME not set".into()))?;
        let credentials = match (lookup("IMAP_XOAUTH2_TOKEN"), lookup("IMAP_PASSWORD")) {
            (Some(access_token), _) => Credentials::XOAuth2 {
                username,
                access_token,
            },
            (None, Some(password)) => Credentials::Password { username, password },
            (None, None) => {
                return Err(Error::Config(
                    "IMAP_PASSWORD or IMAP_XOAUTH2_TOKEN must be set".into(),
                ));
            }
        };

        let label_mode = match lookup("IMAP_LABEL_MODE").as_deref().map(str::trim) {
            None | Some("" | "keywords") => LabelMode::Keywords,
            Some("gmail") => LabelMode::Gmail,
            Some(other) => {
                return Err(Error::Config(format!("Invalid IMAP_LABEL_MODE: {other}")));
            }
        };

        Ok(Self {
            host: lookup("IMAP_HOST").unwrap_or_else(|| "127.0.0.1".to_string()),
            port: parse_var(&lookup, "IMAP_PORT")?.unwrap_or_else(|| tls.default_port()),
            credentials,
            tls,
            accept_invalid_certs: parse_flag(&lookup, "IMAP_ACCEPT_INVALID_CERTS")?,
            connect_timeout: parse_var(&lookup, "IMAP_CONNECT_TIMEOUT_MS")?
                .map(Duration::from_millis),
            auth_timeout: parse_var(&lookup, "IMAP_AUTH_TIMEOUT_MS")?.map(Duration::from_millis),
            debug: parse_flag(&lookup, "IMAP_DEBUG")?,
            label_mode,
        })
    }
}

/// Ordered, never-empty list of IMAP search terms.
///
/// Terms are combined with the protocol's implicit conjunction. A bare
/// term converts into a one-element filter.
///
/// ```
/// use mail_listener::SearchFilter;
///
/// assert_eq!(SearchFilter::from("UNSEEN"), SearchFilter::new(["UNSEEN"]).unwrap());
/// assert_eq!(SearchFilter::default().to_query(), "UNSEEN");
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SearchFilter(Vec<String>);

impl SearchFilter {
    /// Build a filter from an ordered list of terms.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Config`] if no non-blank term is given.
    pub fn new<I, T>(terms: I) -> Result<Self>
    where
        I: IntoIterator<Item = T>,
        T: Into<String>,
    {
        let terms: Vec<String> = terms
            .into_iter()
            .map(Into::into)
            .filter(|t| !t.trim().is_empty())
            .collect();
        if terms.is_empty() {
            return Err(Error::Config("Search filter must not be empty".into()));
        }
        Ok(Self(terms))
    }

    #[must_use]
    pub fn terms(&self) -> &[String] {
        &self.0
    }

    /// The filter as a single IMAP `SEARCH` argument string.
    #[must_use]
    pub fn to_query(&self) -> String {
        self.0.join(" ")
    }
}

impl Default for SearchFilter {
    fn default() -> Self {
        Self(vec!["UNSEEN".to_string()])
    }
}

/// A blank term falls back to the default `UNSEEN` filter with a
/// warning. Use [`SearchFilter::new`] to reject it instead.
impl From<&str> for SearchFilter {
    fn from(term: &str) -> Self {
        Self::new([term]).unwrap_or_else(|_| {
            warn!("Blank search term, falling back to UNSEEN");
            Self::default()
        })
    }
}

impl From<String> for SearchFilter {
    fn from(term: String) -> Self {
        Self::from(term.as_str())
    }
}

impl TryFrom<Vec<String>> for SearchFilter {
    type Error = Error;

    fn try_from(terms: Vec<String>) -> Result<Self> {
        Self::new(terms)
    }
}

impl fmt::Display for SearchFilter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_query())
    }
}

/// What happens to attachments of fetched messages.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AttachmentOptions {
    /// Write attachment bytes to `directory`.
    pub enabled: bool,
    /// Literal path prefix; include the trailing separator yourself.
    pub directory: String,
    /// Hand attachment bytes only to the sink instead of also keeping
    /// them in the emitted message.
    pub stream: bool,
}

/// Full listener configuration.
#[derive(Debug, Clone)]
pub struct ListenerConfig {
    pub imap: ImapConfig,
    pub mailbox: String,
    pub processed_mailbox: String,
    pub labels_on_success: Vec<Label>,
    pub labels_on_failure: Vec<Label>,
    pub search_filter: SearchFilter,
    pub mark_seen: bool,
    pub fetch_unread_on_start: bool,
    pub attachments: AttachmentOptions,
    pub parser: ParserOptions,
    /// Upper bound on simultaneously in-flight fetches.
    pub fetch_concurrency: NonZeroUsize,
    pub idle_timeout: Duration,
    pub poll_interval: Duration,
}

impl ListenerConfig {
    #[must_use]
    pub fn new(imap: ImapConfig) -> Self {
        Self {
            imap,
            mailbox: "INBOX".to_string(),
            processed_mailbox: "INBOX".to_string(),
            labels_on_success: Vec::new(),
            labels_on_failure: Vec::new(),
            search_filter: SearchFilter::default(),
            mark_seen: false,
            fetch_unread_on_start: false,
            attachments: AttachmentOptions::default(),
            parser: ParserOptions::default(),
            fetch_concurrency: NonZeroUsize::new(DEFAULT_FETCH_CONCURRENCY)
                .unwrap_or(NonZeroUsize::MIN),
            idle_timeout: Duration::from_secs(DEFAULT_IDLE_TIMEOUT_SECS),
            poll_interval: Duration::from_secs(DEFAULT_POLL_INTERVAL_SECS),
        }
    }

    /// Load the complete listener configuration from the environment.
    ///
    /// Connection variables are documented on [`ImapConfig::from_env`].
    /// Listener variables (all optional):
    /// - `MAIL_MAILBOX`, `MAIL_PROCESSED_MAILBOX` (default: `INBOX`)
    /// - `MAIL_SEARCH_FILTER` (comma-separated terms, default: `UNSEEN`)
    /// - `MAIL_LABELS_ON_SUCCESS`, `MAIL_LABELS_ON_FAILURE` (comma-separated)
    /// - `MAIL_MARK_SEEN`, `MAIL_FETCH_UNREAD_ON_START`
    /// - `MAIL_ATTACHMENTS`, `MAIL_ATTACHMENT_DIR`, `MAIL_ATTACHMENT_STREAM`
    /// - `MAIL_FETCH_CONCURRENCY` (default: 8)
    /// - `MAIL_IDLE_TIMEOUT_SECS` (default: 300)
    /// - `MAIL_POLL_INTERVAL_SECS` (default: 60)
    ///
    /// # Errors
    ///
    /// Returns [`Error::Config`] on missing or malformed values.
    pub fn from_env() -> Result<Self> {
        dotenvy::dotenv().ok();
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Same as [`ListenerConfig::from_env`], reading values through `lookup`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Config`] on missing or malformed values.
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = Self::new(ImapConfig::from_lookup(&lookup)?);

        if let Some(mailbox) = lookup("MAIL_MAILBOX") {
            config.mailbox = mailbox;
        }
        if let Some(processed) = lookup("MAIL_PROCESSED_MAILBOX") {
            config.processed_mailbox = processed;
        }
        if let Some(filter) = lookup("MAIL_SEARCH_FILTER") {
            config.search_filter = SearchFilter::new(filter.split(',').map(str::trim))?;
        }
        if let Some(labels) = lookup("MAIL_LABELS_ON_SUCCESS") {
            config.labels_on_success = Label::parse_list(&labels);
        }
        if let Some(labels) = lookup("MAIL_LABELS_ON_FAILURE") {
            config.labels_on_failure = Label::parse_list(&labels);
        }
        config.mark_seen = parse_flag(&lookup, "MAIL_MARK_SEEN")?;
        config.fetch_unread_on_start = parse_flag(&lookup, "MAIL_FETCH_UNREAD_ON_START")?;
        config.attachments = AttachmentOptions {
            enabled: parse_flag(&lookup, "MAIL_ATTACHMENTS")?,
            directory: lookup("MAIL_ATTACHMENT_DIR").unwrap_or_default(),
            stream: parse_flag(&lookup, "MAIL_ATTACHMENT_STREAM")?,
        };
        if let Some(n) = parse_var::<usize, _>(&lookup, "MAIL_FETCH_CONCURRENCY")? {
            config.fetch_concurrency = NonZeroUsize::new(n)
                .ok_or_else(|| Error::Config("MAIL_FETCH_CONCURRENCY must be at least 1".into()))?;
        }
        if let Some(secs) = parse_var(&lookup, "MAIL_IDLE_TIMEOUT_SECS")? {
            config.idle_timeout = Duration::from_secs(secs);
        }
        if let Some(secs) = parse_var(&lookup, "MAIL_POLL_INTERVAL_SECS")? {
            config.poll_interval = Duration::from_secs(secs);
        }

        config.validate()?;
        Ok(config)
    }

    /// Check the timing options the watch loop depends on.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Config`] if `idle_timeout` or `poll_interval` is
    /// zero, which would make the watch loop spin.
    pub fn validate(&self) -> Result<()> {
        if self.idle_timeout.is_zero() {
            return Err(Error::Config("idle timeout must be greater than zero".into()));
        }
        if self.poll_interval.is_zero() {
            return Err(Error::Config("poll interval must be greater than zero".into()));
        }
        Ok(())
    }
}

fn parse_var<T, F>(lookup: &F, key: &str) -> Result<Option<T>>
where
    T: FromStr,
    T::Err: fmt::Display,
    F: Fn(&str) -> Option<String>,
{
    lookup(key)
        .map(|v| {
            v.trim()
                .parse::<T>()
                .map_err(|e| Error::Config(format!("Invalid {key}: {e}")))
        })
        .transpose()
}

fn parse_flag<F>(lookup: &F, key: &str) -> Result<bool>
where
    F: Fn(&str) -> Option<String>,
{
    let Some(value) = lookup(key) else {
        return Ok(false);
    };
    match value.trim().to_ascii_lowercase().as_str() {
        "" | "0" | "false" | "no" | "off" => Ok(false),
        "1" | "true" | "yes" | "on" => Ok(true),
        other => Err(Error::Config(format!("Invalid {key}: {other}"))),
    }
}
