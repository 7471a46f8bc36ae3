//! Connection parameters and connection string parsing.
//!
//! Two connection string forms are accepted:
//!
//! ```text
//! dbname = rate-races user = postgres password = pass hostaddr = 0.0.0.0
//! dbname=rate-races&user=postgres&password=pass
//! postgresql://postgres@localhost?port=5432&dbname=rate-races&password=pass
//! ```
//!
//! Key/value pairs may be separated by whitespace or `&`. Values may be
//! single-quoted; `\'` and `\\` escape inside both quoted and bare values.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use nom::{
    IResult,
    branch::alt,
    bytes::complete::{tag, take_while1},
    character::complete::{char, multispace0, multispace1},
    combinator::value,
    error::{Error as NomError, ErrorKind},
    multi::{many0, many1, separated_list0},
    sequence::delimited,
};
use percent_encoding::percent_decode_str;
use serde::Deserialize;

use crate::error::{PgError, PgResult};

pub const DEFAULT_HOST: &str = "localhost";
pub const DEFAULT_PORT: u16 = 5432;
pub const DEFAULT_USER: &str = "postgres";

/// Keys this client acts on. Anything else is kept but ignored.
pub const RECOGNIZED_KEYS: &[&str] = &[
    "host",
    "hostaddr",
    "port",
    "dbname",
    "user",
    "password",
    "connect_timeout",
    "application_name",
    "options",
    "sslmode",
];

/// Environment variables consulted for keys the connection string omits.
const ENV_FALLBACKS: &[(&str, &str)] = &[
    ("host", "PGHOST"),
    ("hostaddr", "PGHOSTADDR"),
    ("port", "PGPORT"),
    ("dbname", "PGDATABASE"),
    ("user", "PGUSER"),
    ("password", "PGPASSWORD"),
    ("connect_timeout", "PGCONNECT_TIMEOUT"),
    ("application_name", "PGAPPNAME"),
    ("options", "PGOPTIONS"),
    ("sslmode", "PGSSLMODE"),
];

/// Immutable set of connection parameters, used only at connect time.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ConnectionParameters {
    values: BTreeMap<String, String>,
}

impl ConnectionParameters {
    /// Start building parameters by hand.
    pub fn builder() -> ConnectionParametersBuilder {
        ConnectionParametersBuilder::default()
    }

    /// Parse a key/value connection string or a `postgres://` URI.
    pub fn parse(conninfo: &str) -> PgResult<Self> {
        let conninfo = conninfo.trim();
        let pairs = if conninfo.starts_with("postgresql://") || conninfo.starts_with("postgres://")
        {
            parse_uri(conninfo)?
        } else {
            parse_key_values(conninfo)?
        };

        let mut builder = Self::builder();
        for (key, value) in pairs {
            builder = builder.set(key, value);
        }
        builder.build()
    }

    /// Fill keys missing from `self` with `PG*` environment variables.
    pub fn with_env_defaults(self) -> PgResult<Self> {
        self.with_defaults_from(|var| std::env::var(var).ok())
    }

    /// Fill keys missing from `self` using `lookup` (an environment stand-in).
    pub fn with_defaults_from(self, lookup: impl Fn(&str) -> Option<String>) -> PgResult<Self> {
        let mut values = self.values;
        for (key, var) in ENV_FALLBACKS {
            if !values.contains_key(*key) {
                if let Some(value) = lookup(var) {
                    values.insert(key.to_string(), value);
                }
            }
        }
        ConnectionParametersBuilder { values }.build()
    }

    /// Raw value for any key, recognized or not.
    pub fn get(&self, key: &str) -> Option<&str> {
        self.values.get(key).map(String::as_str)
    }

    /// Keys present that this client does not act on.
    pub fn unrecognized_keys(&self) -> impl Iterator<Item = &str> {
        self.values
            .keys()
            .map(String::as_str)
            .filter(|k| !RECOGNIZED_KEYS.contains(k))
    }

    pub fn host(&self) -> &str {
        self.get("host").unwrap_or(DEFAULT_HOST)
    }

    /// Numeric address that takes precedence over `host` for the socket.
    pub fn hostaddr(&self) -> Option<&str> {
        self.get("hostaddr")
    }

    pub fn port(&self) -> u16 {
        // Validated in build()
        self.get("port")
            .and_then(|p| p.parse().ok())
            .unwrap_or(DEFAULT_PORT)
    }

    pub fn user(&self) -> &str {
        self.get("user").unwrap_or(DEFAULT_USER)
    }

    /// Database name, defaulting to the user name.
    pub fn dbname(&self) -> &str {
        self.get("dbname").unwrap_or_else(|| self.user())
    }

    pub fn password(&self) -> Option<&str> {
        self.get("password")
    }

    /// `None` (or zero) means wait indefinitely.
    pub fn connect_timeout(&self) -> Option<Duration> {
        self.get("connect_timeout")
            .and_then(|t| t.parse::<u64>().ok())
            .filter(|&secs| secs > 0)
            .map(Duration::from_secs)
    }

    pub fn application_name(&self) -> Option<&str> {
        self.get("application_name")
    }

    pub fn options(&self) -> Option<&str> {
        self.get("options")
    }

    pub fn sslmode(&self) -> &str {
        self.get("sslmode").unwrap_or("prefer")
    }

    /// True when `host` names a Unix-socket directory.
    pub fn is_unix_socket(&self) -> bool {
        self.hostaddr().is_none() && self.host().starts_with('/')
    }

    /// Human-readable target, for logs and error messages.
    pub fn target(&self) -> String {
        if self.is_unix_socket() {
            format!("{}/.s.PGSQL.{}", self.host(), self.port())
        } else {
            format!("{}:{}", self.hostaddr().unwrap_or(self.host()), self.port())
        }
    }
}

/// Builder for [`ConnectionParameters`].
#[derive(Debug, Default)]
pub struct ConnectionParametersBuilder {
    values: BTreeMap<String, String>,
}

impl ConnectionParametersBuilder {
    /// Set any key. Later values replace earlier ones.
    pub fn set(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.values.insert(key.into(), value.into());
        self
    }

    pub fn host(self, host: impl Into<String>) -> Self {
        self.set("host", host)
    }

    pub fn port(self, port: u16) -> Self {
        self.set("port", port.to_string())
    }

    pub fn dbname(self, dbname: impl Into<String>) -> Self {
        self.set("dbname", dbname)
    }

    pub fn user(self, user: impl Into<String>) -> Self {
        self.set("user", user)
    }

    pub fn password(self, password: impl Into<String>) -> Self {
        self.set("password", password)
    }

    /// Validate numeric keys and freeze the parameters.
    pub fn build(self) -> PgResult<ConnectionParameters> {
        if let Some(port) = self.values.get("port") {
            port.parse::<u16>()
                .map_err(|_| PgError::Config(format!("invalid port number: \"{}\"", port)))?;
        }
        if let Some(timeout) = self.values.get("connect_timeout") {
            timeout.parse::<u64>().map_err(|_| {
                PgError::Config(format!("invalid connect_timeout: \"{}\"", timeout))
            })?;
        }
        Ok(ConnectionParameters {
            values: self.values,
        })
    }
}

fn parse_key_values(input: &str) -> PgResult<Vec<(String, String)>> {
    match conninfo_pairs(input) {
        Ok(("", pairs)) => Ok(pairs),
        Ok((remaining, _)) => Err(PgError::Config(format!(
            "syntax error in connection string at position {}: '{}'",
            input.len() - remaining.len(),
            remaining
        ))),
        Err(e) => Err(PgError::Config(format!(
            "syntax error in connection string: {:?}",
            e
        ))),
    }
}

fn conninfo_pairs(input: &str) -> IResult<&str, Vec<(String, String)>> {
    let (input, _) = multispace0(input)?;
    let (input, pairs) = separated_list0(separator, pair)(input)?;
    let (input, _) = many0(alt((multispace1, tag("&"))))(input)?;
    Ok((input, pairs))
}

fn separator(input: &str) -> IResult<&str, ()> {
    value((), many1(alt((multispace1, tag("&")))))(input)
}

fn pair(input: &str) -> IResult<&str, (String, String)> {
    let (input, key) = take_while1(|c: char| c.is_ascii_alphanumeric() || c == '_')(input)?;
    let (input, _) = delimited(multispace0, char('='), multispace0)(input)?;
    let (input, value) = alt((quoted_value, bare_value))(input)?;
    Ok((input, (key.to_string(), value)))
}

/// `'...'` with backslash escapes.
fn quoted_value(input: &str) -> IResult<&str, String> {
    let (mut rest, _) = char('\'')(input)?;
    let mut out = String::new();
    loop {
        let mut chars = rest.chars();
        match chars.next() {
            Some('\'') => return Ok((chars.as_str(), out)),
            Some('\\') => match chars.next() {
                Some(c) => out.push(c),
                None => return Err(nom::Err::Failure(NomError::new(rest, ErrorKind::Escaped))),
            },
            Some(c) => out.push(c),
            None => return Err(nom::Err::Failure(NomError::new(input, ErrorKind::Char))),
        }
        rest = chars.as_str();
    }
}

/// Unquoted value: runs until whitespace or `&`. May be empty.
fn bare_value(input: &str) -> IResult<&str, String> {
    let mut out = String::new();
    let mut rest = input;
    loop {
        let mut chars = rest.chars();
        match chars.next() {
            Some(c) if c.is_whitespace() || c == '&' => break,
            Some('\\') => match chars.next() {
                Some(c) => out.push(c),
                None => return Err(nom::Err::Failure(NomError::new(rest, ErrorKind::Escaped))),
            },
            Some(c) => out.push(c),
            None => break,
        }
        rest = chars.as_str();
    }
    Ok((rest, out))
}

fn parse_uri(input: &str) -> PgResult<Vec<(String, String)>> {
    let url = url::Url::parse(input)
        .map_err(|e| PgError::Config(format!("invalid connection URI: {}", e)))?;
    let decode = |s: &str| percent_decode_str(s).decode_utf8_lossy().into_owned();

    let mut pairs = Vec::new();

    if let Some(host) = url.host_str().filter(|h| !h.is_empty()) {
        let host = host.trim_start_matches('[').trim_end_matches(']');
        pairs.push(("host".to_string(), decode(host)));
    }
    if let Some(port) = url.port() {
        pairs.push(("port".to_string(), port.to_string()));
    }
    if !url.username().is_empty() {
        pairs.push(("user".to_string(), decode(url.username())));
    }
    if let Some(password) = url.password() {
        pairs.push(("password".to_string(), decode(password)));
    }
    let dbname = url.path().trim_start_matches('/');
    if !dbname.is_empty() {
        pairs.push(("dbname".to_string(), decode(dbname)));
    }

    // Query parameters override the authority parts, as libpq does
    for (key, value) in url.query_pairs() {
        pairs.push((key.into_owned(), value.into_owned()));
    }

    Ok(pairs)
}

/// Optional on-disk profile for the CLI.
///
/// ```toml
/// conninfo = "dbname = rate-races user = postgres password = pass hostaddr = 0.0.0.0"
/// ```
#[derive(Debug, Clone, Default, Deserialize)]
pub struct Profile {
    pub conninfo: Option<String>,
}

impl Profile {
    /// `<config dir>/qail/pq.toml`
    pub fn default_path() -> Option<PathBuf> {
        dirs::config_dir().map(|dir| dir.join("qail").join("pq.toml"))
    }

    /// Load a profile. A missing file is an empty profile.
    pub fn load(path: &Path) -> PgResult<Self> {
        if !path.exists() {
            return Ok(Self::default());
        }
        let content = std::fs::read_to_string(path)
            .map_err(|e| PgError::Config(format!("{}: {}", path.display(), e)))?;
        Self::from_toml(&content)
            .map_err(|e| PgError::Config(format!("{}: {}", path.display(), e)))
    }

    pub fn from_toml(content: &str) -> PgResult<Self> {
        toml::from_str(content).map_err(|e| PgError::Config(e.to_string()))
    }
}
