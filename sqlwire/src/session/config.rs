//! Session wire configuration.
use std::{borrow::Cow, env::var, fmt};

use crate::common::ByteStr;

const DEFAULT_HOST: &str = "localhost";
const DEFAULT_PORT: u16 = 12345;
const DEFAULT_LABEL: &str = "sqlwire";
const DEFAULT_RESPONSE_BOXES: usize = 16;
const DEFAULT_PENDING_LIMIT: usize = 256;
const DEFAULT_RESULT_SET_BUFFER: usize = 64;

/// Session wire config.
#[derive(Clone, Debug)]
pub struct Config {
    pub(crate) host: ByteStr,
    pub(crate) port: u16,
    pub(crate) label: ByteStr,
    pub(crate) response_boxes: usize,
    pub(crate) pending_limit: usize,
    pub(crate) result_set_buffer: usize,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            host: ByteStr::from_static(DEFAULT_HOST),
            port: DEFAULT_PORT,
            label: ByteStr::from_static(DEFAULT_LABEL),
            response_boxes: DEFAULT_RESPONSE_BOXES,
            pending_limit: DEFAULT_PENDING_LIMIT,
            result_set_buffer: DEFAULT_RESULT_SET_BUFFER,
        }
    }
}

impl Config {
    /// Retrieve configuration from environment variable.
    ///
    /// It reads:
    /// - `SQLWIRE_HOST`
    /// - `SQLWIRE_PORT`
    /// - `SQLWIRE_RESPONSE_BOXES`
    /// - `SQLWIRE_PENDING_LIMIT`
    /// - `SQLWIRE_RESULT_SET_BUFFER`
    ///
    /// Additionally, it also read `SQLWIRE_URL` to provide missing value from
    /// previous variables before fallback to default value.
    pub fn from_env() -> Config {
        let url = var("SQLWIRE_URL").ok().and_then(|e|Config::parse_inner(e.into()).ok());
        let default = Config::default();

        macro_rules! env {
            ($name:literal,$or:ident) => {
                match (var($name).ok().and_then(|e|e.parse().ok()),url.as_ref()) {
                    (Some(ok),_) => ok,
                    (None,Some(e)) => e.$or.clone(),
                    (None,None) => default.$or.clone(),
                }
            };
        }

        let host = match var("SQLWIRE_HOST") {
            Ok(ok) => ok.into(),
            Err(_) => url.as_ref().map_or(default.host.clone(), |e|e.host.clone()),
        };
        let port = env!("SQLWIRE_PORT",port);

        let response_boxes = var("SQLWIRE_RESPONSE_BOXES")
            .ok()
            .and_then(|e|e.parse().ok())
            .unwrap_or(DEFAULT_RESPONSE_BOXES);
        let pending_limit = var("SQLWIRE_PENDING_LIMIT")
            .ok()
            .and_then(|e|e.parse().ok())
            .unwrap_or(DEFAULT_PENDING_LIMIT);
        let result_set_buffer = var("SQLWIRE_RESULT_SET_BUFFER")
            .ok()
            .and_then(|e|e.parse().ok())
            .unwrap_or(DEFAULT_RESULT_SET_BUFFER);

        Self { host, port, ..default }
            .response_boxes(response_boxes)
            .pending_limit(pending_limit)
            .result_set_buffer(result_set_buffer)
    }

    /// Parse config from url, in the form of `tcp://host:port`.
    pub fn parse(url: &str) -> Result<Config, ParseError> {
        Self::parse_inner(ByteStr::copy_from_str(url))
    }

    /// Parse config from static string url.
    ///
    /// This is for micro optimization, see [`Bytes::from_static`][1].
    ///
    /// [1]: bytes::Bytes::from_static
    pub fn parse_static(url: &'static str) -> Result<Config, ParseError> {
        Self::parse_inner(ByteStr::from_static(url))
    }

    fn parse_inner(url: ByteStr) -> Result<Self, ParseError> {
        let mut read = url.as_str();

        macro_rules! eat {
            (@ $delim:literal,$id:tt,$len:literal) => {{
                let Some(idx) = read.find($delim) else {
                    return Err(ParseError { reason: concat!(stringify!($id), " missing").into() })
                };
                let capture = &read[..idx];
                read = &read[idx + $len..];
                url.slice_ref(capture)
            }};
            ($delim:literal,$id:tt) => {
                eat!(@ $delim,$id,1)
            };
            ($delim:literal,$id:tt,$len:literal) => {
                eat!(@ $delim,$id,$len)
            };
        }

        let scheme = eat!("://", host, 3);
        let host = eat!(':', port);
        let port = url.slice_ref(read);

        if scheme != "tcp" {
            return Err(ParseError { reason: format!("unsupported scheme `{scheme}`").into() })
        }

        if host.is_empty() {
            return Err(ParseError { reason: "host missing".into() })
        }

        let Ok(port) = port.parse() else {
            return Err(ParseError { reason: "invalid port".into() })
        };

        Ok(Self { host, port, ..Config::default() })
    }

    /// Returns the server host.
    pub fn host(&self) -> &str {
        &self.host
    }

    /// Returns the server port.
    pub fn port(&self) -> u16 {
        self.port
    }

    /// Set the number of response boxes, the maximum of in flight requests.
    ///
    /// The value is clamped to `1..=65535`.
    pub fn response_boxes(mut self, value: usize) -> Self {
        self.response_boxes = value.clamp(1, u16::MAX as usize);
        self
    }

    /// Set the number of requests allowed to wait for a response box.
    ///
    /// With `0`, sending while every response box is owned fails immediately.
    pub fn pending_limit(mut self, value: usize) -> Self {
        self.pending_limit = value;
        self
    }

    /// Set the number of records buffered for each result set.
    ///
    /// Once a result set holds that many records its consumer has not taken,
    /// the session stops reading from the server until it does. The value is
    /// clamped to at least `1`.
    pub fn result_set_buffer(mut self, value: usize) -> Self {
        self.result_set_buffer = value.max(1);
        self
    }

    /// Set the label sent in the session handshake.
    pub fn label(mut self, value: impl Into<ByteStr>) -> Self {
        self.label = value.into();
        self
    }
}

impl std::str::FromStr for Config {
    type Err = ParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

/// Error when parsing url.
pub struct ParseError {
    pub(crate) reason: Cow<'static,str>,
}

impl std::error::Error for ParseError { }

impl fmt::Display for ParseError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if f.alternate() {
            return f.write_str(&self.reason)
        }
        write!(f, "failed to parse url: {}", self.reason)
    }
}

impl fmt::Debug for ParseError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "\"{self}\"")
    }
}
