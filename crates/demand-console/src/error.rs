use std::fmt;

#[derive(Debug)]
pub enum Error {
    /// Non-success HTTP status returned by the backend.
    Remote { status: u16, detail: String },
    /// Operator-entered payload that could not be parsed; never reaches the network.
    MalformedInput(String),
    /// Client-side policy rejection; no request was issued.
    Guard(String),
    /// Non-empty response body that is not JSON.
    Decode(String),
    /// Connection or protocol failure below the HTTP status layer.
    Transport(String),
    /// Another action is still in flight.
    Busy,
    Msg(String),
}

impl Error {
    pub fn msg<M: Into<String>>(msg: M) -> Self {
        Self::Msg(msg.into())
    }

    pub fn malformed<M: Into<String>>(msg: M) -> Self {
        Self::MalformedInput(msg.into())
    }

    pub fn remote(status: u16, detail: impl Into<String>) -> Self {
        Self::Remote {
            status,
            detail: detail.into(),
        }
    }

    pub fn is_local(&self) -> bool {
        matches!(self, Self::MalformedInput(_) | Self::Guard(_) | Self::Busy)
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Remote { status, detail } => write!(f, "HTTP {status} - {detail}"),
            Self::MalformedInput(msg) => write!(f, "invalid input: {msg}"),
            Self::Guard(msg) => write!(f, "{msg}"),
            Self::Decode(msg) => write!(f, "invalid response body: {msg}"),
            Self::Transport(msg) => write!(f, "request failed: {msg}"),
            Self::Busy => write!(f, "another request is still running"),
            Self::Msg(msg) => write!(f, "{msg}"),
        }
    }
}

impl std::error::Error for Error {}

impl From<std::io::Error> for Error {
    fn from(err: std::io::Error) -> Self {
        Self::msg(err.to_string())
    }
}

impl From<toml::de::Error> for Error {
    fn from(err: toml::de::Error) -> Self {
        Self::msg(err.to_string())
    }
}

impl From<serde_json::Error> for Error {
    fn from(err: serde_json::Error) -> Self {
        Self::Decode(err.to_string())
    }
}

impl From<reqwest::Error> for Error {
    fn from(err: reqwest::Error) -> Self {
        Self::Transport(err.to_string())
    }
}

pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::Error;

    #[test]
    fn remote_error_renders_status_and_detail() {
        let err = Error::remote(404, "not found");
        assert_eq!(err.to_string(), "HTTP 404 - not found");
    }

    #[test]
    fn guard_renders_message_verbatim() {
        let err = Error::Guard("clear the overrides".into());
        assert_eq!(err.to_string(), "clear the overrides");
        assert!(err.is_local());
    }
}
