use crate::kubelet::tls::CredentialError;
use derive_more::From;
use reqwest::StatusCode;

pub type Result<T> = core::result::Result<T, Error>;

#[derive(Debug, From)]
pub enum Error {
    /// CA bundle, client certificate/key or bearer token could not be loaded
    #[from]
    Credential(CredentialError),

    #[from]
    Json(serde_json::Error),

    #[from]
    Http(reqwest::Error),

    #[from]
    Io(std::io::Error),

    /// Every candidate host was tried over HTTPS and HTTP without success
    Unreachable { hosts: Vec<String> },

    /// The kubelet answered a query with something other than 200
    HttpStatus {
        status: StatusCode,
        endpoint: String,
        path: String,
        body: String,
    },

    NotFound(String),

    InvalidInput(String),

    /// No endpoint has been resolved yet
    NotReady,

    /// Initialization used up its attempt budget; returned until `reset`
    InitFailed {
        name: String,
        attempts: u32,
        last_error: String,
    },
}

impl Error {
    #[must_use]
    pub fn not_found(what: impl Into<String>) -> Self {
        Self::NotFound(what.into())
    }

    #[must_use]
    pub const fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound(_))
    }
}

impl core::fmt::Display for Error {
    fn fmt(&self, fmt: &mut core::fmt::Formatter) -> core::result::Result<(), core::fmt::Error> {
        match self {
            Self::Credential(e) => write!(fmt, "credential error: {e}"),
            Self::Json(e) => write!(fmt, "unable to parse kubelet response: {e}"),
            Self::Http(e) => write!(fmt, "kubelet request failed: {e}"),
            Self::Io(e) => write!(fmt, "{e}"),
            Self::Unreachable { hosts } => write!(
                fmt,
                "unable to find a valid reachable kubelet host in {}",
                hosts.join(", ")
            ),
            Self::HttpStatus {
                status,
                endpoint,
                path,
                body,
            } => write!(
                fmt,
                "unexpected status code {} on {endpoint}{path}: {body}",
                status.as_u16()
            ),
            Self::NotFound(what) => write!(fmt, "{what} not found"),
            Self::InvalidInput(msg) => write!(fmt, "{msg}"),
            Self::NotReady => write!(fmt, "kubelet endpoint is not resolved yet"),
            Self::InitFailed {
                name,
                attempts,
                last_error,
            } => write!(
                fmt,
                "{name} initialization permanently failed after {attempts} attempts: {last_error}"
            ),
        }
    }
}

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Credential(e) => Some(e),
            Self::Json(e) => Some(e),
            Self::Http(e) => Some(e),
            Self::Io(e) => Some(e),
            _ => None,
        }
    }
}
