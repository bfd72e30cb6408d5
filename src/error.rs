#[derive(Debug, thiserror::Error)]
#[non_exhaustive]
pub enum Error {
    #[cfg(feature = "http")]
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),
    #[error("{operation} failed (HTTP {status}): {message}")]
    Api {
        operation: &'static str,
        status: u16,
        message: String,
    },
    #[error("{operation}: unexpected response shape: {source}")]
    Decode {
        operation: &'static str,
        #[source]
        source: serde_json::Error,
    },
    #[error("No authentication token found")]
    NoCredential,
    #[error(transparent)]
    Auth(#[from] AuthFailure),
    #[error("Token storage error: {0}")]
    Storage(#[from] std::io::Error),
    #[error("Unsupported image: {0}")]
    UnsupportedImage(String),
    #[error("Invalid clothing id: {0:?}")]
    InvalidClothingId(String),
    #[error("Configuration error: {0}")]
    Config(String),
}

impl Error {
    /// HTTP status of a rejected request, if the backend answered at all.
    #[must_use]
    pub fn status(&self) -> Option<u16> {
        match self {
            Self::Api { status, .. } => Some(*status),
            Self::Auth(failure) => failure.status(),
            _ => None,
        }
    }
}

/// Login or registration rejected by the backend.
///
/// The token slot is never written when one of these is returned.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[non_exhaustive]
pub enum AuthFailure {
    #[error("Invalid email or password")]
    InvalidCredentials,
    #[error("Email already registered")]
    EmailAlreadyRegistered,
    #[error("Login failed (HTTP {status}): {detail}")]
    LoginFailed { status: u16, detail: String },
    #[error("Registration failed (HTTP {status}): {detail}")]
    RegistrationFailed { status: u16, detail: String },
}

impl AuthFailure {
    /// Classifies a rejected `POST /auth/login`.
    #[must_use]
    pub fn from_login(status: u16, detail: String) -> Self {
        if status == 401 || detail == "Invalid email or password" {
            Self::InvalidCredentials
        } else {
            Self::LoginFailed { status, detail }
        }
    }

    /// Classifies a rejected `POST /auth/register`.
    #[must_use]
    pub fn from_register(status: u16, detail: String) -> Self {
        if status == 409 || detail.contains("Email already registered") {
            Self::EmailAlreadyRegistered
        } else {
            Self::RegistrationFailed { status, detail }
        }
    }

    /// Notification text to show the user.
    #[must_use]
    pub fn message(&self) -> &'static str {
        match self {
            Self::InvalidCredentials => {
                "Login failed. Please check your credentials and try again."
            }
            Self::EmailAlreadyRegistered => "This email is already registered.",
            Self::LoginFailed { .. } => "An unexpected error occurred. Please try again later.",
            Self::RegistrationFailed { .. } => {
                "Registration failed. Please check your details and try again."
            }
        }
    }

    fn status(&self) -> Option<u16> {
        match self {
            Self::InvalidCredentials => Some(401),
            Self::EmailAlreadyRegistered => Some(409),
            Self::LoginFailed { status, .. } | Self::RegistrationFailed { status, .. } => {
                Some(*status)
            }
        }
    }
}
