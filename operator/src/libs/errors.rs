//! An error from the nightshift controllers

/// An error from the nightshift controllers
#[derive(Debug)]
pub enum Error {
    /// A generic error with a message
    Generic(String),
    /// An error from the k8s client
    K8s(kube::Error),
    /// An error from converting a value with serde
    Serde(serde_json::Error),
    /// An error from loading a config
    Config(config::ConfigError),
    /// An IO Error
    IO(std::io::Error),
}

impl Error {
    /// Create a new generic error
    ///
    /// # Arguments
    ///
    /// * `msg` - The error message to set
    pub fn new<T: Into<String>>(msg: T) -> Self {
        Error::Generic(msg.into())
    }

    /// Get the k8s api status code for this error if one exists
    pub fn status(&self) -> Option<u16> {
        match self {
            Error::K8s(kube::Error::Api(resp)) => Some(resp.code),
            _ => None,
        }
    }

    /// Whether this error is a 404 from the k8s api
    pub fn is_not_found(&self) -> bool {
        self.status() == Some(404)
    }

    /// Whether this error is a write conflict from the k8s api
    pub fn is_conflict(&self) -> bool {
        self.status() == Some(409)
    }

    /// Get the error message for this error
    pub fn msg(&self) -> String {
        match self {
            Error::Generic(msg) => msg.clone(),
            Error::K8s(err) => err.to_string(),
            Error::Serde(err) => err.to_string(),
            Error::Config(err) => err.to_string(),
            Error::IO(err) => err.to_string(),
        }
    }
}

impl std::fmt::Display for Error {
    /// display this error in an easy readable format
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        match self.status() {
            Some(code) => write!(f, "Code: {} Error: {}", code, self.msg()),
            None => write!(f, "Error: {}", self.msg()),
        }
    }
}

// mark that this is an error struct
impl std::error::Error for Error {}

impl From<kube::Error> for Error {
    fn from(error: kube::Error) -> Self {
        Error::K8s(error)
    }
}

impl From<serde_json::Error> for Error {
    fn from(error: serde_json::Error) -> Self {
        Error::Serde(error)
    }
}

impl From<config::ConfigError> for Error {
    fn from(error: config::ConfigError) -> Self {
        Error::Config(error)
    }
}

impl From<std::io::Error> for Error {
    fn from(error: std::io::Error) -> Self {
        Error::IO(error)
    }
}
