use thiserror::Error;

/// Broad classification used by the server and the CLI to decide how a
/// failure is reported.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    Validation,
    NotFound,
    Transport,
    Internal,
}

#[derive(Error, Debug)]
pub enum HubError {
    #[error("{0}")]
    Validation(String),

    #[error("{0}")]
    NotFound(String),

    #[error("HTTP request error: {0}")]
    HttpError(#[from] reqwest::Error),

    #[error("{method} {url} returned status {status}: {body}")]
    Status {
        method: String,
        url: String,
        status: u16,
        body: String,
    },

    #[error("JSON parsing error: {0}")]
    JsonError(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("Configuration error: {0}")]
    ConfigError(String),

    #[error("Generation error: {0}")]
    GenerationError(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl HubError {
    pub fn validation(msg: impl Into<String>) -> Self {
        HubError::Validation(msg.into())
    }

    pub fn kind(&self) -> ErrorKind {
        match self {
            HubError::Validation(_) | HubError::ConfigError(_) => ErrorKind::Validation,
            HubError::NotFound(_) => ErrorKind::NotFound,
            HubError::HttpError(_) | HubError::Status { .. } | HubError::GenerationError(_) => {
                ErrorKind::Transport
            }
            HubError::JsonError(_) | HubError::IoError(_) | HubError::Internal(_) => {
                ErrorKind::Internal
            }
        }
    }
}

pub type Result<T> = std::result::Result<T, HubError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn kinds_follow_variants() {
        assert_eq!(HubError::validation("bad").kind(), ErrorKind::Validation);
        assert_eq!(HubError::NotFound("none".into()).kind(), ErrorKind::NotFound);
        let status = HubError::Status {
            method: "GET".into(),
            url: "http://device/sensor".into(),
            status: 503,
            body: String::new(),
        };
        assert_eq!(status.kind(), ErrorKind::Transport);
        assert_eq!(HubError::Internal("boom".into()).kind(), ErrorKind::Internal);
    }

    #[test]
    fn status_message_names_the_call() {
        let err = HubError::Status {
            method: "POST".into(),
            url: "http://device/actuator".into(),
            status: 500,
            body: "fault".into(),
        };
        assert_eq!(err.to_string(), "POST http://device/actuator returned status 500: fault");
    }
}
