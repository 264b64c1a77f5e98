error_set::error_set! {
    /// Failures from the downstream HTTP collaborators (ASR/TTS/LLM).
    ///
    /// The split matters to the clients' retry loop: `Status` is retried for
    /// the transient 5xx family, `Quota` never is.
    ServiceError = {
        #[display("service returned status {status}")]
        Status {
            status: u16,
        },
        #[display("service quota exhausted")]
        Quota,
        #[display("network error: {0}")]
        Network(reqwest::Error),
        #[display("malformed service response: {0}")]
        Malformed(serde_json::Error),
    };
}

impl ServiceError {
    /// Whether a second attempt is worth making.
    pub fn is_retryable(&self) -> bool {
        match self {
            ServiceError::Status { status } => matches!(status, 500 | 502 | 503 | 504),
            ServiceError::Quota => false,
            ServiceError::Network(_) => true,
            ServiceError::Malformed(_) => false,
        }
    }

    pub fn from_status(status: u16) -> Self {
        if status == 429 {
            ServiceError::Quota
        } else {
            ServiceError::Status { status }
        }
    }
}
