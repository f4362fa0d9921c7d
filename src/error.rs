/// Input rejected before any state was touched.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ValidationError {
    #[error("Lead boundaries incomplete: {captured} of 12 captured")]
    IncompleteBoundaries { captured: usize },

    #[error("Patient name is required")]
    MissingPatientName,

    #[error("Selected region is too small (at least 1 pixel wide and tall)")]
    DegenerateRegion,

    #[error("Selected region lies outside the image")]
    OutOfBounds,

    #[error("Invalid display scale ratio ({x}, {y})")]
    InvalidRatio { x: f64, y: f64 },

    #[error("Scale factor {got} px/mV is below the minimum of {min} px/mV")]
    ScaleFactorTooSmall { got: f64, min: f64 },

    #[error("Recording date {0:?} is not a YYYY-MM-DD date")]
    InvalidRecordingDate(String),

    #[error("Image size {actual:?} does not match the annotated image {expected:?}")]
    ImageMismatch {
        expected: (u32, u32),
        actual: (u32, u32),
    },
}

/// Operation not allowed in the current state. Callers are expected to
/// prevent these; when one slips through nothing is mutated.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum StateError {
    #[error("All 12 leads are already captured")]
    SessionComplete,

    #[error("A {0} request is already in flight")]
    RequestInFlight(&'static str),

    #[error("No digitized record to analyse yet")]
    NoRecord,

    #[error("No image loaded")]
    NoImage,

    #[error("Service client unavailable")]
    ServicesUnavailable,
}

/// Failure talking to the conversion or analysis service.
#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    /// The HTTP request itself failed (network, DNS, TLS, timeout).
    #[error("HTTP request failed: {0}")]
    Request(#[from] reqwest::Error),

    /// The service answered with a non-2xx status.
    #[error("Service returned HTTP {status}: {body}")]
    Status { status: u16, body: String },

    /// The body did not match the expected shape.
    #[error("Malformed service response: {0}")]
    Malformed(String),
}

impl TransportError {
    /// Message shown to the operator. The detail goes to the log.
    pub fn user_message(&self) -> &'static str {
        match self {
            TransportError::Request(_) => "Service unreachable, please try again",
            TransportError::Status { .. } | TransportError::Malformed(_) => {
                "Service returned an unexpected response, please try again"
            }
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error(transparent)]
    Validation(#[from] ValidationError),

    #[error(transparent)]
    State(#[from] StateError),

    #[error(transparent)]
    Transport(#[from] TransportError),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Image error: {0}")]
    Image(#[from] image::ImageError),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

pub type Result<T, E = Error> = std::result::Result<T, E>;
