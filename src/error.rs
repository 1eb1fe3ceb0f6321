use thiserror::Error;

/// Failures raised by the rig archive, scene and bake layers.
///
/// Lookup failures are normally recovered by the caller (skip the unit and
/// log); precondition and I/O failures abort the current phase.
#[derive(Error, Debug)]
pub enum RigError {
    #[error("{kind} not found: {name}")]
    Lookup { kind: &'static str, name: String },

    #[error("Precondition failed: {0}")]
    Precondition(String),

    #[error("Filesystem error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Rig archive codec error: {0}")]
    Archive(#[from] bincode::Error),

    #[error("Image error: {0}")]
    Image(#[from] image::ImageError),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("glTF error: {0}")]
    Scene(#[from] gltf::Error),

    #[error("Failed to start bake workers: {0}")]
    Worker(#[from] rayon::ThreadPoolBuildError),
}

impl RigError {
    pub fn lookup(kind: &'static str, name: impl Into<String>) -> Self {
        RigError::Lookup {
            kind,
            name: name.into(),
        }
    }

    pub fn precondition(message: impl Into<String>) -> Self {
        RigError::Precondition(message.into())
    }

    /// True for the skip-and-continue class of failures.
    pub fn is_lookup(&self) -> bool {
        matches!(self, RigError::Lookup { .. })
    }
}

pub type RigResult<T> = Result<T, RigError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn given_missing_joint_when_formatting_lookup_then_kind_and_name_are_reported() {
        let error = RigError::lookup("joint", "FACIAL_L_Eye");
        assert_eq!(error.to_string(), "joint not found: FACIAL_L_Eye");
        assert!(error.is_lookup());
    }

    #[test]
    fn given_io_error_when_converting_then_it_is_not_a_lookup_failure() {
        let error: RigError = std::io::Error::other("disk gone").into();
        assert!(!error.is_lookup());
        assert!(error.to_string().starts_with("Filesystem error"));
    }
}
