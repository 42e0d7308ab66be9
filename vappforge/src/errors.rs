//! Error types shared across the build pipeline.

/// Convenience alias used by every fallible operation in the crate.
pub type ForgeResult<T> = Result<T, ForgeError>;

/// Errors produced while preparing or running a build.
#[derive(Debug, thiserror::Error)]
pub enum ForgeError {
    /// Bad or conflicting configuration. Surfaced before any build starts.
    #[error("configuration error: {0}")]
    Config(String),

    /// An error reported by the cloud. May be transient (409, state not
    /// ready); callers decide with the predicates below.
    #[error("cloud error: {0}")]
    Cloud(String),

    /// A resource already exists or is already in use (duplicate IP,
    /// duplicate template name).
    #[error("resource conflict: {0}")]
    Conflict(String),

    /// The remote side violated a protocol contract (unusable MKS ticket,
    /// rejected RFB negotiation, image neither ISO-9660 nor UDF).
    #[error("protocol error: {0}")]
    Protocol(String),

    /// An external tool required for the current operation is not installed.
    /// The message carries an installation hint.
    #[error("required tool missing: {0}")]
    MissingTool(String),

    /// Reading, rewriting, or patching the installer image failed.
    #[error("image error: {0}")]
    Image(String),

    /// A bounded wait expired.
    #[error("timed out {0}")]
    Timeout(String),

    /// The caller cancelled the build.
    #[error("build cancelled")]
    Cancelled,

    #[error("{0}")]
    Internal(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    /// An error from a named pipeline stage. User-visible failures carry the
    /// stage name as a prefix and the underlying message unchanged.
    #[error("{stage}: {source}")]
    Stage {
        stage: &'static str,
        #[source]
        source: Box<ForgeError>,
    },
}

impl ForgeError {
    /// Wrap an error with the name of the pipeline stage it escaped from.
    pub fn in_stage(self, stage: &'static str) -> ForgeError {
        match self {
            ForgeError::Cancelled => ForgeError::Cancelled,
            other => ForgeError::Stage {
                stage,
                source: Box::new(other),
            },
        }
    }

    pub fn is_cancelled(&self) -> bool {
        match self {
            ForgeError::Cancelled => true,
            ForgeError::Stage { source, .. } => source.is_cancelled(),
            _ => false,
        }
    }

    /// Whether this error is the cloud refusing a power-on because the IP is
    /// already taken. Matched on the message text the cloud returns.
    pub fn is_ip_conflict(&self) -> bool {
        match self {
            ForgeError::Cloud(msg) | ForgeError::Conflict(msg) => {
                msg.contains("IP/MAC addresses have already been used")
                    || msg.contains("IP addresses:")
            }
            ForgeError::Stage { source, .. } => source.is_ip_conflict(),
            _ => false,
        }
    }

    /// Whether this error is the media-insert 409 the cloud returns while a
    /// freshly uploaded image is still settling.
    pub fn is_media_busy(&self) -> bool {
        match self {
            ForgeError::Cloud(msg) | ForgeError::Conflict(msg) => {
                msg.contains("not supported in the current state")
            }
            ForgeError::Stage { source, .. } => source.is_media_busy(),
            _ => false,
        }
    }
}
