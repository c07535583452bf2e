use std::fmt;

#[derive(Debug)]
pub enum DuplicationError {
    /// No new frame arrived within the acquisition deadline.
    Timeout,

    /// The duplication interface was invalidated (mode change, desktop
    /// switch, adapter reset). The manager must be rebuilt.
    AccessLost,

    /// Growing the metadata or vertex scratch buffer failed. The frame
    /// reports zero regions.
    OutOfMemory,

    ResourceCreation(anyhow::Error),

    Device(anyhow::Error),

    UnsupportedRotation(u32),

    InvalidConfig(String),

    /// The frame handed to `process_frame` is not the one currently held.
    StaleFrame,

    BufferOverflow,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum DuplicationErrorClass {
    InvalidInput,
    Transient,
    Fatal,
}

impl DuplicationError {
    pub fn class(&self) -> DuplicationErrorClass {
        match self {
            Self::UnsupportedRotation(_) | Self::InvalidConfig(_) | Self::StaleFrame => {
                DuplicationErrorClass::InvalidInput
            }
            Self::Timeout | Self::OutOfMemory => DuplicationErrorClass::Transient,
            Self::AccessLost | Self::ResourceCreation(_) | Self::Device(_) | Self::BufferOverflow => {
                DuplicationErrorClass::Fatal
            }
        }
    }

    pub fn is_retryable(&self) -> bool {
        matches!(self.class(), DuplicationErrorClass::Transient)
    }

    /// Whether the caller has to tear down and re-initialize the manager
    /// before capturing again.
    pub fn requires_reinitialize(&self) -> bool {
        matches!(
            self,
            Self::AccessLost | Self::Device(_) | Self::ResourceCreation(_)
        )
    }

    pub(crate) fn resource(error: impl Into<anyhow::Error>, what: &'static str) -> Self {
        let error = error.into().context(format!("failed to create {what}"));
        log::error!("{error:#}");
        Self::ResourceCreation(error)
    }
}

impl fmt::Display for DuplicationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Timeout => write!(f, "no new desktop frame within timeout"),
            Self::AccessLost => write!(f, "desktop duplication access lost"),
            Self::OutOfMemory => write!(f, "out of memory while growing frame scratch buffers"),
            Self::ResourceCreation(inner) => write!(f, "{inner}"),
            Self::Device(inner) => write!(f, "{inner}"),
            Self::UnsupportedRotation(raw) => {
                write!(f, "unsupported output rotation value: {raw}")
            }
            Self::InvalidConfig(message) => {
                write!(f, "invalid duplication configuration: {message}")
            }
            Self::StaleFrame => write!(f, "frame data does not belong to the currently held frame"),
            Self::BufferOverflow => write!(f, "surface size arithmetic overflow"),
        }
    }
}

impl std::error::Error for DuplicationError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::ResourceCreation(inner) | Self::Device(inner) => Some(inner.as_ref()),
            _ => None,
        }
    }
}

pub type DuplicationResult<T> = Result<T, DuplicationError>;
