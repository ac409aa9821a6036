//! Error types for PortMux

/// Result type alias for PortMux operations
pub type Result<T> = std::result::Result<T, Error>;

/// Main error type for PortMux
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// IO operation failed
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// No project config file found walking upward from the start directory
    #[error("No portmux.config.json found from {start_dir} upward")]
    ConfigNotFound {
        /// Directory the upward walk started from
        start_dir: String,
    },

    /// Config file exists but is not valid JSON
    #[error("Failed to parse {path}: {reason}")]
    ConfigParse {
        /// Path of the offending config file
        path: String,
        /// Parser diagnostic
        reason: String,
    },

    /// Config file parsed but violates the schema
    #[error("Invalid config {path}: {reason}")]
    ConfigValidation {
        /// Path of the offending config file
        path: String,
        /// Violated constraint
        reason: String,
    },

    /// Repository alias already registered under a different path
    #[error("Repository name '{name}' is already registered for {existing_path} (use --force to overwrite)")]
    DuplicateRepositoryName {
        /// Alias that collided
        name: String,
        /// Path the alias currently points at
        existing_path: String,
    },

    /// Global config entry points at a path with no usable project config
    #[error("Repository '{name}' points at {path}, which has no usable project config")]
    InvalidRepositoryReference {
        /// Repository alias
        name: String,
        /// Registered path
        path: String,
    },

    /// A port entry could not be resolved to a positive integer
    #[error("Port resolution failed for {context}: {reason}")]
    PortResolution {
        /// Which command/entry carried the offending port
        context: String,
        /// Why it did not resolve
        reason: String,
    },

    /// State file written by an incompatible PortMux version
    #[error("State version mismatch: {message}")]
    VersionMismatch {
        /// Version diagnostic
        message: String,
    },

    /// Group resolution failed
    #[error("Group resolution failed: {message}")]
    GroupResolution {
        /// Failure description with remediation hint
        message: String,
    },

    /// Process start failed
    #[error("Failed to start process {name}: {reason}")]
    ProcessStart {
        /// Name of the process that failed to start
        name: String,
        /// Reason for the start failure
        reason: String,
    },

    /// Process stop failed
    #[error("Failed to stop process {name}: {reason}")]
    ProcessStop {
        /// Name of the process that failed to stop
        name: String,
        /// Reason for the stop failure
        reason: String,
    },

    /// Process restart failed
    #[error("Failed to restart process {name}: {reason}")]
    ProcessRestart {
        /// Name of the process that failed to restart
        name: String,
        /// Reason for the restart failure
        reason: String,
    },

    /// A requested port is already held
    #[error("Port {0} is already in use")]
    PortInUse(u16),

    /// Lock acquisition exhausted its retries
    #[error("Timed out acquiring lock {path}")]
    LockTimeout {
        /// Path of the contended lock file
        path: String,
    },

    /// Lock release failed after the guarded body completed
    #[error("Failed to release lock {path}: {reason}")]
    LockRelease {
        /// Path of the lock file
        path: String,
        /// Release failure diagnostic
        reason: String,
    },

    /// Configuration error
    #[error("Configuration error: {message}")]
    Config {
        /// Configuration error message
        message: String,
    },

    /// Serialization/deserialization error
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl Error {
    /// Create a new config-not-found error
    pub fn config_not_found<S: Into<String>>(start_dir: S) -> Self {
        Self::ConfigNotFound {
            start_dir: start_dir.into(),
        }
    }

    /// Create a new config parse error
    pub fn config_parse<P: Into<String>, S: Into<String>>(path: P, reason: S) -> Self {
        Self::ConfigParse {
            path: path.into(),
            reason: reason.into(),
        }
    }

    /// Create a new config validation error
    pub fn config_validation<P: Into<String>, S: Into<String>>(path: P, reason: S) -> Self {
        Self::ConfigValidation {
            path: path.into(),
            reason: reason.into(),
        }
    }

    /// Create a new port resolution error
    pub fn port_resolution<C: Into<String>, S: Into<String>>(context: C, reason: S) -> Self {
        Self::PortResolution {
            context: context.into(),
            reason: reason.into(),
        }
    }

    /// Create a new group resolution error
    pub fn group_resolution<S: Into<String>>(message: S) -> Self {
        Self::GroupResolution {
            message: message.into(),
        }
    }

    /// Create a new process start error
    pub fn process_start<N: Into<String>, S: Into<String>>(name: N, reason: S) -> Self {
        Self::ProcessStart {
            name: name.into(),
            reason: reason.into(),
        }
    }

    /// Create a new process stop error
    pub fn process_stop<N: Into<String>, S: Into<String>>(name: N, reason: S) -> Self {
        Self::ProcessStop {
            name: name.into(),
            reason: reason.into(),
        }
    }

    /// Create a new process restart error
    pub fn process_restart<N: Into<String>, S: Into<String>>(name: N, reason: S) -> Self {
        Self::ProcessRestart {
            name: name.into(),
            reason: reason.into(),
        }
    }

    /// Create a new configuration error
    pub fn config<S: Into<String>>(message: S) -> Self {
        Self::Config {
            message: message.into(),
        }
    }

    /// Check if this error is a configuration error
    pub fn is_config_error(&self) -> bool {
        matches!(
            self,
            Error::ConfigNotFound { .. }
                | Error::ConfigParse { .. }
                | Error::ConfigValidation { .. }
                | Error::DuplicateRepositoryName { .. }
                | Error::InvalidRepositoryReference { .. }
                | Error::PortResolution { .. }
                | Error::VersionMismatch { .. }
                | Error::Config { .. }
        )
    }

    /// Check if this error is a supervision error
    pub fn is_supervision_error(&self) -> bool {
        matches!(
            self,
            Error::ProcessStart { .. }
                | Error::ProcessStop { .. }
                | Error::ProcessRestart { .. }
                | Error::PortInUse(_)
        )
    }

    /// Check if this error is a locking error
    pub fn is_lock_error(&self) -> bool {
        matches!(self, Error::LockTimeout { .. } | Error::LockRelease { .. })
    }

    /// Get the error category as a string
    pub fn category(&self) -> &'static str {
        match self {
            Error::Io(_) => "io",
            Error::ConfigNotFound { .. } => "config_not_found",
            Error::ConfigParse { .. } => "config_parse",
            Error::ConfigValidation { .. } => "config_validation",
            Error::DuplicateRepositoryName { .. } => "duplicate_repository_name",
            Error::InvalidRepositoryReference { .. } => "invalid_repository_reference",
            Error::PortResolution { .. } => "port_resolution",
            Error::VersionMismatch { .. } => "version_mismatch",
            Error::GroupResolution { .. } => "group_resolution",
            Error::ProcessStart { .. } => "process_start",
            Error::ProcessStop { .. } => "process_stop",
            Error::ProcessRestart { .. } => "process_restart",
            Error::PortInUse(_) => "port_in_use",
            Error::LockTimeout { .. } => "lock_timeout",
            Error::LockRelease { .. } => "lock_release",
            Error::Config { .. } => "config",
            Error::Serialization(_) => "serialization",
        }
    }
}
