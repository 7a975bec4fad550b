/// Top-level codeintegrity error type.
///
/// All fallible operations in `codeintegrity-core` return
/// [`Result<T, IntegrityError>`](Result). Each variant wraps a domain-specific
/// error enum, so callers can match on the failing stage without losing type
/// information. Signature verification outcomes are never errors.
#[derive(thiserror::Error, Debug)]
pub enum IntegrityError {
    /// The commit history could not be loaded. Fatal for one repository only.
    #[error("Load error: {0}")]
    Load(#[from] LoadError),

    /// Error in configuration parsing or validation.
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    /// The repository list could not be decoded.
    #[error("Input error: {0}")]
    Input(#[from] InputError),

    /// A repository could not be cloned or opened locally.
    #[error("Acquisition error: {0}")]
    Acquire(#[from] AcquireError),

    /// A finished report could not be stored.
    #[error("Persist error: {0}")]
    Persist(#[from] PersistError),
}

/// Errors from the commit graph loader.
#[derive(thiserror::Error, Debug)]
pub enum LoadError {
    /// The ref resolved, but there are no commits behind it (unborn `HEAD`).
    #[error("Empty history: no commits reachable from {0}")]
    EmptyHistory(String),

    /// The requested ref (branch, tag, or revision) does not resolve.
    #[error("Ref not found: {0}")]
    RefNotFound(String),

    /// History cannot be traversed: the repository or one of its objects is
    /// missing or unreadable.
    #[error("Corrupt repository: {0}")]
    CorruptRepository(String),
}

/// Errors in configuration parsing and validation.
#[derive(thiserror::Error, Debug)]
pub enum ConfigError {
    /// The configuration file does not exist at the expected path.
    #[error("Config file not found: {0}")]
    NotFound(String),

    /// Configuration values are present but semantically invalid.
    #[error("Invalid config: {0}")]
    Invalid(String),

    /// Configuration file syntax could not be parsed (TOML error).
    #[error("Parse error: {0}")]
    Parse(String),
}

/// Errors decoding the repository list handed to the runner.
#[derive(thiserror::Error, Debug)]
pub enum InputError {
    /// The input is readable but does not have the expected shape.
    #[error("Malformed input: {0}")]
    Malformed(String),

    /// The input file could not be read.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Errors making a repository available locally.
#[derive(thiserror::Error, Debug)]
pub enum AcquireError {
    /// `git clone` ran and failed.
    #[error("Clone of {repo} failed: {message}")]
    Clone { repo: String, message: String },

    /// The clone target exists but is not a repository.
    #[error("Not a repository: {0}")]
    NotARepository(String),

    /// `git` could not be started or the clone directory created.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Errors writing a report.
#[derive(thiserror::Error, Debug)]
pub enum PersistError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Encoding error: {0}")]
    Encode(#[from] serde_json::Error),
}

/// Convenience alias for `Result<T, IntegrityError>`.
pub type Result<T> = std::result::Result<T, IntegrityError>;
