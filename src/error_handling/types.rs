use std::fmt;

#[derive(Debug)]
pub enum ConfigError {
    IoError(std::io::Error),
    TomlError(String),
    NodesEmpty(String),
    DuplicateNode(String),
    DecoderMisconfigured(String),
    NotInRange(String),
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConfigError::IoError(e) => write!(f, "IO error: {}", e),
            ConfigError::TomlError(e) => write!(f, "TOML parsing error: {}", e),
            ConfigError::NodesEmpty(e) => write!(f, "Node configuration error: {}", e),
            ConfigError::DuplicateNode(e) => write!(f, "Duplicate node name: {}", e),
            ConfigError::DecoderMisconfigured(e) => write!(f, "Decoder configuration error: {}", e),
            ConfigError::NotInRange(e) => write!(f, "Value out of range: {}", e),
        }
    }
}

impl std::error::Error for ConfigError {}

impl From<std::io::Error> for ConfigError {
    fn from(err: std::io::Error) -> Self {
        ConfigError::IoError(err)
    }
}

#[derive(Debug)]
pub enum StorageError {
    ConnectionFailed,
    WriteFailed,
    ReadFailed,
    InvalidIdentifier(String),
    Timeout,
}

impl fmt::Display for StorageError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StorageError::ConnectionFailed => write!(f, "Storage connection failed"),
            StorageError::WriteFailed => write!(f, "Storage write failed"),
            StorageError::ReadFailed => write!(f, "Storage read failed"),
            StorageError::InvalidIdentifier(e) => write!(f, "Invalid SQL identifier: {}", e),
            StorageError::Timeout => write!(f, "Storage operation timed out"),
        }
    }
}

impl std::error::Error for StorageError {}

/// Failure to parse a smart-input expression.
#[derive(Debug, PartialEq)]
pub enum SmartExpressionError {
    Empty,
    UnexpectedEnd(String),
    UnexpectedToken { position: usize, found: String },
    UnterminatedString(usize),
}

impl fmt::Display for SmartExpressionError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SmartExpressionError::Empty => write!(f, "Empty expression"),
            SmartExpressionError::UnexpectedEnd(e) => write!(f, "Unexpected end of expression, expected {}", e),
            SmartExpressionError::UnexpectedToken { position, found } => {
                write!(f, "Unexpected token '{}' at position {}", found, position)
            }
            SmartExpressionError::UnterminatedString(p) => write!(f, "Unterminated string starting at {}", p),
        }
    }
}

impl std::error::Error for SmartExpressionError {}

#[derive(Debug)]
pub enum ScriptError {
    Compile(String),
    Runtime(String),
    Shape(String),
    Serialize(String),
}

impl fmt::Display for ScriptError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ScriptError::Compile(e) => write!(f, "Script compile error: {}", e),
            ScriptError::Runtime(e) => write!(f, "Script runtime error: {}", e),
            ScriptError::Shape(e) => write!(f, "Script returned an unexpected shape: {}", e),
            ScriptError::Serialize(e) => write!(f, "Script data conversion error: {}", e),
        }
    }
}

impl std::error::Error for ScriptError {}

#[derive(Debug)]
pub enum DecodeError {
    NotActive,
    CaptureWrite(String),
    SpawnFailed(std::io::Error),
    ProcessFailed(String),
    InvalidOutput(String),
    NoTargetNode,
    Timeout,
}

impl fmt::Display for DecodeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DecodeError::NotActive => write!(f, "External decoder is not active"),
            DecodeError::CaptureWrite(e) => write!(f, "Capture buffer write error: {}", e),
            DecodeError::SpawnFailed(e) => write!(f, "Decoder spawn failed: {}", e),
            DecodeError::ProcessFailed(e) => write!(f, "Decoder process failed: {}", e),
            DecodeError::InvalidOutput(e) => write!(f, "Decoder output is not valid JSON: {}", e),
            DecodeError::NoTargetNode => write!(f, "No node available to store decoded frames"),
            DecodeError::Timeout => write!(f, "Decoder timed out"),
        }
    }
}

impl std::error::Error for DecodeError {}

impl From<std::io::Error> for DecodeError {
    fn from(err: std::io::Error) -> Self {
        DecodeError::SpawnFailed(err)
    }
}

#[derive(Debug)]
pub enum SearchError {
    MissingIdentifier(String),
    InvalidRequest(String),
    NodeFailed { node: String, source: StorageError },
    DecoderUnavailable,
    Decode(DecodeError),
    Correlation(Box<CorrelationError>),
    Timeout,
}

impl fmt::Display for SearchError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SearchError::MissingIdentifier(e) => write!(f, "No ID or UUID has been provided for {}", e),
            SearchError::InvalidRequest(e) => write!(f, "Invalid request: {}", e),
            SearchError::NodeFailed { node, source } => write!(f, "Node {} failed: {}", node, source),
            SearchError::DecoderUnavailable => write!(f, "External decoder is not available"),
            SearchError::Decode(e) => write!(f, "Decode error: {}", e),
            SearchError::Correlation(e) => write!(f, "Correlation error: {}", e),
            SearchError::Timeout => write!(f, "Search deadline exceeded"),
        }
    }
}

impl std::error::Error for SearchError {}

impl From<DecodeError> for SearchError {
    fn from(err: DecodeError) -> Self {
        match err {
            DecodeError::NotActive => SearchError::DecoderUnavailable,
            DecodeError::Timeout => SearchError::Timeout,
            other => SearchError::Decode(other),
        }
    }
}

impl From<CorrelationError> for SearchError {
    fn from(err: CorrelationError) -> Self {
        match err {
            CorrelationError::Search(inner) => inner,
            other => SearchError::Correlation(Box::new(other)),
        }
    }
}

#[derive(Debug)]
pub enum CorrelationError {
    UnsupportedLookup { rule: usize, source_field: String },
    InvalidRule { rule: usize, reason: String },
    Search(SearchError),
}

impl fmt::Display for CorrelationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CorrelationError::UnsupportedLookup { rule, source_field } => write!(
                f,
                "Correlation rule #{} ({}) uses the remote lookup id 0, which is not supported",
                rule, source_field
            ),
            CorrelationError::InvalidRule { rule, reason } => {
                write!(f, "Correlation rule #{} is invalid: {}", rule, reason)
            }
            CorrelationError::Search(e) => write!(f, "Correlation lookup failed: {}", e),
        }
    }
}

impl std::error::Error for CorrelationError {}

impl From<SearchError> for CorrelationError {
    fn from(err: SearchError) -> Self {
        CorrelationError::Search(err)
    }
}
