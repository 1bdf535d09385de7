use std::path::PathBuf;
use thiserror::Error;

/// Errors raised while reading or atomically replacing a file on disk.
#[derive(Debug, Error)]
pub enum FileError {
    #[error("could not read file '{}': {source}", path.display())]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("could not write file '{}': {source}", path.display())]
    Write {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("could not remove '{}': {source}", path.display())]
    Remove {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("walking '{}' failed: {source}", path.display())]
    Walk {
        path: PathBuf,
        #[source]
        source: walkdir::Error,
    },
}

/// Errors reported by the external decode/build/sign/align collaborators.
#[derive(Debug, Error)]
pub enum ToolError {
    /// The executable could not be started at all.
    #[error("could not launch `{tool}`: {source}")]
    Launch {
        tool: String,
        #[source]
        source: std::io::Error,
    },

    /// The tool exited with a non-zero status.
    #[error("`{tool}` exited with status {status}:\n{output}")]
    Failed {
        tool: String,
        status: i32,
        output: String,
    },

    /// The tool printed an exception banner even though it exited cleanly.
    #[error("`{tool}` reported an error:\n{output}")]
    Exception { tool: String, output: String },

    #[error("input '{}' does not exist", .0.display())]
    MissingInput(PathBuf),

    #[error("parent directory of '{}' does not exist", .0.display())]
    MissingParent(PathBuf),

    #[error("output '{}' already exists and overwriting was not requested", .0.display())]
    OutputExists(PathBuf),

    /// The tool claims success but the expected artifact is not there.
    #[error("expected output '{}' was not produced:\n{output}", path.display())]
    MissingOutput { path: PathBuf, output: String },

    #[error("archive error: {0}")]
    Archive(#[from] zip::result::ZipError),

    #[error(transparent)]
    File(#[from] FileError),

    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),
}

/// Setup and inventory errors raised by the session.
#[derive(Debug, Error)]
pub enum SessionError {
    #[error("input archive '{}' does not exist", .0.display())]
    InputNotFound(PathBuf),

    #[error("could not create working directory '{}': {source}", path.display())]
    WorkingDir {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("invalid keystore parameters: {0}")]
    InvalidKeystore(String),

    #[error("encryption secret must be 32 ASCII characters, got {0}")]
    InvalidSecret(usize),

    #[error("application has not been decoded yet")]
    NotDecoded,

    #[error("decoded application has no manifest at '{}'", .0.display())]
    MissingManifest(PathBuf),

    #[error("decode failed: {0}")]
    Tool(#[from] ToolError),

    #[error(transparent)]
    File(#[from] FileError),
}

/// Errors from the payload encryption primitives.
#[derive(Debug, Error)]
pub enum CryptoError {
    #[error("encryption key must be {expected} bytes, got {actual}")]
    InvalidKeyLength { expected: usize, actual: usize },

    #[error("ciphertext length {0} is not a multiple of the block size")]
    InvalidCiphertextLength(usize),

    #[error("invalid PKCS#7 padding")]
    InvalidPadding,

    #[error("hex decode failed: {0}")]
    HexDecode(#[from] hex::FromHexError),
}

/// Errors from reading or writing XML documents.
#[derive(Debug, Error)]
pub enum XmlError {
    #[error("xml parse error: {0}")]
    Parse(#[from] quick_xml::Error),

    #[error("malformed attribute: {0}")]
    Attribute(#[from] quick_xml::events::attributes::AttrError),

    #[error("unexpected closing tag `</{0}>`")]
    UnbalancedTag(String),

    #[error("document has no root element")]
    NoRoot,

    #[error("xml output error: {0}")]
    Io(#[from] std::io::Error),
}

/// Error type for transform operations.
#[derive(Debug, Error)]
pub enum TransformError {
    #[error(transparent)]
    File(#[from] FileError),

    #[error(transparent)]
    Session(#[from] SessionError),

    #[error("crypto operation failed: {0}")]
    Crypto(#[from] CryptoError),

    #[error("xml processing failed: {0}")]
    Xml(#[from] XmlError),

    #[error("external tool failed: {0}")]
    Tool(#[from] ToolError),

    #[error("manifest '{}' has no package attribute", .0.display())]
    MissingPackage(PathBuf),

    #[error("no signing credentials configured")]
    MissingCredentials,

    #[error("malformed smali in '{}' line {line}: {msg}", path.display())]
    MalformedSmali {
        path: PathBuf,
        line: usize,
        msg: String,
    },

    #[error("{0}")]
    Generic(String),
}

/// Errors that can occur during obfuscation.
#[derive(Debug, Error)]
pub enum ObfuscateError {
    /// The requested pass name is not registered.
    #[error("invalid pass: {0}")]
    InvalidPass(String),

    /// Setup failed before any pass ran.
    #[error("setup failed: {0}")]
    Setup(#[from] SessionError),

    /// A pass failed; `applied` lists every pass recorded up to and including it.
    #[error("pass `{name}` failed: {source}")]
    Pass {
        name: String,
        applied: Vec<String>,
        #[source]
        source: TransformError,
    },

    /// File read/write error.
    #[error("file error: {0}")]
    File(#[from] std::io::Error),

    /// JSON serialization error.
    #[error("serialization error: {0}")]
    Serialize(#[from] serde_json::Error),
}
