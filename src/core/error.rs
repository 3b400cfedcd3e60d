use std::fmt;

/// Universal error type for PDF operations.
///
/// Covers everything that can go wrong on the read path, from byte-level
/// stream access up to page extraction.
#[derive(Debug, Clone, PartialEq)]
pub enum PDFError {
    /// End of stream reached unexpectedly
    UnexpectedEndOfStream,

    /// Invalid byte range requested from the byte window
    InvalidByteRange { begin: usize, end: usize },

    /// The file does not start with a usable `%PDF-` header
    InvalidHeader { message: String },

    /// Cross-reference table or stream could not be parsed
    InvalidXRef { message: String },

    /// An indirect object is absent from the chained xref view (or free)
    MissingObject { num: u32, generation: u32 },

    /// A stream body could not be read or decoded
    InvalidStream { message: String },

    /// A font encoding or string decode failed
    EncodingError { message: String },

    /// Malformed object syntax
    SyntaxError { message: String },

    /// The document carries an /Encrypt dictionary
    Encrypted,

    /// Requested page index is out of range
    PageNotFound { page: usize, page_count: usize },

    /// I/O error while reading the backing file
    IOError { message: String },

    /// The error sink reached its bound; further errors are fatal
    TooManyErrors { count: usize },

    /// Generic error with message
    Generic(String),
}

impl fmt::Display for PDFError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PDFError::UnexpectedEndOfStream => write!(f, "Unexpected end of stream"),
            PDFError::InvalidByteRange { begin, end } => {
                write!(f, "Invalid byte range: {}..{}", begin, end)
            }
            PDFError::InvalidHeader { message } => write!(f, "Invalid PDF header: {}", message),
            PDFError::InvalidXRef { message } => {
                write!(f, "Cross-reference table error: {}", message)
            }
            PDFError::MissingObject { num, generation } => {
                write!(f, "Object {} {} R not found", num, generation)
            }
            PDFError::InvalidStream { message } => write!(f, "Stream error: {}", message),
            PDFError::EncodingError { message } => write!(f, "Encoding error: {}", message),
            PDFError::SyntaxError { message } => write!(f, "Syntax error: {}", message),
            PDFError::Encrypted => write!(f, "Document is encrypted"),
            PDFError::PageNotFound { page, page_count } => {
                write!(f, "Page {} out of range (document has {})", page, page_count)
            }
            PDFError::IOError { message } => write!(f, "I/O error: {}", message),
            PDFError::TooManyErrors { count } => {
                write!(f, "Error limit reached after {} recorded errors", count)
            }
            PDFError::Generic(msg) => write!(f, "{}", msg),
        }
    }
}

impl PDFError {
    /// Creates an xref error.
    pub fn xref<S: Into<String>>(message: S) -> Self {
        PDFError::InvalidXRef {
            message: message.into(),
        }
    }

    /// Creates a syntax error.
    pub fn syntax<S: Into<String>>(message: S) -> Self {
        PDFError::SyntaxError {
            message: message.into(),
        }
    }

    /// Creates a stream error.
    pub fn stream<S: Into<String>>(message: S) -> Self {
        PDFError::InvalidStream {
            message: message.into(),
        }
    }

    /// Creates an encoding error.
    pub fn encoding<S: Into<String>>(message: S) -> Self {
        PDFError::EncodingError {
            message: message.into(),
        }
    }

    /// Creates an I/O error.
    pub fn io<S: Into<String>>(message: S) -> Self {
        PDFError::IOError {
            message: message.into(),
        }
    }

    /// The taxonomy bucket this error is recorded under.
    pub fn kind(&self) -> ErrorKind {
        match self {
            PDFError::InvalidHeader { .. } => ErrorKind::InvalidHeader,
            PDFError::InvalidXRef { .. } => ErrorKind::InvalidXRef,
            PDFError::MissingObject { .. } => ErrorKind::MissingObject,
            PDFError::InvalidStream { .. } => ErrorKind::InvalidStream,
            PDFError::EncodingError { .. } => ErrorKind::EncodingError,
            PDFError::Encrypted => ErrorKind::Encrypted,
            _ => ErrorKind::SyntaxError,
        }
    }
}

impl std::error::Error for PDFError {}

/// Result type alias for PDF operations
pub type PDFResult<T> = Result<T, PDFError>;

/// Error taxonomy used by the error sink.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    InvalidHeader,
    InvalidXRef,
    MissingObject,
    InvalidStream,
    EncodingError,
    SyntaxError,
    Encrypted,
}

/// How the document reacts to recoverable errors.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ErrorPolicy {
    /// First recoverable error aborts the operation
    Strict,
    /// Record up to 100 errors, then upgrade to fatal
    #[default]
    Default,
    /// Record without bound, never fatal
    Permissive,
}

impl ErrorPolicy {
    /// Maximum number of errors recorded before further errors become fatal.
    pub fn max_errors(self) -> usize {
        match self {
            ErrorPolicy::Strict => 0,
            ErrorPolicy::Default => 100,
            ErrorPolicy::Permissive => usize::MAX,
        }
    }
}

/// A single recorded error.
#[derive(Debug, Clone)]
pub struct ErrorRecord {
    pub kind: ErrorKind,
    /// Byte offset into the document where the error was noticed, when known
    pub offset: usize,
    pub message: String,
}

/// Bounded error collection.
///
/// Recoverable errors are routed here instead of unwinding; the policy
/// decides whether the caller sees them at all. Once the bound is hit the
/// sink refuses further errors and the operation fails.
#[derive(Debug, Default)]
pub struct ErrorSink {
    policy: ErrorPolicy,
    records: Vec<ErrorRecord>,
}

impl ErrorSink {
    pub fn new(policy: ErrorPolicy) -> Self {
        ErrorSink {
            policy,
            records: Vec::new(),
        }
    }

    pub fn policy(&self) -> ErrorPolicy {
        self.policy
    }

    /// Records an error, or returns it as fatal under the current policy.
    pub fn report(&mut self, error: PDFError, offset: usize) -> PDFResult<()> {
        if self.policy == ErrorPolicy::Strict {
            return Err(error);
        }
        if self.records.len() >= self.policy.max_errors() {
            return Err(PDFError::TooManyErrors {
                count: self.records.len(),
            });
        }
        log::debug!("recovered PDF error at offset {}: {}", offset, error);
        self.records.push(ErrorRecord {
            kind: error.kind(),
            offset,
            message: error.to_string(),
        });
        Ok(())
    }

    /// Records an advisory condition regardless of policy.
    ///
    /// For findings that must never abort on their own — the presence of
    /// /Encrypt opens the document either way and the caller decides via
    /// `is_encrypted()`.
    pub fn note(&mut self, error: PDFError, offset: usize) {
        self.records.push(ErrorRecord {
            kind: error.kind(),
            offset,
            message: error.to_string(),
        });
    }

    /// All errors recorded so far, in order.
    pub fn records(&self) -> &[ErrorRecord] {
        &self.records
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}
