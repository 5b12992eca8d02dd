// Error kinds and the builder-style error carried through every fallible API.
use std::error::Error as StdError;
use std::fmt;

#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash)]
pub enum ErrorKind {
    Internal,
    Usage,
    UnknownDescriptor,
    UnknownHandle,
    SchemaMismatch,
    MalformedEncoding,
    Unimplemented,
    AbortedSession,
    ComparatorMisuse,
    Allocation,
    Timeout,
    Closed,
    Io,
}

impl ErrorKind {
    pub fn as_str(self) -> &'static str {
        match self {
            ErrorKind::Internal => "Internal",
            ErrorKind::Usage => "Usage",
            ErrorKind::UnknownDescriptor => "UnknownDescriptor",
            ErrorKind::UnknownHandle => "UnknownHandle",
            ErrorKind::SchemaMismatch => "SchemaMismatch",
            ErrorKind::MalformedEncoding => "MalformedEncoding",
            ErrorKind::Unimplemented => "Unimplemented",
            ErrorKind::AbortedSession => "AbortedSession",
            ErrorKind::ComparatorMisuse => "ComparatorMisuse",
            ErrorKind::Allocation => "Allocation",
            ErrorKind::Timeout => "Timeout",
            ErrorKind::Closed => "Closed",
            ErrorKind::Io => "Io",
        }
    }

    pub fn parse(kind: &str) -> Option<Self> {
        let kind = match kind {
            "Internal" => ErrorKind::Internal,
            "Usage" => ErrorKind::Usage,
            "UnknownDescriptor" => ErrorKind::UnknownDescriptor,
            "UnknownHandle" => ErrorKind::UnknownHandle,
            "SchemaMismatch" => ErrorKind::SchemaMismatch,
            "MalformedEncoding" => ErrorKind::MalformedEncoding,
            "Unimplemented" => ErrorKind::Unimplemented,
            "AbortedSession" => ErrorKind::AbortedSession,
            "ComparatorMisuse" => ErrorKind::ComparatorMisuse,
            "Allocation" => ErrorKind::Allocation,
            "Timeout" => ErrorKind::Timeout,
            "Closed" => ErrorKind::Closed,
            "Io" => ErrorKind::Io,
            _ => return None,
        };
        Some(kind)
    }
}

#[derive(Debug)]
pub struct Error {
    kind: ErrorKind,
    message: Option<String>,
    hint: Option<String>,
    descriptor: Option<String>,
    index: Option<u64>,
    source: Option<Box<dyn StdError + Send + Sync>>,
}

impl Error {
    pub fn new(kind: ErrorKind) -> Self {
        Self {
            kind,
            message: None,
            hint: None,
            descriptor: None,
            index: None,
            source: None,
        }
    }

    pub fn kind(&self) -> ErrorKind {
        self.kind
    }

    pub fn message(&self) -> Option<&str> {
        self.message.as_deref()
    }

    pub fn hint(&self) -> Option<&str> {
        self.hint.as_deref()
    }

    pub fn descriptor(&self) -> Option<&str> {
        self.descriptor.as_deref()
    }

    pub fn index(&self) -> Option<u64> {
        self.index
    }

    pub fn with_message(mut self, message: impl Into<String>) -> Self {
        self.message = Some(message.into());
        self
    }

    pub fn with_hint(mut self, hint: impl Into<String>) -> Self {
        self.hint = Some(hint.into());
        self
    }

    pub fn with_descriptor(mut self, descriptor: impl fmt::Display) -> Self {
        self.descriptor = Some(descriptor.to_string());
        self
    }

    pub fn with_index(mut self, index: u64) -> Self {
        self.index = Some(index);
        self
    }

    pub fn with_source(mut self, source: impl StdError + Send + Sync + 'static) -> Self {
        self.source = Some(Box::new(source));
        self
    }

    /// Copies kind, message, and context without the (non-cloneable) source.
    pub fn detached(&self) -> Self {
        Self {
            kind: self.kind,
            message: self.message.clone(),
            hint: self.hint.clone(),
            descriptor: self.descriptor.clone(),
            index: self.index,
            source: None,
        }
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.kind.as_str())?;
        if let Some(message) = &self.message {
            write!(f, ": {message}")?;
        }
        if let Some(descriptor) = &self.descriptor {
            write!(f, " (descriptor: {descriptor})")?;
        }
        if let Some(index) = self.index {
            write!(f, " (index: {index})")?;
        }
        Ok(())
    }
}

impl StdError for Error {
    fn source(&self) -> Option<&(dyn StdError + 'static)> {
        self.source
            .as_ref()
            .map(|source| source.as_ref() as &(dyn StdError + 'static))
    }
}

pub fn to_exit_code(kind: ErrorKind) -> i32 {
    match kind {
        ErrorKind::Internal => 1,
        ErrorKind::Usage => 2,
        ErrorKind::UnknownDescriptor => 3,
        ErrorKind::UnknownHandle => 4,
        ErrorKind::SchemaMismatch => 5,
        ErrorKind::MalformedEncoding => 6,
        ErrorKind::Unimplemented => 7,
        ErrorKind::AbortedSession => 8,
        ErrorKind::ComparatorMisuse => 9,
        ErrorKind::Allocation => 10,
        ErrorKind::Timeout => 11,
        ErrorKind::Closed => 12,
        ErrorKind::Io => 13,
    }
}
