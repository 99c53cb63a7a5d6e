use std::fmt;
use std::string;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug)]
pub enum Error {
    Io(std::io::Error),
    FromUtf8(string::FromUtf8Error),
    Cgroup(String),
    Sandbox(String),
    Compile(String),
    Environment(String),
    /// The task queue is full.
    Busy,
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Error::Io(err) => write!(f, "io error: {}", err),
            Error::FromUtf8(err) => write!(f, "invalid utf-8: {}", err),
            Error::Cgroup(msg) => write!(f, "cgroup error: {}", msg),
            Error::Sandbox(msg) => write!(f, "sandbox error: {}", msg),
            Error::Compile(msg) => write!(f, "compile error: {}", msg),
            Error::Environment(msg) => write!(f, "environment error: {}", msg),
            Error::Busy => write!(f, "system busy: job queue is full"),
        }
    }
}

impl std::error::Error for Error {}

impl From<std::io::Error> for Error {
    fn from(err: std::io::Error) -> Self {
        Self::Io(err)
    }
}

impl From<string::FromUtf8Error> for Error {
    fn from(err: string::FromUtf8Error) -> Self {
        Self::FromUtf8(err)
    }
}
