use derive_more::From;

pub type Result<T> = core::result::Result<T, Error>;

#[derive(Debug, From)]
pub enum Error {
    #[from]
    Json(serde_json::Error),

    #[from]
    Io(std::io::Error),

    /// Custom error message
    Custom(String),
}

impl core::fmt::Display for Error {
    fn fmt(&self, fmt: &mut core::fmt::Formatter) -> core::result::Result<(), core::fmt::Error> {
        match self {
            Self::Io(e) => write!(fmt, "{e}"),
            Self::Custom(message) => write!(fmt, "{message}"),
            other => write!(fmt, "{other:?}"),
        }
    }
}

impl std::error::Error for Error {}
