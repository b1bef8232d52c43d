use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    #[error("unknown product {oui}/{product_class}")]
    UnknownProduct {
        oui: String,
        product_class: String,
    },
    #[error("invalid session")]
    InvalidSession,
    #[error("store error: {0}")]
    Store(String),
    #[error("connection request failed with status code {0}")]
    ConnectionRequestStatus(u16),
    #[error("{source}")]
    Encode {
        #[from]
        source: cwmp::WriterError,
    },
    #[error("{source}")]
    Http {
        #[from]
        source: reqwest::Error,
    },
    #[error("{source}")]
    Io {
        #[from]
        source: std::io::Error,
    },
}

impl From<Error> for String {
    fn from(value: Error) -> Self {
        value.to_string()
    }
}
