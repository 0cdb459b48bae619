use thiserror::Error;

use super::message::ReturnCode;

/// Everything that can go wrong while talking FinTS to a bank.
#[derive(Debug, Error)]
pub enum FintsError {
    #[error("transport error: {0}")]
    Transport(String),

    #[error("malformed FinTS data: {0}")]
    Codec(String),

    #[error("bank rejected request: {}", format_codes(.0))]
    Bank(Vec<ReturnCode>),

    #[error("bank requires a TAN for {0}; interactive TAN entry is not supported")]
    TanRequired(String),

    #[error("no SEPA account with IBAN {0}")]
    AccountNotFound(String),

    #[error("response is missing segment {0}")]
    MissingSegment(&'static str),
}

fn format_codes(codes: &[ReturnCode]) -> String {
    codes
        .iter()
        .map(|c| format!("{} {}", c.code, c.text))
        .collect::<Vec<_>>()
        .join("; ")
}

pub type FintsResult<T> = Result<T, FintsError>;

impl From<reqwest::Error> for FintsError {
    fn from(err: reqwest::Error) -> Self {
        FintsError::Transport(err.to_string())
    }
}

impl From<base64::DecodeError> for FintsError {
    fn from(err: base64::DecodeError) -> Self {
        FintsError::Codec(format!("response is not valid base64: {}", err))
    }
}
