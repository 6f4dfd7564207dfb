use thiserror::Error;

/// Failures talking to the market-data or fundamentals endpoints.
///
/// An unknown symbol is not an error: the provider answers with an empty
/// [`Series`](crate::models::Series) instead.
#[derive(Debug, Error)]
pub enum ProviderError {
    /// Transport failure (DNS, TLS, timeout) or an undecodable body.
    #[error("request failed: {0}")]
    Request(#[from] reqwest::Error),

    /// The provider answered with a non-success status other than "not found".
    #[error("provider returned HTTP {status}: {message}")]
    Api { status: u16, message: String },

    /// The payload decoded but did not have the expected shape.
    #[error("unexpected provider payload: {0}")]
    Payload(String),
}

/// Failures writing an export.
#[derive(Debug, Error)]
pub enum ExportError {
    #[error("nothing to export: the series for {0} is empty")]
    EmptySeries(String),

    #[error("failed to write CSV: {0}")]
    Csv(#[from] csv::Error),

    #[error("failed to encode PNG: {0}")]
    Image(#[from] image::ImageError),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Rejected user input.
#[derive(Debug, Error, PartialEq)]
pub enum ParseError {
    #[error("unknown period `{0}` (expected one of 1d, 1mo, 3mo, 6mo, 1y, 2y, 5y)")]
    Period(String),

    #[error("unknown indicator `{0}` (expected sma, rsi, macd or bollinger)")]
    Indicator(String),

    #[error("`{0}` is not a valid ticker symbol")]
    Ticker(String),
}
