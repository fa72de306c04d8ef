use std::io;

use thiserror::Error;

#[derive(Error, Debug)]
pub enum Error {
    /// The addressed device stopped driving the bus mid-transfer
    #[error("The bus transaction timed out")]
    BusTimeout,

    #[error("The device NACKed before the transfer was complete")]
    Nack,

    /// The image file ends before the body the descriptor declares
    #[error("The image holds {actual} body bytes but the descriptor declares {declared}")]
    TruncatedBody { declared: u32, actual: usize },

    #[error("The computed MAC does not match the one in the descriptor")]
    MacMismatch,

    /// An I/O error occurred
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
}
