#[derive(thiserror::Error, Debug)]
pub enum Error {
    #[error("Nexus not connected")]
    NotConnected,

    #[error("IO error: `{0}`")]
    IO(#[from] std::io::Error),

    #[error("Serial port error: `{0}`")]
    Serial(#[from] serialport::Error),

    #[error("Malformed reply `{1}` to command `{0}`")]
    MalformedReply(String, String),

    #[error("Mount rejected position `{0}`")]
    InvalidPosition(String),
}

pub type Result<T> = std::result::Result<T, Error>;
