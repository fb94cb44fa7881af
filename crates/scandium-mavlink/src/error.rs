#[derive(thiserror::Error, Debug)]
pub enum TransportError {
    #[error(transparent)]
    Io(#[from] std::io::Error),
    #[error("serial port: {0}")]
    Serial(#[from] serialport::Error),
    #[error("failed to encode MAVLink frame: {0}")]
    Encode(String),
    #[error("no peer address known yet")]
    NoPeer,
    #[error("{0} is not supported by this transport")]
    Unsupported(&'static str),
}

#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum DecodeError {
    #[error("buffer does not start with a MAVLink frame")]
    NotAFrame,
    #[error("invalid MAVLink frame: {0}")]
    Invalid(String),
}
