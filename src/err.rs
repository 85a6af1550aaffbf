use std::io;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("Tun error: {0}")]
    TunError(#[from] tidy_tuntap::error::Error),

    #[error("Header parse error: {0}")]
    ParseError(#[from] etherparse::ReadError),

    #[error("Malformed {0} packet")]
    Malformed(&'static str),

    #[error("Port: {0} has been unexpectedly closed")]
    PortClosed(u16),

    #[error("Port: {0} already in use")]
    PortInUse(u16),

    #[error("No ephemeral ports left")]
    NoEphemeralPorts,

    #[error("Connection has been reset")]
    ConnectionReset,

    #[error("Connection refused by peer")]
    ConnectionRefused,
}

impl From<Error> for io::Error {
    fn from(err: Error) -> io::Error {
        let kind = match err {
            Error::ConnectionReset => io::ErrorKind::ConnectionReset,
            Error::ConnectionRefused => io::ErrorKind::ConnectionRefused,
            Error::PortClosed(_) => io::ErrorKind::NotConnected,
            _ => io::ErrorKind::Other,
        };

        io::Error::new(kind, err.to_string())
    }
}
