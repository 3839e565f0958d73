use std::fmt;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::str::FromStr;

use crate::error::TransportError;

/// Where to listen or connect: `tcp://host:port`, `unix:///path`, or a bare
/// `host:port` (TCP).
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Endpoint {
    Tcp(SocketAddr),
    Unix(PathBuf),
}

impl FromStr for Endpoint {
    type Err = TransportError;

    fn from_str(input: &str) -> Result<Self, Self::Err> {
        let input = input.trim();
        if let Some(path) = input.strip_prefix("unix://") {
            if path.is_empty() {
                return Err(TransportError::InvalidEndpoint(input.to_string()));
            }
            return Ok(Endpoint::Unix(PathBuf::from(path)));
        }
        let addr = input.strip_prefix("tcp://").unwrap_or(input);
        addr.parse::<SocketAddr>()
            .map(Endpoint::Tcp)
            .map_err(|_| TransportError::InvalidEndpoint(input.to_string()))
    }
}

impl fmt::Display for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Endpoint::Tcp(addr) => write!(f, "tcp://{addr}"),
            Endpoint::Unix(path) => write!(f, "unix://{}", path.display()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_tcp_forms() {
        let expected = Endpoint::Tcp("127.0.0.1:7000".parse().unwrap());
        assert_eq!("tcp://127.0.0.1:7000".parse::<Endpoint>().unwrap(), expected);
        assert_eq!("127.0.0.1:7000".parse::<Endpoint>().unwrap(), expected);
    }

    #[test]
    fn parses_unix_path() {
        let ep: Endpoint = "unix:///tmp/z.sock".parse().unwrap();
        assert_eq!(ep, Endpoint::Unix(PathBuf::from("/tmp/z.sock")));
        assert_eq!(ep.to_string(), "unix:///tmp/z.sock");
    }

    #[test]
    fn rejects_garbage() {
        assert!(matches!(
            "localhost".parse::<Endpoint>(),
            Err(TransportError::InvalidEndpoint(_))
        ));
        assert!("unix://".parse::<Endpoint>().is_err());
    }
}
