use std::{
    fmt,
    io::{self, Read, Write},
};

use log::{debug, warn};
use thiserror::Error;

use super::ChunkedTransport;

/// Preamble every Bolt client sends before its version proposals.
pub const BOLT_MAGIC: [u8; 4] = [0x60, 0x60, 0xB0, 0x17];

/// The only version this server speaks.
pub const SUPPORTED_VERSION: Version = Version {
    major: 4,
    minor: 4,
    range: 0,
};

#[derive(Debug, Error)]
pub enum HandshakeError {
    #[error("invalid magic preamble {0:02X?}")]
    BadMagic([u8; 4]),
    #[error("handshake IO error: {0}")]
    Io(#[from] io::Error),
}

/// A protocol version as proposed in the handshake. Bolt 4.3+ clients may
/// set `range` to also accept the `range` minor versions below `minor`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Version {
    pub major: u8,
    pub minor: u8,
    pub range: u8,
}

impl Version {
    pub fn from_bytes(bytes: [u8; 4]) -> Self {
        Self {
            range: bytes[1],
            minor: bytes[2],
            major: bytes[3],
        }
    }

    pub fn to_bytes(self) -> [u8; 4] {
        [0, self.range, self.minor, self.major]
    }

    pub fn is_empty(self) -> bool {
        self.major == 0 && self.minor == 0
    }

    /// Whether this proposal covers `other`.
    pub fn accepts(self, other: Version) -> bool {
        self.major == other.major
            && other.minor <= self.minor
            && other.minor >= self.minor.saturating_sub(self.range)
    }
}

impl fmt::Display for Version {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.range > 0 {
            write!(
                f,
                "{}.{}-{}",
                self.major,
                self.minor.saturating_sub(self.range),
                self.minor
            )
        } else {
            write!(f, "{}.{}", self.major, self.minor)
        }
    }
}

/// Runs the server side of the handshake: checks the magic preamble, reads
/// the four proposals and answers with [`SUPPORTED_VERSION`].
///
/// The answer is always 4.4, even when no proposal covers it. Clients that
/// cannot speak 4.4 find out when their first message fails.
pub fn negotiate<R: Read, W: Write>(
    transport: &mut ChunkedTransport<R, W>,
) -> Result<Version, HandshakeError> {
    let mut magic = [0; 4];
    transport.read_exact(&mut magic)?;
    if magic != BOLT_MAGIC {
        return Err(HandshakeError::BadMagic(magic));
    }

    let mut proposals = [0; 16];
    transport.read_exact(&mut proposals)?;
    let proposals: Vec<Version> = proposals
        .chunks_exact(4)
        .map(|c| Version::from_bytes([c[0], c[1], c[2], c[3]]))
        .filter(|v| !v.is_empty())
        .collect();

    let matched = proposals.iter().any(|p| p.accepts(SUPPORTED_VERSION));
    if matched {
        debug!(
            "client proposed {}; selected {SUPPORTED_VERSION}",
            list(&proposals)
        );
    } else {
        warn!(
            "client proposed {}, none cover {SUPPORTED_VERSION}; answering {SUPPORTED_VERSION} anyway",
            list(&proposals)
        );
    }

    transport.write_raw(&SUPPORTED_VERSION.to_bytes())?;
    Ok(SUPPORTED_VERSION)
}

fn list(versions: &[Version]) -> String {
    versions
        .iter()
        .map(|v| v.to_string())
        .collect::<Vec<_>>()
        .join(", ")
}

#[cfg(test)]
mod tests {
    use std::io::Cursor;

    use super::*;

    fn client_hello(versions: [[u8; 4]; 4]) -> Vec<u8> {
        let mut out = BOLT_MAGIC.to_vec();
        for v in versions {
            out.extend_from_slice(&v);
        }
        out
    }

    #[test]
    fn selects_four_four() {
        let input = client_hello([[0, 0, 4, 4], [0, 0, 3, 4], [0, 0, 0, 3], [0; 4]]);
        let mut t = ChunkedTransport::new(Cursor::new(input), Vec::new());

        let version = negotiate(&mut t).unwrap();
        assert_eq!(version, SUPPORTED_VERSION);
        assert_eq!(t.into_parts().1, vec![0x00, 0x00, 0x04, 0x04]);
    }

    #[test]
    fn answers_even_without_a_match() {
        let input = client_hello([[0, 0, 0, 5], [0, 0, 0, 3], [0; 4], [0; 4]]);
        let mut t = ChunkedTransport::new(Cursor::new(input), Vec::new());

        assert_eq!(negotiate(&mut t).unwrap(), SUPPORTED_VERSION);
        assert_eq!(t.into_parts().1, vec![0x00, 0x00, 0x04, 0x04]);
    }

    #[test]
    #[should_panic(expected = "BadMagic")]
    fn rejects_bad_magic() {
        let mut input = client_hello([[0; 4]; 4]);
        input[0] = 0x47;
        let mut t = ChunkedTransport::new(Cursor::new(input), Vec::new());
        negotiate(&mut t).unwrap();
    }

    #[test]
    fn truncated_proposals_are_io_errors() {
        let mut input = BOLT_MAGIC.to_vec();
        input.extend_from_slice(&[0, 0, 4, 4]);
        let mut t = ChunkedTransport::new(Cursor::new(input), Vec::new());
        assert!(matches!(negotiate(&mut t), Err(HandshakeError::Io(_))));
    }

    #[test]
    fn version_ranges() {
        let proposal = Version::from_bytes([0, 2, 4, 4]);
        assert_eq!(proposal.to_string(), "4.2-4");
        assert!(proposal.accepts(Version { major: 4, minor: 3, range: 0 }));
        assert!(!proposal.accepts(Version { major: 4, minor: 1, range: 0 }));
        assert!(!proposal.accepts(Version { major: 5, minor: 4, range: 0 }));
    }
}
