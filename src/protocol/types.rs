use std::fmt;
use std::str::FromStr;

use async_trait::async_trait;
use bytes::Bytes;

/// Protocol error types
#[derive(Debug, thiserror::Error)]
pub enum ProtocolError {
    #[error("Invalid service: {0}")]
    InvalidService(String),

    #[error("Object not found: {0}")]
    ObjectNotFound(String),

    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Pack error: {0}")]
    Pack(String),

    #[error("Read timed out after {0:?}")]
    Timeout(std::time::Duration),

    #[error("Duplex closed unexpectedly")]
    Closed,

    #[error("Cancelled")]
    Cancelled,

    #[error("Internal error: {0}")]
    Internal(String),
}

impl ProtocolError {
    pub fn invalid_service(service: &str) -> Self {
        ProtocolError::InvalidService(service.to_string())
    }

    pub fn repository_error(msg: String) -> Self {
        ProtocolError::Internal(msg)
    }

    pub fn invalid_request(msg: &str) -> Self {
        ProtocolError::InvalidRequest(msg.to_string())
    }
}

impl From<crate::errors::GitError> for ProtocolError {
    fn from(e: crate::errors::GitError) -> Self {
        match e {
            crate::errors::GitError::NotFound(what) => ProtocolError::ObjectNotFound(what),
            crate::errors::GitError::Cancelled => ProtocolError::Cancelled,
            crate::errors::GitError::CorruptPack(msg) => ProtocolError::Pack(msg),
            other => ProtocolError::Internal(other.to_string()),
        }
    }
}

/// A transport-agnostic byte duplex: the protocol's only view of the
/// network. Implementations exist for in-process channels; HTTP or
/// peer-to-peer substrates plug in the same way.
///
/// `close` shuts the *outgoing* direction only (half-close), so a peer can
/// finish reading our request while we await its response.
#[async_trait]
pub trait Duplex: Send {
    async fn send(&mut self, data: Bytes) -> Result<(), ProtocolError>;

    /// The next chunk, or `None` once the peer half-closed.
    async fn recv(&mut self) -> Result<Option<Bytes>, ProtocolError>;

    async fn close(&mut self) -> Result<(), ProtocolError>;
}

/// Git service types for the smart protocol.
#[derive(Debug, PartialEq, Clone, Copy)]
pub enum ServiceType {
    UploadPack,
    ReceivePack,
}

impl fmt::Display for ServiceType {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            ServiceType::UploadPack => write!(f, "git-upload-pack"),
            ServiceType::ReceivePack => write!(f, "git-receive-pack"),
        }
    }
}

impl FromStr for ServiceType {
    type Err = ProtocolError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "git-upload-pack" => Ok(ServiceType::UploadPack),
            "git-receive-pack" => Ok(ServiceType::ReceivePack),
            _ => Err(ProtocolError::InvalidService(s.to_string())),
        }
    }
}

/// Git protocol capabilities exchanged on the first advertisement line.
#[derive(Debug, Clone, PartialEq)]
pub enum Capability {
    /// Multi-ack-detailed capability for granular acknowledgments
    MultiAckDetailed,
    /// Side-band-64k capability for multiplexed pack transfer
    SideBand64k,
    /// Report-status capability for push status reporting
    ReportStatus,
    /// OFS-delta capability for offset-based delta compression
    OfsDelta,
    /// Thin-pack capability for packs that omit bases the receiver has
    ThinPack,
    /// Delete-refs capability for reference deletion on push
    DeleteRefs,
    /// Agent capability for client/server identification
    Agent(String),
    /// Unknown capability for forward compatibility
    Unknown(String),
}

impl FromStr for Capability {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if let Some(rest) = s.strip_prefix("agent=") {
            return Ok(Capability::Agent(rest.to_string()));
        }
        match s {
            "multi_ack_detailed" => Ok(Capability::MultiAckDetailed),
            "side-band-64k" => Ok(Capability::SideBand64k),
            "report-status" => Ok(Capability::ReportStatus),
            "ofs-delta" => Ok(Capability::OfsDelta),
            "thin-pack" => Ok(Capability::ThinPack),
            "delete-refs" => Ok(Capability::DeleteRefs),
            _ => Ok(Capability::Unknown(s.to_string())),
        }
    }
}

impl fmt::Display for Capability {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Capability::MultiAckDetailed => write!(f, "multi_ack_detailed"),
            Capability::SideBand64k => write!(f, "side-band-64k"),
            Capability::ReportStatus => write!(f, "report-status"),
            Capability::OfsDelta => write!(f, "ofs-delta"),
            Capability::ThinPack => write!(f, "thin-pack"),
            Capability::DeleteRefs => write!(f, "delete-refs"),
            Capability::Agent(agent) => write!(f, "agent={agent}"),
            Capability::Unknown(s) => write!(f, "{s}"),
        }
    }
}

/// Side-band stream selectors for multiplexed data.
pub enum SideBand {
    /// Sideband 1 carries packfile data
    PackfileData,
    /// Sideband 2 carries progress information
    ProgressInfo,
    /// Sideband 3 carries error information
    Error,
}

impl SideBand {
    pub fn value(&self) -> u8 {
        match self {
            Self::PackfileData => b'\x01',
            Self::ProgressInfo => b'\x02',
            Self::Error => b'\x03',
        }
    }
}

/// One advertised reference.
#[derive(Clone, Debug)]
pub struct GitRef {
    pub name: String,
    pub id: crate::hash::ObjectId,
}

/// Reference command of a push: `<old> <new> <name>`.
#[derive(Debug, Clone)]
pub struct RefCommand {
    pub old_id: crate::hash::ObjectId,
    pub new_id: crate::hash::ObjectId,
    pub ref_name: String,
    pub status: CommandStatus,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CommandStatus {
    Pending,
    Success,
    Failed(String),
}

impl RefCommand {
    pub fn new(
        old_id: crate::hash::ObjectId,
        new_id: crate::hash::ObjectId,
        ref_name: String,
    ) -> Self {
        Self {
            old_id,
            new_id,
            ref_name,
            status: CommandStatus::Pending,
        }
    }

    pub fn is_delete(&self) -> bool {
        self.new_id.is_zero()
    }

    pub fn is_create(&self) -> bool {
        self.old_id.is_zero()
    }

    pub fn failed(&mut self, error: String) {
        self.status = CommandStatus::Failed(error);
    }

    pub fn success(&mut self) {
        self.status = CommandStatus::Success;
    }

    /// The per-ref report-status line.
    pub fn report_line(&self) -> String {
        match &self.status {
            CommandStatus::Success | CommandStatus::Pending => {
                format!("ok {}", self.ref_name)
            }
            CommandStatus::Failed(error) => format!("ng {} {}", self.ref_name, error),
        }
    }
}

/// Protocol constants
pub const LF: char = '\n';
pub const SP: char = ' ';
pub const NUL: char = '\0';
pub const PKT_LINE_END_MARKER: &[u8; 4] = b"0000";
pub const PKT_DELIM_MARKER: &[u8; 4] = b"0001";
pub const PKT_RESPONSE_END_MARKER: &[u8; 4] = b"0002";

/// Largest side-band-64k payload (frame minus length, band byte).
pub const SIDE_BAND_64K_PAYLOAD: usize = 65515;

// Capability lists advertised per service.
pub const UPLOAD_CAP_LIST: &str = "multi_ack_detailed thin-pack side-band-64k ofs-delta";
pub const RECEIVE_CAP_LIST: &str = "report-status delete-refs ofs-delta";

#[cfg(test)]
mod tests {
    use super::*;

    /// Capability strings round-trip through parse and display.
    #[test]
    fn capability_round_trip() {
        for text in [
            "multi_ack_detailed",
            "side-band-64k",
            "report-status",
            "ofs-delta",
            "thin-pack",
            "delete-refs",
            "agent=git-peer/0.3.1",
        ] {
            let capability: Capability = text.parse().unwrap();
            assert_eq!(capability.to_string(), text);
        }
        assert!(matches!(
            "no-such-cap".parse::<Capability>().unwrap(),
            Capability::Unknown(_)
        ));
    }

    /// Service names parse both directions.
    #[test]
    fn service_type_round_trip() {
        assert_eq!(
            "git-upload-pack".parse::<ServiceType>().unwrap(),
            ServiceType::UploadPack
        );
        assert_eq!(ServiceType::ReceivePack.to_string(), "git-receive-pack");
        assert!("git-frobnicate".parse::<ServiceType>().is_err());
    }

    /// Ref commands classify creates/deletes and format report lines.
    #[test]
    fn ref_command_report() {
        use crate::hash::ObjectId;
        let mut command = RefCommand::new(
            ObjectId::ZERO,
            ObjectId::from_raw([1; 20]),
            "refs/heads/main".to_string(),
        );
        assert!(command.is_create());
        assert!(!command.is_delete());
        command.success();
        assert_eq!(command.report_line(), "ok refs/heads/main");
        command.failed("non-fast-forward".to_string());
        assert_eq!(
            command.report_line(),
            "ng refs/heads/main non-fast-forward"
        );
    }
}
