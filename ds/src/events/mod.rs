//! Sibling-replica notifications
//!
//! After a replica persists the document it publishes a `SyncNotice` so
//! other replicas sharing the same durable cache can re-read it. The channel
//! is a collaborator seam: in-process bus, polled version file, or nothing.

mod channel;
mod file;

use serde::{Deserialize, Serialize};

pub use channel::{ChannelError, DEFAULT_NOTICE_CAPACITY, DisabledChannel, InProcessChannel, SyncChannel};
pub use file::{DEFAULT_POLL_INTERVAL, VersionFileChannel};

/// "I just persisted a document with this timestamp"
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncNotice {
    pub timestamp: i64,
    pub sender_id: String,
}

impl SyncNotice {
    pub fn new(timestamp: i64, sender_id: impl Into<String>) -> Self {
        Self {
            timestamp,
            sender_id: sender_id.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_notice_wire_format() {
        let notice = SyncNotice::new(42, "abc");
        let json = serde_json::to_string(&notice).unwrap();
        assert_eq!(json, r#"{"timestamp":42,"senderId":"abc"}"#);
        let parsed: SyncNotice = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed, notice);
    }
}
