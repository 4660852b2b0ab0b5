use serde::{Deserialize, Serialize};

use quotamon_core::{GraceStatus, QuotaKind, QuotaValue};

/// Owner field of a wire record, serialized as `user` or `vo` depending on
/// the entity kind.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum OwnerRef {
    #[serde(rename = "user")]
    User(String),
    #[serde(rename = "vo")]
    Project(String),
}

impl OwnerRef {
    pub fn new(kind: QuotaKind, owner: impl Into<String>) -> Self {
        match kind {
            QuotaKind::User => OwnerRef::User(owner.into()),
            QuotaKind::Fileset => OwnerRef::Project(owner.into()),
        }
    }

    pub fn name(&self) -> &str {
        match self {
            OwnerRef::User(name) | OwnerRef::Project(name) => name,
        }
    }
}

/// One flattened quota record as sent to the remote sink.
///
/// Grace tuples are flattened to an expired flag plus remaining seconds,
/// with no countdown normalized to 0.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WireRecord {
    #[serde(flatten)]
    pub owner: OwnerRef,
    pub fileset: Option<String>,
    pub used: u64,
    pub soft: u64,
    pub hard: u64,
    pub doubt: u64,
    pub expired: bool,
    pub remaining: u64,
    pub files_used: u64,
    pub files_soft: u64,
    pub files_hard: u64,
    pub files_doubt: u64,
    pub files_expired: bool,
    pub files_remaining: u64,
}

impl WireRecord {
    pub fn from_value(
        kind: QuotaKind,
        owner: &str,
        fileset: Option<&str>,
        quota: &QuotaValue,
    ) -> Self {
        Self {
            owner: OwnerRef::new(kind, owner),
            fileset: fileset.map(str::to_string),
            used: quota.used,
            soft: quota.soft,
            hard: quota.hard,
            doubt: quota.doubt,
            expired: quota.expired.expired,
            remaining: quota.expired.remaining_or_zero(),
            files_used: quota.files_used,
            files_soft: quota.files_soft,
            files_hard: quota.files_hard,
            files_doubt: quota.files_doubt,
            files_expired: quota.files_expired.expired,
            files_remaining: quota.files_expired.remaining_or_zero(),
        }
    }

    /// Reconstructs the quota value this record was flattened from.
    ///
    /// A remaining count of 0 maps back to no active countdown.
    pub fn to_value(&self, timestamp: u64) -> QuotaValue {
        QuotaValue {
            used: self.used,
            soft: self.soft,
            hard: self.hard,
            doubt: self.doubt,
            expired: unflatten_grace(self.expired, self.remaining),
            files_used: self.files_used,
            files_soft: self.files_soft,
            files_hard: self.files_hard,
            files_doubt: self.files_doubt,
            files_expired: unflatten_grace(self.files_expired, self.files_remaining),
            timestamp,
        }
    }
}

fn unflatten_grace(expired: bool, remaining: u64) -> GraceStatus {
    if remaining > 0 {
        GraceStatus {
            expired,
            remaining_secs: Some(remaining),
        }
    } else if expired {
        GraceStatus::expired()
    } else {
        GraceStatus::none()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_value() -> QuotaValue {
        QuotaValue {
            used: 120,
            soft: 100,
            hard: 200,
            doubt: 5,
            expired: GraceStatus::active(3600),
            files_used: 42,
            files_soft: 1000,
            files_hard: 2000,
            files_doubt: 1,
            files_expired: GraceStatus::none(),
            timestamp: 1_600_000_000,
        }
    }

    #[test]
    fn test_owner_serialized_as_user_field() {
        let record = WireRecord::from_value(QuotaKind::User, "vsc40075", None, &sample_value());
        let json = serde_json::to_value(&record).unwrap();
        assert_eq!(json["user"], "vsc40075");
        assert!(json.get("vo").is_none());
    }

    #[test]
    fn test_owner_serialized_as_vo_field() {
        let record =
            WireRecord::from_value(QuotaKind::Fileset, "gvo00002", None, &sample_value());
        let json = serde_json::to_value(&record).unwrap();
        assert_eq!(json["vo"], "gvo00002");
        assert!(json.get("user").is_none());
    }

    #[test]
    fn test_expired_without_countdown_flattens_to_zero_remaining() {
        let mut value = sample_value();
        value.expired = GraceStatus::expired();

        let record = WireRecord::from_value(QuotaKind::User, "u1", None, &value);
        assert!(record.expired);
        assert_eq!(record.remaining, 0);
    }

    #[test]
    fn test_round_trip_preserves_counters() {
        let value = sample_value();
        let record =
            WireRecord::from_value(QuotaKind::User, "u1", Some("proj1"), &value);
        let restored = record.to_value(value.timestamp);
        assert_eq!(restored, value);
    }

    #[test]
    fn test_round_trip_expired_grace() {
        let mut value = sample_value();
        value.expired = GraceStatus::expired();
        value.files_expired = GraceStatus::expired();

        let record = WireRecord::from_value(QuotaKind::User, "u1", None, &value);
        let restored = record.to_value(value.timestamp);
        assert_eq!(restored.expired, GraceStatus::expired());
        assert_eq!(restored.files_expired, GraceStatus::expired());
    }

    #[test]
    fn test_json_round_trip() {
        let record = WireRecord::from_value(
            QuotaKind::Fileset,
            "gvo00002",
            Some("gvo00002"),
            &sample_value(),
        );
        let json = serde_json::to_string(&record).unwrap();
        let decoded: WireRecord = serde_json::from_str(&json).unwrap();
        assert_eq!(record, decoded);
    }

    #[test]
    fn test_owner_ref_name() {
        assert_eq!(OwnerRef::new(QuotaKind::User, "u1").name(), "u1");
        assert_eq!(OwnerRef::new(QuotaKind::Fileset, "g1").name(), "g1");
    }
}
