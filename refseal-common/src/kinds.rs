//! The closed set of reference kinds the detectors recognize.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// What a concrete value identifies.
///
/// The set is closed on purpose: adding a kind means extending this enum and
/// the builtin rule catalog together, never a stringly-typed table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReferenceKind {
    /// Absolute or home-relative filesystem path.
    FilePath,
    /// Numeric or UUID identifier.
    Identifier,
    /// Credential material: API key, JWT, private key, generic secret.
    Token,
    /// http/https/ws/wss/ftp URL.
    Url,
    /// IPv4 address.
    IpAddress,
    /// Network port, only with a context cue.
    Port,
    /// Container or pod name, only with a context cue.
    ContainerName,
    /// Container image reference with a tag.
    ImageTag,
    /// Value assigned to an UPPER_SNAKE environment variable.
    EnvVarValue,
    /// Date-time literal or epoch seconds.
    Timestamp,
    /// Duration literal with an attached unit.
    Duration,
    /// Email address.
    Email,
    /// Phone number.
    Phone,
    /// Three-two-four digit group resembling a social security number.
    SsnLike,
    /// Thirteen to nineteen digit run resembling a card number.
    CreditCardLike,
    /// User home directory prefix.
    UserHome,
    /// Path under a temp directory.
    TempPath,
    /// Database connection string.
    DbConnectionString,
}

impl ReferenceKind {
    /// Every kind, in the order used for deterministic iteration and
    /// registry tie-breaking.
    pub const ALL: [ReferenceKind; 18] = [
        ReferenceKind::FilePath,
        ReferenceKind::Identifier,
        ReferenceKind::Token,
        ReferenceKind::Url,
        ReferenceKind::IpAddress,
        ReferenceKind::Port,
        ReferenceKind::ContainerName,
        ReferenceKind::ImageTag,
        ReferenceKind::EnvVarValue,
        ReferenceKind::Timestamp,
        ReferenceKind::Duration,
        ReferenceKind::Email,
        ReferenceKind::Phone,
        ReferenceKind::SsnLike,
        ReferenceKind::CreditCardLike,
        ReferenceKind::UserHome,
        ReferenceKind::TempPath,
        ReferenceKind::DbConnectionString,
    ];

    /// Snake_case token used in placeholders, metric labels, and stored
    /// histograms.
    pub fn as_str(&self) -> &'static str {
        match self {
            ReferenceKind::FilePath => "file_path",
            ReferenceKind::Identifier => "identifier",
            ReferenceKind::Token => "token",
            ReferenceKind::Url => "url",
            ReferenceKind::IpAddress => "ip_address",
            ReferenceKind::Port => "port",
            ReferenceKind::ContainerName => "container_name",
            ReferenceKind::ImageTag => "image_tag",
            ReferenceKind::EnvVarValue => "env_var_value",
            ReferenceKind::Timestamp => "timestamp",
            ReferenceKind::Duration => "duration",
            ReferenceKind::Email => "email",
            ReferenceKind::Phone => "phone",
            ReferenceKind::SsnLike => "ssn_like",
            ReferenceKind::CreditCardLike => "credit_card_like",
            ReferenceKind::UserHome => "user_home",
            ReferenceKind::TempPath => "temp_path",
            ReferenceKind::DbConnectionString => "db_connection_string",
        }
    }
}

impl fmt::Display for ReferenceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ReferenceKind {
    type Err = UnknownKind;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        ReferenceKind::ALL
            .iter()
            .copied()
            .find(|k| k.as_str() == s)
            .ok_or_else(|| UnknownKind(s.to_string()))
    }
}

/// Parse error for [`ReferenceKind`].
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown reference kind: {0}")]
pub struct UnknownKind(pub String);

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trips_through_str() {
        for kind in ReferenceKind::ALL {
            assert_eq!(kind.as_str().parse::<ReferenceKind>().unwrap(), kind);
        }
    }

    #[test]
    fn all_is_exhaustive_and_unique() {
        let mut tokens: Vec<&str> = ReferenceKind::ALL.iter().map(|k| k.as_str()).collect();
        tokens.sort_unstable();
        tokens.dedup();
        assert_eq!(tokens.len(), ReferenceKind::ALL.len());
    }

    #[test]
    fn serde_uses_snake_case() {
        let json = serde_json::to_string(&ReferenceKind::DbConnectionString).unwrap();
        assert_eq!(json, "\"db_connection_string\"");
    }

    #[test]
    fn unknown_kind_is_rejected() {
        assert!("hostname".parse::<ReferenceKind>().is_err());
    }
}
