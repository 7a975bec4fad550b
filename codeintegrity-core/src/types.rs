use std::collections::BTreeMap;
use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

// ── Commits ────────────────────────────────────────────────────────

/// Content-addressed commit hash, always lowercase hex.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CommitId(String);

impl CommitId {
    pub fn new(hex: impl Into<String>) -> Self {
        Self(hex.into().to_ascii_lowercase())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Abbreviated form for log output.
    pub fn short(&self) -> &str {
        let end = self.0.char_indices().nth(12).map_or(self.0.len(), |(i, _)| i);
        &self.0[..end]
    }
}

impl fmt::Display for CommitId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<gix::ObjectId> for CommitId {
    fn from(oid: gix::ObjectId) -> Self {
        Self(oid.to_string())
    }
}

/// Author or committer identity as recorded in the commit header.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Identity {
    pub name: String,
    pub email: String,
}

impl Identity {
    pub fn new(name: impl Into<String>, email: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            email: email.into(),
        }
    }

    /// Emails are compared case-insensitively; names are ignored.
    pub fn same_email(&self, other: &Identity) -> bool {
        self.email.eq_ignore_ascii_case(&other.email)
    }

    /// Normalized key used to group commits by author.
    pub fn email_key(&self) -> String {
        self.email.to_ascii_lowercase()
    }
}

/// Signature scheme, inferred from the armor of the signature block.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SignatureFormat {
    OpenPgp,
    Ssh,
    X509,
    Unknown,
}

impl SignatureFormat {
    pub fn detect(armored: &str) -> Self {
        let first = armored.lines().next().unwrap_or_default().trim();
        match first {
            "-----BEGIN PGP SIGNATURE-----" | "-----BEGIN PGP MESSAGE-----" => Self::OpenPgp,
            "-----BEGIN SSH SIGNATURE-----" => Self::Ssh,
            "-----BEGIN SIGNED MESSAGE-----" => Self::X509,
            _ => Self::Unknown,
        }
    }
}

/// Detached signature carried in a commit header, with the bytes it signs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SignatureBlock {
    pub format: SignatureFormat,
    /// Unfolded signature text (armor included).
    pub armored: String,
    /// Raw commit object with the signature header removed.
    pub payload: Vec<u8>,
}

/// One commit of the loaded history. Immutable once loaded.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Commit {
    pub id: CommitId,
    /// Declared parents, in header order. Some may be absent from the graph.
    pub parents: Vec<CommitId>,
    pub author: Identity,
    pub committer: Identity,
    pub author_time: DateTime<Utc>,
    pub commit_time: DateTime<Utc>,
    pub signature: Option<SignatureBlock>,
    /// First line of the message.
    pub summary: String,
}

// ── Signature verdicts ─────────────────────────────────────────────

/// Provenance classification of one commit's signature.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SignatureVerdict {
    /// No signature block present.
    Unsigned,
    /// Signature present and verified against a known key.
    SignedVerified,
    /// Signature present, but the verifying key or identity is unknown.
    SignedUnverifiable,
    /// Signature present and does not match the signed content.
    SignedInvalid,
}

impl SignatureVerdict {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Unsigned => "unsigned",
            Self::SignedVerified => "signed_verified",
            Self::SignedUnverifiable => "signed_unverifiable",
            Self::SignedInvalid => "signed_invalid",
        }
    }
}

/// Number of commits per verdict.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct VerdictCounts {
    pub unsigned: u64,
    pub signed_verified: u64,
    pub signed_unverifiable: u64,
    pub signed_invalid: u64,
}

impl VerdictCounts {
    pub fn record(&mut self, verdict: SignatureVerdict) {
        match verdict {
            SignatureVerdict::Unsigned => self.unsigned += 1,
            SignatureVerdict::SignedVerified => self.signed_verified += 1,
            SignatureVerdict::SignedUnverifiable => self.signed_unverifiable += 1,
            SignatureVerdict::SignedInvalid => self.signed_invalid += 1,
        }
    }

    pub fn total(&self) -> u64 {
        self.unsigned + self.signed_verified + self.signed_unverifiable + self.signed_invalid
    }
}

impl FromIterator<SignatureVerdict> for VerdictCounts {
    fn from_iter<I: IntoIterator<Item = SignatureVerdict>>(iter: I) -> Self {
        let mut counts = Self::default();
        for verdict in iter {
            counts.record(verdict);
        }
        counts
    }
}

// ── Anomalies ──────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    High,
    Medium,
    Low,
}

/// Provenance red flags found in a commit graph.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AnomalyKind {
    /// A declared parent is not present in the loaded graph.
    DanglingParent,
    /// History has more than one root commit.
    MultipleRoots,
    /// A timestamp is earlier than an ancestor's.
    NonMonotonicTimestamp,
    /// Unsigned commit whose author differs from its committer.
    UnsignedIdentityMismatch,
    /// Unsigned or invalid commit from an author who otherwise signs.
    VerificationDowngrade,
}

impl AnomalyKind {
    pub const ALL: [AnomalyKind; 5] = [
        Self::DanglingParent,
        Self::MultipleRoots,
        Self::NonMonotonicTimestamp,
        Self::UnsignedIdentityMismatch,
        Self::VerificationDowngrade,
    ];

    /// Severity is fixed per kind.
    pub fn severity(self) -> Severity {
        match self {
            Self::DanglingParent | Self::MultipleRoots => Severity::High,
            Self::NonMonotonicTimestamp | Self::UnsignedIdentityMismatch => Severity::Medium,
            Self::VerificationDowngrade => Severity::Low,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::DanglingParent => "dangling_parent",
            Self::MultipleRoots => "multiple_roots",
            Self::NonMonotonicTimestamp => "non_monotonic_timestamp",
            Self::UnsignedIdentityMismatch => "unsigned_identity_mismatch",
            Self::VerificationDowngrade => "verification_downgrade",
        }
    }
}

impl fmt::Display for AnomalyKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A detected provenance issue and the commits it implicates.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Anomaly {
    pub kind: AnomalyKind,
    pub severity: Severity,
    pub commits: Vec<CommitId>,
    pub detail: String,
}

impl Anomaly {
    pub fn new(kind: AnomalyKind, commits: Vec<CommitId>, detail: impl Into<String>) -> Self {
        Self {
            kind,
            severity: kind.severity(),
            commits,
            detail: detail.into(),
        }
    }
}

// ── Repository identity ────────────────────────────────────────────

/// `owner/name` pair identifying a hosted repository.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct RepoId {
    pub owner: String,
    pub name: String,
}

impl RepoId {
    pub fn new(owner: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            owner: owner.into(),
            name: name.into(),
        }
    }

    /// Parse `owner/name`. Both halves must be non-empty and there must be
    /// exactly one separator.
    pub fn parse(name_with_owner: &str) -> Option<Self> {
        let (owner, name) = name_with_owner.split_once('/')?;
        let owner = owner.trim();
        let name = name.trim();
        if owner.is_empty() || name.is_empty() || name.contains('/') {
            return None;
        }
        Some(Self::new(owner, name))
    }
}

impl fmt::Display for RepoId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.owner, self.name)
    }
}

// ── Scoring ────────────────────────────────────────────────────────

/// Points deducted per anomaly, by severity, with optional per-kind overrides.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SeverityWeights {
    pub high: u32,
    pub medium: u32,
    pub low: u32,
    pub overrides: BTreeMap<AnomalyKind, u32>,
}

impl Default for SeverityWeights {
    fn default() -> Self {
        Self {
            high: 15,
            medium: 7,
            low: 2,
            overrides: BTreeMap::new(),
        }
    }
}

impl SeverityWeights {
    pub fn weight(&self, anomaly: &Anomaly) -> u32 {
        if let Some(w) = self.overrides.get(&anomaly.kind) {
            return *w;
        }
        match anomaly.severity {
            Severity::High => self.high,
            Severity::Medium => self.medium,
            Severity::Low => self.low,
        }
    }
}
