//! Signature classification.
//!
//! Every commit gets exactly one [`SignatureVerdict`]. Verification itself is
//! an injected capability ([`SignatureVerifier`]); the CLI uses
//! [`CommandVerifier`], which shells out to the same tools git does.

pub mod command;

use std::sync::Arc;
use std::time::Instant;

use rayon::prelude::*;
use tracing::{debug, info, warn};

use crate::config::{VerificationSection, VerifierBackend};
use crate::graph::CommitGraph;
use crate::types::{Commit, SignatureBlock, SignatureFormat, SignatureVerdict, VerdictCounts};

pub use command::{CommandVerifier, GpgVerifier, SshVerifier};

/// Result of checking one signature against the known keys.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VerifyOutcome {
    /// Signature matches the content and a known key.
    Valid,
    /// No key or identity is known for the signer.
    UnknownKey,
    /// Signature does not match the signed content.
    BadSignature,
}

/// Checks detached commit signatures. Implementations must be usable from
/// many threads at once.
pub trait SignatureVerifier: Send + Sync + std::fmt::Debug {
    /// Human-readable name for this verifier.
    fn name(&self) -> &'static str;

    /// Verify `block.armored` against `block.payload`.
    fn verify(&self, block: &SignatureBlock) -> VerifyOutcome;
}

/// Verifier for environments without a keyring: nothing can be verified.
#[derive(Debug, Default)]
pub struct NoopVerifier;

impl SignatureVerifier for NoopVerifier {
    fn name(&self) -> &'static str {
        "none"
    }

    fn verify(&self, _block: &SignatureBlock) -> VerifyOutcome {
        VerifyOutcome::UnknownKey
    }
}

/// Build the verifier selected by `[verification] backend`.
pub fn verifier_from_config(config: &VerificationSection) -> Arc<dyn SignatureVerifier> {
    match config.backend {
        VerifierBackend::Command => Arc::new(CommandVerifier::from_config(config)),
        VerifierBackend::None => Arc::new(NoopVerifier),
    }
}

// ── Verdicts ───────────────────────────────────────────────────────

/// One verdict per commit, indexed by graph position.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Verdicts {
    verdicts: Vec<SignatureVerdict>,
}

impl Verdicts {
    pub fn new(verdicts: Vec<SignatureVerdict>) -> Self {
        Self { verdicts }
    }

    pub fn get(&self, pos: usize) -> SignatureVerdict {
        self.verdicts[pos]
    }

    pub fn len(&self) -> usize {
        self.verdicts.len()
    }

    pub fn is_empty(&self) -> bool {
        self.verdicts.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = SignatureVerdict> + '_ {
        self.verdicts.iter().copied()
    }

    pub fn counts(&self) -> VerdictCounts {
        self.iter().collect()
    }
}

/// Map one commit to its verdict.
pub fn classify_commit(commit: &Commit, verifier: &dyn SignatureVerifier) -> SignatureVerdict {
    let Some(block) = &commit.signature else {
        return SignatureVerdict::Unsigned;
    };
    let verdict = match verifier.verify(block) {
        VerifyOutcome::Valid => SignatureVerdict::SignedVerified,
        VerifyOutcome::UnknownKey => SignatureVerdict::SignedUnverifiable,
        VerifyOutcome::BadSignature => SignatureVerdict::SignedInvalid,
    };
    debug!(commit = %commit.id.short(), verdict = verdict.as_str(), "Classified signature");
    verdict
}

/// Classify every commit of `graph`, checking signatures on at most
/// `concurrency` threads (0 = one per core).
pub fn classify(
    graph: &CommitGraph,
    verifier: &dyn SignatureVerifier,
    concurrency: usize,
) -> Verdicts {
    let start = Instant::now();
    let commits = graph.commits();

    let verdicts: Vec<SignatureVerdict> = match rayon::ThreadPoolBuilder::new()
        .num_threads(concurrency)
        .thread_name(|i| format!("verify-{i}"))
        .build()
    {
        Ok(pool) => pool.install(|| {
            commits
                .par_iter()
                .map(|c| classify_commit(c, verifier))
                .collect()
        }),
        Err(e) => {
            warn!(error = %e, "Cannot start verification pool, classifying serially");
            commits
                .iter()
                .map(|c| classify_commit(c, verifier))
                .collect()
        }
    };

    let verdicts = Verdicts::new(verdicts);
    let counts = verdicts.counts();
    info!(
        verifier = verifier.name(),
        verified = counts.signed_verified,
        unverifiable = counts.signed_unverifiable,
        invalid = counts.signed_invalid,
        unsigned = counts.unsigned,
        duration = ?start.elapsed(),
        "Signature classification complete"
    );
    verdicts
}

// ── Signature extraction ───────────────────────────────────────────

const SIGNATURE_HEADERS: [&[u8]; 2] = [b"gpgsig ", b"gpgsig-sha256 "];

/// Split a raw commit object into its detached signature and the bytes the
/// signature covers.
///
/// The signature lives in a `gpgsig` (or `gpgsig-sha256`) header whose
/// continuation lines start with a single space. The signed payload is the
/// object with every signature header removed. Returns `None` when the commit
/// carries no signature.
pub fn extract_signature(raw: &[u8]) -> Option<SignatureBlock> {
    let header_end = raw
        .windows(2)
        .position(|w| w == b"\n\n")
        .map_or(raw.len(), |i| i + 1);

    let mut payload = Vec::with_capacity(raw.len());
    let mut found: Vec<(usize, Vec<u8>)> = Vec::new();
    let mut in_signature = false;
    let mut pos = 0;

    while pos < header_end {
        let line_end = raw[pos..header_end]
            .iter()
            .position(|&b| b == b'\n')
            .map_or(header_end, |i| pos + i + 1);
        let line = &raw[pos..line_end];

        if in_signature && line.first() == Some(&b' ') {
            if let Some((_, text)) = found.last_mut() {
                text.extend_from_slice(&line[1..]);
            }
        } else if let Some((kind, name)) = SIGNATURE_HEADERS
            .iter()
            .enumerate()
            .find(|(_, name)| line.starts_with(name))
        {
            in_signature = true;
            found.push((kind, line[name.len()..].to_vec()));
        } else {
            in_signature = false;
            payload.extend_from_slice(line);
        }
        pos = line_end;
    }
    payload.extend_from_slice(&raw[header_end..]);

    // Prefer the SHA-1 signature when both are present.
    let (_, text) = found.into_iter().min_by_key(|(kind, _)| *kind)?;
    let armored = String::from_utf8_lossy(&text).into_owned();
    if armored.trim().is_empty() {
        return None;
    }

    Some(SignatureBlock {
        format: SignatureFormat::detect(&armored),
        armored,
        payload,
    })
}
