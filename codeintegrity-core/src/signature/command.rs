//! Verifiers that shell out to `gpg`, `gpgsm`, and `ssh-keygen`, reading their
//! results the way `git verify-commit` does.

use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::process::{Command, Output, Stdio};

use tracing::debug;

use super::{SignatureVerifier, VerifyOutcome};
use crate::config::VerificationSection;
use crate::types::{SignatureBlock, SignatureFormat};

/// OpenPGP or X.509 verification through a gpg-compatible program.
#[derive(Debug, Clone)]
pub struct GpgVerifier {
    program: String,
}

impl GpgVerifier {
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
        }
    }
}

impl SignatureVerifier for GpgVerifier {
    fn name(&self) -> &'static str {
        "gpg"
    }

    fn verify(&self, block: &SignatureBlock) -> VerifyOutcome {
        let output = with_signature_file(&block.armored, |sig_path| {
            run_with_stdin(
                Command::new(&self.program)
                    .arg("--status-fd=1")
                    .arg("--verify")
                    .arg(sig_path)
                    .arg("-"),
                &block.payload,
            )
        });
        match output {
            Ok(output) => parse_gpg_status(&String::from_utf8_lossy(&output.stdout)),
            Err(e) => {
                debug!(program = %self.program, error = %e, "gpg unavailable");
                VerifyOutcome::UnknownKey
            }
        }
    }
}

/// Interpret `[GNUPG:]` status lines. A bad signature wins over everything;
/// a good signature only counts when the key is known and neither expired
/// nor revoked.
pub fn parse_gpg_status(status: &str) -> VerifyOutcome {
    let mut good = false;
    let mut unknown = false;

    for line in status.lines() {
        let Some(rest) = line.strip_prefix("[GNUPG:] ") else {
            continue;
        };
        match rest.split_whitespace().next().unwrap_or_default() {
            "BADSIG" => return VerifyOutcome::BadSignature,
            "GOODSIG" | "VALIDSIG" => good = true,
            "ERRSIG" | "NO_PUBKEY" | "EXPKEYSIG" | "REVKEYSIG" | "EXPSIG" => unknown = true,
            _ => {}
        }
    }

    if good && !unknown {
        VerifyOutcome::Valid
    } else {
        VerifyOutcome::UnknownKey
    }
}

/// SSH signature verification against an `allowed_signers` file.
#[derive(Debug, Clone)]
pub struct SshVerifier {
    program: String,
    allowed_signers: Option<PathBuf>,
}

impl SshVerifier {
    pub fn new(program: impl Into<String>, allowed_signers: Option<PathBuf>) -> Self {
        Self {
            program: program.into(),
            allowed_signers,
        }
    }

    fn find_principal(&self, allowed: &Path, sig_path: &Path) -> io::Result<Option<String>> {
        let output = Command::new(&self.program)
            .args(["-Y", "find-principals", "-f"])
            .arg(allowed)
            .arg("-s")
            .arg(sig_path)
            .stdin(Stdio::null())
            .output()?;
        if !output.status.success() {
            return Ok(None);
        }
        Ok(String::from_utf8_lossy(&output.stdout)
            .lines()
            .map(str::trim)
            .find(|l| !l.is_empty())
            .map(str::to_string))
    }

    fn check(&self, block: &SignatureBlock, sig_path: &Path) -> io::Result<VerifyOutcome> {
        if let Some(allowed) = &self.allowed_signers {
            if let Some(principal) = self.find_principal(allowed, sig_path)? {
                let output = run_with_stdin(
                    Command::new(&self.program)
                        .args(["-Y", "verify", "-n", "git", "-f"])
                        .arg(allowed)
                        .arg("-I")
                        .arg(&principal)
                        .arg("-s")
                        .arg(sig_path),
                    &block.payload,
                )?;
                return Ok(if output.status.success() {
                    VerifyOutcome::Valid
                } else {
                    VerifyOutcome::BadSignature
                });
            }
        }

        // No known principal: still tell a broken signature from an
        // unattributable one.
        let output = run_with_stdin(
            Command::new(&self.program)
                .args(["-Y", "check-novalidate", "-n", "git", "-s"])
                .arg(sig_path),
            &block.payload,
        )?;
        Ok(if output.status.success() {
            VerifyOutcome::UnknownKey
        } else {
            VerifyOutcome::BadSignature
        })
    }
}

impl SignatureVerifier for SshVerifier {
    fn name(&self) -> &'static str {
        "ssh-keygen"
    }

    fn verify(&self, block: &SignatureBlock) -> VerifyOutcome {
        match with_signature_file(&block.armored, |sig_path| self.check(block, sig_path)) {
            Ok(outcome) => outcome,
            Err(e) => {
                debug!(program = %self.program, error = %e, "ssh-keygen unavailable");
                VerifyOutcome::UnknownKey
            }
        }
    }
}

/// Dispatches each signature to the verifier for its format.
#[derive(Debug, Clone)]
pub struct CommandVerifier {
    openpgp: GpgVerifier,
    x509: GpgVerifier,
    ssh: SshVerifier,
}

impl CommandVerifier {
    pub fn new(openpgp: GpgVerifier, x509: GpgVerifier, ssh: SshVerifier) -> Self {
        Self { openpgp, x509, ssh }
    }

    pub fn from_config(config: &VerificationSection) -> Self {
        Self::new(
            GpgVerifier::new(&config.gpg_program),
            GpgVerifier::new(&config.gpgsm_program),
            SshVerifier::new(&config.ssh_program, config.ssh_allowed_signers.clone()),
        )
    }
}

impl SignatureVerifier for CommandVerifier {
    fn name(&self) -> &'static str {
        "command"
    }

    fn verify(&self, block: &SignatureBlock) -> VerifyOutcome {
        match block.format {
            SignatureFormat::OpenPgp => self.openpgp.verify(block),
            SignatureFormat::X509 => self.x509.verify(block),
            SignatureFormat::Ssh => self.ssh.verify(block),
            SignatureFormat::Unknown => VerifyOutcome::UnknownKey,
        }
    }
}

fn with_signature_file<T>(
    armored: &str,
    f: impl FnOnce(&Path) -> io::Result<T>,
) -> io::Result<T> {
    let mut file = tempfile::Builder::new()
        .prefix("codeintegrity-sig-")
        .tempfile()?;
    file.write_all(armored.as_bytes())?;
    file.flush()?;
    f(file.path())
}

fn run_with_stdin(command: &mut Command, input: &[u8]) -> io::Result<Output> {
    let mut child = command
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .spawn()?;

    let stdin = child.stdin.take();
    std::thread::scope(|s| {
        s.spawn(move || {
            if let Some(mut stdin) = stdin {
                // The tool may exit before reading everything.
                let _ = stdin.write_all(input);
            }
        });
        child.wait_with_output()
    })
}
