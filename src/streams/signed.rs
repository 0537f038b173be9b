// src/streams/signed.rs

//! OpenPGP verification of signed catalog documents
//!
//! Signed simplestreams documents (`*.sjson`) are cleartext-signed messages.
//! The signature must be made by a key from the configured keyring before the
//! embedded JSON is handed to the parser.

use crate::error::{Error, Result};
use sequoia_openpgp as openpgp;
use openpgp::cert::CertParser;
use openpgp::parse::stream::{
    MessageLayer, MessageStructure, VerificationHelper, VerifierBuilder,
};
use openpgp::parse::Parse;
use openpgp::policy::StandardPolicy;
use openpgp::{Cert, KeyHandle};
use std::io::Read;
use std::path::Path;
use tracing::{debug, info};

const CLEARTEXT_HEADER: &str = "-----BEGIN PGP SIGNED MESSAGE-----";

/// Whether a catalog path names a signed document
pub fn is_signed_path(path: &str) -> bool {
    path.ends_with(".sjson")
}

/// Set of certificates trusted to sign catalogs
pub struct Keyring {
    certs: Vec<Cert>,
    policy: StandardPolicy<'static>,
}

impl Keyring {
    /// Load every certificate from a keyring file (binary or armored)
    pub fn load(path: &Path) -> Result<Self> {
        let data = std::fs::read(path).map_err(|e| {
            Error::VerificationError(format!("Failed to read keyring {}: {e}", path.display()))
        })?;
        let keyring = Self::from_bytes(&data)?;
        info!(
            "Loaded {} certificate(s) from keyring {}",
            keyring.certs.len(),
            path.display()
        );
        Ok(keyring)
    }

    pub fn from_bytes(data: &[u8]) -> Result<Self> {
        let parser = CertParser::from_bytes(data)
            .map_err(|e| Error::VerificationError(format!("Failed to parse keyring: {e}")))?;
        let certs = parser
            .collect::<openpgp::Result<Vec<Cert>>>()
            .map_err(|e| Error::VerificationError(format!("Failed to parse keyring: {e}")))?;
        Ok(Self::from_certs(certs))
    }

    pub fn from_certs(certs: Vec<Cert>) -> Self {
        Self {
            certs,
            policy: StandardPolicy::new(),
        }
    }

    /// Fingerprints of the loaded certificates
    pub fn fingerprints(&self) -> Vec<String> {
        self.certs.iter().map(|c| c.fingerprint().to_string()).collect()
    }

    /// Verify a cleartext-signed document and return the signed content
    pub fn verify_cleartext(&self, content: &[u8]) -> Result<Vec<u8>> {
        let text = String::from_utf8_lossy(content);
        if !text.trim_start().starts_with(CLEARTEXT_HEADER) {
            return Err(Error::VerificationError(
                "document carries no cleartext signature".to_string(),
            ));
        }
        if self.certs.is_empty() {
            return Err(Error::VerificationError("keyring is empty".to_string()));
        }

        let helper = KeyringHelper { certs: &self.certs };
        let mut verifier = VerifierBuilder::from_bytes(content)
            .and_then(|b| b.with_policy(&self.policy, None, helper))
            .map_err(|e| Error::VerificationError(e.to_string()))?;

        let mut signed = Vec::new();
        verifier
            .read_to_end(&mut signed)
            .map_err(|e| Error::VerificationError(e.to_string()))?;

        if !verifier.message_processed() {
            return Err(Error::VerificationError(
                "signed message was truncated".to_string(),
            ));
        }

        debug!("Verified signed document ({} bytes)", signed.len());
        Ok(signed)
    }
}

struct KeyringHelper<'a> {
    certs: &'a [Cert],
}

impl VerificationHelper for KeyringHelper<'_> {
    fn get_certs(&mut self, _ids: &[KeyHandle]) -> openpgp::Result<Vec<Cert>> {
        Ok(self.certs.to_vec())
    }

    fn check(&mut self, structure: MessageStructure) -> openpgp::Result<()> {
        for layer in structure.into_iter() {
            if let MessageLayer::SignatureGroup { results } = layer {
                if results.iter().any(|r| r.is_ok()) {
                    return Ok(());
                }
                return Err(anyhow::anyhow!("no valid signature from a keyring key"));
            }
        }
        Err(anyhow::anyhow!("message is not signed"))
    }
}
