//! Detached PKCS#7 signing of pass manifests.
//!
//! The device verifies `signature` against the raw bytes of `manifest.json`
//! using the chain embedded in the signature, so both the pass type
//! certificate and the WWDR intermediate are included. Output is DER.
//!
//! PKCS#7 signed attributes carry a signing time, so two signatures over the
//! same manifest differ byte-wise; only the manifest is reproducible.

use openssl::pkcs7::{Pkcs7, Pkcs7Flags};
use openssl::pkcs12::Pkcs12;
use openssl::pkey::{PKey, Private};
use openssl::stack::Stack;
use openssl::x509::X509;
use zeroize::Zeroizing;

use crate::error::CryptoError;

/// Parsed signing material, loaded once and reused for every build.
pub struct SigningIdentity {
    certificate: X509,
    key: PKey<Private>,
    intermediate: X509,
}

impl std::fmt::Debug for SigningIdentity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SigningIdentity")
            .field("subject", &self.subject())
            .finish_non_exhaustive()
    }
}

impl SigningIdentity {
    /// Load a pass type certificate, its PEM private key and the WWDR
    /// intermediate. Certificates may be PEM or DER.
    pub fn from_pem(
        certificate: &[u8],
        key: &[u8],
        intermediate: &[u8],
        key_password: Option<&str>,
    ) -> Result<Self, CryptoError> {
        let certificate = parse_certificate(certificate)?;
        let intermediate = parse_certificate(intermediate)?;
        let key = parse_key(key, key_password)?;
        Self::from_parts(certificate, key, intermediate)
    }

    /// Load a certificate and key from a PKCS#12 archive (`Certificates.p12`).
    pub fn from_pkcs12(
        archive: &[u8],
        password: &str,
        intermediate: &[u8],
    ) -> Result<Self, CryptoError> {
        let parsed = Pkcs12::from_der(archive)
            .map_err(|e| CryptoError::InvalidCertificate(e.to_string()))?
            .parse2(password)
            .map_err(|e| CryptoError::KeyDecryption(e.to_string()))?;
        let key = parsed
            .pkey
            .ok_or_else(|| CryptoError::InvalidKey("PKCS#12 archive has no private key".into()))?;
        let certificate = parsed.cert.ok_or_else(|| {
            CryptoError::InvalidCertificate("PKCS#12 archive has no certificate".into())
        })?;
        Self::from_parts(certificate, key, parse_certificate(intermediate)?)
    }

    fn from_parts(
        certificate: X509,
        key: PKey<Private>,
        intermediate: X509,
    ) -> Result<Self, CryptoError> {
        let public = certificate
            .public_key()
            .map_err(|e| CryptoError::InvalidCertificate(e.to_string()))?;
        if !public.public_eq(&key) {
            return Err(CryptoError::KeyMismatch);
        }
        Ok(Self {
            certificate,
            key,
            intermediate,
        })
    }

    /// Produce a detached DER signature over `manifest`.
    pub fn sign(&self, manifest: &[u8]) -> Result<Vec<u8>, CryptoError> {
        let mut chain = Stack::new().map_err(|e| CryptoError::Signing(e.to_string()))?;
        chain
            .push(self.intermediate.clone())
            .map_err(|e| CryptoError::Signing(e.to_string()))?;

        let pkcs7 = Pkcs7::sign(
            &self.certificate,
            &self.key,
            &chain,
            manifest,
            Pkcs7Flags::BINARY | Pkcs7Flags::DETACHED,
        )
        .map_err(|e| CryptoError::Signing(e.to_string()))?;

        pkcs7
            .to_der()
            .map_err(|e| CryptoError::Signing(e.to_string()))
    }

    /// One-line subject of the signing certificate, for logs.
    pub fn subject(&self) -> String {
        self.certificate
            .subject_name()
            .entries()
            .filter_map(|entry| entry.data().as_utf8().ok().map(|s| s.to_string()))
            .collect::<Vec<_>>()
            .join(", ")
    }
}

/// Sign `manifest` in one shot from raw certificate and key material.
pub fn sign(
    manifest: &[u8],
    signing_certificate: &[u8],
    signing_key: &[u8],
    intermediate_certificate: &[u8],
    key_password: Option<&str>,
) -> Result<Vec<u8>, CryptoError> {
    SigningIdentity::from_pem(
        signing_certificate,
        signing_key,
        intermediate_certificate,
        key_password,
    )?
    .sign(manifest)
}

fn is_pem(data: &[u8]) -> bool {
    data.windows(10).any(|w| w == b"-----BEGIN")
}

fn parse_certificate(data: &[u8]) -> Result<X509, CryptoError> {
    let parsed = if is_pem(data) {
        X509::from_pem(data)
    } else {
        X509::from_der(data)
    };
    parsed.map_err(|e| CryptoError::InvalidCertificate(e.to_string()))
}

fn parse_key(data: &[u8], password: Option<&str>) -> Result<PKey<Private>, CryptoError> {
    // Always pass a passphrase so OpenSSL never falls back to prompting on a tty.
    let passphrase = Zeroizing::new(password.unwrap_or_default().as_bytes().to_vec());
    PKey::private_key_from_pem_passphrase(data, &passphrase).map_err(|e| {
        let encrypted = data.windows(9).any(|w| w == b"ENCRYPTED");
        if encrypted {
            CryptoError::KeyDecryption(e.to_string())
        } else {
            CryptoError::InvalidKey(e.to_string())
        }
    })
}
