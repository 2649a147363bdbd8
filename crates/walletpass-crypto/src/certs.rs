//! Development signing identities.
//!
//! Generates a self-signed stand-in for Apple's WWDR intermediate and a pass
//! type certificate signed by it. Devices will not accept passes signed this
//! way; it exists for local serving and tests.
//!
//! Requires the `certs` feature to be enabled.

use rcgen::{
    BasicConstraints, CertificateParams, DnType, IsCa, Issuer, KeyPair, KeyUsagePurpose,
};

use crate::error::CryptoError;
use crate::signing::SigningIdentity;

/// CA material used to sign pass type certificates.
pub struct Authority {
    /// CA certificate parameters (needed for signing).
    pub params: CertificateParams,
    /// CA key pair.
    pub key_pair: KeyPair,
    /// PEM-encoded CA certificate.
    pub cert_pem: String,
}

/// PEM-encoded pass type certificate bundle.
pub struct PassTypeCertificate {
    /// PEM-encoded pass type certificate.
    pub cert_pem: String,
    /// PEM-encoded private key (PKCS#8, unencrypted).
    pub key_pem: String,
    /// PEM-encoded authority certificate, used as the intermediate.
    pub authority_pem: String,
}

impl PassTypeCertificate {
    /// Parse this bundle into a [`SigningIdentity`].
    pub fn signing_identity(&self) -> Result<SigningIdentity, CryptoError> {
        SigningIdentity::from_pem(
            self.cert_pem.as_bytes(),
            self.key_pem.as_bytes(),
            self.authority_pem.as_bytes(),
            None,
        )
    }
}

/// Certificate generation errors.
#[derive(Debug, thiserror::Error)]
pub enum CertError {
    /// An error occurred during certificate generation or signing.
    #[error("Certificate generation error: {0}")]
    Generation(String),
}

/// Generate a self-signed authority playing the WWDR intermediate role.
pub fn generate_authority(org_name: &str) -> Result<Authority, CertError> {
    let mut params = CertificateParams::default();
    params.is_ca = IsCa::Ca(BasicConstraints::Unconstrained);
    params
        .distinguished_name
        .push(DnType::CommonName, format!("{org_name} CA"));
    params
        .distinguished_name
        .push(DnType::OrganizationName, org_name);
    params.key_usages.push(KeyUsagePurpose::KeyCertSign);
    params.key_usages.push(KeyUsagePurpose::CrlSign);

    let key_pair = KeyPair::generate().map_err(|e| CertError::Generation(e.to_string()))?;
    let cert = params
        .self_signed(&key_pair)
        .map_err(|e| CertError::Generation(e.to_string()))?;

    Ok(Authority {
        cert_pem: cert.pem(),
        params,
        key_pair,
    })
}

/// Generate a pass type certificate signed by `authority`.
///
/// Mirrors the subject layout of Apple-issued certificates: the pass type
/// identifier in the common name and the team identifier as the
/// organizational unit.
pub fn generate_pass_type_certificate(
    authority: &Authority,
    pass_type_identifier: &str,
    team_identifier: &str,
) -> Result<PassTypeCertificate, CertError> {
    let issuer = Issuer::from_params(&authority.params, &authority.key_pair);

    let mut params = CertificateParams::default();
    params.distinguished_name.push(
        DnType::CommonName,
        format!("Pass Type ID: {pass_type_identifier}"),
    );
    params
        .distinguished_name
        .push(DnType::OrganizationalUnitName, team_identifier);
    params.key_usages.push(KeyUsagePurpose::DigitalSignature);

    let key = KeyPair::generate().map_err(|e| CertError::Generation(e.to_string()))?;
    let cert = params
        .signed_by(&key, &issuer)
        .map_err(|e| CertError::Generation(e.to_string()))?;

    Ok(PassTypeCertificate {
        cert_pem: cert.pem(),
        key_pem: key.serialize_pem(),
        authority_pem: authority.cert_pem.clone(),
    })
}

/// Generate a throwaway identity for `pass_type_identifier` in one call.
pub fn generate_signing_identity(
    pass_type_identifier: &str,
    team_identifier: &str,
) -> Result<SigningIdentity, CertError> {
    let authority = generate_authority("WalletPass Development")?;
    let cert = generate_pass_type_certificate(&authority, pass_type_identifier, team_identifier)?;
    cert.signing_identity()
        .map_err(|e| CertError::Generation(e.to_string()))
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn authority_pem_is_a_certificate() {
        let authority = generate_authority("WalletPass Test").unwrap();
        assert!(authority.cert_pem.contains("BEGIN CERTIFICATE"));
        assert!(authority.cert_pem.contains("END CERTIFICATE"));
    }

    #[test]
    fn pass_type_certificate_has_key_and_chain() {
        let authority = generate_authority("WalletPass Test").unwrap();
        let cert =
            generate_pass_type_certificate(&authority, "pass.com.example", "TEAM123456").unwrap();

        assert!(cert.cert_pem.contains("BEGIN CERTIFICATE"));
        assert!(cert.key_pem.contains("BEGIN PRIVATE KEY"));
        assert_eq!(cert.authority_pem, authority.cert_pem);
        assert_ne!(cert.cert_pem, authority.cert_pem);
    }

    #[test]
    fn generated_identity_can_sign() {
        let identity = generate_signing_identity("pass.com.example", "TEAM123456").unwrap();
        let signature = identity.sign(b"{}").unwrap();
        assert!(!signature.is_empty());
        assert!(identity.subject().contains("pass.com.example"));
    }
}
