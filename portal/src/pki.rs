//! Certificate issuance for cluster CAs and node identities.
//!
//! Callers treat the returned PEM pairs as opaque data; nothing outside this
//! module parses certificates.

use anyhow::{Context, Result};
use rcgen::{
    BasicConstraints, CertificateParams, DistinguishedName, DnType, ExtendedKeyUsagePurpose, IsCa,
    KeyPair, KeyUsagePurpose, SanType,
};
use std::net::IpAddr;
use time::{Duration, OffsetDateTime};

/// An issued (certificate, private key) PEM pair.
#[derive(Debug, Clone)]
pub struct CertPair {
    pub cert: String,
    pub key: String,
}

/// Generate a fresh self-signed CA for a cluster.
pub fn generate_ca(common_name: &str) -> Result<CertPair> {
    let key_pair = KeyPair::generate().context("Failed to generate CA key pair")?;

    let mut params = CertificateParams::default();
    let mut dn = DistinguishedName::new();
    dn.push(DnType::CommonName, common_name);
    dn.push(DnType::OrganizationName, "Bootforge");
    params.distinguished_name = dn;
    params.is_ca = IsCa::Ca(BasicConstraints::Unconstrained);
    params.key_usages = vec![KeyUsagePurpose::KeyCertSign, KeyUsagePurpose::CrlSign];
    params.not_before = OffsetDateTime::now_utc();
    params.not_after = OffsetDateTime::now_utc() + Duration::days(3650);

    let cert = params
        .self_signed(&key_pair)
        .context("Failed to self-sign CA certificate")?;

    Ok(CertPair {
        cert: cert.pem(),
        key: key_pair.serialize_pem(),
    })
}

/// Issue a certificate signed by an existing CA.
///
/// Used for node identities: server+client auth, SANs covering the node's
/// fqdn and address.
pub fn issue_certificate(
    common_name: &str,
    ca_cert_pem: &str,
    ca_key_pem: &str,
    organizations: &[&str],
    san_dns: &[String],
    san_ips: &[IpAddr],
    valid_days: i64,
) -> Result<CertPair> {
    let ca_key = KeyPair::from_pem(ca_key_pem).context("Failed to parse CA private key")?;
    // rcgen has no direct "load issuer" path; rebuild the issuer certificate
    // from its PEM parameters and key.
    let ca_cert = CertificateParams::from_ca_cert_pem(ca_cert_pem)
        .context("Failed to parse CA certificate")?
        .self_signed(&ca_key)
        .context("Failed to rebuild CA certificate")?;

    let key_pair = KeyPair::generate().context("Failed to generate key pair")?;

    let mut params = CertificateParams::default();
    let mut dn = DistinguishedName::new();
    dn.push(DnType::CommonName, common_name);
    for org in organizations {
        dn.push(DnType::OrganizationName, *org);
    }
    params.distinguished_name = dn;
    params.is_ca = IsCa::NoCa;
    params.key_usages = vec![
        KeyUsagePurpose::DigitalSignature,
        KeyUsagePurpose::KeyEncipherment,
    ];
    params.extended_key_usages = vec![
        ExtendedKeyUsagePurpose::ServerAuth,
        ExtendedKeyUsagePurpose::ClientAuth,
    ];
    params.not_before = OffsetDateTime::now_utc();
    params.not_after = OffsetDateTime::now_utc() + Duration::days(valid_days);

    let mut sans = Vec::new();
    for name in san_dns {
        sans.push(SanType::DnsName(
            name.clone().try_into().context("Invalid SAN DNS name")?,
        ));
    }
    for ip in san_ips {
        sans.push(SanType::IpAddress(*ip));
    }
    params.subject_alt_names = sans;

    let cert = params
        .signed_by(&key_pair, &ca_cert, &ca_key)
        .context("Failed to sign certificate")?;

    Ok(CertPair {
        cert: cert.pem(),
        key: key_pair.serialize_pem(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_issue_certificate_pem_shape() {
        let ca = generate_ca("test-ca").unwrap();
        let pair = issue_certificate(
            "system:node:node1.example.com",
            &ca.cert,
            &ca.key,
            &["system:nodes"],
            &["node1.example.com".to_string()],
            &["10.0.0.1".parse().unwrap()],
            10000,
        )
        .unwrap();

        assert!(pair.cert.starts_with("-----BEGIN CERTIFICATE-----"));
        assert!(pair.key.contains("PRIVATE KEY"));
    }

    #[test]
    fn test_reissue_produces_distinct_pair() {
        let ca = generate_ca("test-ca").unwrap();
        let issue = || {
            issue_certificate(
                "system:node:node1.example.com",
                &ca.cert,
                &ca.key,
                &["system:nodes"],
                &[],
                &[],
                10000,
            )
            .unwrap()
        };

        let first = issue();
        let second = issue();
        assert_ne!(first.cert, second.cert);
        assert_ne!(first.key, second.key);
    }
}
