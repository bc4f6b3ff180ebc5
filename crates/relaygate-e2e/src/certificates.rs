//! Test certificate generation using rcgen
//!
//! Produces what an ACME client leaves on disk: a leaf certificate for the
//! requested domain, signed by a throwaway CA, with the chain in
//! `fullchain.pem` order (leaf first).

use rcgen::{
    BasicConstraints, CertificateParams, DistinguishedName, DnType, IsCa, Issuer, KeyPair,
};

/// Certificate material for one domain
#[derive(Clone)]
pub struct TestCertificates {
    /// Leaf certificate PEM
    pub cert_pem: String,
    /// Leaf private key PEM
    pub key_pem: String,
    /// Issuing CA certificate PEM
    pub ca_cert_pem: String,
}

impl TestCertificates {
    /// Issue a certificate for `domain` from a fresh test CA
    pub fn issue_for(domain: &str) -> Self {
        let ca_key = KeyPair::generate().expect("Failed to generate CA key");

        let mut ca_params = CertificateParams::default();
        ca_params.distinguished_name = {
            let mut dn = DistinguishedName::new();
            dn.push(DnType::CommonName, "relaygate Test CA");
            dn.push(DnType::OrganizationName, "relaygate E2E Tests");
            dn
        };
        ca_params.is_ca = IsCa::Ca(BasicConstraints::Unconstrained);
        ca_params.key_usages = vec![
            rcgen::KeyUsagePurpose::KeyCertSign,
            rcgen::KeyUsagePurpose::CrlSign,
        ];

        let ca_cert = ca_params
            .clone()
            .self_signed(&ca_key)
            .expect("Failed to create CA cert");

        let ca_issuer = Issuer::new(ca_params, ca_key);

        let leaf_key = KeyPair::generate().expect("Failed to generate leaf key");
        let mut leaf_params = CertificateParams::new(vec![domain.to_string()])
            .expect("Failed to build leaf params");
        leaf_params.distinguished_name = {
            let mut dn = DistinguishedName::new();
            dn.push(DnType::CommonName, domain);
            dn
        };
        leaf_params.key_usages = vec![
            rcgen::KeyUsagePurpose::DigitalSignature,
            rcgen::KeyUsagePurpose::KeyEncipherment,
        ];
        leaf_params.extended_key_usages = vec![rcgen::ExtendedKeyUsagePurpose::ServerAuth];

        let leaf_cert = leaf_params
            .signed_by(&leaf_key, &ca_issuer)
            .expect("Failed to create leaf cert");

        Self {
            cert_pem: leaf_cert.pem(),
            key_pem: leaf_key.serialize_pem(),
            ca_cert_pem: ca_cert.pem(),
        }
    }

    /// Leaf followed by the CA, as in `fullchain.pem`
    pub fn fullchain_pem(&self) -> String {
        format!("{}{}", self.cert_pem, self.ca_cert_pem)
    }
}
