//! Mock ACME client for E2E tests
//!
//! Issues rcgen certificates into the same live/archive/renewal layout
//! certbot uses, so the lifecycle manager's file handling runs for real.

use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use dashmap::DashMap;
use parking_lot::Mutex;

use relaygate_core::collaborators::{
    AcmeClient, CertificatePaths, CollaboratorError, IssueRequest,
};

use crate::certificates::TestCertificates;

pub struct MockAcme {
    acme_dir: PathBuf,
    /// Issued certificates by domain
    issued: DashMap<String, TestCertificates>,
    /// Every issue request, in order
    requests: Mutex<Vec<IssueRequest>>,
    /// Whether to simulate a failed challenge
    fail_issue: AtomicBool,
    /// Report success without writing any files
    skip_material: AtomicBool,
}

impl MockAcme {
    pub fn new(acme_dir: impl Into<PathBuf>) -> Arc<Self> {
        Arc::new(Self {
            acme_dir: acme_dir.into(),
            issued: DashMap::new(),
            requests: Mutex::new(Vec::new()),
            fail_issue: AtomicBool::new(false),
            skip_material: AtomicBool::new(false),
        })
    }

    pub fn set_fail_issue(&self, fail: bool) {
        self.fail_issue.store(fail, Ordering::SeqCst);
    }

    pub fn set_skip_material(&self, skip: bool) {
        self.skip_material.store(skip, Ordering::SeqCst);
    }

    pub fn requests(&self) -> Vec<IssueRequest> {
        self.requests.lock().clone()
    }

    pub fn has_certificate(&self, domain: &str) -> bool {
        self.issued.contains_key(domain)
    }

    fn write_material(&self, domain: &str, certs: &TestCertificates) -> std::io::Result<()> {
        let paths = self.material(domain);
        std::fs::create_dir_all(&paths.live_dir)?;
        std::fs::create_dir_all(&paths.archive_dir)?;
        if let Some(parent) = paths.renewal_conf.parent() {
            std::fs::create_dir_all(parent)?;
        }

        std::fs::write(paths.archive_dir.join("fullchain1.pem"), certs.fullchain_pem())?;
        std::fs::write(paths.archive_dir.join("privkey1.pem"), &certs.key_pem)?;
        std::fs::write(&paths.cert, certs.fullchain_pem())?;
        std::fs::write(&paths.key, &certs.key_pem)?;
        std::fs::write(
            &paths.renewal_conf,
            format!("# renewal for {}\nauthenticator = standalone\n", domain),
        )?;
        Ok(())
    }
}

#[async_trait]
impl AcmeClient for MockAcme {
    async fn issue(&self, request: &IssueRequest) -> Result<(), CollaboratorError> {
        self.requests.lock().push(request.clone());
        if self.fail_issue.load(Ordering::SeqCst) {
            return Err(CollaboratorError::failed(
                "certbot",
                "Simulated challenge failure: connection refused",
            ));
        }

        let certs = TestCertificates::issue_for(&request.domain);
        if !self.skip_material.load(Ordering::SeqCst) {
            self.write_material(&request.domain, &certs)?;
        }
        self.issued.insert(request.domain.clone(), certs);
        tracing::debug!("MockAcme: issued certificate for {}", request.domain);
        Ok(())
    }

    async fn list_certificates(&self) -> Result<Vec<String>, CollaboratorError> {
        let mut names: Vec<String> = self.issued.iter().map(|e| e.key().clone()).collect();
        names.sort();
        Ok(names)
    }

    async fn delete(&self, domain: &str) -> Result<(), CollaboratorError> {
        if self.issued.remove(domain).is_none() {
            return Err(CollaboratorError::failed(
                "certbot",
                format!("No certificate found with name {}", domain),
            ));
        }
        tracing::debug!("MockAcme: deleted certificate for {}", domain);
        Ok(())
    }

    fn material(&self, domain: &str) -> CertificatePaths {
        CertificatePaths::for_domain(&self.acme_dir, domain)
    }

    fn renew_command(&self, domain: &str) -> String {
        format!("mock-renew {}", domain)
    }
}
