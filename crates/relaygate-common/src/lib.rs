mod error;
mod tls;

pub use error::RelayError;
pub use tls::{load_certs, load_private_key, verify_certificate_pair, CertificateSummary};
