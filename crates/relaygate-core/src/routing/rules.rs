//! Reverse proxy rule rendering
//!
//! Pure functions producing nginx server blocks. Nothing here touches the
//! filesystem; [`super::RoutingStore`] decides where the text goes.

use std::path::PathBuf;

use serde::{Deserialize, Serialize};

/// Stage a routing file represents
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RuleKind {
    /// Catch-all server that drops unknown hosts
    Fallback,
    /// Plain-port rule that only redirects to https
    Redirect,
    /// Redirect plus TLS termination and the control path proxy
    Final,
}

/// Everything the final rule for a domain needs
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EdgeSite {
    pub domain: String,
    pub cert: PathBuf,
    pub key: PathBuf,
    pub excluded_port: u16,
    pub control_path: String,
    pub control_port: u16,
}

/// Path prefix denied on the edge for the panel port
pub fn deny_prefix(excluded_port: u16) -> String {
    format!("/{}/", excluded_port)
}

/// Minimal default rule installed by a global reset
pub fn render_fallback() -> String {
    "\
server {
    listen 80 default_server;
    listen [::]:80 default_server;
    server_name _;
    return 444;
}
"
    .to_string()
}

/// Plain-port rule redirecting everything for `domain` to https
pub fn render_redirect(domain: &str) -> String {
    format!(
        "\
server {{
    listen 80;
    listen [::]:80;
    server_name {domain};
    return 301 https://$host$request_uri;
}}
",
        domain = domain
    )
}

/// Redirect + TLS server for an issued certificate
pub fn render_final(site: &EdgeSite) -> String {
    format!(
        "\
{redirect}
server {{
    listen 443 ssl;
    listen [::]:443 ssl;
    server_name {domain};

    ssl_certificate {cert};
    ssl_certificate_key {key};
    ssl_protocols TLSv1.2 TLSv1.3;
    ssl_prefer_server_ciphers off;
    ssl_session_cache shared:relaygate:10m;
    ssl_session_timeout 1d;

    location ^~ {deny} {{
        deny all;
        return 403;
    }}

    location {control_path} {{
        proxy_pass http://127.0.0.1:{control_port};
        proxy_http_version 1.1;
        proxy_set_header Upgrade $http_upgrade;
        proxy_set_header Connection \"upgrade\";
        proxy_set_header Host $host;
        proxy_set_header X-Real-IP $remote_addr;
        proxy_set_header X-Forwarded-For $proxy_add_x_forwarded_for;
        proxy_set_header X-Forwarded-Proto $scheme;
        proxy_read_timeout 86400s;
        proxy_send_timeout 86400s;
    }}
}}
",
        redirect = render_redirect(&site.domain),
        domain = site.domain,
        cert = site.cert.display(),
        key = site.key.display(),
        deny = deny_prefix(site.excluded_port),
        control_path = site.control_path,
        control_port = site.control_port,
    )
}

/// Whether `text` mentions `domain` as a whole name
///
/// `t.example.com` does not reference `example.com`: the match must not be
/// preceded or followed by a hostname character.
pub fn references_domain(text: &str, domain: &str) -> bool {
    if domain.is_empty() {
        return false;
    }
    let is_host_char = |c: char| c.is_ascii_alphanumeric() || c == '-' || c == '.';
    text.match_indices(domain).any(|(start, _)| {
        let before = text[..start].chars().next_back();
        let after = text[start + domain.len()..].chars().next();
        // A trailing dot ends a sentence or an FQDN; only reject it when a label follows
        let after_ok = match after {
            None => true,
            Some('.') => !text[start + domain.len() + 1..]
                .chars()
                .next()
                .is_some_and(|c| c.is_ascii_alphanumeric()),
            Some(c) => !is_host_char(c),
        };
        !before.is_some_and(is_host_char) && after_ok
    })
}
