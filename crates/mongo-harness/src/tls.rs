//! Client certificate provisioning for TLS-enabled topologies.
//!
//! When servers are started with a CA file, a throwaway client certificate
//! is generated and appended to a copy of that CA bundle so the servers
//! accept it. The client is then pointed at the generated certificate.

use std::path::{Path, PathBuf};

use rcgen::{
    BasicConstraints, CertificateParams, DnType, ExtendedKeyUsagePurpose, IsCa, KeyPair,
    KeyUsagePurpose, PKCS_RSA_SHA256,
};
use time::OffsetDateTime;
use tokio::fs;
use tracing::{debug, info};
use uuid::Uuid;

use crate::client::ClientTlsOptions;
use crate::{Error, Result};

/// Server flags naming a CA bundle.
const CA_FLAGS: [&str; 2] = ["--tlsCAFile", "--tlsClusterCAFile"];

/// Lifetime of a generated client certificate.
const CERT_VALIDITY: time::Duration = time::Duration::days(1);

/// Files written by [`provision_client_certificate`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProvisionedCredentials {
    /// Client certificate and private key.
    pub client_pem: PathBuf,
    /// Original CA bundle followed by the generated certificate.
    pub ca_pem: PathBuf,
}

/// Value of the first CA argument.
fn find_ca_arg(args: &[String]) -> Option<String> {
    args.iter().enumerate().find_map(|(i, arg)| {
        CA_FLAGS.iter().find_map(|flag| {
            if arg == flag {
                args.get(i + 1).cloned()
            } else {
                arg.strip_prefix(flag)
                    .and_then(|rest| rest.strip_prefix('='))
                    .map(str::to_string)
            }
        })
    })
}

/// Points every `--tlsCAFile`/`--tlsClusterCAFile` argument in `args` at
/// `ca_pem`. Returns whether any was rewritten.
pub fn rewrite_ca_args(args: &mut [String], ca_pem: &Path) -> bool {
    let value = ca_pem.display().to_string();
    let mut rewritten = false;
    let mut i = 0;
    while i < args.len() {
        if CA_FLAGS.contains(&args[i].as_str()) {
            if let Some(next) = args.get_mut(i + 1) {
                next.clone_from(&value);
                rewritten = true;
            }
            i += 2;
            continue;
        }
        let inline = CA_FLAGS.iter().find(|flag| {
            args[i]
                .strip_prefix(**flag)
                .is_some_and(|rest| rest.starts_with('='))
        });
        if let Some(flag) = inline {
            args[i] = format!("{flag}={value}");
            rewritten = true;
        }
        i += 1;
    }
    rewritten
}

/// Adds a generated client certificate to a TLS-enabled server setup.
///
/// `request` is `Some(false)` to opt out, `Some(true)` to force even when
/// the client already has a certificate, and `None` for the default
/// behaviour. Without a `--tlsCAFile`/`--tlsClusterCAFile` argument this is
/// a no-op. Returns the written files when it acted.
pub async fn provision_client_certificate(
    request: Option<bool>,
    args: &mut [String],
    client_tls: &mut ClientTlsOptions,
    tmp_dir: &Path,
) -> Result<Option<ProvisionedCredentials>> {
    if request == Some(false) {
        return Ok(None);
    }
    if client_tls.certificate_key_file.is_some() && request != Some(true) {
        debug!("client certificate already configured, not generating one");
        return Ok(None);
    }
    let Some(ca_path) = find_ca_arg(args) else {
        debug!("no CA file configured, not generating a client certificate");
        return Ok(None);
    };

    let original_ca = fs::read(&ca_path).await?;
    let (cert_pem, key_pem) = generate_client_certificate()?;

    let dir = tmp_dir.join(format!("mongo-harness-tls-{}", Uuid::new_v4().simple()));
    fs::create_dir_all(&dir).await?;

    let client_pem = dir.join("client.pem");
    fs::write(&client_pem, format!("{cert_pem}{key_pem}")).await?;

    let mut bundle = original_ca;
    if !bundle.ends_with(b"\n") {
        bundle.push(b'\n');
    }
    bundle.extend_from_slice(cert_pem.as_bytes());
    let ca_pem = dir.join("ca.pem");
    fs::write(&ca_pem, bundle).await?;

    rewrite_ca_args(args, &ca_pem);

    client_tls.certificate_key_file = Some(client_pem.clone());
    client_tls.allow_invalid_certificates = true;
    if client_tls.ca_file.is_none() {
        client_tls.ca_file = Some(ca_pem.clone());
    }

    info!(dir = %dir.display(), "generated client certificate");

    Ok(Some(ProvisionedCredentials { client_pem, ca_pem }))
}

/// Returns `(certificate PEM, private key PEM)` for a short-lived
/// self-signed certificate usable both as CA and as client certificate.
fn generate_client_certificate() -> Result<(String, String)> {
    let key_pair = KeyPair::generate_for(&PKCS_RSA_SHA256)
        .map_err(|e| Error::Certificate(format!("failed to generate key pair: {e}")))?;

    let mut params = CertificateParams::default();
    params
        .distinguished_name
        .push(DnType::CommonName, "mongo-harness client");
    params
        .distinguished_name
        .push(DnType::OrganizationName, "mongo-harness");
    params.is_ca = IsCa::Ca(BasicConstraints::Unconstrained);
    params.key_usages = vec![
        KeyUsagePurpose::KeyCertSign,
        KeyUsagePurpose::DigitalSignature,
        KeyUsagePurpose::KeyEncipherment,
    ];
    params.extended_key_usages = vec![ExtendedKeyUsagePurpose::ClientAuth];

    let now = OffsetDateTime::now_utc();
    params.not_before = now - time::Duration::hours(1);
    params.not_after = now + CERT_VALIDITY;

    let cert = params
        .self_signed(&key_pair)
        .map_err(|e| Error::Certificate(format!("failed to self-sign certificate: {e}")))?;

    Ok((cert.pem(), key_pair.serialize_pem()))
}
