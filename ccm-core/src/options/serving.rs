use super::{ApplyError, ApplyTo};
use crate::{
    config::{SecureServingInfo, ServingCert},
    validation::{Validate, ValidationError},
};
use std::{
    fs,
    net::{IpAddr, Ipv4Addr, SocketAddr, TcpListener},
    path::{Path, PathBuf},
    time::{SystemTime, UNIX_EPOCH},
};
use thiserror::Error;

/// Errors defaulting serving certificates
#[derive(Debug, Error)]
pub enum CertError {
    /// rcgen could not produce a key or certificate
    #[error("failed to generate self-signed certificate: {0}")]
    Generate(#[from] rcgen::Error),

    /// A generated pair could not be written into the certificate directory
    #[error("failed to write {path:?}: {source}")]
    Write {
        /// The file that was attempted
        path: PathBuf,
        /// The underlying io error
        #[source]
        source: std::io::Error,
    },

    /// A certificate directory was given without a pair name
    #[error("cert/key pair name is required when a certificate directory is set")]
    MissingPairName,
}

/// Paths to a PEM certificate and its key
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct CertKey {
    /// PEM certificate chain
    pub cert_file: String,
    /// PEM private key
    pub key_file: String,
}

impl CertKey {
    fn is_set(&self) -> bool {
        !self.cert_file.is_empty() && !self.key_file.is_empty()
    }
}

/// A serving certificate that is either given or generated on demand
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct GeneratableKeyCert {
    /// Explicit certificate files; take precedence over everything else
    pub cert_key: CertKey,
    /// Where to find or write `<pair_name>.crt` and `<pair_name>.key`
    ///
    /// Left empty, generated certificates are kept in memory only.
    pub cert_directory: String,
    /// File stem for the pair in `cert_directory`
    pub pair_name: String,
    /// A pair generated in memory
    pub generated: Option<ServingCert>,
}

impl GeneratableKeyCert {
    fn pair_paths(&self) -> (PathBuf, PathBuf) {
        let dir = Path::new(&self.cert_directory);
        (
            dir.join(format!("{}.crt", self.pair_name)),
            dir.join(format!("{}.key", self.pair_name)),
        )
    }
}

/// Secure serving endpoint settings
#[derive(Debug)]
pub struct SecureServingOptions {
    /// Address to listen on
    pub bind_address: IpAddr,
    /// Port to listen on; zero disables serving unless a listener is given
    pub bind_port: i32,
    /// A pre-bound listener, used instead of binding the address
    pub listener: Option<TcpListener>,
    /// The certificate served
    pub server_cert: GeneratableKeyCert,
}

impl Default for SecureServingOptions {
    fn default() -> Self {
        Self {
            bind_address: IpAddr::V4(Ipv4Addr::UNSPECIFIED),
            bind_port: 443,
            listener: None,
            server_cert: GeneratableKeyCert::default(),
        }
    }
}

impl SecureServingOptions {
    /// Whether anything will listen
    pub fn is_enabled(&self) -> bool {
        self.bind_port != 0 || self.listener.is_some()
    }

    /// Make sure a serving certificate exists when serving is enabled
    ///
    /// Explicit certificate files win. With a certificate directory an existing
    /// pair there is reused, or a new one generated and written. Otherwise a
    /// pair is generated in memory.
    pub fn maybe_default_with_self_signed_certs(
        &mut self,
        public_address: &str,
        alternate_dns: &[&str],
        alternate_ips: &[IpAddr],
    ) -> Result<(), CertError> {
        if !self.is_enabled() || self.server_cert.cert_key.is_set() {
            return Ok(());
        }

        let server_cert = &mut self.server_cert;
        if server_cert.cert_directory.is_empty() {
            let cert = generate_self_signed(public_address, alternate_dns, alternate_ips)?;
            tracing::info!(name = %cert.name, "generated self-signed cert in-memory");
            server_cert.generated = Some(cert);
            return Ok(());
        }

        if server_cert.pair_name.is_empty() {
            return Err(CertError::MissingPairName);
        }
        let (cert_path, key_path) = server_cert.pair_paths();
        if !(cert_path.is_file() && key_path.is_file()) {
            let cert = generate_self_signed(public_address, alternate_dns, alternate_ips)?;
            write_pem(&cert_path, &cert.cert_pem)?;
            write_pem(&key_path, &cert.key_pem)?;
            tracing::info!(cert = ?cert_path, key = ?key_path, "generated self-signed cert");
        }
        server_cert.cert_key = CertKey {
            cert_file: cert_path.to_string_lossy().into_owned(),
            key_file: key_path.to_string_lossy().into_owned(),
        };
        Ok(())
    }

    fn serving_cert(&self) -> Result<ServingCert, ApplyError> {
        let cert_key = &self.server_cert.cert_key;
        if cert_key.is_set() {
            return Ok(ServingCert {
                name: cert_key.cert_file.clone(),
                cert_pem: read_pem(&cert_key.cert_file)?,
                key_pem: read_pem(&cert_key.key_file)?,
            });
        }
        self.server_cert.generated.clone().ok_or(ApplyError::MissingServingCert)
    }
}

impl Validate for SecureServingOptions {
    fn validate(&self) -> Vec<ValidationError> {
        let mut errors = vec![];
        if !(0..=65535).contains(&self.bind_port) {
            errors.push(ValidationError::SecurePortOutOfRange(self.bind_port));
        }
        let cert_key = &self.server_cert.cert_key;
        if cert_key.cert_file.is_empty() != cert_key.key_file.is_empty() {
            errors.push(ValidationError::IncompleteCertKey);
        }
        errors
    }
}

impl ApplyTo<Option<SecureServingInfo>> for SecureServingOptions {
    fn apply_to(&self, target: &mut Option<SecureServingInfo>) -> Result<(), ApplyError> {
        if !self.is_enabled() {
            return Ok(());
        }
        let port = u16::try_from(self.bind_port).map_err(|_| ApplyError::InvalidPort(self.bind_port))?;
        let listener = self
            .listener
            .as_ref()
            .map(TcpListener::try_clone)
            .transpose()
            .map_err(ApplyError::Listener)?;
        let bind_address = match &listener {
            Some(listener) => listener.local_addr().map_err(ApplyError::Listener)?,
            None => SocketAddr::new(self.bind_address, port),
        };
        *target = Some(SecureServingInfo {
            bind_address,
            listener,
            cert: self.serving_cert()?,
            client_ca_file: None,
        });
        Ok(())
    }
}

/// Generate a self-signed certificate valid for `host` and the alternate names
///
/// The common name carries the generation time so regenerated certificates
/// can be told apart.
pub fn generate_self_signed(
    host: &str,
    alternate_dns: &[&str],
    alternate_ips: &[IpAddr],
) -> Result<ServingCert, CertError> {
    let mut subject_alt_names = vec![host.to_string()];
    subject_alt_names.extend(alternate_ips.iter().map(ToString::to_string));
    subject_alt_names.extend(alternate_dns.iter().map(ToString::to_string));
    subject_alt_names.dedup();

    let mut params = rcgen::CertificateParams::new(subject_alt_names)?;
    let issued = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or_default();
    let name = format!("{host}@{issued}");
    params.distinguished_name = rcgen::DistinguishedName::new();
    params
        .distinguished_name
        .push(rcgen::DnType::CommonName, rcgen::DnValue::Utf8String(name.clone()));

    let key_pair = rcgen::KeyPair::generate()?;
    let cert = params.self_signed(&key_pair)?;
    Ok(ServingCert {
        name,
        cert_pem: cert.pem(),
        key_pem: key_pair.serialize_pem(),
    })
}

fn read_pem(path: &str) -> Result<String, ApplyError> {
    fs::read_to_string(path).map_err(|source| ApplyError::ReadServingCert {
        path: path.into(),
        source,
    })
}

fn write_pem(path: &Path, pem: &str) -> Result<(), CertError> {
    let write = |path: &Path| {
        if let Some(dir) = path.parent() {
            fs::create_dir_all(dir)?;
        }
        fs::write(path, pem)
    };
    write(path).map_err(|source| CertError::Write {
        path: path.into(),
        source,
    })
}
