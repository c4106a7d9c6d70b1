//! Builds the rumqttc client and event loop, including the rustls transport.
//!
//! ```ignore
//! let (client, event_loop) = ClientBuilder::from_config(&config, Some("imu-gw/0001-IMU"))?
//!     .build()?;
//! ```

use std::{fs::File, io::BufReader, path::Path, sync::Arc, time::Duration};

use rumqttc::{AsyncClient, EventLoop, MqttOptions, TlsConfiguration, Transport};
use rustls::{
    client::danger::{HandshakeSignatureValid, ServerCertVerified, ServerCertVerifier},
    pki_types::{CertificateDer, PrivateKeyDer, ServerName, UnixTime},
    ClientConfig, DigitallySignedStruct, RootCertStore, SignatureScheme, SupportedProtocolVersion,
};
use tracing::{debug, warn};
use validator::Validate;

use crate::{
    config::{Config, TlsConfig, TlsVersion},
    error::TransferError,
};

/// Accumulates MQTT options and produces a client/event loop pair.
///
/// The `AsyncClient` is cheap to clone and can be shared; the `EventLoop`
/// must be driven by exactly one task.
pub struct ClientBuilder {
    opts: MqttOptions,

    /// Requests that can be queued before `try_publish` fails.
    cap: usize,

    tls: Option<TlsConfig>,
}

impl ClientBuilder {
    /// Plain TCP builder with rumqttc defaults.
    pub fn new(
        client_id: impl Into<String>,
        host: impl Into<String>,
        port: u16,
        cap: usize,
    ) -> Self {
        Self {
            opts: MqttOptions::new(client_id, host, port),
            cap,
            tls: None,
        }
    }

    /// Validates `config` and applies every option it carries.
    ///
    /// The client id is taken from `config.client_id`, then from
    /// `default_client_id`, and finally generated as a UUID.
    pub fn from_config(
        config: &Config,
        default_client_id: Option<&str>,
    ) -> Result<Self, TransferError> {
        config.validate()?;

        let client_id = config
            .client_id
            .clone()
            .or_else(|| default_client_id.map(str::to_string))
            .filter(|id| !id.trim().is_empty())
            .unwrap_or_else(|| uuid::Uuid::new_v4().to_string());

        debug!("Building MQTT client '{}' for {}:{}", client_id, config.host, config.port);

        let mut builder = Self::new(
            client_id,
            config.host.clone(),
            config.port,
            config.request_channel_capacity,
        )
        .keep_alive(config.keep_alive)
        .clean_session(config.clean_session)
        .max_inflight(config.max_inflight);

        if let Some((username, password)) = config.credentials() {
            builder = builder.credentials(username, password);
        }

        if config.tls.enabled {
            builder = builder.with_tls(config.tls.clone());
        }

        Ok(builder)
    }

    pub fn with_tls(mut self, tls: TlsConfig) -> Self {
        self.tls = Some(tls);
        self
    }

    pub fn keep_alive(mut self, secs: u64) -> Self {
        self.opts.set_keep_alive(Duration::from_secs(secs));
        self
    }

    pub fn clean_session(mut self, clean: bool) -> Self {
        self.opts.set_clean_session(clean);
        self
    }

    pub fn max_inflight(mut self, max: u16) -> Self {
        self.opts.set_inflight(max);
        self
    }

    /// Sent in the CONNECT packet; pair with TLS outside of a lab network.
    pub fn credentials(mut self, username: impl Into<String>, password: impl Into<String>) -> Self {
        self.opts.set_credentials(username, password);
        self
    }

    pub fn client_id(&self) -> String {
        self.opts.client_id()
    }

    /// Consumes the builder. TLS material is read here, so missing or
    /// malformed certificate files surface as errors from this call.
    pub fn build(self) -> Result<(AsyncClient, EventLoop), TransferError> {
        let mut opts = self.opts;

        if let Some(tls) = &self.tls {
            let tls_config = build_rustls_config(tls)?;
            opts.set_transport(Transport::Tls(TlsConfiguration::Rustls(Arc::new(tls_config))));
        }

        Ok(AsyncClient::new(opts, self.cap))
    }
}

static TLS12_ONLY: &[&SupportedProtocolVersion] = &[&rustls::version::TLS12];
static TLS13_ONLY: &[&SupportedProtocolVersion] = &[&rustls::version::TLS13];

fn protocol_versions(
    version: TlsVersion,
) -> Result<&'static [&'static SupportedProtocolVersion], TransferError> {
    match version {
        TlsVersion::Tlsv12 => Ok(TLS12_ONLY),
        TlsVersion::Tlsv13 => Ok(TLS13_ONLY),
        TlsVersion::Negotiate => Ok(rustls::DEFAULT_VERSIONS),
        TlsVersion::Tlsv1 | TlsVersion::Tlsv11 => Err(TransferError::ClientSetup(format!(
            "TLS version {version} is not supported"
        ))),
    }
}

fn build_rustls_config(tls: &TlsConfig) -> Result<ClientConfig, TransferError> {
    let builder = ClientConfig::builder_with_protocol_versions(protocol_versions(tls.version)?);

    if tls.insecure {
        warn!("TLS certificate and host name verification is disabled");
        return Ok(builder
            .dangerous()
            .with_custom_certificate_verifier(Arc::new(AcceptAnyServerCert))
            .with_no_client_auth());
    }

    let mut roots = RootCertStore::empty();
    let ca_path = tls.certs.ca_path();
    let ca_certs = load_certs(&ca_path)?;
    if ca_certs.is_empty() {
        return Err(TransferError::ClientSetup(format!(
            "no CA certificate found in {}",
            ca_path.display()
        )));
    }
    let (added, ignored) = roots.add_parsable_certificates(ca_certs);
    debug!("Loaded {} CA certificate(s), ignored {}", added, ignored);
    if added == 0 {
        return Err(TransferError::ClientSetup(format!(
            "no usable CA certificate in {}",
            ca_path.display()
        )));
    }

    let builder = builder.with_root_certificates(roots);

    if !tls.certs.has_client_auth() {
        return Ok(builder.with_no_client_auth());
    }

    let certs = load_certs(&tls.certs.cert_path())?;
    let key = load_key(&tls.certs.key_path())?;
    Ok(builder.with_client_auth_cert(certs, key)?)
}

fn load_certs(path: &Path) -> Result<Vec<CertificateDer<'static>>, TransferError> {
    let mut reader = BufReader::new(File::open(path)?);
    let certs = rustls_pemfile::certs(&mut reader).collect::<Result<Vec<_>, _>>()?;
    Ok(certs)
}

fn load_key(path: &Path) -> Result<PrivateKeyDer<'static>, TransferError> {
    let mut reader = BufReader::new(File::open(path)?);
    rustls_pemfile::private_key(&mut reader)?.ok_or_else(|| {
        TransferError::ClientSetup(format!("no private key found in {}", path.display()))
    })
}

/// Verifier used in insecure mode: accepts any certificate for any name.
#[derive(Debug)]
struct AcceptAnyServerCert;

impl ServerCertVerifier for AcceptAnyServerCert {
    fn verify_server_cert(
        &self,
        _end_entity: &CertificateDer<'_>,
        _intermediates: &[CertificateDer<'_>],
        _server_name: &ServerName<'_>,
        _ocsp_response: &[u8],
        _now: UnixTime,
    ) -> Result<ServerCertVerified, rustls::Error> {
        Ok(ServerCertVerified::assertion())
    }

    fn verify_tls12_signature(
        &self,
        _message: &[u8],
        _cert: &CertificateDer<'_>,
        _dss: &DigitallySignedStruct,
    ) -> Result<HandshakeSignatureValid, rustls::Error> {
        Ok(HandshakeSignatureValid::assertion())
    }

    fn verify_tls13_signature(
        &self,
        _message: &[u8],
        _cert: &CertificateDer<'_>,
        _dss: &DigitallySignedStruct,
    ) -> Result<HandshakeSignatureValid, rustls::Error> {
        Ok(HandshakeSignatureValid::assertion())
    }

    fn supported_verify_schemes(&self) -> Vec<SignatureScheme> {
        vec![
            SignatureScheme::RSA_PKCS1_SHA256,
            SignatureScheme::RSA_PKCS1_SHA384,
            SignatureScheme::RSA_PKCS1_SHA512,
            SignatureScheme::ECDSA_NISTP256_SHA256,
            SignatureScheme::ECDSA_NISTP384_SHA384,
            SignatureScheme::RSA_PSS_SHA256,
            SignatureScheme::RSA_PSS_SHA384,
            SignatureScheme::RSA_PSS_SHA512,
            SignatureScheme::ED25519,
        ]
    }
}
