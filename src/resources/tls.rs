//! TLS credentials and sessions.
//!
//! Secure sessions using rustls (pure Rust, no OpenSSL), layered over a
//! connected socket resource.
//!
//! # Session lifecycle
//!
//! ```text
//! initialize_client / initialize_server
//!   -> set_hostname, set_credentials, set_require_client_auth
//!   -> start_socket_transport(socket handle)
//!   -> do_handshake            (false + last_error on failure)
//!   -> send_record / receive_record ...
//!   -> bye
//! ```
//!
//! The session lock is held for the whole of a handshake or record exchange.
//! Releasing a session first shuts down a duplicate of its transport, which
//! fails any I/O blocked under that lock, and only then takes the lock. The
//! interrupted call reports the session as released. Release does not send
//! close_notify; call `bye` first for an orderly close.

use std::fs::File;
use std::io::{self, BufReader, ErrorKind, Read, Write};
use std::net::{Shutdown, TcpStream};
use std::path::Path;
use std::sync::Arc;

use parking_lot::Mutex;
use rustls::client::WebPkiServerVerifier;
use rustls::crypto::CryptoProvider;
use rustls::pki_types::{
    CertificateDer, CertificateRevocationListDer, PrivateKeyDer, PrivatePkcs8KeyDer, ServerName,
};
use rustls::server::WebPkiClientVerifier;
use rustls::{ClientConfig, ClientConnection, Connection, RootCertStore, ServerConfig, ServerConnection};

use super::socket::BerkeleySocket;
use super::{read_buffer, Slot};
use crate::config;
use crate::error::{BridgeError, BridgeResult};
use crate::registry::{self, Handle, NativeObject, Resource, ResourceKind};

// =============================================================================
// Credentials
// =============================================================================

/// Encoding of certificate, key and CRL files.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CertFormat {
    Der = 0,
    Pem = 1,
}

impl CertFormat {
    pub fn from_code(code: i32) -> BridgeResult<Self> {
        match code {
            0 => Ok(CertFormat::Der),
            1 => Ok(CertFormat::Pem),
            other => Err(BridgeError::bad_parameter(format!(
                "unknown certificate format {}",
                other
            ))),
        }
    }
}

/// Requested Diffie-Hellman strength. rustls negotiates its own groups, so
/// the level is only recorded.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum DhSecurity {
    Low = 1,
    #[default]
    Medium = 3,
    High = 4,
    Ultra = 5,
}

impl DhSecurity {
    pub fn from_code(code: i32) -> BridgeResult<Self> {
        match code {
            1 => Ok(DhSecurity::Low),
            3 => Ok(DhSecurity::Medium),
            4 => Ok(DhSecurity::High),
            5 => Ok(DhSecurity::Ultra),
            other => Err(BridgeError::bad_parameter(format!(
                "unknown DH security level {}",
                other
            ))),
        }
    }
}

#[derive(Default)]
struct CredentialState {
    chain: Vec<CertificateDer<'static>>,
    key: Option<PrivateKeyDer<'static>>,
    trust: Vec<CertificateDer<'static>>,
    crls: Vec<CertificateRevocationListDer<'static>>,
    dh_security: DhSecurity,
}

/// Owned copy of credential material, taken at handshake time.
struct CredentialSnapshot {
    chain: Vec<CertificateDer<'static>>,
    key: Option<PrivateKeyDer<'static>>,
    trust: Vec<CertificateDer<'static>>,
    crls: Vec<CertificateRevocationListDer<'static>>,
}

/// Certificate chain, private key, trust anchors and revocation lists.
pub struct TlsCredentials {
    state: Slot<CredentialState>,
}

impl TlsCredentials {
    pub fn new() -> Self {
        Self {
            state: Slot::new(ResourceKind::TlsCredentials, CredentialState::default()),
        }
    }

    /// Load the local certificate chain and its private key.
    pub fn set_key_file(
        &self,
        cert_path: &Path,
        key_path: &Path,
        format: CertFormat,
    ) -> BridgeResult<()> {
        let chain = read_certs(cert_path, format)?;
        if chain.is_empty() {
            return Err(BridgeError::bad_parameter(format!(
                "no certificates in {}",
                cert_path.display()
            )));
        }
        let key = read_key(key_path, format)?;
        self.state.with(|s| {
            s.chain = chain;
            s.key = Some(key);
            Ok(())
        })
    }

    /// Load the certificates used to verify the peer.
    pub fn set_trust_file(&self, path: &Path, format: CertFormat) -> BridgeResult<()> {
        let trust = read_certs(path, format)?;
        self.state.with(|s| {
            s.trust.extend(trust);
            Ok(())
        })
    }

    /// Load revocation lists applied during peer verification.
    pub fn set_crl_file(&self, path: &Path, format: CertFormat) -> BridgeResult<()> {
        let crls = read_crls(path, format)?;
        self.state.with(|s| {
            s.crls.extend(crls);
            Ok(())
        })
    }

    pub fn set_dh_security(&self, level: DhSecurity) -> BridgeResult<()> {
        self.state.with(|s| {
            s.dh_security = level;
            Ok(())
        })
    }

    pub fn dh_security(&self) -> BridgeResult<DhSecurity> {
        self.state.with(|s| Ok(s.dh_security))
    }

    fn snapshot(&self) -> BridgeResult<CredentialSnapshot> {
        self.state.with(|s| {
            Ok(CredentialSnapshot {
                chain: s.chain.clone(),
                key: s.key.as_ref().map(|k| k.clone_key()),
                trust: s.trust.clone(),
                crls: s.crls.clone(),
            })
        })
    }
}

impl Default for TlsCredentials {
    fn default() -> Self {
        Self::new()
    }
}

impl NativeObject for TlsCredentials {
    fn kind(&self) -> ResourceKind {
        ResourceKind::TlsCredentials
    }

    fn destroy(&self) {
        self.state.clear();
    }
}

impl Resource for TlsCredentials {
    const KIND: ResourceKind = ResourceKind::TlsCredentials;
}

fn open(path: &Path) -> BridgeResult<BufReader<File>> {
    let file = File::open(path)
        .map_err(|e| BridgeError::bad_parameter(format!("{}: {}", path.display(), e)))?;
    Ok(BufReader::new(file))
}

fn read_all(path: &Path) -> BridgeResult<Vec<u8>> {
    let mut buf = Vec::new();
    open(path)?.read_to_end(&mut buf)?;
    Ok(buf)
}

fn read_certs(path: &Path, format: CertFormat) -> BridgeResult<Vec<CertificateDer<'static>>> {
    match format {
        CertFormat::Der => Ok(vec![CertificateDer::from(read_all(path)?)]),
        CertFormat::Pem => rustls_pemfile::certs(&mut open(path)?)
            .collect::<Result<Vec<_>, _>>()
            .map_err(|e| BridgeError::bad_parameter(format!("{}: {}", path.display(), e))),
    }
}

fn read_key(path: &Path, format: CertFormat) -> BridgeResult<PrivateKeyDer<'static>> {
    match format {
        CertFormat::Der => Ok(PrivateKeyDer::Pkcs8(PrivatePkcs8KeyDer::from(read_all(path)?))),
        CertFormat::Pem => rustls_pemfile::private_key(&mut open(path)?)
            .map_err(|e| BridgeError::bad_parameter(format!("{}: {}", path.display(), e)))?
            .ok_or_else(|| {
                BridgeError::bad_parameter(format!("no private key in {}", path.display()))
            }),
    }
}

fn read_crls(
    path: &Path,
    format: CertFormat,
) -> BridgeResult<Vec<CertificateRevocationListDer<'static>>> {
    match format {
        CertFormat::Der => Ok(vec![CertificateRevocationListDer::from(read_all(path)?)]),
        CertFormat::Pem => rustls_pemfile::crls(&mut open(path)?)
            .collect::<Result<Vec<_>, _>>()
            .map_err(|e| BridgeError::bad_parameter(format!("{}: {}", path.display(), e))),
    }
}

// =============================================================================
// Sessions
// =============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Role {
    Client,
    Server,
}

struct SessionState {
    role: Role,
    hostname: Option<String>,
    credentials: Option<Arc<TlsCredentials>>,
    require_client_auth: bool,
    transport: Option<TcpStream>,
    conn: Option<Connection>,
    last_error: Option<String>,
    certificate_error: Option<String>,
}

impl SessionState {
    fn new(role: Role) -> Self {
        Self {
            role,
            hostname: None,
            credentials: None,
            require_client_auth: config::current().tls.require_client_auth,
            transport: None,
            conn: None,
            last_error: None,
            certificate_error: None,
        }
    }

    fn snapshot(&self) -> BridgeResult<CredentialSnapshot> {
        match &self.credentials {
            Some(creds) => creds.snapshot(),
            None => Ok(CredentialSnapshot {
                chain: Vec::new(),
                key: None,
                trust: Vec::new(),
                crls: Vec::new(),
            }),
        }
    }

    fn client_connection(&self) -> BridgeResult<Connection> {
        let hostname = self
            .hostname
            .clone()
            .ok_or_else(|| BridgeError::NotInitialized("TLS hostname has not been set".into()))?;
        let name = ServerName::try_from(hostname)
            .map_err(|e| BridgeError::bad_parameter(format!("invalid server name: {}", e)))?;

        let creds = self.snapshot()?;
        let provider = provider();
        let roots = Arc::new(root_store(&creds.trust)?);
        let verifier = WebPkiServerVerifier::builder_with_provider(roots, provider.clone())
            .with_crls(creds.crls)
            .build()
            .map_err(BridgeError::tls)?;

        let builder = ClientConfig::builder_with_provider(provider)
            .with_safe_default_protocol_versions()
            .map_err(|e| BridgeError::Tls(format!("Protocol version error: {}", e)))?
            .with_webpki_verifier(verifier);
        let config = match (creds.chain.is_empty(), creds.key) {
            (false, Some(key)) => builder
                .with_client_auth_cert(creds.chain, key)
                .map_err(BridgeError::tls)?,
            _ => builder.with_no_client_auth(),
        };

        let conn = ClientConnection::new(Arc::new(config), name).map_err(BridgeError::tls)?;
        Ok(Connection::Client(conn))
    }

    fn server_connection(&self) -> BridgeResult<Connection> {
        let creds = self.snapshot()?;
        let key = match (creds.chain.is_empty(), creds.key) {
            (false, Some(key)) => key,
            _ => {
                return Err(BridgeError::NotInitialized(
                    "server credentials need a certificate and key".into(),
                ))
            }
        };

        let provider = provider();
        let builder = ServerConfig::builder_with_provider(provider.clone())
            .with_safe_default_protocol_versions()
            .map_err(|e| BridgeError::Tls(format!("Protocol version error: {}", e)))?;
        let builder = if self.require_client_auth {
            let roots = Arc::new(root_store(&creds.trust)?);
            let verifier = WebPkiClientVerifier::builder_with_provider(roots, provider)
                .with_crls(creds.crls)
                .build()
                .map_err(BridgeError::tls)?;
            builder.with_client_cert_verifier(verifier)
        } else {
            builder.with_no_client_auth()
        };
        let config = builder
            .with_single_cert(creds.chain, key)
            .map_err(BridgeError::tls)?;

        let conn = ServerConnection::new(Arc::new(config)).map_err(BridgeError::tls)?;
        Ok(Connection::Server(conn))
    }

    fn record_failure(&mut self, err: &io::Error) {
        let tls_err = err
            .get_ref()
            .and_then(|inner| inner.downcast_ref::<rustls::Error>());
        self.certificate_error = match tls_err {
            Some(rustls::Error::InvalidCertificate(cert)) => Some(format!("{:?}", cert)),
            Some(rustls::Error::NoCertificatesPresented) => {
                Some("no certificates presented".to_string())
            }
            _ => None,
        };
        self.last_error = Some(err.to_string());
        log::debug!("TLS failure: {}", err);
    }
}

fn provider() -> Arc<CryptoProvider> {
    Arc::new(rustls::crypto::ring::default_provider())
}

fn root_store(trust: &[CertificateDer<'static>]) -> BridgeResult<RootCertStore> {
    let mut roots = RootCertStore::empty();
    for cert in trust {
        roots.add(cert.clone()).map_err(BridgeError::tls)?;
    }
    if trust.is_empty() && config::current().tls.use_webpki_roots {
        roots.extend(webpki_roots::TLS_SERVER_ROOTS.iter().cloned());
    }
    Ok(roots)
}

fn flush(conn: &mut Connection, transport: &mut TcpStream) -> io::Result<()> {
    while conn.wants_write() {
        conn.write_tls(transport)?;
    }
    transport.flush()
}

/// Duplicate of the session transport, kept outside the session lock.
#[derive(Default)]
struct Interrupt {
    stream: Option<TcpStream>,
    closed: bool,
}

/// Client or server TLS session over a socket resource.
pub struct TlsSession {
    state: Slot<SessionState>,
    interrupt: Mutex<Interrupt>,
}

impl TlsSession {
    pub fn client() -> Self {
        Self::with_role(Role::Client)
    }

    pub fn server() -> Self {
        Self::with_role(Role::Server)
    }

    fn with_role(role: Role) -> Self {
        Self {
            state: Slot::new(ResourceKind::TlsSession, SessionState::new(role)),
            interrupt: Mutex::new(Interrupt::default()),
        }
    }

    /// Shut the transport down so blocked I/O returns. Later transports are
    /// refused.
    fn interrupt(&self) {
        let mut interrupt = self.interrupt.lock();
        interrupt.closed = true;
        if let Some(stream) = interrupt.stream.take() {
            let _ = stream.shutdown(Shutdown::Both);
        }
    }

    fn interrupted(&self) -> bool {
        self.interrupt.lock().closed
    }

    /// Name used for SNI and certificate verification.
    pub fn set_hostname(&self, hostname: &str) -> BridgeResult<()> {
        self.state.with(|s| {
            s.hostname = Some(hostname.to_string());
            Ok(())
        })
    }

    pub fn set_credentials(&self, credentials: Arc<TlsCredentials>) -> BridgeResult<()> {
        self.state.with(|s| {
            s.credentials = Some(credentials);
            Ok(())
        })
    }

    pub fn set_require_client_auth(&self, require: bool) -> BridgeResult<()> {
        self.state.with(|s| {
            s.require_client_auth = require;
            Ok(())
        })
    }

    /// Take a stream over the socket; false (with the reason recorded) if the
    /// socket is not a connected stream.
    pub fn start_socket_transport(&self, socket: &BerkeleySocket) -> BridgeResult<bool> {
        let stream = socket.tcp_stream();
        self.state.with(|s| match stream {
            Ok(stream) => {
                let wake = stream.try_clone().map_err(BridgeError::socket)?;
                let mut interrupt = self.interrupt.lock();
                if interrupt.closed {
                    return Err(BridgeError::Released(ResourceKind::TlsSession));
                }
                interrupt.stream = Some(wake);
                s.transport = Some(stream);
                Ok(true)
            }
            Err(BridgeError::Socket(msg)) => {
                s.last_error = Some(msg);
                Ok(false)
            }
            Err(other) => Err(other),
        })
    }

    /// Run the handshake to completion; false with the reason recorded on
    /// failure.
    pub fn do_handshake(&self) -> BridgeResult<bool> {
        self.state.with(|s| {
            if s.transport.is_none() {
                return Err(BridgeError::NotInitialized(
                    "TLS transport has not been started".into(),
                ));
            }
            let built = match s.role {
                Role::Client => s.client_connection(),
                Role::Server => s.server_connection(),
            };
            let mut conn = match built {
                Ok(conn) => conn,
                Err(BridgeError::Tls(msg)) => {
                    s.last_error = Some(msg);
                    return Ok(false);
                }
                Err(other) => return Err(other),
            };

            let transport = s
                .transport
                .as_mut()
                .ok_or_else(|| BridgeError::NotInitialized("TLS transport is gone".into()))?;
            let mut outcome = Ok(());
            while conn.is_handshaking() {
                if let Err(e) = conn.complete_io(transport) {
                    outcome = Err(e);
                    break;
                }
            }
            let outcome = outcome.and_then(|_| flush(&mut conn, transport));

            match outcome {
                Ok(()) => {
                    log::debug!("TLS handshake complete ({:?})", s.role);
                    s.conn = Some(conn);
                    s.last_error = None;
                    s.certificate_error = None;
                    Ok(true)
                }
                Err(_) if self.interrupted() => {
                    s.conn = None;
                    Err(BridgeError::Released(ResourceKind::TlsSession))
                }
                Err(e) => {
                    // Let the peer know why, if we can.
                    let _ = flush(&mut conn, transport);
                    s.record_failure(&e);
                    s.conn = None;
                    Ok(false)
                }
            }
        })
    }

    /// Encrypt and send `data`.
    pub fn send_record(&self, data: &[u8]) -> BridgeResult<usize> {
        self.state.with(|s| {
            let (conn, transport) = established(s)?;
            conn.writer().write_all(data)?;
            flush(conn, transport).map_err(BridgeError::tls)?;
            Ok(data.len())
        })
    }

    /// Receive up to `max` bytes of application data; empty at end of stream.
    pub fn receive_record(&self, max: usize) -> BridgeResult<Vec<u8>> {
        self.state.with(|s| {
            let (conn, transport) = established(s)?;
            let mut buf = read_buffer(max)?;
            loop {
                match conn.reader().read(&mut buf) {
                    Ok(n) => {
                        buf.truncate(n);
                        return Ok(buf);
                    }
                    Err(e) if e.kind() == ErrorKind::WouldBlock => {
                        let read = conn.read_tls(transport);
                        if self.interrupted() {
                            return Err(BridgeError::Released(ResourceKind::TlsSession));
                        }
                        if read.map_err(BridgeError::tls)? == 0 {
                            return Ok(Vec::new());
                        }
                        conn.process_new_packets().map_err(BridgeError::tls)?;
                        flush(conn, transport).map_err(BridgeError::tls)?;
                    }
                    Err(e) => return Err(BridgeError::tls(e)),
                }
            }
        })
    }

    /// Send close_notify. Later calls are no-ops.
    pub fn bye(&self) -> BridgeResult<()> {
        self.state.with(|s| {
            if let (Some(conn), Some(transport)) = (s.conn.as_mut(), s.transport.as_mut()) {
                conn.send_close_notify();
                flush(conn, transport).map_err(BridgeError::tls)?;
            }
            s.conn = None;
            Ok(())
        })
    }

    pub fn hostname(&self) -> BridgeResult<Option<String>> {
        self.state.with(|s| Ok(s.hostname.clone()))
    }

    pub fn last_error(&self) -> BridgeResult<Option<String>> {
        self.state.with(|s| Ok(s.last_error.clone()))
    }

    pub fn certificate_error(&self) -> BridgeResult<Option<String>> {
        self.state.with(|s| Ok(s.certificate_error.clone()))
    }
}

fn established(s: &mut SessionState) -> BridgeResult<(&mut Connection, &mut TcpStream)> {
    match (s.conn.as_mut(), s.transport.as_mut()) {
        (Some(conn), Some(transport)) => Ok((conn, transport)),
        _ => Err(BridgeError::NotInitialized(
            "TLS handshake has not completed".into(),
        )),
    }
}

impl NativeObject for TlsSession {
    fn kind(&self) -> ResourceKind {
        ResourceKind::TlsSession
    }

    fn destroy(&self) {
        self.interrupt();
        self.state.clear();
    }
}

impl Resource for TlsSession {
    const KIND: ResourceKind = ResourceKind::TlsSession;
}

// =============================================================================
// Dispatch
// =============================================================================

pub fn tls_credentials_allocate() -> Handle {
    registry::register(TlsCredentials::new())
}

pub fn tls_credentials_set_key_file(
    handle: Handle,
    cert_path: &Path,
    key_path: &Path,
    format: CertFormat,
) -> BridgeResult<()> {
    registry::lookup_as::<TlsCredentials>(handle)?.set_key_file(cert_path, key_path, format)
}

pub fn tls_credentials_set_trust_file(
    handle: Handle,
    path: &Path,
    format: CertFormat,
) -> BridgeResult<()> {
    registry::lookup_as::<TlsCredentials>(handle)?.set_trust_file(path, format)
}

pub fn tls_credentials_set_crl_file(
    handle: Handle,
    path: &Path,
    format: CertFormat,
) -> BridgeResult<()> {
    registry::lookup_as::<TlsCredentials>(handle)?.set_crl_file(path, format)
}

pub fn tls_credentials_set_dh_security(handle: Handle, level: DhSecurity) -> BridgeResult<()> {
    registry::lookup_as::<TlsCredentials>(handle)?.set_dh_security(level)
}

pub fn tls_credentials_dispose(handle: Handle) {
    registry::release(handle)
}

pub fn tls_session_initialize_client() -> Handle {
    registry::register(TlsSession::client())
}

pub fn tls_session_initialize_server() -> Handle {
    registry::register(TlsSession::server())
}

pub fn tls_session_set_hostname(handle: Handle, hostname: &str) -> BridgeResult<()> {
    registry::lookup_as::<TlsSession>(handle)?.set_hostname(hostname)
}

/// Attach the credentials at `credentials`; both handles are resolved first.
pub fn tls_session_set_credentials(handle: Handle, credentials: Handle) -> BridgeResult<()> {
    let session = registry::lookup_as::<TlsSession>(handle)?;
    let creds = registry::lookup_as::<TlsCredentials>(credentials)?;
    session.set_credentials(creds)
}

pub fn tls_session_set_require_client_auth(handle: Handle, require: bool) -> BridgeResult<()> {
    registry::lookup_as::<TlsSession>(handle)?.set_require_client_auth(require)
}

pub fn tls_session_start_socket_transport(handle: Handle, socket: Handle) -> BridgeResult<bool> {
    let session = registry::lookup_as::<TlsSession>(handle)?;
    let socket = registry::lookup_as::<BerkeleySocket>(socket)?;
    session.start_socket_transport(&socket)
}

pub fn tls_session_do_handshake(handle: Handle) -> BridgeResult<bool> {
    registry::lookup_as::<TlsSession>(handle)?.do_handshake()
}

pub fn tls_session_send_record(handle: Handle, data: &[u8]) -> BridgeResult<usize> {
    registry::lookup_as::<TlsSession>(handle)?.send_record(data)
}

pub fn tls_session_receive_record(handle: Handle, max: usize) -> BridgeResult<Vec<u8>> {
    registry::lookup_as::<TlsSession>(handle)?.receive_record(max)
}

pub fn tls_session_bye(handle: Handle) -> BridgeResult<()> {
    registry::lookup_as::<TlsSession>(handle)?.bye()
}

pub fn tls_session_hostname(handle: Handle) -> BridgeResult<Option<String>> {
    registry::lookup_as::<TlsSession>(handle)?.hostname()
}

pub fn tls_session_last_error(handle: Handle) -> BridgeResult<Option<String>> {
    registry::lookup_as::<TlsSession>(handle)?.last_error()
}

pub fn tls_session_certificate_error(handle: Handle) -> BridgeResult<Option<String>> {
    registry::lookup_as::<TlsSession>(handle)?.certificate_error()
}

pub fn tls_session_dispose(handle: Handle) {
    registry::release(handle)
}
