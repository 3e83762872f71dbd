use std::io;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::Serialize;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::TcpStream;
use tokio_rustls::TlsConnector;
use tokio_rustls::rustls::client::danger::{HandshakeSignatureValid, ServerCertVerified, ServerCertVerifier};
use tokio_rustls::rustls::pki_types::{CertificateDer, ServerName, UnixTime};
use tokio_rustls::rustls::{ClientConfig, DigitallySignedStruct, SignatureScheme};
use tracing::debug;

use super::protocol::{Attributes, Reply, parse_reply, read_sentence, write_sentence};
use super::{RouterError, is_not_found};

/// Connection parameters with the admin password already decrypted.
#[derive(Clone)]
pub struct RouterTarget {
    pub name: String,
    pub host: String,
    pub port: u16,
    pub use_tls: bool,
    pub username: String,
    pub password: String,
}

impl std::fmt::Debug for RouterTarget {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RouterTarget")
            .field("name", &self.name)
            .field("host", &self.host)
            .field("port", &self.port)
            .field("use_tls", &self.use_tls)
            .finish_non_exhaustive()
    }
}

/// Device-side shape of a PPPoE secret.
#[derive(Clone, PartialEq, Eq)]
pub struct SecretSpec {
    pub username: String,
    pub password: String,
    pub profile: String,
    pub service: String,
    pub local_address: Option<String>,
    pub remote_address: Option<String>,
    pub disabled: bool,
    pub comment: Option<String>,
}

impl std::fmt::Debug for SecretSpec {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SecretSpec")
            .field("username", &self.username)
            .field("profile", &self.profile)
            .field("service", &self.service)
            .field("disabled", &self.disabled)
            .finish_non_exhaustive()
    }
}

impl SecretSpec {
    fn field_words(&self) -> Vec<String> {
        let mut words = vec![
            format!("=password={}", self.password),
            format!("=profile={}", self.profile),
            format!("=service={}", self.service),
            format!("=disabled={}", if self.disabled { "yes" } else { "no" }),
        ];
        if let Some(addr) = self.local_address.as_deref().filter(|a| !a.is_empty()) {
            words.push(format!("=local-address={}", addr));
        }
        if let Some(addr) = self.remote_address.as_deref().filter(|a| !a.is_empty()) {
            words.push(format!("=remote-address={}", addr));
        }
        if let Some(comment) = &self.comment {
            words.push(format!("=comment={}", comment));
        }
        words
    }
}

#[derive(Debug, Clone, Default, Serialize, PartialEq, Eq)]
pub struct ActiveSession {
    pub id: String,
    pub username: String,
    pub service: Option<String>,
    pub caller_id: Option<String>,
    pub address: Option<String>,
    pub uptime: Option<String>,
    pub bytes_in: u64,
    pub bytes_out: u64,
    pub packets_in: u64,
    pub packets_out: u64,
}

impl ActiveSession {
    fn from_attributes(attrs: &Attributes) -> Self {
        let text = |k: &str| attrs.get(k).filter(|v| !v.is_empty()).cloned();
        let number = |k: &str| attrs.get(k).and_then(|v| v.parse::<u64>().ok()).unwrap_or(0);
        Self {
            id: attrs.get(".id").cloned().unwrap_or_default(),
            username: attrs.get("name").cloned().unwrap_or_default(),
            service: text("service"),
            caller_id: text("caller-id"),
            address: text("address"),
            uptime: text("uptime"),
            bytes_in: number("bytes-in"),
            bytes_out: number("bytes-out"),
            packets_in: number("packets-in"),
            packets_out: number("packets-out"),
        }
    }
}

/// One logged-in API session against a single router.
#[async_trait]
pub trait RouterApi: Send {
    /// `None` when the router has no secret with that name.
    async fn find_secret_id(&mut self, username: &str) -> Result<Option<String>, RouterError>;
    async fn add_secret(&mut self, spec: &SecretSpec) -> Result<String, RouterError>;
    async fn update_secret(&mut self, id: &str, spec: &SecretSpec) -> Result<(), RouterError>;
    /// `false` when nothing matched.
    async fn remove_secret_by_username(&mut self, username: &str) -> Result<bool, RouterError>;
    async fn list_active(&mut self) -> Result<Vec<ActiveSession>, RouterError>;
    async fn disconnect_active(&mut self, session_id: &str) -> Result<(), RouterError>;
    async fn server_local_address(&mut self) -> Result<Option<String>, RouterError>;
    async fn identity(&mut self) -> Result<String, RouterError>;
}

#[async_trait]
pub trait RouterConnector: Send + Sync {
    async fn connect(&self, target: &RouterTarget) -> Result<Box<dyn RouterApi>, RouterError>;
}

enum Failure {
    Trap(String),
    Io(io::Error),
    Timeout,
}

struct Outcome {
    rows: Vec<Attributes>,
    done: Attributes,
}

fn io_message(e: &io::Error) -> String {
    match e.kind() {
        io::ErrorKind::ConnectionRefused => "connection refused".to_string(),
        io::ErrorKind::TimedOut => "connection timeout".to_string(),
        io::ErrorKind::HostUnreachable => "no route to host".to_string(),
        io::ErrorKind::NetworkUnreachable => "network is unreachable".to_string(),
        io::ErrorKind::UnexpectedEof
        | io::ErrorKind::ConnectionReset
        | io::ErrorKind::ConnectionAborted
        | io::ErrorKind::BrokenPipe => format!("unable to reach router: {}", e),
        _ => e.to_string(),
    }
}

impl Failure {
    fn into_router_error(self, router: &str) -> RouterError {
        match self {
            Failure::Trap(message) => RouterError::classify(router, message),
            Failure::Io(e) => RouterError::classify(router, io_message(&e)),
            Failure::Timeout => RouterError::Unreachable {
                router: router.to_string(),
                message: "connection timeout".to_string(),
            },
        }
    }
}

async fn exchange<S>(stream: &mut S, words: &[String]) -> io::Result<(Outcome, Option<String>)>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    write_sentence(stream, words).await?;
    let mut rows = Vec::new();
    let mut trap = None;
    loop {
        let sentence = read_sentence(stream).await?;
        match parse_reply(&sentence)? {
            Reply::Re(attrs) => rows.push(attrs),
            Reply::Trap(message) => trap = Some(message),
            Reply::Empty => {}
            Reply::Done(done) => return Ok((Outcome { rows, done }, trap)),
            Reply::Fatal(reason) => {
                return Err(io::Error::new(io::ErrorKind::ConnectionAborted, reason));
            }
        }
    }
}

pub struct MikrotikSession<S> {
    stream: S,
    router: String,
    timeout: Duration,
}

impl<S> MikrotikSession<S>
where
    S: AsyncRead + AsyncWrite + Unpin + Send,
{
    pub async fn login(stream: S, target: &RouterTarget, timeout: Duration) -> Result<Self, RouterError> {
        let mut session = Self {
            stream,
            router: target.name.clone(),
            timeout,
        };
        let outcome = session
            .run(&[
                "/login".to_string(),
                format!("=name={}", target.username),
                format!("=password={}", target.password),
            ])
            .await?;
        if outcome.done.contains_key("ret") {
            return Err(RouterError::Device {
                router: session.router.clone(),
                message: "router requires legacy challenge login (RouterOS < 6.43)".to_string(),
            });
        }
        debug!("Logged in to router {}", session.router);
        Ok(session)
    }

    async fn run(&mut self, words: &[String]) -> Result<Outcome, RouterError> {
        self.try_run(words).await.map_err(|f| f.into_router_error(&self.router))
    }

    async fn try_run(&mut self, words: &[String]) -> Result<Outcome, Failure> {
        match tokio::time::timeout(self.timeout, exchange(&mut self.stream, words)).await {
            Err(_) => Err(Failure::Timeout),
            Ok(Err(e)) => Err(Failure::Io(e)),
            Ok(Ok((_, Some(trap)))) => Err(Failure::Trap(trap)),
            Ok(Ok((outcome, None))) => Ok(outcome),
        }
    }
}

#[async_trait]
impl<S> RouterApi for MikrotikSession<S>
where
    S: AsyncRead + AsyncWrite + Unpin + Send,
{
    async fn find_secret_id(&mut self, username: &str) -> Result<Option<String>, RouterError> {
        let words = [
            "/ppp/secret/print".to_string(),
            "=.proplist=.id,name".to_string(),
            format!("?name={}", username),
        ];
        match self.try_run(&words).await {
            Ok(outcome) => Ok(outcome.rows.into_iter().find_map(|row| row.get(".id").cloned())),
            Err(Failure::Trap(message)) if is_not_found(&message) => Ok(None),
            Err(failure) => Err(failure.into_router_error(&self.router)),
        }
    }

    async fn add_secret(&mut self, spec: &SecretSpec) -> Result<String, RouterError> {
        let mut words = vec!["/ppp/secret/add".to_string(), format!("=name={}", spec.username)];
        words.extend(spec.field_words());
        let outcome = self.run(&words).await?;
        Ok(outcome.done.get("ret").cloned().unwrap_or_default())
    }

    async fn update_secret(&mut self, id: &str, spec: &SecretSpec) -> Result<(), RouterError> {
        let mut words = vec!["/ppp/secret/set".to_string(), format!("=.id={}", id)];
        words.extend(spec.field_words());
        self.run(&words).await.map(|_| ())
    }

    async fn remove_secret_by_username(&mut self, username: &str) -> Result<bool, RouterError> {
        let Some(id) = self.find_secret_id(username).await? else {
            return Ok(false);
        };
        match self.try_run(&["/ppp/secret/remove".to_string(), format!("=.id={}", id)]).await {
            Ok(_) => Ok(true),
            Err(Failure::Trap(message)) if is_not_found(&message) => Ok(false),
            Err(failure) => Err(failure.into_router_error(&self.router)),
        }
    }

    async fn list_active(&mut self) -> Result<Vec<ActiveSession>, RouterError> {
        let outcome = self.run(&["/ppp/active/print".to_string()]).await?;
        Ok(outcome.rows.iter().map(ActiveSession::from_attributes).collect())
    }

    async fn disconnect_active(&mut self, session_id: &str) -> Result<(), RouterError> {
        self.run(&["/ppp/active/remove".to_string(), format!("=.id={}", session_id)])
            .await
            .map(|_| ())
    }

    async fn server_local_address(&mut self) -> Result<Option<String>, RouterError> {
        let servers = self.run(&["/interface/pppoe-server/server/print".to_string()]).await?;
        let Some(profile) = servers
            .rows
            .iter()
            .filter(|row| row.get("disabled").map(String::as_str) != Some("true"))
            .find_map(|row| row.get("default-profile").cloned())
        else {
            return Ok(None);
        };
        let profiles = self
            .run(&["/ppp/profile/print".to_string(), format!("?name={}", profile)])
            .await?;
        Ok(profiles
            .rows
            .into_iter()
            .find_map(|row| row.get("local-address").cloned())
            .filter(|addr| !addr.is_empty()))
    }

    async fn identity(&mut self) -> Result<String, RouterError> {
        let outcome = self.run(&["/system/identity/print".to_string()]).await?;
        Ok(outcome
            .rows
            .into_iter()
            .find_map(|row| row.get("name").cloned())
            .unwrap_or_default())
    }
}

#[derive(Debug)]
struct NoCertificateVerification;

impl ServerCertVerifier for NoCertificateVerification {
    fn verify_server_cert(
        &self,
        _end_entity: &CertificateDer<'_>,
        _intermediates: &[CertificateDer<'_>],
        _server_name: &ServerName<'_>,
        _ocsp_response: &[u8],
        _now: UnixTime,
    ) -> Result<ServerCertVerified, tokio_rustls::rustls::Error> {
        Ok(ServerCertVerified::assertion())
    }

    fn verify_tls12_signature(
        &self,
        _message: &[u8],
        _cert: &CertificateDer<'_>,
        _dss: &DigitallySignedStruct,
    ) -> Result<HandshakeSignatureValid, tokio_rustls::rustls::Error> {
        Ok(HandshakeSignatureValid::assertion())
    }

    fn verify_tls13_signature(
        &self,
        _message: &[u8],
        _cert: &CertificateDer<'_>,
        _dss: &DigitallySignedStruct,
    ) -> Result<HandshakeSignatureValid, tokio_rustls::rustls::Error> {
        Ok(HandshakeSignatureValid::assertion())
    }

    fn supported_verify_schemes(&self) -> Vec<SignatureScheme> {
        vec![
            SignatureScheme::RSA_PSS_SHA256,
            SignatureScheme::RSA_PSS_SHA384,
            SignatureScheme::RSA_PKCS1_SHA256,
            SignatureScheme::RSA_PKCS1_SHA384,
            SignatureScheme::ECDSA_NISTP256_SHA256,
            SignatureScheme::ECDSA_NISTP384_SHA384,
            SignatureScheme::ED25519,
        ]
    }
}

/// Opens plain or `api-ssl` sessions; RouterOS ships self-signed certificates.
pub struct MikrotikConnector {
    timeout: Duration,
    tls: TlsConnector,
}

impl MikrotikConnector {
    pub fn new(timeout: Duration) -> anyhow::Result<Self> {
        let provider = Arc::new(tokio_rustls::rustls::crypto::ring::default_provider());
        let config = ClientConfig::builder_with_provider(provider)
            .with_safe_default_protocol_versions()?
            .dangerous()
            .with_custom_certificate_verifier(Arc::new(NoCertificateVerification))
            .with_no_client_auth();
        Ok(Self {
            timeout,
            tls: TlsConnector::from(Arc::new(config)),
        })
    }
}

#[async_trait]
impl RouterConnector for MikrotikConnector {
    async fn connect(&self, target: &RouterTarget) -> Result<Box<dyn RouterApi>, RouterError> {
        let addr = format!("{}:{}", target.host, target.port);
        let tcp = match tokio::time::timeout(self.timeout, TcpStream::connect(&addr)).await {
            Err(_) => return Err(Failure::Timeout.into_router_error(&target.name)),
            Ok(Err(e)) => return Err(Failure::Io(e).into_router_error(&target.name)),
            Ok(Ok(stream)) => stream,
        };
        if let Err(e) = tcp.set_nodelay(true) {
            debug!("Could not set TCP_NODELAY for router {}: {}", target.name, e);
        }

        if !target.use_tls {
            let session = MikrotikSession::login(tcp, target, self.timeout).await?;
            return Ok(Box::new(session));
        }

        let server_name = ServerName::try_from(target.host.clone()).map_err(|e| RouterError::Device {
            router: target.name.clone(),
            message: format!("invalid TLS server name: {}", e),
        })?;
        let tls = match tokio::time::timeout(self.timeout, self.tls.connect(server_name, tcp)).await {
            Err(_) => return Err(Failure::Timeout.into_router_error(&target.name)),
            Ok(Err(e)) => return Err(Failure::Io(e).into_router_error(&target.name)),
            Ok(Ok(stream)) => stream,
        };
        let session = MikrotikSession::login(tls, target, self.timeout).await?;
        Ok(Box::new(session))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn target() -> RouterTarget {
        RouterTarget {
            name: "core-1".into(),
            host: "10.0.0.1".into(),
            port: 8728,
            use_tls: false,
            username: "api".into(),
            password: "pw".into(),
        }
    }

    /// Minimal RouterOS responder holding `(id, name)` secrets.
    async fn fake_router<S: AsyncRead + AsyncWrite + Unpin>(mut io: S, mut secrets: Vec<(String, String)>) {
        let mut next_id = 10;
        while let Ok(words) = read_sentence(&mut io).await {
            let attrs = super::super::protocol::parse_attributes(&words[1..]);
            let query = words.iter().find_map(|w| w.strip_prefix("?name=")).map(str::to_string);
            let replies: Vec<Vec<String>> = match words[0].as_str() {
                "/login" if attrs.get("password").map(String::as_str) == Some("pw") => vec![vec!["!done".into()]],
                "/login" => vec![
                    vec!["!trap".into(), "=message=invalid user name or password (6)".into()],
                    vec!["!done".into()],
                ],
                "/ppp/secret/print" => {
                    let mut out: Vec<Vec<String>> = secrets
                        .iter()
                        .filter(|(_, name)| Some(name) == query.as_ref())
                        .map(|(id, name)| vec!["!re".into(), format!("=.id={}", id), format!("=name={}", name)])
                        .collect();
                    out.push(vec!["!done".into()]);
                    out
                }
                "/ppp/secret/add" => {
                    next_id += 1;
                    let id = format!("*{}", next_id);
                    secrets.push((id.clone(), attrs.get("name").cloned().unwrap_or_default()));
                    vec![vec!["!done".into(), format!("=ret={}", id)]]
                }
                "/ppp/secret/remove" => {
                    let id = attrs.get(".id").cloned().unwrap_or_default();
                    secrets.retain(|(sid, _)| *sid != id);
                    vec![vec!["!done".into()]]
                }
                "/system/identity/print" => vec![vec!["!re".into(), "=name=CoreRouter".into()], vec!["!done".into()]],
                _ => vec![
                    vec!["!trap".into(), "=message=no such command".into()],
                    vec!["!done".into()],
                ],
            };
            for reply in replies {
                if write_sentence(&mut io, &reply).await.is_err() {
                    return;
                }
            }
        }
    }

    #[tokio::test]
    async fn find_add_remove_against_fake_device() {
        let (client, server) = tokio::io::duplex(4096);
        tokio::spawn(fake_router(server, vec![("*1".into(), "existing".into())]));

        let mut session = MikrotikSession::login(client, &target(), Duration::from_secs(2)).await.unwrap();
        assert_eq!(session.find_secret_id("existing").await.unwrap(), Some("*1".to_string()));
        assert_eq!(session.find_secret_id("budi").await.unwrap(), None);

        let spec = SecretSpec {
            username: "budi".into(),
            password: "secret".into(),
            profile: "10M".into(),
            service: "pppoe".into(),
            local_address: None,
            remote_address: None,
            disabled: false,
            comment: None,
        };
        let id = session.add_secret(&spec).await.unwrap();
        assert_eq!(session.find_secret_id("budi").await.unwrap(), Some(id));

        assert!(session.remove_secret_by_username("budi").await.unwrap());
        assert!(!session.remove_secret_by_username("budi").await.unwrap());
        assert_eq!(session.identity().await.unwrap(), "CoreRouter");
    }

    #[tokio::test]
    async fn bad_credentials_are_device_errors() {
        let (client, server) = tokio::io::duplex(4096);
        tokio::spawn(fake_router(server, Vec::new()));
        let mut t = target();
        t.password = "wrong".into();

        let err = MikrotikSession::login(client, &t, Duration::from_secs(2)).await.err().unwrap();
        assert!(matches!(err, RouterError::Device { .. }));
    }

    #[tokio::test]
    async fn connector_opens_plain_sessions_over_tcp() {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        tokio::spawn(async move {
            let (socket, _) = listener.accept().await.unwrap();
            fake_router(socket, Vec::new()).await;
        });

        let connector = MikrotikConnector::new(Duration::from_secs(2)).unwrap();
        let mut t = target();
        t.host = "127.0.0.1".into();
        t.port = port;
        let mut api = connector.connect(&t).await.unwrap();
        assert_eq!(api.identity().await.unwrap(), "CoreRouter");
    }

    #[tokio::test]
    async fn silent_device_times_out_as_unreachable() {
        let (client, _server) = tokio::io::duplex(4096);
        let err = MikrotikSession::login(client, &target(), Duration::from_millis(50)).await.err().unwrap();
        assert!(err.is_unreachable());
    }

    #[test]
    fn active_rows_parse_counters() {
        let mut attrs = Attributes::new();
        attrs.insert(".id".into(), "*80".into());
        attrs.insert("name".into(), "budi".into());
        attrs.insert("address".into(), "10.10.0.5".into());
        attrs.insert("bytes-in".into(), "1024".into());
        let session = ActiveSession::from_attributes(&attrs);
        assert_eq!(session.id, "*80");
        assert_eq!(session.address.as_deref(), Some("10.10.0.5"));
        assert_eq!(session.bytes_in, 1024);
        assert_eq!(session.bytes_out, 0);
    }

    #[test]
    fn secret_words_skip_empty_addresses() {
        let spec = SecretSpec {
            username: "budi".into(),
            password: "p".into(),
            profile: "10M".into(),
            service: "pppoe".into(),
            local_address: Some(String::new()),
            remote_address: Some("10.10.0.9".into()),
            disabled: true,
            comment: Some("C260305-ABCDEF12".into()),
        };
        let words = spec.field_words();
        assert!(words.contains(&"=disabled=yes".to_string()));
        assert!(words.contains(&"=remote-address=10.10.0.9".to_string()));
        assert!(!words.iter().any(|w| w.starts_with("=local-address=")));
    }
}
