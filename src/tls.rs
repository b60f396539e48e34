use std::sync::{Arc, OnceLock};

use monoio::net::TcpStream;
use monoio_rustls::{ClientTlsStream, TlsConnector};
use rustls::pki_types::ServerName;
use rustls::{ClientConfig, RootCertStore};

#[derive(thiserror::Error, Debug)]
pub enum TlsErr {
    #[error("{0:?} is not a valid TLS server name")]
    ServerName(String),
    #[error("tls handshake with {host} failed: {source}")]
    Handshake {
        host: String,
        #[source]
        source: monoio_rustls::TlsError,
    },
}

static CONNECTOR: OnceLock<TlsConnector> = OnceLock::new();

/// Process-wide connector trusting the webpki root set. The upgrade is plain
/// HTTP/1.1, so that is the only ALPN protocol offered.
fn connector() -> &'static TlsConnector {
    CONNECTOR.get_or_init(|| {
        let _ = rustls::crypto::ring::default_provider().install_default();

        let roots = RootCertStore {
            roots: webpki_roots::TLS_SERVER_ROOTS.to_vec(),
        };
        let mut cfg = ClientConfig::builder()
            .with_root_certificates(roots)
            .with_no_client_auth();
        cfg.alpn_protocols = vec![b"http/1.1".to_vec()];
        TlsConnector::from(Arc::new(cfg))
    })
}

/// Name presented for SNI and checked against the server certificate. IP
/// literals are accepted as-is.
pub fn server_name(host: &str) -> Result<ServerName<'static>, TlsErr> {
    ServerName::try_from(host.to_owned()).map_err(|_| TlsErr::ServerName(host.to_owned()))
}

/// Runs the client TLS handshake over an already dialed `wss://` connection.
pub async fn handshake(tcp: TcpStream, host: &str) -> Result<ClientTlsStream<TcpStream>, TlsErr> {
    let name = server_name(host)?;
    tracing::debug!(host, "Starting tls handshake");
    connector()
        .connect(name, tcp)
        .await
        .map_err(|source| TlsErr::Handshake {
            host: host.to_owned(),
            source,
        })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn dns_and_ip_hosts_are_valid_server_names() {
        assert!(matches!(
            server_name("echo.websocket.org"),
            Ok(ServerName::DnsName(_))
        ));
        assert!(matches!(server_name("127.0.0.1"), Ok(ServerName::IpAddress(_))));
        assert!(matches!(server_name("::1"), Ok(ServerName::IpAddress(_))));
    }

    #[test]
    fn malformed_host_is_rejected() {
        let err = server_name("not a host").unwrap_err();
        assert!(matches!(err, TlsErr::ServerName(ref h) if h == "not a host"));
    }

    #[test]
    fn connector_is_built_once() {
        assert!(std::ptr::eq(connector(), connector()));
    }
}
