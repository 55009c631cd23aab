use std::fs::File;
use std::io::{self, BufReader, ErrorKind};
use std::path::Path;
use std::sync::Arc;

use pgwire::tokio::TlsAcceptor;
use pgwire::tokio::tokio_rustls::rustls::ServerConfig;

use crate::config::Config;

/// Build the acceptor from the configured PEM pair. `Config` already
/// guarantees both paths are set or neither is.
pub fn load_tls_acceptor(config: &Config) -> io::Result<Option<TlsAcceptor>> {
    let (Some(cert_path), Some(key_path)) = (config.tls_cert.as_deref(), config.tls_key.as_deref()) else {
        return Ok(None);
    };

    let certs: Vec<_> = rustls_pemfile::certs(&mut open_pem(cert_path)?).collect::<Result<_, _>>()?;
    if certs.is_empty() {
        return Err(io::Error::new(
            ErrorKind::InvalidInput,
            format!("{cert_path}: no certificates found"),
        ));
    }

    let key = rustls_pemfile::private_key(&mut open_pem(key_path)?)?
        .ok_or_else(|| io::Error::new(ErrorKind::InvalidInput, format!("{key_path}: no private key found")))?;

    let mut server = ServerConfig::builder()
        .with_no_client_auth()
        .with_single_cert(certs, key)
        .map_err(|e| io::Error::new(ErrorKind::InvalidInput, e))?;
    server.alpn_protocols = vec![b"postgresql".to_vec()];

    tracing::info!(cert = cert_path, "tls enabled");
    Ok(Some(TlsAcceptor::from(Arc::new(server))))
}

fn open_pem(path: &str) -> io::Result<BufReader<File>> {
    File::open(Path::new(path))
        .map(BufReader::new)
        .map_err(|e| io::Error::new(e.kind(), format!("{path}: {e}")))
}
