//! Shared helpers for the end-to-end tests

#![allow(dead_code)]

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use russh::client;
use russh::keys::ssh_key::rand_core::OsRng;
use russh::keys::ssh_key::LineEnding;
use russh::keys::{Algorithm, PrivateKey, PrivateKeyWithHashAlg, PublicKey};
use russh::{ChannelMsg, Disconnect};
use tokio::net::TcpListener;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use ssh_gate::{ConnectionAcceptor, ConnectionHandler, ConnectionRegistry, Server, ServeOptions};

/// Client handler that trusts any server key
#[derive(Debug, Clone, Default)]
pub struct TestClient;

impl client::Handler for TestClient {
    type Error = anyhow::Error;

    async fn check_server_key(&mut self, _server_public_key: &PublicKey) -> Result<bool, Self::Error> {
        Ok(true)
    }
}

pub fn generate_key() -> PrivateKey {
    PrivateKey::random(&mut OsRng, Algorithm::Ed25519).unwrap()
}

pub fn host_key_pem() -> String {
    generate_key().to_openssh(LineEnding::LF).unwrap().to_string()
}

/// authorized_keys record for `key`
pub fn authorized_line(key: &PrivateKey) -> String {
    key.public_key().to_openssh().unwrap()
}

/// Options tuned so rejected attempts and shutdown do not slow tests down
pub fn fast_options() -> ServeOptions {
    ServeOptions::new()
        .with_auth_rejection_time(Duration::from_millis(10))
        .with_handshake_timeout(Duration::from_secs(5))
        .with_shutdown_grace(Duration::from_secs(1))
}

pub struct Running<H: ConnectionHandler> {
    pub addr: SocketAddr,
    pub shutdown: CancellationToken,
    pub registry: ConnectionRegistry,
    pub task: JoinHandle<(ConnectionAcceptor<TcpListener, H>, ssh_gate::Result<()>)>,
}

/// Start a server on a loopback port with one fresh host key
pub async fn start<H: ConnectionHandler>(
    handler: H,
    authorized_keys: &str,
    options: ServeOptions,
) -> Running<H> {
    let mut server = Server::with_options(handler, options);
    assert!(server.add_host_key(host_key_pem().as_bytes()));
    let _ = server.add_authorized_keys(authorized_keys.as_bytes());

    let shutdown = server.shutdown_token();
    let registry = server.registry();

    let mut acceptor = server.into_acceptor::<TcpListener>().unwrap();
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    acceptor.attach(listener).unwrap();

    let task = tokio::spawn(async move {
        let result = acceptor.serve().await;
        (acceptor, result)
    });

    Running {
        addr,
        shutdown,
        registry,
        task,
    }
}

/// Connect and try to authenticate; returns the session and whether it succeeded
pub async fn login(
    addr: SocketAddr,
    user: &str,
    key: &PrivateKey,
) -> anyhow::Result<(client::Handle<TestClient>, bool)> {
    let config = Arc::new(client::Config::default());
    let mut session = client::connect(config, addr, TestClient).await?;
    let auth = session
        .authenticate_publickey(user, PrivateKeyWithHashAlg::new(Arc::new(key.clone()), None))
        .await?;
    Ok((session, auth.success()))
}

pub async fn logout(session: client::Handle<TestClient>) {
    let _ = session
        .disconnect(Disconnect::ByApplication, "bye", "en")
        .await;
}

/// Open a session channel and collect everything the server writes to it
pub async fn read_session(session: &client::Handle<TestClient>) -> anyhow::Result<String> {
    let mut channel = session.channel_open_session().await?;
    let mut output = Vec::new();

    while let Some(msg) = channel.wait().await {
        match msg {
            ChannelMsg::Data { ref data } => output.extend_from_slice(data),
            ChannelMsg::Eof | ChannelMsg::Close => break,
            _ => {}
        }
    }

    Ok(String::from_utf8_lossy(&output).into_owned())
}

/// Poll `check` until it holds or a few seconds pass
pub async fn eventually(mut check: impl FnMut() -> bool) -> bool {
    for _ in 0..100 {
        if check() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(50)).await;
    }
    check()
}
