//! Shared helpers for fsdock core integration tests.
//!
//! Remote backend tests run against the FTP, FTPES, FTPS and SFTP containers
//! described in `DESIGN.md` and skip themselves when those containers are
//! not running. The TLS containers use self-signed certificates.

// Each integration test is compiled as its own crate, so not every test file
// uses every function from this shared module.
#![allow(dead_code)]

use std::net::TcpStream;
use std::sync::Arc;
use std::time::Duration;

use fsdock_core::config::CoreConfig;
use fsdock_core::credential::CredentialStore;
use fsdock_core::server::{MemoryServerStore, Scheme, ServerConfig, ServerStore};
use fsdock_core::tasks::TaskStatus;
use fsdock_core::FilesystemFactory;
use tokio::sync::watch;

/// Check if a TCP port is reachable on the given host within 2 seconds.
pub fn is_port_reachable(host: &str, port: u16) -> bool {
    let addr = format!("{host}:{port}");
    if let Ok(addr) = addr.parse() {
        TcpStream::connect_timeout(&addr, Duration::from_secs(2)).is_ok()
    } else {
        false
    }
}

/// Skip the current test if a Docker container is not reachable on the given port.
macro_rules! require_docker {
    ($port:expr) => {
        if !common::is_port_reachable("127.0.0.1", $port) {
            eprintln!(
                "SKIPPED: Docker container not reachable on port {} \
                 (start the FTP/SFTP test containers first)",
                $port
            );
            return;
        }
    };
}
pub(crate) use require_docker;

/// Plain FTP container (vsftpd, passive mode).
pub const PORT_FTP: u16 = 2121;
/// vsftpd with `ssl_enable`, accepting `AUTH TLS` on the control port.
pub const PORT_FTPES: u16 = 2122;
/// vsftpd with `implicit_ssl`.
pub const PORT_FTPS: u16 = 2990;
/// OpenSSH container with the SFTP subsystem.
pub const PORT_SFTP: u16 = 2222;

pub const TEST_USER: &str = "testuser";
pub const TEST_PASSWORD: &str = "testpass";

/// A password server pointing at a local test container.
pub fn test_server(scheme: Scheme, port: u16) -> ServerConfig {
    let mut server = ServerConfig::new(scheme, "test", "127.0.0.1", TEST_USER);
    server.port = port;
    server
}

/// A factory over an in-memory store seeded with `servers`.
pub fn factory_with(servers: &[ServerConfig]) -> FilesystemFactory {
    factory_with_config(servers, CoreConfig::default())
}

pub fn factory_with_config(servers: &[ServerConfig], config: CoreConfig) -> FilesystemFactory {
    let store = Arc::new(MemoryServerStore::new());
    for server in servers {
        store.upsert(server).expect("memory store upsert");
    }
    FilesystemFactory::new(store, Arc::new(CredentialStore::new()), config)
}

/// Wait until the watched task reaches `Done` or `Error`.
pub async fn wait_terminal(mut rx: watch::Receiver<TaskStatus>) -> TaskStatus {
    tokio::time::timeout(Duration::from_secs(10), async {
        loop {
            let status = rx.borrow_and_update().clone();
            if status.is_terminal() {
                return status;
            }
            if rx.changed().await.is_err() {
                return rx.borrow().clone();
            }
        }
    })
    .await
    .expect("task did not finish in time")
}
