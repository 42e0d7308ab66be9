//! Answer-file HTTP server and host-address discovery.
//!
//! The server is read-only, serves a single caller-named directory, and
//! lives for the build's lifetime on its own task. The published address
//! must be routable from the guest, so discovery prefers an explicit
//! address, then a named interface, then the first up, non-loopback IPv4.

use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::path::{Component, Path, PathBuf};

use axum::extract::State;
use axum::http::{StatusCode, Uri};
use axum::routing::get;
use axum::Router;
use tokio::sync::oneshot;

use crate::errors::{ForgeError, ForgeResult};

/// Pick the address to publish to the guest.
pub fn discover_host_ip(
    explicit: Option<IpAddr>,
    interface: Option<&str>,
) -> ForgeResult<IpAddr> {
    if let Some(ip) = explicit {
        return Ok(ip);
    }
    if let Some(name) = interface {
        return interface_ipv4(name);
    }
    first_routable_ipv4()
}

fn interface_ipv4(name: &str) -> ForgeResult<IpAddr> {
    let addrs = nix::ifaddrs::getifaddrs()
        .map_err(|e| ForgeError::Internal(format!("failed to list interfaces: {e}")))?;
    for ifaddr in addrs {
        if ifaddr.interface_name != name {
            continue;
        }
        if let Some(sockaddr) = ifaddr.address {
            if let Some(sin) = sockaddr.as_sockaddr_in() {
                return Ok(IpAddr::V4(Ipv4Addr::from(sin.ip())));
            }
        }
    }
    Err(ForgeError::Config(format!(
        "no IPv4 address found on interface {name}"
    )))
}

fn first_routable_ipv4() -> ForgeResult<IpAddr> {
    use nix::net::if_::InterfaceFlags;

    let addrs = nix::ifaddrs::getifaddrs()
        .map_err(|e| ForgeError::Internal(format!("failed to list interfaces: {e}")))?;
    for ifaddr in addrs {
        // A down interface can still carry a stale address; never publish
        // one the guest cannot reach.
        if !ifaddr.flags.contains(InterfaceFlags::IFF_UP)
            || ifaddr.flags.contains(InterfaceFlags::IFF_LOOPBACK)
        {
            continue;
        }
        let Some(sockaddr) = ifaddr.address else {
            continue;
        };
        let Some(sin) = sockaddr.as_sockaddr_in() else {
            continue;
        };
        let ip = Ipv4Addr::from(sin.ip());
        if ip.is_loopback() || ip.is_unspecified() || ip.is_link_local() {
            continue;
        }
        return Ok(IpAddr::V4(ip));
    }
    Err(ForgeError::Config(
        "no suitable IPv4 address found for the answer-file server".into(),
    ))
}

/// A running answer-file server.
pub struct FileServer {
    addr: SocketAddr,
    shutdown: Option<oneshot::Sender<()>>,
    task: tokio::task::JoinHandle<()>,
}

impl FileServer {
    /// Bind within `port_range` (0,0 means any ephemeral port) and serve
    /// `root` read-only.
    pub async fn serve(
        root: PathBuf,
        bind_ip: IpAddr,
        port_range: (u16, u16),
    ) -> ForgeResult<FileServer> {
        if !root.is_dir() {
            return Err(ForgeError::Config(format!(
                "http_directory {} is not a directory",
                root.display()
            )));
        }

        let listener = bind_in_range(bind_ip, port_range).await?;
        let addr = listener
            .local_addr()
            .map_err(|e| ForgeError::Internal(format!("listener has no address: {e}")))?;

        let app = Router::new()
            .route("/", get(serve_path))
            .route("/*path", get(serve_path))
            .with_state(root);

        let (shutdown_tx, shutdown_rx) = oneshot::channel::<()>();
        let task = tokio::spawn(async move {
            let server = axum::serve(listener, app).with_graceful_shutdown(async {
                let _ = shutdown_rx.await;
            });
            if let Err(e) = server.await {
                tracing::warn!(error = %e, "answer-file server exited with error");
            }
        });

        tracing::info!(addr = %addr, "answer-file server started");
        Ok(FileServer {
            addr,
            shutdown: Some(shutdown_tx),
            task,
        })
    }

    pub fn port(&self) -> u16 {
        self.addr.port()
    }

    pub async fn stop(mut self) {
        if let Some(tx) = self.shutdown.take() {
            let _ = tx.send(());
        }
        let _ = self.task.await;
    }
}

async fn bind_in_range(
    ip: IpAddr,
    (min, max): (u16, u16),
) -> ForgeResult<tokio::net::TcpListener> {
    if min == 0 && max == 0 {
        return tokio::net::TcpListener::bind((ip, 0))
            .await
            .map_err(|e| ForgeError::Config(format!("failed to bind {ip}: {e}")));
    }
    for port in min..=max {
        match tokio::net::TcpListener::bind((ip, port)).await {
            Ok(listener) => return Ok(listener),
            Err(_) => continue,
        }
    }
    Err(ForgeError::Config(format!(
        "no free port on {ip} in {min}-{max}"
    )))
}

async fn serve_path(State(root): State<PathBuf>, uri: Uri) -> Result<Vec<u8>, StatusCode> {
    let requested = uri.path().trim_start_matches('/');
    let Some(path) = sanitize(&root, requested) else {
        return Err(StatusCode::NOT_FOUND);
    };
    match tokio::fs::read(&path).await {
        Ok(data) => Ok(data),
        Err(_) => Err(StatusCode::NOT_FOUND),
    }
}

/// Resolve a request path inside `root`, refusing traversal.
fn sanitize(root: &Path, requested: &str) -> Option<PathBuf> {
    let mut path = root.to_path_buf();
    for component in Path::new(requested).components() {
        match component {
            Component::Normal(part) => path.push(part),
            Component::CurDir => {}
            _ => return None,
        }
    }
    Some(path)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sanitize_refuses_traversal() {
        let root = Path::new("/srv/http");
        assert_eq!(
            sanitize(root, "ks.cfg"),
            Some(PathBuf::from("/srv/http/ks.cfg"))
        );
        assert_eq!(
            sanitize(root, "sub/dir/file"),
            Some(PathBuf::from("/srv/http/sub/dir/file"))
        );
        assert_eq!(sanitize(root, "../etc/passwd"), None);
        assert_eq!(sanitize(root, "a/../../etc"), None);
    }

    #[tokio::test]
    async fn serves_files_from_the_root() {
        let dir = tempfile::tempdir().unwrap();
        tokio::fs::write(dir.path().join("ks.cfg"), b"install\n")
            .await
            .unwrap();

        let server = FileServer::serve(
            dir.path().to_path_buf(),
            IpAddr::V4(Ipv4Addr::LOCALHOST),
            (0, 0),
        )
        .await
        .unwrap();
        let port = server.port();

        let body = reqwest::get(format!("http://127.0.0.1:{port}/ks.cfg"))
            .await
            .unwrap()
            .bytes()
            .await
            .unwrap();
        assert_eq!(&body[..], b"install\n");

        let missing = reqwest::get(format!("http://127.0.0.1:{port}/absent"))
            .await
            .unwrap()
            .status();
        assert_eq!(missing, reqwest::StatusCode::NOT_FOUND);

        server.stop().await;
    }
}
