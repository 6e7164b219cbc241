// Fixture builders shared by the unit tests: archives, directory snapshots
// and a minimal HTTP server.

use std::collections::{BTreeMap, HashMap};
use std::io::Write;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpListener;

pub fn write_zip(path: &Path, entries: &[(&str, &[u8])]) {
    let file = std::fs::File::create(path).unwrap();
    let mut writer = zip::ZipWriter::new(file);
    let options = zip::write::SimpleFileOptions::default();
    for (name, data) in entries {
        writer.start_file(*name, options).unwrap();
        writer.write_all(data).unwrap();
    }
    writer.finish().unwrap();
}

/// Zip every file under `src`, names relative to `src`.
pub fn zip_dir(src: &Path, archive: &Path) {
    zip_dir_with_prefix(src, archive, "");
}

pub fn zip_dir_with_prefix(src: &Path, archive: &Path, prefix: &str) {
    let entries: Vec<(String, Vec<u8>)> = snapshot_tree(src)
        .into_iter()
        .map(|(name, data)| (format!("{prefix}{name}"), data))
        .collect();
    let borrowed: Vec<(&str, &[u8])> = entries
        .iter()
        .map(|(name, data)| (name.as_str(), data.as_slice()))
        .collect();
    write_zip(archive, &borrowed);
}

pub fn write_tar_gz(path: &Path, entries: &[(&str, &[u8])]) {
    let file = std::fs::File::create(path).unwrap();
    let encoder = flate2::write::GzEncoder::new(file, flate2::Compression::fast());
    let mut builder = tar::Builder::new(encoder);
    for (name, data) in entries {
        let mut header = tar::Header::new_gnu();
        header.set_size(data.len() as u64);
        header.set_mode(0o755);
        header.set_cksum();
        builder.append_data(&mut header, name, *data).unwrap();
    }
    builder.into_inner().unwrap().finish().unwrap();
}

/// Relative path (forward slashes) to contents for every file under `dir`.
pub fn snapshot_tree(dir: &Path) -> BTreeMap<String, Vec<u8>> {
    walkdir::WalkDir::new(dir)
        .into_iter()
        .filter_map(Result::ok)
        .filter(|entry| entry.file_type().is_file())
        .map(|entry| {
            let rel = entry
                .path()
                .strip_prefix(dir)
                .unwrap()
                .components()
                .map(|c| c.as_os_str().to_string_lossy().to_string())
                .collect::<Vec<_>>()
                .join("/");
            (rel, std::fs::read(entry.path()).unwrap())
        })
        .collect()
}

// ── HTTP ────────────────────────────────────────────

#[derive(Debug, Clone)]
pub struct Route {
    pub status: u16,
    pub body: Vec<u8>,
    /// When set, the body is written in small chunks with this pause between.
    pub chunk_delay: Option<Duration>,
}

impl Route {
    pub fn ok(body: impl Into<Vec<u8>>) -> Self {
        Self {
            status: 200,
            body: body.into(),
            chunk_delay: None,
        }
    }

    pub fn status(status: u16) -> Self {
        Self {
            status,
            body: Vec::new(),
            chunk_delay: None,
        }
    }

    pub fn slow(body: impl Into<Vec<u8>>, chunk_delay: Duration) -> Self {
        Self {
            status: 200,
            body: body.into(),
            chunk_delay: Some(chunk_delay),
        }
    }
}

/// Serve `routes` (keyed by request path) until the test ends. Unknown
/// paths get 404. Returns the base URL without trailing slash.
pub async fn serve_routes(routes: HashMap<String, Route>) -> String {
    serve_routes_on(0, routes).await
}

/// Like [`serve_routes`] but on a chosen local port (`0` picks one).
pub async fn serve_routes_on(port: u16, routes: HashMap<String, Route>) -> String {
    let listener = TcpListener::bind(("127.0.0.1", port)).await.unwrap();
    let addr = listener.local_addr().unwrap();
    let routes = Arc::new(routes);

    tokio::spawn(async move {
        loop {
            let Ok((mut socket, _)) = listener.accept().await else {
                return;
            };
            let routes = Arc::clone(&routes);
            tokio::spawn(async move {
                let mut buf = vec![0u8; 4096];
                let mut read = 0;
                while !buf[..read].windows(4).any(|w| w == b"\r\n\r\n") {
                    match socket.read(&mut buf[read..]).await {
                        Ok(0) | Err(_) => return,
                        Ok(n) => read += n,
                    }
                    if read == buf.len() {
                        return;
                    }
                }
                let request = String::from_utf8_lossy(&buf[..read]).to_string();
                let mut parts = request.split_whitespace();
                let method = parts.next().unwrap_or("GET").to_string();
                let path = parts.next().unwrap_or("/").to_string();

                let route = routes.get(&path).cloned().unwrap_or(Route::status(404));
                let head = format!(
                    "HTTP/1.1 {} X\r\nContent-Length: {}\r\nConnection: close\r\n\r\n",
                    route.status,
                    route.body.len()
                );
                if socket.write_all(head.as_bytes()).await.is_err() {
                    return;
                }
                if method != "HEAD" {
                    match route.chunk_delay {
                        None => {
                            let _ = socket.write_all(&route.body).await;
                        }
                        Some(delay) => {
                            for chunk in route.body.chunks(1024) {
                                if socket.write_all(chunk).await.is_err() {
                                    return;
                                }
                                let _ = socket.flush().await;
                                tokio::time::sleep(delay).await;
                            }
                        }
                    }
                }
                let _ = socket.shutdown().await;
            });
        }
    });

    format!("http://{addr}")
}

/// Serve one fixed response for every path; returns the full URL of `/`.
pub async fn serve_fixed(status: u16, body: Vec<u8>) -> String {
    let route = Route {
        status,
        body,
        chunk_delay: None,
    };
    let base = serve_routes(HashMap::from([("/".to_string(), route)])).await;
    format!("{base}/")
}

/// A port nobody listens on.
pub fn closed_port() -> u16 {
    let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
    listener.local_addr().unwrap().port()
}
