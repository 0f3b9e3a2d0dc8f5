use log::debug;
use reqwest::blocking::Client;
use std::time::Duration;

use crate::cache::Cache;
use crate::error::{StatusOr, TimelapseError};

/// Where full-frame tile snapshots are served from
pub const DEFAULT_BASE_URL: &str = "https://garlic-bread.reddit.com/media/canvas-images/full-frame";

/// Anything that can resolve a tile snapshot to its raw image bytes.
///
/// Shared by every frame worker at once.
pub trait TileSource: Send + Sync {
    fn fetch(&self, tile_index: usize, fragment: &str) -> StatusOr<Vec<u8>>;
}

/// Build the URL of one tile snapshot
pub fn tile_url(base_url: &str, tile_index: usize, fragment: &str) -> String {
    format!("{}/{}/{}", base_url.trim_end_matches('/'), tile_index, fragment)
}

/// Fetches tiles over HTTP, optionally through an on-disk cache
pub struct HttpTileSource {
    base_url: String,
    client: Client,
    cache: Option<Cache>,
}

impl HttpTileSource {
    pub fn new(base_url: impl Into<String>) -> StatusOr<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(60))
            .build()
            .map_err(|e| TimelapseError::ConfigError(format!("Failed to build HTTP client: {}", e)))?;

        Ok(Self {
            base_url: base_url.into(),
            client,
            cache: None,
        })
    }

    pub fn with_cache(mut self, cache: Cache) -> Self {
        self.cache = Some(cache);
        self
    }

    fn download(&self, url: &str) -> StatusOr<Vec<u8>> {
        let fetch_error = |reason: String| TimelapseError::FetchError {
            url: url.to_string(),
            reason,
        };

        let response = self
            .client
            .get(url)
            .send()
            .map_err(|e| fetch_error(e.to_string()))?;

        if !response.status().is_success() {
            return Err(fetch_error(format!("HTTP {}", response.status())));
        }

        let data = response.bytes().map_err(|e| fetch_error(e.to_string()))?;
        Ok(data.to_vec())
    }
}

impl TileSource for HttpTileSource {
    fn fetch(&self, tile_index: usize, fragment: &str) -> StatusOr<Vec<u8>> {
        let url = tile_url(&self.base_url, tile_index, fragment);

        if let Some(cache) = &self.cache {
            if let Some(data) = cache.read(&url)? {
                debug!("Using cached tile {}", url);
                return Ok(data);
            }
        }

        debug!("Downloading tile {}", url);
        let data = self.download(&url)?;

        if let Some(cache) = &self.cache {
            cache.store(&url, &data)?;
        }

        Ok(data)
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use std::io::{BufRead, BufReader, Read, Write};
    use std::net::{TcpListener, TcpStream};
    use std::thread::{self, JoinHandle};

    /// Answer one connection per canned `(status, body)` on a local port.
    ///
    /// Returns the server's base URL and a handle yielding the request bodies
    /// it received, in order.
    pub(crate) fn serve_responses(responses: Vec<(u16, Vec<u8>)>) -> (String, JoinHandle<Vec<String>>) {
        let listener = TcpListener::bind("127.0.0.1:0").expect("bind");
        let addr = listener.local_addr().expect("local addr");

        let handle = thread::spawn(move || {
            let mut requests = Vec::new();
            for (status, body) in responses {
                let (mut stream, _) = listener.accept().expect("accept");
                requests.push(read_request_body(&stream));

                let reason = if status < 400 { "OK" } else { "Error" };
                write!(
                    stream,
                    "HTTP/1.1 {} {}\r\nContent-Length: {}\r\nConnection: close\r\n\r\n",
                    status,
                    reason,
                    body.len()
                )
                .expect("write head");
                stream.write_all(&body).expect("write body");
                stream.flush().expect("flush");
            }
            requests
        });

        (format!("http://{}", addr), handle)
    }

    fn read_request_body(stream: &TcpStream) -> String {
        let mut reader = BufReader::new(stream);
        let mut content_length = 0;
        loop {
            let mut line = String::new();
            reader.read_line(&mut line).expect("read header");
            let line = line.trim_end();
            if line.is_empty() {
                break;
            }
            if let Some((name, value)) = line.split_once(':') {
                if name.eq_ignore_ascii_case("content-length") {
                    content_length = value.trim().parse().expect("content length");
                }
            }
        }
        let mut body = vec![0; content_length];
        reader.read_exact(&mut body).expect("read body");
        String::from_utf8_lossy(&body).into_owned()
    }

    #[test]
    fn test_tile_url() {
        assert_eq!(
            tile_url(DEFAULT_BASE_URL, 3, "abc-1.png"),
            "https://garlic-bread.reddit.com/media/canvas-images/full-frame/3/abc-1.png"
        );
        assert_eq!(tile_url("http://localhost:8000/", 0, "x"), "http://localhost:8000/0/x");
    }

    #[test]
    fn test_cache_hit_skips_network() {
        let dir = tempfile::tempdir().expect("tempdir");
        let cache = Cache::new(dir.path()).expect("cache");
        // Port 9 (discard) is never served, so only the cache can satisfy this
        let base = "http://127.0.0.1:9/full-frame";
        cache
            .store(&tile_url(base, 2, "tile.png"), b"cached")
            .expect("save");

        let source = HttpTileSource::new(base).expect("source").with_cache(cache);
        assert_eq!(source.fetch(2, "tile.png").expect("fetch"), b"cached".to_vec());
    }

    #[test]
    fn test_http_error_is_fetch_error() {
        let (base, server) = serve_responses(vec![(404, b"no such tile".to_vec())]);
        let source = HttpTileSource::new(format!("{}/full-frame", base)).expect("source");

        match source.fetch(1, "gone.png") {
            Err(TimelapseError::FetchError { url, reason }) => {
                assert_eq!(url, format!("{}/full-frame/1/gone.png", base));
                assert!(reason.contains("404"), "{}", reason);
            }
            other => panic!("expected a fetch error, got {:?}", other),
        }
        server.join().expect("server");
    }

    #[test]
    fn test_download_fills_cache() {
        let dir = tempfile::tempdir().expect("tempdir");
        let (base, server) = serve_responses(vec![(200, b"tile bytes".to_vec())]);
        let source = HttpTileSource::new(base.as_str())
            .expect("source")
            .with_cache(Cache::new(dir.path()).expect("cache"));

        assert_eq!(source.fetch(4, "e-4.png").expect("fetch"), b"tile bytes".to_vec());
        server.join().expect("server");

        // The server is gone, so this one has to come from the cache
        assert_eq!(source.fetch(4, "e-4.png").expect("cached"), b"tile bytes".to_vec());
        let cache = Cache::new(dir.path()).expect("cache");
        assert_eq!(
            cache.read(&tile_url(&base, 4, "e-4.png")).expect("read"),
            Some(b"tile bytes".to_vec())
        );
    }
}
