//! Model weight acquisition with an on-disk cache.

use std::{
    fs,
    io::{self, Read, Write},
    path::{Path, PathBuf},
    time::Duration,
};

use anyhow::{Context, Result, anyhow, bail};
use reqwest::blocking::Client;
use tracing::{debug, info};

/// Source of serialized model parameters.
pub trait ModelStore: Send + Sync {
    /// Return the parameter blob for `identifier`, using `cache_dir` for any
    /// local caching. `cache_dir` is created when missing.
    fn fetch(&self, identifier: &str, cache_dir: &Path) -> Result<Vec<u8>>;
}

/// Resolves identifiers as local files first, then as HTTP(S) URLs whose
/// downloads are cached by file name.
#[derive(Clone, Debug)]
pub struct HttpModelStore {
    client: Client,
}

impl HttpModelStore {
    pub fn new() -> Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(30 * 60))
            .build()
            .context("failed to build HTTP client")?;
        Ok(Self { client })
    }
}

impl ModelStore for HttpModelStore {
    fn fetch(&self, identifier: &str, cache_dir: &Path) -> Result<Vec<u8>> {
        fs::create_dir_all(cache_dir)
            .with_context(|| format!("failed to create cache dir {}", cache_dir.display()))?;

        let local = Path::new(identifier);
        if local.is_file() {
            debug!("Reading model parameters from {}", local.display());
            return fs::read(local)
                .with_context(|| format!("failed to read model file {}", local.display()));
        }

        let cached = cached_path(identifier, cache_dir)?;
        if cached.is_file() {
            info!("Using cached model {}", cached.display());
            return fs::read(&cached)
                .with_context(|| format!("failed to read cached model {}", cached.display()));
        }

        if !(identifier.starts_with("http://") || identifier.starts_with("https://")) {
            bail!("model identifier {identifier:?} is neither a file nor an http(s) URL");
        }

        info!("Downloading model from {identifier}");
        let response = self
            .client
            .get(identifier)
            .send()
            .with_context(|| format!("request to {identifier} failed"))?;
        if !response.status().is_success() {
            bail!("model server responded with {}", response.status());
        }
        let written = download_into(&cached, response)?;
        info!("Cached {written} bytes at {}", cached.display());
        fs::read(&cached)
            .with_context(|| format!("failed to read cached model {}", cached.display()))
    }
}

/// Cache location for a URL: `cache_dir/<last path segment>`.
pub fn cached_path(identifier: &str, cache_dir: &Path) -> Result<PathBuf> {
    let trimmed = identifier
        .split(['?', '#'])
        .next()
        .unwrap_or(identifier)
        .trim_end_matches('/');
    let name = trimmed
        .rsplit('/')
        .next()
        .filter(|name| !name.is_empty() && !name.contains(':'))
        .ok_or_else(|| anyhow!("cannot derive a cache file name from {identifier:?}"))?;
    Ok(cache_dir.join(name))
}

/// Stream `body` into a sibling temp file and move it to `dest` once
/// complete. An interrupted stream leaves neither `dest` nor the temp file.
fn download_into(dest: &Path, mut body: impl Read) -> Result<u64> {
    let dir = dest
        .parent()
        .ok_or_else(|| anyhow!("cache path {} has no parent", dest.display()))?;
    let mut tmp = tempfile::NamedTempFile::new_in(dir)
        .with_context(|| format!("failed to create temp file in {}", dir.display()))?;
    let written = io::copy(&mut body, &mut tmp).context("failed to read model response body")?;
    tmp.flush()?;
    tmp.persist(dest)
        .map_err(|err| err.error)
        .with_context(|| format!("failed to move download into {}", dest.display()))?;
    Ok(written)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cache_name_is_last_url_segment() {
        let dir = Path::new("/cache");
        let path = cached_path("https://example.com/models/sharp_2572gikvuh.pt?x=1", dir).unwrap();
        assert_eq!(path, dir.join("sharp_2572gikvuh.pt"));
    }

    #[test]
    fn bare_scheme_has_no_cache_name() {
        assert!(cached_path("https://", Path::new("/cache")).is_err());
    }

    #[test]
    fn local_files_are_read_directly_and_cache_dir_is_created() {
        let dir = tempfile::tempdir().unwrap();
        let weights = dir.path().join("weights.pt");
        fs::write(&weights, b"params").unwrap();
        let cache = dir.path().join("nested").join("cache");

        let store = HttpModelStore::new().unwrap();
        let bytes = store.fetch(weights.to_str().unwrap(), &cache).unwrap();
        assert_eq!(bytes, b"params");
        assert!(cache.is_dir());
    }

    #[test]
    fn cached_downloads_are_reused_without_network() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("model.pt"), b"cached").unwrap();

        let store = HttpModelStore::new().unwrap();
        let bytes = store
            .fetch("https://invalid.example/models/model.pt", dir.path())
            .unwrap();
        assert_eq!(bytes, b"cached");
    }

    #[test]
    fn unknown_identifiers_fail() {
        let dir = tempfile::tempdir().unwrap();
        let store = HttpModelStore::new().unwrap();
        assert!(store.fetch("no-such-model", dir.path()).is_err());
    }

    struct BrokenPipe {
        sent: usize,
    }

    impl Read for BrokenPipe {
        fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
            if self.sent >= 8 {
                return Err(io::Error::new(io::ErrorKind::ConnectionReset, "peer went away"));
            }
            let n = buf.len().min(4);
            buf[..n].fill(7);
            self.sent += n;
            Ok(n)
        }
    }

    #[test]
    fn downloads_stream_into_place() {
        let dir = tempfile::tempdir().unwrap();
        let dest = dir.path().join("weights.pt");
        let body = vec![42u8; 300_000];
        let written = download_into(&dest, io::Cursor::new(&body)).unwrap();
        assert_eq!(written, body.len() as u64);
        assert_eq!(fs::read(&dest).unwrap(), body);
        assert_eq!(fs::read_dir(dir.path()).unwrap().count(), 1);
    }

    #[test]
    fn interrupted_downloads_leave_nothing_behind() {
        let dir = tempfile::tempdir().unwrap();
        let dest = dir.path().join("weights.pt");
        assert!(download_into(&dest, BrokenPipe { sent: 0 }).is_err());
        assert!(!dest.exists());
        assert_eq!(fs::read_dir(dir.path()).unwrap().count(), 0);
    }

    #[test]
    fn http_downloads_are_cached_for_the_next_fetch() {
        use std::{io::BufRead, net::TcpListener, thread};

        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let port = listener.local_addr().unwrap().port();
        let server = thread::spawn(move || {
            let (stream, _) = listener.accept().unwrap();
            let mut reader = io::BufReader::new(stream.try_clone().unwrap());
            let mut line = String::new();
            while reader.read_line(&mut line).unwrap() > 2 {
                line.clear();
            }
            let mut stream = stream;
            stream
                .write_all(b"HTTP/1.1 200 OK\r\nContent-Length: 7\r\nConnection: close\r\n\r\nweights")
                .unwrap();
        });

        let dir = tempfile::tempdir().unwrap();
        let url = format!("http://127.0.0.1:{port}/models/net.pt");
        let store = HttpModelStore {
            client: Client::builder().no_proxy().build().unwrap(),
        };
        assert_eq!(store.fetch(&url, dir.path()).unwrap(), b"weights");
        server.join().unwrap();

        assert_eq!(fs::read(dir.path().join("net.pt")).unwrap(), b"weights");
        // The listener is gone, so this can only be served from the cache.
        assert_eq!(store.fetch(&url, dir.path()).unwrap(), b"weights");
    }
}
