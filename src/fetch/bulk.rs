use crate::config::source_registry::SourceConfig;
use crate::fetch::error::FetchError;
use crate::orchestrator::cancellation::CancellationToken;
use flate2::read::GzDecoder;
use log::{debug, info};
use reqwest::blocking::Client;
use sha2::{Digest, Sha256};
use std::fs::{self, File};
use std::io::{Read, Write};
use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime};

const CHUNK_SIZE: usize = 1024 * 1024;

/// Downloads whole-dataset files into an on-disk cache keyed by source and
/// URL hash, with a modification-time TTL. Gzipped files are decompressed
/// to a sibling path on first use.
pub struct BulkFetcher {
    cache_root: PathBuf,
    client: Client,
}

impl BulkFetcher {
    pub fn new(cache_root: PathBuf) -> Result<Self, FetchError> {
        fs::create_dir_all(&cache_root)?;
        let client = Client::builder()
            .user_agent(concat!("nephrogene/", env!("CARGO_PKG_VERSION")))
            .timeout(Duration::from_secs(600))
            .build()
            .expect("Building HTTP client failed");
        Ok(BulkFetcher { cache_root, client })
    }

    /// Cache filename: `<source>_<url_hash12>.<format>`.
    fn cache_path(&self, source: &str, url: &str) -> PathBuf {
        let digest = Sha256::digest(url.as_bytes());
        let hash12: String = digest.iter().take(6).map(|b| format!("{b:02x}")).collect();
        let format = url_format(url);
        self.cache_root.join(format!("{source}_{hash12}.{format}"))
    }

    /// Returns the local path of the bulk file for `source`, downloading
    /// when the cached copy is absent or older than the TTL. For `.gz`
    /// URLs the returned path is the decompressed sibling.
    pub fn download(
        &self,
        source: &SourceConfig,
        url: &str,
        ttl_hours: u64,
        token: &CancellationToken,
    ) -> Result<PathBuf, FetchError> {
        let path = self.cache_path(&source.name, url);

        if is_fresh(&path, ttl_hours)? {
            debug!("Bulk cache hit for {}: {}", source.name, path.display());
        } else {
            self.stream_to_disk(url, &path, token)?;
        }

        if path.extension().and_then(|e| e.to_str()) == Some("gz") {
            return self.decompressed_sibling(&path);
        }
        Ok(path)
    }

    fn stream_to_disk(
        &self,
        url: &str,
        path: &Path,
        token: &CancellationToken,
    ) -> Result<(), FetchError> {
        info!("Downloading bulk file {url} to {}", path.display());
        let mut response = self.client.get(url).send()?;
        let status = response.status();
        if !status.is_success() {
            return Err(FetchError::Status {
                status: status.as_u16(),
                url: url.to_string(),
            });
        }

        let tmp_path = path.with_extension("part");
        let mut out = File::create(&tmp_path)?;
        let mut buffer = vec![0u8; CHUNK_SIZE];
        let mut total = 0u64;
        loop {
            if token.is_cancelled() {
                drop(out);
                let _ = fs::remove_file(&tmp_path);
                return Err(FetchError::Cancelled);
            }
            let read = response.read(&mut buffer)?;
            if read == 0 {
                break;
            }
            out.write_all(&buffer[..read])?;
            total += read as u64;
        }
        out.flush()?;
        drop(out);
        fs::rename(&tmp_path, path)?;
        info!("Downloaded {total} bytes to {}", path.display());
        Ok(())
    }

    fn decompressed_sibling(&self, gz_path: &Path) -> Result<PathBuf, FetchError> {
        let plain_path = gz_path.with_extension("");
        let gz_mtime = fs::metadata(gz_path)?.modified()?;
        if plain_path.exists() && fs::metadata(&plain_path)?.modified()? >= gz_mtime {
            return Ok(plain_path);
        }

        debug!("Decompressing {} ", gz_path.display());
        let mut decoder = GzDecoder::new(File::open(gz_path)?);
        let tmp_path = plain_path.with_extension("part");
        let mut out = File::create(&tmp_path)?;
        std::io::copy(&mut decoder, &mut out)?;
        drop(out);
        fs::rename(&tmp_path, &plain_path)?;
        Ok(plain_path)
    }
}

fn is_fresh(path: &Path, ttl_hours: u64) -> Result<bool, FetchError> {
    if !path.exists() {
        return Ok(false);
    }
    let modified = fs::metadata(path)?.modified()?;
    let age = SystemTime::now()
        .duration_since(modified)
        .unwrap_or(Duration::ZERO);
    Ok(age < Duration::from_secs(ttl_hours * 3600))
}

/// File format suffix derived from the URL path, query stripped. Compound
/// suffixes like `.gct.gz` keep only the final two segments.
fn url_format(url: &str) -> String {
    let path = url.split(['?', '#']).next().unwrap_or(url);
    let file_name = path.rsplit('/').next().unwrap_or(path);
    let mut parts: Vec<&str> = file_name.split('.').collect();
    if parts.len() >= 3 && parts.last() == Some(&"gz") {
        return format!("{}.gz", parts[parts.len() - 2]);
    }
    if parts.len() >= 2 {
        return parts.pop().unwrap().to_string();
    }
    "dat".to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::source_registry::{SourceCategory, SourceConfig};
    use flate2::Compression;
    use flate2::write::GzEncoder;
    use mockito::Server;
    use rstest::{fixture, rstest};
    use tempfile::TempDir;

    #[fixture]
    fn temp_dir() -> TempDir {
        tempfile::tempdir().expect("Failed to create temporary directory")
    }

    fn bulk_source(name: &str) -> SourceConfig {
        SourceConfig {
            name: name.to_string(),
            display_name: name.to_string(),
            category: SourceCategory::BulkFile,
            rate_limit_per_sec: 1,
            max_retries: 1,
            cache_ttl_hours: 24,
            bulk_url: None,
            api_key_env: None,
            capabilities: vec![],
            scoring_track: None,
            retired: false,
        }
    }

    #[rstest]
    #[case("https://example.org/data/submissions.tsv", "gencc", "gencc_")]
    #[case("https://example.org/dl?f=x", "clingen", "clingen_")]
    fn test_cache_path_shape(#[case] url: &str, #[case] source: &str, #[case] prefix: &str) {
        let temp = tempfile::tempdir().unwrap();
        let fetcher = BulkFetcher::new(temp.path().to_path_buf()).unwrap();
        let path = fetcher.cache_path(source, url);
        let file_name = path.file_name().unwrap().to_str().unwrap();
        assert!(file_name.starts_with(prefix));
        // 12 hex chars of the URL hash sit between the prefix and the format.
        let hash = &file_name[prefix.len()..prefix.len() + 12];
        assert!(hash.chars().all(|c| c.is_ascii_hexdigit()));
    }

    #[rstest]
    #[case("https://example.org/a/metrics.tsv", "tsv")]
    #[case("https://example.org/a/medians.gct.gz", "gct.gz")]
    #[case("https://example.org/download/action/export-tsv", "dat")]
    #[case("https://example.org/file.json?version=2", "json")]
    fn test_url_format(#[case] url: &str, #[case] expected: &str) {
        assert_eq!(url_format(url), expected);
    }

    #[rstest]
    fn test_download_and_mtime_cache(temp_dir: TempDir) {
        let mut server = Server::new();
        let mock = server
            .mock("GET", "/genes.tsv")
            .with_status(200)
            .with_body("symbol\tcount\nPKD1\t3\n")
            .expect(1)
            .create();

        let fetcher = BulkFetcher::new(temp_dir.path().to_path_buf()).unwrap();
        let source = bulk_source("literature");
        let url = format!("{}/genes.tsv", server.url());
        let token = CancellationToken::new();

        let first = fetcher.download(&source, &url, 24, &token).unwrap();
        let second = fetcher.download(&source, &url, 24, &token).unwrap();

        mock.assert();
        assert_eq!(first, second);
        assert_eq!(
            fs::read_to_string(&first).unwrap(),
            "symbol\tcount\nPKD1\t3\n"
        );
    }

    #[rstest]
    fn test_expired_cache_is_refetched(temp_dir: TempDir) {
        let mut server = Server::new();
        let mock = server
            .mock("GET", "/genes.tsv")
            .with_status(200)
            .with_body("fresh")
            .expect(2)
            .create();

        let fetcher = BulkFetcher::new(temp_dir.path().to_path_buf()).unwrap();
        let source = bulk_source("literature");
        let url = format!("{}/genes.tsv", server.url());
        let token = CancellationToken::new();

        fetcher.download(&source, &url, 0, &token).unwrap();
        fetcher.download(&source, &url, 0, &token).unwrap();
        mock.assert();
    }

    #[rstest]
    fn test_gz_is_decompressed_to_sibling(temp_dir: TempDir) {
        let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
        encoder.write_all(b"Name\tKidney - Cortex\nPKD1\t42.0\n").unwrap();
        let gz_body = encoder.finish().unwrap();

        let mut server = Server::new();
        server
            .mock("GET", "/medians.gct.gz")
            .with_status(200)
            .with_body(gz_body)
            .create();

        let fetcher = BulkFetcher::new(temp_dir.path().to_path_buf()).unwrap();
        let source = bulk_source("gtex");
        let url = format!("{}/medians.gct.gz", server.url());
        let token = CancellationToken::new();

        let path = fetcher.download(&source, &url, 24, &token).unwrap();
        assert!(!path.to_str().unwrap().ends_with(".gz"));
        assert_eq!(
            fs::read_to_string(&path).unwrap(),
            "Name\tKidney - Cortex\nPKD1\t42.0\n"
        );
    }

    #[rstest]
    fn test_failed_download_leaves_no_file(temp_dir: TempDir) {
        let mut server = Server::new();
        server.mock("GET", "/genes.tsv").with_status(500).create();

        let fetcher = BulkFetcher::new(temp_dir.path().to_path_buf()).unwrap();
        let source = bulk_source("clingen");
        let url = format!("{}/genes.tsv", server.url());
        let token = CancellationToken::new();

        assert!(fetcher.download(&source, &url, 24, &token).is_err());
        assert_eq!(fs::read_dir(temp_dir.path()).unwrap().count(), 0);
    }
}
