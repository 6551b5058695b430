use log::{debug, info};
use reqwest::blocking::Client;
use reqwest::Url;
use std::fs::{self, File, OpenOptions};
use std::io::{self, Read, Write};
use std::path::{Path, PathBuf};

use crate::error::{Error, Result};
use crate::logging::log_file_error;
use crate::store::remove_file_if_present;

const CHUNK_SIZE: usize = 64 * 1024;
const FALLBACK_NAME: &str = "download";

/// Download `url` into `dir` and return the path written
///
/// The file name comes from the last URL path segment; on a name clash
/// `" (n)"` is inserted before the extension. `progress` receives the bytes
/// written so far and the expected length when the server sent one. A failed
/// download leaves no file behind.
pub fn download(
    client: &Client,
    url: &str,
    dir: &Path,
    mut progress: impl FnMut(u64, Option<u64>),
) -> Result<PathBuf> {
    let parsed = Url::parse(url).map_err(|e| Error::InvalidUrl(format!("{}: {}", url, e)))?;
    let name = file_name_from_url(&parsed);

    let mut response = client.get(parsed).send()?.error_for_status()?;
    let total = response.content_length();

    fs::create_dir_all(dir)?;
    let (path, mut file) = create_unique(dir, &name)?;
    debug!("Downloading {} to {}", url, path.display());

    if let Err(e) = copy_with_progress(&mut response, &mut file, total, &mut progress) {
        drop(file);
        log_file_error(&path, "download", &e);
        remove_file_if_present(&path)?;
        return Err(e.into());
    }

    info!("Downloaded {} to {}", url, path.display());
    Ok(path)
}

fn copy_with_progress(
    reader: &mut impl Read,
    file: &mut File,
    total: Option<u64>,
    progress: &mut impl FnMut(u64, Option<u64>),
) -> io::Result<()> {
    let mut buffer = vec![0; CHUNK_SIZE];
    let mut written = 0u64;
    progress(0, total);
    loop {
        let n = match reader.read(&mut buffer) {
            Ok(0) => break,
            Ok(n) => n,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(e),
        };
        file.write_all(&buffer[..n])?;
        written += n as u64;
        progress(written, total);
    }
    file.flush()
}

/// Last non-empty path segment of the URL
pub(crate) fn file_name_from_url(url: &Url) -> String {
    url.path_segments()
        .and_then(|segments| segments.filter(|s| !s.is_empty()).last())
        .map(|segment| segment.replace(|c: char| c == '\\' || c == ':', "_"))
        .filter(|name| name != "." && name != "..")
        .unwrap_or_else(|| FALLBACK_NAME.to_string())
}

/// `name` with `" (n)"` inserted before the extension; `n == 0` is the name itself
pub(crate) fn numbered_name(name: &str, n: u32) -> String {
    if n == 0 {
        return name.to_string();
    }
    let path = Path::new(name);
    let stem = path
        .file_stem()
        .and_then(|s| s.to_str())
        .unwrap_or(name);
    match path.extension().and_then(|e| e.to_str()) {
        Some(ext) => format!("{} ({}).{}", stem, n, ext),
        None => format!("{} ({})", stem, n),
    }
}

/// Create a file in `dir` under the first free numbered variant of `name`
fn create_unique(dir: &Path, name: &str) -> Result<(PathBuf, File)> {
    let mut n = 0;
    loop {
        let candidate = dir.join(numbered_name(name, n));
        match OpenOptions::new().write(true).create_new(true).open(&candidate) {
            Ok(file) => return Ok((candidate, file)),
            Err(e) if e.kind() == io::ErrorKind::AlreadyExists => n += 1,
            Err(e) => {
                log_file_error(&candidate, "create", &e);
                return Err(e.into());
            }
        }
    }
}
