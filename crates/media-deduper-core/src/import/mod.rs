//! Serialized ingestion of local files and remote URLs.
//!
//! An [`ImportJob`] moves `Waiting -> Importing -> terminal`. Once importing it
//! resolves its source (downloading remote ones), registers the file with the
//! store, fingerprints it, rejects exact duplicates and finally reports
//! similar items. [`ImporterThread`] runs jobs one at a time in FIFO order.
mod download;
mod importer;
mod job;
mod pipeline;

pub use download::download;
pub use importer::{ImportEvent, ImportListener, ImporterThread};
pub use job::{ImportJob, ImportSource, ImportStatus, JobId, JobRef, INDETERMINATE};

#[cfg(test)]
pub(crate) mod test_server {
    use std::io::{BufRead, BufReader, Write};
    use std::net::TcpListener;

    /// Serve one HTTP response on a local port and return the URL for `name`
    pub fn serve_once(status: &str, body: Vec<u8>, name: &str) -> String {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();
        let status = status.to_string();

        std::thread::spawn(move || {
            let (stream, _) = listener.accept().unwrap();
            let mut reader = BufReader::new(stream);
            let mut line = String::new();
            // Read the request head
            while reader.read_line(&mut line).unwrap() > 0 {
                if line == "\r\n" {
                    break;
                }
                line.clear();
            }
            let mut stream = reader.into_inner();
            let head = format!(
                "HTTP/1.1 {}\r\nContent-Length: {}\r\nConnection: close\r\n\r\n",
                status,
                body.len()
            );
            // The client may hang up early on error statuses
            let _ = stream.write_all(head.as_bytes());
            let _ = stream.write_all(&body);
        });

        format!("http://{}/files/{}", addr, name)
    }
}
