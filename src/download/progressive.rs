//! Progressive file strategy
//!
//! Streams a single media file over HTTP into the staging file in fixed-size
//! chunks, reporting progress as it goes.

use super::{Deadline, Strategy, TransferProgress, TransportError};
use std::fs::File;
use std::io::{BufWriter, Read, Write};
use std::path::Path;
use std::time::Duration;

/// Size of each read from the response body
const CHUNK_SIZE: usize = 64 * 1024;

/// Bytes inspected to verify the payload is a video container
const SNIFF_SIZE: usize = 8192;

/// Progress interval when the total size is unknown
const UNKNOWN_SIZE_REPORT_INTERVAL: u64 = 1024 * 1024;

/// Episode download as a plain HTTP file transfer
pub struct ProgressiveStrategy {
    client: reqwest::blocking::Client,
}

impl ProgressiveStrategy {
    /// Creates a new strategy; `connect_timeout` bounds connection setup
    pub fn new(connect_timeout: Duration) -> Result<Self, TransportError> {
        let client = reqwest::blocking::Client::builder()
            .connect_timeout(connect_timeout)
            // Each request carries the remaining episode budget instead
            .timeout(None)
            .build()
            .map_err(|e| TransportError::Request {
                url: String::new(),
                source: e,
            })?;

        Ok(Self { client })
    }
}

impl Strategy for ProgressiveStrategy {
    fn name(&self) -> &'static str {
        "progressive"
    }

    fn fetch(
        &self,
        source: &str,
        destination: &Path,
        deadline: &Deadline,
        progress: &mut dyn FnMut(TransferProgress),
    ) -> Result<(), TransportError> {
        let mut response = self
            .client
            .get(source)
            .timeout(deadline.remaining())
            .send()
            .map_err(|e| request_error(source, e, deadline))?;

        // Check HTTP status
        if !response.status().is_success() {
            return Err(TransportError::HttpStatus {
                url: source.to_string(),
                status: response.status().as_u16(),
            });
        }

        // Get content length for progress reporting
        let total = response.content_length();

        let write_error = |e: std::io::Error| TransportError::Write {
            path: destination.to_path_buf(),
            source: e,
        };
        let mut file = BufWriter::new(File::create(destination).map_err(write_error)?);

        let mut downloaded: u64 = 0;
        let mut buffer = vec![0u8; CHUNK_SIZE];
        let mut head: Vec<u8> = Vec::with_capacity(SNIFF_SIZE);
        let mut last_percent = None;
        let mut last_report = 0;

        progress(TransferProgress::Bytes { downloaded, total });

        loop {
            deadline.check()?;

            let bytes_read = response.read(&mut buffer).map_err(|e| {
                if deadline.is_expired() {
                    deadline.timeout_error()
                } else {
                    TransportError::Interrupted {
                        url: source.to_string(),
                        source: e,
                    }
                }
            })?;

            if bytes_read == 0 {
                break; // EOF
            }

            if head.len() < SNIFF_SIZE {
                let take = (SNIFF_SIZE - head.len()).min(bytes_read);
                head.extend_from_slice(&buffer[..take]);
            }

            file.write_all(&buffer[..bytes_read]).map_err(write_error)?;
            downloaded += bytes_read as u64;

            // Report on every whole percent, or every megabyte without a total
            let report = match total {
                Some(total) if total > 0 => {
                    let percent = downloaded * 100 / total;
                    let changed = last_percent != Some(percent);
                    last_percent = Some(percent);
                    changed
                }
                _ => downloaded - last_report >= UNKNOWN_SIZE_REPORT_INTERVAL,
            };
            if report {
                last_report = downloaded;
                progress(TransferProgress::Bytes { downloaded, total });
            }
        }

        file.flush().map_err(write_error)?;

        if let Some(expected) = total {
            if expected != downloaded {
                return Err(TransportError::SizeMismatch {
                    expected,
                    received: downloaded,
                });
            }
        }

        if !infer::is_video(&head) {
            let detected = infer::get(&head)
                .map(|kind| kind.mime_type().to_string())
                .unwrap_or_else(|| "unknown content".to_string());
            return Err(TransportError::NotMedia(detected));
        }

        Ok(())
    }
}

fn request_error(url: &str, error: reqwest::Error, deadline: &Deadline) -> TransportError {
    if error.is_timeout() && deadline.is_expired() {
        return deadline.timeout_error();
    }

    TransportError::Request {
        url: url.to_string(),
        source: error,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::{BufRead, BufReader};
    use std::net::TcpListener;
    use std::thread;

    /// Minimal mp4 header followed by filler
    fn mp4_payload(size: usize) -> Vec<u8> {
        let mut payload = vec![
            0x00, 0x00, 0x00, 0x18, b'f', b't', b'y', b'p', b'm', b'p', b'4', b'2', 0x00, 0x00,
            0x00, 0x00, b'm', b'p', b'4', b'2', b'i', b's', b'o', b'm',
        ];
        payload.resize(size, 0xAB);
        payload
    }

    /// Serves a single raw HTTP response on a local port
    fn serve_once(head: String, body: Vec<u8>) -> String {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let address = listener.local_addr().unwrap();

        thread::spawn(move || {
            let (mut stream, _) = listener.accept().unwrap();
            let mut reader = BufReader::new(stream.try_clone().unwrap());
            let mut line = String::new();
            while reader.read_line(&mut line).unwrap() > 0 {
                if line == "\r\n" {
                    break;
                }
                line.clear();
            }
            let _ = stream.write_all(head.as_bytes());
            let _ = stream.write_all(&body);
            let _ = stream.flush();
        });

        format!("http://{address}/abyss/3.mp4")
    }

    fn ok_response(content_length: usize, body: Vec<u8>) -> String {
        serve_once(
            format!(
                "HTTP/1.1 200 OK\r\nContent-Type: video/mp4\r\nContent-Length: {content_length}\r\nConnection: close\r\n\r\n"
            ),
            body,
        )
    }

    fn fetch(url: &str, destination: &Path) -> (Result<(), TransportError>, Vec<TransferProgress>) {
        let strategy = ProgressiveStrategy::new(Duration::from_secs(5)).unwrap();
        let mut updates = Vec::new();
        let result = strategy.fetch(
            url,
            destination,
            &Deadline::after(Duration::from_secs(30)),
            &mut |update| updates.push(update),
        );
        (result, updates)
    }

    #[test]
    fn test_download_complete_file() {
        let payload = mp4_payload(300 * 1024);
        let url = ok_response(payload.len(), payload.clone());
        let dir = tempfile::tempdir().unwrap();
        let destination = dir.path().join("out.mp4.part");

        let (result, updates) = fetch(&url, &destination);

        result.unwrap();
        assert_eq!(std::fs::read(&destination).unwrap(), payload);
        assert_eq!(
            updates.last(),
            Some(&TransferProgress::Bytes {
                downloaded: payload.len() as u64,
                total: Some(payload.len() as u64)
            })
        );
    }

    #[test]
    fn test_http_error_status() {
        let url = serve_once(
            "HTTP/1.1 404 Not Found\r\nContent-Length: 0\r\nConnection: close\r\n\r\n".to_string(),
            Vec::new(),
        );
        let dir = tempfile::tempdir().unwrap();

        let (result, _) = fetch(&url, &dir.path().join("out.mp4.part"));

        assert!(matches!(result, Err(TransportError::HttpStatus { status: 404, .. })));
    }

    #[test]
    fn test_truncated_body_fails() {
        let payload = mp4_payload(4096);
        let url = ok_response(payload.len() * 2, payload);
        let dir = tempfile::tempdir().unwrap();

        let (result, _) = fetch(&url, &dir.path().join("out.mp4.part"));

        assert!(matches!(
            result,
            Err(TransportError::Interrupted { .. } | TransportError::SizeMismatch { .. })
        ));
    }

    #[test]
    fn test_html_payload_is_not_media() {
        let body = b"<html><body>Video removed</body></html>".to_vec();
        let url = ok_response(body.len(), body);
        let dir = tempfile::tempdir().unwrap();

        let (result, _) = fetch(&url, &dir.path().join("out.mp4.part"));

        assert!(matches!(result, Err(TransportError::NotMedia(_))));
    }
}
