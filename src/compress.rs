//! gzip encoding for response bodies.

use flate2::write::GzEncoder;
use flate2::Compression;
use std::io::{self, Write};

/// Compress `input` into a gzip container
pub fn gzip(input: &[u8]) -> io::Result<Vec<u8>> {
    let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
    encoder.write_all(input)?;
    encoder.finish()
}

/// Whether an `Accept-Encoding` value lists gzip with a non-zero quality
pub fn accepts_gzip(accept_encoding: &str) -> bool {
    accept_encoding.split(',').any(|entry| {
        let mut params = entry.split(';').map(str::trim);
        let coding = params.next().unwrap_or_default();
        if !coding.eq_ignore_ascii_case("gzip") {
            return false;
        }
        !params.any(|param| {
            param
                .strip_prefix("q=")
                .and_then(|q| q.parse::<f32>().ok())
                .is_some_and(|q| q == 0.0)
        })
    })
}
