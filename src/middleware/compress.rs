use crate::http::{Request, Response};
use crate::middleware::{Middleware, MiddlewareFuture};
use flate2::write::{DeflateEncoder, GzEncoder};
use flate2::Compression as Level;
use std::io::Write;

#[derive(Clone)]
pub struct CompressionConfig {
    pub level: Level,
    pub min_size: usize,
    pub skip_types: Vec<String>,
}

impl CompressionConfig {
    fn should_compress(&self, content_type: Option<&str>, len: usize) -> bool {
        if len < self.min_size {
            return false;
        }
        if let Some(ct) = content_type {
            if self.skip_types.iter().any(|skip| ct.starts_with(skip)) {
                return false;
            }
        }
        true
    }
}

impl Default for CompressionConfig {
    fn default() -> Self {
        Self {
            level: Level::default(),
            min_size: 1024,
            skip_types: vec![
                "image/".to_string(),
                "video/".to_string(),
                "audio/".to_string(),
                "application/pdf".to_string(),
                "application/zip".to_string(),
            ],
        }
    }
}

/// Compresses the outgoing body during the terminate phase, which runs
/// after the handler settled the response but before the kernel flushes it.
/// Honors the request's Accept-Encoding; gzip is preferred over deflate.
pub struct Compression {
    config: CompressionConfig,
}

impl Compression {
    pub fn new(config: CompressionConfig) -> Self {
        Self { config }
    }
}

impl Default for Compression {
    fn default() -> Self {
        Self::new(CompressionConfig::default())
    }
}

impl Middleware for Compression {
    fn terminate<'a>(&'a self, req: &'a mut Request, res: &'a mut Response) -> MiddlewareFuture<'a> {
        Box::pin(async move {
            let accepted = match req.header("accept-encoding") {
                Some(value) => value.to_ascii_lowercase(),
                None => return Ok(()),
            };
            if !self
                .config
                .should_compress(res.get_header("Content-Type"), res.body_len())
            {
                return Ok(());
            }

            let (encoding, compressed) = if accepted.contains("gzip") {
                let mut encoder = GzEncoder::new(Vec::new(), self.config.level);
                encoder.write_all(res.body_raw())?;
                ("gzip", encoder.finish()?)
            } else if accepted.contains("deflate") {
                let mut encoder = DeflateEncoder::new(Vec::new(), self.config.level);
                encoder.write_all(res.body_raw())?;
                ("deflate", encoder.finish()?)
            } else {
                return Ok(());
            };

            res.header("Content-Encoding", encoding)
                .header("Vary", "Accept-Encoding")
                .body_bytes(compressed);
            Ok(())
        })
    }

    fn clone_box(&self) -> Box<dyn Middleware> {
        Box::new(Compression::new(self.config.clone()))
    }
}
