//! Gzip response compression.
//!
//! # Negotiation
//!
//! A response is compressed when the request's `Accept-Encoding` lists
//! `gzip` (or `x-gzip`, or `*`) with a non-zero quality. An explicit
//! `gzip;q=0` refuses gzip even if `*` is also listed. Otherwise the request
//! passes through untouched.
//!
//! # Response handling
//!
//! - Responses that already carry `Content-Encoding` are returned as-is
//! - Empty bodies are returned as-is (no `Content-Encoding`)
//! - Otherwise each body frame is deflated as it arrives, `Content-Encoding:
//!   gzip` is set, `Vary: Accept-Encoding` is appended and `Content-Length`
//!   is rewritten to the compressed size
//!
//! A body that fails to read becomes a `500` envelope.
//!
//! # Compressor pool
//!
//! Deflate state is the expensive part of gzip, so raw [`Compress`] streams
//! are kept in a [`CompressorPool`]. Each response borrows one through a
//! [`GzipStream`], which writes the gzip header and CRC trailer itself. The
//! stream is reset and handed back when the [`GzipStream`] is dropped, on
//! every exit path including errors and panics.

use std::fmt;
use std::io;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::task::{Context, Poll};

use axum::body::Body;
use axum::http::header::{
    ACCEPT_ENCODING, CONTENT_ENCODING, CONTENT_LENGTH, HeaderValue, VARY,
};
use axum::http::{HeaderMap, Request, Response};
use axum::response::IntoResponse;
use flate2::{Compress, Compression, Crc, FlushCompress, Status};
use http_body_util::BodyExt;
use parking_lot::Mutex;
use tower::{Layer, Service};

use super::request_id::RequestIdExt;
use crate::error::AppError;

/// Default gzip level (0 = store, 9 = best).
pub const DEFAULT_COMPRESSION_LEVEL: u32 = 6;

/// Idle compressors kept by default.
pub const DEFAULT_POOLED_COMPRESSORS: usize = 64;

/// Gzip member header: magic, deflate, no flags, no mtime, unknown OS.
const GZIP_HEADER: [u8; 10] = [0x1f, 0x8b, 0x08, 0x00, 0, 0, 0, 0, 0x00, 0xff];

/// Output growth per deflate call.
const OUTPUT_CHUNK: usize = 8 * 1024;

// =============================================================================
// Compressor pool
// =============================================================================

/// Pool of raw deflate streams, all at one compression level.
pub struct CompressorPool {
    idle: Mutex<Vec<Compress>>,
    level: Compression,
    max_idle: usize,
    created: AtomicUsize,
}

impl CompressorPool {
    pub fn new(level: u32, max_idle: usize) -> Self {
        Self {
            idle: Mutex::new(Vec::new()),
            level: Compression::new(level.min(9)),
            max_idle,
            created: AtomicUsize::new(0),
        }
    }

    /// Start a gzip member on a pooled compressor, creating one if the pool
    /// is dry.
    pub fn stream(self: &Arc<Self>) -> GzipStream {
        let compress = self.idle.lock().pop().unwrap_or_else(|| self.create());

        let mut out = Vec::with_capacity(OUTPUT_CHUNK);
        out.extend_from_slice(&GZIP_HEADER);

        GzipStream {
            compress: Some(compress),
            crc: Crc::new(),
            out,
            pool: self.clone(),
        }
    }

    pub fn level(&self) -> u32 {
        self.level.level()
    }

    /// Number of compressors waiting for reuse.
    pub fn idle(&self) -> usize {
        self.idle.lock().len()
    }

    /// Number of compressors ever allocated by this pool.
    pub fn created(&self) -> usize {
        self.created.load(Ordering::Relaxed)
    }

    fn create(&self) -> Compress {
        self.created.fetch_add(1, Ordering::Relaxed);
        Compress::new(self.level, false)
    }

    fn release(&self, mut compress: Compress) {
        compress.reset();
        let mut idle = self.idle.lock();
        if idle.len() < self.max_idle {
            idle.push(compress);
        }
    }
}

impl fmt::Debug for CompressorPool {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CompressorPool")
            .field("level", &self.level())
            .field("idle", &self.idle())
            .field("max_idle", &self.max_idle)
            .field("created", &self.created())
            .finish()
    }
}

/// One gzip member being written with a compressor on loan from a
/// [`CompressorPool`].
pub struct GzipStream {
    compress: Option<Compress>,
    crc: Crc,
    out: Vec<u8>,
    pool: Arc<CompressorPool>,
}

impl GzipStream {
    /// Deflate `input` into the member.
    pub fn write(&mut self, mut input: &[u8]) -> io::Result<()> {
        self.crc.update(input);
        let compress = self.compress.get_or_insert_with(|| self.pool.create());

        while !input.is_empty() {
            self.out.reserve(OUTPUT_CHUNK);
            let before = compress.total_in();
            compress
                .compress_vec(input, &mut self.out, FlushCompress::None)
                .map_err(io::Error::other)?;
            let consumed = usize::try_from(compress.total_in() - before)
                .map_err(io::Error::other)?;
            input = &input[consumed..];
        }
        Ok(())
    }

    /// Uncompressed bytes written so far.
    pub fn bytes_in(&self) -> u64 {
        self.compress.as_ref().map_or(0, Compress::total_in)
    }

    /// Flush the deflate stream and append the CRC32 and length trailer.
    pub fn finish(mut self) -> io::Result<Vec<u8>> {
        let compress = self.compress.get_or_insert_with(|| self.pool.create());

        loop {
            self.out.reserve(OUTPUT_CHUNK);
            let status = compress
                .compress_vec(&[], &mut self.out, FlushCompress::Finish)
                .map_err(io::Error::other)?;
            if status == Status::StreamEnd {
                break;
            }
        }

        self.out.extend_from_slice(&self.crc.sum().to_le_bytes());
        self.out.extend_from_slice(&self.crc.amount().to_le_bytes());
        Ok(std::mem::take(&mut self.out))
    }
}

impl Drop for GzipStream {
    fn drop(&mut self) {
        if let Some(compress) = self.compress.take() {
            self.pool.release(compress);
        }
    }
}

impl fmt::Debug for GzipStream {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("GzipStream")
            .field("bytes_in", &self.bytes_in())
            .field("bytes_out", &self.out.len())
            .finish_non_exhaustive()
    }
}

// =============================================================================
// Negotiation
// =============================================================================

/// Whether the request's `Accept-Encoding` admits gzip.
pub fn accepts_gzip(headers: &HeaderMap) -> bool {
    let mut gzip = None;
    let mut wildcard = None;

    for value in headers.get_all(ACCEPT_ENCODING) {
        let Ok(value) = value.to_str() else {
            continue;
        };
        for entry in value.split(',') {
            let mut params = entry.split(';');
            let coding = params.next().unwrap_or_default().trim();
            let accepted = params
                .filter_map(|p| p.trim().split_once('='))
                .find(|(name, _)| name.trim().eq_ignore_ascii_case("q"))
                .map_or(Some(true), |(_, q)| q.trim().parse::<f32>().ok().map(|q| q > 0.0))
                .unwrap_or(false);

            if coding.eq_ignore_ascii_case("gzip") || coding.eq_ignore_ascii_case("x-gzip") {
                // An explicit refusal wins over any other gzip entry
                gzip = Some(gzip.unwrap_or(true) && accepted);
            } else if coding == "*" {
                wildcard = Some(accepted);
            }
        }
    }

    gzip.or(wildcard).unwrap_or(false)
}

// =============================================================================
// Layer
// =============================================================================

#[derive(Debug, Clone)]
pub struct CompressionLayer {
    pool: Arc<CompressorPool>,
}

impl CompressionLayer {
    pub fn new(level: u32) -> Self {
        Self::with_pool(Arc::new(CompressorPool::new(level, DEFAULT_POOLED_COMPRESSORS)))
    }

    pub fn with_pool(pool: Arc<CompressorPool>) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &Arc<CompressorPool> {
        &self.pool
    }
}

impl Default for CompressionLayer {
    fn default() -> Self {
        Self::new(DEFAULT_COMPRESSION_LEVEL)
    }
}

impl<S> Layer<S> for CompressionLayer {
    type Service = CompressionService<S>;

    fn layer(&self, inner: S) -> Self::Service {
        CompressionService {
            inner,
            pool: self.pool.clone(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct CompressionService<S> {
    inner: S,
    pool: Arc<CompressorPool>,
}

impl<S> Service<Request<Body>> for CompressionService<S>
where
    S: Service<Request<Body>, Response = Response<Body>> + Clone + Send + 'static,
    S::Future: Send,
{
    type Response = Response<Body>;
    type Error = S::Error;
    type Future = std::pin::Pin<
        Box<dyn std::future::Future<Output = Result<Self::Response, Self::Error>> + Send>,
    >;

    fn poll_ready(&mut self, cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        self.inner.poll_ready(cx)
    }

    fn call(&mut self, req: Request<Body>) -> Self::Future {
        let mut inner = self.inner.clone();

        if !accepts_gzip(req.headers()) {
            return Box::pin(async move { inner.call(req).await });
        }

        let request_id = req.request_id().map(str::to_string);
        let pool = self.pool.clone();

        Box::pin(async move {
            let response = inner.call(req).await?;
            Ok(compress_response(response, &pool, request_id.as_deref()).await)
        })
    }
}

async fn compress_response(
    response: Response<Body>,
    pool: &Arc<CompressorPool>,
    request_id: Option<&str>,
) -> Response<Body> {
    if response.headers().contains_key(CONTENT_ENCODING) {
        return response;
    }

    let (mut parts, mut body) = response.into_parts();
    let mut gzip = pool.stream();

    while let Some(frame) = body.frame().await {
        let frame = match frame {
            Ok(frame) => frame,
            Err(e) => {
                return internal_error(
                    format!("failed to read response body for compression: {e}"),
                    request_id,
                );
            }
        };
        // Trailers are not carried over a gzipped body
        let Ok(data) = frame.into_data() else {
            continue;
        };
        if let Err(e) = gzip.write(&data) {
            return internal_error(format!("failed to gzip response body: {e}"), request_id);
        }
    }

    if gzip.bytes_in() == 0 {
        return Response::from_parts(parts, Body::empty());
    }

    let compressed = match gzip.finish() {
        Ok(compressed) => compressed,
        Err(e) => {
            return internal_error(format!("failed to gzip response body: {e}"), request_id);
        }
    };

    parts
        .headers
        .insert(CONTENT_ENCODING, HeaderValue::from_static("gzip"));
    parts
        .headers
        .append(VARY, HeaderValue::from_static("accept-encoding"));
    parts
        .headers
        .insert(CONTENT_LENGTH, HeaderValue::from(compressed.len()));

    Response::from_parts(parts, Body::from(compressed))
}

fn internal_error(detail: String, request_id: Option<&str>) -> Response<Body> {
    AppError::Internal(detail)
        .with_request_id(request_id)
        .into_response()
}
