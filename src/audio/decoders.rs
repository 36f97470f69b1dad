//! Decoder registry keyed by file extension, plus the raw PCM decoder.

use std::collections::HashMap;
use std::fs::File;
use std::io::{ErrorKind, Read};
use std::path::Path;

use bytes::Buf;

use super::error::AudioError;
use super::opus_file::OpusFileSource;
use super::source::{ReadStatus, SampleSource};

/// Constructor turning an opened file into a sample source.
pub type DecoderFn = fn(File) -> Result<Box<dyn SampleSource>, AudioError>;

/// Maps lowercase file extensions (without the dot) to decoders.
pub struct Decoders {
    decoders: HashMap<String, DecoderFn>,
}

impl Decoders {
    /// An empty registry.
    pub fn new() -> Self {
        Self {
            decoders: HashMap::new(),
        }
    }

    /// Register a decoder for an extension, replacing any previous one.
    pub fn register(&mut self, extension: &str, decoder: DecoderFn) {
        let key = extension.trim_start_matches('.').to_ascii_lowercase();
        self.decoders.insert(key, decoder);
    }

    /// Open a sound file with the decoder registered for its extension.
    ///
    /// The extension is checked before the file is touched, so an
    /// unsupported path fails with `UnsupportedFormat` even if it is missing.
    pub fn open(&self, path: impl AsRef<Path>) -> Result<Box<dyn SampleSource>, AudioError> {
        let path = path.as_ref();
        let extension = path
            .extension()
            .and_then(|e| e.to_str())
            .map(|e| e.to_ascii_lowercase())
            .unwrap_or_default();

        let decoder = self
            .decoders
            .get(&extension)
            .ok_or_else(|| AudioError::UnsupportedFormat(format!(".{}", extension)))?;

        let file = File::open(path)?;
        log::debug!("Opening {} with the .{} decoder", path.display(), extension);
        decoder(file)
    }
}

impl Default for Decoders {
    fn default() -> Self {
        let mut decoders = Self::new();
        decoders.register("raw", raw_decoder);
        decoders.register("opus", opus_decoder);
        decoders
    }
}

fn raw_decoder(file: File) -> Result<Box<dyn SampleSource>, AudioError> {
    Ok(Box::new(RawSource::new(file)))
}

fn opus_decoder(file: File) -> Result<Box<dyn SampleSource>, AudioError> {
    Ok(Box::new(OpusFileSource::new(file)?))
}

// ======================== Raw PCM ========================

/// Headerless little-endian 16-bit mono PCM.
pub struct RawSource<R> {
    reader: Option<R>,
    buf: Vec<u8>,
}

impl<R: Read> RawSource<R> {
    pub fn new(reader: R) -> Self {
        Self {
            reader: Some(reader),
            buf: Vec::new(),
        }
    }
}

impl<R: Read + Send> SampleSource for RawSource<R> {
    /// One underlying read per call. A dangling odd byte is dropped.
    fn read(&mut self, pcm: &mut [i16]) -> Result<ReadStatus, AudioError> {
        let Some(reader) = self.reader.as_mut() else {
            return Ok(ReadStatus::End(0));
        };
        // A zero-length read says nothing about the end of the stream
        if pcm.is_empty() {
            return Ok(ReadStatus::More(0));
        }

        self.buf.resize(2 * pcm.len(), 0);
        let n = loop {
            match reader.read(&mut self.buf) {
                Ok(n) => break n,
                Err(e) if e.kind() == ErrorKind::Interrupted => continue,
                Err(e) => return Err(e.into()),
            }
        };

        if n == 0 {
            return Ok(ReadStatus::End(0));
        }

        let mut bytes = &self.buf[..n - n % 2];
        let mut count = 0;
        while bytes.remaining() >= 2 {
            pcm[count] = bytes.get_i16_le();
            count += 1;
        }
        Ok(ReadStatus::More(count))
    }

    fn close(&mut self) {
        self.reader = None;
        self.buf = Vec::new();
    }
}
