//! Looping version of a [`SampleSource`].
//!
//! The first pass streams from the wrapped source and keeps a copy of every
//! sample; later passes replay that copy without touching the source again.

use super::error::AudioError;
use super::source::{check_count, ReadStatus, SampleSource, CHUNK_SAMPLES};

pub struct AudioLoop<S> {
    source: S,
    buffer: Vec<i16>,
    /// Replay position in `buffer`
    cursor: usize,
    /// Completed passes
    count: usize,
    /// Pass limit, `None` loops forever
    max: Option<usize>,
}

impl<S: SampleSource> AudioLoop<S> {
    /// Loop `source` `max` times, or indefinitely when `max` is `None`.
    pub fn new(source: S, max: Option<usize>) -> Self {
        Self {
            source,
            buffer: Vec::with_capacity(256 * CHUNK_SAMPLES),
            cursor: 0,
            count: 0,
            max,
        }
    }

    fn finished(&self) -> bool {
        self.max.is_some_and(|max| self.count >= max)
    }

    /// Read from the wrapped source, recording what comes out.
    fn read_source(&mut self, pcm: &mut [i16]) -> Result<ReadStatus, AudioError> {
        let status = check_count(self.source.read(pcm)?, pcm.len());
        let n = status.len();
        self.buffer.extend_from_slice(&pcm[..n]);

        if !status.is_end() {
            return Ok(ReadStatus::More(n));
        }

        // First pass complete. The recording is all we need from here on.
        self.count = 1;
        self.source.close();
        log::debug!("Loop buffered {} samples", self.buffer.len());

        if self.finished() || self.buffer.is_empty() {
            return Ok(ReadStatus::End(n));
        }
        if n == 0 {
            return self.read_buffer(pcm);
        }
        Ok(ReadStatus::More(n))
    }

    /// Replay from the recorded buffer.
    fn read_buffer(&mut self, pcm: &mut [i16]) -> Result<ReadStatus, AudioError> {
        let remaining = &self.buffer[self.cursor..];
        let n = remaining.len().min(pcm.len());
        pcm[..n].copy_from_slice(&remaining[..n]);

        self.cursor += n;
        if self.cursor == self.buffer.len() {
            self.count += 1;
            self.cursor = 0;
        }
        Ok(ReadStatus::More(n))
    }
}

impl<S: SampleSource> SampleSource for AudioLoop<S> {
    fn read(&mut self, pcm: &mut [i16]) -> Result<ReadStatus, AudioError> {
        if self.finished() {
            return Ok(ReadStatus::End(0));
        }
        if self.count == 0 {
            return self.read_source(pcm);
        }
        // An empty recording would replay forever without producing anything
        if self.buffer.is_empty() {
            return Ok(ReadStatus::End(0));
        }
        self.read_buffer(pcm)
    }

    fn close(&mut self) {
        self.source.close();
        self.buffer = Vec::new();
        self.cursor = 0;
        self.count = 0;
        self.max = Some(0);
    }
}
