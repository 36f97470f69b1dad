//! Generic sample source trait for file and in-memory playback.

use super::error::AudioError;

/// Default number of samples pulled per read when draining a source.
pub const CHUNK_SAMPLES: usize = 2048;

/// Result of a successful read from a [`SampleSource`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReadStatus {
    /// `n` samples were written, more may follow.
    More(usize),
    /// `n` samples were written and the stream is exhausted.
    End(usize),
}

impl ReadStatus {
    pub fn len(&self) -> usize {
        match *self {
            ReadStatus::More(n) | ReadStatus::End(n) => n,
        }
    }

    pub fn is_end(&self) -> bool {
        matches!(self, ReadStatus::End(_))
    }
}

/// A decoded stream of mono 16-bit PCM samples.
///
/// Implementations own their decoder handle exclusively. `close` releases it
/// and may be called more than once.
pub trait SampleSource: Send {
    /// Fill up to `pcm.len()` samples. Errors are decode failures.
    fn read(&mut self, pcm: &mut [i16]) -> Result<ReadStatus, AudioError>;

    /// Release the underlying handle.
    fn close(&mut self);
}

impl<S: SampleSource + ?Sized> SampleSource for Box<S> {
    fn read(&mut self, pcm: &mut [i16]) -> Result<ReadStatus, AudioError> {
        (**self).read(pcm)
    }

    fn close(&mut self) {
        (**self).close()
    }
}

/// Panic if a source claims to have produced more samples than it was given
/// room for. This is a bug in the source, never a recoverable condition.
pub(crate) fn check_count(status: ReadStatus, capacity: usize) -> ReadStatus {
    if status.len() > capacity {
        panic!(
            "sample source reported {} samples for a {}-sample buffer",
            status.len(),
            capacity
        );
    }
    status
}

/// In-memory samples, e.g. synthesised audio or a fully decoded clip.
pub struct BufferSource {
    samples: Vec<i16>,
    pos: usize,
}

impl BufferSource {
    pub fn new(samples: Vec<i16>) -> Self {
        Self { samples, pos: 0 }
    }
}

impl SampleSource for BufferSource {
    fn read(&mut self, pcm: &mut [i16]) -> Result<ReadStatus, AudioError> {
        let remaining = &self.samples[self.pos..];
        let n = remaining.len().min(pcm.len());
        pcm[..n].copy_from_slice(&remaining[..n]);
        self.pos += n;

        if self.pos == self.samples.len() {
            Ok(ReadStatus::End(n))
        } else {
            Ok(ReadStatus::More(n))
        }
    }

    fn close(&mut self) {
        self.samples = Vec::new();
        self.pos = 0;
    }
}

/// Read every remaining sample from a source.
pub fn read_all<S: SampleSource + ?Sized>(source: &mut S) -> Result<Vec<i16>, AudioError> {
    let mut out = Vec::with_capacity(16 * CHUNK_SAMPLES);
    let mut chunk = vec![0i16; CHUNK_SAMPLES];
    loop {
        let status = check_count(source.read(&mut chunk)?, chunk.len());
        out.extend_from_slice(&chunk[..status.len()]);
        if status.is_end() {
            return Ok(out);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Claims to have produced one sample more than it had room for.
    struct Overreporting;

    impl SampleSource for Overreporting {
        fn read(&mut self, pcm: &mut [i16]) -> Result<ReadStatus, AudioError> {
            Ok(ReadStatus::More(pcm.len() + 1))
        }

        fn close(&mut self) {}
    }

    #[test]
    fn test_buffer_source_chunks() {
        let mut source = BufferSource::new(vec![1, 2, 3, 4, 5]);
        let mut buf = [0i16; 2];

        assert_eq!(source.read(&mut buf).unwrap(), ReadStatus::More(2));
        assert_eq!(buf, [1, 2]);
        assert_eq!(source.read(&mut buf).unwrap(), ReadStatus::More(2));
        assert_eq!(buf, [3, 4]);
        assert_eq!(source.read(&mut buf).unwrap(), ReadStatus::End(1));
        assert_eq!(buf[0], 5);
        assert_eq!(source.read(&mut buf).unwrap(), ReadStatus::End(0));
    }

    #[test]
    fn test_empty_buffer_source_ends_immediately() {
        let mut source = BufferSource::new(Vec::new());
        let mut buf = [0i16; 4];
        assert_eq!(source.read(&mut buf).unwrap(), ReadStatus::End(0));
    }

    #[test]
    fn test_read_all() {
        let samples: Vec<i16> = (0..5000).map(|i| (i % 300) as i16).collect();
        let mut source = BufferSource::new(samples.clone());
        assert_eq!(read_all(&mut source).unwrap(), samples);
    }

    #[test]
    fn test_close_is_idempotent() {
        let mut source = BufferSource::new(vec![1, 2, 3]);
        source.close();
        source.close();
        let mut buf = [0i16; 4];
        assert_eq!(source.read(&mut buf).unwrap(), ReadStatus::End(0));
    }

    #[test]
    #[should_panic(expected = "sample source reported")]
    fn test_read_all_panics_on_bad_count() {
        let _ = read_all(&mut Overreporting);
    }
}
