//! Integer-ratio resampling between the internal rate and a device rate.
//!
//! - Up-sampling: linear interpolation from the previous sample
//! - Down-sampling: average of each group of `ratio` samples
//!
//! Both run as async stages over sample-chunk channels and close their output
//! once the input is exhausted.

use tokio::sync::mpsc;

/// A stateful one-directional stream transform.
pub trait Resample: Send {
    /// Transform `input`, appending the result to `out`.
    fn process(&mut self, input: &[i16], out: &mut Vec<i16>);

    /// Expected output length for `input_len` samples (capacity hint).
    fn output_len(&self, input_len: usize) -> usize;
}

/// Raises the rate by an integer factor.
pub struct UpSampler {
    ratio: i32,
    prev: i16,
}

impl UpSampler {
    pub fn new(ratio: usize) -> Self {
        assert!(ratio >= 1, "up-sampling ratio must be at least 1");
        Self {
            ratio: ratio as i32,
            prev: 0,
        }
    }
}

impl Resample for UpSampler {
    /// For each sample `s`, emits `ratio - 1` points stepping from the previous
    /// sample towards `s` with step `(s - prev) / ratio`, then `s` itself.
    /// The stream starts from an implicit zero.
    fn process(&mut self, input: &[i16], out: &mut Vec<i16>) {
        for &s in input {
            let prev = self.prev as i32;
            let step = (s as i32 - prev) / self.ratio;
            out.extend((1..self.ratio).map(|i| (prev + i * step) as i16));
            out.push(s);
            self.prev = s;
        }
    }

    fn output_len(&self, input_len: usize) -> usize {
        input_len * self.ratio as usize
    }
}

/// Lowers the rate by an integer factor.
///
/// A trailing group shorter than `ratio` is never emitted.
pub struct DownSampler {
    ratio: i32,
    sum: i32,
    num: i32,
}

impl DownSampler {
    pub fn new(ratio: usize) -> Self {
        assert!(ratio >= 1, "down-sampling ratio must be at least 1");
        Self {
            ratio: ratio as i32,
            sum: 0,
            num: 0,
        }
    }
}

impl Resample for DownSampler {
    fn process(&mut self, input: &[i16], out: &mut Vec<i16>) {
        for &s in input {
            self.sum += s as i32;
            self.num += 1;

            if self.num == self.ratio {
                out.push((self.sum / self.num) as i16);
                self.sum = 0;
                self.num = 0;
            }
        }
    }

    fn output_len(&self, input_len: usize) -> usize {
        (input_len + self.num as usize) / self.ratio as usize
    }
}

/// Run a resampler over a channel until the input closes.
///
/// Dropping `tx` on return closes the downstream channel.
pub async fn run<R: Resample>(
    mut resampler: R,
    mut rx: mpsc::Receiver<Vec<i16>>,
    tx: mpsc::Sender<Vec<i16>>,
) {
    let mut processed = 0usize;
    while let Some(chunk) = rx.recv().await {
        let mut out = Vec::with_capacity(resampler.output_len(chunk.len()));
        resampler.process(&chunk, &mut out);
        processed += chunk.len();

        if out.is_empty() {
            continue;
        }
        if tx.send(out).await.is_err() {
            log::debug!("Resampler output dropped after {} samples", processed);
            return;
        }
    }
    log::debug!("Resampler input closed after {} samples", processed);
}

pub async fn up_sample(ratio: usize, rx: mpsc::Receiver<Vec<i16>>, tx: mpsc::Sender<Vec<i16>>) {
    run(UpSampler::new(ratio), rx, tx).await
}

pub async fn down_sample(ratio: usize, rx: mpsc::Receiver<Vec<i16>>, tx: mpsc::Sender<Vec<i16>>) {
    run(DownSampler::new(ratio), rx, tx).await
}
