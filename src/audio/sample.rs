//! 16-bit sample arithmetic. Everything saturates instead of wrapping.

/// Add two samples, clamping to the 16-bit range.
#[inline]
pub fn mix(a: i16, b: i16) -> i16 {
    a.saturating_add(b)
}

/// Scale a sample by a linear amplitude, clamping to the 16-bit range.
///
/// The float to int cast truncates toward zero and saturates.
#[inline]
pub fn scale(sample: i16, amplitude: f32) -> i16 {
    (sample as f32 * amplitude) as i16
}

/// Scale a whole frame in place.
pub fn scale_frame(frame: &mut [i16], amplitude: f32) {
    if amplitude == 1.0 {
        return;
    }
    for s in frame.iter_mut() {
        *s = scale(*s, amplitude);
    }
}
