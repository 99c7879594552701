/// Cache key derived from a frame sequence.
pub type Fingerprint = u64;

const SEED: u64 = 17;
const MULTIPLIER: u64 = 31;

/// Order-sensitive hash of a frame sequence.
///
/// Only stable within one process run. Equal fingerprints do not imply equal
/// stacks; callers must compare the frames themselves.
#[must_use]
pub fn fingerprint(frames: &[usize]) -> Fingerprint {
  frames.iter().fold(SEED, |hash, &frame| {
    hash.wrapping_mul(MULTIPLIER).wrapping_add(frame as u64)
  })
}
