use super::*;

/// Bounded free list of frame buffers shared by every capturing thread.
#[derive(Debug)]
pub struct ScratchPool {
  free: ArrayQueue<Vec<usize>>,
  initial_frames: usize,
}

impl ScratchPool {
  /// Take a buffer whose usable length equals its full allocation.
  #[must_use]
  pub fn acquire(&self) -> ScratchBuffer<'_> {
    let mut frames = self
      .free
      .pop()
      .unwrap_or_else(|| Vec::with_capacity(self.initial_frames));

    frames.resize(frames.capacity().max(self.initial_frames), 0);

    ScratchBuffer {
      frames,
      pool: self,
    }
  }

  /// Number of buffers currently parked in the pool.
  #[must_use]
  pub fn idle(&self) -> usize {
    self.free.len()
  }

  #[must_use]
  pub fn new(config: &CacheConfig) -> Self {
    Self {
      free: ArrayQueue::new(config.pool_capacity.max(1)),
      initial_frames: config.initial_frames.max(1),
    }
  }

  fn release(&self, frames: Vec<usize>) {
    // A full pool simply lets the surplus buffer drop.
    let _ = self.free.push(frames);
  }
}

/// A pooled frame buffer, returned to its pool when dropped.
#[derive(Debug)]
pub struct ScratchBuffer<'a> {
  frames: Vec<usize>,
  pool: &'a ScratchPool,
}

impl ScratchBuffer<'_> {
  #[must_use]
  pub fn as_mut_slice(&mut self) -> &mut [usize] {
    self.frames.as_mut_slice()
  }

  /// Discard the contents and resize to exactly `frames` identifiers.
  pub fn grow(&mut self, frames: usize) {
    self.frames.clear();
    self.frames.reserve_exact(frames);
    self.frames.resize(frames, 0);
  }

  /// Keep only `range` of the captured identifiers, moved to the front.
  pub fn retain_range(&mut self, start: usize, end: usize) {
    let end = end.min(self.frames.len());
    let start = start.min(end);
    self.frames.copy_within(start..end, 0);
    self.frames.truncate(end - start);
  }
}

impl Deref for ScratchBuffer<'_> {
  type Target = [usize];

  fn deref(&self) -> &Self::Target {
    self.frames.as_slice()
  }
}

impl Drop for ScratchBuffer<'_> {
  fn drop(&mut self) {
    self.pool.release(mem::take(&mut self.frames));
  }
}
