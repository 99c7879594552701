use super::*;

/// One frame as reported by a stack walker.
#[derive(Debug, Clone, Copy, Eq, PartialEq)]
pub struct RawFrame {
  /// Return address identifying the frame.
  pub ip: usize,
  /// Start address of the enclosing function, or zero when unknown.
  pub symbol: usize,
}

impl RawFrame {
  #[must_use]
  pub fn new(ip: usize, symbol: usize) -> Self {
    Self { ip, symbol }
  }
}

/// Walks the current thread's stack, innermost frame first.
pub trait FrameSource: Debug + Send + Sync {
  /// Feed frames to `visit` until it returns `false` or the stack ends.
  fn walk(&self, visit: &mut dyn FnMut(RawFrame) -> bool);
}

/// Frame source backed by `backtrace::trace`.
#[derive(Debug, Default, Clone, Copy)]
pub struct NativeFrames;

impl FrameSource for NativeFrames {
  #[inline(never)]
  fn walk(&self, visit: &mut dyn FnMut(RawFrame) -> bool) {
    backtrace::trace(|frame| {
      visit(RawFrame::new(
        frame.ip() as usize,
        frame.symbol_address() as usize,
      ))
    });
  }
}

#[derive(Debug, Clone, Copy, Eq, PartialEq)]
struct Filled {
  end: usize,
  start: usize,
  truncated: bool,
}

/// Captures raw frame identifiers into pooled scratch buffers.
#[derive(Debug)]
pub struct FrameCapturer {
  max_frames: usize,
  pool: ScratchPool,
  source: Arc<dyn FrameSource>,
}

impl FrameCapturer {
  /// Capture the current stack.
  ///
  /// With an `anchor` (the entry address of the outermost capture function),
  /// every frame up to and including the anchor's is dropped before `skip`
  /// further frames are elided. Without one, or when the anchor is never
  /// seen, `skip` counts from the innermost frame the source reports.
  ///
  /// A buffer that overflows is doubled and the walk repeated until the
  /// whole stack fits or `max_frames` is reached.
  #[must_use]
  pub fn capture(
    &self,
    skip: usize,
    anchor: Option<usize>,
  ) -> ScratchBuffer<'_> {
    let mut buffer = self.pool.acquire();

    if buffer.len() > self.max_frames {
      buffer.grow(self.max_frames);
    }

    loop {
      let filled = fill(&*self.source, buffer.as_mut_slice(), skip, anchor);

      if filled.truncated {
        let current = buffer.len();

        if current < self.max_frames {
          let grown = current.saturating_mul(2).min(self.max_frames);
          debug!(from = current, to = grown, "growing frame buffer");
          buffer.grow(grown);
          continue;
        }

        warn!(max_frames = self.max_frames, "stack truncated");
      }

      buffer.retain_range(filled.start, filled.end);
      return buffer;
    }
  }

  #[must_use]
  pub fn new(config: &CacheConfig, source: Arc<dyn FrameSource>) -> Self {
    Self {
      max_frames: config.max_frames.max(1),
      pool: ScratchPool::new(config),
      source,
    }
  }

  #[must_use]
  pub fn pool(&self) -> &ScratchPool {
    &self.pool
  }
}

fn fill(
  source: &dyn FrameSource,
  buffer: &mut [usize],
  skip: usize,
  anchor: Option<usize>,
) -> Filled {
  let capacity = buffer.len();
  let mut anchored = anchor.is_none();
  let mut len = 0;
  let mut remaining_skip = skip;
  let mut truncated = false;

  source.walk(&mut |frame| {
    if frame.ip == 0 {
      return true;
    }

    if !anchored && anchor == Some(frame.symbol) {
      anchored = true;
      len = 0;
      truncated = false;
      return true;
    }

    if anchored && remaining_skip > 0 {
      remaining_skip -= 1;
      return true;
    }

    if len == capacity {
      truncated = true;
      // Keep walking while the anchor may still discard what we have.
      return !anchored;
    }

    buffer[len] = frame.ip;
    len += 1;
    true
  });

  let start = if anchored { 0 } else { skip.min(len) };

  Filled {
    end: len,
    start,
    truncated,
  }
}
