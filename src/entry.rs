use super::*;

#[derive(Debug)]
struct Resolved {
  frames: Vec<FrameMetadata>,
  text: String,
}

/// One physically distinct call stack.
///
/// The frame identifiers are fixed at construction. Symbolization happens at
/// most once, on first request, and is shared by every holder of the entry.
pub struct StackEntry {
  frames: Box<[usize]>,
  resolved: OnceLock<Resolved>,
  symbolizer: Arc<dyn Symbolizer>,
}

impl StackEntry {
  #[must_use]
  pub fn frames(&self) -> &[usize] {
    &self.frames
  }

  /// Whether this entry holds exactly `frames`, element for element.
  #[must_use]
  pub fn matches(&self, frames: &[usize]) -> bool {
    *self.frames == *frames
  }

  #[must_use]
  pub fn new(frames: &[usize], symbolizer: Arc<dyn Symbolizer>) -> Self {
    Self {
      frames: frames.into(),
      resolved: OnceLock::new(),
      symbolizer,
    }
  }

  fn resolved(&self) -> Option<&Resolved> {
    if self.frames.is_empty() {
      return None;
    }

    Some(self.resolved.get_or_init(|| {
      let frames = resolve_all(&*self.symbolizer, &self.frames);
      let text = render(&frames);
      Resolved { frames, text }
    }))
  }
}

impl Debug for StackEntry {
  fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
    f.debug_struct("StackEntry")
      .field("depth", &self.frames.len())
      .field("formatted", &self.resolved.get().is_some())
      .finish()
  }
}

/// Shared handle to a cached stack.
///
/// Cloning is cheap. The underlying entry lives as long as any handle does;
/// the cache itself never keeps it alive.
#[derive(Clone)]
pub struct Stack {
  entry: Arc<StackEntry>,
}

impl Stack {
  pub(crate) fn downgrade(&self) -> Weak<StackEntry> {
    Arc::downgrade(&self.entry)
  }

  /// Human-readable text, one `\n<file>:<line> <function>` line per frame.
  ///
  /// Computed on the first call and cached; empty for a stack without
  /// frames.
  #[must_use]
  pub fn formatted(&self) -> &str {
    self
      .entry
      .resolved()
      .map(|resolved| resolved.text.as_str())
      .unwrap_or_default()
  }

  #[must_use]
  pub fn frames(&self) -> &[usize] {
    self.entry.frames()
  }

  #[must_use]
  pub fn is_empty(&self) -> bool {
    self.entry.frames().is_empty()
  }

  /// Whether both handles refer to the same cached entry.
  #[must_use]
  pub fn ptr_eq(&self, other: &Self) -> bool {
    Arc::ptr_eq(&self.entry, &other.entry)
  }

  /// Per-frame source locations, resolved alongside `formatted`.
  #[must_use]
  pub fn resolved(&self) -> &[FrameMetadata] {
    self
      .entry
      .resolved()
      .map(|resolved| resolved.frames.as_slice())
      .unwrap_or_default()
  }
}

impl From<Arc<StackEntry>> for Stack {
  fn from(entry: Arc<StackEntry>) -> Self {
    Self { entry }
  }
}

impl Debug for Stack {
  fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
    f.debug_tuple("Stack").field(&*self.entry).finish()
  }
}

impl Display for Stack {
  fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
    f.write_str(self.formatted())
  }
}
