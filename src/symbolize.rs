use super::*;

const UNKNOWN: &str = "<unknown>";

/// Metadata describing a single resolved frame.
#[derive(Debug, Clone, Eq, PartialEq, Hash, Serialize)]
pub struct FrameMetadata {
  pub filename: Arc<str>,
  pub function: Arc<str>,
  pub lineno: u32,
}

impl FrameMetadata {
  #[must_use]
  pub fn new(
    filename: impl Into<String>,
    function: impl Into<String>,
    lineno: u32,
  ) -> Self {
    Self {
      filename: Arc::<str>::from(filename.into()),
      function: Arc::<str>::from(function.into()),
      lineno,
    }
  }

  #[must_use]
  pub fn unknown() -> Self {
    Self::new(UNKNOWN, UNKNOWN, 0)
  }
}

/// Turns raw frame identifiers into source locations.
pub trait Symbolizer: Debug + Send + Sync {
  /// Append one record per symbol found at `ip`. Inlined calls may yield
  /// several records for a single identifier.
  fn resolve(&self, ip: usize, out: &mut Vec<FrameMetadata>);
}

/// Symbolizer backed by the `backtrace` crate's debug-info reader.
#[derive(Debug, Default, Clone, Copy)]
pub struct NativeSymbolizer;

impl Symbolizer for NativeSymbolizer {
  fn resolve(&self, ip: usize, out: &mut Vec<FrameMetadata>) {
    let before = out.len();

    backtrace::resolve(ip as *mut c_void, |symbol| {
      let filename = symbol
        .filename()
        .and_then(path_to_string)
        .unwrap_or(UNKNOWN);

      let function = symbol
        .name()
        .map_or_else(|| UNKNOWN.to_string(), |name| format!("{name}"));

      out.push(FrameMetadata::new(
        filename,
        function,
        symbol.lineno().unwrap_or(0),
      ));
    });

    if out.len() == before {
      out.push(FrameMetadata::unknown());
    }
  }
}

/// Resolve every identifier in order, innermost frame first.
#[must_use]
pub fn resolve_all(
  symbolizer: &dyn Symbolizer,
  frames: &[usize],
) -> Vec<FrameMetadata> {
  let mut resolved = Vec::with_capacity(frames.len());

  for &ip in frames {
    symbolizer.resolve(ip, &mut resolved);
  }

  resolved
}

/// Render resolved frames as `\n<file>:<line> <function>` lines.
#[must_use]
pub fn render(frames: &[FrameMetadata]) -> String {
  let mut text = String::new();

  for frame in frames {
    let _ = write!(
      text,
      "\n{}:{} {}",
      frame.filename, frame.lineno, frame.function
    );
  }

  text
}

fn path_to_string(path: &Path) -> Option<&str> {
  path
    .to_str()
    .or_else(|| path.file_name().and_then(OsStr::to_str))
}

#[cfg(test)]
mod tests {
  use super::*;

  #[derive(Debug)]
  struct Table;

  impl Symbolizer for Table {
    fn resolve(&self, ip: usize, out: &mut Vec<FrameMetadata>) {
      match ip {
        1 => out.push(FrameMetadata::new("main.rs", "main", 10)),
        2 => {
          out.push(FrameMetadata::new("lib.rs", "inlined", 4));
          out.push(FrameMetadata::new("lib.rs", "outer", 20));
        }
        _ => out.push(FrameMetadata::unknown()),
      }
    }
  }

  #[test]
  fn renders_one_line_per_frame() {
    let frames = vec![
      FrameMetadata::new("src/db.rs", "app::db::query", 42),
      FrameMetadata::new("src/main.rs", "app::main", 7),
    ];

    assert_eq!(
      render(&frames),
      "\nsrc/db.rs:42 app::db::query\nsrc/main.rs:7 app::main"
    );
  }

  #[test]
  fn renders_nothing_for_no_frames() {
    assert_eq!(render(&[]), "");
  }

  #[test]
  fn expands_inlined_symbols_in_order() {
    let resolved = resolve_all(&Table, &[2, 1]);
    let functions: Vec<&str> =
      resolved.iter().map(|frame| frame.function.as_ref()).collect();
    assert_eq!(functions, vec!["inlined", "outer", "main"]);
  }

  #[test]
  fn native_symbolizer_always_yields_a_record() {
    let mut out = Vec::new();
    NativeSymbolizer.resolve(0x10, &mut out);
    assert!(!out.is_empty());
  }

  #[test]
  fn serializes_frame_fields() {
    let frame = FrameMetadata::new("a.rs", "f", 3);
    let json = serde_json::to_value(&frame).expect("serializable frame");
    assert_eq!(
      json,
      serde_json::json!({ "filename": "a.rs", "function": "f", "lineno": 3 })
    );
  }
}
