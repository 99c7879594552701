use super::*;

const PANIC_RECOVERED: &str = "panic recovered";

/// Run `f`, converting a panic into an `Error`.
///
/// # Errors
///
/// Returns the converted panic payload if `f` panics.
pub fn catch_panic<F, T>(f: F) -> Result<T, Error>
where
  F: FnOnce() -> T + UnwindSafe,
{
  panic::catch_unwind(f).map_err(from_panic)
}

/// Convert a panic payload into an `Error`.
///
/// An `Error` payload is returned unchanged. String payloads become the
/// message, boxed errors become the cause, and anything else is reported
/// generically. Converted errors carry the stack at the point of conversion.
#[inline(never)]
#[must_use]
pub fn from_panic(payload: Box<dyn Any + Send>) -> Error {
  let anchor = from_panic as fn(Box<dyn Any + Send>) -> Error as usize;

  let payload = match payload.downcast::<Error>() {
    Ok(err) => return *err,
    Err(payload) => payload,
  };

  let err = if let Some(message) = payload.downcast_ref::<&str>() {
    Error::new(*message)
  } else if let Some(message) = payload.downcast_ref::<String>() {
    Error::new(message.as_str())
  } else {
    match payload.downcast::<Box<dyn StdError + Send + Sync>>() {
      Ok(cause) => Error::wrap(BoxedCause(*cause), PANIC_RECOVERED),
      Err(_) => Error::wrap(Error::new("Box<dyn Any>"), PANIC_RECOVERED),
    }
  };

  err.with_captured_stack(default_cache().capture_from(0, anchor))
}

/// Adapter letting a boxed error payload serve as a cause.
#[derive(Debug)]
struct BoxedCause(Box<dyn StdError + Send + Sync>);

impl Display for BoxedCause {
  fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
    Display::fmt(&self.0, f)
  }
}

impl StdError for BoxedCause {
  fn source(&self) -> Option<&(dyn StdError + 'static)> {
    self.0.source()
  }
}
