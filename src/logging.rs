use super::*;

const MAX_CHAIN_DEPTH: usize = 100;

/// Collect structured fields from every `Error` in the source chain.
///
/// Metadata and the `stacktrace` field come from the outermost error that
/// defines them. Chains deeper than 100 links are cut short and flagged with
/// a `tracecache.error` field.
#[must_use]
pub fn fields(err: &(dyn StdError + 'static)) -> Map<String, Value> {
  let mut fields = Map::new();
  let mut current = Some(err);
  let mut depth = 0;

  while let Some(err) = current {
    if depth == MAX_CHAIN_DEPTH {
      fields.insert(
        "tracecache.error".to_string(),
        Value::from("max recursion depth exceeded"),
      );
      break;
    }

    depth += 1;

    if let Some(traced) = err.downcast_ref::<Error>() {
      for (key, value) in traced.metadata() {
        fields
          .entry(key.to_string())
          .or_insert_with(|| value.clone());
      }

      let stack_trace = traced.stack_trace();

      if !stack_trace.is_empty() {
        fields
          .entry("stacktrace")
          .or_insert_with(|| Value::from(stack_trace));
      }
    }

    current = err.source();
  }

  fields
}

/// Emit `err` as a single `ERROR` event with its fields attached as JSON.
pub fn log_error(err: &(dyn StdError + 'static)) {
  let structured = Value::Object(fields(err));
  tracing::error!(fields = %structured, "{err}");
}
