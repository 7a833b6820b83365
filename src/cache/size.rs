//! Approximate byte cost of cached values.
//!
//! The estimate is the length of the value's JSON encoding. Values are
//! streamed into a counting sink, so nothing is buffered.

use std::io;

use serde::Serialize;

struct ByteCounter {
    written: usize,
}

impl io::Write for ByteCounter {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.written = self.written.saturating_add(buf.len());
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

/// Length in bytes of `value` serialized as JSON.
///
/// Returns `None` when the value refuses to serialize (maps with non-string
/// keys, custom impls that error); callers report such entries as unsized.
pub fn serialized_len<T>(value: &T) -> Option<usize>
where
    T: Serialize + ?Sized,
{
    let mut counter = ByteCounter { written: 0 };
    serde_json::to_writer(&mut counter, value).ok()?;
    Some(counter.written)
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use serde::ser::Error as _;
    use serde::{Serialize, Serializer};

    use super::*;

    #[test]
    fn matches_json_string_length() {
        let value = vec!["alpha", "beta"];
        let expected = serde_json::to_string(&value).expect("serializes").len();
        assert_eq!(serialized_len(&value), Some(expected));
    }

    #[test]
    fn strings_include_quotes() {
        assert_eq!(serialized_len("abc"), Some(5));
    }

    #[test]
    fn non_string_map_keys_are_unsized() {
        let mut value = HashMap::new();
        value.insert((1_u8, 2_u8), "pair");
        assert_eq!(serialized_len(&value), None);
    }

    #[test]
    fn failing_serialize_impl_is_unsized() {
        struct Opaque;

        impl Serialize for Opaque {
            fn serialize<S: Serializer>(&self, _serializer: S) -> Result<S::Ok, S::Error> {
                Err(S::Error::custom("opaque handle"))
            }
        }

        assert_eq!(serialized_len(&Opaque), None);
    }
}
