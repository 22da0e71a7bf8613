//! Event id generation.
//!
//! The rest of the crate relies on one contract only: ids are unique and
//! sort as strings in the order they were generated. The default generator
//! uses UUIDv7, whose hyphenated lower-case form starts with a millisecond
//! timestamp and is kept monotonic within one process by the `uuid` crate.
//!
//! Ordering follows the wall clock. If the clock steps backwards, newly
//! generated ids can sort before ids already stored; the store detects and
//! logs this on append but does not repair it.

use crate::error::Result;
use uuid::Uuid;

/// Source of event ids.
pub trait IdGenerator: Send + Sync {
    /// Produce the next id.
    fn next_id(&self) -> Result<String>;
}

/// Time-ordered UUIDv7 ids.
#[derive(Clone, Copy, Debug, Default)]
pub struct UuidV7Generator;

impl IdGenerator for UuidV7Generator {
    fn next_id(&self) -> Result<String> {
        Ok(Uuid::now_v7().hyphenated().to_string())
    }
}

impl<F> IdGenerator for F
where
    F: Fn() -> Result<String> + Send + Sync,
{
    fn next_id(&self) -> Result<String> {
        self()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::StoreError;
    use std::collections::HashSet;

    #[test]
    fn test_uuid_ids_sort_in_creation_order() {
        let ids: Vec<String> = (0..1000)
            .map(|_| UuidV7Generator.next_id().unwrap())
            .collect();

        let mut sorted = ids.clone();
        sorted.sort();
        assert_eq!(ids, sorted);

        let unique: HashSet<_> = ids.iter().collect();
        assert_eq!(unique.len(), ids.len());
    }

    #[test]
    fn test_uuid_ids_are_fixed_width() {
        let id = UuidV7Generator.next_id().unwrap();
        assert_eq!(id.len(), 36);
        assert_eq!(id, id.to_lowercase());
    }

    #[test]
    fn test_closure_generator() {
        let failing = || -> Result<String> { Err(StoreError::IdGeneration("no entropy".into())) };
        assert!(matches!(
            failing.next_id(),
            Err(StoreError::IdGeneration(_))
        ));
    }
}
