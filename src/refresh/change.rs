use crate::model::{PriceHistoryEntry, ProductSnapshot};

/// A snapshot is a change when there is no history yet or its price pair
/// differs from the tail's. Stock and quantity never count.
pub fn has_changed(tail: Option<&PriceHistoryEntry>, snapshot: &ProductSnapshot) -> bool {
    match tail {
        None => true,
        Some(tail) => tail.prices() != snapshot.prices(),
    }
}
