/// Query-side business logic
///
/// - Proximity: radius lookup, unviewed filtering, view recording and
///   monthly histories
pub mod proximity;

pub use proximity::{sort_by_distance, sort_by_recency, ProximityResolver};
