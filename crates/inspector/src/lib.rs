//! Materialstore Inspector
//!
//! Turns material lists into compared, ordered, reportable groups:
//!
//! ```text
//! Store::select ──► MProductGroupBuilder::build ──► Inspector::reduce ──► Reporter
//!   (two lists)       chronological | twin           score + classify      JSON
//! ```
//!
//! Pairing matches materials by metadata (minus configured ignore keys).
//! Reduction scores each pair with the comparator registered for its file
//! type and orders the group by descending difference. The warning count at
//! a threshold is the acceptance signal for automated checks.

pub mod builder;
pub mod compare;
pub mod group;
pub mod reduce;
pub mod report;

pub use builder::{pair, ChronologicalInput, MProductGroupBuilder, PairingMode};
pub use compare::{ByteComparator, Comparator, ComparatorRegistry, ImageComparator, TextComparator};
pub use group::{Classification, MProduct, MProductGroup, PairingKind};
pub use reduce::Inspector;
pub use report::{GroupReport, ListReport, Reporter};
