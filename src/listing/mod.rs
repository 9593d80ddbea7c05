pub mod ranking;
pub mod rows;
pub mod status;

pub use ranking::{select_rank, RankedEntry, Ranking};
pub use rows::{Row, DEFAULT_MULTICAST_MARKER};
