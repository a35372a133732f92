pub mod engine;

pub use engine::{parse_ordinal, MatchResults, QueryEngine, Reference, SEARCH_HINT};
