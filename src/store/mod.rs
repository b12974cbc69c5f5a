// Heuristic store - learned repairs that persist across runs

mod heuristic;
mod persistent;
mod template;

pub use heuristic::{clamp_confidence, Heuristic};
pub use persistent::{HeuristicStore, MergeSummary, STORE_VERSION};
pub use template::FixTemplate;
