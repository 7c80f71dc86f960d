//! Ring finder.
//!
//! Per plane the stages are:
//!
//! 1. **Ridge** – row-gradient percentile masks and the ridgeness predicate.
//! 2. **Arcs** – 8-connected fragments that pass the adaptive size and lump
//!    filters.
//! 3. **Construction** – ruler-and-square center and radius for each arc.
//! 4. **Circle fit** – bounded LM refinement of each construction.
//! 5. **Aggregation** – fits merged into rings, rings into the concentric
//!    system.
//!
//! Arcs whose construction or fit fails are replaced by the sentinel fit and
//! reported in [`RingFinderResult::warnings`].

mod config;
mod result;
mod run;

pub use config::FinderConfig;
pub use result::RingFinderResult;
pub use run::RingFinder;
