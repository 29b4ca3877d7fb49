//! Windowed Cache: keeps a sliding, prefetched subset of the frame store
//! resident, under a memory budget shared by every loaded match.
//!
//! - [`window`] decides which range a window covers and when to prefetch.
//! - [`loader`] produces fully populated segments, honouring cancellation.
//! - [`windowed`] publishes segments, runs background workers, retries failed
//!   loads with backoff and evicts least recently used windows.

pub mod budget;
pub mod loader;
pub mod window;
pub mod windowed;

pub use budget::MemoryBudget;
pub use loader::{CancelToken, Segment, SegmentLoader, StoreLoader};
pub use window::{plan_window, prefetch_target, Playhead, TravelDirection};
pub use windowed::{CacheStatus, FrameCursor, FrameView, WindowedCache};
