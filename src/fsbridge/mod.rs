//! 📂 Streaming FS Bridge
//!
//! Server-side reads and writes of virtual paths become RPCs back to the
//! owning client's socket (`client/readFile`, `client/writeFile`,
//! `client/fileExists`). Content is cached per (session, virtual path) and
//! invalidated by client-pushed `server/fileChanged` notifications. No cache
//! coherence is assumed across sessions, even for identical project roots.

pub mod bridge;
pub mod cache;

pub use bridge::FsBridge;
pub use cache::{CacheStats, FileCache};
