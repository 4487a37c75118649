//! Runtime half of the schema filesystem: path resolution, the filesystem
//! session driven by an adapter, and the background deploy engine.

pub mod engine;
pub mod overlay;
pub mod resolver;
pub mod session;

pub use engine::{DeployEngine, EngineHandle, EngineMsg, EngineStats, IdleGuard};
pub use overlay::{Overlay, SharedOverlay};
pub use resolver::Resolver;
pub use session::{FsSession, SessionStats};
