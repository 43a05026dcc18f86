/// Generic platform-agnostic cleanups. It's a good idea to use these all the time.
mod generic;
pub use generic::*;
/// Rewrites around collective communication ops
mod collective;
pub use collective::*;
