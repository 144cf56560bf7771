//! Transparent wrappers binding containers into the dependency graph.

mod dict;
mod proxy;

pub use dict::DictWrapper;
pub use proxy::Proxy;
