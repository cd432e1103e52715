mod searcher;
mod signature;

pub use searcher::MemorySearcher;
pub use signature::Signature;
