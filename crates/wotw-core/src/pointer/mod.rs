//! Self-healing pointers: finder strategies, the per-process cache and
//! serializable definitions

mod definition;
mod finder;
mod program;
mod schedule;

pub use definition::{
    FinderDefinition, PointerDefinition, PointerDefinitionSet, builtin_definitions,
    load_definitions, save_definitions,
};
pub use finder::{
    AutoDeref, EngineVersion, FindResult, Finder, ResolveContext, ResolveSettings, RvaFinder,
    SignatureFinder, StaticOffsetsFinder,
};
pub use program::{PointerState, ProgramPointer};
#[cfg(test)]
pub use schedule::ManualClock;
pub use schedule::{Clock, SystemClock, Throttle};
