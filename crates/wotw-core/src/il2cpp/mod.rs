//! IL2CPP metadata reader and RVA resolver (metadata format 24.1, PE32+)

pub mod binary;
mod cache;
pub mod metadata;
mod resolver;

#[cfg(test)]
pub(crate) mod fixture;

pub use binary::{Il2CppBinary, Il2CppRegistration, Section, TypeDescriptor};
pub use cache::{Il2CppRuntime, NameCache};
pub use metadata::Il2CppMetadata;
pub use resolver::{CodePointerTable, Il2CppTables, il2cpp_paths};
