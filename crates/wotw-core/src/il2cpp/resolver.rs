//! Name → RVA / field offset resolution over the loaded IL2CPP tables

use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};

use tracing::{debug, info};

use crate::error::{Error, Result};
use crate::il2cpp::binary::{Il2CppBinary, Il2CppRegistration, TypeDescriptor};
use crate::il2cpp::metadata::{Il2CppMetadata, TypeDefinition};
use crate::memory::layout;

/// Declaring-type chains deeper than this are cut off when naming a type
const MAX_NESTING: usize = 16;

/// Paths of the two files the tables are built from, relative to the game directory
pub fn il2cpp_paths(game_dir: &Path, product: &str) -> (PathBuf, PathBuf) {
    let metadata = game_dir
        .join(format!("{}_Data", product))
        .join("il2cpp_data")
        .join("Metadata")
        .join("global-metadata.dat");
    let binary = game_dir.join("GameAssembly.dll");
    (binary, metadata)
}

/// Method definition → code pointer.
///
/// Methods with a method index use the direct pointer table. Generic method
/// definitions are reached through their first method spec in the generic
/// method table.
#[derive(Debug, Clone, Default)]
pub struct CodePointerTable {
    method_pointers: Vec<u64>,
    generic_method_pointers: Vec<u64>,
    generic_by_definition: HashMap<usize, usize>,
}

impl CodePointerTable {
    pub fn new(registration: &Il2CppRegistration) -> Self {
        let mut generic_by_definition = HashMap::new();
        for entry in &registration.generic_method_table {
            let spec = usize::try_from(entry.generic_method_index)
                .ok()
                .and_then(|index| registration.method_specs.get(index));
            let (Some(spec), Ok(pointer_index)) = (spec, usize::try_from(entry.method_index)) else {
                continue;
            };
            if let Ok(definition) = usize::try_from(spec.method_definition_index) {
                generic_by_definition.entry(definition).or_insert(pointer_index);
            }
        }

        Self {
            method_pointers: registration.method_pointers.clone(),
            generic_method_pointers: registration.generic_method_pointers.clone(),
            generic_by_definition,
        }
    }

    /// Code pointer of a method, 0 when it has none
    pub fn pointer_for(&self, method_index: i32, method_definition_index: usize) -> u64 {
        if let Ok(index) = usize::try_from(method_index) {
            return self.method_pointers.get(index).copied().unwrap_or(0);
        }
        self.generic_by_definition
            .get(&method_definition_index)
            .and_then(|&index| self.generic_method_pointers.get(index))
            .copied()
            .unwrap_or(0)
    }
}

/// Split `Assembly.Type.Member`; anything other than three parts is rejected
fn split_name(full_name: &str) -> Option<(&str, &str, &str)> {
    let mut parts = full_name.split('.');
    let image = parts.next()?;
    let type_name = parts.next()?;
    let member = parts.next()?;
    parts.next().is_none().then_some((image, type_name, member))
}

fn starts_with_ignore_case(value: &str, prefix: &str) -> bool {
    value
        .get(..prefix.len())
        .is_some_and(|head| head.eq_ignore_ascii_case(prefix))
}

/// Metadata and binary tables of one game build
#[derive(Debug, Clone)]
pub struct Il2CppTables {
    metadata: Il2CppMetadata,
    binary: Il2CppBinary,
    types: Vec<TypeDescriptor>,
    field_offsets: Vec<u64>,
    code_pointers: CodePointerTable,
}

impl Il2CppTables {
    /// Parse a PE `GameAssembly.dll` and its `global-metadata.dat`
    pub fn parse(binary_blob: &[u8], metadata_blob: &[u8]) -> Result<Self> {
        let metadata = Il2CppMetadata::parse(metadata_blob)?;
        let binary = Il2CppBinary::from_pe(binary_blob.to_vec())?;
        Self::from_parts(binary, metadata)
    }

    /// Read both files from the game directory
    pub fn load(game_dir: &Path, product: &str) -> Result<Self> {
        let (binary_path, metadata_path) = il2cpp_paths(game_dir, product);
        for path in [&binary_path, &metadata_path] {
            if !path.is_file() {
                return Err(Error::NotFound(path.display().to_string()));
            }
        }
        let metadata = Il2CppMetadata::parse(&fs::read(&metadata_path)?)?;
        let binary = Il2CppBinary::from_pe(fs::read(&binary_path)?)?;
        Self::from_parts(binary, metadata)
    }

    pub fn from_parts(binary: Il2CppBinary, metadata: Il2CppMetadata) -> Result<Self> {
        let method_count = metadata.method_pointer_count();
        let type_count = metadata.type_definitions.len();

        let code = binary.find_code_registration(method_count).ok_or_else(|| {
            Error::InvalidBinary(format!(
                "code registration for {} methods not found",
                method_count
            ))
        })?;
        let meta = binary.find_metadata_registration(type_count).ok_or_else(|| {
            Error::InvalidBinary(format!(
                "metadata registration for {} types not found",
                type_count
            ))
        })?;
        debug!(
            "Code registration at {:#x}, metadata registration at {:#x}",
            code, meta
        );

        let registration = binary.load_registration(code, meta)?;
        if registration.method_pointers.len() != method_count {
            return Err(Error::InvalidBinary(format!(
                "{} method pointers for {} methods",
                registration.method_pointers.len(),
                method_count
            )));
        }

        info!(
            "IL2CPP tables loaded: {} images, {} types, {} methods",
            metadata.images.len(),
            type_count,
            metadata.method_definitions.len()
        );

        Ok(Self {
            code_pointers: CodePointerTable::new(&registration),
            types: registration.types,
            field_offsets: registration.field_offsets,
            metadata,
            binary,
        })
    }

    pub fn metadata(&self) -> &Il2CppMetadata {
        &self.metadata
    }

    pub fn image_base(&self) -> u64 {
        self.binary.image_base()
    }

    /// Display name of a type definition: simple name, generic parameters as
    /// `<T, U>`, prefixed by the declaring type for nested types.
    pub fn type_display_name(&self, type_index: usize) -> String {
        self.type_name_at_depth(type_index, 0)
    }

    fn type_name_at_depth(&self, type_index: usize, depth: usize) -> String {
        let Some(type_def) = self.metadata.type_definitions.get(type_index) else {
            return String::new();
        };

        let mut name = self
            .metadata
            .string(type_def.name_index)
            .unwrap_or_default()
            .to_string();
        if type_def.generic_container_index >= 0 {
            if let Some(tick) = name.find('`') {
                name.truncate(tick);
            }
            let parameters = self
                .metadata
                .generic_parameter_names(type_def.generic_container_index);
            name = format!("{}<{}>", name, parameters.join(", "));
        }

        let declaring = usize::try_from(type_def.declaring_type_index)
            .ok()
            .and_then(|index| self.types.get(index))
            .and_then(TypeDescriptor::type_definition_index);
        match declaring {
            Some(outer) if depth < MAX_NESTING => {
                format!("{}.{}", self.type_name_at_depth(outer, depth + 1), name)
            }
            _ => name,
        }
    }

    /// Type definitions matching an image prefix and a display name, in table order
    fn matching_types<'s>(
        &'s self,
        image_name: &'s str,
        type_name: &'s str,
    ) -> impl Iterator<Item = (usize, &'s TypeDefinition)> + 's {
        let metadata = &self.metadata;
        metadata
            .images
            .iter()
            .filter(move |image| {
                metadata
                    .string(image.name_index)
                    .is_some_and(|name| starts_with_ignore_case(name, image_name))
            })
            .flat_map(move |image| metadata.type_range(image))
            .filter(move |&index| self.type_display_name(index).eq_ignore_ascii_case(type_name))
            .map(move |index| (index, &metadata.type_definitions[index]))
    }

    /// RVA of `Assembly.Type.Method`, 0 when it cannot be resolved.
    ///
    /// The first method with a matching name decides; overloads further down
    /// the method list are never considered.
    pub fn resolve_rva(&self, full_name: &str) -> u64 {
        let Some((image_name, type_name, method_name)) = split_name(full_name) else {
            return 0;
        };

        for (_, type_def) in self.matching_types(image_name, type_name) {
            let found = self.metadata.method_range(type_def).find(|&index| {
                self.metadata
                    .string(self.metadata.method_definitions[index].name_index)
                    .is_some_and(|name| name.eq_ignore_ascii_case(method_name))
            });
            let Some(definition) = found else {
                continue;
            };

            let method = &self.metadata.method_definitions[definition];
            let pointer = self.code_pointers.pointer_for(method.method_index, definition);
            if pointer == 0 {
                debug!("{} has no code pointer", full_name);
                return 0;
            }
            return pointer.checked_sub(self.image_base()).unwrap_or(0);
        }

        debug!("{} not found in metadata", full_name);
        0
    }

    /// Offset of `Assembly.Type.Field` within its object.
    ///
    /// Instance fields of value types are reported relative to the unboxed
    /// value (the object header is subtracted); static fields are reported
    /// as stored.
    pub fn resolve_field_offset(&self, full_name: &str) -> Option<i32> {
        let (image_name, type_name, field_name) = split_name(full_name)?;

        for (type_index, type_def) in self.matching_types(image_name, type_name) {
            let range = self.metadata.field_range(type_def);
            let start = range.start;
            let found = range.clone().find(|&index| {
                self.metadata
                    .string(self.metadata.field_definitions[index].name_index)
                    .is_some_and(|name| name.eq_ignore_ascii_case(field_name))
            });
            let Some(index) = found else {
                continue;
            };

            let field = &self.metadata.field_definitions[index];
            let is_static = usize::try_from(field.type_index)
                .ok()
                .and_then(|index| self.types.get(index))
                .is_some_and(TypeDescriptor::is_static);
            let array = self.field_offsets.get(type_index).copied().unwrap_or(0);
            let offset = self.binary.field_offset(array, index - start)?;

            let header = layout::object::HEADER_SIZE as i32;
            return Some(if offset > 0 && type_def.is_value_type() && !is_static {
                offset - header
            } else {
                offset
            });
        }
        None
    }
}
