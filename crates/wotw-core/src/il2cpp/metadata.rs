//! `global-metadata.dat` reader
//!
//! Only the 24.1 layout is understood. Record structs mirror the on-disk
//! layout exactly and are read with `bytemuck`, so every size below is a
//! hard requirement rather than a hint.

use std::mem::size_of;
use std::ops::Range;

use bytemuck::{Pod, Zeroable};
use tracing::debug;

use crate::error::{Error, Result};
use crate::memory::ByteBuffer;

pub const METADATA_SANITY: u32 = 0xFAB1_1BAF;
pub const SUPPORTED_VERSION: i32 = 24;

/// `stringLiteralOffset` value that identifies the 24.2 header
const V24_2_STRING_LITERAL_OFFSET: u32 = 264;

/// 24.0 images have no custom attribute range
const V24_0_IMAGE_SIZE: usize = 32;

/// Byte offsets of the header fields in use. Each table is an
/// (offset: u32, size: i32) pair.
pub mod header {
    pub const SANITY: usize = 0;
    pub const VERSION: usize = 4;
    pub const STRING_LITERAL: usize = 8;
    pub const STRINGS: usize = 24;
    pub const METHODS: usize = 48;
    pub const FIELDS: usize = 96;
    pub const GENERIC_PARAMETERS: usize = 104;
    pub const GENERIC_CONTAINERS: usize = 120;
    pub const TYPE_DEFINITIONS: usize = 160;
    pub const IMAGES: usize = 176;

    /// Smallest header that covers every field above
    pub const MIN_SIZE: usize = 184;
}

#[repr(C)]
#[derive(Debug, Clone, Copy, Pod, Zeroable)]
pub struct ImageDefinition {
    pub name_index: i32,
    pub assembly_index: i32,
    pub type_start: i32,
    pub type_count: u32,
    pub exported_type_start: i32,
    pub exported_type_count: u32,
    pub entry_point_index: i32,
    pub token: u32,
    pub custom_attribute_start: i32,
    pub custom_attribute_count: u32,
}

#[repr(C)]
#[derive(Debug, Clone, Copy, Pod, Zeroable)]
pub struct TypeDefinition {
    pub name_index: i32,
    pub namespace_index: i32,
    pub byval_type_index: i32,
    pub byref_type_index: i32,
    pub declaring_type_index: i32,
    pub parent_index: i32,
    pub element_type_index: i32,
    pub rgctx_start_index: i32,
    pub rgctx_count: i32,
    pub generic_container_index: i32,
    pub flags: u32,
    pub field_start: i32,
    pub method_start: i32,
    pub event_start: i32,
    pub property_start: i32,
    pub nested_types_start: i32,
    pub interfaces_start: i32,
    pub vtable_start: i32,
    pub interface_offsets_start: i32,
    pub method_count: u16,
    pub property_count: u16,
    pub field_count: u16,
    pub event_count: u16,
    pub nested_type_count: u16,
    pub vtable_count: u16,
    pub interfaces_count: u16,
    pub interface_offsets_count: u16,
    pub bitfield: u32,
    pub token: u32,
}

impl TypeDefinition {
    pub fn is_value_type(&self) -> bool {
        self.bitfield & 1 != 0
    }
}

#[repr(C)]
#[derive(Debug, Clone, Copy, Pod, Zeroable)]
pub struct MethodDefinition {
    pub name_index: i32,
    pub declaring_type: i32,
    pub return_type: i32,
    pub parameter_start: i32,
    pub generic_container_index: i32,
    /// Index into the code registration's method pointers, -1 for none
    pub method_index: i32,
    pub invoker_index: i32,
    pub delegate_wrapper_index: i32,
    pub rgctx_start_index: i32,
    pub rgctx_count: i32,
    pub token: u32,
    pub flags: u16,
    pub iflags: u16,
    pub slot: u16,
    pub parameter_count: u16,
}

#[repr(C)]
#[derive(Debug, Clone, Copy, Pod, Zeroable)]
pub struct FieldDefinition {
    pub name_index: i32,
    /// Index into the metadata registration's type table
    pub type_index: i32,
    pub token: u32,
}

#[repr(C)]
#[derive(Debug, Clone, Copy, Pod, Zeroable)]
pub struct GenericContainer {
    pub owner_index: i32,
    pub type_argc: i32,
    pub is_method: i32,
    pub generic_parameter_start: i32,
}

#[repr(C)]
#[derive(Debug, Clone, Copy, Pod, Zeroable)]
pub struct GenericParameter {
    pub owner_index: i32,
    pub name_index: i32,
    pub constraints_start: i16,
    pub constraints_count: i16,
    pub num: u16,
    pub flags: u16,
}

/// Parsed metadata tables
#[derive(Debug, Clone)]
pub struct Il2CppMetadata {
    pub version: i32,
    strings: Vec<u8>,
    pub images: Vec<ImageDefinition>,
    pub type_definitions: Vec<TypeDefinition>,
    pub method_definitions: Vec<MethodDefinition>,
    pub field_definitions: Vec<FieldDefinition>,
    pub generic_containers: Vec<GenericContainer>,
    pub generic_parameters: Vec<GenericParameter>,
}

impl Il2CppMetadata {
    pub fn parse(data: &[u8]) -> Result<Self> {
        let buf = ByteBuffer::new(data);
        if buf.len() < header::MIN_SIZE {
            return Err(Error::InvalidMetadata(format!(
                "file is {} bytes, header needs {}",
                buf.len(),
                header::MIN_SIZE
            )));
        }

        let sanity = buf.read_u32_at(header::SANITY).unwrap_or_default();
        if sanity != METADATA_SANITY {
            return Err(Error::InvalidMetadata(format!(
                "bad sanity value {:#010x}",
                sanity
            )));
        }

        let version = buf.read_i32_at(header::VERSION).unwrap_or_default();
        if version != SUPPORTED_VERSION {
            return Err(unsupported(version.to_string()));
        }
        if buf.read_u32_at(header::STRING_LITERAL) == Some(V24_2_STRING_LITERAL_OFFSET) {
            return Err(unsupported("24.2".to_string()));
        }

        let images_range = table_range(&buf, header::IMAGES, "images")?;
        if is_v24_0(&buf, &images_range) {
            return Err(unsupported("24.0".to_string()));
        }

        let strings_range = table_range(&buf, header::STRINGS, "strings")?;
        let metadata = Self {
            version,
            strings: data[strings_range].to_vec(),
            images: read_table(data, images_range, "images")?,
            type_definitions: read_section(&buf, header::TYPE_DEFINITIONS, "type definitions")?,
            method_definitions: read_section(&buf, header::METHODS, "methods")?,
            field_definitions: read_section(&buf, header::FIELDS, "fields")?,
            generic_containers: read_section(&buf, header::GENERIC_CONTAINERS, "generic containers")?,
            generic_parameters: read_section(&buf, header::GENERIC_PARAMETERS, "generic parameters")?,
        };

        debug!(
            "Parsed metadata v{}: {} images, {} types, {} methods, {} fields",
            version,
            metadata.images.len(),
            metadata.type_definitions.len(),
            metadata.method_definitions.len(),
            metadata.field_definitions.len()
        );
        Ok(metadata)
    }

    /// Entry of the string heap; `None` for an index outside the heap
    pub fn string(&self, index: i32) -> Option<&str> {
        let index = usize::try_from(index).ok()?;
        ByteBuffer::new(&self.strings).read_cstr_at(index)
    }

    /// Number of methods that own a direct code pointer
    pub fn method_pointer_count(&self) -> usize {
        self.method_definitions
            .iter()
            .filter(|method| method.method_index >= 0)
            .count()
    }

    pub fn type_range(&self, image: &ImageDefinition) -> Range<usize> {
        clamped_range(image.type_start, image.type_count as usize, self.type_definitions.len())
    }

    pub fn method_range(&self, type_def: &TypeDefinition) -> Range<usize> {
        clamped_range(
            type_def.method_start,
            type_def.method_count as usize,
            self.method_definitions.len(),
        )
    }

    pub fn field_range(&self, type_def: &TypeDefinition) -> Range<usize> {
        clamped_range(
            type_def.field_start,
            type_def.field_count as usize,
            self.field_definitions.len(),
        )
    }

    /// Names of a generic container's parameters, in declaration order
    pub fn generic_parameter_names(&self, container_index: i32) -> Vec<&str> {
        let Some(container) = usize::try_from(container_index)
            .ok()
            .and_then(|index| self.generic_containers.get(index))
        else {
            return Vec::new();
        };
        let start = container.generic_parameter_start.max(0) as usize;
        let count = container.type_argc.max(0) as usize;
        self.generic_parameters
            .iter()
            .skip(start)
            .take(count)
            .map(|parameter| self.string(parameter.name_index).unwrap_or("?"))
            .collect()
    }
}

fn unsupported(actual: String) -> Error {
    Error::UnsupportedMetadataVersion {
        expected: "24.1".to_string(),
        actual,
    }
}

fn clamped_range(start: i32, count: usize, len: usize) -> Range<usize> {
    let start = usize::try_from(start).unwrap_or(len).min(len);
    start..start.saturating_add(count).min(len)
}

fn table_range(buf: &ByteBuffer<'_>, field: usize, what: &str) -> Result<Range<usize>> {
    let (Some(offset), Some(size)) = (buf.read_u32_at(field), buf.read_i32_at(field + 4)) else {
        return Err(Error::InvalidMetadata(format!("{} header entry missing", what)));
    };
    let size = usize::try_from(size)
        .map_err(|_| Error::InvalidMetadata(format!("{} table has negative size", what)))?;
    let start = offset as usize;
    let end = start
        .checked_add(size)
        .filter(|&end| end <= buf.len())
        .ok_or_else(|| {
            Error::InvalidMetadata(format!(
                "{} table {:#x}+{:#x} exceeds file size {:#x}",
                what,
                start,
                size,
                buf.len()
            ))
        })?;
    Ok(start..end)
}

fn read_section<T: Pod>(buf: &ByteBuffer<'_>, field: usize, what: &str) -> Result<Vec<T>> {
    let range = table_range(buf, field, what)?;
    read_table(buf.as_slice(), range, what)
}

fn read_table<T: Pod>(data: &[u8], range: Range<usize>, what: &str) -> Result<Vec<T>> {
    let record = size_of::<T>();
    let bytes = &data[range];
    if bytes.len() % record != 0 {
        return Err(Error::InvalidMetadata(format!(
            "{} table size {:#x} is not a multiple of {}",
            what,
            bytes.len(),
            record
        )));
    }
    Ok(bytes
        .chunks_exact(record)
        .map(bytemuck::pod_read_unaligned)
        .collect())
}

/// 24.0 shares the version number with 24.1; its images carry token 1 at a
/// 32-byte stride.
fn is_v24_0(buf: &ByteBuffer<'_>, images: &Range<usize>) -> bool {
    let count = images.len() / V24_0_IMAGE_SIZE;
    count > 0
        && (0..count).all(|index| {
            buf.read_u32_at(images.start + index * V24_0_IMAGE_SIZE + 28) == Some(1)
        })
}
