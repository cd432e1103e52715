//! `GameAssembly.dll` reader
//!
//! Locates the code and metadata registrations of a 64-bit 24.1 build and
//! loads the tables the resolver needs from them.

use std::mem::size_of;

use bytemuck::{Pod, Zeroable};
use tracing::debug;

use crate::error::{Error, Result};
use crate::memory::{ByteBuffer, POINTER_SIZE};

const IMAGE_SCN_MEM_EXECUTE: u32 = 0x2000_0000;

/// Qword slots of `Il2CppCodeRegistration`
mod code_registration {
    pub const METHOD_POINTERS_COUNT: u64 = 0;
    pub const METHOD_POINTERS: u64 = 1;
    pub const GENERIC_METHOD_POINTERS_COUNT: u64 = 4;
    pub const GENERIC_METHOD_POINTERS: u64 = 5;
}

/// Qword slots of `Il2CppMetadataRegistration`
mod metadata_registration {
    pub const GENERIC_METHOD_TABLE_COUNT: u64 = 4;
    pub const GENERIC_METHOD_TABLE: u64 = 5;
    pub const TYPES_COUNT: u64 = 6;
    pub const TYPES: u64 = 7;
    pub const METHOD_SPECS_COUNT: u64 = 8;
    pub const METHOD_SPECS: u64 = 9;
    pub const FIELD_OFFSETS_COUNT: u64 = 10;
    pub const FIELD_OFFSETS: u64 = 11;
    pub const TYPE_DEFINITION_SIZES_COUNT: u64 = 12;
    pub const TYPE_DEFINITION_SIZES: u64 = 13;
}

/// `Il2CppType::attrs` flag for static fields
pub const FIELD_ATTRIBUTE_STATIC: u16 = 0x10;

/// `Il2CppTypeEnum` values that carry a type-definition index as datapoint
pub mod type_kind {
    pub const VALUETYPE: u8 = 0x11;
    pub const CLASS: u8 = 0x12;
}

/// One section header
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Section {
    pub virtual_address: u32,
    pub virtual_size: u32,
    pub raw_offset: u32,
    pub raw_size: u32,
    pub executable: bool,
}

impl Section {
    fn contains_rva(&self, rva: u64) -> bool {
        let start = self.virtual_address as u64;
        let size = self.virtual_size.max(self.raw_size) as u64;
        rva >= start && rva < start + size
    }
}

#[repr(C)]
#[derive(Debug, Clone, Copy, Pod, Zeroable)]
pub struct GenericMethodFunctions {
    pub generic_method_index: i32,
    pub method_index: i32,
    pub invoker_index: i32,
}

#[repr(C)]
#[derive(Debug, Clone, Copy, Pod, Zeroable)]
pub struct MethodSpec {
    pub method_definition_index: i32,
    pub class_index_index: i32,
    pub method_index_index: i32,
}

/// A raw `Il2CppType` record
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TypeDescriptor {
    pub datapoint: u64,
    pub attrs: u16,
    pub kind: u8,
}

impl TypeDescriptor {
    fn from_bits(datapoint: u64, bits: u32) -> Self {
        Self {
            datapoint,
            attrs: (bits & 0xffff) as u16,
            kind: ((bits >> 16) & 0xff) as u8,
        }
    }

    pub fn is_static(&self) -> bool {
        self.attrs & FIELD_ATTRIBUTE_STATIC != 0
    }

    /// Type-definition index for class and value types
    pub fn type_definition_index(&self) -> Option<usize> {
        matches!(self.kind, type_kind::CLASS | type_kind::VALUETYPE)
            .then(|| usize::try_from(self.datapoint).ok())
            .flatten()
    }
}

/// Tables loaded from the two registrations
#[derive(Debug, Clone, Default)]
pub struct Il2CppRegistration {
    pub method_pointers: Vec<u64>,
    pub generic_method_pointers: Vec<u64>,
    pub generic_method_table: Vec<GenericMethodFunctions>,
    pub method_specs: Vec<MethodSpec>,
    pub types: Vec<TypeDescriptor>,
    /// Per type definition: address of its `int32` field offset array, or 0
    pub field_offsets: Vec<u64>,
}

/// The on-disk image of the IL2CPP binary
#[derive(Debug, Clone)]
pub struct Il2CppBinary {
    data: Vec<u8>,
    image_base: u64,
    sections: Vec<Section>,
}

impl Il2CppBinary {
    /// Parse the section table of a PE32+ file
    pub fn from_pe(data: Vec<u8>) -> Result<Self> {
        use pelite::pe64::{Pe, PeFile};

        let (image_base, sections) = {
            let pe = PeFile::from_bytes(&data)
                .map_err(|e| Error::InvalidBinary(format!("not a 64-bit PE image: {}", e)))?;
            let sections: Vec<Section> = pe
                .section_headers()
                .iter()
                .map(|header| Section {
                    virtual_address: header.VirtualAddress,
                    virtual_size: header.VirtualSize,
                    raw_offset: header.PointerToRawData,
                    raw_size: header.SizeOfRawData,
                    executable: header.Characteristics & IMAGE_SCN_MEM_EXECUTE != 0,
                })
                .collect();
            (pe.optional_header().ImageBase, sections)
        };

        debug!(
            "PE image base {:#x}, {} sections",
            image_base,
            sections.len()
        );
        Ok(Self::from_sections(data, image_base, sections))
    }

    pub fn from_sections(data: Vec<u8>, image_base: u64, sections: Vec<Section>) -> Self {
        Self {
            data,
            image_base,
            sections,
        }
    }

    pub fn image_base(&self) -> u64 {
        self.image_base
    }

    fn buffer(&self) -> ByteBuffer<'_> {
        ByteBuffer::new(&self.data)
    }

    fn section_for(&self, va: u64) -> Option<&Section> {
        let rva = va.checked_sub(self.image_base)?;
        self.sections.iter().find(|section| section.contains_rva(rva))
    }

    /// File offset of a virtual address, when it is backed by file data
    pub fn map_va(&self, va: u64) -> Option<usize> {
        let section = self.section_for(va)?;
        let delta = va - self.image_base - section.virtual_address as u64;
        if delta >= section.raw_size as u64 {
            return None;
        }
        let offset = section.raw_offset as u64 + delta;
        (offset < self.data.len() as u64).then_some(offset as usize)
    }

    pub fn is_executable(&self, va: u64) -> bool {
        self.section_for(va).is_some_and(|section| section.executable)
    }

    pub fn read_u64_va(&self, va: u64) -> Option<u64> {
        self.buffer().read_u64_at(self.map_va(va)?)
    }

    pub fn read_i32_va(&self, va: u64) -> Option<i32> {
        self.buffer().read_i32_at(self.map_va(va)?)
    }

    fn read_records<T: Pod>(&self, va: u64, count: u64, what: &str) -> Result<Vec<T>> {
        if count == 0 {
            return Ok(Vec::new());
        }
        let offset = self
            .map_va(va)
            .ok_or_else(|| Error::InvalidBinary(format!("{} at {:#x} is not mapped", what, va)))?;
        let bytes = usize::try_from(count)
            .ok()
            .and_then(|count| count.checked_mul(size_of::<T>()))
            .and_then(|len| self.buffer().slice(offset, len))
            .ok_or_else(|| {
                Error::InvalidBinary(format!("{} ({} entries at {:#x}) exceeds the file", what, count, va))
            })?;
        Ok(bytes
            .chunks_exact(size_of::<T>())
            .map(bytemuck::pod_read_unaligned)
            .collect())
    }

    /// Every aligned qword of the non-executable sections, with its virtual address
    fn data_qwords(&self) -> impl Iterator<Item = (u64, u64)> + '_ {
        let buffer = self.buffer();
        self.sections
            .iter()
            .filter(|section| !section.executable)
            .flat_map(move |section| {
                let start = section.raw_offset as usize;
                let end = (start + section.raw_size as usize).min(buffer.len());
                let section_va = self.image_base + section.virtual_address as u64;
                (start..end.saturating_sub(POINTER_SIZE - 1))
                    .step_by(POINTER_SIZE)
                    .filter_map(move |offset| {
                        let va = section_va + (offset - start) as u64;
                        buffer.read_u64_at(offset).map(|value| (va, value))
                    })
            })
    }

    fn all_pointers(&self, array_va: u64, count: u64, check: impl Fn(u64) -> bool) -> bool {
        self.read_records::<u64>(array_va, count, "pointer array")
            .is_ok_and(|pointers| pointers.into_iter().all(check))
    }

    /// Address of `Il2CppCodeRegistration`: a `methodPointersCount` equal to
    /// `method_count` followed by a pointer to that many code pointers.
    pub fn find_code_registration(&self, method_count: usize) -> Option<u64> {
        let count = method_count as u64;
        if count == 0 {
            return None;
        }
        self.data_qwords()
            .filter(|&(_, value)| value == count)
            .find(|&(va, _)| {
                self.read_u64_va(va + POINTER_SIZE as u64)
                    .is_some_and(|array| self.all_pointers(array, count, |p| self.is_executable(p)))
            })
            .map(|(va, _)| va)
    }

    /// Address of `Il2CppMetadataRegistration`: `fieldOffsetsCount` and
    /// `typeDefinitionsSizesCount` both equal `type_count`, the type table is
    /// at least that long, and the sizes array points into the image.
    pub fn find_metadata_registration(&self, type_count: usize) -> Option<u64> {
        use metadata_registration::*;

        let count = type_count as u64;
        if count == 0 {
            return None;
        }
        let slot = |index: u64| index * POINTER_SIZE as u64;
        self.data_qwords()
            .filter(|&(_, value)| value == count)
            .filter_map(|(va, _)| va.checked_sub(slot(FIELD_OFFSETS_COUNT)))
            .find(|&registration| {
                self.read_u64_va(registration + slot(TYPE_DEFINITION_SIZES_COUNT)) == Some(count)
                    && self
                        .read_u64_va(registration + slot(TYPES_COUNT))
                        .is_some_and(|types| types >= count)
                    && self
                        .read_u64_va(registration + slot(TYPE_DEFINITION_SIZES))
                        .is_some_and(|array| {
                            self.all_pointers(array, count, |p| self.map_va(p).is_some())
                        })
            })
    }

    fn registration_slot(&self, registration: u64, index: u64) -> Result<u64> {
        let va = registration + index * POINTER_SIZE as u64;
        self.read_u64_va(va)
            .ok_or_else(|| Error::InvalidBinary(format!("registration slot {:#x} is not mapped", va)))
    }

    /// Load every table the resolver uses from the two registrations
    pub fn load_registration(&self, code: u64, metadata: u64) -> Result<Il2CppRegistration> {
        use code_registration as code_slots;
        use metadata_registration as meta_slots;

        let pair = |registration: u64, count: u64, array: u64| -> Result<(u64, u64)> {
            Ok((
                self.registration_slot(registration, count)?,
                self.registration_slot(registration, array)?,
            ))
        };

        let (count, array) = pair(code, code_slots::METHOD_POINTERS_COUNT, code_slots::METHOD_POINTERS)?;
        let method_pointers = self.read_records(array, count, "method pointers")?;

        let (count, array) = pair(
            code,
            code_slots::GENERIC_METHOD_POINTERS_COUNT,
            code_slots::GENERIC_METHOD_POINTERS,
        )?;
        let generic_method_pointers = self.read_records(array, count, "generic method pointers")?;

        let (count, array) = pair(
            metadata,
            meta_slots::GENERIC_METHOD_TABLE_COUNT,
            meta_slots::GENERIC_METHOD_TABLE,
        )?;
        let generic_method_table = self.read_records(array, count, "generic method table")?;

        let (count, array) = pair(metadata, meta_slots::METHOD_SPECS_COUNT, meta_slots::METHOD_SPECS)?;
        let method_specs = self.read_records(array, count, "method specs")?;

        let (count, array) = pair(metadata, meta_slots::TYPES_COUNT, meta_slots::TYPES)?;
        let types = self
            .read_records::<u64>(array, count, "types")?
            .into_iter()
            .map(|pointer| self.read_type(pointer))
            .collect::<Result<Vec<_>>>()?;

        let (count, array) = pair(
            metadata,
            meta_slots::FIELD_OFFSETS_COUNT,
            meta_slots::FIELD_OFFSETS,
        )?;
        let field_offsets = self.read_records(array, count, "field offsets")?;

        debug!(
            "Loaded registrations: {} method pointers, {} generic pointers, {} types",
            method_pointers.len(),
            generic_method_pointers.len(),
            types.len()
        );

        Ok(Il2CppRegistration {
            method_pointers,
            generic_method_pointers,
            generic_method_table,
            method_specs,
            types,
            field_offsets,
        })
    }

    fn read_type(&self, va: u64) -> Result<TypeDescriptor> {
        let datapoint = self.read_u64_va(va);
        let bits = self.map_va(va + 8).and_then(|offset| self.buffer().read_u32_at(offset));
        match (datapoint, bits) {
            (Some(datapoint), Some(bits)) => Ok(TypeDescriptor::from_bits(datapoint, bits)),
            _ => Err(Error::InvalidBinary(format!("type record at {:#x} is not mapped", va))),
        }
    }

    /// Offset of the `index`-th field of a type, given the type's offset array
    pub fn field_offset(&self, array: u64, index: usize) -> Option<i32> {
        if array == 0 {
            return None;
        }
        self.read_i32_va(array + 4 * index as u64)
    }
}
