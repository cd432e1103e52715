//! Synthetic metadata + binary pairs for tests
//!
//! Builds a minimal 24.1 `global-metadata.dat` and a two-section image
//! (`.text` at RVA 0x1000, `.data` at RVA 0x3000) whose registrations
//! describe the same types.

use crate::il2cpp::binary::{Il2CppBinary, Section, type_kind};
use crate::il2cpp::metadata::{Il2CppMetadata, header};
use crate::il2cpp::resolver::Il2CppTables;

pub const IMAGE_BASE: u64 = 0x40_0000;

const TEXT_RVA: u32 = 0x1000;
const TEXT_FILE_OFFSET: usize = 0x400;
const TEXT_RAW_SIZE: usize = 0x200;
const DATA_RVA: u32 = 0x3000;
const DATA_FILE_OFFSET: usize = 0x600;

const HEADER_SIZE: usize = 256;
const CODE_REGISTRATION_SLOTS: usize = 14;
const METADATA_REGISTRATION_SLOTS: usize = 16;

/// `IL2CPP_TYPE_I4`, used for every field
const FIELD_KIND: u32 = 0x08;

struct FixtureMethod {
    name: String,
    pointer: Option<u64>,
    generic_pointer: Option<u64>,
}

struct FixtureField {
    name: String,
    offset: i32,
    is_static: bool,
}

struct FixtureType {
    name: String,
    generic_parameters: Vec<String>,
    declaring: Option<usize>,
    value_type: bool,
    methods: Vec<FixtureMethod>,
    fields: Vec<FixtureField>,
}

struct FixtureImage {
    name: String,
    types: Vec<FixtureType>,
}

#[derive(Default)]
pub struct Il2CppFixture {
    images: Vec<FixtureImage>,
}

impl Il2CppFixture {
    pub fn new() -> Self {
        Self::default()
    }

    /// `Game.dll` with `Player { GetHealth @ 0x401000, SetHealth (no code), health @ 0x18 }`
    pub fn game_player() -> Self {
        Self::new()
            .image("Game.dll")
            .class("Player")
            .method("GetHealth", 0x401000)
            .abstract_method("SetHealth")
            .field("health", 0x18)
    }

    pub fn image(mut self, name: &str) -> Self {
        self.images.push(FixtureImage {
            name: name.to_string(),
            types: Vec::new(),
        });
        self
    }

    pub fn class(mut self, name: &str) -> Self {
        if let Some(image) = self.images.last_mut() {
            image.types.push(FixtureType {
                name: name.to_string(),
                generic_parameters: Vec::new(),
                declaring: None,
                value_type: false,
                methods: Vec::new(),
                fields: Vec::new(),
            });
        }
        self
    }

    fn last_type(&mut self) -> &mut FixtureType {
        self.images
            .last_mut()
            .and_then(|image| image.types.last_mut())
            .expect("fixture needs an image and a class first")
    }

    pub fn value_type(mut self) -> Self {
        self.last_type().value_type = true;
        self
    }

    pub fn generic(mut self, parameters: &[&str]) -> Self {
        self.last_type().generic_parameters = parameters.iter().map(|p| p.to_string()).collect();
        self
    }

    /// Nest the last class inside an earlier one
    pub fn nested_in(mut self, outer: &str) -> Self {
        let index = self
            .type_names()
            .iter()
            .position(|name| name == outer)
            .expect("outer class must be declared first");
        self.last_type().declaring = Some(index);
        self
    }

    pub fn method(mut self, name: &str, pointer: u64) -> Self {
        self.last_type().methods.push(FixtureMethod {
            name: name.to_string(),
            pointer: Some(pointer),
            generic_pointer: None,
        });
        self
    }

    pub fn abstract_method(mut self, name: &str) -> Self {
        self.last_type().methods.push(FixtureMethod {
            name: name.to_string(),
            pointer: None,
            generic_pointer: None,
        });
        self
    }

    /// Generic method definition whose code lives in the generic pointer table
    pub fn generic_method(mut self, name: &str, pointer: u64) -> Self {
        self.last_type().methods.push(FixtureMethod {
            name: name.to_string(),
            pointer: None,
            generic_pointer: Some(pointer),
        });
        self
    }

    pub fn field(mut self, name: &str, offset: i32) -> Self {
        self.last_type().fields.push(FixtureField {
            name: name.to_string(),
            offset,
            is_static: false,
        });
        self
    }

    pub fn static_field(mut self, name: &str, offset: i32) -> Self {
        self.last_type().fields.push(FixtureField {
            name: name.to_string(),
            offset,
            is_static: true,
        });
        self
    }

    fn type_names(&self) -> Vec<String> {
        self.types().map(|ty| ty.name.clone()).collect()
    }

    fn types(&self) -> impl Iterator<Item = &FixtureType> {
        self.images.iter().flat_map(|image| image.types.iter())
    }

    fn methods(&self) -> impl Iterator<Item = &FixtureMethod> {
        self.types().flat_map(|ty| ty.methods.iter())
    }

    fn fields(&self) -> impl Iterator<Item = &FixtureField> {
        self.types().flat_map(|ty| ty.fields.iter())
    }

    pub fn code_registration_va(&self) -> u64 {
        IMAGE_BASE + DATA_RVA as u64
    }

    pub fn metadata_registration_va(&self) -> u64 {
        self.code_registration_va() + (CODE_REGISTRATION_SLOTS * 8) as u64
    }

    pub fn tables(&self) -> Il2CppTables {
        let metadata = Il2CppMetadata::parse(&self.metadata_blob()).expect("fixture metadata");
        Il2CppTables::from_parts(self.binary(), metadata).expect("fixture tables must load")
    }

    pub fn metadata_blob(&self) -> Vec<u8> {
        let mut strings = StringHeap::default();
        let mut images = Vec::new();
        let mut type_defs = Vec::new();
        let mut methods = Vec::new();
        let mut fields = Vec::new();
        let mut containers = Vec::new();
        let mut parameters = Vec::new();

        let mut type_index = 0usize;
        let mut method_index = 0i32;
        let mut field_index = 0usize;
        let field_type_base = self.types().count();

        for (image_index, image) in self.images.iter().enumerate() {
            let mut record = Vec::new();
            push_i32(&mut record, strings.intern(&image.name));
            push_i32(&mut record, image_index as i32);
            push_i32(&mut record, type_index as i32);
            push_i32(&mut record, image.types.len() as i32);
            push_i32(&mut record, 0);
            push_i32(&mut record, 0);
            push_i32(&mut record, -1);
            push_i32(&mut record, 0x2000_0001 + image_index as i32);
            push_i32(&mut record, 0);
            push_i32(&mut record, 0);
            images.extend(record);

            for ty in &image.types {
                let container = if ty.generic_parameters.is_empty() {
                    -1
                } else {
                    let container_index = containers.len() / 16;
                    push_i32(&mut containers, type_index as i32);
                    push_i32(&mut containers, ty.generic_parameters.len() as i32);
                    push_i32(&mut containers, 0);
                    push_i32(&mut containers, (parameters.len() / 16) as i32);
                    for (num, name) in ty.generic_parameters.iter().enumerate() {
                        push_i32(&mut parameters, container_index as i32);
                        push_i32(&mut parameters, strings.intern(name));
                        push_u16(&mut parameters, 0);
                        push_u16(&mut parameters, 0);
                        push_u16(&mut parameters, num as u16);
                        push_u16(&mut parameters, 0);
                    }
                    container_index as i32
                };

                let mut record = Vec::new();
                push_i32(&mut record, strings.intern(&ty.name));
                push_i32(&mut record, strings.intern("Game"));
                push_i32(&mut record, type_index as i32); // byval
                push_i32(&mut record, -1); // byref
                push_i32(&mut record, ty.declaring.map_or(-1, |index| index as i32));
                push_i32(&mut record, -1); // parent
                push_i32(&mut record, -1); // element
                push_i32(&mut record, 0);
                push_i32(&mut record, 0);
                push_i32(&mut record, container);
                push_i32(&mut record, 0); // flags
                push_i32(&mut record, field_index as i32);
                push_i32(&mut record, method_index_start(&methods));
                for _ in 0..6 {
                    push_i32(&mut record, -1);
                }
                push_u16(&mut record, ty.methods.len() as u16);
                push_u16(&mut record, 0);
                push_u16(&mut record, ty.fields.len() as u16);
                for _ in 0..5 {
                    push_u16(&mut record, 0);
                }
                push_i32(&mut record, ty.value_type as i32);
                push_i32(&mut record, 0x0200_0001 + type_index as i32);
                type_defs.extend(record);

                for method in &ty.methods {
                    let index = match method.pointer {
                        Some(_) => {
                            method_index += 1;
                            method_index - 1
                        }
                        None => -1,
                    };
                    let definition = methods.len() / 52;
                    let mut record = Vec::new();
                    push_i32(&mut record, strings.intern(&method.name));
                    push_i32(&mut record, type_index as i32);
                    push_i32(&mut record, 0);
                    push_i32(&mut record, 0);
                    push_i32(&mut record, -1);
                    push_i32(&mut record, index);
                    push_i32(&mut record, -1);
                    push_i32(&mut record, -1);
                    push_i32(&mut record, 0);
                    push_i32(&mut record, 0);
                    push_i32(&mut record, 0x0600_0001 + definition as i32);
                    for _ in 0..4 {
                        push_u16(&mut record, 0);
                    }
                    methods.extend(record);
                }

                for field in &ty.fields {
                    push_i32(&mut fields, strings.intern(&field.name));
                    push_i32(&mut fields, (field_type_base + field_index) as i32);
                    push_i32(&mut fields, 0x0400_0001 + field_index as i32);
                    field_index += 1;
                }
                type_index += 1;
            }
        }

        let mut blob = vec![0u8; HEADER_SIZE];
        write_u32(&mut blob, header::SANITY, 0xFAB1_1BAF);
        write_u32(&mut blob, header::VERSION, 24);
        write_u32(&mut blob, header::STRING_LITERAL, HEADER_SIZE as u32);

        for (field, table) in [
            (header::STRINGS, strings.bytes),
            (header::METHODS, methods),
            (header::FIELDS, fields),
            (header::GENERIC_PARAMETERS, parameters),
            (header::GENERIC_CONTAINERS, containers),
            (header::TYPE_DEFINITIONS, type_defs),
            (header::IMAGES, images),
        ] {
            let offset = blob.len() as u32;
            write_u32(&mut blob, field, offset);
            write_u32(&mut blob, field + 4, table.len() as u32);
            blob.extend(table);
        }
        blob
    }

    pub fn binary(&self) -> Il2CppBinary {
        let mut data = DataBuilder::new(IMAGE_BASE + DATA_RVA as u64);
        let code_registration = data.alloc(CODE_REGISTRATION_SLOTS * 8);
        let metadata_registration = data.alloc(METADATA_REGISTRATION_SLOTS * 8);

        let method_pointers: Vec<u64> = self.methods().filter_map(|m| m.pointer).collect();
        let method_pointers_va = data.push_u64s(&method_pointers);
        data.put_u64(code_registration, method_pointers.len() as u64);
        data.put_u64(code_registration + 8, method_pointers_va);

        // One generic table entry + method spec per generic method definition
        let mut generic_pointers = Vec::new();
        let mut generic_table = Vec::new();
        let mut specs = Vec::new();
        for (definition, method) in self.methods().enumerate() {
            if let Some(pointer) = method.generic_pointer {
                let spec_index = specs.len() / 12;
                push_i32(&mut specs, definition as i32);
                push_i32(&mut specs, -1);
                push_i32(&mut specs, 0);
                push_i32(&mut generic_table, spec_index as i32);
                push_i32(&mut generic_table, generic_pointers.len() as i32);
                push_i32(&mut generic_table, 0);
                generic_pointers.push(pointer);
            }
        }
        let generic_pointers_va = data.push_u64s(&generic_pointers);
        data.put_u64(code_registration + 4 * 8, generic_pointers.len() as u64);
        data.put_u64(code_registration + 5 * 8, generic_pointers_va);

        let generic_table_va = data.push_bytes(&generic_table);
        data.put_u64(metadata_registration + 4 * 8, (generic_table.len() / 12) as u64);
        data.put_u64(metadata_registration + 5 * 8, generic_table_va);
        let specs_va = data.push_bytes(&specs);
        data.put_u64(metadata_registration + 8 * 8, (specs.len() / 12) as u64);
        data.put_u64(metadata_registration + 9 * 8, specs_va);

        // Types: one byval record per type definition, then one per field
        let mut type_records = Vec::new();
        for (index, ty) in self.types().enumerate() {
            let kind = if ty.value_type {
                type_kind::VALUETYPE
            } else {
                type_kind::CLASS
            };
            type_records.push((index as u64, (kind as u32) << 16));
        }
        for field in self.fields() {
            let attrs = if field.is_static { 0x11 } else { 0x01 };
            type_records.push((0, FIELD_KIND << 16 | attrs));
        }
        let type_pointers: Vec<u64> = type_records
            .iter()
            .map(|&(datapoint, bits)| data.push_u64s(&[datapoint, bits as u64]))
            .collect();
        let types_va = data.push_u64s(&type_pointers);
        data.put_u64(metadata_registration + 6 * 8, type_pointers.len() as u64);
        data.put_u64(metadata_registration + 7 * 8, types_va);

        let field_offset_arrays: Vec<u64> = self
            .types()
            .map(|ty| {
                if ty.fields.is_empty() {
                    return 0;
                }
                let mut offsets = Vec::new();
                for field in &ty.fields {
                    push_i32(&mut offsets, field.offset);
                }
                data.push_bytes(&offsets)
            })
            .collect();
        let type_count = field_offset_arrays.len() as u64;
        let field_offsets_va = data.push_u64s(&field_offset_arrays);
        data.put_u64(metadata_registration + 10 * 8, type_count);
        data.put_u64(metadata_registration + 11 * 8, field_offsets_va);

        let sizes: Vec<u64> = (0..type_count).map(|_| data.alloc(16)).collect();
        let sizes_va = data.push_u64s(&sizes);
        data.put_u64(metadata_registration + 12 * 8, type_count);
        data.put_u64(metadata_registration + 13 * 8, sizes_va);

        let data_bytes = data.bytes;
        let mut file = vec![0u8; DATA_FILE_OFFSET];
        file[TEXT_FILE_OFFSET..TEXT_FILE_OFFSET + TEXT_RAW_SIZE].fill(0xCC);
        file.extend_from_slice(&data_bytes);

        let sections = vec![
            Section {
                virtual_address: TEXT_RVA,
                virtual_size: 0x1000,
                raw_offset: TEXT_FILE_OFFSET as u32,
                raw_size: TEXT_RAW_SIZE as u32,
                executable: true,
            },
            Section {
                virtual_address: DATA_RVA,
                virtual_size: data_bytes.len() as u32,
                raw_offset: DATA_FILE_OFFSET as u32,
                raw_size: data_bytes.len() as u32,
                executable: false,
            },
        ];
        Il2CppBinary::from_sections(file, IMAGE_BASE, sections)
    }
}

fn method_index_start(methods: &[u8]) -> i32 {
    (methods.len() / 52) as i32
}

#[derive(Default)]
struct StringHeap {
    bytes: Vec<u8>,
}

impl StringHeap {
    fn intern(&mut self, value: &str) -> i32 {
        let index = self.bytes.len() as i32;
        self.bytes.extend_from_slice(value.as_bytes());
        self.bytes.push(0);
        index
    }
}

struct DataBuilder {
    base: u64,
    bytes: Vec<u8>,
}

impl DataBuilder {
    fn new(base: u64) -> Self {
        Self {
            base,
            bytes: Vec::new(),
        }
    }

    fn alloc(&mut self, len: usize) -> u64 {
        let va = self.base + self.bytes.len() as u64;
        self.bytes.resize(self.bytes.len() + len.next_multiple_of(8), 0);
        va
    }

    fn push_bytes(&mut self, bytes: &[u8]) -> u64 {
        if bytes.is_empty() {
            return 0;
        }
        let va = self.alloc(bytes.len());
        let offset = (va - self.base) as usize;
        self.bytes[offset..offset + bytes.len()].copy_from_slice(bytes);
        va
    }

    fn push_u64s(&mut self, values: &[u64]) -> u64 {
        let bytes: Vec<u8> = values.iter().flat_map(|v| v.to_le_bytes()).collect();
        self.push_bytes(&bytes)
    }

    fn put_u64(&mut self, va: u64, value: u64) {
        let offset = (va - self.base) as usize;
        self.bytes[offset..offset + 8].copy_from_slice(&value.to_le_bytes());
    }
}

fn push_i32(out: &mut Vec<u8>, value: i32) {
    out.extend_from_slice(&value.to_le_bytes());
}

fn push_u16(out: &mut Vec<u8>, value: u16) {
    out.extend_from_slice(&value.to_le_bytes());
}

fn write_u32(blob: &mut [u8], at: usize, value: u32) {
    blob[at..at + 4].copy_from_slice(&value.to_le_bytes());
}
