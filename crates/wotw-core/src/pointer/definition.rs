//! Serializable pointer definitions
//!
//! Definitions describe *how* to find each named pointer; they carry no
//! process state. [`PointerDefinition::build`] turns one into a fresh
//! [`ProgramPointer`]. Signatures are compiled while deserializing, so a
//! malformed pattern fails the whole load instead of a later search.

use std::fs;
use std::path::Path;

use serde::{Deserialize, Serialize};
use tracing::info;

use crate::error::Result;
use crate::pointer::finder::{AutoDeref, EngineVersion, Finder, StaticOffsetsFinder};
use crate::pointer::program::ProgramPointer;
use crate::scan::Signature;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "kebab-case")]
pub enum FinderDefinition {
    Rva {
        #[serde(default)]
        version: EngineVersion,
        #[serde(default)]
        auto_deref: AutoDeref,
        full_name: String,
        #[serde(default)]
        post_offset: i64,
    },
    Signature {
        #[serde(default)]
        version: EngineVersion,
        #[serde(default)]
        auto_deref: AutoDeref,
        signature: Signature,
        #[serde(default)]
        relative: Vec<i64>,
    },
    StaticOffsets {
        #[serde(default)]
        version: EngineVersion,
        #[serde(default)]
        auto_deref: AutoDeref,
        offsets: Vec<i64>,
    },
}

impl FinderDefinition {
    pub fn build(&self) -> Finder {
        match self {
            FinderDefinition::Rva {
                version,
                auto_deref,
                full_name,
                post_offset,
            } => Finder::rva(*version, *auto_deref, full_name.clone(), *post_offset),
            FinderDefinition::Signature {
                version,
                auto_deref,
                signature,
                relative,
            } => Finder::signature(*version, *auto_deref, signature.clone(), relative.clone()),
            FinderDefinition::StaticOffsets {
                version,
                auto_deref,
                offsets,
            } => Finder::StaticOffsets(
                StaticOffsetsFinder::new(*version, offsets.clone()).with_auto_deref(*auto_deref),
            ),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PointerDefinition {
    pub name: String,
    /// Module the pointer lives in; the main module when absent
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub module: Option<String>,
    pub finders: Vec<FinderDefinition>,
}

impl PointerDefinition {
    pub fn build(&self) -> ProgramPointer {
        let pointer = ProgramPointer::new(
            self.name.clone(),
            self.finders.iter().map(FinderDefinition::build).collect(),
        );
        match &self.module {
            Some(module) => pointer.in_module(module.clone()),
            None => pointer,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PointerDefinitionSet {
    pub pointers: Vec<PointerDefinition>,
}

impl PointerDefinitionSet {
    pub fn get(&self, name: &str) -> Option<&PointerDefinition> {
        self.pointers
            .iter()
            .find(|definition| definition.name.eq_ignore_ascii_case(name))
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.pointers.iter().map(|definition| definition.name.as_str())
    }

    pub fn len(&self) -> usize {
        self.pointers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pointers.is_empty()
    }
}

/// Load a definition set from a JSON file
pub fn load_definitions<P: AsRef<Path>>(path: P) -> Result<PointerDefinitionSet> {
    let content = fs::read_to_string(path.as_ref())?;
    let set: PointerDefinitionSet = serde_json::from_str(&content)?;
    info!(
        "Loaded {} pointer definitions from {}",
        set.len(),
        path.as_ref().display()
    );
    Ok(set)
}

pub fn save_definitions<P: AsRef<Path>>(set: &PointerDefinitionSet, path: P) -> Result<()> {
    let content = serde_json::to_string_pretty(set)?;
    fs::write(path.as_ref(), content)?;
    info!("Saved pointer definitions to {}", path.as_ref().display());
    Ok(())
}

/// Static anchors for the supported game build.
///
/// Each signature ends next to a `mov reg, [rip+disp32]` that loads a class's
/// static field block; the offset points at the displacement.
const BUILTIN_SIGNATURES: &[(&str, &str, i64)] = &[
    (
        "Characters",
        "488B80B80000004C8B40084D85C0743D488B15????????B90C000000E8????????488BF84885DB743C488B4B304885C9742D33D2E8????????4885C0741B48897818488B5C24504883C4405FC3",
        -0x4,
    ),
    (
        "GameWorld",
        "4C8BDC55565741544155415641574883EC5049C743A8FEFFFFFF49895B104C8BE933ED",
        0xa7,
    ),
    (
        "PlayerUberStateGroup",
        "488B05????????488B88B8000000488B014885C0742C488B48184885C9741D33D2E8????????4885C07423488B40184885C074148B40384883C448C3",
        0x3,
    ),
    (
        "TitleScreenManager",
        "9033C9FF15????????90C605????????01488B05????????F6802701000002741883B8D800000000750F488BC8E8????????488B05????????488B80B8000000488928488B05",
        0x35,
    ),
    (
        "GameStateMachine",
        "9033C9FF15????????90C605????????01488B1D????????488B83B8000000488B004885C00F85C6000000488BCBE8????????488B43604885C074278B08E8",
        0x14,
    ),
    (
        "GameController",
        "014C8975288B04244883EC20488D4C24308B0148894D20C785C0000000FFFFFFFF488B05????????F6802701000002741883B8D800000000750F488BC8",
        0x45,
    ),
    (
        "SeinWorldState",
        "9033C9FF15????????90C605????????01488B05????????488B88B8000000488939BA0E000000488B0D????????E8????????488BD8488B77184885C0",
        0x14,
    ),
    (
        "ScenesManager",
        "9033C9FF15????????90C605????????01488B05????????488B88B8000000488931488B1D????????488BCBE8????????488B43604885C074278B08E8????????483B05????????7517",
        0x14,
    ),
];

/// The built-in definition set, with every signature compiled
pub fn builtin_definitions() -> Result<PointerDefinitionSet> {
    let pointers = BUILTIN_SIGNATURES
        .iter()
        .map(|&(name, pattern, offset)| {
            Ok(PointerDefinition {
                name: name.to_string(),
                module: None,
                finders: vec![FinderDefinition::Signature {
                    version: EngineVersion::V1,
                    auto_deref: AutoDeref::Single,
                    signature: Signature::parse(pattern)?,
                    relative: vec![offset, 0],
                }],
            })
        })
        .collect::<Result<Vec<_>>>()?;
    Ok(PointerDefinitionSet { pointers })
}
