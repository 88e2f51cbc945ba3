// SPDX-License-Identifier: Apache-2.0

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::graph::DependencyKind;
use crate::image_ref::ImageRef;

/// What a `FROM`, `COPY --from` or `RUN --mount=from=` reference resolved to.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum SourceRef {
    Stage { index: usize, alias: Option<String> },
    External { reference: ImageRef },
    Scratch,
    /// A build-argument expression that could not be resolved statically.
    Unresolved { expression: String },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Directive {
    pub value: String,
    pub line: u32,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CopyFromRef {
    pub source: SourceRef,
    pub via: DependencyKind,
    pub line: u32,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StageInstructions {
    pub user: Option<Directive>,
    pub healthcheck: Option<Directive>,
    pub copy_from_refs: Vec<CopyFromRef>,
    pub labels: BTreeMap<String, String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ManifestStage {
    pub index: usize,
    pub line: u32,
    pub alias: Option<String>,
    pub platform: Option<String>,
    pub base: SourceRef,
    pub instructions: StageInstructions,
}

impl ManifestStage {
    /// File-local name of the stage: its alias, or its position.
    pub fn local_name(&self) -> String {
        self.alias
            .clone()
            .unwrap_or_else(|| self.index.to_string())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Manifest {
    pub path: String,
    pub stages: Vec<ManifestStage>,
}

impl Manifest {
    pub fn final_stage(&self) -> Option<&ManifestStage> {
        self.stages.last()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ManifestError {
    UndefinedStageReference {
        file: String,
        line: u32,
        reference: String,
    },
    DuplicateStageAlias {
        file: String,
        line: u32,
        alias: String,
        first_line: u32,
    },
    InstructionBeforeFrom {
        file: String,
        line: u32,
        keyword: String,
    },
    MalformedFrom {
        file: String,
        line: u32,
        detail: String,
    },
    EmptyManifest {
        file: String,
    },
    /// The file exists but could not be read as text.
    Unreadable {
        file: String,
        detail: String,
    },
}

impl ManifestError {
    pub fn code(&self) -> &'static str {
        match self {
            Self::UndefinedStageReference { .. } => crate::codes::UNDEFINED_STAGE_REFERENCE,
            Self::DuplicateStageAlias { .. } => crate::codes::DUPLICATE_STAGE_ALIAS,
            Self::InstructionBeforeFrom { .. } => crate::codes::INSTRUCTION_BEFORE_FROM,
            Self::MalformedFrom { .. } => crate::codes::MALFORMED_FROM,
            Self::EmptyManifest { .. } => crate::codes::EMPTY_MANIFEST,
            Self::Unreadable { .. } => crate::codes::UNREADABLE_MANIFEST,
        }
    }

    pub fn file(&self) -> &str {
        match self {
            Self::UndefinedStageReference { file, .. }
            | Self::DuplicateStageAlias { file, .. }
            | Self::InstructionBeforeFrom { file, .. }
            | Self::MalformedFrom { file, .. }
            | Self::EmptyManifest { file }
            | Self::Unreadable { file, .. } => file,
        }
    }

    /// Description without the file and line prefix.
    pub fn message(&self) -> String {
        match self {
            Self::UndefinedStageReference { reference, .. } => format!(
                "reference `{reference}` is neither an earlier stage nor a valid image"
            ),
            Self::DuplicateStageAlias {
                alias, first_line, ..
            } => format!("stage alias `{alias}` already defined on line {first_line}"),
            Self::InstructionBeforeFrom { keyword, .. } => {
                format!("`{keyword}` appears before the first FROM")
            }
            Self::MalformedFrom { detail, .. } => format!("malformed FROM: {detail}"),
            Self::EmptyManifest { .. } => "manifest declares no stages".to_string(),
            Self::Unreadable { detail, .. } => format!("manifest could not be read: {detail}"),
        }
    }

    pub fn line(&self) -> Option<u32> {
        match self {
            Self::UndefinedStageReference { line, .. }
            | Self::DuplicateStageAlias { line, .. }
            | Self::InstructionBeforeFrom { line, .. }
            | Self::MalformedFrom { line, .. } => Some(*line),
            Self::EmptyManifest { .. } | Self::Unreadable { .. } => None,
        }
    }
}

impl fmt::Display for ManifestError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.line() {
            Some(line) => write!(f, "{}:{line}: {}", self.file(), self.message()),
            None => write!(f, "{}: {}", self.file(), self.message()),
        }
    }
}

impl std::error::Error for ManifestError {}
