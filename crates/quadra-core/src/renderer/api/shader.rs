// Copyright 2025 eraflo
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

//! Shader identities, sources and the on-disk formats each backend consumes.
//!
//! Text backends read a `<name>.vert` / `<name>.frag` pair (plus an optional
//! `<name>.geom`). Each stage must declare the program it belongs to with a
//! `#program <name>` line. Bytecode backends read a single `<name>.qbc` blob:
//!
//! ```text
//! offset  size  field
//! 0       4     magic "QSBC"
//! 4       2     version (little endian)
//! 6       2     stage mask (bit 0 vertex, bit 1 fragment, bit 2 geometry)
//! 8       1     name length N
//! 9       N     program name (UTF-8)
//! 9+N     ..    stage payload
//! ```

use super::backend::ShaderFormat;
use crate::renderer::error::ShaderError;
use bitflags::bitflags;
use serde::{Deserialize, Serialize};
use std::borrow::Cow;
use std::fmt;
use std::path::Path;

/// Identity of a logical shader. The uniform layout is fixed per identity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum ShaderId {
    /// Solid color, unlit.
    Color,
    /// Textured, lit, shadowed.
    Default,
    /// Depth-only pass for shadow maps.
    Depth,
    /// Screen-space overlay.
    Hud,
    /// Cubemap background.
    Skybox,
    /// Height-blended multi-layer terrain.
    Terrain,
    /// Reflective/refractive water surface.
    Water,
    /// Line rendering of triangle edges.
    Wireframe,
}

impl ShaderId {
    /// Every shader identity.
    pub const ALL: [ShaderId; 8] = [
        ShaderId::Color,
        ShaderId::Default,
        ShaderId::Depth,
        ShaderId::Hud,
        ShaderId::Skybox,
        ShaderId::Terrain,
        ShaderId::Water,
        ShaderId::Wireframe,
    ];

    /// The file stem and `#program` name of the shader.
    pub fn name(&self) -> &'static str {
        match self {
            ShaderId::Color => "color",
            ShaderId::Default => "default",
            ShaderId::Depth => "depth",
            ShaderId::Hud => "hud",
            ShaderId::Skybox => "skybox",
            ShaderId::Terrain => "terrain",
            ShaderId::Water => "water",
            ShaderId::Wireframe => "wireframe",
        }
    }

    /// Looks a shader up by its program name.
    pub fn from_name(name: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|id| id.name() == name)
    }
}

impl fmt::Display for ShaderId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// An opaque handle to a compiled shader module.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ShaderModuleId(pub u64);

bitflags! {
    /// Shader stages present in a module.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct ShaderStages: u16 {
        /// Vertex stage.
        const VERTEX = 1 << 0;
        /// Fragment stage.
        const FRAGMENT = 1 << 1;
        /// Geometry stage.
        const GEOMETRY = 1 << 2;
    }
}

/// Shader code in one of the two on-disk formats.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ShaderSource {
    /// Paired text sources.
    Text {
        /// Vertex stage source.
        vertex: String,
        /// Fragment stage source.
        fragment: String,
        /// Optional geometry stage source.
        geometry: Option<String>,
    },
    /// A precompiled blob.
    Bytecode(Vec<u8>),
}

/// Magic bytes at the start of every bytecode blob.
pub const BYTECODE_MAGIC: [u8; 4] = *b"QSBC";
/// The bytecode version this crate reads and writes.
pub const BYTECODE_VERSION: u16 = 1;

impl ShaderSource {
    /// The format of this source.
    pub fn format(&self) -> ShaderFormat {
        match self {
            ShaderSource::Text { .. } => ShaderFormat::TextSource,
            ShaderSource::Bytecode(_) => ShaderFormat::Bytecode,
        }
    }

    /// The built-in source of `id` in `format`, used when no shader directory is configured.
    pub fn embedded(id: ShaderId, format: ShaderFormat) -> Self {
        match format {
            ShaderFormat::TextSource => ShaderSource::Text {
                vertex: format!("#program {}\n// vertex stage\nvoid main() {{}}\n", id.name()),
                fragment: format!("#program {}\n// fragment stage\nvoid main() {{}}\n", id.name()),
                geometry: None,
            },
            ShaderFormat::Bytecode => ShaderSource::Bytecode(encode_bytecode(
                id,
                ShaderStages::VERTEX | ShaderStages::FRAGMENT,
                &[],
            )),
        }
    }

    /// Reads the source of `id` from `dir` in the layout `format` dictates.
    pub fn load(dir: &Path, id: ShaderId, format: ShaderFormat) -> Result<Self, ShaderError> {
        let read = |ext: &str| {
            let path = dir.join(format!("{}.{ext}", id.name()));
            std::fs::read(&path).map_err(|e| ShaderError::LoadError {
                path: path.display().to_string(),
                source_error: e.to_string(),
            })
        };
        let read_text = |ext: &str| {
            read(ext).and_then(|bytes| {
                String::from_utf8(bytes).map_err(|e| ShaderError::LoadError {
                    path: format!("{}.{ext}", id.name()),
                    source_error: e.to_string(),
                })
            })
        };

        match format {
            ShaderFormat::TextSource => {
                let geometry_path = dir.join(format!("{}.geom", id.name()));
                let geometry = if geometry_path.exists() {
                    Some(read_text("geom")?)
                } else {
                    None
                };
                Ok(ShaderSource::Text {
                    vertex: read_text("vert")?,
                    fragment: read_text("frag")?,
                    geometry,
                })
            }
            ShaderFormat::Bytecode => Ok(ShaderSource::Bytecode(read("qbc")?)),
        }
    }
}

/// A descriptor used to create a [`ShaderModuleId`].
#[derive(Debug, Clone)]
pub struct ShaderModuleDescriptor<'a> {
    /// An optional debug label.
    pub label: Option<Cow<'a, str>>,
    /// The program the source is expected to implement.
    pub program: ShaderId,
    /// The source code.
    pub source: Cow<'a, ShaderSource>,
}

/// Encodes a bytecode blob for `id` with the given stages and payload.
pub fn encode_bytecode(id: ShaderId, stages: ShaderStages, payload: &[u8]) -> Vec<u8> {
    let name = id.name().as_bytes();
    let mut out = Vec::with_capacity(9 + name.len() + payload.len());
    out.extend_from_slice(&BYTECODE_MAGIC);
    out.extend_from_slice(&BYTECODE_VERSION.to_le_bytes());
    out.extend_from_slice(&stages.bits().to_le_bytes());
    out.push(name.len() as u8);
    out.extend_from_slice(name);
    out.extend_from_slice(payload);
    out
}

/// Parses and checks a source against the program it must implement.
///
/// Returns the stages present on success.
pub fn validate_shader_source(
    expected: ShaderId,
    source: &ShaderSource,
) -> Result<ShaderStages, ShaderError> {
    let fail = |details: String| ShaderError::CompilationError {
        label: expected.name().to_string(),
        details,
    };

    match source {
        ShaderSource::Text {
            vertex,
            fragment,
            geometry,
        } => {
            let mut stages = ShaderStages::empty();
            let mut check = |stage: ShaderStages, code: &str| -> Result<(), ShaderError> {
                match declared_program(code) {
                    Some(name) if name == expected.name() => {
                        stages |= stage;
                        Ok(())
                    }
                    Some(name) => Err(fail(format!(
                        "{stage:?} stage declares program '{name}'"
                    ))),
                    None => Err(fail(format!("{stage:?} stage has no #program directive"))),
                }
            };
            check(ShaderStages::VERTEX, vertex)?;
            check(ShaderStages::FRAGMENT, fragment)?;
            if let Some(geometry) = geometry {
                check(ShaderStages::GEOMETRY, geometry)?;
            }
            Ok(stages)
        }
        ShaderSource::Bytecode(bytes) => {
            if bytes.len() < 9 || bytes[0..4] != BYTECODE_MAGIC {
                return Err(fail("missing bytecode magic".to_string()));
            }
            let version = u16::from_le_bytes([bytes[4], bytes[5]]);
            if version != BYTECODE_VERSION {
                return Err(fail(format!("unsupported bytecode version {version}")));
            }
            let stages = ShaderStages::from_bits(u16::from_le_bytes([bytes[6], bytes[7]]))
                .ok_or_else(|| fail("unknown stage bits".to_string()))?;
            if !stages.contains(ShaderStages::VERTEX | ShaderStages::FRAGMENT) {
                return Err(fail("vertex and fragment stages are required".to_string()));
            }
            let len = bytes[8] as usize;
            let name = bytes
                .get(9..9 + len)
                .and_then(|n| std::str::from_utf8(n).ok())
                .ok_or_else(|| fail("truncated program name".to_string()))?;
            if name != expected.name() {
                return Err(fail(format!("blob implements program '{name}'")));
            }
            Ok(stages)
        }
    }
}

fn declared_program(code: &str) -> Option<&str> {
    code.lines()
        .map(str::trim)
        .find_map(|line| line.strip_prefix("#program"))
        .map(str::trim)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_embedded_sources_validate_for_every_shader() {
        for id in ShaderId::ALL {
            for format in [ShaderFormat::TextSource, ShaderFormat::Bytecode] {
                let src = ShaderSource::embedded(id, format);
                assert_eq!(src.format(), format);
                let stages = validate_shader_source(id, &src).unwrap();
                assert!(stages.contains(ShaderStages::VERTEX | ShaderStages::FRAGMENT));
            }
        }
    }

    #[test]
    fn test_mismatched_program_is_a_compile_error() {
        let src = ShaderSource::embedded(ShaderId::Water, ShaderFormat::TextSource);
        let err = validate_shader_source(ShaderId::Default, &src).unwrap_err();
        assert!(matches!(err, ShaderError::CompilationError { .. }));

        let blob = ShaderSource::Bytecode(b"NOPE\x01\x00\x03\x00\x00".to_vec());
        assert!(validate_shader_source(ShaderId::Color, &blob).is_err());
    }

    #[test]
    fn test_load_reports_missing_files() {
        let dir = std::env::temp_dir().join("quadra-shader-load-missing");
        let err = ShaderSource::load(&dir, ShaderId::Hud, ShaderFormat::Bytecode).unwrap_err();
        assert!(matches!(err, ShaderError::LoadError { .. }));
    }

    #[test]
    fn test_shader_names_round_trip() {
        for id in ShaderId::ALL {
            assert_eq!(ShaderId::from_name(id.name()), Some(id));
        }
    }
}
