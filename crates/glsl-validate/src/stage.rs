//! Shader stages and validator invocation arguments.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// Compilation stage passed to the validator with `-S`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ShaderStage {
    /// Vertex shader.
    Vertex,
    /// Tessellation control shader.
    TessellationControl,
    /// Tessellation evaluation shader.
    TessellationEvaluation,
    /// Geometry shader.
    Geometry,
    /// Fragment shader.
    Fragment,
    /// Compute shader.
    Compute,
}

impl ShaderStage {
    /// All stages, in mapping priority order.
    pub const ALL: [Self; 6] = [
        Self::Vertex,
        Self::TessellationControl,
        Self::TessellationEvaluation,
        Self::Geometry,
        Self::Fragment,
        Self::Compute,
    ];

    /// The validator's name for this stage.
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Vertex => "vert",
            Self::TessellationControl => "tesc",
            Self::TessellationEvaluation => "tese",
            Self::Geometry => "geom",
            Self::Fragment => "frag",
            Self::Compute => "comp",
        }
    }
}

impl fmt::Display for ShaderStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// File-extension lists selecting the stage of a document.
///
/// Extensions are matched as suffixes of the path, so both `.frag` and
/// `.fs.glsl` style entries work.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct StageExtensions {
    /// Vertex shader extensions.
    pub vertex_shader: Vec<String>,
    /// Tessellation control shader extensions.
    pub tessellation_control_shader: Vec<String>,
    /// Tessellation evaluation shader extensions.
    pub tessellation_evaluation_shader: Vec<String>,
    /// Geometry shader extensions.
    pub geometry_shader: Vec<String>,
    /// Fragment shader extensions.
    pub fragment_shader: Vec<String>,
    /// Compute shader extensions.
    pub compute_shader: Vec<String>,
}

impl Default for StageExtensions {
    fn default() -> Self {
        let ext = |stage: ShaderStage| vec![format!(".{stage}")];
        Self {
            vertex_shader: ext(ShaderStage::Vertex),
            tessellation_control_shader: ext(ShaderStage::TessellationControl),
            tessellation_evaluation_shader: ext(ShaderStage::TessellationEvaluation),
            geometry_shader: ext(ShaderStage::Geometry),
            fragment_shader: ext(ShaderStage::Fragment),
            compute_shader: ext(ShaderStage::Compute),
        }
    }
}

impl StageExtensions {
    /// Extensions configured for `stage`.
    pub fn for_stage(&self, stage: ShaderStage) -> &[String] {
        match stage {
            ShaderStage::Vertex => &self.vertex_shader,
            ShaderStage::TessellationControl => &self.tessellation_control_shader,
            ShaderStage::TessellationEvaluation => &self.tessellation_evaluation_shader,
            ShaderStage::Geometry => &self.geometry_shader,
            ShaderStage::Fragment => &self.fragment_shader,
            ShaderStage::Compute => &self.compute_shader,
        }
    }

    /// Stage for a document path, or `None` if no extension matches.
    pub fn stage_for(&self, path: &str) -> Option<ShaderStage> {
        ShaderStage::ALL.into_iter().find(|&stage| {
            self.for_stage(stage)
                .iter()
                .any(|ext| !ext.is_empty() && path.ends_with(ext.as_str()))
        })
    }

    /// Every configured extension, without duplicates.
    pub fn all(&self) -> Vec<&str> {
        let mut all: Vec<&str> = Vec::new();
        for stage in ShaderStage::ALL {
            for ext in self.for_stage(stage) {
                if !ext.is_empty() && !all.contains(&ext.as_str()) {
                    all.push(ext);
                }
            }
        }
        all
    }
}

/// Build the validator's argument list.
///
/// Source text is read from stdin. Empty `target_environment` and
/// `glsl_version` values omit the corresponding flag. Each define becomes
/// `-D<name>=<value>`, or `-D<name>` when the value is empty, in name order.
pub fn validator_args(
    stage: ShaderStage,
    target_environment: &str,
    glsl_version: &str,
    defines: &BTreeMap<String, String>,
) -> Vec<String> {
    let mut args = vec![
        "--stdin".to_string(),
        "-C".to_string(),
        "-S".to_string(),
        stage.to_string(),
    ];
    if !target_environment.is_empty() {
        args.push("--target-env".to_string());
        args.push(target_environment.to_string());
    }
    if !glsl_version.is_empty() {
        args.push("--glsl-version".to_string());
        args.push(glsl_version.to_string());
    }
    for (name, value) in defines {
        if value.is_empty() {
            args.push(format!("-D{name}"));
        } else {
            args.push(format!("-D{name}={value}"));
        }
    }
    args
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_mapping() {
        let extensions = StageExtensions::default();
        assert_eq!(
            extensions.stage_for("/shaders/light.frag"),
            Some(ShaderStage::Fragment)
        );
        assert_eq!(
            extensions.stage_for("/shaders/sim.comp"),
            Some(ShaderStage::Compute)
        );
        assert_eq!(extensions.stage_for("/shaders/common.glsl"), None);
    }

    #[test]
    fn test_custom_mapping_first_stage_wins() {
        let extensions = StageExtensions {
            vertex_shader: vec![".vs.glsl".to_string()],
            fragment_shader: vec![".glsl".to_string()],
            ..StageExtensions::default()
        };
        assert_eq!(
            extensions.stage_for("a.vs.glsl"),
            Some(ShaderStage::Vertex)
        );
        assert_eq!(extensions.stage_for("a.glsl"), Some(ShaderStage::Fragment));
        assert_eq!(extensions.stage_for("a.vert"), None);
    }

    #[test]
    fn test_empty_extension_never_matches() {
        let extensions = StageExtensions {
            geometry_shader: vec![String::new()],
            ..StageExtensions::default()
        };
        assert_eq!(extensions.stage_for("anything"), None);
        assert!(!extensions.all().contains(&""));
    }

    #[test]
    fn test_validator_args() {
        assert_eq!(
            validator_args(ShaderStage::Fragment, "", "", &BTreeMap::new()),
            vec!["--stdin", "-C", "-S", "frag"]
        );
        assert_eq!(
            validator_args(ShaderStage::Vertex, "vulkan1.2", "450", &BTreeMap::new()),
            vec![
                "--stdin",
                "-C",
                "-S",
                "vert",
                "--target-env",
                "vulkan1.2",
                "--glsl-version",
                "450"
            ]
        );
    }

    #[test]
    fn test_validator_args_defines_in_name_order() {
        let defines = BTreeMap::from([
            ("USE_SHADOWS".to_string(), "1".to_string()),
            ("LIGHT_COUNT".to_string(), "4".to_string()),
            ("DEBUG".to_string(), String::new()),
        ]);
        assert_eq!(
            validator_args(ShaderStage::Compute, "", "", &defines),
            vec![
                "--stdin",
                "-C",
                "-S",
                "comp",
                "-DDEBUG",
                "-DLIGHT_COUNT=4",
                "-DUSE_SHADOWS=1"
            ]
        );
    }
}
