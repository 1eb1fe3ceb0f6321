use std::{collections::BTreeMap, fs, path::Path};

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

/// Eye sub-hierarchy joints collapsed onto the left eye mesh.
pub const EYE_LEFT_JOINTS: [&str; 6] = [
    "FACIAL_L_EyelidUpperA",
    "FACIAL_L_EyelidLowerB",
    "FACIAL_L_EyelidLowerA",
    "FACIAL_L_EyelidUpperB",
    "FACIAL_L_EyeParallel",
    "FACIAL_L_Eye",
];

/// Eye sub-hierarchy joints collapsed onto the right eye mesh.
pub const EYE_RIGHT_JOINTS: [&str; 6] = [
    "FACIAL_R_EyelidUpperA",
    "FACIAL_R_EyelidLowerB",
    "FACIAL_R_EyelidLowerA",
    "FACIAL_R_EyelidUpperB",
    "FACIAL_R_EyeParallel",
    "FACIAL_R_Eye",
];

/// Placeholder replaced by the first retained LOD index in eye mesh patterns.
pub const LOD_PLACEHOLDER: &str = "{lod}";

/// One rigid eye assembly: the joints to anchor and the mesh to anchor them on.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EyeAssemblySettings {
    pub joints: Vec<String>,
    pub mesh_pattern: String,
}

impl EyeAssemblySettings {
    /// Resolves the eye mesh name for a retained LOD.
    pub fn mesh_name(&self, lod: u16) -> String {
        self.mesh_pattern
            .replace(LOD_PLACEHOLDER, &lod.to_string())
    }
}

/// Mouth sub-hierarchy recentering.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MouthSettings {
    pub enabled: bool,
    pub upper_joint: String,
    pub lower_joint: String,
}

impl Default for MouthSettings {
    fn default() -> Self {
        Self {
            enabled: false,
            upper_joint: "FACIAL_C_MouthUpper".to_string(),
            lower_joint: "FACIAL_C_MouthLower".to_string(),
        }
    }
}

/// Joint retargeting settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RetargetSettings {
    pub eyes: Vec<EyeAssemblySettings>,
    pub mouth: MouthSettings,
    /// Convert Z-up target meshes to the archive's Y-up convention.
    pub detect_up_axis: bool,
    /// Per-joint `[x, y, z]` driver scale applied right after the joint is
    /// retargeted. Keyed by joint name.
    pub driver_scales: BTreeMap<String, [f64; 3]>,
}

impl Default for RetargetSettings {
    fn default() -> Self {
        let assembly = |joints: &[&str], mesh: &str| EyeAssemblySettings {
            joints: joints.iter().map(|name| name.to_string()).collect(),
            mesh_pattern: mesh.to_string(),
        };
        Self {
            eyes: vec![
                assembly(&EYE_LEFT_JOINTS, "eyeLeft_lod{lod}_mesh"),
                assembly(&EYE_RIGHT_JOINTS, "eyeRight_lod{lod}_mesh"),
            ],
            mouth: MouthSettings::default(),
            detect_up_axis: true,
            driver_scales: BTreeMap::new(),
        }
    }
}

/// Pose bake settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BakeSettings {
    pub enabled: bool,
    pub mesh_name: String,
    /// Per-axis angle difference sums below this value bake as zero.
    pub noise_threshold: u32,
    /// Worker threads for the per-polygon pass; 0 uses the rayon default.
    pub worker_threads: usize,
    pub reference_texture_path: Option<String>,
}

impl Default for BakeSettings {
    fn default() -> Self {
        Self {
            enabled: true,
            mesh_name: "head_lod0_mesh".to_string(),
            noise_threshold: 100,
            worker_threads: 0,
            reference_texture_path: None,
        }
    }
}

/// Output file names written into the run's output directory.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct OutputSettings {
    pub archive_file_name: String,
    /// Binary glTF of the target scene with the retargeted skeleton and skins.
    pub scene_file_name: String,
    pub atlas_file_name: String,
    pub angle_diff_file_name: String,
    pub diagnostic_file_name: String,
}

impl Default for OutputSettings {
    fn default() -> Self {
        Self {
            archive_file_name: "retargeted.rig".to_string(),
            scene_file_name: "retargeted_rig.glb".to_string(),
            atlas_file_name: "combined_normals.png".to_string(),
            angle_diff_file_name: "angle_diffs.json".to_string(),
            diagnostic_file_name: "retarget.diagnostic.json".to_string(),
        }
    }
}

/// Persisted project settings used by CLI workflows.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ProjectSettings {
    pub archive_path: Option<String>,
    pub scene_path: Option<String>,
    pub output_dir: Option<String>,
    pub retarget: RetargetSettings,
    pub bake: BakeSettings,
    pub output: OutputSettings,
}

/// Writes settings as pretty-printed JSON.
pub fn save_project_settings(path: &Path, settings: &ProjectSettings) -> Result<()> {
    let content = serde_json::to_string_pretty(settings)
        .context("failed to encode settings as JSON")?;
    fs::write(path, content)
        .with_context(|| format!("failed to write settings file: {}", path.display()))?;
    Ok(())
}

/// Reads settings JSON; absent fields take their defaults.
pub fn load_project_settings(path: &Path) -> Result<ProjectSettings> {
    let content = fs::read_to_string(path)
        .with_context(|| format!("failed to read settings file: {}", path.display()))?;
    let settings: ProjectSettings =
        serde_json::from_str(&content).context("settings file is not valid settings JSON")?;
    Ok(settings)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn given_default_settings_when_resolving_eye_meshes_then_lod_is_substituted() {
        let settings = RetargetSettings::default();
        assert_eq!(settings.eyes[0].mesh_name(0), "eyeLeft_lod0_mesh");
        assert_eq!(settings.eyes[1].mesh_name(2), "eyeRight_lod2_mesh");
        assert_eq!(settings.eyes[1].joints.len(), 6);
    }

    #[test]
    fn given_partial_json_when_loading_then_missing_sections_use_defaults() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("settings.json");
        fs::write(&path, r#"{ "bake": { "enabled": true, "mesh_name": "face", "noise_threshold": 50, "worker_threads": 2, "reference_texture_path": null } }"#)
            .expect("write settings");

        let settings = load_project_settings(&path).expect("load settings");
        assert_eq!(settings.bake.mesh_name, "face");
        assert_eq!(settings.bake.noise_threshold, 50);
        assert!(!settings.retarget.mouth.enabled);
        assert_eq!(settings.output.atlas_file_name, "combined_normals.png");
    }

    #[test]
    fn given_driver_scales_only_when_loading_retarget_section_then_other_fields_default() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("settings.json");
        fs::write(&path, r#"{ "retarget": { "driver_scales": { "FACIAL_C_Jaw": [1.0, 2.0, 0.5] } } }"#)
            .expect("write settings");

        let settings = load_project_settings(&path).expect("load settings");
        assert_eq!(settings.retarget.driver_scales["FACIAL_C_Jaw"], [1.0, 2.0, 0.5]);
        assert!(settings.retarget.detect_up_axis);
        assert_eq!(settings.retarget.eyes.len(), 2);
    }

    #[test]
    fn given_saved_settings_when_loading_then_values_survive() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("project.json");
        let mut settings = ProjectSettings::default();
        settings.retarget.mouth.enabled = true;
        settings.bake.reference_texture_path = Some("reference.png".to_string());

        save_project_settings(&path, &settings).expect("save");
        let loaded = load_project_settings(&path).expect("load");
        assert!(loaded.retarget.mouth.enabled);
        assert_eq!(
            loaded.bake.reference_texture_path.as_deref(),
            Some("reference.png")
        );
    }
}
