use config::{Config, ConfigError, File, FileFormat};
use serde::de::DeserializeOwned;
use std::fs;
use std::path::PathBuf;

pub struct ConfigLoader;

impl ConfigLoader {
    /// Loads a config file, sniffing the format from the extension.
    /// `$VAR` references are expanded from the environment before parsing;
    /// literal dollars must be escaped as `\$`.
    pub fn load<T: DeserializeOwned>(file_path: PathBuf) -> Result<T, ConfigError> {
        let Some(ext) = file_path.extension() else {
            return Err(ConfigError::NotFound(format!(
                "Could not find file extension on path {file_path:?}"
            )));
        };
        let file_format = match ext.to_str() {
            Some("yaml") | Some("yml") => Ok(FileFormat::Yaml),
            Some("json") => Ok(FileFormat::Json),
            Some("toml") => Ok(FileFormat::Toml),
            Some("ron") => Ok(FileFormat::Ron),
            _ => Err(ConfigError::NotFound(format!(
                "File format not supported. File needs to end with .yaml, .json, .toml or .ron. {file_path:?}"
            ))),
        }?;

        let config_str = fs::read_to_string(&file_path)
            .map_err(|err| ConfigError::NotFound(format!("{file_path:?}: {err}")))?;
        let config_str_with_env_vars = shellexpand::env(&config_str).map_err(|err| {
            ConfigError::Message(format!("Shell expansion of config file failed: {err}"))
        })?;

        let config = Config::builder()
            .add_source(File::from_str(&config_str_with_env_vars, file_format))
            .build()?;

        config.try_deserialize()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::source_registry::{SourceCategory, SourceRegistry, TrackConfig};
    use rstest::{fixture, rstest};
    use serial_test::serial;
    use std::fs::File as StdFile;
    use std::io::Write;
    use tempfile::TempDir;

    const YAML_REGISTRY: &[u8] = br#"
sources:
  panelapp:
    name: "panelapp"
    display_name: "Genomics England PanelApp"
    category: "external-api"
    rate_limit_per_sec: 2
    capabilities: ["supports-per-gene", "count-based"]
    scoring_track:
      track: "count-percentile"
      count_fields: ["panels"]
  clingen:
    name: "clingen"
    display_name: "ClinGen"
    category: "bulk-file"
    bulk_url: "https://search.clinicalgenome.org/kb/gene-validity/download"
    capabilities: ["supports-bulk", "classification-based"]
    scoring_track:
      track: "classification"
"#;

    const TOML_REGISTRY: &[u8] = br#"
[sources.panelapp]
name = "panelapp"
display_name = "Genomics England PanelApp"
category = "external-api"
rate_limit_per_sec = 2
capabilities = ["supports-per-gene", "count-based"]

[sources.panelapp.scoring_track]
track = "count-percentile"
count_fields = ["panels"]

[sources.clingen]
name = "clingen"
display_name = "ClinGen"
category = "bulk-file"
bulk_url = "https://search.clinicalgenome.org/kb/gene-validity/download"
capabilities = ["supports-bulk", "classification-based"]

[sources.clingen.scoring_track]
track = "classification"
"#;

    #[fixture]
    fn temp_dir() -> TempDir {
        tempfile::tempdir().expect("Failed to create temporary directory")
    }

    #[rstest]
    #[case("yaml", YAML_REGISTRY)]
    #[case("yml", YAML_REGISTRY)]
    #[case("toml", TOML_REGISTRY)]
    fn test_load_registry_from_various_formats(
        temp_dir: TempDir,
        #[case] extension: &str,
        #[case] data: &[u8],
    ) {
        let file_path = temp_dir.path().join(format!("sources.{extension}"));
        let mut file = StdFile::create(&file_path).unwrap();
        file.write_all(data).unwrap();

        let registry: SourceRegistry = ConfigLoader::load(file_path).unwrap();

        let panelapp = registry.get("panelapp").unwrap();
        assert_eq!(panelapp.category, SourceCategory::ExternalApi);
        assert_eq!(panelapp.rate_limit_per_sec, 2);
        assert!(matches!(
            panelapp.scoring_track,
            Some(TrackConfig::CountPercentile { .. })
        ));

        let clingen = registry.get("clingen").unwrap();
        assert_eq!(clingen.category, SourceCategory::BulkFile);
        assert!(clingen.bulk_url.is_some());
        assert_eq!(registry.total_active_sources(), 2);
    }

    // Mutates the process environment, so it cannot overlap with other
    // tests that expand variables.
    #[rstest]
    #[serial]
    fn test_env_vars_expand(temp_dir: TempDir) {
        unsafe { std::env::set_var("NEPHROGENE_TEST_URL", "https://example.org/dl") };
        let file_path = temp_dir.path().join("sources.yaml");
        let mut file = StdFile::create(&file_path).unwrap();
        file.write_all(
            br#"
sources:
  clingen:
    name: "clingen"
    display_name: "ClinGen"
    category: "bulk-file"
    bulk_url: "$NEPHROGENE_TEST_URL"
"#,
        )
        .unwrap();

        let registry: SourceRegistry = ConfigLoader::load(file_path).unwrap();
        assert_eq!(
            registry.get("clingen").unwrap().bulk_url.as_deref(),
            Some("https://example.org/dl")
        );
    }

    #[rstest]
    fn test_unsupported_extension_rejected() {
        let err: Result<SourceRegistry, _> =
            ConfigLoader::load(PathBuf::from("test/path/config.exe"));
        assert!(err.is_err());
    }
}
