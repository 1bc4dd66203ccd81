use crate::batch::RetryPolicy;
use crate::prefectures;
use crate::processing::{MunicipalityKeys, OazaKeys};
use crate::quantize::{Quantizer, Rounding, DEFAULT_DECIMALS};
use anyhow::{bail, Context, Result};
use serde::Deserialize;
use std::collections::HashSet;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

const MAX_DECIMALS: u32 = 10;

#[derive(Debug, Deserialize, Clone, Default)]
#[serde(default)]
pub struct AppConfig {
    pub processing: ProcessingConfig,
    pub http: HttpConfig,
    pub municipalities: MunicipalityConfig,
    pub oaza: OazaConfig,
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct ProcessingConfig {
    pub decimals: u32,
    pub rounding: Rounding,
    pub regions: Vec<u8>,
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct HttpConfig {
    pub user_agent: String,
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct MunicipalityConfig {
    /// URL or path, `{code}` is replaced by the two-digit prefecture code.
    pub source: String,
    pub output_dir: PathBuf,
    pub name_fields: Vec<String>,
    pub fallback_name: String,
    pub code_field: String,
    pub timeout_secs: u64,
    pub retries: u32,
    pub retry_delay_secs: u64,
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct OazaConfig {
    /// URL or path, `{code}` is replaced by the two-digit prefecture code.
    pub source: String,
    pub output_dir: PathBuf,
    pub parent_field: String,
    pub label_field: String,
    pub meta_file: String,
    pub timeout_secs: u64,
    pub retries: u32,
    pub retry_delay_secs: u64,
}

impl Default for ProcessingConfig {
    fn default() -> Self {
        ProcessingConfig {
            decimals: DEFAULT_DECIMALS,
            rounding: Rounding::default(),
            regions: prefectures::all(),
        }
    }
}

impl Default for HttpConfig {
    fn default() -> Self {
        HttpConfig {
            user_agent: "Mozilla/5.0".to_string(),
        }
    }
}

impl Default for MunicipalityConfig {
    fn default() -> Self {
        let keys = MunicipalityKeys::default();
        MunicipalityConfig {
            source: "https://raw.githubusercontent.com/smartnews-smri/japan-topography/main/data/municipality/geojson/s0010/N03-21_{code}_210101.json".to_string(),
            output_dir: PathBuf::from("public/data/geojson"),
            name_fields: keys.name_fields,
            fallback_name: keys.fallback_name,
            code_field: keys.code_field,
            timeout_secs: 30,
            retries: 0,
            retry_delay_secs: 3,
        }
    }
}

impl Default for OazaConfig {
    fn default() -> Self {
        let keys = OazaKeys::default();
        OazaConfig {
            source: "https://frogcat.github.io/japan-small-area/{code}.json".to_string(),
            output_dir: PathBuf::from("public/data/oaza"),
            parent_field: keys.parent_field,
            label_field: keys.label_field,
            meta_file: "meta.json".to_string(),
            timeout_secs: 60,
            retries: 1,
            retry_delay_secs: 3,
        }
    }
}

impl AppConfig {
    pub fn load_from_file(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {:?}", path))?;
        let mut config: AppConfig =
            toml::from_str(&content).with_context(|| "Failed to parse TOML configuration")?;
        config.processing.regions = sorted_regions(config.processing.regions)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.processing.decimals > MAX_DECIMALS {
            bail!(
                "`processing.decimals` is {} but at most {} are supported",
                self.processing.decimals,
                MAX_DECIMALS
            );
        }
        validate_regions(&self.processing.regions)?;
        for (section, template) in [
            ("municipalities", &self.municipalities.source),
            ("oaza", &self.oaza.source),
        ] {
            if !template.contains("{code}") {
                bail!("`{section}.source` must contain a `{{code}}` placeholder: {template:?}");
            }
        }
        if self.municipalities.name_fields.is_empty() {
            bail!("`municipalities.name_fields` must list at least one property");
        }
        Ok(())
    }

    pub fn quantizer(&self) -> Quantizer {
        Quantizer::new(self.processing.decimals, self.processing.rounding)
    }
}

/// Regions are always processed in ascending code order, whatever order they were listed in.
pub fn sorted_regions(mut regions: Vec<u8>) -> Result<Vec<u8>> {
    validate_regions(&regions)?;
    regions.sort_unstable();
    Ok(regions)
}

fn validate_regions(regions: &[u8]) -> Result<()> {
    let mut seen = HashSet::new();
    for &region in regions {
        if !prefectures::REGION_CODES.contains(&region) {
            bail!(
                "Region {} is out of range, prefecture codes go from {} to {}",
                region,
                prefectures::REGION_CODES.start(),
                prefectures::REGION_CODES.end()
            );
        }
        if !seen.insert(region) {
            bail!("Region {} is listed twice", region);
        }
    }
    Ok(())
}

impl MunicipalityConfig {
    pub fn keys(&self) -> MunicipalityKeys {
        MunicipalityKeys {
            name_fields: self.name_fields.clone(),
            fallback_name: self.fallback_name.clone(),
            code_field: self.code_field.clone(),
        }
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }

    pub fn retry(&self) -> RetryPolicy {
        RetryPolicy {
            retries: self.retries,
            delay: Duration::from_secs(self.retry_delay_secs),
        }
    }
}

impl OazaConfig {
    pub fn keys(&self) -> OazaKeys {
        OazaKeys {
            parent_field: self.parent_field.clone(),
            label_field: self.label_field.clone(),
        }
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }

    pub fn retry(&self) -> RetryPolicy {
        RetryPolicy {
            retries: self.retries,
            delay: Duration::from_secs(self.retry_delay_secs),
        }
    }
}
