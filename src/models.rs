use serde::de::Error as SerdeError;
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::sync::Arc;
use tokio::time::Instant;

/// Notation family a raw variant string was recognised as.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Format {
    HgvsCoding,
    HgvsProtein,
    HgvsGenomic,
    Vcf,
    RsId,
    Cnv,
    Unknown,
}

impl Format {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::HgvsCoding => "hgvs_coding",
            Self::HgvsProtein => "hgvs_protein",
            Self::HgvsGenomic => "hgvs_genomic",
            Self::Vcf => "vcf",
            Self::RsId => "rsid",
            Self::Cnv => "cnv",
            Self::Unknown => "unknown",
        }
    }
}

impl fmt::Display for Format {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A raw input string together with its detected format.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VariantNotation {
    raw: String,
    format: Format,
}

impl VariantNotation {
    pub fn new(raw: impl Into<String>, format: Format) -> Self {
        Self {
            raw: raw.into(),
            format,
        }
    }

    pub fn raw(&self) -> &str {
        &self.raw
    }

    pub fn format(&self) -> Format {
        self.format
    }
}

/// One line of the VEP region POST body.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RegionRecord {
    pub chromosome: String,
    pub position: u64,
    pub reference: String,
    pub alternate: String,
    /// INFO column; `None` renders as `.`.
    pub info: Option<String>,
}

impl RegionRecord {
    pub fn to_region_line(&self) -> String {
        format!(
            "{} {} . {} {} . . {}",
            self.chromosome,
            self.position,
            self.reference,
            self.alternate,
            self.info.as_deref().unwrap_or(".")
        )
    }
}

/// Wire-ready form of a variant.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NormalizedRequest {
    /// Sent as the path parameter of a GET.
    Hgvs(String),
    /// Sent as a single-element `variants` list in a POST body.
    Region(RegionRecord),
}

/// Optional enrichment requested from the remote service.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AnnotationFlag {
    Cadd,
    Hgvs,
    Mane,
    Canonical,
}

impl AnnotationFlag {
    pub fn query_param(&self) -> &'static str {
        match self {
            Self::Cadd => "CADD",
            Self::Hgvs => "hgvs",
            Self::Mane => "mane",
            Self::Canonical => "canonical",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct AnnotationOptions {
    /// Enables CADD, HGVS and MANE annotation.
    pub include_annotations: bool,
    pub extra_flags: BTreeSet<AnnotationFlag>,
}

impl Default for AnnotationOptions {
    fn default() -> Self {
        Self {
            include_annotations: true,
            extra_flags: BTreeSet::new(),
        }
    }
}

impl AnnotationOptions {
    pub fn bare() -> Self {
        Self {
            include_annotations: false,
            extra_flags: BTreeSet::new(),
        }
    }

    pub fn with_flag(mut self, flag: AnnotationFlag) -> Self {
        self.extra_flags.insert(flag);
        self
    }

    pub fn flags(&self) -> BTreeSet<AnnotationFlag> {
        let mut flags = self.extra_flags.clone();
        if self.include_annotations {
            flags.extend([AnnotationFlag::Cadd, AnnotationFlag::Hgvs, AnnotationFlag::Mane]);
        }
        flags
    }

    /// Stable `CADD=1&hgvs=1&mane=1` style encoding, empty when no flags are set.
    pub fn query_string(&self) -> String {
        self.flags()
            .iter()
            .map(|flag| format!("{}=1", flag.query_param()))
            .collect::<Vec<_>>()
            .join("&")
    }
}

/// Full, possibly multi-transcript payload returned by VEP.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct AnnotationResponse {
    #[serde(default)]
    pub input: Option<String>,
    #[serde(rename = "assembly_name", default)]
    pub assembly: Option<String>,
    #[serde(rename = "seq_region_name", default)]
    pub chromosome: Option<String>,
    #[serde(rename = "start", default)]
    pub position: Option<u64>,
    #[serde(default)]
    pub end: Option<u64>,
    #[serde(default)]
    pub allele_string: Option<String>,
    #[serde(default)]
    pub most_severe_consequence: Option<String>,
    #[serde(default, deserialize_with = "null_as_empty")]
    pub transcript_consequences: Vec<TranscriptConsequence>,
    #[serde(default, deserialize_with = "null_as_empty")]
    pub colocated_variants: Vec<ColocatedVariant>,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct TranscriptConsequence {
    #[serde(default)]
    pub transcript_id: Option<String>,
    #[serde(default)]
    pub gene_id: Option<String>,
    #[serde(default)]
    pub gene_symbol: Option<String>,
    #[serde(default, deserialize_with = "null_as_empty")]
    pub consequence_terms: Vec<String>,
    #[serde(default)]
    pub impact: Option<String>,
    #[serde(default)]
    pub hgvsc: Option<String>,
    #[serde(default)]
    pub hgvsp: Option<String>,
    #[serde(default, deserialize_with = "flag_from_any")]
    pub mane_select: bool,
    #[serde(default, deserialize_with = "flag_from_any")]
    pub canonical: bool,
    #[serde(rename = "cadd_phred", default)]
    pub cadd_score: Option<f64>,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct ColocatedVariant {
    #[serde(default)]
    pub id: Option<String>,
    #[serde(default)]
    pub gnomad_af: Option<f64>,
    /// Per-allele population frequencies, keyed by allele then population.
    #[serde(default, deserialize_with = "null_as_empty")]
    pub frequencies: BTreeMap<String, BTreeMap<String, f64>>,
}

const GNOMAD_POPULATION_KEYS: [&str; 3] = ["gnomade", "gnomadg", "gnomad"];

impl ColocatedVariant {
    /// gnomAD allele frequency, preferring the flat `gnomad_af` field.
    pub fn allele_frequency(&self) -> Option<f64> {
        if self.gnomad_af.is_some() {
            return self.gnomad_af;
        }
        GNOMAD_POPULATION_KEYS.iter().find_map(|key| {
            self.frequencies
                .values()
                .find_map(|populations| populations.get(*key).copied())
        })
    }
}

/// Canonical flattened view of an [`AnnotationResponse`].
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AnnotationSummary {
    pub input: String,
    pub assembly: Option<String>,
    pub chromosome: Option<String>,
    pub position: Option<u64>,
    pub allele_string: Option<String>,
    pub most_severe_consequence: Option<String>,
    pub impact: Option<String>,
    pub gene_symbol: Option<String>,
    pub gene_id: Option<String>,
    pub transcript_id: Option<String>,
    pub hgvsc: Option<String>,
    pub hgvsp: Option<String>,
    pub cadd_score: Option<f64>,
    pub gnomad_af: Option<f64>,
    pub full_response: Arc<AnnotationResponse>,
}

/// `variant|flags` key under which a response is cached.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct CacheKey(String);

impl CacheKey {
    pub fn new(variant: &str, options: &AnnotationOptions) -> Self {
        Self(format!("{}|{}", variant, options.query_string()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for CacheKey {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str(&self.0)
    }
}

pub struct CacheEntry {
    pub response: Arc<AnnotationResponse>,
    pub expires_at: Option<Instant>,
}

impl CacheEntry {
    pub fn is_expired(&self, now: Instant) -> bool {
        self.expires_at.map_or(false, |expires_at| now >= expires_at)
    }
}

pub struct RateWindow {
    pub window_start: Instant,
    pub count: u32,
    pub limit: u32,
}

impl RateWindow {
    pub fn new(limit: u32) -> Self {
        Self {
            window_start: Instant::now(),
            count: 0,
            limit,
        }
    }
}

fn null_as_empty<'de, D, T>(deserializer: D) -> Result<T, D::Error>
where
    D: Deserializer<'de>,
    T: Deserialize<'de> + Default,
{
    Ok(Option::<T>::deserialize(deserializer)?.unwrap_or_default())
}

/// VEP reports MANE/canonical markers as booleans, 0/1, or a transcript id string.
fn flag_from_any<'de, D>(deserializer: D) -> Result<bool, D::Error>
where
    D: Deserializer<'de>,
{
    match Option::<Value>::deserialize(deserializer)? {
        None | Some(Value::Null) => Ok(false),
        Some(Value::Bool(b)) => Ok(b),
        Some(Value::Number(n)) => Ok(n.as_f64().map_or(false, |v| v != 0.0)),
        Some(Value::String(s)) => Ok(!s.is_empty() && s != "0"),
        Some(other) => Err(D::Error::custom(format!(
            "expected a flag, found {}",
            other
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_region_line_layout() {
        let record = RegionRecord {
            chromosome: "17".to_string(),
            position: 36459258,
            reference: "A".to_string(),
            alternate: "G".to_string(),
            info: None,
        };
        assert_eq!(record.to_region_line(), "17 36459258 . A G . . .");
    }

    #[test]
    fn test_options_query_string_is_stable() {
        let options = AnnotationOptions::default().with_flag(AnnotationFlag::Canonical);
        assert_eq!(options.query_string(), "CADD=1&hgvs=1&mane=1&canonical=1");
        assert_eq!(AnnotationOptions::bare().query_string(), "");
    }

    #[test]
    fn test_cache_key_separates_flag_sets() {
        let with = CacheKey::new("rs56116432", &AnnotationOptions::default());
        let without = CacheKey::new("rs56116432", &AnnotationOptions::bare());
        assert_ne!(with, without);
        assert_eq!(with.as_str(), "rs56116432|CADD=1&hgvs=1&mane=1");
    }

    #[test]
    fn test_transcript_flags_accept_vep_shapes() {
        let transcripts: Vec<TranscriptConsequence> = serde_json::from_value(json!([
            {"transcript_id": "ENST1", "mane_select": "NM_000458.4", "canonical": 1},
            {"transcript_id": "ENST2", "mane_select": null, "canonical": 0},
            {"transcript_id": "ENST3", "mane_select": true},
            {"transcript_id": "ENST4"}
        ]))
        .unwrap();

        assert!(transcripts[0].mane_select && transcripts[0].canonical);
        assert!(!transcripts[1].mane_select && !transcripts[1].canonical);
        assert!(transcripts[2].mane_select);
        assert!(!transcripts[3].mane_select);
    }

    #[test]
    fn test_response_field_names_follow_vep() {
        let response: AnnotationResponse = serde_json::from_value(json!({
            "input": "17 36459258 . A G . . .",
            "assembly_name": "GRCh38",
            "seq_region_name": "17",
            "start": 36459258,
            "allele_string": "A/G",
            "most_severe_consequence": "missense_variant",
            "transcript_consequences": null
        }))
        .unwrap();

        assert_eq!(response.assembly.as_deref(), Some("GRCh38"));
        assert_eq!(response.position, Some(36459258));
        assert!(response.transcript_consequences.is_empty());
        assert!(response.colocated_variants.is_empty());
    }

    #[test]
    fn test_allele_frequency_falls_back_to_frequency_map() {
        let colocated: ColocatedVariant = serde_json::from_value(json!({
            "id": "rs56116432",
            "frequencies": {"G": {"af": 0.2, "gnomadg": 0.0004}}
        }))
        .unwrap();
        assert_eq!(colocated.allele_frequency(), Some(0.0004));

        let flat = ColocatedVariant {
            gnomad_af: Some(0.000001),
            ..Default::default()
        };
        assert_eq!(flat.allele_frequency(), Some(0.000001));
    }
}
