//! Format detection, validation and wire conversion for variant notations.
//!
//! Detection precedence: VCF-style `chrom-pos-ref-alt`, then rsID, then HGVS,
//! then structural `chrom:start-end:TYPE`. Anything else is [`Format::Unknown`].

use lazy_static::lazy_static;
use regex::Regex;

use crate::errors::AnnotationError;
use crate::models::{Format, NormalizedRequest, RegionRecord, VariantNotation};

const VCF_PATTERN: &str = "chrom-pos-ref-alt (e.g. 17-36459258-A-G)";
const RSID_PATTERN: &str = "rs<digits> (e.g. rs56116432)";
const HGVS_PATTERN: &str = "<accession>:<c.|p.|g.><change> (e.g. NM_000458.4:c.544+1G>A)";
const CNV_PATTERN: &str = "chrom:start-end:TYPE with TYPE one of DEL, DUP, CNV, INV, INS (e.g. 17:36459000-36470000:DEL)";
const STRUCTURAL_TYPES: [&str; 5] = ["DEL", "DUP", "CNV", "INV", "INS"];

lazy_static! {
    static ref VCF_RE: Regex = Regex::new(r"(?i)^(chr)?[\dXYM]+-\d+-[ACGT]+-[ACGT]+$").unwrap();
    static ref RSID_RE: Regex = Regex::new(r"^rs\d+$").unwrap();
    static ref HGVS_RE: Regex = Regex::new(r"^[A-Z_]+[\d.]+:([cgp])\.").unwrap();
    static ref CNV_RE: Regex =
        Regex::new(r"(?i)^(chr)?([\dXYM]+):(\d+)-(\d+):([A-Z]+)$").unwrap();
}

/// Detects the notation family of `input`. Never fails.
pub fn classify(input: &str) -> Format {
    let input = input.trim();

    if VCF_RE.is_match(input) {
        return Format::Vcf;
    }
    if RSID_RE.is_match(input) {
        return Format::RsId;
    }
    if let Some(caps) = HGVS_RE.captures(input) {
        return match &caps[1] {
            "c" => Format::HgvsCoding,
            "p" => Format::HgvsProtein,
            _ => Format::HgvsGenomic,
        };
    }
    if CNV_RE.is_match(input) {
        return Format::Cnv;
    }
    Format::Unknown
}

/// Checks `input` against the rules for `format`.
pub fn validate(input: &str, format: Format) -> Result<(), AnnotationError> {
    let input = input.trim();
    match format {
        Format::Vcf => split_vcf(input).map(|_| ()),
        Format::RsId => {
            if RSID_RE.is_match(input) {
                Ok(())
            } else {
                Err(expected("rsID", input, RSID_PATTERN))
            }
        }
        Format::HgvsCoding | Format::HgvsProtein | Format::HgvsGenomic => {
            validate_hgvs(input, format)
        }
        Format::Cnv => parse_structural(input).map(|_| ()),
        Format::Unknown => Err(unrecognised(input)),
    }
}

/// Converts a validated notation into the request the remote service expects.
pub fn to_remote_request(input: &str, format: Format) -> Result<NormalizedRequest, AnnotationError> {
    let input = input.trim();
    match format {
        Format::Vcf => split_vcf(input).map(NormalizedRequest::Region),
        Format::Cnv => parse_structural(input).map(NormalizedRequest::Region),
        Format::HgvsCoding | Format::HgvsProtein | Format::HgvsGenomic | Format::RsId => {
            validate(input, format)?;
            Ok(NormalizedRequest::Hgvs(input.to_string()))
        }
        Format::Unknown => Err(unrecognised(input)),
    }
}

/// Classifies and validates in one step.
pub fn parse(input: &str) -> Result<(VariantNotation, NormalizedRequest), AnnotationError> {
    let input = input.trim();
    let format = classify(input);
    validate(input, format)?;
    let request = to_remote_request(input, format)?;
    Ok((VariantNotation::new(input, format), request))
}

fn unrecognised(input: &str) -> AnnotationError {
    AnnotationError::InvalidFormat(format!(
        "unrecognised variant notation {:?}; expected one of: HGVS {}, VCF {}, rsID {}, structural {}",
        input, HGVS_PATTERN, VCF_PATTERN, RSID_PATTERN, CNV_PATTERN
    ))
}

fn expected(kind: &str, input: &str, pattern: &str) -> AnnotationError {
    AnnotationError::InvalidFormat(format!(
        "{:?} is not a valid {}; expected {}",
        input, kind, pattern
    ))
}

fn strip_chr_prefix(input: &str) -> &str {
    match input.get(..3) {
        Some(prefix) if prefix.eq_ignore_ascii_case("chr") => &input[3..],
        _ => input,
    }
}

fn is_nucleotides(allele: &str) -> bool {
    !allele.is_empty() && allele.bytes().all(|b| matches!(b, b'A' | b'C' | b'G' | b'T'))
}

fn split_vcf(input: &str) -> Result<RegionRecord, AnnotationError> {
    let fields: Vec<&str> = strip_chr_prefix(input).split('-').collect();
    if fields.len() != 4 || fields.iter().any(|f| f.is_empty()) {
        return Err(expected("VCF variant", input, VCF_PATTERN));
    }

    let position: u64 = fields[1].parse().map_err(|_| {
        AnnotationError::InvalidFormat(format!(
            "position {:?} in {:?} is not numeric; expected {}",
            fields[1], input, VCF_PATTERN
        ))
    })?;

    let reference = fields[2].to_ascii_uppercase();
    let alternate = fields[3].to_ascii_uppercase();
    if !is_nucleotides(&reference) || !is_nucleotides(&alternate) {
        return Err(AnnotationError::InvalidFormat(format!(
            "alleles in {:?} must contain only A, C, G, T; expected {}",
            input, VCF_PATTERN
        )));
    }

    Ok(RegionRecord {
        chromosome: fields[0].to_ascii_uppercase(),
        position,
        reference,
        alternate,
        info: None,
    })
}

fn validate_hgvs(input: &str, format: Format) -> Result<(), AnnotationError> {
    let caps = HGVS_RE
        .captures(input)
        .ok_or_else(|| expected("HGVS expression", input, HGVS_PATTERN))?;

    let wanted = match format {
        Format::HgvsCoding => "c",
        Format::HgvsProtein => "p",
        _ => "g",
    };
    if &caps[1] != wanted {
        return Err(AnnotationError::InvalidFormat(format!(
            "{:?} is not a {}. expression; expected {}",
            input, wanted, HGVS_PATTERN
        )));
    }

    let change = &input[caps[0].len()..];
    if change.trim().is_empty() {
        return Err(AnnotationError::InvalidFormat(format!(
            "{:?} has no change description after {}.; expected {}",
            input, wanted, HGVS_PATTERN
        )));
    }
    Ok(())
}

fn parse_structural(input: &str) -> Result<RegionRecord, AnnotationError> {
    let caps = CNV_RE
        .captures(input)
        .ok_or_else(|| expected("structural variant", input, CNV_PATTERN))?;

    let chromosome = caps[2].to_ascii_uppercase();
    let start: u64 = caps[3]
        .parse()
        .map_err(|_| expected("structural variant", input, CNV_PATTERN))?;
    let end: u64 = caps[4]
        .parse()
        .map_err(|_| expected("structural variant", input, CNV_PATTERN))?;
    let sv_type = caps[5].to_ascii_uppercase();

    if !STRUCTURAL_TYPES.contains(&sv_type.as_str()) {
        return Err(AnnotationError::InvalidFormat(format!(
            "unknown structural variant type {:?}; expected {}",
            sv_type, CNV_PATTERN
        )));
    }
    if start == 0 || start > end {
        return Err(AnnotationError::InvalidFormat(format!(
            "invalid interval {}-{} in {:?}; start must be positive and not after end",
            start, end, input
        )));
    }

    Ok(RegionRecord {
        chromosome,
        position: start,
        reference: "N".to_string(),
        alternate: format!("<{}>", sv_type),
        info: Some(format!("SVTYPE={};END={}", sv_type, end)),
    })
}
