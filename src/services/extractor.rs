use std::sync::Arc;

use crate::models::{AnnotationResponse, AnnotationSummary, TranscriptConsequence};

/// MANE Select first, then the canonical transcript, then the first listed.
pub fn select_primary_transcript(
    transcripts: &[TranscriptConsequence],
) -> Option<&TranscriptConsequence> {
    transcripts
        .iter()
        .find(|t| t.mane_select)
        .or_else(|| transcripts.iter().find(|t| t.canonical))
        .or_else(|| transcripts.first())
}

/// Flattens a raw payload into the summary handed to callers.
///
/// Top-level fields are always carried over; transcript fields stay empty
/// when the payload lists no transcripts.
pub fn summarize(response: Arc<AnnotationResponse>) -> AnnotationSummary {
    let primary = select_primary_transcript(&response.transcript_consequences);
    let gnomad_af = response
        .colocated_variants
        .first()
        .and_then(|colocated| colocated.allele_frequency());

    AnnotationSummary {
        input: response.input.clone().unwrap_or_default(),
        assembly: response.assembly.clone(),
        chromosome: response.chromosome.clone(),
        position: response.position,
        allele_string: response.allele_string.clone(),
        most_severe_consequence: response.most_severe_consequence.clone(),
        impact: primary.and_then(|t| t.impact.clone()),
        gene_symbol: primary.and_then(|t| t.gene_symbol.clone()),
        gene_id: primary.and_then(|t| t.gene_id.clone()),
        transcript_id: primary.and_then(|t| t.transcript_id.clone()),
        hgvsc: primary.and_then(|t| t.hgvsc.clone()),
        hgvsp: primary.and_then(|t| t.hgvsp.clone()),
        cadd_score: primary.and_then(|t| t.cadd_score),
        gnomad_af,
        full_response: Arc::clone(&response),
    }
}
