//! Classify command implementation.

use seqsync_client::{Classification, Sequencer};
use seqsync_protocol::{SequenceNumber, UpdateEnvelope};
use serde::Serialize;
use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::Path;
use tracing::debug;

/// Classification of one capture line.
#[derive(Debug, Serialize)]
pub struct LineReport {
    /// 1-based line number.
    pub line: usize,
    /// Update kind, if the line parsed.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub kind: Option<String>,
    /// Sequence number, if any.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sequence: Option<u64>,
    /// Outcome name.
    pub outcome: String,
    /// Extra detail for anomalies.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,
}

/// Summary of a capture.
#[derive(Debug, Default, Serialize)]
pub struct ClassifyReport {
    /// Non-blank lines read.
    pub lines: usize,
    /// Updates accepted in order.
    pub in_order: usize,
    /// Updates at or below the last accepted sequence.
    pub duplicates: usize,
    /// Updates past the expected sequence.
    pub gaps: usize,
    /// Updates without a sequence.
    pub unsequenced: usize,
    /// Lines that are not envelopes.
    pub invalid: usize,
    /// Envelopes whose kind or payload does not decode.
    pub undecodable: usize,
    /// Last accepted sequence after the capture.
    pub last_accepted: u64,
    /// Every line that was not accepted in order.
    pub anomalies: Vec<LineReport>,
}

/// Runs the classify command.
pub fn run(path: &Path, start: u64, format: &str) -> Result<(), Box<dyn std::error::Error>> {
    if !path.exists() {
        return Err(format!("Capture file not found: {:?}", path).into());
    }

    let file = File::open(path)?;
    let report = classify(BufReader::new(file), SequenceNumber::new(start))?;

    match format {
        "json" => {
            println!("{}", serde_json::to_string_pretty(&report)?);
        }
        _ => {
            print_text_output(&report);
        }
    }

    Ok(())
}

/// Classifies every envelope in a JSON-lines capture.
///
/// Gaps do not advance the sequencer, so every update after a gap is
/// reported against the same expected sequence until it is filled.
pub fn classify(
    reader: impl BufRead,
    start: SequenceNumber,
) -> Result<ClassifyReport, Box<dyn std::error::Error>> {
    let mut sequencer = Sequencer::new(start);
    let mut report = ClassifyReport::default();

    for (index, line) in reader.lines().enumerate() {
        let line = line?;
        let text = line.trim();
        if text.is_empty() {
            continue;
        }
        report.lines += 1;
        let number = index + 1;

        let envelope = match UpdateEnvelope::from_json(text.as_bytes()) {
            Ok(envelope) => envelope,
            Err(err) => {
                report.invalid += 1;
                report.anomalies.push(LineReport {
                    line: number,
                    kind: None,
                    sequence: None,
                    outcome: "invalid".to_string(),
                    detail: Some(err.to_string()),
                });
                continue;
            }
        };

        let sequence = envelope.sequence;
        let classification = sequencer.classify(sequence);
        debug!(line = number, ?sequence, ?classification, "classified");

        let (outcome, detail) = match classification {
            Classification::InOrder => {
                report.in_order += 1;
                ("in_order", None)
            }
            Classification::Duplicate { last_accepted } => {
                report.duplicates += 1;
                ("duplicate", Some(format!("last accepted {last_accepted}")))
            }
            Classification::Gap { expected } => {
                report.gaps += 1;
                ("gap", Some(format!("expected {expected}")))
            }
            Classification::Unsequenced => {
                report.unsequenced += 1;
                ("unsequenced", None)
            }
        };

        let decode_error = envelope.decode().err();
        if decode_error.is_some() {
            report.undecodable += 1;
        }

        if classification != Classification::InOrder || decode_error.is_some() {
            report.anomalies.push(LineReport {
                line: number,
                kind: Some(envelope.kind),
                sequence: sequence.map(SequenceNumber::get),
                outcome: outcome.to_string(),
                detail: decode_error.map(|err| err.to_string()).or(detail),
            });
        }
    }

    report.last_accepted = sequencer.last_accepted().get();
    Ok(report)
}

fn print_text_output(report: &ClassifyReport) {
    println!("Classification Report");
    println!("=====================");
    println!();
    println!("Lines:             {}", report.lines);
    println!("In order:          {}", report.in_order);
    println!("Duplicates:        {}", report.duplicates);
    println!("Gaps:              {}", report.gaps);
    println!("Unsequenced:       {}", report.unsequenced);
    println!("Invalid:           {}", report.invalid);
    println!("Undecodable:       {}", report.undecodable);
    println!("Last accepted:     {}", report.last_accepted);

    if !report.anomalies.is_empty() {
        println!();
        println!("Anomalies:");
        for anomaly in &report.anomalies {
            let sequence = anomaly
                .sequence
                .map(|s| s.to_string())
                .unwrap_or_else(|| "-".to_string());
            println!(
                "  line {:>5}  seq {:>6}  {:<12} {}",
                anomaly.line,
                sequence,
                anomaly.outcome,
                anomaly.detail.as_deref().unwrap_or("")
            );
        }
    }
}
