use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};

use crate::trial::TrialSummary;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TrialRecord {
    pub trial_idx: usize,
    pub summary: TrialSummary,
}

/// `trial_{n}.log` files in a log directory, ordered by trial index.
pub fn load_trial_logs(log_dir: &Path) -> Result<Vec<(usize, PathBuf)>> {
    if !log_dir.exists() {
        return Ok(Vec::new());
    }
    let mut logs = Vec::new();
    for entry in fs::read_dir(log_dir).with_context(|| format!("read {}", log_dir.display()))? {
        let entry = entry.context("read entry")?;
        let file_name = entry.file_name();
        let Some(trial_idx) = file_name
            .to_str()
            .and_then(|name| name.strip_prefix("trial_"))
            .and_then(|rest| rest.strip_suffix(".log"))
            .and_then(|idx| idx.parse::<usize>().ok())
        else {
            continue;
        };
        logs.push((trial_idx, entry.path()));
    }
    logs.sort();
    Ok(logs)
}

/// Parse the last summary block of a trial log.
pub fn parse_summary(log: &str) -> Option<TrialSummary> {
    let start = log.rfind("\n-----\nSUCCESS: ")?;
    let block = log[start..].trim_start_matches('\n').strip_prefix("-----\n")?;
    let mut successes = None;
    let mut additional = None;
    let mut total = None;
    for line in block.lines() {
        if line == "-----" {
            break;
        }
        let Some((key, value)) = line.split_once(": ") else {
            continue;
        };
        let value = value.trim().parse::<usize>().ok();
        match key {
            "SUCCESS" => successes = value,
            "ADDITIONAL SUCCESS" => additional = value,
            "TOTAL" => total = value,
            _ => {}
        }
    }
    Some(TrialSummary {
        successes: successes?,
        additional_successes: additional?,
        total: total?,
    })
}

/// Summaries of every finished trial in `log_dir`, plus warnings for logs
/// without a readable summary block.
pub fn aggregate(log_dir: &Path) -> Result<(Vec<TrialRecord>, Vec<String>)> {
    let mut records = Vec::new();
    let mut warnings = Vec::new();
    for (trial_idx, path) in load_trial_logs(log_dir)? {
        let contents = match fs::read_to_string(&path) {
            Ok(contents) => contents,
            Err(err) => {
                warnings.push(format!("skip {}: {err}", path.display()));
                continue;
            }
        };
        match parse_summary(&contents) {
            Some(summary) => records.push(TrialRecord { trial_idx, summary }),
            None => warnings.push(format!(
                "skip {}: no summary block (trial unfinished?)",
                path.display()
            )),
        }
    }
    Ok((records, warnings))
}
