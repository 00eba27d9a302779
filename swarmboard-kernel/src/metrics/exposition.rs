//! Parser for the flat text exposition format served by node-exporter and cAdvisor.
//!
//! Only what the derivations need is kept: metric name, label set, value.
//! Comments, `# HELP`/`# TYPE` lines and trailing timestamps are skipped.

use std::collections::BTreeMap;

#[derive(Debug, Clone, PartialEq)]
pub struct Sample {
    pub name: String,
    pub labels: BTreeMap<String, String>,
    pub value: f64,
}

impl Sample {
    pub fn label(&self, key: &str) -> Option<&str> {
        self.labels.get(key).map(String::as_str)
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ExpositionError {
    #[error("line {line}: {reason}")]
    Malformed { line: usize, reason: &'static str },
}

pub fn parse(text: &str) -> Result<Vec<Sample>, ExpositionError> {
    let mut samples = Vec::new();
    for (idx, raw) in text.lines().enumerate() {
        let line = raw.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }
        let sample = parse_line(line).map_err(|reason| ExpositionError::Malformed { line: idx + 1, reason })?;
        samples.push(sample);
    }
    Ok(samples)
}

fn parse_line(line: &str) -> Result<Sample, &'static str> {
    let name_end = line
        .find(|c: char| c == '{' || c.is_whitespace())
        .ok_or("missing value")?;
    let name = &line[..name_end];
    if name.is_empty() {
        return Err("missing metric name");
    }

    let mut labels = BTreeMap::new();
    let mut rest = &line[name_end..];
    if let Some(body) = rest.strip_prefix('{') {
        rest = parse_labels(body, &mut labels)?;
    }

    // la valeur peut être suivie d'un timestamp, ignoré
    let value = rest.split_whitespace().next().ok_or("missing value")?;
    let value = value.parse::<f64>().map_err(|_| "invalid value")?;

    Ok(Sample { name: name.to_string(), labels, value })
}

/// Consomme `key="value",...}` et renvoie la suite de la ligne après `}`
fn parse_labels<'a>(mut input: &'a str, labels: &mut BTreeMap<String, String>) -> Result<&'a str, &'static str> {
    loop {
        input = input.trim_start();
        if let Some(rest) = input.strip_prefix('}') {
            return Ok(rest);
        }

        let eq = input.find('=').ok_or("label without value")?;
        let key = input[..eq].trim();
        if key.is_empty() {
            return Err("empty label name");
        }
        let quoted = input[eq + 1..].trim_start().strip_prefix('"').ok_or("unquoted label value")?;

        let mut value = String::new();
        let mut chars = quoted.char_indices();
        let end = loop {
            match chars.next() {
                Some((i, '"')) => break i,
                Some((_, '\\')) => match chars.next() {
                    Some((_, 'n')) => value.push('\n'),
                    Some((_, c)) => value.push(c),
                    None => return Err("unterminated label value"),
                },
                Some((_, c)) => value.push(c),
                None => return Err("unterminated label value"),
            }
        };
        labels.insert(key.to_string(), value);

        input = quoted[end + 1..].trim_start();
        if let Some(rest) = input.strip_prefix(',') {
            input = rest;
        } else if !input.starts_with('}') {
            return Err("expected ',' or '}'");
        }
    }
}
