//! Port forward normalization
//!
//! Project and user configuration accept forwards in several shapes: a bare
//! integer, a `"A-B"` / `"A:B"` range string, or an object with an
//! `internal` field. Everything is normalized here into an ordered list of
//! positive ports; malformed entries are dropped with a warning rather than
//! failing the whole configuration.

use serde::{Deserialize, Serialize};
use tracing::warn;

/// One declared forward, before normalization.
///
/// The untagged representation mirrors what users actually write in YAML.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ForwardSpec {
    /// `- 3000`
    Port(i64),
    /// `- "5000-5003"` or `- "5000:5003"`
    Range(String),
    /// `- internal: 8080`
    Object { internal: PortValue },
    /// Anything else; dropped during normalization
    Other(serde_yaml::Value),
}

/// Port number that may be written as a number or a string
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum PortValue {
    Number(i64),
    Text(String),
}

impl PortValue {
    fn as_port(&self) -> Option<u16> {
        match self {
            PortValue::Number(n) => checked_port(*n),
            PortValue::Text(s) => s.trim().parse::<i64>().ok().and_then(checked_port),
        }
    }
}

fn checked_port(n: i64) -> Option<u16> {
    if (1..=65535).contains(&n) {
        Some(n as u16)
    } else {
        None
    }
}

/// Expand declared forwards into an ordered port list.
///
/// Ranges are inclusive and must satisfy `start <= end`; inverted or
/// unparsable ranges produce no ports. Duplicates are preserved in declared
/// order.
pub fn expand_forwards(specs: &[ForwardSpec]) -> Vec<u16> {
    let mut ports = Vec::new();

    for spec in specs {
        match spec {
            ForwardSpec::Port(n) => match checked_port(*n) {
                Some(port) => ports.push(port),
                None => warn!("Dropping invalid forward port {}", n),
            },
            ForwardSpec::Range(text) => match parse_range(text) {
                Some((start, end)) => ports.extend(start..=end),
                None => warn!("Dropping malformed forward range '{}'", text),
            },
            ForwardSpec::Object { internal } => match internal.as_port() {
                Some(port) => ports.push(port),
                None => warn!("Dropping forward object with invalid internal port"),
            },
            ForwardSpec::Other(value) => {
                warn!("Dropping unrecognized forward entry: {:?}", value);
            }
        }
    }

    ports
}

/// Parse `"A-B"` or `"A:B"` into an inclusive range. A bare number string is
/// treated as a single-port range.
fn parse_range(text: &str) -> Option<(u16, u16)> {
    let text = text.trim();
    let (start, end) = match text.split_once(['-', ':']) {
        Some((a, b)) => (a.trim(), b.trim()),
        None => (text, text),
    };

    let start = start.parse::<i64>().ok().and_then(checked_port)?;
    let end = end.parse::<i64>().ok().and_then(checked_port)?;
    if start > end {
        return None;
    }
    Some((start, end))
}

/// Render a port list with consecutive runs collapsed, e.g.
/// `[3000, 5000, 5001, 5002]` becomes `"3000, 5000-5002"`.
pub fn collapse_ranges(ports: &[u16]) -> String {
    let mut sorted: Vec<u16> = ports.to_vec();
    sorted.sort_unstable();
    sorted.dedup();

    let mut parts = Vec::new();
    let mut iter = sorted.into_iter().peekable();
    while let Some(start) = iter.next() {
        let mut end = start;
        while iter.peek() == Some(&(end + 1)) {
            end = iter.next().unwrap();
        }
        if start == end {
            parts.push(start.to_string());
        } else {
            parts.push(format!("{}-{}", start, end));
        }
    }
    parts.join(", ")
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse_specs(yaml: &str) -> Vec<ForwardSpec> {
        serde_yaml::from_str(yaml).unwrap()
    }

    #[test]
    fn expands_mixed_declaration_in_order() {
        let specs = parse_specs(
            r#"
            - 3000
            - "5000-5003"
            - 8080
            - "9000-9001"
            - "7000-7000"
            "#,
        );
        let ports = expand_forwards(&specs);
        assert_eq!(
            ports,
            vec![3000, 5000, 5001, 5002, 5003, 8080, 9000, 9001, 7000]
        );
    }

    #[test]
    fn colon_separator_accepted() {
        let specs = parse_specs(r#"["4000:4002"]"#);
        assert_eq!(expand_forwards(&specs), vec![4000, 4001, 4002]);
    }

    #[test]
    fn single_port_range_yields_one_port() {
        let specs = parse_specs(r#"["7000-7000"]"#);
        assert_eq!(expand_forwards(&specs), vec![7000]);
    }

    #[test]
    fn inverted_and_malformed_ranges_dropped() {
        let specs = parse_specs(r#"["9000-8000", "abc-def", "10-", "-20"]"#);
        assert!(expand_forwards(&specs).is_empty());
    }

    #[test]
    fn zero_and_negative_rejected() {
        let specs = parse_specs("[0, -1]");
        assert!(expand_forwards(&specs).is_empty());
    }

    #[test]
    fn object_forms_accepted() {
        let specs = parse_specs(
            r#"
            - internal: 8080
            - internal: "9090"
            "#,
        );
        assert_eq!(expand_forwards(&specs), vec![8080, 9090]);
    }

    #[test]
    fn unknown_shapes_dropped() {
        let specs = parse_specs(
            r#"
            - [1, 2]
            - {external: 80}
            - 3000
            "#,
        );
        assert_eq!(expand_forwards(&specs), vec![3000]);
    }

    #[test]
    fn duplicates_preserved_in_order() {
        let specs = parse_specs("[8080, 8080, 3000]");
        assert_eq!(expand_forwards(&specs), vec![8080, 8080, 3000]);
    }

    #[test]
    fn collapse_consecutive_runs() {
        assert_eq!(
            collapse_ranges(&[3000, 5000, 5001, 5002, 5003, 8080, 9000, 9001, 7000]),
            "3000, 5000-5003, 7000, 8080, 9000-9001"
        );
        assert_eq!(collapse_ranges(&[7000]), "7000");
        assert_eq!(collapse_ranges(&[]), "");
    }
}
