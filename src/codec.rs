//! ASCII on-disk model format: a five-line header followed by one
//! preorder traversal per tree. Internal nodes are written as
//! `split threshold`; leaves as `-1 pos neg`.

use std::io::{BufRead, Write};

use crate::committee::{CommitteeKind, Ensemble};
use crate::error::ForestError;
use crate::tree::{NodeData, Tree};

fn parse_header_value<'a>(line: &'a str, key: &str) -> Result<&'a str, ForestError> {
    let rest = line.strip_prefix(key).ok_or_else(|| ForestError::CorruptModel(format!("expected header line starting with {key:?}, found {line:?}")))?;
    Ok(rest.trim())
}

/// Parses the first whitespace-separated token after `key`, ignoring any
/// trailing annotation (the committee line carries a human-readable
/// `(Name)` suffix after its numeric code).
fn parse_int_header(line: &str, key: &str) -> Result<i64, ForestError> {
    let rest = parse_header_value(line, key)?;
    let token = rest.split_whitespace().next().unwrap_or(rest);
    token.parse().map_err(|_| ForestError::CorruptModel(format!("malformed {key} header: {line:?}")))
}

fn parse_float_header(line: &str, key: &str) -> Result<f32, ForestError> {
    parse_header_value(line, key)?
        .parse()
        .map_err(|_| ForestError::CorruptModel(format!("malformed {key} header: {line:?}")))
}

fn read_header_line<R: BufRead>(lines: &mut std::io::Lines<R>) -> Result<String, ForestError> {
    lines
        .next()
        .ok_or_else(|| ForestError::CorruptModel("unexpected end of file while reading header".into()))?
        .map_err(|e| ForestError::CorruptModel(e.to_string()))
}

/// Reads a persisted ensemble: the five-line header, then `trees` lines
/// of whitespace-separated preorder node tokens, one tree per line.
pub fn read_ascii<R: BufRead>(reader: R) -> Result<Ensemble, ForestError> {
    let mut lines = reader.lines();

    let committee_line = read_header_line(&mut lines)?;
    let kind = CommitteeKind::from_code(parse_int_header(&committee_line, "committee:")?)?;

    let trees_line = read_header_line(&mut lines)?;
    let ntrees = parse_int_header(&trees_line, "trees:")? as usize;

    let features_line = read_header_line(&mut lines)?;
    let nfeat = parse_int_header(&features_line, "features:")? as usize;

    let maxdepth_line = read_header_line(&mut lines)?;
    let maxdepth = parse_int_header(&maxdepth_line, "maxdepth:")? as usize;

    let fpn_line = read_header_line(&mut lines)?;
    let fpn_factor = parse_float_header(&fpn_line, "fpnfactor:")?;

    let mut trees = Vec::with_capacity(ntrees);
    for i in 0..ntrees {
        let line = lines
            .next()
            .ok_or_else(|| ForestError::CorruptModel(format!("expected {ntrees} trees, found only {i}")))?
            .map_err(|e| ForestError::CorruptModel(e.to_string()))?;
        let mut tokens = line.split_whitespace();
        let mut nodes = Vec::new();
        read_node(&mut tokens, &mut nodes)?;
        trees.push(Tree { nodes });
    }

    if let Some(remaining) = lines.next() {
        if let Ok(text) = remaining {
            if !text.trim().is_empty() {
                log::warn!("trailing content after the last tree in a persisted model: {text:?}");
            }
        }
    }

    Ok(Ensemble {
        kind,
        maxdepth,
        fpn_factor,
        nfeat,
        trees,
    })
}

fn next_token<'a>(tokens: &mut impl Iterator<Item = &'a str>) -> Result<&'a str, ForestError> {
    tokens.next().ok_or_else(|| ForestError::CorruptModel("unexpected end of tree line".into()))
}

fn parse_f32(token: &str) -> Result<f32, ForestError> {
    token.parse().map_err(|_| ForestError::CorruptModel(format!("malformed number: {token:?}")))
}

/// Reads one subtree in preorder, appending it (and its descendants) to
/// `nodes`, and returns its index. Mirrors `build_node`'s
/// placeholder-then-overwrite technique: the parent's index is reserved
/// before its children are read so a `Split`'s `left`/`right` can point
/// forward in preorder but resolve to positions already known once the
/// recursive calls return.
fn read_node<'a>(tokens: &mut impl Iterator<Item = &'a str>, nodes: &mut Vec<NodeData>) -> Result<u32, ForestError> {
    let first = next_token(tokens)?;
    let split_or_leaf: f32 = parse_f32(first)?;

    if split_or_leaf == -1.0 {
        let pos = parse_f32(next_token(tokens)?)?;
        let neg = parse_f32(next_token(tokens)?)?;
        nodes.push(NodeData::Leaf { pos, neg });
        return Ok((nodes.len() - 1) as u32);
    }

    let feature = split_or_leaf as usize;
    let threshold = parse_f32(next_token(tokens)?)?;

    let this_idx = nodes.len();
    nodes.push(NodeData::Leaf { pos: 0.0, neg: 0.0 });
    let left = read_node(tokens, nodes)?;
    let right = read_node(tokens, nodes)?;
    nodes[this_idx] = NodeData::Split {
        feature,
        threshold,
        left,
        right,
    };
    Ok(this_idx as u32)
}

/// Writes an ensemble's header and every tree's preorder traversal.
pub fn write_ascii<W: Write>(mut writer: W, ensemble: &Ensemble) -> std::io::Result<()> {
    writeln!(writer, "committee: {} ({})", ensemble.kind.code(), ensemble.kind.name())?;
    writeln!(writer, "trees: {}", ensemble.trees.len())?;
    writeln!(writer, "features: {}", ensemble.nfeat)?;
    writeln!(writer, "maxdepth: {}", ensemble.maxdepth)?;
    writeln!(writer, "fpnfactor: {}", ensemble.fpn_factor)?;

    for tree in &ensemble.trees {
        write_node(&mut writer, tree, 0)?;
        writeln!(writer)?;
    }
    Ok(())
}

fn write_node<W: Write>(writer: &mut W, tree: &Tree, idx: usize) -> std::io::Result<()> {
    match &tree.nodes[idx] {
        NodeData::Leaf { pos, neg } => write!(writer, "-1 {pos} {neg} "),
        NodeData::Split {
            feature,
            threshold,
            left,
            right,
        } => {
            write!(writer, "{feature} {threshold} ")?;
            write_node(writer, tree, *left as usize)?;
            write_node(writer, tree, *right as usize)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::committee::{CommitteeConfig, CommitteeKind};
    use crate::dataset::parse::load;
    use rand::{rngs::StdRng, SeedableRng};

    #[test]
    fn round_trips_a_trained_ensemble() {
        let mut rng = StdRng::seed_from_u64(3);
        let data = "1 1:1 2:1\n-1 1:0.1\n1 1:1\n-1 2:0.2\n1 1:1 2:1\n-1 1:0.3\n";
        let mut dataset = load(data.as_bytes(), &mut rng).unwrap();
        let config = CommitteeConfig {
            kind: CommitteeKind::Bagging,
            ntrees: 3,
            maxdepth: 4,
            fpn_factor: 1.0,
            neg_weight: 1.0,
            report_oob: false,
        };
        let ensemble = crate::committee::train(&mut dataset, &config, &mut rng, |_| {});

        let mut buf = Vec::new();
        write_ascii(&mut buf, &ensemble).unwrap();

        let loaded = read_ascii(buf.as_slice()).unwrap();
        assert_eq!(loaded.kind, ensemble.kind);
        assert_eq!(loaded.trees.len(), ensemble.trees.len());
        for (a, b) in ensemble.trees.iter().zip(loaded.trees.iter()) {
            assert_eq!(a.node_count(), b.node_count());
        }

        let probe = [1.0, 1.0];
        assert_eq!(ensemble.classify(&probe), loaded.classify(&probe));
    }

    #[test]
    fn rejects_unknown_committee_code() {
        let text = "committee: 9\ntrees: 0\nfeatures: 1\nmaxdepth: 1\nfpnfactor: 1\n";
        let err = read_ascii(text.as_bytes()).unwrap_err();
        match err {
            ForestError::UnknownCommittee(9) => {}
            other => panic!("expected UnknownCommittee(9), got {other:?}"),
        }
    }
}
