//! Textual sparse-example format: `target feat1:val1 feat2:val2 …`, with
//! `#` starting an end-of-line comment and blank/comment-only lines
//! skipped entirely.

use std::io::BufRead;

use rand::Rng;

use crate::error::ForestError;

use super::Dataset;

/// A single (feature, example, value) triple collected during the first
/// pass over the input, before sorting and partitioning into columns.
#[derive(Debug, Clone, Copy)]
pub struct RawPair {
    pub feature: u32,
    pub example: u32,
    pub value: f32,
}

fn strip_comment(line: &str) -> &str {
    match line.find('#') {
        Some(i) => &line[..i],
        None => line,
    }
}

fn parse_target(token: &str, line: usize) -> Result<u8, ForestError> {
    let v: i64 = token.parse().map_err(|_| ForestError::MalformedDataset {
        line,
        message: format!("expected an integer target, found {token:?}"),
    })?;
    Ok(if v <= 0 { 0 } else { 1 })
}

fn parse_pair(token: &str, line: usize) -> Result<Option<(u32, f32)>, ForestError> {
    let (feat_str, val_str) = token.split_once(':').ok_or_else(|| ForestError::MalformedDataset {
        line,
        message: format!("expected feat:val, found {token:?}"),
    })?;
    let feature: u32 = feat_str.parse().map_err(|_| ForestError::MalformedDataset {
        line,
        message: format!("invalid feature index {feat_str:?}"),
    })?;
    let value: f32 = val_str.parse().map_err(|_| ForestError::MalformedDataset {
        line,
        message: format!("invalid feature value {val_str:?}"),
    })?;
    if value == 0.0 {
        // Zero-valued pairs are never stored, even if present explicitly.
        return Ok(None);
    }
    Ok(Some((feature, value)))
}

/// Parses the full sparse dataset file and builds the column-store
/// `Dataset`. Kept in its own module away from the column-store logic in
/// `dataset::mod`, since it's the crate's one concession to doing I/O in
/// otherwise-pure data structure code.
pub fn load<R: BufRead>(reader: R, rng: &mut impl Rng) -> Result<Dataset, ForestError> {
    let mut pairs = Vec::new();
    let mut target = Vec::new();

    for (line_no, line) in reader.lines().enumerate() {
        let line = line.map_err(|e| ForestError::MalformedDataset {
            line: line_no + 1,
            message: e.to_string(),
        })?;
        let content = strip_comment(&line);
        let mut tokens = content.split_whitespace();
        let Some(first) = tokens.next() else {
            continue;
        };
        let example = target.len() as u32;
        target.push(parse_target(first, line_no + 1)?);
        for token in tokens {
            if let Some((feature, value)) = parse_pair(token, line_no + 1)? {
                pairs.push(RawPair {
                    feature,
                    example,
                    value,
                });
            }
        }
    }

    Dataset::from_raw_pairs(pairs, target, rng)
}

/// One dense probe example read from a test file: the target (if
/// present; classification doesn't need it but scenarios like S4 compare
/// predictions against it) and a dense value vector sized to the model's
/// `nfeat`, with any feature index at or beyond `nfeat` silently dropped
/// — the model has no split that could ever reference it.
pub struct DenseExample {
    pub target: u8,
    pub values: Vec<f32>,
}

fn parse_dense_line(content: &str, nfeat: usize, line: usize) -> Result<Option<DenseExample>, ForestError> {
    let mut tokens = content.split_whitespace();
    let Some(first) = tokens.next() else {
        return Ok(None);
    };
    let target = parse_target(first, line)?;
    let mut values = vec![0.0f32; nfeat];
    for token in tokens {
        let (feat_str, val_str) = token.split_once(':').ok_or_else(|| ForestError::MalformedDataset {
            line,
            message: format!("expected feat:val, found {token:?}"),
        })?;
        let feature: usize = feat_str.parse().map_err(|_| ForestError::MalformedDataset {
            line,
            message: format!("invalid feature index {feat_str:?}"),
        })?;
        let value: f32 = val_str.parse().map_err(|_| ForestError::MalformedDataset {
            line,
            message: format!("invalid feature value {val_str:?}"),
        })?;
        if feature < nfeat {
            values[feature] = value;
        }
    }
    Ok(Some(DenseExample { target, values }))
}

/// Iterates the examples of a test file as dense feature vectors, for the
/// classifier binary. Skips comment-only/blank lines exactly like the
/// sparse loader, without assigning them an example id.
pub struct DenseExampleReader<R> {
    lines: std::io::Lines<R>,
    nfeat: usize,
    line_no: usize,
}

impl<R: BufRead> DenseExampleReader<R> {
    pub fn new(reader: R, nfeat: usize) -> Self {
        DenseExampleReader {
            lines: reader.lines(),
            nfeat,
            line_no: 0,
        }
    }
}

impl<R: BufRead> Iterator for DenseExampleReader<R> {
    type Item = Result<DenseExample, ForestError>;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            let line = match self.lines.next()? {
                Ok(l) => l,
                Err(e) => {
                    return Some(Err(ForestError::MalformedDataset {
                        line: self.line_no + 1,
                        message: e.to_string(),
                    }))
                }
            };
            self.line_no += 1;
            let content = strip_comment(&line);
            match parse_dense_line(content, self.nfeat, self.line_no) {
                Ok(Some(example)) => return Some(Ok(example)),
                Ok(None) => continue,
                Err(e) => return Some(Err(e)),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::{rngs::StdRng, SeedableRng};

    #[test]
    fn parses_single_pure_positive_example() {
        let mut rng = StdRng::seed_from_u64(1);
        let ds = load("1 1:1\n".as_bytes(), &mut rng).unwrap();
        assert_eq!(ds.nex(), 1);
        assert_eq!(ds.target(0), 1);
        assert_eq!(ds.nfeat(), 2);
    }

    #[test]
    fn target_le_zero_maps_to_zero() {
        let mut rng = StdRng::seed_from_u64(1);
        let ds = load("-1\n0\n".as_bytes(), &mut rng).unwrap();
        assert_eq!(ds.target(0), 0);
        assert_eq!(ds.target(1), 0);
    }

    #[test]
    fn comments_and_blank_lines_are_skipped() {
        let mut rng = StdRng::seed_from_u64(1);
        let ds = load("# a comment\n\n1 1:1 # trailing comment\n   \n-1 2:1\n".as_bytes(), &mut rng).unwrap();
        assert_eq!(ds.nex(), 2);
    }

    #[test]
    fn zero_valued_pairs_are_discarded() {
        let mut rng = StdRng::seed_from_u64(1);
        let ds = load("1 1:0 2:3\n".as_bytes(), &mut rng).unwrap();
        assert_eq!(ds.size(1), 0);
        assert_eq!(ds.size(2), 1);
    }

    #[test]
    fn malformed_line_reports_one_based_line_number() {
        let mut rng = StdRng::seed_from_u64(1);
        let err = load("1 1:1\nnotanumber 1:1\n".as_bytes(), &mut rng).unwrap_err();
        match err {
            ForestError::MalformedDataset { line, .. } => assert_eq!(line, 2),
            other => panic!("expected MalformedDataset, got {other:?}"),
        }
    }

    #[test]
    fn dense_reader_drops_out_of_range_features() {
        let data = "1 0:1 5:2\n";
        let reader = DenseExampleReader::new(data.as_bytes(), 3);
        let examples: Vec<_> = reader.map(|r| r.unwrap()).collect();
        assert_eq!(examples.len(), 1);
        assert_eq!(examples[0].values, vec![1.0, 0.0, 0.0]);
    }
}
