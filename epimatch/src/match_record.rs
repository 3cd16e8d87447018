//! Plain-text match files.
//!
//! Each pair is written as a header line with the two image indices, a line
//! with the match count, and one `source reference` line per match:
//!
//! ```text
//! 0 3
//! 2
//! 17 40
//! 21 9
//! ```

use crate::candidate_matcher::Match;
use crate::error::MatchError;
use std::io::{BufRead, Write};

/// The matches of one image pair as read back from a match file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PairRecord {
    pub source_image: usize,
    pub reference_image: usize,
    pub matches: Vec<Match>,
}

/// Appends one pair to `writer` in the order given.
pub fn write_pair_record<W: Write>(
    writer: &mut W,
    source_image: usize,
    reference_image: usize,
    matches: &[Match],
) -> Result<(), MatchError> {
    writeln!(writer, "{source_image} {reference_image}")?;
    writeln!(writer, "{}", matches.len())?;
    for m in matches {
        writeln!(writer, "{} {}", m.source, m.reference)?;
    }
    Ok(())
}

fn parse_fields<const N: usize>(line: &str, number: usize) -> Result<[usize; N], MatchError> {
    let malformed = |message: String| MatchError::MalformedRecord {
        line: number,
        message,
    };
    let mut fields = [0usize; N];
    let mut tokens = line.split_whitespace();
    for field in fields.iter_mut() {
        let token = tokens
            .next()
            .ok_or_else(|| malformed(format!("expected {N} fields in {line:?}")))?;
        *field = token
            .parse()
            .map_err(|_| malformed(format!("{token:?} is not an index")))?;
    }
    if tokens.next().is_some() {
        return Err(malformed(format!("expected {N} fields in {line:?}")));
    }
    Ok(fields)
}

/// Reads every pair from `reader`. Blank lines between records are skipped.
pub fn read_pair_records<R: BufRead>(reader: R) -> Result<Vec<PairRecord>, MatchError> {
    let mut lines = reader
        .lines()
        .enumerate()
        .map(|(i, line)| line.map(|text| (i + 1, text)))
        .filter(|line| !matches!(line, Ok((_, text)) if text.trim().is_empty()));

    let mut records = Vec::new();
    while let Some(header) = lines.next() {
        let (number, text) = header?;
        let [source_image, reference_image] = parse_fields::<2>(&text, number)?;

        let (number, text) = lines.next().ok_or(MatchError::MalformedRecord {
            line: number + 1,
            message: "missing match count".to_string(),
        })??;
        let [count] = parse_fields::<1>(&text, number)?;

        let mut matches = Vec::with_capacity(count);
        for _ in 0..count {
            let (number, text) = lines.next().ok_or(MatchError::MalformedRecord {
                line: number + matches.len() + 1,
                message: format!("expected {count} matches, found {}", matches.len()),
            })??;
            let [source, reference] = parse_fields::<2>(&text, number)?;
            matches.push(Match::new(source, reference));
        }
        records.push(PairRecord {
            source_image,
            reference_image,
            matches,
        });
    }
    Ok(records)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    #[test]
    fn writes_the_documented_layout() {
        let mut out = Vec::new();
        write_pair_record(&mut out, 0, 3, &[Match::new(17, 40), Match::new(21, 9)]).unwrap();
        assert_eq!(String::from_utf8(out).unwrap(), "0 3\n2\n17 40\n21 9\n");
    }

    #[test]
    fn reads_back_several_pairs() {
        let mut out = Vec::new();
        write_pair_record(&mut out, 0, 1, &[Match::new(1, 2)]).unwrap();
        write_pair_record(&mut out, 1, 2, &[]).unwrap();
        write_pair_record(&mut out, 0, 2, &[Match::new(5, 6), Match::new(7, 8)]).unwrap();

        let records = read_pair_records(Cursor::new(out)).unwrap();
        assert_eq!(records.len(), 3);
        assert_eq!(records[0].matches, vec![Match::new(1, 2)]);
        assert!(records[1].matches.is_empty());
        assert_eq!((records[2].source_image, records[2].reference_image), (0, 2));
        assert_eq!(records[2].matches[1], Match::new(7, 8));
    }

    #[test]
    fn truncated_record_is_malformed() {
        let err = read_pair_records(Cursor::new("0 1\n3\n1 2\n")).unwrap_err();
        assert!(matches!(err, MatchError::MalformedRecord { .. }));

        let err = read_pair_records(Cursor::new("0 1\n1\n1 x\n")).unwrap_err();
        assert!(matches!(err, MatchError::MalformedRecord { line: 3, .. }));
    }
}
