//! Sorted set with the two indices kept consistent: a member → score map for
//! O(1) score lookups, and a `BTreeSet` ordered by `(score, member)` serving
//! the range queries a skiplist would in the reference implementation.

use std::cmp::Ordering;
use std::collections::{BTreeSet, HashMap};

use crate::error::{EngineError, Result};
use crate::num::parse_f64;

/// Total order over f64 scores. NaN never enters the set; `-0.0` is
/// normalized to `0.0` on insert so the total order agrees with `==`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Score(pub f64);

impl Eq for Score {}

impl Ord for Score {
    fn cmp(&self, other: &Self) -> Ordering {
        self.0.total_cmp(&other.0)
    }
}

impl PartialOrd for Score {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

fn normalize(score: f64) -> f64 {
    if score == 0.0 {
        0.0
    } else {
        score
    }
}

/// One endpoint of a score range (`ZRANGEBYSCORE` grammar).
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum ScoreBound {
    Incl(f64),
    Excl(f64),
}

impl ScoreBound {
    /// Parse `1.5`, `(1.5`, `+inf`, `-inf`.
    pub fn parse(bytes: &[u8]) -> Result<ScoreBound> {
        let (excl, rest) = match bytes.split_first() {
            Some((b'(', rest)) => (true, rest),
            _ => (false, bytes),
        };
        let v = parse_f64(rest).map_err(|_| EngineError::ScoreRangeItem)?;
        Ok(if excl {
            ScoreBound::Excl(v)
        } else {
            ScoreBound::Incl(v)
        })
    }

    fn admits_from_below(&self, score: f64) -> bool {
        match *self {
            ScoreBound::Incl(v) => score >= v,
            ScoreBound::Excl(v) => score > v,
        }
    }

    fn admits_from_above(&self, score: f64) -> bool {
        match *self {
            ScoreBound::Incl(v) => score <= v,
            ScoreBound::Excl(v) => score < v,
        }
    }
}

/// One endpoint of a lexicographic range (`ZRANGEBYLEX` grammar).
#[derive(Debug, Clone, PartialEq)]
pub enum LexBound {
    NegInf,
    PosInf,
    Incl(Vec<u8>),
    Excl(Vec<u8>),
}

impl LexBound {
    /// Parse `-`, `+`, `[member`, `(member`.
    pub fn parse(bytes: &[u8]) -> Result<LexBound> {
        match bytes.split_first() {
            Some((b'-', rest)) if rest.is_empty() => Ok(LexBound::NegInf),
            Some((b'+', rest)) if rest.is_empty() => Ok(LexBound::PosInf),
            Some((b'[', rest)) => Ok(LexBound::Incl(rest.to_vec())),
            Some((b'(', rest)) => Ok(LexBound::Excl(rest.to_vec())),
            _ => Err(EngineError::LexRangeItem),
        }
    }

    fn admits_from_below(&self, member: &[u8]) -> bool {
        match self {
            LexBound::NegInf => true,
            LexBound::PosInf => false,
            LexBound::Incl(m) => member >= m.as_slice(),
            LexBound::Excl(m) => member > m.as_slice(),
        }
    }

    fn admits_from_above(&self, member: &[u8]) -> bool {
        match self {
            LexBound::NegInf => false,
            LexBound::PosInf => true,
            LexBound::Incl(m) => member <= m.as_slice(),
            LexBound::Excl(m) => member < m.as_slice(),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct SortedSet {
    by_member: HashMap<Vec<u8>, f64>,
    ordered: BTreeSet<(Score, Vec<u8>)>,
}

impl SortedSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.by_member.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_member.is_empty()
    }

    pub fn score(&self, member: &[u8]) -> Option<f64> {
        self.by_member.get(member).copied()
    }

    pub fn contains(&self, member: &[u8]) -> bool {
        self.by_member.contains_key(member)
    }

    /// Insert or update. Returns true when the member is new.
    pub fn insert(&mut self, member: Vec<u8>, score: f64) -> bool {
        let score = normalize(score);
        match self.by_member.insert(member.clone(), score) {
            Some(old) => {
                self.ordered.remove(&(Score(old), member.clone()));
                self.ordered.insert((Score(score), member));
                false
            }
            None => {
                self.ordered.insert((Score(score), member));
                true
            }
        }
    }

    pub fn remove(&mut self, member: &[u8]) -> Option<f64> {
        let score = self.by_member.remove(member)?;
        self.ordered.remove(&(Score(score), member.to_vec()));
        Some(score)
    }

    /// Ascending iteration in `(score, member)` order.
    pub fn iter(&self) -> impl Iterator<Item = (&[u8], f64)> {
        self.ordered.iter().map(|(s, m)| (m.as_slice(), s.0))
    }

    /// 0-based ascending rank, or descending when `rev`.
    pub fn rank(&self, member: &[u8], rev: bool) -> Option<usize> {
        let score = self.score(member)?;
        let target = (Score(score), member.to_vec());
        let asc = self.ordered.range(..&target).count();
        Some(if rev { self.len() - 1 - asc } else { asc })
    }

    /// `start`/`stop` follow the LRANGE index convention (negative from the
    /// end, inclusive stop).
    pub fn range_by_rank(&self, start: i64, stop: i64, rev: bool) -> Vec<(Vec<u8>, f64)> {
        let len = self.len() as i64;
        let start = if start < 0 { (len + start).max(0) } else { start };
        let stop = if stop < 0 { len + stop } else { stop.min(len - 1) };
        if start > stop || start >= len {
            return Vec::new();
        }
        let (start, stop) = (start as usize, stop as usize);
        let take = stop - start + 1;
        if rev {
            self.ordered
                .iter()
                .rev()
                .skip(start)
                .take(take)
                .map(|(s, m)| (m.clone(), s.0))
                .collect()
        } else {
            self.ordered
                .iter()
                .skip(start)
                .take(take)
                .map(|(s, m)| (m.clone(), s.0))
                .collect()
        }
    }

    pub fn range_by_score(
        &self,
        min: &ScoreBound,
        max: &ScoreBound,
        rev: bool,
        offset: usize,
        count: Option<usize>,
    ) -> Vec<(Vec<u8>, f64)> {
        let mut out: Vec<(Vec<u8>, f64)> = Vec::new();
        let limit = count.unwrap_or(usize::MAX);
        if rev {
            for (s, m) in self.ordered.iter().rev() {
                if !max.admits_from_above(s.0) {
                    continue;
                }
                if !min.admits_from_below(s.0) {
                    break;
                }
                out.push((m.clone(), s.0));
            }
        } else {
            for (s, m) in self.ordered.iter() {
                if !min.admits_from_below(s.0) {
                    continue;
                }
                if !max.admits_from_above(s.0) {
                    break;
                }
                out.push((m.clone(), s.0));
            }
        }
        out.into_iter().skip(offset).take(limit).collect()
    }

    pub fn count_by_score(&self, min: &ScoreBound, max: &ScoreBound) -> usize {
        self.range_by_score(min, max, false, 0, None).len()
    }

    pub fn range_by_lex(
        &self,
        min: &LexBound,
        max: &LexBound,
        rev: bool,
        offset: usize,
        count: Option<usize>,
    ) -> Vec<(Vec<u8>, f64)> {
        let mut out: Vec<(Vec<u8>, f64)> = Vec::new();
        let iter: Box<dyn Iterator<Item = &(Score, Vec<u8>)>> = if rev {
            Box::new(self.ordered.iter().rev())
        } else {
            Box::new(self.ordered.iter())
        };
        for (s, m) in iter {
            if min.admits_from_below(m) && max.admits_from_above(m) {
                out.push((m.clone(), s.0));
            }
        }
        let limit = count.unwrap_or(usize::MAX);
        out.into_iter().skip(offset).take(limit).collect()
    }

    pub fn count_by_lex(&self, min: &LexBound, max: &LexBound) -> usize {
        self.range_by_lex(min, max, false, 0, None).len()
    }

    pub fn pop_min(&mut self, count: usize) -> Vec<(Vec<u8>, f64)> {
        let mut out = Vec::new();
        for _ in 0..count {
            let Some((score, member)) = self.ordered.iter().next().cloned() else {
                break;
            };
            self.ordered.remove(&(score, member.clone()));
            self.by_member.remove(&member);
            out.push((member, score.0));
        }
        out
    }

    pub fn pop_max(&mut self, count: usize) -> Vec<(Vec<u8>, f64)> {
        let mut out = Vec::new();
        for _ in 0..count {
            let Some((score, member)) = self.ordered.iter().next_back().cloned() else {
                break;
            };
            self.ordered.remove(&(score, member.clone()));
            self.by_member.remove(&member);
            out.push((member, score.0));
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn zs(pairs: &[(&str, f64)]) -> SortedSet {
        let mut z = SortedSet::new();
        for (m, s) in pairs {
            z.insert(m.as_bytes().to_vec(), *s);
        }
        z
    }

    #[test]
    fn ordering_is_score_then_member() {
        let z = zs(&[("b", 1.0), ("a", 1.0), ("c", 0.5)]);
        let order: Vec<&[u8]> = z.iter().map(|(m, _)| m).collect();
        assert_eq!(order, vec![b"c".as_slice(), b"a", b"b"]);
    }

    #[test]
    fn insert_updates_both_indices() {
        let mut z = zs(&[("a", 1.0), ("b", 2.0)]);
        assert!(!z.insert(b"a".to_vec(), 5.0));
        assert_eq!(z.score(b"a"), Some(5.0));
        assert_eq!(z.rank(b"a", false), Some(1));
        assert_eq!(z.len(), 2);
    }

    #[test]
    fn rank_and_rev_rank() {
        let z = zs(&[("a", 1.0), ("b", 2.0), ("c", 3.0)]);
        assert_eq!(z.rank(b"a", false), Some(0));
        assert_eq!(z.rank(b"c", false), Some(2));
        assert_eq!(z.rank(b"a", true), Some(2));
        assert_eq!(z.rank(b"missing", false), None);
    }

    #[test]
    fn score_bounds() {
        let z = zs(&[("a", 1.0), ("b", 2.0), ("c", 3.0)]);
        let all = z.range_by_score(
            &ScoreBound::Incl(f64::NEG_INFINITY),
            &ScoreBound::Incl(f64::INFINITY),
            false,
            0,
            None,
        );
        assert_eq!(all.len(), 3);
        let open = z.range_by_score(
            &ScoreBound::Excl(1.0),
            &ScoreBound::Incl(3.0),
            false,
            0,
            None,
        );
        assert_eq!(open[0].0, b"b".to_vec());
        assert_eq!(open.len(), 2);
        let rev = z.range_by_score(
            &ScoreBound::Incl(1.0),
            &ScoreBound::Incl(3.0),
            true,
            0,
            Some(2),
        );
        assert_eq!(rev[0].0, b"c".to_vec());
        assert_eq!(rev.len(), 2);
    }

    #[test]
    fn lex_bounds() {
        let z = zs(&[("a", 0.0), ("b", 0.0), ("c", 0.0)]);
        assert_eq!(
            z.count_by_lex(&LexBound::NegInf, &LexBound::PosInf),
            3
        );
        assert_eq!(
            z.count_by_lex(&LexBound::Excl(b"a".to_vec()), &LexBound::PosInf),
            2
        );
        assert_eq!(
            z.count_by_lex(
                &LexBound::Incl(b"a".to_vec()),
                &LexBound::Excl(b"c".to_vec())
            ),
            2
        );
    }

    #[test]
    fn bound_parsing() {
        assert_eq!(ScoreBound::parse(b"1.5").unwrap(), ScoreBound::Incl(1.5));
        assert_eq!(ScoreBound::parse(b"(2").unwrap(), ScoreBound::Excl(2.0));
        assert!(ScoreBound::parse(b"abc").is_err());
        assert_eq!(LexBound::parse(b"-").unwrap(), LexBound::NegInf);
        assert_eq!(LexBound::parse(b"+").unwrap(), LexBound::PosInf);
        assert_eq!(
            LexBound::parse(b"[foo").unwrap(),
            LexBound::Incl(b"foo".to_vec())
        );
        assert!(LexBound::parse(b"foo").is_err());
    }

    #[test]
    fn pops() {
        let mut z = zs(&[("a", 1.0), ("b", 2.0), ("c", 3.0)]);
        assert_eq!(z.pop_min(1), vec![(b"a".to_vec(), 1.0)]);
        assert_eq!(z.pop_max(2).len(), 2);
        assert!(z.is_empty());
    }
}
