//! Selection of the index and scan prefix for a single triple pattern.
//!
//! Which of subject, predicate and object are bound is a 3-bit mask (bit 0 =
//! subject, bit 1 = predicate, bit 2 = object). For each of the 8 masks the
//! planner precomputes the rotation whose key order puts the longest run of
//! bound components first, since only that leading run can narrow a range
//! scan.

use crate::errors::Result;
use crate::keys::{key_prefix, Rotation, TermId};
use log::trace;

pub const SUBJECT: u8 = 0b001;
pub const PREDICATE: u8 = 0b010;
pub const OBJECT: u8 = 0b100;

/// Bound mask for a pattern given per-position boundness.
pub fn mask_of<T>(spo: &[Option<T>; 3]) -> u8 {
    spo.iter()
        .enumerate()
        .filter(|(_, v)| v.is_some())
        .fold(0, |mask, (i, _)| mask | (1 << i))
}

/// Human-readable form of a mask, e.g. `s,?,o`.
pub fn readable_mask(mask: u8) -> String {
    let s = if mask & SUBJECT != 0 { "s" } else { "?" };
    let p = if mask & PREDICATE != 0 { "p" } else { "?" };
    let o = if mask & OBJECT != 0 { "o" } else { "?" };
    format!("{},{},{}", s, p, o)
}

/// Scan plan for one bound mask.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Plan {
    pub mask: u8,
    pub rotation: Rotation,
    /// Number of leading key slots, after the context, fixed by the pattern.
    pub length: usize,
}

impl Plan {
    fn choose(mask: u8) -> Self {
        let mut best: Option<((u32, usize), usize, usize)> = None;
        for start in 0..3 {
            let length = (start..start + 3)
                .take_while(|j| mask & (1 << (j % 3)) != 0)
                .count();
            let rank = (1u32 << length, 2 - start);
            if best.map_or(true, |(r, _, _)| rank > r) {
                best = Some((rank, start, length));
            }
        }
        let (_, start, length) = best.unwrap_or(((1, 2), 0, 0));
        Plan {
            mask,
            rotation: Rotation::from_offset(start),
            length,
        }
    }

    pub fn is_bound(&self, position: usize) -> bool {
        self.mask & (1 << position) != 0
    }

    /// `context SEP` then the bound components in key order, up to `length`.
    /// An absent context yields the canonical (union) prefix.
    pub fn prefix(&self, context: Option<TermId>, spo: &[Option<TermId>; 3]) -> Vec<u8> {
        let components: Vec<TermId> = (0..self.length)
            .map_while(|slot| spo[self.rotation.position(slot)])
            .collect();
        key_prefix(context, &components)
    }

    /// Rebuilds subject, predicate and object for a matched key. Positions the
    /// caller bound are cloned from `bound`; only the others go through `resolve`.
    pub fn decode_with<T, F>(&self, key: &[u8], bound: [Option<&T>; 3], mut resolve: F) -> Result<[T; 3]>
    where
        T: Clone,
        F: FnMut(TermId) -> Result<T>,
    {
        let (_, ids) = self.rotation.decode_key(key)?;
        let pick = |position: usize, resolve: &mut F| -> Result<T> {
            match bound[position] {
                Some(term) => Ok(term.clone()),
                None => resolve(ids[position]),
            }
        };
        let s = pick(0, &mut resolve)?;
        let p = pick(1, &mut resolve)?;
        let o = pick(2, &mut resolve)?;
        Ok([s, p, o])
    }
}

/// Precomputed plans for all 8 bound masks.
#[derive(Debug, Clone)]
pub struct PatternPlanner {
    plans: [Plan; 8],
}

impl Default for PatternPlanner {
    fn default() -> Self {
        Self::new()
    }
}

impl PatternPlanner {
    pub fn new() -> Self {
        let plans = std::array::from_fn(|mask| Plan::choose(mask as u8));
        for plan in &plans {
            trace!(
                "pattern {} -> index {} prefix length {}",
                readable_mask(plan.mask),
                plan.rotation.file_stem(),
                plan.length
            );
        }
        Self { plans }
    }

    pub fn plan(&self, mask: u8) -> &Plan {
        &self.plans[(mask & 0b111) as usize]
    }

    pub fn plans(&self) -> &[Plan; 8] {
        &self.plans
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn id(n: u64) -> TermId {
        TermId::new(n).unwrap()
    }

    #[test]
    fn table_matches_expected_rotations() {
        let planner = PatternPlanner::new();
        let expected = [
            (Rotation::Spo, 0),
            (Rotation::Spo, 1),
            (Rotation::Pos, 1),
            (Rotation::Spo, 2),
            (Rotation::Osp, 1),
            (Rotation::Osp, 2),
            (Rotation::Pos, 2),
            (Rotation::Spo, 3),
        ];
        for (mask, (rotation, length)) in expected.into_iter().enumerate() {
            let plan = planner.plan(mask as u8);
            assert_eq!((plan.rotation, plan.length), (rotation, length), "mask {}", readable_mask(mask as u8));
        }
    }

    #[test]
    fn every_choice_maximizes_score_then_tie_break() {
        let planner = PatternPlanner::new();
        for mask in 0u8..8 {
            let plan = planner.plan(mask);
            let chosen = (1u32 << plan.length, 2 - plan.rotation.offset());
            for start in 0..3usize {
                let mut length = 0;
                for j in start..start + 3 {
                    if mask & (1 << (j % 3)) == 0 {
                        break;
                    }
                    length += 1;
                }
                assert!((1u32 << length, 2 - start) <= chosen, "mask {} start {}", mask, start);
            }
        }
    }

    #[test]
    fn prefix_stops_at_first_gap() {
        let planner = PatternPlanner::new();
        let spo = [Some(id(1)), None, Some(id(3))];
        let plan = planner.plan(mask_of(&spo));
        assert_eq!(plan.rotation, Rotation::Osp);
        assert_eq!(plan.prefix(None, &spo), b"^3^1^");
        assert_eq!(plan.prefix(Some(id(9)), &spo), b"9^3^1^");

        let none = [None, None, None];
        assert_eq!(planner.plan(mask_of(&none)).prefix(None, &none), b"^");
    }

    #[test]
    fn decode_substitutes_bound_terms() {
        let planner = PatternPlanner::new();
        let spo = [None, Some(id(2)), None];
        let plan = planner.plan(mask_of(&spo));
        let key = plan.rotation.encode_key(None, &[id(1), id(2), id(3)]);
        let bound_p = "P".to_string();
        let mut resolved = Vec::new();
        let terms = plan
            .decode_with(&key, [None, Some(&bound_p), None], |tid| {
                resolved.push(tid);
                Ok(format!("t{}", tid))
            })
            .unwrap();
        assert_eq!(terms, ["t1".to_string(), "P".to_string(), "t3".to_string()]);
        assert_eq!(resolved, vec![id(1), id(3)]);
    }

    #[test]
    fn masks_read_back() {
        assert_eq!(mask_of(&[Some(1), None, Some(1)]), SUBJECT | OBJECT);
        assert_eq!(readable_mask(PREDICATE), "?,p,?");
    }
}
