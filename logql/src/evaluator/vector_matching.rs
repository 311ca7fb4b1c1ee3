//! Vector/vector binary operations at one step.

use std::collections::{HashMap, HashSet};

use crate::error::{QueryError, Result};
use crate::labels::Labels;
use crate::model::{Sample, Vector};
use crate::syntax::{BinOpOptions, BinaryOp, Cardinality, VectorMatching};

/// Labels the two sides are matched on.
///
/// Without a matching clause every label takes part. `on(...)` keeps exactly
/// the listed labels and `ignoring(...)` drops them.
fn signature(labels: &Labels, matching: &VectorMatching) -> Labels {
    if matching.on {
        labels.keep(&matching.matching_labels)
    } else {
        labels.drop_names(&matching.matching_labels)
    }
}

/// Applies `op` and decides whether the pair survives.
fn combine(op: BinaryOp, return_bool: bool, lhs: f64, rhs: f64) -> Option<f64> {
    let (value, keep) = op.eval(lhs, rhs);
    if !op.is_comparison() {
        return Some(value);
    }
    if return_bool {
        Some(if keep { 1.0 } else { 0.0 })
    } else if keep {
        Some(value)
    } else {
        None
    }
}

/// Evaluates `lhs op rhs` for two instant vectors.
pub fn vector_binop(op: BinaryOp, opts: &BinOpOptions, lhs: Vector, rhs: Vector) -> Result<Vector> {
    let matching = opts.vector_matching.clone().unwrap_or_default();
    match op {
        BinaryOp::And => Ok(and(lhs, rhs, &matching)),
        BinaryOp::Or => Ok(or(lhs, rhs, &matching)),
        BinaryOp::Unless => Ok(unless(lhs, rhs, &matching)),
        _ => match matching.card {
            Cardinality::OneToOne => one_to_one(op, opts.return_bool, lhs, rhs, &matching),
            Cardinality::ManyToOne => grouped(op, opts.return_bool, lhs, rhs, &matching, false),
            Cardinality::OneToMany => grouped(op, opts.return_bool, rhs, lhs, &matching, true),
            Cardinality::ManyToMany => Err(QueryError::InvalidQuery(format!(
                "many-to-many matching is only allowed for set operators, got {}",
                op.symbol()
            ))),
        },
    }
}

fn signatures(vector: &[Sample], matching: &VectorMatching) -> HashSet<Labels> {
    vector
        .iter()
        .map(|s| signature(&s.labels, matching))
        .collect()
}

fn and(lhs: Vector, rhs: Vector, matching: &VectorMatching) -> Vector {
    let right = signatures(&rhs, matching);
    lhs.into_iter()
        .filter(|s| right.contains(&signature(&s.labels, matching)))
        .collect()
}

fn or(lhs: Vector, rhs: Vector, matching: &VectorMatching) -> Vector {
    let left = signatures(&lhs, matching);
    let mut out = lhs;
    out.extend(
        rhs.into_iter()
            .filter(|s| !left.contains(&signature(&s.labels, matching))),
    );
    out
}

fn unless(lhs: Vector, rhs: Vector, matching: &VectorMatching) -> Vector {
    let right = signatures(&rhs, matching);
    lhs.into_iter()
        .filter(|s| !right.contains(&signature(&s.labels, matching)))
        .collect()
}

fn one_to_one(
    op: BinaryOp,
    return_bool: bool,
    lhs: Vector,
    rhs: Vector,
    matching: &VectorMatching,
) -> Result<Vector> {
    let mut right: HashMap<Labels, Sample> = HashMap::with_capacity(rhs.len());
    for sample in rhs {
        let key = signature(&sample.labels, matching);
        if right.insert(key, sample).is_some() {
            return Err(QueryError::ManyToOneMatch);
        }
    }

    let mut out = Vec::with_capacity(lhs.len().min(right.len()));
    let mut matched: HashSet<Labels> = HashSet::new();
    for sample in lhs {
        let key = signature(&sample.labels, matching);
        let Some(other) = right.get(&key) else {
            continue;
        };
        // Unmatched left duplicates are fine; matched ones are ambiguous.
        if !matched.insert(key.clone()) {
            return Err(QueryError::ManyToOneMatch);
        }
        let Some(value) = combine(op, return_bool, sample.value, other.value) else {
            continue;
        };
        // A one-to-one result carries exactly the matched labels.
        out.push(Sample::new(key, sample.timestamp_ms, value));
    }
    Ok(out)
}

/// group_left / group_right.
///
/// `many` keeps its full label set and receives the `include` labels of every
/// matching series of `one`. `swapped` marks that `many` is the right-hand
/// operand, so operands are flipped back before `op` is applied.
fn grouped(
    op: BinaryOp,
    return_bool: bool,
    many: Vector,
    one: Vector,
    matching: &VectorMatching,
    swapped: bool,
) -> Result<Vector> {
    let mut one_side: HashMap<Labels, Vec<Sample>> = HashMap::new();
    for sample in one {
        one_side
            .entry(signature(&sample.labels, matching))
            .or_default()
            .push(sample);
    }

    let mut out = Vec::new();
    let mut seen: HashSet<Labels> = HashSet::new();
    for sample in many {
        let key = signature(&sample.labels, matching);
        let Some(others) = one_side.get(&key) else {
            continue;
        };
        for other in others {
            let (lhs, rhs) = if swapped {
                (other.value, sample.value)
            } else {
                (sample.value, other.value)
            };
            let Some(value) = combine(op, return_bool, lhs, rhs) else {
                continue;
            };
            let labels = include_labels(&sample.labels, &other.labels, &matching.include)?;
            if !seen.insert(labels.clone()) {
                return Err(QueryError::NonUniqueGrouping);
            }
            out.push(Sample::new(labels, sample.timestamp_ms, value));
        }
    }
    Ok(out)
}

fn include_labels(many: &Labels, one: &Labels, include: &[String]) -> Result<Labels> {
    let mut builder = many.builder();
    for name in include {
        match (one.get(name), many.get(name)) {
            (Some(value), Some(existing)) if value != existing => {
                return Err(QueryError::LabelConflict(name.clone()));
            }
            (Some(value), _) => {
                builder.set(name.as_str(), value);
            }
            (None, _) => {
                builder.remove(name);
            }
        }
    }
    Ok(builder.build())
}
