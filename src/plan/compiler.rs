//! Operator list to plan.
//!
//! The fast path folds operators into the flat slots of [`FlatFields`].
//! That is only correct when applying the slots in the executor's fixed
//! precedence gives the same result as applying the operators in source
//! order. Whenever that cannot be shown statically the whole list becomes
//! ordered steps.

use std::{marker::PhantomData, sync::Arc};

use tracing::debug;

use crate::{
    error::QueryResult,
    path::{PathQuery, PatternEngine, RegexEngine},
    plan::{ElementType, FlatFields, OperatorKind, Plan, Shape, Step, validate},
    query::ast::{Operator, Partition, Terminal},
    value::Value,
};

/// Precedence slot of an operator in flat mode. Lower runs first.
fn rank(operator: &Operator) -> u8 {
    match operator {
        Operator::OfType(_) => 0,
        Operator::SelectMany(_) => 1,
        Operator::Zip(_) => 2,
        Operator::Where(_) => 3,
        Operator::Set(_) => 4,
        Operator::GroupBy(_) => 5,
        Operator::Join(_) => 6,
        Operator::Sequence(_) => 7,
        Operator::Partition(Partition::Skip(_) | Partition::Take(_)) => 11,
        Operator::Partition(_) => 8,
        Operator::OrderBy { .. } | Operator::ThenBy { .. } => 9,
        Operator::Reverse => 10,
        Operator::DefaultIfEmpty(_) => 12,
        Operator::Select(_) => 13,
        Operator::Terminal(_) => u8::MAX,
    }
}

/// Families with a single flat slot; a second occurrence cannot be folded.
fn single_slot(operator: &Operator) -> Option<u8> {
    match operator {
        Operator::Where(_)
        | Operator::Select(_)
        | Operator::OrderBy { .. }
        | Operator::ThenBy { .. }
        | Operator::Sequence(_)
        | Operator::Partition(Partition::Skip(_) | Partition::Take(_))
        | Operator::Terminal(_) => None,
        other => Some(rank(other)),
    }
}

/// Why the operator list must run in source order, if it must.
fn ordering_violation(operators: &[Operator]) -> Option<&'static str> {
    let mut seen_select = false;
    let mut seen_sort = false;
    let mut seen_join = false;
    let mut seen_group = false;
    let mut max_rank = 0;
    let mut slots = Vec::new();

    for operator in operators {
        match operator {
            Operator::Where(_) | Operator::Set(_) | Operator::Partition(_) if seen_select => {
                return Some("projection followed by filtering, set operation or partitioning");
            }
            Operator::OrderBy { .. } | Operator::ThenBy { .. } if seen_join => {
                return Some("ordering after a join");
            }
            Operator::Partition(Partition::SkipWhile(_) | Partition::TakeWhile(_)) if seen_sort => {
                return Some("while-partitioning after sorting");
            }
            Operator::Select(_) if seen_group => {
                return Some("grouping followed by projection");
            }
            _ => {}
        }

        let rank = rank(operator);
        if rank < max_rank {
            return Some("operator precedes an earlier operator's slot");
        }
        max_rank = rank;

        if let Some(slot) = single_slot(operator) {
            if slots.contains(&slot) {
                return Some("repeated single-slot operator");
            }
            slots.push(slot);
        }

        match operator {
            Operator::Select(_) => seen_select = true,
            Operator::OrderBy { .. } | Operator::ThenBy { .. } => seen_sort = true,
            Operator::Join(_) => seen_join = true,
            Operator::GroupBy(_) => seen_group = true,
            _ => {}
        }
    }
    None
}

/// Consecutive skip/take composed into one skip followed by one take.
#[derive(Debug, Default, Clone, Copy)]
struct Pagination {
    skip: u64,
    take: Option<u64>,
}

impl Pagination {
    fn apply(&mut self, partition: &Partition) {
        match partition {
            Partition::Skip(n) => {
                let n = (*n).max(0) as u64;
                self.skip += n;
                self.take = self.take.map(|t| t.saturating_sub(n));
            }
            Partition::Take(n) => {
                let n = (*n).max(0) as u64;
                self.take = Some(self.take.map_or(n, |t| t.min(n)));
            }
            _ => {}
        }
    }
}

fn is_pagination(operator: &Operator) -> bool {
    matches!(
        operator,
        Operator::Partition(Partition::Skip(_) | Partition::Take(_))
    )
}

fn flatten(operators: &[Operator]) -> (FlatFields, Pagination) {
    let mut flat = FlatFields::default();
    let mut pagination = Pagination::default();
    // End of the key group that then_by extends
    let mut sort_group_end = 0;

    for operator in operators {
        match operator.clone() {
            Operator::Where(predicate) => flat.predicates.push(predicate),
            Operator::Select(selector) => flat.projections.push(selector),
            Operator::SelectMany(selector) => flat.flatten = Some(selector),
            Operator::OfType(kind) => flat.of_type = Some(kind),
            Operator::Zip(zip) => flat.zip = Some(zip),
            Operator::OrderBy { keys, directions } => {
                // A later order_by becomes the primary key.
                let group: Vec<_> = keys.into_iter().zip(directions).collect();
                sort_group_end = group.len();
                flat.sort.splice(0..0, group);
            }
            Operator::ThenBy { key, direction } => {
                flat.sort.insert(sort_group_end, (key, direction));
                sort_group_end += 1;
            }
            Operator::Reverse => flat.reverse = true,
            Operator::Partition(partition @ (Partition::Skip(_) | Partition::Take(_))) => {
                pagination.apply(&partition);
            }
            Operator::Partition(partition) => flat.partition = Some(partition),
            Operator::Set(set) => flat.set = Some(set),
            Operator::GroupBy(grouping) => flat.group = Some(grouping),
            Operator::Join(join) => flat.join = Some(join),
            Operator::Sequence(op) => flat.sequence.push(op),
            Operator::DefaultIfEmpty(value) => flat.default_if_empty = Some(value),
            Operator::Terminal(_) => {}
        }
    }
    (flat, pagination)
}

fn linearize(operators: &[Operator]) -> (Vec<Step>, Pagination) {
    let trailing = operators
        .iter()
        .rev()
        .take_while(|op| is_pagination(op))
        .count();
    let (body, tail) = operators.split_at(operators.len() - trailing);

    let mut pagination = Pagination::default();
    for operator in tail {
        if let Operator::Partition(partition) = operator {
            pagination.apply(partition);
        }
    }

    let steps = body
        .iter()
        .map(|operator| Step {
            kind: operator.kind(),
            operator: operator.clone(),
            shape: Shape::of(operator),
        })
        .collect();
    (steps, pagination)
}

/// Validate and compile an operator list.
pub fn compile<R>(
    operators: &[Operator],
    path: Option<&str>,
    engine: Option<Arc<dyn PatternEngine>>,
) -> QueryResult<Plan<R>> {
    validate::validate(operators)?;

    let path = match path {
        Some(expr) => {
            let engine = engine.unwrap_or_else(|| Arc::new(RegexEngine));
            Some(Arc::new(PathQuery::compile_with(expr, engine)?))
        }
        None => None,
    };

    let (body, terminal) = match operators.split_last() {
        Some((Operator::Terminal(t), body)) => (body, Some(t.clone())),
        _ => (operators, None),
    };

    // Any shape change means the source is read as the document's own shape.
    let source_type = if body.iter().rev().any(|op| Shape::of(op).is_some()) {
        ElementType::of::<Value>()
    } else {
        ElementType::of::<R>()
    };

    let violation = ordering_violation(body);
    let (flat, steps, pagination) = match violation {
        Some(_) => {
            let (steps, pagination) = linearize(body);
            (FlatFields::default(), steps, pagination)
        }
        None => {
            let (flat, pagination) = flatten(body);
            (flat, Vec::new(), pagination)
        }
    };

    let plan = Plan {
        flat,
        steps,
        skip: pagination.skip,
        take: pagination.take,
        terminal,
        path,
        source_type,
        result_type: ElementType::of::<R>(),
        _marker: PhantomData,
    };

    debug!(
        mode = if plan.is_step_mode() { "step" } else { "flat" },
        reason = violation.unwrap_or("none"),
        steps = plan.steps.len(),
        terminal = ?plan.terminal.as_ref().map(Terminal::kind),
        requires_materialization = plan.requires_materialization(),
        "compiled query plan"
    );
    Ok(plan)
}

/// Kinds of the operators a plan runs, in execution order. Flat plans
/// report their slots in precedence order.
pub fn describe<R>(plan: &Plan<R>) -> Vec<OperatorKind> {
    if plan.is_step_mode() {
        return plan.steps.iter().map(|s| s.kind).collect();
    }
    let flat = &plan.flat;
    let mut kinds = Vec::new();
    if flat.of_type.is_some() {
        kinds.push(OperatorKind::OfType);
    }
    if flat.flatten.is_some() {
        kinds.push(OperatorKind::SelectMany);
    }
    if flat.zip.is_some() {
        kinds.push(OperatorKind::Zip);
    }
    kinds.extend(flat.predicates.iter().map(|_| OperatorKind::Where));
    if let Some(set) = &flat.set {
        kinds.push(Operator::Set(set.clone()).kind());
    }
    if flat.group.is_some() {
        kinds.push(OperatorKind::GroupBy);
    }
    if flat.join.is_some() {
        kinds.push(OperatorKind::Join);
    }
    kinds.extend(
        flat.sequence
            .iter()
            .map(|op| Operator::Sequence(op.clone()).kind()),
    );
    if let Some(partition) = &flat.partition {
        kinds.push(Operator::Partition(partition.clone()).kind());
    }
    if !flat.sort.is_empty() {
        kinds.push(OperatorKind::OrderBy);
    }
    if flat.reverse {
        kinds.push(OperatorKind::Reverse);
    }
    if flat.default_if_empty.is_some() {
        kinds.push(OperatorKind::DefaultIfEmpty);
    }
    kinds.extend(flat.projections.iter().map(|_| OperatorKind::Select));
    kinds
}
