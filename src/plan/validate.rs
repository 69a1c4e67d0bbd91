use crate::{
    error::PlanError,
    plan::OperatorKind,
    query::ast::{ConversionKind, Operator, Partition, Terminal},
};

/// Reject structurally invalid operator lists before anything runs.
pub fn validate(operators: &[Operator]) -> Result<(), PlanError> {
    let mut terminal: Option<OperatorKind> = None;
    let mut previous: Option<OperatorKind> = None;

    for operator in operators {
        let kind = operator.kind();
        if let Some(terminal) = terminal {
            return Err(PlanError::OperatorAfterTerminal { terminal, next: kind });
        }

        match operator {
            Operator::OrderBy { keys, directions } => {
                if keys.len() != directions.len() {
                    return Err(PlanError::SortArityMismatch {
                        keys: keys.len(),
                        directions: directions.len(),
                    });
                }
                if keys.is_empty() {
                    return Err(PlanError::MissingSelector(kind));
                }
            }
            Operator::ThenBy { .. } => {
                if !previous.is_some_and(OperatorKind::is_sort) {
                    return Err(PlanError::ThenByWithoutOrderBy(kind));
                }
            }
            Operator::Partition(
                Partition::Skip(count)
                | Partition::Take(count)
                | Partition::SkipLast(count)
                | Partition::TakeLast(count),
            ) if *count < 0 => {
                return Err(PlanError::NegativeCount {
                    operator: kind,
                    count: *count,
                });
            }
            Operator::Partition(Partition::Chunk(size)) if *size <= 0 => {
                return Err(PlanError::InvalidChunkSize(*size));
            }
            Operator::GroupBy(grouping) if grouping.key.is_none() => {
                return Err(PlanError::MissingSelector(kind));
            }
            Operator::Join(join) => {
                if join.outer_key.is_none() {
                    return Err(PlanError::IncompleteJoin("outer key selector"));
                }
                if join.inner_key.is_none() {
                    return Err(PlanError::IncompleteJoin("inner key selector"));
                }
                if join.result.is_none() {
                    return Err(PlanError::IncompleteJoin("result selector"));
                }
            }
            Operator::Terminal(t) => {
                validate_terminal(t, kind)?;
                terminal = Some(kind);
            }
            _ => {}
        }
        previous = Some(kind);
    }
    Ok(())
}

fn validate_terminal(terminal: &Terminal, kind: OperatorKind) -> Result<(), PlanError> {
    match terminal {
        Terminal::Numeric { selector: None, .. } | Terminal::MinBy(None) | Terminal::MaxBy(None) => {
            Err(PlanError::MissingSelector(kind))
        }
        Terminal::ElementAt { index, .. } if *index < 0 => Err(PlanError::NegativeCount {
            operator: kind,
            count: *index,
        }),
        Terminal::Convert {
            kind: ConversionKind::Dictionary | ConversionKind::Lookup,
            key: None,
            ..
        } => Err(PlanError::MissingSelector(kind)),
        _ => Ok(()),
    }
}
