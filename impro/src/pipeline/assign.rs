//! Operation assignment.
//!
//! A single left-to-right pass splits the operation queue into contiguous
//! runs and binds each run to one engine:
//!
//! - Each operation yields the engines supporting it that are available,
//!   enabled for this pipeline and compatible with the current target type.
//! - While the intersection with the open run's candidates stays non-empty,
//!   the operation joins the run.
//! - Otherwise the run is closed and its first remaining candidate (lowest
//!   registration index) wins. A new run opens with the operation's own
//!   candidates.
//! - An explicit engine selection always opens a new run.
//! - Type selectors update the target type as soon as they are seen.
//!
//! Closed runs are never revisited. Closing a run without any candidate is
//! an error.

use std::collections::BTreeSet;
use std::ops::Range;

use serde::Serialize;
use tracing::debug;

use crate::operation::{Arg, Operation};
use crate::registry::EngineRegistry;
use crate::{Error, Result};

/// An engine bound to a contiguous run of the operation queue.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Assignment {
    pub engine: String,
    pub range: Range<usize>,
    /// Configuration argument of a leading engine selection.
    pub options: Option<Arg>,
    pub input_type: Option<String>,
    pub output_type: Option<String>,
}

impl Assignment {
    /// Whether the run starts with an explicit selection of its engine.
    pub fn selects_engine(&self, operations: &[Operation]) -> bool {
        operations
            .get(self.range.start)
            .is_some_and(|op| op.name == self.engine)
    }

    /// The operations the engine has to carry out.
    pub fn executed<'a>(&self, operations: &'a [Operation]) -> &'a [Operation] {
        let run = &operations[self.range.clone()];
        if self.selects_engine(operations) {
            &run[1..]
        } else {
            run
        }
    }
}

struct OpenRun {
    start: usize,
    candidates: Vec<usize>,
    last_selector: Option<String>,
}

struct Assigner<'a> {
    registry: &'a EngineRegistry,
    operations: &'a [Operation],
    disabled: &'a BTreeSet<String>,
    target_type: Option<String>,
    run_input_type: Option<String>,
    assignments: Vec<Assignment>,
}

impl Assigner<'_> {
    /// Supporting engines usable under the current target type.
    fn eligible(&self, operation: &str) -> Vec<usize> {
        let target = self.target_type.as_deref();
        self.registry
            .engines_supporting(operation)
            .iter()
            .copied()
            .filter(|&index| {
                self.registry.engine_at(index).is_some_and(|engine| {
                    let d = engine.descriptor();
                    !d.unavailable && !self.disabled.contains(&d.name) && d.compatible_with(target)
                })
            })
            .collect()
    }

    fn close(&mut self, run: OpenRun, end: usize) -> Result<()> {
        let (registry, operations) = (self.registry, self.operations);
        let range = run.start..end;
        let Some(engine) = run
            .candidates
            .first()
            .and_then(|&index| registry.engine_at(index))
        else {
            return Err(Error::Assignment {
                operations: operations[range]
                    .iter()
                    .map(|op| op.name.clone())
                    .collect(),
            });
        };
        let descriptor = engine.descriptor();

        let first = &operations[run.start];
        let options = (first.name == descriptor.name)
            .then(|| first.args.first().cloned())
            .flatten();

        let input_type = self.run_input_type.clone();
        let output_type = run
            .last_selector
            .or_else(|| {
                input_type
                    .as_deref()
                    .filter(|t| descriptor.can_output(t))
                    .map(str::to_string)
            })
            .or_else(|| descriptor.default_output_type.clone())
            .or_else(|| input_type.clone());

        debug!(
            engine = %descriptor.name,
            start = range.start,
            end = range.end,
            candidates = run.candidates.len(),
            ?input_type,
            ?output_type,
            "Closed run"
        );

        self.run_input_type = output_type.clone();
        self.assignments.push(Assignment {
            engine: descriptor.name.clone(),
            range,
            options,
            input_type,
            output_type,
        });
        Ok(())
    }
}

/// Partition `operations` into runs and bind each run to an engine.
///
/// The result covers the whole queue in order. An empty queue yields no
/// assignments.
pub fn assign(
    registry: &EngineRegistry,
    operations: &[Operation],
    source_type: Option<&str>,
    disabled: &BTreeSet<String>,
) -> Result<Vec<Assignment>> {
    let source_type = source_type.map(|t| media_types::canonical_name(t).unwrap_or(t).to_string());
    let mut assigner = Assigner {
        registry,
        operations,
        disabled,
        target_type: source_type.clone(),
        run_input_type: source_type,
        assignments: Vec::new(),
    };
    let mut open: Option<OpenRun> = None;

    for (index, operation) in operations.iter().enumerate() {
        let name = operation.name.as_str();
        let is_selector = registry.is_type_selector(name);
        if is_selector {
            assigner.target_type = Some(name.to_string());
        }

        let eligible = assigner.eligible(name);
        let forced = registry.is_engine(name);

        if let Some(run) = open.as_mut()
            && !forced
        {
            let narrowed: Vec<usize> = run
                .candidates
                .iter()
                .copied()
                .filter(|c| eligible.contains(c))
                .collect();
            if !narrowed.is_empty() {
                run.candidates = narrowed;
                if is_selector {
                    run.last_selector = Some(name.to_string());
                }
                continue;
            }
        }

        if let Some(run) = open.take() {
            assigner.close(run, index)?;
        }
        open = Some(OpenRun {
            start: index,
            candidates: eligible,
            last_selector: is_selector.then(|| name.to_string()),
        });
    }

    if let Some(run) = open {
        assigner.close(run, operations.len())?;
    }

    Ok(assigner.assignments)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::EngineDescriptor;
    use crate::test_utils::StubEngine;
    use rstest::rstest;

    fn registry() -> EngineRegistry {
        EngineRegistry::builder()
            .register(StubEngine::new(
                EngineDescriptor::new("metadata")
                    .operations(["metadata"])
                    .input_types(["*"]),
            ))
            .register(StubEngine::new(
                EngineDescriptor::new("gifsicle")
                    .operations(["resize", "crop", "rotate"])
                    .input_types(["gif"])
                    .output_types(["gif"]),
            ))
            .register(StubEngine::new(
                EngineDescriptor::new("gm")
                    .operations(["resize", "crop", "rotate", "sharpen"])
                    .input_types(["*"])
                    .output_types(["gif", "png", "jpeg"]),
            ))
            .register(StubEngine::new(
                EngineDescriptor::new("jpegtran")
                    .operations(["progressive", "rotate"])
                    .input_types(["jpeg"])
                    .output_types(["jpeg"]),
            ))
            .register(StubEngine::new(
                EngineDescriptor::new("inkscape")
                    .operations(["density"])
                    .input_types(["svg"])
                    .output_types(["png", "pdf"])
                    .default_output_type("png"),
            ))
            .build()
            .unwrap()
    }

    fn ops(names: &[&str]) -> Vec<Operation> {
        names.iter().map(|n| Operation::named(*n)).collect()
    }

    fn engines(assignments: &[Assignment]) -> Vec<&str> {
        assignments.iter().map(|a| a.engine.as_str()).collect()
    }

    #[test]
    fn test_single_engine_takes_whole_queue() {
        let operations = vec![
            Operation::new("resize", vec![40.into(), 15.into()]),
            Operation::new("crop", vec!["center".into()]),
        ];
        let assignments = assign(&registry(), &operations, Some("png"), &BTreeSet::new()).unwrap();
        assert_eq!(engines(&assignments), vec!["gm"]);
        assert_eq!(assignments[0].range, 0..2);
        assert_eq!(assignments[0].output_type.as_deref(), Some("png"));
    }

    #[test]
    fn test_specialised_engine_wins_by_priority() {
        let operations = ops(&["gif", "resize"]);
        let assignments = assign(&registry(), &operations, None, &BTreeSet::new()).unwrap();
        assert_eq!(engines(&assignments), vec!["gifsicle"]);
        assert_eq!(assignments[0].output_type.as_deref(), Some("gif"));

        let disabled: BTreeSet<String> = ["gifsicle".to_string()].into();
        let assignments = assign(&registry(), &operations, None, &disabled).unwrap();
        assert_eq!(engines(&assignments), vec!["gm"]);
    }

    #[test]
    fn test_run_splits_when_candidates_run_out() {
        // jpegtran cannot sharpen, gm cannot make progressive jpegs.
        let operations = ops(&["rotate", "sharpen", "progressive"]);
        let assignments =
            assign(&registry(), &operations, Some("jpeg"), &BTreeSet::new()).unwrap();
        assert_eq!(engines(&assignments), vec!["gm", "jpegtran"]);
        assert_eq!(assignments[0].range, 0..2);
        assert_eq!(assignments[1].range, 2..3);
        assert_eq!(assignments[1].input_type.as_deref(), Some("jpeg"));
    }

    #[test]
    fn test_type_selector_narrows_following_operations() {
        // After `png`, gifsicle no longer qualifies for resize.
        let operations = ops(&["png", "resize"]);
        let assignments = assign(&registry(), &operations, Some("gif"), &BTreeSet::new()).unwrap();
        assert_eq!(engines(&assignments), vec!["gm"]);
        assert_eq!(assignments[0].input_type.as_deref(), Some("gif"));
        assert_eq!(assignments[0].output_type.as_deref(), Some("png"));
    }

    #[test]
    fn test_engine_selection_opens_new_run() {
        let operations = vec![
            Operation::named("resize"),
            Operation::engine("gm", Some(Arg::from("fast"))),
            Operation::named("crop"),
        ];
        let assignments = assign(&registry(), &operations, Some("png"), &BTreeSet::new()).unwrap();
        assert_eq!(engines(&assignments), vec!["gm", "gm"]);
        assert_eq!(assignments[0].range, 0..1);
        assert_eq!(assignments[1].range, 1..3);
        assert_eq!(assignments[1].options, Some(Arg::from("fast")));
        assert!(assignments[1].selects_engine(&operations));
        assert_eq!(assignments[1].executed(&operations), &operations[2..]);
    }

    #[test]
    fn test_default_output_type_for_converters() {
        let operations = ops(&["density"]);
        let assignments = assign(&registry(), &operations, Some("svg"), &BTreeSet::new()).unwrap();
        assert_eq!(engines(&assignments), vec!["inkscape"]);
        assert_eq!(assignments[0].output_type.as_deref(), Some("png"));
    }

    #[rstest]
    #[case(&["frobnicate"], Some("png"))]
    #[case(&["resize", "frobnicate"], Some("png"))]
    #[case(&["progressive"], Some("png"))]
    #[case(&["density"], None)]
    fn test_unassignable_sequences(#[case] names: &[&str], #[case] source: Option<&str>) {
        let err = assign(&registry(), &ops(names), source, &BTreeSet::new()).unwrap_err();
        assert_eq!(err.kind(), crate::ErrorKind::Assignment);
    }

    #[test]
    fn test_unavailable_engines_are_skipped() {
        let registry = EngineRegistry::builder()
            .register(StubEngine::new(
                EngineDescriptor::new("gifsicle")
                    .operations(["resize"])
                    .input_types(["gif"])
                    .unavailable(true),
            ))
            .register(StubEngine::new(
                EngineDescriptor::new("gm")
                    .operations(["resize"])
                    .input_types(["*"]),
            ))
            .build()
            .unwrap();
        let assignments =
            assign(&registry, &ops(&["resize"]), Some("gif"), &BTreeSet::new()).unwrap();
        assert_eq!(engines(&assignments), vec!["gm"]);
    }

    #[test]
    fn test_runs_partition_the_queue() {
        let operations = ops(&["metadata", "rotate", "sharpen", "progressive", "rotate", "gif"]);
        let assignments =
            assign(&registry(), &operations, Some("jpeg"), &BTreeSet::new()).unwrap();

        let mut next = 0;
        for assignment in &assignments {
            assert_eq!(assignment.range.start, next);
            assert!(!assignment.range.is_empty());
            next = assignment.range.end;
        }
        assert_eq!(next, operations.len());
        assert!(assign(&registry(), &[], None, &BTreeSet::new()).unwrap().is_empty());
    }
}
