//! Gate aggregation: run every configured validator and fold the results
//! into one verdict.

use std::sync::Arc;

use futures::future::join_all;
use stackgate_core::{obs, Artifact, GateVerdict, ValidationResult};
use tracing::warn;

use crate::adapter::{build_adapter, ValidatorAdapter};
use crate::spec::ValidatorSpec;

/// Gate evaluation over a set of validators.
pub struct GateAggregator;

impl GateAggregator {
    /// Evaluate `artifact` against `specs`.
    ///
    /// Rules:
    /// - Enabled validators run concurrently; results come back in `specs`
    ///   order regardless of completion order.
    /// - A disabled advisory validator is skipped.
    /// - A disabled blocking validator is not skipped silently: it yields an
    ///   `error` result, which fails the gate.
    /// - The verdict fails iff a blocking result is not `pass`.
    pub async fn evaluate(artifact: &Artifact, specs: &[ValidatorSpec]) -> GateVerdict {
        let mut slots: Vec<Slot> = Vec::with_capacity(specs.len());
        for spec in specs {
            if spec.enabled {
                slots.push(Slot::Run(build_adapter(spec.clone())));
            } else if spec.is_blocking() {
                warn!(validator = %spec.name, "blocking validator is disabled; failing closed");
                slots.push(Slot::Done(ValidationResult::error(
                    &spec.name,
                    spec.policy,
                    "blocking validator is disabled",
                )));
            }
        }
        Self::evaluate_slots(artifact, slots).await
    }

    async fn evaluate_slots(artifact: &Artifact, slots: Vec<Slot>) -> GateVerdict {
        let futures = slots.into_iter().map(|slot| async move {
            match slot {
                Slot::Run(adapter) => adapter.run(artifact).await,
                Slot::Done(result) => result,
            }
        });
        let results = join_all(futures).await;

        let verdict = GateVerdict::from_results(results);
        obs::emit_gate_evaluated(
            verdict.results.len(),
            verdict.blocking_failures().count(),
            verdict.passed(),
        );
        verdict
    }
}

enum Slot {
    Run(Arc<dyn ValidatorAdapter>),
    Done(ValidationResult),
}
