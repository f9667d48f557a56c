use nwave_core::neural::SurfaceState;

use crate::queue::{push_or_report, WorkQueue};
use crate::shading::{PathKernel, TraceResult};
use crate::work_items::*;

/// Queues the trace stage writes into.
pub struct TraceSinks<'a> {
    pub shade: &'a WorkQueue<RayWorkItem>,
    pub escaped: &'a WorkQueue<EscapedWorkItem>,
}

/// How the trace stage advances one path.
pub trait StepPath: Sync {
    fn name(&self) -> &'static str;
    fn step(&self, kernel: &PathKernel<'_>, sinks: &TraceSinks<'_>, item: &TraceWorkItem);
}

/// One bounce per queue round trip. Hits go to the shade queue, where their
/// index also keys the oracle query.
pub struct QueuedStep;

impl StepPath for QueuedStep {
    fn name(&self) -> &'static str {
        "queued"
    }
    fn step(&self, kernel: &PathKernel<'_>, sinks: &TraceSinks<'_>, item: &TraceWorkItem) {
        match kernel.trace(item) {
            TraceResult::Hit(prd) => {
                let Some(index) = push_or_report(sinks.shade, prd) else {
                    return;
                };
                if let Some(oracle) = kernel.oracle.filter(|_| kernel.neural_enabled(prd.pixel)) {
                    oracle.register_query(index, &SurfaceState::from_hit(&prd.hit, -prd.direction));
                }
            }
            TraceResult::Miss(escaped) => {
                push_or_report(sinks.escaped, escaped);
            }
        }
    }
}

/// Follows a path inline until it terminates, writing straight to the
/// frame buffer. Used to drain the last few long paths of a frame, where a
/// queue round trip per bounce would leave most lanes idle. The oracle needs
/// batched inference, so these paths sample classically.
pub struct RecursiveStep;

impl StepPath for RecursiveStep {
    fn name(&self) -> &'static str {
        "recursive"
    }
    fn step(&self, kernel: &PathKernel<'_>, _sinks: &TraceSinks<'_>, item: &TraceWorkItem) {
        let kernel = PathKernel {
            oracle: None,
            ..*kernel
        };
        let mut item = *item;
        loop {
            match kernel.trace(&item) {
                TraceResult::Hit(prd) => {
                    let (next, shadow) = kernel.shade(&prd, None);
                    if let Some(acc) = kernel.trace_shadow(&shadow) {
                        kernel.accumulate(&acc);
                    }
                    if !next.extend_ray {
                        if let Some(acc) = PathKernel::flush(next.radiance, next.pixel, next.depth) {
                            kernel.accumulate(&acc);
                        }
                        return;
                    }
                    item = next;
                }
                TraceResult::Miss(escaped) => {
                    if let Some(acc) = kernel.miss(&escaped) {
                        kernel.accumulate(&acc);
                    }
                    return;
                }
            }
        }
    }
}

