//! Workload generation: expand task classes into arrival events.
//!
//! Each class owns a seeded RNG, so runs are reproducible and classes
//! are independent of one another.

use rand::rngs::StdRng;
use rand::SeedableRng;
use rand_distr::{Distribution, Exp};
use tracing::{debug, warn};

use volt_core::config::TaskClass;
use volt_core::types::{SimTime, SlaClass};

use crate::cluster::{SimCluster, TaskSpec};

/// How much slack a class's deadline carries over its expected
/// runtime. Tighter classes get tighter targets.
fn deadline_slack(sla: SlaClass) -> f64 {
    match sla {
        SlaClass::Sla0 => 1.2,
        SlaClass::Sla1 => 1.5,
        SlaClass::Sla2 => 2.0,
        SlaClass::Sla3 => 8.0,
    }
}

/// Expand every `[[task_class]]` block into task arrivals on the
/// cluster. Inter-arrival gaps are exponentially distributed around
/// the class mean. Returns the number of tasks generated.
pub fn generate_arrivals(cluster: &mut SimCluster, classes: &[TaskClass]) -> usize {
    let mut generated = 0;
    for (idx, class) in classes.iter().enumerate() {
        let mean = class.inter_arrival_us as f64;
        let Ok(gap) = Exp::new(1.0 / mean) else {
            warn!(class = idx, "unusable inter-arrival mean; class skipped");
            continue;
        };
        let mut rng = StdRng::seed_from_u64(class.seed);
        // Instructions follow from the quoted runtime at nominal MIPS
        // (1 MIPS = 1 instruction per µs).
        let instructions = class.expected_runtime_us * class.nominal_mips;
        let slack = deadline_slack(class.sla);

        let mut t = class.start_time;
        let mut count = 0usize;
        while t < class.end_time {
            let deadline = t + (class.expected_runtime_us as f64 * slack) as SimTime;
            cluster.add_task(
                t,
                TaskSpec {
                    cpu: class.cpu,
                    vm_kind: class.vm_kind,
                    kind: class.task_type,
                    gpu_required: class.gpu,
                    memory: class.memory,
                    sla: class.sla,
                    instructions,
                    target_completion: deadline,
                },
            );
            count += 1;
            t += (gap.sample(&mut rng).max(1.0)) as SimTime;
        }
        debug!(class = idx, tasks = count, "task class expanded");
        generated += count;
    }
    generated
}
