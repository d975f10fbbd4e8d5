//! VM-kind / CPU-family compatibility rules.
//!
//! LINUX and LINUX_RT boot on any family. WIN requires X86 or ARM.
//! AIX requires POWER. A task additionally requires that the host
//! machine matches its CPU family, advertises a GPU when the task
//! demands one, and has memory headroom for the task.

use crate::types::{CpuFamily, MachineSnapshot, TaskSnapshot, VmKind};

/// Whether a VM of `kind` can boot on a machine of `cpu`.
pub fn vm_kind_runs_on(kind: VmKind, cpu: CpuFamily) -> bool {
    match kind {
        VmKind::Linux | VmKind::LinuxRt => true,
        VmKind::Win => matches!(cpu, CpuFamily::X86 | CpuFamily::Arm),
        VmKind::Aix => cpu == CpuFamily::Power,
    }
}

/// Coerce an incompatible `(kind, cpu)` pair to the nearest runnable
/// combination. Compatible pairs pass through unchanged.
///
/// POWER machines take AIX; AIX requested on X86/ARM falls back to
/// LINUX; everything else falls back to LINUX.
pub fn coerce_vm_kind(kind: VmKind, cpu: CpuFamily) -> VmKind {
    if vm_kind_runs_on(kind, cpu) {
        return kind;
    }
    match cpu {
        CpuFamily::Power => VmKind::Aix,
        CpuFamily::X86 | CpuFamily::Arm => VmKind::Linux,
        CpuFamily::Riscv => VmKind::Linux,
    }
}

/// Whether `machine` satisfies a task's hardware constraints: CPU
/// family match, GPU capability if demanded, and memory headroom of at
/// least `extra_memory` units on top of current use.
pub fn machine_fits_task(machine: &MachineSnapshot, task: &TaskSnapshot) -> bool {
    machine_fits(machine, task.cpu, task.gpu_required, task.memory)
}

/// Raw form of [`machine_fits_task`] for callers that carry the
/// requirements without a full task snapshot (e.g. migration of a VM
/// whose aggregate demand was summed from its tasks).
pub fn machine_fits(
    machine: &MachineSnapshot,
    cpu: CpuFamily,
    needs_gpu: bool,
    memory: u64,
) -> bool {
    if machine.cpu != cpu {
        return false;
    }
    if needs_gpu && !machine.has_gpu {
        return false;
    }
    machine.memory_free() >= memory
}
