use core_affinity::CoreId;
use std::collections::HashMap;

/// Where one worker should live: its NUMA node estimate and, when core ids
/// are available, the core it gets pinned to.
pub(crate) struct Placement {
    pub(crate) node: usize,
    pub(crate) core: Option<CoreId>,
}

#[derive(Debug, Clone)]
pub(crate) struct Topology {
    core_to_node: HashMap<usize, usize>,
    pub(crate) num_nodes: usize,
}

impl Topology {
    /// Conservative NUMA detection that prioritizes safety over accuracy.
    /// Defaults to a single node unless the machine is large enough that
    /// several nodes are plausible; misjudging toward one node only costs
    /// steal locality.
    pub(crate) fn detect() -> Self {
        use sysinfo::{CpuRefreshKind, System};

        let mut system = System::new();
        system.refresh_cpu_specifics(CpuRefreshKind::everything());
        let num_cores = system.cpus().len();

        let num_nodes = if num_cores > 32 {
            (num_cores / 16).clamp(1, 4)
        } else {
            1
        };

        let mut core_to_node = HashMap::new();
        for core in 0..num_cores {
            core_to_node.insert(core, core % num_nodes);
        }

        Topology {
            core_to_node,
            num_nodes,
        }
    }

    /// Maps `workers` worker indices onto cores and nodes.
    ///
    /// Cores are assigned round-robin; workers without an assignable core
    /// land on node 0 and run unpinned.
    pub(crate) fn placements(&self, workers: usize) -> Vec<Placement> {
        let cores = core_affinity::get_core_ids().unwrap_or_default();

        (0..workers)
            .map(|worker| {
                let core = if cores.is_empty() {
                    None
                } else {
                    Some(cores[worker % cores.len()])
                };
                let node = core
                    .and_then(|core| self.core_to_node.get(&core.id).copied())
                    .unwrap_or(0);
                Placement { node, core }
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn detects_at_least_one_node() {
        let topology = Topology::detect();
        assert!(topology.num_nodes >= 1);
    }

    #[test]
    fn placements_cover_every_worker() {
        let topology = Topology::detect();
        let placements = topology.placements(8);
        assert_eq!(placements.len(), 8);
        for placement in &placements {
            assert!(placement.node < topology.num_nodes.max(1));
        }
    }

    #[test]
    fn placements_for_zero_workers_is_empty() {
        let topology = Topology::detect();
        assert!(topology.placements(0).is_empty());
    }
}
