//! Groups a namespaces workloads into priority groups

use std::collections::BTreeMap;

use crate::libs::patterns;
use crate::libs::workloads::Workload;

/// Group the scalable workloads in a namespace by sequence priority
///
/// Excluded workloads are dropped entirely. Workloads no sequence element
/// matches land in the sentinel priority group so they scale last on the
/// way down and first on the way up.
///
/// # Arguments
///
/// * `workloads` - The workloads to group
/// * `sequence` - The name patterns ordering workloads
/// * `exclusions` - The name patterns for workloads that must never be scaled
pub fn priority_groups(
    workloads: Vec<Workload>,
    sequence: &[String],
    exclusions: &[String],
) -> BTreeMap<usize, Vec<Workload>> {
    let mut groups: BTreeMap<usize, Vec<Workload>> = BTreeMap::default();
    for workload in workloads {
        // excluded workloads are never touched
        if patterns::is_excluded(&workload.name, exclusions) {
            continue;
        }
        // the first matching sequence element sets this workloads priority
        let priority = patterns::sequence_index(&workload.name, sequence);
        groups.entry(priority).or_default().push(workload);
    }
    // order groups internally so scaling is deterministic
    for group in groups.values_mut() {
        group.sort_by(|a, b| (a.kind, a.name.as_str()).cmp(&(b.kind, b.name.as_str())));
    }
    groups
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::libs::patterns::UNMATCHED_PRIORITY;
    use crate::libs::workloads::WorkloadKind;

    /// Turn raw strs into the owned patterns the api hands us
    fn raw(patterns: &[&str]) -> Vec<String> {
        patterns.iter().map(|p| (*p).to_owned()).collect()
    }

    /// Workloads land in groups by their first matching sequence element
    #[test]
    fn groups_by_sequence_priority() {
        let workloads = vec![
            Workload::new(WorkloadKind::Deployment, "frontend", 2, 2, 2),
            Workload::new(WorkloadKind::StatefulSet, "db-main", 1, 1, 1),
            Workload::new(WorkloadKind::Deployment, "backend", 3, 3, 3),
        ];
        let sequence = raw(&["db-*", "backend", "*"]);
        let groups = priority_groups(workloads, &sequence, &[]);
        assert_eq!(groups.len(), 3);
        assert_eq!(groups[&0][0].name, "db-main");
        assert_eq!(groups[&1][0].name, "backend");
        assert_eq!(groups[&2][0].name, "frontend");
    }

    /// Unmatched workloads share the sentinel group
    #[test]
    fn unmatched_workloads_share_the_sentinel_group() {
        let workloads = vec![
            Workload::new(WorkloadKind::Deployment, "web", 1, 1, 1),
            Workload::new(WorkloadKind::Deployment, "worker", 1, 1, 1),
        ];
        let groups = priority_groups(workloads, &raw(&["db-*"]), &[]);
        assert_eq!(groups.len(), 1);
        assert_eq!(groups[&UNMATCHED_PRIORITY].len(), 2);
    }

    /// Excluded workloads never show up in any group
    #[test]
    fn drops_excluded_workloads() {
        let workloads = vec![
            Workload::new(WorkloadKind::Deployment, "api", 2, 2, 2),
            Workload::new(WorkloadKind::Deployment, "vault", 1, 1, 1),
        ];
        let groups = priority_groups(workloads, &[], &raw(&["vault"]));
        assert_eq!(groups.len(), 1);
        assert_eq!(groups[&UNMATCHED_PRIORITY].len(), 1);
        assert_eq!(groups[&UNMATCHED_PRIORITY][0].name, "api");
    }

    /// Groups are sorted by kind then name for deterministic scaling
    #[test]
    fn orders_groups_deterministically() {
        let workloads = vec![
            Workload::new(WorkloadKind::StatefulSet, "alpha", 1, 1, 1),
            Workload::new(WorkloadKind::Deployment, "zulu", 1, 1, 1),
            Workload::new(WorkloadKind::Deployment, "alpha", 1, 1, 1),
        ];
        let groups = priority_groups(workloads, &[], &[]);
        let names: Vec<(WorkloadKind, &str)> = groups[&UNMATCHED_PRIORITY]
            .iter()
            .map(|workload| (workload.kind, workload.name.as_str()))
            .collect();
        assert_eq!(
            names,
            vec![
                (WorkloadKind::Deployment, "alpha"),
                (WorkloadKind::Deployment, "zulu"),
                (WorkloadKind::StatefulSet, "alpha"),
            ]
        );
    }
}
