use std::collections::BTreeSet;

use propagator_core::TargetKey;

/// Partition of desired and current targets into the three mutation sets.
///
/// Each set is sorted by `namespace/name`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TargetPlan {
    pub to_create: Vec<TargetKey>,
    pub to_update: Vec<TargetKey>,
    pub to_delete: Vec<TargetKey>,
}

impl TargetPlan {
    pub fn compute(desired: &[TargetKey], current: &[TargetKey]) -> Self {
        let desired: BTreeSet<&TargetKey> = desired.iter().collect();
        let current: BTreeSet<&TargetKey> = current.iter().collect();

        Self {
            to_create: desired.difference(&current).map(|k| (*k).clone()).collect(),
            to_update: desired.intersection(&current).map(|k| (*k).clone()).collect(),
            to_delete: current.difference(&desired).map(|k| (*k).clone()).collect(),
        }
    }

    pub fn len(&self) -> usize {
        self.to_create.len() + self.to_update.len() + self.to_delete.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn keys(items: &[(&str, &str)]) -> Vec<TargetKey> {
        items.iter().map(|(ns, n)| TargetKey::new(*ns, *n)).collect()
    }

    #[test]
    fn example_scenario() {
        let desired = keys(&[("ns-a", "cm1"), ("ns-b", "cm1")]);
        let current = keys(&[("ns-b", "cm1"), ("ns-c", "cm1")]);

        let plan = TargetPlan::compute(&desired, &current);
        assert_eq!(plan.to_create, keys(&[("ns-a", "cm1")]));
        assert_eq!(plan.to_update, keys(&[("ns-b", "cm1")]));
        assert_eq!(plan.to_delete, keys(&[("ns-c", "cm1")]));
    }

    #[test]
    fn empty_inputs() {
        assert!(TargetPlan::compute(&[], &[]).is_empty());
    }

    #[test]
    fn partitions_the_union_for_every_subset_pair() {
        let universe = keys(&[("a", "x"), ("b", "x"), ("c", "x"), ("c", "y")]);
        let subset = |mask: u32| -> Vec<TargetKey> {
            universe
                .iter()
                .enumerate()
                .filter(|(i, _)| mask & (1 << i) != 0)
                .map(|(_, k)| k.clone())
                .collect()
        };

        for d in 0..16u32 {
            for c in 0..16u32 {
                let desired = subset(d);
                let current = subset(c);
                let plan = TargetPlan::compute(&desired, &current);

                for k in &plan.to_create {
                    assert!(desired.contains(k) && !current.contains(k));
                }
                for k in &plan.to_update {
                    assert!(desired.contains(k) && current.contains(k));
                }
                for k in &plan.to_delete {
                    assert!(!desired.contains(k) && current.contains(k));
                }
                let union = subset(d | c);
                assert_eq!(plan.len(), union.len());

                let mut all: Vec<_> = plan
                    .to_create
                    .iter()
                    .chain(&plan.to_update)
                    .chain(&plan.to_delete)
                    .cloned()
                    .collect();
                all.sort();
                assert_eq!(all, union);
            }
        }
    }

    #[test]
    fn output_is_sorted_regardless_of_input_order() {
        let desired = keys(&[("z", "cm"), ("a", "cm"), ("m", "cm")]);
        let plan = TargetPlan::compute(&desired, &[]);
        assert_eq!(plan.to_create, keys(&[("a", "cm"), ("m", "cm"), ("z", "cm")]));
    }
}
