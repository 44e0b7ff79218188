use std::collections::{BTreeSet, HashMap};

use thiserror::Error;

use crate::models::AgentAction;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum GraphError {
    #[error("duplicate action id '{0}'")]
    DuplicateAction(String),

    #[error("action '{action}' depends on unknown action '{dependency}'")]
    UnknownDependency { action: String, dependency: String },

    #[error("dependency cycle between actions: {}", ids.join(", "))]
    Cycle { ids: Vec<String> },
}

/// Validated action graph with precomputed execution groups.
///
/// Actions live in an arena indexed by declaration position; edges point from
/// a dependency to its dependents.
#[derive(Debug, Clone)]
pub struct ExecutionPlan {
    actions: Vec<AgentAction>,
    index: HashMap<String, usize>,
    deps: Vec<Vec<usize>>,
    dependents: Vec<Vec<usize>>,
    groups: Vec<Vec<usize>>,
}

impl ExecutionPlan {
    /// Groups in execution order. Group k holds the actions whose longest
    /// dependency chain has length k, sorted by `(order, declaration index)`.
    pub fn groups(&self) -> &[Vec<usize>] {
        &self.groups
    }

    pub fn dependencies(&self, idx: usize) -> &[usize] {
        &self.deps[idx]
    }

    pub fn dependents(&self, idx: usize) -> &[usize] {
        &self.dependents[idx]
    }

    /// No other action depends on this one.
    pub fn is_terminal(&self, idx: usize) -> bool {
        self.dependents[idx].is_empty()
    }

    pub fn action(&self, idx: usize) -> &AgentAction {
        &self.actions[idx]
    }

    pub fn actions(&self) -> &[AgentAction] {
        &self.actions
    }

    pub fn index_of(&self, id: &str) -> Option<usize> {
        self.index.get(id).copied()
    }

    pub fn len(&self) -> usize {
        self.actions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.actions.is_empty()
    }
}

/// Validate the `dependsOn` graph of an agent and compute its execution groups.
pub fn resolve(actions: &[AgentAction]) -> Result<ExecutionPlan, GraphError> {
    let mut index: HashMap<String, usize> = HashMap::with_capacity(actions.len());
    for (i, action) in actions.iter().enumerate() {
        if index.insert(action.id.clone(), i).is_some() {
            return Err(GraphError::DuplicateAction(action.id.clone()));
        }
    }

    let mut deps: Vec<Vec<usize>> = vec![Vec::new(); actions.len()];
    let mut dependents: Vec<Vec<usize>> = vec![Vec::new(); actions.len()];
    for (i, action) in actions.iter().enumerate() {
        for dep_id in &action.depends_on {
            let &dep = index.get(dep_id.as_str()).ok_or_else(|| GraphError::UnknownDependency {
                action: action.id.clone(),
                dependency: dep_id.clone(),
            })?;
            if !deps[i].contains(&dep) {
                deps[i].push(dep);
                dependents[dep].push(i);
            }
        }
    }

    // DFS over dependency edges; depth[i] is the longest chain below i.
    let mut depth: Vec<Option<usize>> = vec![None; actions.len()];
    let mut in_stack = vec![false; actions.len()];
    let mut stack: Vec<usize> = Vec::new();

    fn visit(
        node: usize,
        deps: &[Vec<usize>],
        depth: &mut [Option<usize>],
        in_stack: &mut [bool],
        stack: &mut Vec<usize>,
        actions: &[AgentAction],
    ) -> Result<usize, GraphError> {
        if in_stack[node] {
            let start = stack.iter().position(|&n| n == node).unwrap_or(0);
            let ids: BTreeSet<String> = stack[start..]
                .iter()
                .map(|&n| actions[n].id.clone())
                .collect();
            return Err(GraphError::Cycle { ids: ids.into_iter().collect() });
        }
        if let Some(d) = depth[node] {
            return Ok(d);
        }

        in_stack[node] = true;
        stack.push(node);
        let mut d = 0;
        for &dep in &deps[node] {
            d = d.max(visit(dep, deps, depth, in_stack, stack, actions)? + 1);
        }
        stack.pop();
        in_stack[node] = false;
        depth[node] = Some(d);
        Ok(d)
    }

    for i in 0..actions.len() {
        visit(i, &deps, &mut depth, &mut in_stack, &mut stack, actions)?;
    }

    let mut groups: Vec<Vec<usize>> = Vec::new();
    for (i, d) in depth.iter().enumerate() {
        let d = d.unwrap_or(0);
        if groups.len() <= d {
            groups.resize_with(d + 1, Vec::new);
        }
        groups[d].push(i);
    }
    for group in &mut groups {
        group.sort_by_key(|&i| (actions[i].order, i));
    }

    Ok(ExecutionPlan {
        actions: actions.to_vec(),
        index,
        deps,
        dependents,
        groups,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{ActionParams, CommandParams};
    use proptest::prelude::*;

    fn make_action(id: &str, order: u32, depends_on: &[&str]) -> AgentAction {
        AgentAction {
            id: id.to_string(),
            name: format!("Action {}", id),
            params: ActionParams::Command(CommandParams {
                command: "true".to_string(),
                working_dir: None,
                env: Default::default(),
            }),
            order,
            timeout: None,
            retry_count: None,
            depends_on: depends_on.iter().map(|s| s.to_string()).collect(),
        }
    }

    fn group_ids(plan: &ExecutionPlan) -> Vec<Vec<&str>> {
        plan.groups()
            .iter()
            .map(|g| g.iter().map(|&i| plan.action(i).id.as_str()).collect())
            .collect()
    }

    #[test]
    fn test_resolve_no_deps_single_group() {
        let actions = vec![make_action("a", 0, &[]), make_action("b", 0, &[]), make_action("c", 0, &[])];
        let plan = resolve(&actions).unwrap();
        assert_eq!(group_ids(&plan), vec![vec!["a", "b", "c"]]);
        assert!((0..3).all(|i| plan.is_terminal(i)));
    }

    #[test]
    fn test_resolve_orders_within_group() {
        let actions = vec![make_action("late", 5, &[]), make_action("early", 1, &[]), make_action("tie", 1, &[])];
        let plan = resolve(&actions).unwrap();
        assert_eq!(group_ids(&plan), vec![vec!["early", "tie", "late"]]);
    }

    #[test]
    fn test_resolve_a_then_b() {
        let actions = vec![make_action("b", 0, &["a"]), make_action("a", 1, &[])];
        let plan = resolve(&actions).unwrap();
        assert_eq!(group_ids(&plan), vec![vec!["a"], vec!["b"]]);
        let a = plan.index_of("a").unwrap();
        let b = plan.index_of("b").unwrap();
        assert_eq!(plan.dependencies(b), &[a]);
        assert_eq!(plan.dependents(a), &[b]);
        assert!(!plan.is_terminal(a));
        assert!(plan.is_terminal(b));
    }

    #[test]
    fn test_resolve_uses_longest_chain() {
        // d depends on a directly and on c through b, so it lands after c
        let actions = vec![
            make_action("a", 0, &[]),
            make_action("b", 0, &["a"]),
            make_action("c", 0, &["b"]),
            make_action("d", 0, &["a", "c"]),
        ];
        let plan = resolve(&actions).unwrap();
        assert_eq!(group_ids(&plan), vec![vec!["a"], vec!["b"], vec!["c"], vec!["d"]]);
    }

    #[test]
    fn test_two_node_cycle_names_both() {
        let actions = vec![make_action("a", 0, &["b"]), make_action("b", 0, &["a"])];
        let err = resolve(&actions).unwrap_err();
        assert_eq!(err, GraphError::Cycle { ids: vec!["a".into(), "b".into()] });
    }

    #[test]
    fn test_cycle_excludes_lead_in() {
        let actions = vec![
            make_action("entry", 0, &["x"]),
            make_action("x", 0, &["y"]),
            make_action("y", 0, &["x"]),
        ];
        let err = resolve(&actions).unwrap_err();
        assert_eq!(err, GraphError::Cycle { ids: vec!["x".into(), "y".into()] });
    }

    #[test]
    fn test_self_dependency_is_cycle() {
        let err = resolve(&[make_action("a", 0, &["a"])]).unwrap_err();
        assert_eq!(err, GraphError::Cycle { ids: vec!["a".into()] });
    }

    #[test]
    fn test_unknown_dependency() {
        let err = resolve(&[make_action("b", 0, &["ghost"])]).unwrap_err();
        assert_eq!(
            err,
            GraphError::UnknownDependency { action: "b".into(), dependency: "ghost".into() }
        );
    }

    #[test]
    fn test_duplicate_action() {
        let err = resolve(&[make_action("a", 0, &[]), make_action("a", 1, &[])]).unwrap_err();
        assert_eq!(err, GraphError::DuplicateAction("a".into()));
    }

    #[test]
    fn test_empty_plan() {
        let plan = resolve(&[]).unwrap();
        assert!(plan.is_empty());
        assert!(plan.groups().is_empty());
    }

    proptest! {
        // Random DAG: action i may only depend on actions with a smaller index.
        #[test]
        fn test_every_action_grouped_once_after_its_deps(
            edges in prop::collection::vec(prop::collection::vec(any::<prop::sample::Index>(), 0..4), 1..20),
            orders in prop::collection::vec(0u32..5, 20),
        ) {
            let ids: Vec<String> = (0..edges.len()).map(|i| format!("n{}", i)).collect();
            let actions: Vec<AgentAction> = edges.iter().enumerate().map(|(i, picks)| {
                let deps: Vec<&str> = if i == 0 {
                    Vec::new()
                } else {
                    picks.iter().map(|p| ids[p.index(i)].as_str()).collect()
                };
                make_action(&ids[i], orders[i], &deps)
            }).collect();

            let plan = resolve(&actions).unwrap();

            let mut group_of = vec![usize::MAX; actions.len()];
            for (g, group) in plan.groups().iter().enumerate() {
                for &i in group {
                    prop_assert_eq!(group_of[i], usize::MAX, "action grouped twice");
                    group_of[i] = g;
                }
            }
            prop_assert!(group_of.iter().all(|&g| g != usize::MAX));

            for i in 0..actions.len() {
                for &dep in plan.dependencies(i) {
                    prop_assert!(group_of[dep] < group_of[i]);
                }
            }
        }
    }
}
