use petgraph::{Graph, graph::NodeIndex};

/// Tolerance allowed when checking that a transition's edge probabilities form a distribution.
pub const DISTRIBUTION_TOLERANCE: f64 = 1e-6;

/// A successor of a transition: destination state `s` reached with probability `p`
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TransitionPair {
    pub s: usize,
    pub p: f64
}

/// One action available at a state. `a` indexes the owning model's `actions`.
#[derive(Debug, Clone, PartialEq)]
pub struct Transition {
    pub a: usize,
    pub s_prime: Vec<TransitionPair>
}

impl Transition {
    pub fn new(a: usize, s_prime: &[(usize, f64)]) -> Transition {
        Transition {
            a,
            s_prime: s_prime.iter().map(|(s, p)| TransitionPair { s: *s, p: *p }).collect()
        }
    }
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct MDPState {
    pub label: Vec<String>
}

impl MDPState {
    pub fn describe(&self) -> String {
        format!("({})", self.label.join(","))
    }
}

/// Base MDP. States are dense ids `0..states.len()`, `transitions[s]` lists the actions available at `s`.
/// A state without transitions is absorbing.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct MDP {
    pub actions: Vec<String>,
    pub states: Vec<MDPState>,
    pub transitions: Vec<Vec<Transition>>,
    pub initial: Option<usize>
}

impl MDP {
    /// Builds a model whose state labels are just the state ids.
    pub fn new(actions: Vec<String>, transitions: Vec<Vec<Transition>>, initial: Option<usize>) -> MDP {
        let states = (0..transitions.len())
            .map(|i| MDPState { label: vec![i.to_string()] })
            .collect();
        MDP {
            actions,
            states,
            transitions,
            initial
        }
    }
}

/// MDP with a colour per state. `base[s]` maps a (possibly product-expanded) state back to the base MDP
/// and is only used for reporting. The initial state is always 0.
#[derive(Debug, Clone, PartialEq)]
pub struct ParityMDP {
    pub actions: Vec<String>,
    pub states: Vec<MDPState>,
    pub transitions: Vec<Vec<Transition>>,
    pub colors: Vec<u32>,
    pub base: Vec<usize>,
    pub nof_colors: u32
}

impl ParityMDP {
    pub const INITIAL: usize = 0;

    /// `states[i]` is the `(base state, colour)` pair of parity state `i`. When `nof_colors` is not
    /// given it is one more than the largest colour in use.
    pub fn new(base_mdp: &MDP, states: &[(usize, u32)], transitions: Vec<Vec<Transition>>, nof_colors: Option<u32>) -> ParityMDP {
        let nof_colors = nof_colors
            .unwrap_or_else(|| states.iter().map(|(_, c)| *c + 1).max().unwrap_or(0));
        let labels = states.iter()
            .map(|(b, c)| {
                let mut label = base_mdp.states.get(*b).map(|x| x.label.clone()).unwrap_or_default();
                label.push(format!("c{}", c));
                MDPState { label }
            })
            .collect();
        ParityMDP {
            actions: base_mdp.actions.clone(),
            states: labels,
            transitions,
            colors: states.iter().map(|(_, c)| *c).collect(),
            base: states.iter().map(|(b, _)| *b).collect(),
            nof_colors
        }
    }

    pub fn num_states(&self) -> usize {
        self.states.len()
    }

    /// Even colour at or above `min_goal_color`: a goal candidate for that threshold.
    pub fn is_goal_color(&self, s: usize, min_goal_color: u32) -> bool {
        let c = self.colors[s];
        c & 1 == 0 && c >= min_goal_color
    }

    /// Odd colour strictly above `min_goal_color`: visiting it disqualifies the run for that threshold.
    pub fn is_violating_color(&self, s: usize, min_goal_color: u32) -> bool {
        let c = self.colors[s];
        c & 1 == 1 && c > min_goal_color
    }

    /// Highest even colour threshold the fixpoint starts from.
    pub fn top_goal_color(&self) -> u32 {
        self.nof_colors & !1
    }

    /// Name of the base action taken by transition `t` of state `s`.
    pub fn action_name(&self, s: usize, t: usize) -> Option<&str> {
        self.transitions.get(s)
            .and_then(|x| x.get(t))
            .and_then(|x| self.actions.get(x.a))
            .map(|x| x.as_str())
    }

    pub fn generate_graph(&self) -> Graph<String, String> {
        let mut graph: Graph<String, String> = Graph::new();
        let nodes: Vec<NodeIndex> = (0..self.num_states())
            .map(|i| graph.add_node(format!("{}:({},{})", i, self.base[i], self.colors[i])))
            .collect();
        for (i, transitions) in self.transitions.iter().enumerate() {
            for transition in transitions.iter() {
                let action = self.actions.get(transition.a).map(|x| x.as_str()).unwrap_or("?");
                for sprime in transition.s_prime.iter() {
                    graph.add_edge(nodes[i], nodes[sprime.s], format!("{}:{}", action, sprime.p));
                }
            }
        }
        graph
    }
}

/// Checks that every transition is a probability distribution over existing states. On failure returns
/// the offending state together with a description.
pub fn check_distributions(transitions: &[Vec<Transition>], num_actions: usize) -> Result<(), (usize, String)> {
    let n = transitions.len();
    for (s, ts) in transitions.iter().enumerate() {
        for t in ts.iter() {
            if t.a >= num_actions {
                return Err((s, format!("unknown action index {}", t.a)));
            }
            if t.s_prime.is_empty() {
                return Err((s, format!("action {} has no successors", t.a)));
            }
            let mut total = 0.0;
            for sprime in t.s_prime.iter() {
                if sprime.s >= n {
                    return Err((s, format!("successor {} out of range ({} states)", sprime.s, n)));
                }
                if !(sprime.p > 0.0 && sprime.p <= 1.0 + DISTRIBUTION_TOLERANCE) {
                    return Err((s, format!("probability {} to {} out of range", sprime.p, sprime.s)));
                }
                total += sprime.p;
            }
            if (total - 1.0).abs() > DISTRIBUTION_TOLERANCE {
                return Err((s, format!("probabilities of action {} sum to {}", t.a, total)));
            }
        }
    }
    Ok(())
}

/// Rescales every transition so its probabilities sum to exactly one. Call after `check_distributions`.
pub fn normalize_distributions(transitions: &mut [Vec<Transition>]) {
    for t in transitions.iter_mut().flat_map(|x| x.iter_mut()) {
        let total: f64 = t.s_prime.iter().map(|x| x.p).sum();
        if total > 0.0 {
            for sprime in t.s_prime.iter_mut() {
                sprime.p /= total;
            }
        }
    }
}
