use super::mdp::{ParityMDP, Transition, TransitionPair};

/// Parity MDP doubled for one `min_goal_color`. States `0..n` are the direct copy, `n..2n` the violated copy.
/// Once a run enters the violated copy it never leaves it.
#[derive(Debug, Clone, PartialEq)]
pub struct AnalysisGraph {
    pub n: usize,
    pub min_goal_color: u32,
    pub transitions: Vec<Vec<Transition>>
}

impl AnalysisGraph {
    pub fn num_states(&self) -> usize {
        self.transitions.len()
    }

    pub fn is_violated(&self, s: usize) -> bool {
        s >= self.n
    }

    /// Maps a state of either copy back to its parity MDP id.
    pub fn fold(&self, s: usize) -> usize {
        s % self.n
    }

    pub fn violated(&self, s: usize) -> usize {
        s + self.n
    }
}

/// Builds the analysis graph for `min_goal_color`. In the direct copy an edge into a state with an odd colour
/// above the threshold is retargeted into the violated copy; in the violated copy every edge is.
pub fn double_by_color(pmdp: &ParityMDP, min_goal_color: u32) -> AnalysisGraph {
    let n = pmdp.num_states();
    let mut transitions: Vec<Vec<Transition>> = Vec::with_capacity(2 * n);
    for ts in pmdp.transitions.iter() {
        transitions.push(ts.iter()
            .map(|t| retarget(t, |d| if pmdp.is_violating_color(d, min_goal_color) { d + n } else { d }))
            .collect());
    }
    for ts in pmdp.transitions.iter() {
        transitions.push(ts.iter().map(|t| retarget(t, |d| d + n)).collect());
    }
    AnalysisGraph {
        n,
        min_goal_color,
        transitions
    }
}

fn retarget<F: Fn(usize) -> usize>(t: &Transition, f: F) -> Transition {
    Transition {
        a: t.a,
        s_prime: t.s_prime.iter().map(|x| TransitionPair { s: f(x.s), p: x.p }).collect()
    }
}
