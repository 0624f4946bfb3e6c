//! Maximal reachability value iteration.
//!
//! Solves `v[s] = max_a sum_e p(e) * v[dest(e)]` for every state that is not pinned, starting from the zero
//! vector. Bellman updates from zero are monotonically non-decreasing, so a sweep that reads some neighbour
//! values already updated in the same sweep stays below the fixpoint: it only changes how fast the
//! iteration converges. This is what lets [`SweepMode::InPlace`] update states in parallel over a shared
//! vector without locking. [`SweepMode::DoubleBuffered`] reads only the previous sweep's vector and is
//! bit-exact reproducible.
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};

use rayon::prelude::*;
use tracing::trace;

use super::helper_methods::absolute_diff_sum;
use super::mdp::Transition;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SweepMode {
    DoubleBuffered,
    InPlace
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ActionRecording {
    /// Converge first, then one arg-max pass over the converged vector.
    TwoPhase,
    /// Record the arg-max in every sweep and keep the last sweep's record.
    Eager
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SolverConfig {
    /// Iteration stops once the summed absolute change of a sweep drops below this.
    pub epsilon: f64,
    pub sweep: SweepMode,
    pub recording: ActionRecording
}

impl Default for SolverConfig {
    fn default() -> Self {
        SolverConfig {
            epsilon: 0.05,
            sweep: SweepMode::DoubleBuffered,
            recording: ActionRecording::TwoPhase
        }
    }
}

/// Best action at a state and the value it achieves.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Choice {
    pub value: f64,
    pub action: usize
}

#[derive(Debug, Clone, PartialEq)]
pub struct Valuation {
    /// Converged values; pinned states hold exactly their pinned constant.
    pub values: Vec<f64>,
    /// Per state choice. Unpinned states carry their converged value, pinned states the value of one more
    /// Bellman step over `values`.
    pub choices: Vec<Choice>,
    pub sweeps: usize
}

/// One Bellman step at a state. Ties keep the lowest action index and a state whose actions are all worth
/// zero (or which has no actions) resolves to action 0 with value 0.
pub fn bellman<F: Fn(usize) -> f64>(transitions: &[Transition], value_of: F) -> Choice {
    let mut best = Choice { value: 0.0, action: 0 };
    for (i, t) in transitions.iter().enumerate() {
        let v: f64 = t.s_prime.iter().map(|x| x.p * value_of(x.s)).sum();
        if v > best.value {
            best = Choice { value: v, action: i };
        }
    }
    best
}

pub fn value_iteration(transitions: &[Vec<Transition>], fixed: &BTreeMap<usize, f64>, config: &SolverConfig) -> Valuation {
    let n = transitions.len();
    let mut values: Vec<f64> = vec![0.0; n];
    let mut touchable: Vec<bool> = vec![true; n];
    for (s, v) in fixed.iter() {
        values[*s] = *v;
        touchable[*s] = false;
    }

    let (values, recorded, sweeps) = match config.sweep {
        SweepMode::DoubleBuffered => sweep_double_buffered(transitions, &touchable, values, config),
        SweepMode::InPlace => sweep_in_place(transitions, &touchable, values, config)
    };

    let choices: Vec<Choice> = (0..n).into_par_iter()
        .map(|i| {
            if touchable[i] {
                let action = match config.recording {
                    ActionRecording::Eager => recorded[i],
                    ActionRecording::TwoPhase => bellman(&transitions[i], |s| values[s]).action
                };
                Choice { value: values[i], action }
            } else {
                bellman(&transitions[i], |s| values[s])
            }
        })
        .collect();

    Valuation {
        values,
        choices,
        sweeps
    }
}

fn sweep_double_buffered(transitions: &[Vec<Transition>], touchable: &[bool], mut values: Vec<f64>, config: &SolverConfig)
    -> (Vec<f64>, Vec<usize>, usize) {
    let mut recorded: Vec<usize> = vec![0; values.len()];
    let mut sweeps: usize = 0;
    loop {
        sweeps += 1;
        let updated: Vec<Choice> = (0..values.len()).into_par_iter()
            .map(|i| {
                if touchable[i] {
                    bellman(&transitions[i], |s| values[s])
                } else {
                    Choice { value: values[i], action: 0 }
                }
            })
            .collect();
        let next: Vec<f64> = updated.iter().map(|x| x.value).collect();
        let diff = absolute_diff_sum(&values, &next);
        values = next;
        if config.recording == ActionRecording::Eager {
            for (r, c) in recorded.iter_mut().zip(updated.iter()) {
                *r = c.action;
            }
        }
        trace!(sweeps, diff, "value iteration sweep");
        if diff < config.epsilon {
            return (values, recorded, sweeps);
        }
    }
}

fn sweep_in_place(transitions: &[Vec<Transition>], touchable: &[bool], values: Vec<f64>, config: &SolverConfig)
    -> (Vec<f64>, Vec<usize>, usize) {
    let shared: Vec<AtomicU64> = values.iter().map(|x| AtomicU64::new(x.to_bits())).collect();
    let read = |s: usize| f64::from_bits(shared[s].load(Ordering::Relaxed));
    let mut recorded: Vec<usize> = vec![0; values.len()];
    let mut sweeps: usize = 0;
    loop {
        sweeps += 1;
        let updated: Vec<(f64, usize)> = (0..shared.len()).into_par_iter()
            .map(|i| {
                if !touchable[i] {
                    return (0.0, 0);
                }
                let c = bellman(&transitions[i], read);
                let old = f64::from_bits(shared[i].swap(c.value.to_bits(), Ordering::Relaxed));
                ((c.value - old).abs(), c.action)
            })
            .collect();
        let diff: f64 = updated.iter().map(|x| x.0).sum();
        if config.recording == ActionRecording::Eager {
            for (r, (_, a)) in recorded.iter_mut().zip(updated.iter()) {
                *r = *a;
            }
        }
        trace!(sweeps, diff, "value iteration sweep (in place)");
        if diff < config.epsilon {
            let values = (0..shared.len()).map(read).collect();
            return (values, recorded, sweeps);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config(epsilon: f64) -> SolverConfig {
        SolverConfig { epsilon, ..SolverConfig::default() }
    }

    fn pinned(pairs: &[(usize, f64)]) -> BTreeMap<usize, f64> {
        pairs.iter().cloned().collect()
    }

    /// 0 --a--> {1: 0.5, 2: 0.5}, 0 --b--> {2: 1}; 1 and 2 absorbing.
    fn fork() -> Vec<Vec<Transition>> {
        vec![
            vec![Transition::new(0, &[(1, 0.5), (2, 0.5)]), Transition::new(1, &[(2, 1.0)])],
            vec![Transition::new(0, &[(1, 1.0)])],
            vec![Transition::new(0, &[(2, 1.0)])],
        ]
    }

    #[test]
    fn pinned_values_are_reported_exactly() {
        let v = value_iteration(&fork(), &pinned(&[(1, 0.3), (2, 0.7)]), &config(1e-9));
        assert_eq!(v.values[1], 0.3);
        assert_eq!(v.values[2], 0.7);
        assert_eq!(v.values[0], 0.7);
        assert_eq!(v.choices[0], Choice { value: 0.7, action: 1 });
    }

    #[test]
    fn pinned_choice_is_one_more_step() {
        // goal 1 loops on itself, goal 2 can only fall into the zero sink 3
        let transitions = vec![
            vec![Transition::new(0, &[(1, 1.0)])],
            vec![Transition::new(0, &[(1, 1.0)])],
            vec![Transition::new(0, &[(3, 1.0)])],
            vec![Transition::new(0, &[(3, 1.0)])],
        ];
        let v = value_iteration(&transitions, &pinned(&[(1, 1.0), (2, 1.0)]), &config(1e-9));
        assert_eq!(v.values[2], 1.0);
        assert_eq!(v.choices[1].value, 1.0);
        assert_eq!(v.choices[2].value, 0.0);
        assert_eq!(v.choices[3], Choice { value: 0.0, action: 0 });
    }

    #[test]
    fn max_over_actions_and_ties() {
        let v = value_iteration(&fork(), &pinned(&[(1, 1.0)]), &config(1e-9));
        assert_eq!(v.choices[0], Choice { value: 0.5, action: 0 });

        let twins = vec![
            vec![Transition::new(0, &[(1, 1.0)]), Transition::new(1, &[(1, 1.0)])],
            vec![],
        ];
        let v = value_iteration(&twins, &pinned(&[(1, 1.0)]), &config(1e-9));
        assert_eq!(v.choices[0].action, 0);
    }

    #[test]
    fn states_without_actions_are_worth_zero() {
        let transitions = vec![vec![], vec![Transition::new(0, &[(0, 1.0)])]];
        let v = value_iteration(&transitions, &BTreeMap::new(), &config(1e-9));
        assert_eq!(v.values, vec![0.0, 0.0]);
        assert_eq!(v.choices[0], Choice { value: 0.0, action: 0 });
    }

    #[test]
    fn geometric_retry_converges_in_both_sweep_modes() {
        // 0 reaches the goal 1 with 0.5 per attempt and retries otherwise
        let transitions = vec![
            vec![Transition::new(0, &[(1, 0.5), (0, 0.5)])],
            vec![Transition::new(0, &[(1, 1.0)])],
        ];
        for sweep in [SweepMode::DoubleBuffered, SweepMode::InPlace].iter() {
            let c = SolverConfig { epsilon: 1e-9, sweep: *sweep, recording: ActionRecording::TwoPhase };
            let v = value_iteration(&transitions, &pinned(&[(1, 1.0)]), &c);
            assert!(v.values[0] > 1.0 - 1e-8 && v.values[0] <= 1.0, "{:?}: {}", sweep, v.values[0]);
            assert!(v.sweeps > 1);
        }
    }

    #[test]
    fn coarse_epsilon_stops_early_below_the_fixpoint() {
        let transitions = vec![
            vec![Transition::new(0, &[(1, 0.1), (0, 0.9)])],
            vec![Transition::new(0, &[(1, 1.0)])],
        ];
        let coarse = value_iteration(&transitions, &pinned(&[(1, 1.0)]), &config(0.05));
        let fine = value_iteration(&transitions, &pinned(&[(1, 1.0)]), &config(1e-12));
        assert!(coarse.sweeps < fine.sweeps);
        assert!(coarse.values[0] <= fine.values[0]);
        assert!(fine.values[0] <= 1.0);
    }

    #[test]
    fn eager_recording_agrees_with_two_phase() {
        let eager = SolverConfig { recording: ActionRecording::Eager, ..config(1e-9) };
        let a = value_iteration(&fork(), &pinned(&[(2, 1.0)]), &config(1e-9));
        let b = value_iteration(&fork(), &pinned(&[(2, 1.0)]), &eager);
        assert_eq!(a.values, b.values);
        assert_eq!(a.choices, b.choices);
        assert_eq!(b.choices[0].action, 1);
    }

    #[test]
    fn everything_pinned_needs_a_single_sweep() {
        let v = value_iteration(&fork(), &pinned(&[(0, 0.0), (1, 1.0), (2, 0.0)]), &config(0.05));
        assert_eq!(v.sweeps, 1);
        assert_eq!(v.choices[0], Choice { value: 0.5, action: 0 });
    }
}
