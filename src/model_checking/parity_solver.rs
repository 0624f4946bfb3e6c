//! Nested fixpoint reducing a parity objective to repeated reachability on colour-doubled graphs.
use std::collections::{BTreeMap, BTreeSet};

use itertools::Itertools;
use tracing::{debug, info};

use super::color_product::{double_by_color, AnalysisGraph};
use super::mdp::ParityMDP;
use super::strategy::{Strategy, StrategyExtractor};
use super::value_iteration::{value_iteration, SolverConfig, Valuation};
use crate::error::SynthesisError;

#[derive(Debug, Clone, PartialEq)]
pub struct Synthesis {
    pub strategy: Strategy,
    pub quality: f64,
    /// Outer passes run until the winning set stopped growing.
    pub switchbacks: usize,
    pub winning: BTreeSet<usize>
}

/// Result of one probe at a threshold. Infeasibility is an expected answer, not an error.
#[derive(Debug, Clone, PartialEq)]
pub enum ProbeOutcome {
    Feasible(Synthesis),
    Infeasible { quality: f64 }
}

impl ProbeOutcome {
    pub fn quality(&self) -> f64 {
        match self {
            ProbeOutcome::Feasible(x) => x.quality,
            ProbeOutcome::Infeasible { quality } => *quality
        }
    }

    pub fn is_feasible(&self) -> bool {
        matches!(self, ProbeOutcome::Feasible(_))
    }
}

impl ParityMDP {
    /// Synthesises a finite-memory strategy satisfying the parity objective with probability at least
    /// `ra_level`, if the fixpoint finds one.
    pub fn compute_ra_policy(&self, ra_level: f64, config: &SolverConfig) -> Result<ProbeOutcome, SynthesisError> {
        let mut winning: BTreeSet<usize> = BTreeSet::new();
        let mut extractor = StrategyExtractor::new();
        let mut switchbacks: usize = 0;
        loop {
            switchbacks += 1;
            let before = winning.len();
            let mut min_goal_color = self.top_goal_color() as i64;
            while min_goal_color >= 0 {
                let mgc = min_goal_color as u32;
                let graph = double_by_color(self, mgc);
                let (goals, valuation) = self.goal_fixpoint(&graph, &winning, ra_level, config);
                debug!(
                    min_goal_color = mgc,
                    goals = ?goals,
                    "value iteration results: {}",
                    valuation.choices[..self.num_states()].iter().map(|x| format!("{:.4}", x.value)).join(" ")
                );
                extractor.extend(&graph, &valuation, &goals, &winning)?;
                winning.extend(goals.into_iter());
                min_goal_color -= 2;
            }
            debug!(switchbacks, winning = winning.len(), "outer pass");
            if winning.len() == before {
                break;
            }
        }

        let fixed: BTreeMap<usize, f64> = winning.iter().map(|s| (*s, 1.0)).collect();
        let fallback = value_iteration(&self.transitions, &fixed, config);
        let added = extractor.fill_fallback(&self.transitions, &fallback)?;
        let initial_value = fallback.choices.get(ParityMDP::INITIAL).map(|x| x.value).unwrap_or(0.0);
        let (strategy, chase_quality) = extractor.into_strategy();
        let quality = chase_quality.min(initial_value);
        debug!(added, initial_value, chase_quality, "fallback pass");
        info!(ra_level, quality, entries = strategy.len(), "quality computed");

        if strategy.is_empty() || quality < ra_level {
            return Ok(ProbeOutcome::Infeasible { quality });
        }
        Ok(ProbeOutcome::Feasible(Synthesis {
            strategy,
            quality,
            switchbacks,
            winning
        }))
    }

    /// Shrinks the goal candidates for one colour threshold until every remaining goal reaches the goal set
    /// (or the winning set) with probability at least `ra_level` without crossing a violating colour.
    fn goal_fixpoint(&self, graph: &AnalysisGraph, winning: &BTreeSet<usize>, ra_level: f64, config: &SolverConfig)
        -> (BTreeSet<usize>, Valuation) {
        let mgc = graph.min_goal_color;
        let mut goals: BTreeSet<usize> = (0..self.num_states()).filter(|s| self.is_goal_color(*s, mgc)).collect();
        loop {
            let fixed = self.pinned_values(graph, &goals, winning);
            let valuation = value_iteration(&graph.transitions, &fixed, config);
            let before = goals.len();
            goals.retain(|s| valuation.choices[*s].value >= ra_level);
            if goals.len() == before {
                return (goals, valuation);
            }
        }
    }

    fn pinned_values(&self, graph: &AnalysisGraph, goals: &BTreeSet<usize>, winning: &BTreeSet<usize>) -> BTreeMap<usize, f64> {
        let mut fixed: BTreeMap<usize, f64> = (0..self.num_states())
            .filter(|s| self.is_violating_color(*s, graph.min_goal_color))
            .map(|s| (s, 0.0))
            .collect();
        // a goal only counts when reached without crossing a violating colour
        for s in goals.iter() {
            fixed.insert(*s, 1.0);
        }
        for s in winning.iter() {
            fixed.insert(*s, 1.0);
            fixed.insert(graph.violated(*s), 1.0);
        }
        fixed
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model_checking::mdp::{Transition, MDP};
    use crate::model_checking::strategy::StrategyKey;

    fn config() -> SolverConfig {
        SolverConfig::default()
    }

    fn base(n: usize) -> MDP {
        MDP::new(vec!["a".to_string(), "b".to_string()], vec![vec![]; n], Some(0))
    }

    /// State 0 (colour 0) loops on itself; state 1 is unreachable.
    fn self_loop() -> ParityMDP {
        ParityMDP::new(&base(2), &[(0, 0), (1, 1)], vec![
            vec![Transition::new(0, &[(0, 1.0)])],
            vec![Transition::new(0, &[(1, 1.0)])],
        ], None)
    }

    /// State 0 splits 50/50 between an absorbing colour-0 state and an absorbing colour-1 state.
    fn coin() -> ParityMDP {
        ParityMDP::new(&base(3), &[(0, 0), (1, 0), (2, 1)], vec![
            vec![Transition::new(0, &[(1, 0.5), (2, 0.5)])],
            vec![Transition::new(0, &[(1, 1.0)])],
            vec![Transition::new(0, &[(2, 1.0)])],
        ], None)
    }

    fn feasible(outcome: ProbeOutcome) -> Synthesis {
        match outcome {
            ProbeOutcome::Feasible(x) => x,
            other => panic!("expected a strategy, got {:?}", other)
        }
    }

    #[test]
    fn self_loop_is_won_surely() {
        let synthesis = feasible(self_loop().compute_ra_policy(0.5, &config()).unwrap());
        assert_eq!(synthesis.quality, 1.0);
        assert!(synthesis.strategy.contains_key(&StrategyKey { s: 0, memory: 0 }));
        assert!(synthesis.winning.contains(&0));
    }

    #[test]
    fn coin_reaches_half() {
        let pmdp = coin();
        let outcome = pmdp.compute_ra_policy(0.6, &config()).unwrap();
        assert!(!outcome.is_feasible());
        let synthesis = feasible(pmdp.compute_ra_policy(0.4, &config()).unwrap());
        assert!(synthesis.quality >= 0.5);
        let root = &synthesis.strategy[&StrategyKey { s: 0, memory: 0 }];
        assert_eq!(root.action, 0);
        assert_eq!(root.next.get(&1), Some(&0));
        // colour 2 reserved memories 1 and 2, so colour 0 tracks the violating branch in backup memory 4
        assert_eq!(root.next.get(&2), Some(&4));
    }

    #[test]
    fn odd_colour_above_threshold_must_be_avoided() {
        // 0 (c2) chooses between the trap 1 (c3) and a loop back through 2 (c0)
        let pmdp = ParityMDP::new(&base(3), &[(0, 2), (1, 3), (2, 0)], vec![
            vec![Transition::new(0, &[(1, 1.0)]), Transition::new(1, &[(2, 1.0)])],
            vec![Transition::new(0, &[(1, 1.0)])],
            vec![Transition::new(0, &[(0, 1.0)])],
        ], None);
        let synthesis = feasible(pmdp.compute_ra_policy(0.9, &config()).unwrap());
        assert_eq!(synthesis.quality, 1.0);
        assert_eq!(synthesis.strategy[&StrategyKey { s: 0, memory: 0 }].action, 1);
        assert_eq!(synthesis.winning, vec![0, 2].into_iter().collect::<BTreeSet<usize>>());
        assert!(synthesis.strategy.keys().all(|k| k.s != 1));
    }

    #[test]
    fn losing_model_is_infeasible() {
        // the only cycle carries the highest, odd colour
        let pmdp = ParityMDP::new(&base(2), &[(0, 0), (1, 1)], vec![
            vec![Transition::new(0, &[(1, 1.0)])],
            vec![Transition::new(0, &[(1, 1.0)])],
        ], None);
        match pmdp.compute_ra_policy(0.1, &config()).unwrap() {
            ProbeOutcome::Infeasible { quality } => assert_eq!(quality, 0.0),
            other => panic!("unexpected {:?}", other)
        }
    }

    #[test]
    fn goal_revisited_only_through_a_higher_odd_colour_is_lost() {
        // 0 (c2) <-> 1 (c3): the colour seen infinitely often at its highest is 3
        let pmdp = ParityMDP::new(&base(2), &[(0, 2), (1, 3)], vec![
            vec![Transition::new(0, &[(1, 1.0)])],
            vec![Transition::new(0, &[(0, 1.0)])],
        ], None);
        for ra_level in [0.1, 0.5, 1.0].iter() {
            match pmdp.compute_ra_policy(*ra_level, &config()).unwrap() {
                ProbeOutcome::Infeasible { quality } => assert_eq!(quality, 0.0),
                other => panic!("{} gave {:?}", ra_level, other)
            }
        }
    }

    #[test]
    fn even_loop_is_preferred_over_an_odd_cycle() {
        // 0 (c2) either enters the 0 <-> 1 (c3) cycle or moves to the colour 2 self loop at 2
        let pmdp = ParityMDP::new(&base(3), &[(0, 2), (1, 3), (2, 2)], vec![
            vec![Transition::new(0, &[(1, 1.0)]), Transition::new(1, &[(2, 1.0)])],
            vec![Transition::new(0, &[(0, 1.0)])],
            vec![Transition::new(0, &[(2, 1.0)])],
        ], None);
        let synthesis = feasible(pmdp.compute_ra_policy(0.9, &config()).unwrap());
        assert_eq!(synthesis.quality, 1.0);
        assert_eq!(synthesis.strategy[&StrategyKey { s: 0, memory: 0 }].action, 1);
        assert_eq!(synthesis.strategy[&StrategyKey { s: 2, memory: 0 }].next.get(&2), Some(&0));
    }

    #[test]
    fn switchbacks_are_bounded_and_runs_are_deterministic() {
        let pmdp = coin();
        let a = feasible(pmdp.compute_ra_policy(0.4, &config()).unwrap());
        let b = feasible(pmdp.compute_ra_policy(0.4, &config()).unwrap());
        assert!(a.switchbacks <= pmdp.num_states() + 1);
        assert_eq!(a, b);
    }
}
