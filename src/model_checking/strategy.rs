//! Finite-memory strategies and their extraction from value-iteration results.
use std::collections::{BTreeMap, BTreeSet, VecDeque};
use std::collections::btree_map::Entry;
use std::io::{self, Write};

use tracing::debug;

use super::color_product::AnalysisGraph;
use super::mdp::{ParityMDP, Transition};
use super::value_iteration::Valuation;
use crate::error::SynthesisError;

/// Memory value meaning "goal just satisfied".
pub const RESET_MEMORY: u32 = 0;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct StrategyKey {
    pub s: usize,
    pub memory: u32
}

/// `action` indexes the parity MDP transitions of the keyed state, `next` maps each successor of that
/// transition to the memory value taken on moving there.
#[derive(Debug, Clone, PartialEq)]
pub struct StrategyChoice {
    pub action: usize,
    pub next: BTreeMap<usize, u32>
}

pub type Strategy = BTreeMap<StrategyKey, StrategyChoice>;

/// Accumulates a strategy over every colour pass of one solve. Keys are written at most once and memory
/// generations are never reused.
#[derive(Debug, Clone, PartialEq)]
pub struct StrategyExtractor {
    strategy: Strategy,
    memory_used: u32,
    quality: f64
}

impl Default for StrategyExtractor {
    fn default() -> Self {
        StrategyExtractor::new()
    }
}

impl StrategyExtractor {
    pub fn new() -> StrategyExtractor {
        StrategyExtractor {
            strategy: BTreeMap::new(),
            memory_used: 0,
            quality: 1.0
        }
    }

    pub fn strategy(&self) -> &Strategy {
        &self.strategy
    }

    /// Minimum converged value over all committed chase entries (1 if none).
    pub fn quality(&self) -> f64 {
        self.quality
    }

    /// Runs the non-violation chase from `goals` and then the backup chase over the violated copy. Returns
    /// the number of entries committed.
    pub fn extend(&mut self, graph: &AnalysisGraph, valuation: &Valuation, goals: &BTreeSet<usize>,
                  winning: &BTreeSet<usize>) -> Result<usize, SynthesisError> {
        let n = graph.n;
        let direct = self.memory_used + 1;
        let backup = self.memory_used + 2;
        self.memory_used += 2;
        let is_target = |s: usize| goals.contains(&s) || winning.contains(&s);

        let mut queue: VecDeque<(usize, u32)> = VecDeque::new();
        let mut backup_queue: VecDeque<usize> = VecDeque::new();
        let mut visited: Vec<bool> = vec![false; graph.num_states()];
        for g in goals.iter() {
            if !self.strategy.contains_key(&StrategyKey { s: *g, memory: RESET_MEMORY }) {
                queue.push_back((*g, RESET_MEMORY));
                visited[*g] = true;
            }
        }

        let mut committed: usize = 0;
        while let Some((s, memory)) = queue.pop_front() {
            let choice = valuation.choices[s];
            if choice.value == 0.0 {
                continue;
            }
            let transition = chosen_transition(&graph.transitions, s, choice.action)?;
            let mut next: BTreeMap<usize, u32> = BTreeMap::new();
            for sprime in transition.s_prime.iter() {
                let d = sprime.s;
                if !graph.is_violated(d) && is_target(d) {
                    next.insert(d, RESET_MEMORY);
                } else if graph.is_violated(d) {
                    next.insert(graph.fold(d), backup);
                    if !visited[d] {
                        visited[d] = true;
                        backup_queue.push_back(d);
                    }
                } else {
                    next.insert(d, direct);
                    if !visited[d] {
                        visited[d] = true;
                        queue.push_back((d, direct));
                    }
                }
            }
            if self.commit(StrategyKey { s, memory }, StrategyChoice { action: choice.action, next }, choice.value) {
                committed += 1;
            }
        }

        while let Some(v) = backup_queue.pop_front() {
            let choice = valuation.choices[v];
            if choice.value == 0.0 {
                continue;
            }
            let transition = chosen_transition(&graph.transitions, v, choice.action)?;
            let mut next: BTreeMap<usize, u32> = BTreeMap::new();
            for sprime in transition.s_prime.iter() {
                let d = sprime.s;
                let folded = graph.fold(d);
                if is_target(folded) {
                    next.insert(folded, RESET_MEMORY);
                } else if graph.is_violated(d) {
                    next.insert(folded, backup);
                    if !visited[d] {
                        visited[d] = true;
                        backup_queue.push_back(d);
                    }
                } else {
                    return Err(SynthesisError::BackupEscaped { from: v, to: d, min_goal_color: graph.min_goal_color });
                }
            }
            let key = StrategyKey { s: graph.fold(v), memory: backup };
            if self.commit(key, StrategyChoice { action: choice.action, next }, choice.value) {
                committed += 1;
            }
        }
        debug!(min_goal_color = graph.min_goal_color, direct, backup, committed, "strategy extension");
        Ok(committed)
    }

    /// Gives every state with a positive value and no memory-0 entry yet a memory-0 entry following its
    /// chosen action, with all updates back to memory 0. Returns the number of entries added.
    pub fn fill_fallback(&mut self, transitions: &[Vec<Transition>], valuation: &Valuation) -> Result<usize, SynthesisError> {
        let mut added: usize = 0;
        for (s, choice) in valuation.choices.iter().enumerate() {
            if choice.value <= 0.0 {
                continue;
            }
            let key = StrategyKey { s, memory: RESET_MEMORY };
            if self.strategy.contains_key(&key) {
                continue;
            }
            let transition = chosen_transition(transitions, s, choice.action)?;
            let next = transition.s_prime.iter().map(|x| (x.s, RESET_MEMORY)).collect();
            self.strategy.insert(key, StrategyChoice { action: choice.action, next });
            added += 1;
        }
        Ok(added)
    }

    pub fn into_strategy(self) -> (Strategy, f64) {
        (self.strategy, self.quality)
    }

    fn commit(&mut self, key: StrategyKey, choice: StrategyChoice, value: f64) -> bool {
        match self.strategy.entry(key) {
            Entry::Occupied(_) => false,
            Entry::Vacant(e) => {
                e.insert(choice);
                self.quality = self.quality.min(value);
                true
            }
        }
    }
}

fn chosen_transition(transitions: &[Vec<Transition>], s: usize, action: usize) -> Result<&Transition, SynthesisError> {
    transitions[s].get(action).ok_or(SynthesisError::ActionOutOfRange {
        state: s,
        action,
        available: transitions[s].len()
    })
}

/// Writes the entry count, then per entry `<state> <memory> <base state> <action>` followed by one
/// `-> <base dest> <dest> <next memory>` line per successor.
pub fn print_policy<W: Write>(pmdp: &ParityMDP, strategy: &Strategy, mut out: W) -> io::Result<()> {
    writeln!(out, "{}", strategy.len())?;
    for (key, choice) in strategy.iter() {
        let action = pmdp.action_name(key.s, choice.action).unwrap_or("?");
        writeln!(out, "{} {} {} {}", key.s, key.memory, pmdp.base[key.s], action)?;
        for (d, m) in choice.next.iter() {
            writeln!(out, "-> {} {} {}", pmdp.base[*d], d, m)?;
        }
    }
    Ok(())
}
