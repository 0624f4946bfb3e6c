//! Runs a synthesised strategy on its parity MDP.
use rand::Rng;

use super::mdp::{ParityMDP, TransitionPair};
use super::strategy::{Strategy, StrategyKey, RESET_MEMORY};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SimulationStep {
    pub s: usize,
    pub memory: u32,
    pub action: usize
}

pub struct Simulator<'a> {
    pmdp: &'a ParityMDP,
    strategy: &'a Strategy
}

impl<'a> Simulator<'a> {
    pub fn new(pmdp: &'a ParityMDP, strategy: &'a Strategy) -> Simulator<'a> {
        Simulator { pmdp, strategy }
    }

    /// Plays at most `steps` moves from the initial state with memory 0. The run ends early when the strategy
    /// has no entry for the current state and memory.
    pub fn run<R: Rng>(&self, steps: usize, rng: &mut R) -> Vec<SimulationStep> {
        let mut trace: Vec<SimulationStep> = Vec::with_capacity(steps);
        let mut s = ParityMDP::INITIAL;
        let mut memory = RESET_MEMORY;
        for _ in 0..steps {
            let choice = match self.strategy.get(&StrategyKey { s, memory }) {
                Some(x) => x,
                None => break
            };
            let transition = match self.pmdp.transitions.get(s).and_then(|x| x.get(choice.action)) {
                Some(x) => x,
                None => break
            };
            trace.push(SimulationStep { s, memory, action: choice.action });
            let next = sample(&transition.s_prime, rng.gen::<f64>());
            memory = choice.next.get(&next).copied().unwrap_or(RESET_MEMORY);
            s = next;
        }
        trace
    }
}

/// Picks the successor whose cumulative probability first exceeds `u`; the last edge absorbs rounding.
fn sample(s_prime: &[TransitionPair], u: f64) -> usize {
    let mut acc = 0.0;
    for sprime in s_prime.iter() {
        acc += sprime.p;
        if u < acc {
            return sprime.s;
        }
    }
    s_prime.last().map(|x| x.s).unwrap_or(ParityMDP::INITIAL)
}
