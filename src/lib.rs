//! Risk-aware strategy synthesis for MDPs with parity objectives.
//!
//! A [`ParityMDP`] is solved by [`ParityMDP::compute_ra_policy`] for one probability threshold, and
//! [`search`] looks for the best threshold over repeated probes.
pub mod error;
pub mod model_checking;

pub use error::{RampsError, Result, SynthesisError};
pub use model_checking::helper_methods::read_input;
pub use model_checking::mdp::{MDPState, ParityMDP, Transition, TransitionPair, MDP};
pub use model_checking::parity_solver::{ProbeOutcome, Synthesis};
pub use model_checking::search::{search, SearchConfig, SearchOutcome, SearchSegment};
pub use model_checking::strategy::{print_policy, Strategy, StrategyChoice, StrategyKey};
pub use model_checking::value_iteration::{ActionRecording, SolverConfig, SweepMode};
