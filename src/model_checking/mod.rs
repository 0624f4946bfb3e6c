pub mod mdp;
pub mod helper_methods;
pub mod value_iteration;
pub mod color_product;
pub mod strategy;
pub mod parity_solver;
pub mod search;
pub mod simulate;
