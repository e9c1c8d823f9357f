pub mod signal;
pub mod state;
pub mod tick;
