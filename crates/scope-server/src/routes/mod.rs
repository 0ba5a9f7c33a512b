pub mod actions;
pub mod assignations;
pub mod events;
pub mod state;
pub mod status;
