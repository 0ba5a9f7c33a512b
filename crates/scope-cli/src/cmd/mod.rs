pub mod actions;
pub mod config;
pub mod run;
pub mod serve;
