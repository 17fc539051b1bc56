pub mod config;
pub mod journeys;
pub mod run;
pub mod scenes;
