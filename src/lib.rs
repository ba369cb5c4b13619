//! Labforge — orchestration runtime for AI-assisted networking labs.
//!
//! Instructors submit a natural-language prompt; the runtime drives each
//! lab through a Planner -> Designer -> Author -> Validator pipeline,
//! holds an interactive clarification dialog with the Planner, validates
//! the drafted lab in an external headless runner, and retries
//! intelligently via root-cause analysis on failure. State lives in an
//! in-memory registry and is exposed over a polling HTTP API.

pub mod api;
pub mod clients;
pub mod config;
pub mod logging;
pub mod pipeline;
pub mod registry;
pub mod types;
