//! Plan compiler, instruction interpreter and checkpointed agent loop.
//!
//! A plan of numbered tasks is compiled, one generation call per task, into
//! instruction documents that the [`vm`] executes against a closed set of
//! [`actions`]. The interactive [`looping`] mode instead asks the generator for
//! one action at a time and checkpoints after every step.
//!
//! - **[`core`]**: pure logic (plan invariants, variables, response parsing).
//! - **[`io`]**: processes, collaborators, prompts and persistence.
//!
//! [`compiler`], [`vm`], [`looping`], [`session`] and [`validate`] coordinate
//! the two to implement CLI commands.

pub mod actions;
pub mod compiler;
pub mod core;
pub mod error;
pub mod exit_codes;
pub mod io;
pub mod logging;
pub mod looping;
pub mod plan;
pub mod session;
#[cfg(any(test, feature = "test-support"))]
pub mod test_support;
pub mod validate;
pub mod vm;
