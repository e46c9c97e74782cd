//! DDA (Delay Differential Analysis) orchestration (spec §4.G): invokes an
//! opaque external binary with a fixed argv, retries on known crash
//! signatures, and parses its Q-matrix output. Grounded on the sibling
//! `dda-rs` package's `DDARunner` (tokio::process::Command, sh-wrapped
//! invocation on Unix, temp output file, async `.output()`), simplified to
//! the single fixed-parameter invocation spec.md actually specifies — no
//! variant fan-out, no ASCII input path, no CT/CD pair handling.

pub mod parser;
pub mod runner;
pub mod types;

pub use runner::DdaRunner;
pub use types::{DDAInvocation, DDAResult, DdaErrorKind};
