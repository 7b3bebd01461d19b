//! Local command pipelines.
//!
//! This module runs shell-like command lines without a shell:
//! - Quote-aware splitting on `|`, `<` and `>`
//! - One subprocess per stage, each stage fed from the previous one
//! - Output fanned out to caller sinks, redirect files and a capture buffer
//!
//! # Example
//!
//! ```no_run
//! use shell_courier::execution::{eval, IoConfig};
//!
//! # async fn demo() -> shell_courier::Result<()> {
//! let out = eval("echo hello | tr a-z A-Z", IoConfig::new()).await?;
//! assert_eq!(out, "HELLO\n");
//! # Ok(())
//! # }
//! ```

mod executor;
mod io;
mod split;
mod stage;

pub use executor::{command, eval, sudo_command, PipelineExecutor};
pub use io::IoConfig;
pub use split::{shell_quote, split, split_words, Operator, PipelineToken};
pub use stage::{parse_pipeline, PipelineStage};
