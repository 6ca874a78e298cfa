//! # Flowlock
//!
//! A compiler for agentic workflows: markdown documents whose YAML preamble
//! configures an AI-driven CI job and whose body is the prompt.
//!
//! Flowlock consumes a workflow source, resolves its import graph, validates
//! the configuration against a schema, builds a typed internal model, and
//! deterministically emits an executable GitHub Actions lock file together
//! with per-engine MCP server configurations and safe-output handler jobs.
//!
//! ## Pipeline
//!
//! A compile moves through fixed phases, each accumulating diagnostics:
//!
//! 1. [`loader`] reads the source and recursively resolves local and remote
//!    imports, rejecting cycles.
//! 2. [`flowlock_frontmatter`] splits preamble from prompt body and parses
//!    the preamble into a formatting-preserving tree.
//! 3. [`schema`] validates the merged preamble against the recognized
//!    fields, producing example-rich diagnostics.
//! 4. [`model`] builds the typed [`flowlock_types::WorkflowData`] value.
//! 5. [`validate`] runs cross-field checks: container images, packages,
//!    cache ids, secret names, strict-mode rules.
//! 6. [`safe_outputs`], [`mcp`], and the prompt assembler plan the job
//!    surface.
//! 7. [`jobs`] composes the acyclic job graph and [`emit`] serializes it to
//!    a stable YAML lock file, audits expression sizes, and writes
//!    atomically.
//!
//! ## Example
//!
//! ```ignore
//! use flowlock::compiler::Compiler;
//! use flowlock_types::CompileOptions;
//!
//! let compiler = Compiler::new(CompileOptions::default());
//! let artifacts = compiler.compile_file(".github/workflows/triage.md".as_ref())?;
//! println!("wrote {:?}", artifacts.lock_path);
//! ```
//!
//! ## Modules
//!
//! - [`loader`] — Source loading, import graph resolution, remote cache
//! - [`schema`] — Table-driven preamble validation
//! - [`model`] — Model building from merged preamble trees
//! - [`validate`] — Runtime validation (probes, ids, secrets, strict mode)
//! - [`mcp`] — Engine-specific MCP server configuration emission
//! - [`safe_outputs`] — Safe-output planning and handler wiring
//! - [`scripts`] — Embedded, versioned handler scripts
//! - [`jobs`] — Job graph construction and topological ordering
//! - [`emit`] — Deterministic YAML emission, size audit, atomic writes
//! - [`lint`] — Optional external linter invocation
//! - [`compiler`] — The per-file compile pipeline
//! - [`batch`] — Parallel compilation of a workflows directory
//! - [`config`] — `.flowlock.toml` defaults
//! - [`process`] — Command execution with timeout
//! - [`redact`] — Masking of token-like values in rendered output

pub mod batch;
pub mod compiler;
pub mod config;
pub mod emit;
pub mod jobs;
pub mod lint;
pub mod loader;
pub mod mcp;
pub mod model;
pub mod process;
pub mod redact;
pub mod safe_outputs;
pub mod schema;
pub mod scripts;
pub mod validate;

pub use flowlock_types as types;
