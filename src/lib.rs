//! # clrpatch
//!
//! Signature-driven method body patching for ECMA-335 CLI/.NET modules.
//!
//! A [`Module`] is parsed from a PE image into a Type → Method → Parameter graph
//! with decoded IL bodies. A [`RuleSet`] selects methods by name, staticness and
//! parameter names and replaces their whole bodies with canonical sequences such
//! as "return true". The module is then written back with every untouched byte,
//! row and token preserved.
//!
//! ## Features
//!
//! - Parse PE32/PE32+ headers, the CLI header and the BSJB metadata root
//! - Decode and encode IL method bodies (tiny and fat headers, exception sections)
//! - Match methods by signature and replace their bodies
//! - Write bodies in place when they fit, otherwise into an appended section
//! - Atomic file replacement
//!
//! ## Example
//!
//! ```ignore
//! use clrpatch::{LogSink, Module, RuleSet};
//!
//! let mut module = Module::from_path("Library.dll")?;
//! let rules: RuleSet = "IsFeatureActivated(featureGuid) -> true".parse()?;
//!
//! let report = rules.apply(&mut module, &mut LogSink)?;
//! println!("{} methods patched", report.len());
//!
//! module.write_to_path("Library.dll")?;
//! ```

pub mod audit;
pub mod cli_header;
pub mod error;
pub mod heaps;
pub mod il;
pub mod matcher;
pub mod metadata;
pub mod module;
pub mod pe;
pub mod reader;
pub mod rewriter;
pub mod root;
pub mod rules;
mod serialize;
pub mod signature;
pub mod stream;
pub mod tables;
pub mod token;
pub mod writer;


// Re-export main types
pub use audit::{AuditEvent, AuditSink, LogSink};
pub use error::{Error, ErrorKind, Result};
pub use module::{Method, Module, Parameter, TypeDef};
pub use rules::{OverlapPolicy, PatchReport, PatchRule, PatchedMethod, RuleSet};

// Re-export building blocks
pub use il::{Instruction, MethodBody, OpCode, Operand};
pub use matcher::{MethodFilter, MethodPredicate, ParamNames};
pub use metadata::Metadata;
pub use rewriter::{Replacement, replace_body};
pub use signature::ReturnKind;
pub use token::Token;
