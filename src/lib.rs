//! Front end of the Stu build language: the dependency algebra and the
//! recursive descent parser producing rules and dependency expressions
//! from a token stream.
//!
//! Stu dependencies form a small recursive language. Next to plain
//! file-to-file edges there are dynamic dependencies (`[X]`, a file
//! whose contents name further dependencies), transient targets
//! (`@name`), parametrized rules (`list.$name`), variable dependencies
//! (`$[X]`, file contents injected as a shell variable), copy rules and
//! per-edge flag modifiers (`-p`, `-o`, `-t`, ...). This crate defines
//! the in-memory representation of all of that, the operations on it
//! (instantiation, cloning, compound splitting, transitive-flag
//! tracking) and the parser. Scheduling, timestamps and process
//! handling live in the executor on top of this crate.

pub mod dep;
pub mod error;
pub mod flags;
pub mod name;
pub mod parse;
pub mod place;
pub mod rule;
pub mod stack;
pub mod target;
pub mod text;
pub mod token;
