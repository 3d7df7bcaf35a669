//! Clients for the external tools braid drives.
//!
//! - [`git`]: the host repository (revision queries, trees, remotes, diffs)
//! - [`cache`]: the shared per-user cache of upstream clones
//!
//! Each client is a trait with a real implementation and, in tests, a mock.

pub mod cache;
pub mod git;
