//! Foundation layer for wfref
//!
//! Shared types for resolving `uses:` references found in workflow files:
//! the normalized [`ActionIdentity`], the parsed [`ActionDescriptor`] and the
//! error taxonomy used by every other crate.

pub mod descriptor;
pub mod error;
pub mod identity;

pub use descriptor::{ActionDescriptor, ParameterMap};
pub use error::{CoreError, CoreResult, ResolutionError, ResolutionErrorKind};
pub use identity::{ActionIdentity, IdentityError, ReferenceKind};
