/*! Validation engine of the vigil conformance layer.
 *
 *  The engine sits between an application and a native graphics/compute
 *  driver. For every intercepted entry point it decides whether the call is
 *  legal under the static rules of the API version and extension set in
 *  force, and under the dynamic state of every live object the call
 *  touches. Violations are reported as [`Defect`] records with stable
 *  codes; the engine is advisory and never aborts the call.
 *
 *  [`Defect`]: crate::defect::Defect
 */

#![warn(
    trivial_casts,
    trivial_numeric_casts,
    unsafe_op_in_unsafe_fn,
    unused_extern_crates,
    unused_qualifications,
    clippy::pattern_type_mismatch
)]
#![allow(
    // It is much clearer to assert negative conditions with eq! false
    clippy::bool_assert_comparison,
    // Redundant matching is more explicit.
    clippy::redundant_pattern_matching,
    // Explicit lifetimes are often easier to reason about.
    clippy::needless_lifetimes,
    // No need for defaults in the internal types.
    clippy::new_without_default
)]

pub mod command;
pub mod defect;
pub mod id;
pub mod ledger;
pub mod legality;
pub mod layout;
mod lock;
pub mod resource;
pub mod session;
pub mod storage;
pub mod validator;

use std::hash::BuildHasherDefault;

/// Position of a handle within its storage table.
type Index = u32;
/// Generation counter distinguishing reuses of one index.
type Epoch = u32;

/// Deepest mip chain the layout tracker sizes its per-image tables for.
/// A `u32` extent can never need more; longer declared chains are
/// reported at image creation.
pub const MAX_MIP_LEVELS: usize = 32;

type FastHashMap<K, V> =
    std::collections::HashMap<K, V, BuildHasherDefault<rustc_hash::FxHasher>>;
type FastHashSet<K> = std::collections::HashSet<K, BuildHasherDefault<rustc_hash::FxHasher>>;
