//! The static-dispatch replacement for runtime accessor bytecode generation (spec §9's first
//! design note). Instead of synthesizing an accessor class per entity type at process start,
//! application code implements [`Entity`] once per type (typically via a derive macro living
//! outside this crate) and the engine calls it through the trait object boundary below.

use entorm_core::Value;

use crate::relation::Relation;

/// An application type that knows how to materialize itself into — and rebuild itself from —
/// the column-id-tagged value tree the codec and key builder operate on.
///
/// This is the one seam where application-specific code meets the engine: everything in
/// `entorm-kv` and `entorm-sql` downstream of this trait works only with `Relation` metadata and
/// `Vec<(u32, Value)>` trees, never with a concrete Rust struct.
pub trait Entity: Sized {
    /// The relation this type is declared against. Implementations typically return a `&'static
    /// Relation` built once at startup.
    fn relation() -> &'static Relation;

    /// Flatten `self` into its column-id-tagged value tree, in the order `relation()` declares
    /// its columns. Used by the record codec and the index key builder.
    fn to_fields(&self) -> Vec<(u32, Value)>;

    /// Rebuild an instance from a decoded value tree. Columns absent from `fields` (because they
    /// were absent from the wire) must be filled from the column's declared default.
    fn from_fields(fields: Vec<(u32, Value)>) -> Self;
}
