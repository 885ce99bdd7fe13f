//! Résumé records. Only the entity and its repository live here; short links
//! use them to check that a curriculum exists and who owns it.

pub mod repo;
pub mod repo_types;
