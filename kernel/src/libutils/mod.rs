//! Bibliothèque de modules réutilisables pour le noyau
//!
//! Abstractions communes sans dépendance sur l'ordonnanceur lui-même :
//! l'arithmétique en virgule fixe et la liste chaînée intrusive.

pub mod fixed_point;
pub mod list;

// Réexportations pour un accès facile
pub use fixed_point::Fixed;
pub use list::{Link, List};
