// src/lib.rs
// Cœur de concurrence et de gestion de processus du noyau.
//
// Deux sous-systèmes étroitement liés : l'ordonnanceur de threads (priorités
// strictes avec donation, ou file de retour multi-niveaux pilotée par la
// comptabilité en virgule fixe) et la couche d'appels système des processus
// utilisateur. Tout ce qui touche le matériel, le système de fichiers ou le
// chargement de programmes passe par des contrats ; les tests les
// remplacent par des doublures et la bibliothèque se construit telle quelle
// sur l'hôte.
#![cfg_attr(not(test), no_std)]

// Import de alloc pour les allocations dynamiques
extern crate alloc;

// Modules du noyau
pub mod config;
pub mod console;
pub mod fs;
pub mod kernel;
pub mod libutils;
pub mod loader;
pub mod logger;
pub mod machine;
pub mod process;
pub mod scheduler;
pub mod sync;
pub mod syscall;

#[cfg(test)]
mod tests;

// Réexportations de l'interface principale.
pub use config::KernelConfig;
pub use kernel::{install, kernel, try_kernel, Kernel};
pub use scheduler::thread::{Thread, ThreadStatus, Tid, TID_ERROR};
pub use scheduler::{SpawnError, SpawnResult};
pub use syscall::TrapFrame;

/// Allocateur global du noyau. Les tests hôtes utilisent l'allocateur du
/// système.
#[cfg(not(test))]
#[global_allocator]
static ALLOCATOR: linked_list_allocator::LockedHeap = linked_list_allocator::LockedHeap::empty();

/// Initialise le tas du noyau sur une région de mémoire physique déjà
/// mappée. À appeler une seule fois, avant toute allocation.
///
/// # Safety
/// La région `[start, start + size)` doit être valide, inutilisée, et le
/// rester pour toute la vie du noyau.
#[cfg(not(test))]
pub unsafe fn heap_init(start: *mut u8, size: usize) {
    ALLOCATOR.lock().init(start, size);
}
