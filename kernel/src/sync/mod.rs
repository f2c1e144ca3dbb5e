//! Primitives de synchronisation.
//!
//! Trois étages : la section critique à interruptions masquées, le sémaphore
//! (avec réveil du meilleur dormeur), et le verrou, qui ajoute au sémaphore
//! binaire un détenteur et la donation de priorité.

pub mod lock;
pub mod semaphore;

pub use lock::Lock;
pub use semaphore::Semaphore;

use crate::machine::Machine;

/// Section critique à interruptions masquées.
///
/// Sauvegarde l'état d'activation des interruptions, les coupe, et restaure
/// l'état sauvegardé quand la garde est lâchée. Toute mutation de l'état de
/// l'ordonnanceur se fait sous cette garde.
pub struct IntrGuard<'a> {
    machine: &'a dyn Machine,
    was_enabled: bool,
}

impl<'a> IntrGuard<'a> {
    pub fn new(machine: &'a dyn Machine) -> Self {
        let was_enabled = machine.disable_interrupts();
        Self {
            machine,
            was_enabled,
        }
    }
}

impl Drop for IntrGuard<'_> {
    fn drop(&mut self) {
        self.machine.restore_interrupts(self.was_enabled);
    }
}
