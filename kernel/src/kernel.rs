//! Le contexte noyau.
//!
//! Tous les singletons du système vivent ici : la configuration, les
//! contrats vers la plateforme (machine, console, système de fichiers,
//! chargeur), l'état de l'ordonnanceur, et les deux verrous globaux. Une
//! seule instance est installée au boot ; rien n'est une globale ambiante.
//!
//! Un seul CPU : l'état interne de l'ordonnanceur est protégé par le
//! masquage des interruptions, pas par un verrou.

use alloc::boxed::Box;
use core::cell::{Cell, UnsafeCell};

use spin::Once;

use crate::config::KernelConfig;
use crate::console::Console;
use crate::fs::FileSystem;
use crate::loader::Loader;
use crate::machine::Machine;
use crate::scheduler::thread::Tid;
use crate::scheduler::Scheduler;
use crate::sync::{IntrGuard, Lock};

pub struct Kernel {
    config: KernelConfig,
    machine: Box<dyn Machine>,
    console: Box<dyn Console>,
    filesys: Box<dyn FileSystem>,
    loader: Box<dyn Loader>,
    /// L'état de l'ordonnanceur, muté uniquement interruptions coupées.
    sched: UnsafeCell<Scheduler>,
    /// Le verrou qui sérialise tout appel au système de fichiers.
    fs_lock: Lock,
    /// Le verrou du compteur de tids.
    tid_lock: Lock,
    next_tid: Cell<Tid>,
}

// Un seul CPU ; voir la discipline de sections critiques ci-dessus.
unsafe impl Send for Kernel {}
unsafe impl Sync for Kernel {}

impl Kernel {
    pub fn new(
        config: KernelConfig,
        machine: Box<dyn Machine>,
        console: Box<dyn Console>,
        filesys: Box<dyn FileSystem>,
        loader: Box<dyn Loader>,
    ) -> Self {
        Self {
            machine,
            console,
            filesys,
            loader,
            sched: UnsafeCell::new(Scheduler::new(config.mlfqs)),
            fs_lock: Lock::new(),
            tid_lock: Lock::new(),
            next_tid: Cell::new(1),
            config,
        }
    }

    pub fn config(&self) -> &KernelConfig {
        &self.config
    }

    pub fn machine(&self) -> &dyn Machine {
        &*self.machine
    }

    pub fn console(&self) -> &dyn Console {
        &*self.console
    }

    pub fn filesys(&self) -> &dyn FileSystem {
        &*self.filesys
    }

    pub fn loader(&self) -> &dyn Loader {
        &*self.loader
    }

    /// Le verrou global du système de fichiers.
    pub fn fs_lock(&self) -> &Lock {
        &self.fs_lock
    }

    pub(crate) fn tid_lock(&self) -> &Lock {
        &self.tid_lock
    }

    /// Valeur suivante du compteur de tids. À n'appeler que sous
    /// `tid_lock`.
    pub(crate) fn next_tid(&self) -> Tid {
        let tid = self.next_tid.get();
        self.next_tid.set(tid + 1);
        tid
    }

    /// L'état de l'ordonnanceur.
    ///
    /// # Safety
    /// L'appelant ne doit pas garder deux emprunts exclusifs vivants en
    /// même temps ; en pratique, les mutations se font interruptions
    /// coupées et les emprunts restent locaux.
    #[allow(clippy::mut_from_ref)]
    pub(crate) unsafe fn sched(&self) -> &mut Scheduler {
        &mut *self.sched.get()
    }

    pub(crate) fn intr_guard(&self) -> IntrGuard<'_> {
        IntrGuard::new(self.machine())
    }
}

static KERNEL: Once<Kernel> = Once::new();

/// Installe l'instance unique du noyau. Les installations suivantes sont
/// ignorées et c'est la première qui reste.
pub fn install(kernel: Kernel) -> &'static Kernel {
    KERNEL.call_once(|| kernel)
}

/// Le noyau installé. Panique s'il ne l'est pas encore.
pub fn kernel() -> &'static Kernel {
    KERNEL.get().expect("kernel not installed")
}

/// Le noyau installé, ou `None` avant le boot.
pub fn try_kernel() -> Option<&'static Kernel> {
    KERNEL.get()
}

/// La séquence d'amorçage du cœur : configuration depuis la ligne de
/// commande, installation du contexte, journal, premier thread et vecteur
/// d'appels système. Le démarrage de l'ordonnancement préemptif
/// ([`Kernel::thread_start`]) reste à la charge du chemin de boot, après
/// l'initialisation de l'allocateur.
pub fn init(
    cmdline: &str,
    machine: Box<dyn Machine>,
    console: Box<dyn Console>,
    filesys: Box<dyn FileSystem>,
    loader: Box<dyn Loader>,
) -> &'static Kernel {
    let config = KernelConfig::from_cmdline(cmdline);
    let kernel = install(Kernel::new(config, machine, console, filesys, loader));
    crate::logger::init();
    kernel.thread_init();
    kernel.syscall_init();
    kernel
}
