//! # Structure de Thread (TCB - Thread Control Block)
//!
//! Chaque thread occupe une page de 4 Kio : le TCB est placé en bas de la
//! page et la pile noyau descend depuis le haut. Le canari magique est le
//! *dernier* champ de la structure, donc le premier écrasé par un
//! débordement de pile — c'est notre détecteur.

use alloc::alloc::{alloc_zeroed, dealloc, Layout};
use alloc::boxed::Box;
use core::fmt;
use core::ptr;

use crate::config::PGSIZE;
use crate::fs::File;
use crate::libutils::{Fixed, Link, List};
use crate::loader::AddressSpace;
use crate::process::fd_table::OpenFile;
use crate::process::ChildProcess;
use crate::sync::Lock;
use crate::sync::Semaphore;

/// Valeur du canari de pile. Un pointeur qui ne la porte pas n'est pas un
/// thread.
pub const THREAD_MAGIC: u32 = 0xcd6a_bf4b;

/// Longueur maximale d'un nom de thread, terminateur compris.
pub const THREAD_NAME_LEN: usize = 16;

/// Identifiant de thread, alloué de façon monotone sous `tid_lock`.
pub type Tid = i32;

/// Sentinelle renvoyée quand la création de thread échoue.
pub const TID_ERROR: Tid = -1;

/// La fonction exécutée par un thread noyau, avec sa donnée auxiliaire.
pub type ThreadFunc = fn(aux: *mut ());

/// États possibles d'un thread.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ThreadStatus {
    /// En cours d'exécution sur le CPU (un seul à la fois).
    Running,
    /// Prêt, rangé dans une structure de threads prêts.
    Ready,
    /// Bloqué sur une primitive ; ne redevient prêt que par `unblock`.
    Blocked,
    /// En train de mourir ; sa page sera libérée au prochain changement de
    /// contexte.
    Dying,
}

/// Le bloc de contrôle d'un thread.
///
/// `repr(C)` fige l'ordre des champs : le canari doit rester le dernier,
/// c'est-à-dire à l'adresse la plus haute de la structure, juste sous la
/// pile qui descend vers lui.
#[repr(C)]
pub struct Thread {
    pub tid: Tid,
    pub status: ThreadStatus,
    pub name: [u8; THREAD_NAME_LEN],
    /// Sommet de pile sauvegardé par le stub de changement de contexte.
    pub stack: *mut u8,

    /// Priorité effective, donations comprises.
    pub priority: i32,
    /// Priorité demandée par le thread lui-même.
    pub base_priority: i32,
    /// Threads qui nous donnent actuellement leur priorité.
    pub donors: List<Thread>,
    /// Maillon dans la liste de donneurs d'un détenteur de verrou.
    pub donor_link: Link<Thread>,
    /// Le verrou sur lequel ce thread est bloqué, s'il y en a un.
    pub wait_lock: *mut Lock,

    /// Gentillesse, entre NICE_MIN et NICE_MAX.
    pub nice: i32,
    /// Estimation 17.14 du temps CPU récemment consommé.
    pub recent_cpu: Fixed,

    /// Maillon des files génériques : liste de prêts ou attente de
    /// sémaphore, jamais les deux à la fois.
    pub sched_link: Link<Thread>,
    /// Maillon du seau de la file de retour multi-niveaux.
    pub mlfqs_link: Link<Thread>,
    /// Maillon de la liste de tous les threads vivants.
    pub all_link: Link<Thread>,
    /// Maillon de la file des dormeurs, triée par tic de réveil.
    pub sleep_link: Link<Thread>,
    /// Tic auquel un dormeur doit être réveillé.
    pub wake_tick: i64,

    /// Parent, ou nul si le parent est déjà mort.
    pub parent: *mut Thread,
    /// Fiches des enfants créés par ce thread.
    pub children: List<ChildProcess>,
    /// Sémaphore de rendez-vous entre `wait` et `exit`.
    pub child_process_lock: Semaphore,
    /// Tid de l'enfant attendu, 0 sinon.
    pub tid_wait: Tid,
    /// L'exécutable du processus, gardé ouvert en écriture interdite.
    pub executable_file: Option<Box<dyn File>>,
    /// Prochain descripteur de fichier ; 0 et 1 sont réservés.
    pub num_fd: i32,
    /// Fichiers ouverts par ce processus.
    pub files: List<OpenFile>,
    pub exit_status: i32,
    /// Espace d'adressage utilisateur, ou `None` pour un thread noyau.
    pub pagedir: Option<Box<dyn AddressSpace>>,

    /// Canari — toujours en dernier.
    pub magic: u32,
}

// Le TCB doit laisser l'essentiel de la page à la pile.
const _: () = assert!(core::mem::size_of::<Thread>() <= PGSIZE / 4);

impl Thread {
    /// Le nom, tronqué au premier octet nul.
    pub fn name(&self) -> &str {
        let len = self
            .name
            .iter()
            .position(|&b| b == 0)
            .unwrap_or(THREAD_NAME_LEN);
        core::str::from_utf8(&self.name[..len]).unwrap_or("<invalid>")
    }

    pub(crate) fn set_name(&mut self, name: &str) {
        self.name = [0; THREAD_NAME_LEN];
        let bytes = name.as_bytes();
        let len = bytes.len().min(THREAD_NAME_LEN - 1);
        self.name[..len].copy_from_slice(&bytes[..len]);
    }
}

impl fmt::Debug for Thread {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Thread")
            .field("tid", &self.tid)
            .field("name", &self.name())
            .field("status", &self.status)
            .field("priority", &self.priority)
            .finish()
    }
}

/// Vrai si `t` semble pointer vers un thread valide.
pub fn is_thread(t: *const Thread) -> bool {
    !t.is_null() && unsafe { (*t).magic == THREAD_MAGIC }
}

fn page_layout() -> Layout {
    // PGSIZE est une puissance de deux non nulle.
    unsafe { Layout::from_size_align_unchecked(PGSIZE, PGSIZE) }
}

/// Alloue une page de thread mise à zéro, ou nul si la mémoire manque.
pub(crate) fn alloc_thread_page() -> *mut Thread {
    unsafe { alloc_zeroed(page_layout()) as *mut Thread }
}

/// Libère la page d'un thread mort.
///
/// # Safety
/// `t` doit être une page allouée par [`alloc_thread_page`], initialisée,
/// et plus référencée par aucune liste.
pub(crate) unsafe fn free_thread_page(t: *mut Thread) {
    ptr::drop_in_place(t);
    dealloc(t as *mut u8, page_layout());
}

/// Renseigne le propriétaire de chaque maillon une fois le TCB à son
/// adresse définitive.
pub(crate) unsafe fn attach_links(t: *mut Thread) {
    (*t).donor_link.set_owner(t);
    (*t).sched_link.set_owner(t);
    (*t).mlfqs_link.set_owner(t);
    (*t).all_link.set_owner(t);
    (*t).sleep_link.set_owner(t);
}

/// Comparateur des files ordonnées : priorité effective décroissante.
pub(crate) fn priority_greater(a: *mut Thread, b: *mut Thread) -> bool {
    unsafe { (*a).priority > (*b).priority }
}

// ---------------------------------------------------------------------------
// Cadres d'amorçage
//
// Trois cadres sont posés en haut de la pile d'un thread neuf. Le stub de
// changement de contexte dépile le dernier comme s'il s'agissait d'un thread
// déjà endormi ; l'adresse de retour le fait passer par le point d'entrée du
// stub, puis par `kernel_thread`, qui appelle enfin la fonction du thread.
// ---------------------------------------------------------------------------

/// Cadre de [`kernel_thread`] : une fausse adresse de retour suivie de la
/// fonction et de sa donnée auxiliaire.
#[repr(C)]
pub(crate) struct KernelThreadFrame {
    pub eip: usize,
    pub function: ThreadFunc,
    pub aux: *mut (),
}

/// Cadre du point d'entrée du stub : l'adresse de [`kernel_thread`].
#[repr(C)]
pub(crate) struct SwitchEntryFrame {
    pub eip: usize,
}

/// Cadre consommé par le stub d'échange de piles.
#[repr(C)]
pub(crate) struct SwitchThreadsFrame {
    pub eip: usize,
    pub ebp: usize,
}

/// Réserve `size_of::<F>()` octets en haut de la pile de `t` et retourne le
/// cadre.
///
/// # Safety
/// `t` doit être un thread valide dont la pile n'a encore jamais tourné.
pub(crate) unsafe fn alloc_frame<F>(t: *mut Thread) -> *mut F {
    debug_assert!(is_thread(t));
    debug_assert!(core::mem::size_of::<F>() % core::mem::size_of::<usize>() == 0);
    (*t).stack = (*t).stack.sub(core::mem::size_of::<F>());
    (*t).stack as *mut F
}

/// Première fonction exécutée par tout thread noyau.
///
/// Le stub de changement de contexte nous laisse avec les interruptions
/// coupées ; on les rouvre, on exécute la fonction du thread, et si elle
/// retourne le thread se termine proprement.
pub(crate) fn kernel_thread(function: ThreadFunc, aux: *mut ()) -> ! {
    let kernel = crate::kernel::kernel();
    kernel.machine().restore_interrupts(true);
    function(aux);
    kernel.thread_exit();
}
