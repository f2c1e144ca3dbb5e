//! # Suivi des processus : fiches enfants et rendez-vous exec/wait/exit
//!
//! Le parent possède une fiche par enfant créé ; l'enfant garde un pointeur
//! brut vers son parent, annulé si le parent meurt le premier — l'orphelin
//! saute alors simplement l'étape de signalement. Le rendez-vous entre
//! `wait` et `exit` passe par le sémaphore `child_process_lock` du parent.

pub mod fd_table;

use alloc::boxed::Box;

use crate::kernel::Kernel;
use crate::libutils::Link;
use crate::scheduler::thread::{Tid, TID_ERROR};
use crate::sync::IntrGuard;

/// La fiche qu'un parent garde sur chacun de ses enfants.
///
/// Créée à la création du thread, consommée par `wait` ou jetée en bloc
/// quand le parent se termine.
pub struct ChildProcess {
    pub tid: Tid,
    pub exit_status: i32,
    /// Vrai dès que l'enfant a terminé et déposé son statut.
    pub did_execute: bool,
    pub(crate) link: Link<ChildProcess>,
}

impl Kernel {
    /// L'appel système `exec` : vérifie sous le verrou du système de
    /// fichiers que le programme existe, puis délègue la création du
    /// processus au chargeur. Retourne le tid du nouveau processus, ou −1 si
    /// le programme ne s'ouvre pas.
    pub fn exec(&self, cmdline: &str) -> Tid {
        self.fs_lock().acquire(self);

        let program = cmdline.split_whitespace().next().unwrap_or("");
        match self.filesys().open(program) {
            None => {
                self.fs_lock().release(self);
                TID_ERROR
            }
            Some(probe) => {
                // On ne voulait que vérifier l'existence.
                drop(probe);
                self.fs_lock().release(self);
                log::info!("exec \"{}\"", cmdline);
                self.loader().execute(self, cmdline)
            }
        }
    }

    /// Attend la fin de l'enfant `child_tid` et retourne son statut de
    /// sortie. Retourne −1 si ce tid n'est pas un enfant non encore
    /// moissonné ; attendre deux fois le même enfant échoue donc la seconde
    /// fois.
    pub fn process_wait(&self, child_tid: Tid) -> i32 {
        let _guard = IntrGuard::new(self.machine());

        unsafe {
            let current = self.thread_current();

            let mut record: *mut ChildProcess = core::ptr::null_mut();
            for c in (*current).children.iter() {
                if (*c).tid == child_tid {
                    record = c;
                    break;
                }
            }
            if record.is_null() {
                return -1;
            }

            (*current).tid_wait = child_tid;
            if !(*record).did_execute {
                // L'enfant court encore ; son `exit` nous relèvera.
                (*current).child_process_lock.down(self);
            }

            let status = (*record).exit_status;
            (*current).children.remove(&mut (*record).link);
            drop(Box::from_raw(record));
            (*current).tid_wait = 0;
            status
        }
    }

    /// Termine le processus courant avec `status` : dépose le statut dans la
    /// fiche du parent, le réveille s'il nous attend, puis passe par la
    /// sortie de thread. Ne retourne jamais.
    pub fn process_exit_with_status(&self, status: i32) -> ! {
        unsafe {
            let current = self.thread_current();
            {
                let _guard = IntrGuard::new(self.machine());
                let parent = (*current).parent;
                if !parent.is_null() {
                    for record in (*parent).children.iter() {
                        if (*record).tid == (*current).tid {
                            (*record).did_execute = true;
                            (*record).exit_status = status;
                            break;
                        }
                    }
                }
                (*current).exit_status = status;
                if !parent.is_null() && (*parent).tid_wait == (*current).tid {
                    (*parent).child_process_lock.up(self);
                }
            }
        }
        self.thread_exit();
    }

    /// Rend les ressources de processus du thread courant : chaque fichier
    /// ouvert est fermé sous le verrou du système de fichiers, l'exécutable
    /// retrouve son droit d'écriture, puis l'espace d'adressage est détruit.
    /// Appelé par la sortie de thread, y compris pour les threads noyau —
    /// pour eux c'est un no-op.
    pub(crate) fn process_exit(&self) {
        unsafe {
            let current = self.thread_current();

            if !(*current).files.is_empty() || (*current).executable_file.is_some() {
                self.fs_lock().acquire(self);
                while let Some(open_file) = (*current).files.pop_front() {
                    drop(Box::from_raw(open_file));
                }
                if let Some(mut executable) = (*current).executable_file.take() {
                    executable.allow_write();
                    drop(executable);
                }
                self.fs_lock().release(self);
            }

            if (*current).pagedir.is_some() {
                let message =
                    alloc::format!("{}: exit({})\n", (*current).name(), (*current).exit_status);
                self.console().putbuf(message.as_bytes());
                (*current).pagedir = None;
            }
        }
    }
}
