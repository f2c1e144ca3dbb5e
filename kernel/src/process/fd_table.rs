//! Table des fichiers ouverts d'un processus.
//!
//! Une liste linéaire de fiches `{fd, handle}` possédée par le thread. Les
//! descripteurs 0 et 1 sont réservés à la console et n'apparaissent jamais
//! ici ; les autres partent de 2, croissent de façon monotone et ne sont
//! jamais recyclés dans la vie d'un processus. Seul le thread propriétaire
//! touche sa table ; les appels au système de fichiers eux-mêmes passent
//! sous le verrou global.

use alloc::boxed::Box;

use crate::fs::File;
use crate::kernel::Kernel;
use crate::libutils::Link;

/// Une fiche de fichier ouvert.
pub struct OpenFile {
    pub fd: i32,
    pub file: Box<dyn File>,
    pub(crate) link: Link<OpenFile>,
}

impl Kernel {
    /// Ouvre `name` et lui alloue un descripteur. Retourne −1 si le fichier
    /// n'existe pas.
    pub fn open_file(&self, name: &str) -> i32 {
        self.fs_lock().acquire(self);
        let opened = self.filesys().open(name);
        self.fs_lock().release(self);

        match opened {
            None => -1,
            Some(file) => unsafe {
                let current = self.thread_current();
                let fd = (*current).num_fd;
                (*current).num_fd += 1;

                let record = Box::into_raw(Box::new(OpenFile {
                    fd,
                    file,
                    link: Link::new(),
                }));
                (*record).link.set_owner(record);
                (*current).files.push_back(&mut (*record).link);
                fd
            },
        }
    }

    /// La fiche du descripteur `fd`, par recherche linéaire.
    pub(crate) fn find_file(&self, fd: i32) -> Option<*mut OpenFile> {
        unsafe {
            let current = self.thread_current();
            for record in (*current).files.iter() {
                if (*record).fd == fd {
                    return Some(record);
                }
            }
        }
        None
    }

    /// Longueur du fichier `fd`, ou −1 s'il est inconnu.
    pub fn file_size(&self, fd: i32) -> i32 {
        match self.find_file(fd) {
            None => -1,
            Some(record) => {
                self.fs_lock().acquire(self);
                let size = unsafe { (*record).file.len() } as i32;
                self.fs_lock().release(self);
                size
            }
        }
    }

    /// Déplace la position du fichier `fd`. Descripteur inconnu : sans
    /// effet.
    pub fn seek_file(&self, fd: i32, pos: u32) {
        if let Some(record) = self.find_file(fd) {
            self.fs_lock().acquire(self);
            unsafe { (*record).file.seek(pos) };
            self.fs_lock().release(self);
        }
    }

    /// Position courante du fichier `fd`, ou −1 s'il est inconnu.
    pub fn tell_file(&self, fd: i32) -> i32 {
        match self.find_file(fd) {
            None => -1,
            Some(record) => {
                self.fs_lock().acquire(self);
                let pos = unsafe { (*record).file.tell() } as i32;
                self.fs_lock().release(self);
                pos
            }
        }
    }

    /// Ferme le descripteur `fd` : la première fiche qui correspond est
    /// détachée et son handle rendu. Fermer un descripteur inconnu est un
    /// no-op silencieux.
    pub fn close_file(&self, fd: i32) {
        if let Some(record) = self.find_file(fd) {
            unsafe {
                let current = self.thread_current();
                (*current).files.remove(&mut (*record).link);
                self.fs_lock().acquire(self);
                drop(Box::from_raw(record));
                self.fs_lock().release(self);
            }
        }
    }

    /// Nombre de fichiers ouverts par le processus courant.
    pub fn open_file_count(&self) -> usize {
        unsafe { (*self.thread_current()).files.len() }
    }
}
