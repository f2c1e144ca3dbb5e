//! # Gestionnaires des appels d'entrées/sorties
//!
//! Les corps des appels système une fois les arguments décodés et validés
//! par le répartiteur. Les transferts avec la mémoire utilisateur se font
//! par morceaux, page par page ; le verrou global du système de fichiers
//! n'est jamais gardé pendant la terminaison d'un processus fautif.

use crate::kernel::Kernel;

/// Taille des morceaux échangés entre tampons noyau et mémoire utilisateur.
const IO_CHUNK: usize = 512;

impl Kernel {
    /// Crée un fichier de `initial_size` octets. Retourne 1 en cas de
    /// succès, 0 sinon.
    pub(crate) fn sys_create(&self, name: &str, initial_size: u32) -> i32 {
        self.fs_lock().acquire(self);
        let created = self.filesys().create(name, initial_size);
        self.fs_lock().release(self);
        created as i32
    }

    /// Supprime un fichier. Retourne 1 en cas de succès, 0 sinon.
    pub(crate) fn sys_remove(&self, name: &str) -> i32 {
        self.fs_lock().acquire(self);
        let removed = self.filesys().remove(name);
        self.fs_lock().release(self);
        removed as i32
    }

    /// Lit `size` octets vers `buf`. Le descripteur 0 lit le clavier ;
    /// lire la sortie console échoue ; les autres descripteurs lisent leur
    /// fichier sous le verrou global. Retourne le nombre d'octets lus ou −1.
    pub(crate) fn sys_read(&self, fd: i32, buf: u32, size: u32) -> i32 {
        if size == 0 {
            return 0;
        }

        match fd {
            0 => {
                for offset in 0..size {
                    let key = [self.console().input_getc()];
                    if !self.copy_to_user(buf.wrapping_add(offset), &key) {
                        self.process_exit_with_status(-1);
                    }
                }
                size as i32
            }
            1 => -1,
            _ => {
                let record = match self.find_file(fd) {
                    Some(record) => record,
                    None => return -1,
                };

                let mut chunk = [0u8; IO_CHUNK];
                let mut done: u32 = 0;
                self.fs_lock().acquire(self);
                while done < size {
                    let want = ((size - done) as usize).min(IO_CHUNK);
                    let got = unsafe { (*record).file.read(&mut chunk[..want]) };
                    if got == 0 {
                        break;
                    }
                    if !self.copy_to_user(buf.wrapping_add(done), &chunk[..got]) {
                        self.fs_lock().release(self);
                        self.process_exit_with_status(-1);
                    }
                    done += got as u32;
                    if got < want {
                        break;
                    }
                }
                self.fs_lock().release(self);
                done as i32
            }
        }
    }

    /// Écrit `size` octets depuis `buf`. Le descripteur 1 écrit sur la
    /// console, sans verrou du système de fichiers ; écrire sur l'entrée
    /// clavier échoue ; les autres descripteurs écrivent dans leur fichier
    /// sous le verrou global. Écrire zéro octet rend 0 sans toucher au
    /// fichier. Retourne le nombre d'octets écrits ou −1.
    pub(crate) fn sys_write(&self, fd: i32, buf: u32, size: u32) -> i32 {
        if size == 0 {
            return 0;
        }

        match fd {
            1 => {
                let mut chunk = [0u8; IO_CHUNK];
                let mut done: u32 = 0;
                while done < size {
                    let want = ((size - done) as usize).min(IO_CHUNK);
                    if !self.copy_from_user(buf.wrapping_add(done), &mut chunk[..want]) {
                        self.process_exit_with_status(-1);
                    }
                    self.console().putbuf(&chunk[..want]);
                    done += want as u32;
                }
                size as i32
            }
            0 => -1,
            _ => {
                let record = match self.find_file(fd) {
                    Some(record) => record,
                    None => return -1,
                };

                let mut chunk = [0u8; IO_CHUNK];
                let mut done: u32 = 0;
                self.fs_lock().acquire(self);
                while done < size {
                    let want = ((size - done) as usize).min(IO_CHUNK);
                    if !self.copy_from_user(buf.wrapping_add(done), &mut chunk[..want]) {
                        self.fs_lock().release(self);
                        self.process_exit_with_status(-1);
                    }
                    let written = unsafe { (*record).file.write(&chunk[..want]) };
                    done += written as u32;
                    if written < want {
                        // Le fichier ne peut plus grandir.
                        break;
                    }
                }
                self.fs_lock().release(self);
                done as i32
            }
        }
    }
}
