use parking_lot::{Mutex, RwLock};
use std::sync::Arc;

/// État partagé à sections critiques courtes (jamais tenu à travers un `.await`)
pub type Shared<T> = Arc<Mutex<T>>;

/// Cellule à écrivain unique, lue par de nombreux lecteurs
pub type SharedCell<T> = Arc<RwLock<T>>;

pub fn new_state<T>(value: T) -> Shared<T> {
    Arc::new(Mutex::new(value))
}

pub fn new_cell<T>(value: T) -> SharedCell<T> {
    Arc::new(RwLock::new(value))
}
