use crate::scan::ScanEngine;
use crate::storage::FileStore;
use crate::workflow::Desk;

#[derive(Clone)]
pub struct AppState {
    pub desk: Desk,
    pub scans: ScanEngine,
    pub files: FileStore,
}
