use pkg_proc::{BoxedExecutor, BoxedSupervisor};
use pkg_state::BoxedStore;

use crate::mon::BoxedMonClient;

/// Collaborators shared by every agent operation on one node.
#[derive(Clone)]
pub struct Context {
    pub store: BoxedStore,
    pub executor: BoxedExecutor,
    pub proc_man: BoxedSupervisor,
    pub mon: BoxedMonClient,
    pub node_id: String,
}
