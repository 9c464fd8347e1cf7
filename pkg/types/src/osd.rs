use serde::{Deserialize, Serialize};

/// Identity and secret allocated to an OSD by the cluster authority.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OsdIdentity {
    pub id: u32,
    pub key: String,
}

impl OsdIdentity {
    /// Auth entity name for this OSD (`osd.<id>`).
    pub fn entity(&self) -> String {
        format!("osd.{}", self.id)
    }
}
