pub mod call;
pub mod notification;
pub mod presence;
pub mod profile;

pub use call::{CallHistoryRecord, CallType};
pub use notification::{NotificationKind, NotificationRecord};
pub use presence::{AuxConnection, PresenceRecord};
pub use profile::UserProfile;
