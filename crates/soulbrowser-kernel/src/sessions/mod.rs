mod live;
mod service;
mod types;

pub use live::SessionLiveEvent;
pub use service::SessionService;
pub use types::{
    CreateSessionRequest, LiveFramePayload, LiveOverlayEntry, RouteSummary, SessionRecord,
    SessionShareContext, SessionSnapshot, SessionStatus,
};
