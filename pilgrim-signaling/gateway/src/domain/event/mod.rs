pub mod inbound;
pub mod outbound;

pub use inbound::{
    CallAnswerRequest, CallOfferRequest, GroupRef, IceCandidateRequest, InboundEvent,
    NavBeaconRequest, PeerRequest, RegisterUserRequest, RelayPayload,
};
pub use outbound::{
    BatteryUpdate, CallAnswerNotice, CallOfferNotice, CallerInfo, IceCandidateNotice,
    MissedCallNotice, NavBeaconNotice, OutboundEvent, PeerNotice, StatusUpdate,
};
