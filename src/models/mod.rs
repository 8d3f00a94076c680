pub mod instances;
pub mod shapes;
pub mod users;

pub use instances::{
    AssemblyClaim, CaptureOutcome, CollageRef, CreateInstanceView, InstanceParticipant,
    InstanceState, InstanceView, InvalidTransition, InviteView, JoinInstanceView,
    NewInstanceParticipant, NewSnapInstance, NewSyncedSnap, ParticipantView, SnapInstance,
    SyncedSnap,
};
pub use shapes::{GridSpec, Position, PositionView, Shape, ShapeView};
pub use users::{User, UserView};
