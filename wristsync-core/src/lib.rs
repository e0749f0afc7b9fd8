//! WristSync phone/watch synchronization core.
//! Host-driven: no sockets here; the host supplies a transport and pumps inbound messages.

pub mod entity;
pub mod error;
pub mod identity;
pub mod projection;
pub mod protocol;
pub mod relay;
pub mod repository;
pub mod session;
pub mod usecase;
pub mod wire;

pub use entity::{ExerciseEntity, Locale};
pub use error::{AppError, NetworkError};
pub use identity::{DeviceIdentificationUseCase, DeviceIdentifierService, DeviceIdentity, Keypair};
pub use projection::{
    ExercisesState, RecentExercisesViewModel, ResultState, SearchExercisesViewModel,
    DEFAULT_REPLY_TIMEOUT,
};
pub use protocol::{ErrorKind, Message, ReplyBody, RequestId, PROTOCOL_VERSION};
pub use relay::{Activatable, InboundDispatcher, MessageTransport, SendError};
pub use repository::{ExerciseRepository, InMemoryExerciseRepository};
pub use session::{ExercisesEvent, SessionSync, SessionSyncRepository};
pub use usecase::{
    ExerciseRequestHandler, HandleRecentExercisesRequestUseCase,
    HandleSearchExercisesRequestUseCase, RequestHandler, RequestRecentExercisesUseCase,
    RequestSearchExercisesUseCase,
};
pub use wire::{decode_frame, encode_frame, FrameDecodeError, FrameEncodeError};
